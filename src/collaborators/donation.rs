//! Donation ledger collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::db::Database;
use crate::models::RankKind;

/// Total lifetime donations (in cents) required to hold the donator rank.
const DONATOR_THRESHOLD_CENTS: i64 = 500;

/// How long a freshly evaluated donator rank stays valid.
const DONATOR_RANK_DAYS: i64 = 183;

/// Owns donation history and donation-driven ranks.
#[async_trait]
pub trait DonationLedger: Send + Sync {
    async fn relink_donation(&self, old: i64, new: i64) -> Result<(), String>;

    async fn undo_donation_relink(&self, old: i64) -> Result<(), String>;

    /// Re-check donation rank eligibility for an aggregate identity after
    /// its connected set changed.
    async fn re_evaluate_donation_ranks(
        &self,
        aggregate_user_id: i64,
        reason: &str,
    ) -> Result<(), String>;
}

/// SQLite-backed donation ledger.
pub struct DbDonationLedger {
    db: Arc<Database>,
}

impl DbDonationLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DonationLedger for DbDonationLedger {
    async fn relink_donation(&self, old: i64, new: i64) -> Result<(), String> {
        let moved = self
            .db
            .relink_donation_rows(old, new)
            .map_err(|e| format!("Failed to relink donations: {}", e))?;
        log::info!("[Donation] Relinked {} donations from {} to {}", moved, old, new);
        Ok(())
    }

    async fn undo_donation_relink(&self, old: i64) -> Result<(), String> {
        let restored = self
            .db
            .undo_donation_relink_rows(old)
            .map_err(|e| format!("Failed to undo donation relink: {}", e))?;
        log::info!("[Donation] Restored {} donations to user {}", restored, old);
        Ok(())
    }

    async fn re_evaluate_donation_ranks(
        &self,
        aggregate_user_id: i64,
        reason: &str,
    ) -> Result<(), String> {
        let connected = self
            .db
            .get_connected_chat_user_ids(&[aggregate_user_id])
            .map_err(|e| format!("Failed to resolve connected users: {}", e))?;
        let ids = &connected[0].connected_ids;

        let total = self
            .db
            .total_donation_cents(ids)
            .map_err(|e| format!("Failed to total donations: {}", e))?;

        let has_donator_rank = self
            .db
            .active_ranks_for_users(&[aggregate_user_id])
            .map_err(|e| format!("Failed to load ranks: {}", e))?
            .iter()
            .any(|r| r.kind == RankKind::Donator);

        if total >= DONATOR_THRESHOLD_CENTS && !has_donator_rank {
            let expiration = Utc::now() + Duration::days(DONATOR_RANK_DAYS);
            self.db
                .add_user_rank(aggregate_user_id, None, RankKind::Donator, Some(expiration), None)
                .map_err(|e| format!("Failed to grant donator rank: {}", e))?;
            log::info!(
                "[Donation] Granted donator rank to user {} ({} cents total, reason: {})",
                aggregate_user_id,
                total,
                reason
            );
        }
        Ok(())
    }
}
