//! Experience ledger collaborator.

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::Database;

/// Owns chat experience history and cached totals.
#[async_trait]
pub trait ExperienceLedger: Send + Sync {
    /// Drop cached experience snapshots for the given users.
    async fn invalidate_snapshots(&self, ids: &[i64]) -> Result<(), String>;

    /// Move experience ownership from `old` to `new`, recording the original
    /// owner so the move can be undone.
    async fn relink_chat_experience(&self, old: i64, new: i64) -> Result<(), String>;

    /// Restore the per-event ownership recorded when `old` was relinked.
    async fn undo_chat_experience_relink(&self, old: i64) -> Result<(), String>;

    /// Replay the aggregate user's experience from history. Peer-punishment
    /// multipliers change when channels merge, so the full history must be
    /// re-evaluated. Fire-and-forget.
    async fn recalculate_chat_experience(&self, aggregate_user_id: i64) -> Result<(), String>;
}

/// SQLite-backed experience ledger.
pub struct DbExperienceLedger {
    db: Arc<Database>,
}

impl DbExperienceLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ExperienceLedger for DbExperienceLedger {
    async fn invalidate_snapshots(&self, ids: &[i64]) -> Result<(), String> {
        self.db
            .delete_experience_snapshots(ids)
            .map_err(|e| format!("Failed to invalidate experience snapshots: {}", e))?;
        Ok(())
    }

    async fn relink_chat_experience(&self, old: i64, new: i64) -> Result<(), String> {
        let moved = self
            .db
            .relink_chat_experience_rows(old, new)
            .map_err(|e| format!("Failed to relink chat experience: {}", e))?;
        log::info!("[Experience] Relinked {} experience rows from {} to {}", moved, old, new);
        Ok(())
    }

    async fn undo_chat_experience_relink(&self, old: i64) -> Result<(), String> {
        let restored = self
            .db
            .undo_chat_experience_relink_rows(old)
            .map_err(|e| format!("Failed to undo chat experience relink: {}", e))?;
        log::info!("[Experience] Restored {} experience rows to user {}", restored, old);
        Ok(())
    }

    async fn recalculate_chat_experience(&self, aggregate_user_id: i64) -> Result<(), String> {
        let db = self.db.clone();
        tokio::spawn(async move {
            match db.total_chat_experience(aggregate_user_id) {
                Ok(total) => {
                    if let Err(e) = db.upsert_experience_snapshot(aggregate_user_id, total) {
                        log::error!(
                            "[Experience] Failed to store recalculated snapshot for {}: {}",
                            aggregate_user_id,
                            e
                        );
                    } else {
                        log::info!(
                            "[Experience] Recalculated experience for user {}: {}",
                            aggregate_user_id,
                            total
                        );
                    }
                }
                Err(e) => {
                    log::error!(
                        "[Experience] Failed to recalculate experience for {}: {}",
                        aggregate_user_id,
                        e
                    );
                }
            }
        });
        Ok(())
    }
}
