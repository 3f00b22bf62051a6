//! Rank ledger collaborator: transfers, admin-reference relinks, and the
//! rank merge diff consumed by external reconciliation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::models::rank::RankEntry;
use crate::models::{MergeOutcome, MergeResult, UserRank};

/// Owns the rank ledger.
#[async_trait]
pub trait RankLedger: Send + Sync {
    /// Repoint assigned-by/revoked-by admin-actor references.
    async fn relink_admin_users(&self, old: i64, new: i64) -> Result<(), String>;

    /// Transfer active ranks between identities. With `keep_existing` the
    /// source identity keeps its ranks and the target receives copies (used
    /// when an aggregate identity survives a split with other members);
    /// otherwise the ranks move wholesale.
    async fn transfer_ranks(
        &self,
        from: i64,
        to: i64,
        reason: &str,
        keep_existing: bool,
    ) -> Result<(), String>;

    /// Diff and consolidate ranks across a connected set onto the aggregate
    /// identity, returning a per-streamer description of what changed.
    async fn merge_ranks(
        &self,
        aggregate_user_id: i64,
        connected_ids: &[i64],
        reason: &str,
    ) -> Result<MergeOutcome, String>;
}

/// SQLite-backed rank ledger.
///
/// Collision rule: when two identities hold the same rank on the same
/// streamer, the entry with the longest remaining expiration survives (no
/// expiration counts as unbounded); ties go to the oldest rank row. Losers
/// are revoked and reported in `old_ranks` so reconciliation can retract any
/// stale externally-visible state.
pub struct DbRankLedger {
    db: Arc<Database>,
}

impl DbRankLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn survivor_index(entries: &[UserRank]) -> usize {
        let mut best = 0;
        for (i, entry) in entries.iter().enumerate().skip(1) {
            if outlives(entry, &entries[best]) {
                best = i;
            }
        }
        best
    }
}

/// Whether `a` survives a collision with `b`.
fn outlives(a: &UserRank, b: &UserRank) -> bool {
    match (a.expiration_time, b.expiration_time) {
        (None, Some(_)) => true,
        (Some(_), None) => false,
        (None, None) => a.id < b.id,
        (Some(ea), Some(eb)) => {
            if ea != eb {
                ea > eb
            } else {
                a.id < b.id
            }
        }
    }
}

fn to_entry(rank: &UserRank) -> RankEntry {
    RankEntry {
        kind: rank.kind,
        rank_id: rank.id,
        expiration_time: rank.expiration_time,
    }
}

#[async_trait]
impl RankLedger for DbRankLedger {
    async fn relink_admin_users(&self, old: i64, new: i64) -> Result<(), String> {
        let updated = self
            .db
            .relink_admin_user_refs(old, new)
            .map_err(|e| format!("Failed to relink admin user references: {}", e))?;
        log::info!("[Rank] Repointed {} admin references from {} to {}", updated, old, new);
        Ok(())
    }

    async fn transfer_ranks(
        &self,
        from: i64,
        to: i64,
        reason: &str,
        keep_existing: bool,
    ) -> Result<(), String> {
        let moved = if keep_existing {
            self.db
                .copy_active_ranks(from, to)
                .map_err(|e| format!("Failed to copy ranks: {}", e))?
        } else {
            self.db
                .move_active_ranks(from, to)
                .map_err(|e| format!("Failed to move ranks: {}", e))?
        };
        log::info!(
            "[Rank] Transferred {} ranks from {} to {} (keep_existing: {}, reason: {})",
            moved,
            from,
            to,
            keep_existing,
            reason
        );
        Ok(())
    }

    async fn merge_ranks(
        &self,
        aggregate_user_id: i64,
        connected_ids: &[i64],
        reason: &str,
    ) -> Result<MergeOutcome, String> {
        let ranks = self
            .db
            .active_ranks_for_users(connected_ids)
            .map_err(|e| format!("Failed to load ranks for merge: {}", e))?;

        // Group colliding ranks by (streamer, kind). BTreeMap keeps the
        // per-streamer results deterministic.
        let mut groups: BTreeMap<(Option<i64>, &str), Vec<UserRank>> = BTreeMap::new();
        for rank in &ranks {
            groups
                .entry((rank.streamer_id, rank.kind.as_str()))
                .or_default()
                .push(rank.clone());
        }

        let mut warnings = Vec::new();
        let mut per_streamer: BTreeMap<i64, MergeResult> = BTreeMap::new();
        let now: DateTime<Utc> = Utc::now();

        for ((streamer_id, _kind), mut entries) in groups {
            entries.sort_by_key(|r| r.id);
            let survivor_idx = Self::survivor_index(&entries);
            let survivor = entries[survivor_idx].clone();

            let moved = survivor.chat_user_id != aggregate_user_id;
            if moved {
                self.db
                    .reassign_rank_owner(survivor.id, aggregate_user_id)
                    .map_err(|e| format!("Failed to consolidate rank {}: {}", survivor.id, e))?;
            }

            let mut old_entries = Vec::new();
            for (i, loser) in entries.iter().enumerate() {
                if i == survivor_idx {
                    continue;
                }
                self.db
                    .revoke_rank(loser.id, None, reason)
                    .map_err(|e| format!("Failed to revoke colliding rank {}: {}", loser.id, e))?;
                old_entries.push(to_entry(loser));
            }
            if !old_entries.is_empty() {
                warnings.push(format!(
                    "{} colliding {} rank(s) were revoked in favor of rank {}",
                    old_entries.len(),
                    survivor.kind,
                    survivor.id
                ));
            }

            // Global ranks (no streamer) are consolidated but produce no
            // per-streamer diff; there is nothing external to reconcile.
            let Some(streamer_id) = streamer_id else {
                continue;
            };
            if !survivor.kind.is_externally_enforced() && old_entries.is_empty() && !moved {
                continue;
            }

            let result = per_streamer
                .entry(streamer_id)
                .or_insert_with(|| MergeResult::empty(streamer_id));
            if moved {
                result.additions.push(to_entry(&survivor));
            } else {
                result.unchanged.push(to_entry(&survivor));
            }
            result.old_ranks.extend(old_entries);

            if survivor
                .expiration_time
                .map(|exp| exp <= now)
                .unwrap_or(false)
            {
                warnings.push(format!(
                    "surviving {} rank {} expired during the merge",
                    survivor.kind, survivor.id
                ));
            }
        }

        Ok(MergeOutcome {
            warnings,
            individual_results: per_streamer.into_values().collect(),
        })
    }
}
