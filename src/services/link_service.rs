//! The link/unlink orchestrator.
//!
//! A link or unlink runs as one logical operation: admission control through
//! the identity store's conditional attempt insert, ordered side effects
//! against the ledgers, compensating rollback of the graph edge on the link
//! path, and best-effort external reconciliation on merges. Every admitted
//! attempt reaches a terminal state before the call returns, and the
//! original error is always surfaced to the caller after the attempt is
//! recorded.

use std::sync::Arc;

use crate::collaborators::{DonationLedger, ExperienceLedger, RankLedger, StreamerDirectory};
use crate::db::Database;
use crate::errors::LinkError;
use crate::models::link::UnlinkOutcome;
use crate::models::{LinkOutcome, LinkOutcomeKind, UnlinkOptions};
use crate::services::Reconciler;

pub struct LinkService {
    db: Arc<Database>,
    experience: Arc<dyn ExperienceLedger>,
    donations: Arc<dyn DonationLedger>,
    ranks: Arc<dyn RankLedger>,
    streamers: Arc<dyn StreamerDirectory>,
    reconciler: Arc<Reconciler>,
    /// Upper bound on the number of channels one aggregate identity may
    /// hold, preventing unbounded identity graphs.
    max_linked_channels: usize,
}

impl LinkService {
    pub fn new(
        db: Arc<Database>,
        experience: Arc<dyn ExperienceLedger>,
        donations: Arc<dyn DonationLedger>,
        ranks: Arc<dyn RankLedger>,
        streamers: Arc<dyn StreamerDirectory>,
        reconciler: Arc<Reconciler>,
        max_linked_channels: usize,
    ) -> Self {
        Self {
            db,
            experience,
            donations,
            ranks,
            streamers,
            reconciler,
            max_linked_channels,
        }
    }

    /// Merge a default user into an aggregate identity.
    ///
    /// On admission refusal the error propagates unmodified; no attempt
    /// record exists to complete. Once admitted, any failure rolls back the
    /// graph edge, records the failed attempt, and rethrows the original
    /// error.
    pub async fn link_user(
        &self,
        default_user_id: i64,
        aggregate_user_id: i64,
        link_token: Option<&str>,
    ) -> Result<LinkOutcome, LinkError> {
        let attempt_id = self
            .db
            .start_link_attempt(default_user_id, aggregate_user_id)?
            .ok_or(LinkError::AttemptInProgress { default_user_id })?;
        log::info!(
            "[Link] Attempt {} admitted: linking user {} into aggregate {}",
            attempt_id,
            default_user_id,
            aggregate_user_id
        );

        // Edge precondition, before any mutation. The rollback below clears
        // the edge to NULL, which is only correct if the edge was NULL when
        // the attempt started; an already-linked user must unlink first.
        if let Err(err) = self.guard_unlinked(default_user_id) {
            if let Err(complete_err) = self
                .db
                .complete_link_attempt(attempt_id, Some(&err.to_string()))
            {
                log::error!(
                    "[Link] Failed to record failed attempt {}: {}",
                    attempt_id,
                    complete_err
                );
            }
            log::warn!("[Link] Attempt {} refused: {}", attempt_id, err);
            return Err(err);
        }

        match self
            .run_link(attempt_id, default_user_id, aggregate_user_id, link_token)
            .await
        {
            Ok(outcome) => {
                self.db.complete_link_attempt(attempt_id, None)?;
                log::info!("[Link] Attempt {} succeeded ({:?})", attempt_id, outcome.kind);
                Ok(outcome)
            }
            Err(err) => {
                // Compensating rollback: the graph edge is the only durable
                // side effect this protocol owns.
                if let Err(rollback_err) = self.db.unlink_user(default_user_id) {
                    log::error!(
                        "[Link] Rollback of attempt {} failed to clear edge for user {}: {}",
                        attempt_id,
                        default_user_id,
                        rollback_err
                    );
                }
                if let Err(complete_err) = self
                    .db
                    .complete_link_attempt(attempt_id, Some(&err.to_string()))
                {
                    log::error!(
                        "[Link] Failed to record failed attempt {}: {}",
                        attempt_id,
                        complete_err
                    );
                }
                log::warn!("[Link] Attempt {} failed: {}", attempt_id, err);
                Err(err)
            }
        }
    }

    async fn run_link(
        &self,
        attempt_id: i64,
        default_user_id: i64,
        aggregate_user_id: i64,
        link_token: Option<&str>,
    ) -> Result<LinkOutcome, LinkError> {
        if let Some(token) = link_token {
            self.db.add_link_attempt_to_link_token(token, attempt_id)?;
        }

        // Classify before touching the edge: an aggregate with no channels
        // yet makes this a first-time link, anything else is a merge.
        let existing = self
            .db
            .get_connected_chat_user_ids(&[aggregate_user_id])?
            .into_iter()
            .next()
            .map(|c| c.connected_ids)
            .unwrap_or_default();
        let first_link = existing.len() <= 1;

        let channel_count = existing.iter().filter(|id| **id != aggregate_user_id).count();
        if channel_count + 1 > self.max_linked_channels {
            return Err(LinkError::PolicyViolation(format!(
                "linking would exceed the maximum of {} connected channels",
                self.max_linked_channels
            )));
        }

        self.db.link_user(default_user_id, aggregate_user_id)?;

        // Ownership relinks happen on both paths.
        self.experience
            .invalidate_snapshots(&[default_user_id, aggregate_user_id])
            .await
            .map_err(LinkError::Downstream)?;
        self.experience
            .relink_chat_experience(default_user_id, aggregate_user_id)
            .await
            .map_err(LinkError::Downstream)?;
        self.donations
            .relink_donation(default_user_id, aggregate_user_id)
            .await
            .map_err(LinkError::Downstream)?;
        self.ranks
            .relink_admin_users(default_user_id, aggregate_user_id)
            .await
            .map_err(LinkError::Downstream)?;

        if first_link {
            // No conflict is possible: move ranks wholesale.
            self.ranks
                .transfer_ranks(default_user_id, aggregate_user_id, "channel was linked", false)
                .await
                .map_err(LinkError::Downstream)?;
            return Ok(LinkOutcome {
                kind: LinkOutcomeKind::FirstLink,
                warnings: Vec::new(),
                reconciliation_failures: Vec::new(),
            });
        }

        // Merge path: diff ranks across the now-complete connected set.
        let connected = self
            .db
            .get_connected_chat_user_ids(&[default_user_id])?
            .into_iter()
            .next()
            .map(|c| c.connected_ids)
            .unwrap_or_default();
        let merge = self
            .ranks
            .merge_ranks(aggregate_user_id, &connected, "channels were linked")
            .await
            .map_err(LinkError::Downstream)?;

        self.donations
            .re_evaluate_donation_ranks(aggregate_user_id, "channels were linked")
            .await
            .map_err(LinkError::Downstream)?;

        // Peer-punishment history changed, so historical multipliers must be
        // replayed. The experience ledger owns the replay.
        self.experience
            .recalculate_chat_experience(aggregate_user_id)
            .await
            .map_err(LinkError::Downstream)?;

        let connected_users = self.db.connected_default_users(aggregate_user_id)?;
        let reconciliation_failures = self
            .reconciler
            .reconcile_all(&merge.individual_results, &connected_users)
            .await;

        Ok(LinkOutcome {
            kind: LinkOutcomeKind::Merge,
            warnings: merge.warnings,
            reconciliation_failures,
        })
    }

    /// Split a default user back out of its aggregate identity.
    ///
    /// The edge removal is the durable commit point; there is no automatic
    /// re-link on partial failure after it.
    pub async fn unlink_user(
        &self,
        default_user_id: i64,
        options: UnlinkOptions,
    ) -> Result<UnlinkOutcome, LinkError> {
        let attempt_id = self
            .db
            .start_unlink_attempt(default_user_id)?
            .ok_or(LinkError::AttemptInProgress { default_user_id })?;
        log::info!(
            "[Link] Attempt {} admitted: unlinking user {}",
            attempt_id,
            default_user_id
        );

        // Primary-channel guard, before any mutation.
        if let Err(err) = self.guard_primary_channel(default_user_id).await {
            if let Err(complete_err) = self
                .db
                .complete_link_attempt(attempt_id, Some(&err.to_string()))
            {
                log::error!(
                    "[Link] Failed to record failed attempt {}: {}",
                    attempt_id,
                    complete_err
                );
            }
            log::warn!("[Link] Attempt {} refused: {}", attempt_id, err);
            return Err(err);
        }

        match self.run_unlink(default_user_id, options).await {
            Ok(outcome) => {
                self.db.complete_link_attempt(attempt_id, None)?;
                log::info!("[Link] Attempt {} succeeded", attempt_id);
                Ok(outcome)
            }
            Err(err) => {
                if let Err(complete_err) = self
                    .db
                    .complete_link_attempt(attempt_id, Some(&err.to_string()))
                {
                    log::error!(
                        "[Link] Failed to record failed attempt {}: {}",
                        attempt_id,
                        complete_err
                    );
                }
                log::warn!("[Link] Attempt {} failed: {}", attempt_id, err);
                Err(err)
            }
        }
    }

    fn guard_unlinked(&self, default_user_id: i64) -> Result<(), LinkError> {
        let user = self.db.get_default_user(default_user_id)?.ok_or_else(|| {
            LinkError::PolicyViolation(format!("user {} does not exist", default_user_id))
        })?;
        if let Some(current) = user.aggregate_user_id {
            return Err(LinkError::PolicyViolation(format!(
                "user {} is already linked to aggregate identity {}",
                default_user_id, current
            )));
        }
        Ok(())
    }

    async fn guard_primary_channel(&self, default_user_id: i64) -> Result<(), LinkError> {
        let streamer = self
            .streamers
            .streamer_for_chat_user(default_user_id)
            .await
            .map_err(LinkError::Downstream)?;
        if let Some(streamer) = streamer {
            if streamer.is_primary_channel(default_user_id) {
                return Err(LinkError::PolicyViolation(
                    "cannot unlink an active primary channel".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn run_unlink(
        &self,
        default_user_id: i64,
        options: UnlinkOptions,
    ) -> Result<UnlinkOutcome, LinkError> {
        let previous_aggregate_user_id = self
            .db
            .unlink_user(default_user_id)?
            .ok_or_else(|| {
                LinkError::PolicyViolation(format!(
                    "user {} is not linked to an aggregate identity",
                    default_user_id
                ))
            })?;

        // Does the aggregate identity survive with other members?
        let still_connected = self
            .db
            .get_connected_chat_user_ids(&[previous_aggregate_user_id])?
            .into_iter()
            .next()
            .map(|c| c.connected_ids.len() > 1)
            .unwrap_or(false);

        if options.relink_chat_experience {
            self.experience
                .invalidate_snapshots(&[default_user_id, previous_aggregate_user_id])
                .await
                .map_err(LinkError::Downstream)?;
            self.experience
                .undo_chat_experience_relink(default_user_id)
                .await
                .map_err(LinkError::Downstream)?;
        }

        if options.relink_donations {
            self.donations
                .undo_donation_relink(default_user_id)
                .await
                .map_err(LinkError::Downstream)?;
        }

        if options.transfer_ranks {
            self.ranks
                .transfer_ranks(
                    previous_aggregate_user_id,
                    default_user_id,
                    "channel was unlinked",
                    still_connected,
                )
                .await
                .map_err(LinkError::Downstream)?;
        }

        Ok(UnlinkOutcome {
            previous_aggregate_user_id,
            still_connected,
        })
    }
}
