//! External reconciliation: after a merge, push mod/ban/timeout state out to
//! the real chat platforms so enforcement is never weaker than before.
//!
//! The policy is monotonic. A merge never un-mods a user that was mod on
//! either side, never unbans a user that was banned on either side, and the
//! strictest timeout wins everywhere. The only retraction ever issued is an
//! untimeout for a stale rank id that lost a collision to a different
//! surviving rank.
//!
//! Every call is issued independently per (default user, streamer). Failures
//! are collected and reported, never retried inline, and never abort the
//! remaining pairs: the internal merge is authoritative and external state
//! converges best-effort.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::models::rank::RankEntry;
use crate::models::{DefaultUser, MergeResult, RankKind};
use crate::platforms::ModerationClients;

const RECONCILE_REASON: &str = "channels were linked";

/// Applied when a timeout rank has no expiration; platforms reject unbounded
/// timeout durations.
const MAX_TIMEOUT_SECONDS: u64 = 14 * 24 * 60 * 60;

/// One failed external call, reported alongside an otherwise successful
/// merge.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationFailure {
    pub default_user_id: i64,
    pub streamer_id: i64,
    pub platform: String,
    pub action: String,
    pub error: String,
}

pub struct Reconciler {
    clients: Arc<ModerationClients>,
}

impl Reconciler {
    pub fn new(clients: Arc<ModerationClients>) -> Self {
        Self { clients }
    }

    /// Apply every per-streamer merge result to every connected default
    /// user. Returns all collected failures.
    pub async fn reconcile_all(
        &self,
        results: &[MergeResult],
        connected_users: &[DefaultUser],
    ) -> Vec<ReconciliationFailure> {
        let mut failures = Vec::new();
        for result in results {
            self.reconcile_streamer(result, connected_users, &mut failures)
                .await;
        }
        if !failures.is_empty() {
            log::warn!(
                "[Reconcile] {} external call(s) failed; internal merge state is authoritative",
                failures.len()
            );
        }
        failures
    }

    async fn reconcile_streamer(
        &self,
        merge: &MergeResult,
        users: &[DefaultUser],
        failures: &mut Vec<ReconciliationFailure>,
    ) {
        let streamer_id = merge.streamer_id;

        // Mod: present in additions or unchanged means the merged identity
        // is a moderator, so every connected channel becomes one.
        let is_mod = has_kind(&merge.additions, RankKind::Mod)
            || has_kind(&merge.unchanged, RankKind::Mod);

        // Ban: additions or old_ranks. A revoked (collided) ban still means
        // the user was banned on one side, and a merge never unbans.
        let is_banned = has_kind(&merge.additions, RankKind::Ban)
            || has_kind(&merge.old_ranks, RankKind::Ban);

        // Timeout: longest remaining expiration among the survivors wins;
        // stale colliding ids get an explicit untimeout.
        let surviving_timeout = longest_timeout(
            merge
                .additions
                .iter()
                .chain(merge.unchanged.iter())
                .filter(|e| e.kind == RankKind::Timeout),
        );
        let stale_timeouts: Vec<&RankEntry> = match surviving_timeout {
            Some(survivor) => merge
                .old_ranks
                .iter()
                .filter(|e| e.kind == RankKind::Timeout && e.rank_id != survivor.rank_id)
                .collect(),
            None => Vec::new(),
        };

        for user in users {
            let Some(platform) = user.platform_enum() else {
                failures.push(ReconciliationFailure {
                    default_user_id: user.id,
                    streamer_id,
                    platform: user.platform.clone(),
                    action: "resolve".to_string(),
                    error: format!("unknown platform '{}'", user.platform),
                });
                continue;
            };
            let Some(client) = self.clients.get(platform) else {
                failures.push(ReconciliationFailure {
                    default_user_id: user.id,
                    streamer_id,
                    platform: platform.to_string(),
                    action: "resolve".to_string(),
                    error: format!("no moderation client registered for {}", platform),
                });
                continue;
            };

            if is_mod {
                if let Err(e) = client.set_mod_rank(user, streamer_id, true).await {
                    failures.push(failure(user, streamer_id, "mod", e));
                }
            }

            if is_banned {
                if let Err(e) = client.ban_user(user, streamer_id, RECONCILE_REASON).await {
                    failures.push(failure(user, streamer_id, "ban", e));
                }
            }

            if let Some(survivor) = surviving_timeout {
                match survivor.remaining_seconds(Utc::now()) {
                    // Expired while merging; nothing to apply.
                    Some(0) => {}
                    remaining => {
                        let duration = remaining.unwrap_or(MAX_TIMEOUT_SECONDS);
                        if let Err(e) = client
                            .timeout_user(
                                user,
                                streamer_id,
                                survivor.rank_id,
                                RECONCILE_REASON,
                                duration,
                            )
                            .await
                        {
                            failures.push(failure(user, streamer_id, "timeout", e));
                        }
                    }
                }
                for stale in &stale_timeouts {
                    if let Err(e) = client
                        .untimeout_user(user, streamer_id, stale.rank_id, RECONCILE_REASON)
                        .await
                    {
                        failures.push(failure(user, streamer_id, "untimeout", e));
                    }
                }
            }
        }
    }
}

fn has_kind(entries: &[RankEntry], kind: RankKind) -> bool {
    entries.iter().any(|e| e.kind == kind)
}

/// The timeout entry with the longest remaining expiration; no expiration
/// counts as unbounded and always wins.
fn longest_timeout<'a>(entries: impl Iterator<Item = &'a RankEntry>) -> Option<&'a RankEntry> {
    entries.max_by(|a, b| match (a.expiration_time, b.expiration_time) {
        (None, None) => b.rank_id.cmp(&a.rank_id),
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (Some(_), None) => std::cmp::Ordering::Less,
        (Some(ea), Some(eb)) => ea.cmp(&eb),
    })
}

fn failure(
    user: &DefaultUser,
    streamer_id: i64,
    action: &str,
    error: String,
) -> ReconciliationFailure {
    ReconciliationFailure {
        default_user_id: user.id,
        streamer_id,
        platform: user.platform.clone(),
        action: action.to_string(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{DefaultUser, Platform};
    use crate::platforms::ExternalModerationClient;

    struct RecordingClient {
        platform: Platform,
        calls: Arc<Mutex<Vec<String>>>,
        fail_actions: Vec<&'static str>,
    }

    impl RecordingClient {
        fn new(platform: Platform) -> (Self, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    platform,
                    calls: calls.clone(),
                    fail_actions: Vec::new(),
                },
                calls,
            )
        }

        fn record(&self, action: &str, detail: String) -> Result<(), String> {
            self.calls.lock().unwrap().push(detail);
            if self.fail_actions.contains(&action) {
                Err(format!("{} rejected", action))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ExternalModerationClient for RecordingClient {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn set_mod_rank(
            &self,
            channel: &DefaultUser,
            streamer_id: i64,
            is_mod: bool,
        ) -> Result<(), String> {
            self.record("mod", format!("mod:{}:{}:{}", channel.id, streamer_id, is_mod))
        }

        async fn ban_user(
            &self,
            channel: &DefaultUser,
            streamer_id: i64,
            _reason: &str,
        ) -> Result<(), String> {
            self.record("ban", format!("ban:{}:{}", channel.id, streamer_id))
        }

        async fn unban_user(
            &self,
            channel: &DefaultUser,
            streamer_id: i64,
            _reason: &str,
        ) -> Result<(), String> {
            self.record("unban", format!("unban:{}:{}", channel.id, streamer_id))
        }

        async fn timeout_user(
            &self,
            channel: &DefaultUser,
            streamer_id: i64,
            rank_id: i64,
            _reason: &str,
            _duration_seconds: u64,
        ) -> Result<(), String> {
            self.record(
                "timeout",
                format!("timeout:{}:{}:{}", channel.id, streamer_id, rank_id),
            )
        }

        async fn untimeout_user(
            &self,
            channel: &DefaultUser,
            streamer_id: i64,
            rank_id: i64,
            _reason: &str,
        ) -> Result<(), String> {
            self.record(
                "untimeout",
                format!("untimeout:{}:{}:{}", channel.id, streamer_id, rank_id),
            )
        }
    }

    fn user(id: i64, platform: &str) -> DefaultUser {
        DefaultUser {
            id,
            platform: platform.to_string(),
            external_id: format!("chan{}", id),
            display_name: None,
            aggregate_user_id: Some(100),
            linked_at: None,
            created_at: Utc::now(),
        }
    }

    fn entry(kind: RankKind, rank_id: i64, expires_in_secs: Option<i64>) -> RankEntry {
        RankEntry {
            kind,
            rank_id,
            expiration_time: expires_in_secs.map(|s| Utc::now() + Duration::seconds(s)),
        }
    }

    #[tokio::test]
    async fn test_mod_applied_to_every_connected_user() {
        let (client, calls) = RecordingClient::new(Platform::Youtube);
        let clients = Arc::new(ModerationClients::new().register(Arc::new(client)));
        let reconciler = Reconciler::new(clients);

        let mut merge = MergeResult::empty(7);
        merge.additions.push(entry(RankKind::Mod, 1, None));
        let users = vec![user(5, "youtube"), user(6, "youtube")];

        let failures = reconciler.reconcile_all(&[merge], &users).await;
        assert!(failures.is_empty());
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"mod:5:7:true".to_string()));
        assert!(calls.contains(&"mod:6:7:true".to_string()));
        // Never un-mod during reconciliation.
        assert!(!calls.iter().any(|c| c.ends_with(":false")));
    }

    #[tokio::test]
    async fn test_ban_applies_from_old_ranks_too() {
        let (client, calls) = RecordingClient::new(Platform::Twitch);
        let clients = Arc::new(ModerationClients::new().register(Arc::new(client)));
        let reconciler = Reconciler::new(clients);

        // The ban lost a collision internally, but externally it must still
        // be enforced everywhere.
        let mut merge = MergeResult::empty(7);
        merge.old_ranks.push(entry(RankKind::Ban, 3, None));
        let users = vec![user(5, "twitch")];

        reconciler.reconcile_all(&[merge], &users).await;
        assert!(calls.lock().unwrap().contains(&"ban:5:7".to_string()));
        assert!(!calls.lock().unwrap().iter().any(|c| c.starts_with("unban")));
    }

    #[tokio::test]
    async fn test_stale_timeout_gets_explicit_untimeout() {
        let (client, calls) = RecordingClient::new(Platform::Youtube);
        let clients = Arc::new(ModerationClients::new().register(Arc::new(client)));
        let reconciler = Reconciler::new(clients);

        let mut merge = MergeResult::empty(7);
        merge.additions.push(entry(RankKind::Timeout, 10, Some(600)));
        merge.old_ranks.push(entry(RankKind::Timeout, 11, Some(60)));
        let users = vec![user(5, "youtube")];

        reconciler.reconcile_all(&[merge], &users).await;
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"timeout:5:7:10".to_string()));
        assert!(calls.contains(&"untimeout:5:7:11".to_string()));
        // The surviving id is never untimed-out.
        assert!(!calls.contains(&"untimeout:5:7:10".to_string()));
    }

    #[tokio::test]
    async fn test_failures_collected_without_aborting_fanout() {
        let (mut client, calls) = RecordingClient::new(Platform::Youtube);
        client.fail_actions = vec!["mod"];
        let clients = Arc::new(ModerationClients::new().register(Arc::new(client)));
        let reconciler = Reconciler::new(clients);

        let mut merge = MergeResult::empty(7);
        merge.additions.push(entry(RankKind::Mod, 1, None));
        merge.additions.push(entry(RankKind::Ban, 2, None));
        let users = vec![user(5, "youtube"), user(6, "youtube")];

        let failures = reconciler.reconcile_all(&[merge], &users).await;
        // One mod failure per user, but the bans still went out.
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.action == "mod"));
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"ban:5:7".to_string()));
        assert!(calls.contains(&"ban:6:7".to_string()));
    }

    #[tokio::test]
    async fn test_unregistered_platform_reported_per_user() {
        let clients = Arc::new(ModerationClients::new());
        let reconciler = Reconciler::new(clients);

        let mut merge = MergeResult::empty(7);
        merge.additions.push(entry(RankKind::Mod, 1, None));
        let users = vec![user(5, "youtube")];

        let failures = reconciler.reconcile_all(&[merge], &users).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].action, "resolve");
    }
}
