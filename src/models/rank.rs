use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of ranks a chat user can hold on a streamer's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankKind {
    Mod,
    Ban,
    Timeout,
    Donator,
    Supporter,
    Member,
}

impl RankKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankKind::Mod => "mod",
            RankKind::Ban => "ban",
            RankKind::Timeout => "timeout",
            RankKind::Donator => "donator",
            RankKind::Supporter => "supporter",
            RankKind::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mod" => Some(RankKind::Mod),
            "ban" => Some(RankKind::Ban),
            "timeout" => Some(RankKind::Timeout),
            "donator" => Some(RankKind::Donator),
            "supporter" => Some(RankKind::Supporter),
            "member" => Some(RankKind::Member),
            _ => None,
        }
    }

    /// Ranks that are mirrored onto the external chat platforms.
    pub fn is_externally_enforced(&self) -> bool {
        matches!(self, RankKind::Mod | RankKind::Ban | RankKind::Timeout)
    }
}

impl std::fmt::Display for RankKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One rank held by one chat user, scoped to a streamer.
/// `streamer_id == None` means a global rank (never reconciled externally).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRank {
    pub id: i64,
    pub chat_user_id: i64,
    pub streamer_id: Option<i64>,
    pub kind: RankKind,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub assigned_by_user_id: Option<i64>,
    pub revoked_by_user_id: Option<i64>,
    pub message: Option<String>,
}

impl UserRank {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none()
            && self.expiration_time.map(|exp| exp > now).unwrap_or(true)
    }
}

/// One entry of a per-streamer rank diff: which rank, which underlying rank
/// row, and when it expires (if ever).
#[derive(Debug, Clone, Serialize)]
pub struct RankEntry {
    pub kind: RankKind,
    pub rank_id: i64,
    pub expiration_time: Option<DateTime<Utc>>,
}

impl RankEntry {
    /// Remaining lifetime in whole seconds, clamped at zero. `None` for
    /// ranks without an expiration.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        self.expiration_time
            .map(|exp| (exp - now).num_seconds().max(0) as u64)
    }
}

/// Per-streamer diff describing what changed when connected identities were
/// combined. Produced by the rank ledger, consumed opaquely by the
/// orchestrator and the external reconciler.
#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub streamer_id: i64,
    /// Ranks newly consolidated onto the aggregate identity.
    pub additions: Vec<RankEntry>,
    /// Ranks removed outright. Empty for enforcement ranks, which a merge
    /// never weakens.
    pub removals: Vec<RankEntry>,
    /// Ranks whose expiration was pushed out by the merge.
    pub extensions: Vec<RankEntry>,
    /// Ranks that lost a collision and were revoked in favor of a survivor.
    pub old_ranks: Vec<RankEntry>,
    /// Ranks carried over untouched.
    pub unchanged: Vec<RankEntry>,
}

impl MergeResult {
    pub fn empty(streamer_id: i64) -> Self {
        Self {
            streamer_id,
            additions: Vec::new(),
            removals: Vec::new(),
            extensions: Vec::new(),
            old_ranks: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

/// Outcome of a rank merge across a connected set.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub warnings: Vec<String>,
    pub individual_results: Vec<MergeResult>,
}
