use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::reconciliation::ReconciliationFailure;

/// Whether an attempt merges a channel into an aggregate identity or splits
/// one back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkAttemptKind {
    Link,
    Unlink,
}

impl LinkAttemptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkAttemptKind::Link => "link",
            LinkAttemptKind::Unlink => "unlink",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "link" => Some(LinkAttemptKind::Link),
            "unlink" => Some(LinkAttemptKind::Unlink),
            _ => None,
        }
    }
}

/// Attempt lifecycle. An attempt is created `Running` and transitions exactly
/// once to `Succeeded` or `Failed`; it is never mutated afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkAttemptStatus {
    Running,
    Succeeded,
    Failed,
}

impl LinkAttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkAttemptStatus::Running => "running",
            LinkAttemptStatus::Succeeded => "succeeded",
            LinkAttemptStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(LinkAttemptStatus::Running),
            "succeeded" => Some(LinkAttemptStatus::Succeeded),
            "failed" => Some(LinkAttemptStatus::Failed),
            _ => None,
        }
    }
}

/// One in-flight or completed merge/split operation.
#[derive(Debug, Clone, Serialize)]
pub struct LinkAttempt {
    pub id: i64,
    pub default_user_id: i64,
    pub aggregate_user_id: Option<i64>,
    pub kind: LinkAttemptKind,
    pub status: LinkAttemptStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_token: Option<String>,
}

/// Authorization token for an external-facing link flow.
#[derive(Debug, Clone, Serialize)]
pub struct LinkToken {
    pub token: String,
    pub aggregate_user_id: i64,
    pub platform: String,
    pub target_external_id: String,
    pub created_at: DateTime<Utc>,
    pub consumed_by_attempt_id: Option<i64>,
}

/// Independent switches for the unlink protocol's optional ledger undo steps.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UnlinkOptions {
    #[serde(default = "default_true")]
    pub transfer_ranks: bool,
    #[serde(default = "default_true")]
    pub relink_chat_experience: bool,
    #[serde(default = "default_true")]
    pub relink_donations: bool,
}

fn default_true() -> bool {
    true
}

impl Default for UnlinkOptions {
    fn default() -> Self {
        Self {
            transfer_ranks: true,
            relink_chat_experience: true,
            relink_donations: true,
        }
    }
}

/// Which path a successful link took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcomeKind {
    /// The aggregate identity had no channels yet; ranks were transferred
    /// wholesale with no conflict possible.
    FirstLink,
    /// The aggregate identity already had channels; ranks were merged and
    /// external moderation state reconciled.
    Merge,
}

/// Result of a completed link, including per-channel reconciliation failures
/// (partial external failure does not fail the attempt).
#[derive(Debug, Clone, Serialize)]
pub struct LinkOutcome {
    pub kind: LinkOutcomeKind,
    pub warnings: Vec<String>,
    pub reconciliation_failures: Vec<ReconciliationFailure>,
}

/// Result of a completed unlink.
#[derive(Debug, Clone, Serialize)]
pub struct UnlinkOutcome {
    pub previous_aggregate_user_id: i64,
    /// Whether the aggregate identity still has other channels attached.
    pub still_connected: bool,
}

// Request/response types for the link controller

#[derive(Debug, Deserialize)]
pub struct LinkUserRequest {
    pub default_user_id: i64,
    pub aggregate_user_id: i64,
    #[serde(default)]
    pub link_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkTokenRequest {
    pub aggregate_user_id: i64,
    pub platform: String,
    pub external_id: String,
}

/// User-facing status of a row in the link history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkHistoryStatus {
    /// Token issued, target channel already known, no attempt yet.
    Pending,
    /// Token issued for a channel not yet observed in chat.
    Waiting,
    /// An attempt is currently running.
    Processing,
    Succeeded,
    Failed,
}

/// One row of the link/unlink history exposed to the registered account.
#[derive(Debug, Clone, Serialize)]
pub struct LinkHistoryEntry {
    pub status: LinkHistoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub external_id_or_user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_completed: Option<DateTime<Utc>>,
    pub kind: LinkAttemptKind,
}
