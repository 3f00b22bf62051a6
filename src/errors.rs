//! Error taxonomy for the link/unlink protocols.
//!
//! Admission conflicts are transient and retryable; they never leave a failed
//! attempt behind because no attempt record was created. Policy violations
//! and downstream failures are persisted on the attempt and are not retried.

/// Error returned by the link orchestrator and the stores beneath it.
#[derive(Debug)]
pub enum LinkError {
    /// Another attempt is already running for this default user. Transient;
    /// the retry boundary may re-invoke the orchestrator.
    AttemptInProgress { default_user_id: i64 },
    /// The operation is not allowed (primary channel unlink, channel
    /// capacity exceeded, unlinked user). Never retried.
    PolicyViolation(String),
    /// The identity store itself failed.
    Store(rusqlite::Error),
    /// A ledger or merge collaborator failed mid-protocol. Triggers the
    /// compensating rollback on the link path.
    Downstream(String),
}

impl LinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::AttemptInProgress { .. })
    }
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::AttemptInProgress { default_user_id } => {
                write!(
                    f,
                    "a link attempt is already in progress for user {}",
                    default_user_id
                )
            }
            LinkError::PolicyViolation(msg) => write!(f, "{}", msg),
            LinkError::Store(e) => write!(f, "identity store error: {}", e),
            LinkError::Downstream(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<rusqlite::Error> for LinkError {
    fn from(e: rusqlite::Error) -> Self {
        LinkError::Store(e)
    }
}
