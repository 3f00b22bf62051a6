//! Streamer directory collaborator, used by the unlink primary-channel guard.

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::Database;
use crate::models::Streamer;

/// Resolves the streamer (if any) behind a chat identity.
#[async_trait]
pub trait StreamerDirectory: Send + Sync {
    /// The streamer owning the registered account a default user is linked
    /// into, or `None` when the user is unlinked or the account has no
    /// streamer.
    async fn streamer_for_chat_user(&self, default_user_id: i64) -> Result<Option<Streamer>, String>;
}

/// SQLite-backed streamer directory.
pub struct DbStreamerDirectory {
    db: Arc<Database>,
}

impl DbStreamerDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StreamerDirectory for DbStreamerDirectory {
    async fn streamer_for_chat_user(&self, default_user_id: i64) -> Result<Option<Streamer>, String> {
        let user = self
            .db
            .get_default_user(default_user_id)
            .map_err(|e| format!("Failed to load default user: {}", e))?;
        let Some(aggregate_user_id) = user.and_then(|u| u.aggregate_user_id) else {
            return Ok(None);
        };
        self.db
            .get_streamer_for_aggregate(aggregate_user_id)
            .map_err(|e| format!("Failed to load streamer: {}", e))
    }
}
