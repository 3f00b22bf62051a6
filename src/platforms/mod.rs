//! External chat platform moderation actors.
//!
//! One client per platform, behind a shared trait. The reconciler issues
//! best-effort calls through these; timeouts and rate limits are each
//! client's own concern.

pub mod twitch;
pub mod youtube;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{DefaultUser, Platform};

/// Applies moderation state to a specific channel on one external platform.
#[async_trait]
pub trait ExternalModerationClient: Send + Sync {
    fn platform(&self) -> Platform;

    async fn set_mod_rank(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        is_mod: bool,
    ) -> Result<(), String>;

    async fn ban_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        reason: &str,
    ) -> Result<(), String>;

    async fn unban_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        reason: &str,
    ) -> Result<(), String>;

    async fn timeout_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        rank_id: i64,
        reason: &str,
        duration_seconds: u64,
    ) -> Result<(), String>;

    async fn untimeout_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        rank_id: i64,
        reason: &str,
    ) -> Result<(), String>;
}

/// Registry of moderation clients keyed by platform.
pub struct ModerationClients {
    clients: HashMap<Platform, Arc<dyn ExternalModerationClient>>,
}

impl ModerationClients {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    pub fn register(mut self, client: Arc<dyn ExternalModerationClient>) -> Self {
        self.clients.insert(client.platform(), client);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn ExternalModerationClient>> {
        self.clients.get(&platform)
    }
}

impl Default for ModerationClients {
    fn default() -> Self {
        Self::new()
    }
}
