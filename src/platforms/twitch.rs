//! Twitch moderation client.
//!
//! Twitch has no persistent timeout-by-rank concept; the proxy service keys
//! timeouts by (channel, streamer) and a new timeout simply replaces the
//! previous one, so the rank id is carried for bookkeeping only.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::ExternalModerationClient;
use crate::models::{DefaultUser, Platform};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TwitchModerationClient {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModerationRequest<'a> {
    user_name: &'a str,
    streamer_id: i64,
    action: &'a str,
    reason: Option<&'a str>,
    duration_seconds: Option<u64>,
}

impl TwitchModerationClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn send(&self, body: &ModerationRequest<'_>) -> Result<(), String> {
        let resp = self
            .http_client
            .post(format!("{}/moderation", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("Failed to reach Twitch moderation service: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!(
                "Twitch moderation action '{}' failed with status: {}",
                body.action,
                resp.status()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalModerationClient for TwitchModerationClient {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    async fn set_mod_rank(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        is_mod: bool,
    ) -> Result<(), String> {
        log::info!(
            "[Twitch] Setting moderator = {} for {} on streamer {}",
            is_mod,
            channel.external_id,
            streamer_id
        );
        self.send(&ModerationRequest {
            user_name: &channel.external_id,
            streamer_id,
            action: if is_mod { "mod" } else { "unmod" },
            reason: None,
            duration_seconds: None,
        })
        .await
    }

    async fn ban_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        reason: &str,
    ) -> Result<(), String> {
        log::info!(
            "[Twitch] Banning {} on streamer {} ({})",
            channel.external_id,
            streamer_id,
            reason
        );
        self.send(&ModerationRequest {
            user_name: &channel.external_id,
            streamer_id,
            action: "ban",
            reason: Some(reason),
            duration_seconds: None,
        })
        .await
    }

    async fn unban_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        reason: &str,
    ) -> Result<(), String> {
        self.send(&ModerationRequest {
            user_name: &channel.external_id,
            streamer_id,
            action: "unban",
            reason: Some(reason),
            duration_seconds: None,
        })
        .await
    }

    async fn timeout_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        _rank_id: i64,
        reason: &str,
        duration_seconds: u64,
    ) -> Result<(), String> {
        log::info!(
            "[Twitch] Timing out {} on streamer {} for {}s",
            channel.external_id,
            streamer_id,
            duration_seconds
        );
        self.send(&ModerationRequest {
            user_name: &channel.external_id,
            streamer_id,
            action: "timeout",
            reason: Some(reason),
            duration_seconds: Some(duration_seconds),
        })
        .await
    }

    async fn untimeout_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        _rank_id: i64,
        reason: &str,
    ) -> Result<(), String> {
        self.send(&ModerationRequest {
            user_name: &channel.external_id,
            streamer_id,
            action: "untimeout",
            reason: Some(reason),
            duration_seconds: None,
        })
        .await
    }
}
