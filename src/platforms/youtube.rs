//! YouTube moderation client.
//!
//! Talks to the internal YouTube proxy service, which holds the OAuth
//! credentials and maps streamer ids to live chats.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::ExternalModerationClient;
use crate::models::{DefaultUser, Platform};

/// HTTP request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct YoutubeModerationClient {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModRequest<'a> {
    external_channel_id: &'a str,
    streamer_id: i64,
    is_moderator: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PunishmentRequest<'a> {
    external_channel_id: &'a str,
    streamer_id: i64,
    rank_id: Option<i64>,
    reason: &'a str,
    duration_seconds: Option<u64>,
}

impl YoutubeModerationClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), String> {
        let resp = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("Failed to reach YouTube moderation service: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!(
                "YouTube moderation call {} failed with status: {}",
                path,
                resp.status()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalModerationClient for YoutubeModerationClient {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    async fn set_mod_rank(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        is_mod: bool,
    ) -> Result<(), String> {
        log::info!(
            "[YouTube] Setting moderator = {} for channel {} on streamer {}",
            is_mod,
            channel.external_id,
            streamer_id
        );
        self.post(
            "/moderation/mod",
            &ModRequest {
                external_channel_id: &channel.external_id,
                streamer_id,
                is_moderator: is_mod,
            },
        )
        .await
    }

    async fn ban_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        reason: &str,
    ) -> Result<(), String> {
        log::info!(
            "[YouTube] Banning channel {} on streamer {} ({})",
            channel.external_id,
            streamer_id,
            reason
        );
        self.post(
            "/moderation/ban",
            &PunishmentRequest {
                external_channel_id: &channel.external_id,
                streamer_id,
                rank_id: None,
                reason,
                duration_seconds: None,
            },
        )
        .await
    }

    async fn unban_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        reason: &str,
    ) -> Result<(), String> {
        self.post(
            "/moderation/unban",
            &PunishmentRequest {
                external_channel_id: &channel.external_id,
                streamer_id,
                rank_id: None,
                reason,
                duration_seconds: None,
            },
        )
        .await
    }

    async fn timeout_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        rank_id: i64,
        reason: &str,
        duration_seconds: u64,
    ) -> Result<(), String> {
        log::info!(
            "[YouTube] Timing out channel {} on streamer {} for {}s",
            channel.external_id,
            streamer_id,
            duration_seconds
        );
        self.post(
            "/moderation/timeout",
            &PunishmentRequest {
                external_channel_id: &channel.external_id,
                streamer_id,
                rank_id: Some(rank_id),
                reason,
                duration_seconds: Some(duration_seconds),
            },
        )
        .await
    }

    async fn untimeout_user(
        &self,
        channel: &DefaultUser,
        streamer_id: i64,
        rank_id: i64,
        reason: &str,
    ) -> Result<(), String> {
        self.post(
            "/moderation/untimeout",
            &PunishmentRequest {
                external_channel_id: &channel.external_id,
                streamer_id,
                rank_id: Some(rank_id),
                reason,
                duration_seconds: None,
            },
        )
        .await
    }
}
