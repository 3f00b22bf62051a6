use std::env;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Maximum number of channels one aggregate identity may hold.
    pub max_linked_channels: usize,
    pub youtube_moderation_url: String,
    pub twitch_moderation_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT must be a valid number"),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "./.db/chatlink.db".to_string()),
            max_linked_channels: env::var("MAX_LINKED_CHANNELS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .expect("MAX_LINKED_CHANNELS must be a valid number"),
            youtube_moderation_url: env::var("YOUTUBE_MODERATION_URL")
                .unwrap_or_else(|_| "http://localhost:9081".to_string()),
            twitch_moderation_url: env::var("TWITCH_MODERATION_URL")
                .unwrap_or_else(|_| "http://localhost:9082".to_string()),
        }
    }
}
