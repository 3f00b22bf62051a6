//! SQLite database behind an r2d2 connection pool.
//!
//! Schema is created on startup. The partial unique index on `link_attempts`
//! is the admission-control gate for the link/unlink protocols: at most one
//! `running` attempt can exist per default user, enforced by the database so
//! the guarantee holds across processes.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Result as SqliteResult;

pub type DbConn = r2d2::PooledConnection<SqliteConnectionManager>;

pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (or create) the database at the given path and run schema setup.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create database directory: {}", e))?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| format!("Failed to create connection pool: {}", e))?;

        let db = Self { pool };
        db.init_schema()
            .map_err(|e| format!("Failed to initialize schema: {}", e))?;
        Ok(db)
    }

    /// Get a pooled connection. Panics only if the pool itself is broken.
    pub fn conn(&self) -> DbConn {
        self.pool
            .get()
            .expect("Failed to get database connection from pool")
    }

    fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            -- Shared id space for default and aggregate users, so ledgers
            -- and ranks can be keyed by a single chat user id.
            CREATE TABLE IF NOT EXISTS chat_users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS default_users (
                id INTEGER PRIMARY KEY REFERENCES chat_users(id),
                platform TEXT NOT NULL,
                external_id TEXT NOT NULL,
                display_name TEXT,
                aggregate_user_id INTEGER,
                linked_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(platform, external_id)
            );

            CREATE TABLE IF NOT EXISTS aggregate_users (
                id INTEGER PRIMARY KEY REFERENCES chat_users(id),
                registered_username TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS link_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                default_user_id INTEGER NOT NULL,
                aggregate_user_id INTEGER,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                error_message TEXT,
                link_token TEXT
            );

            -- Admission control: one running attempt per default user.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_link_attempts_one_running
                ON link_attempts(default_user_id) WHERE status = 'running';

            CREATE TABLE IF NOT EXISTS link_tokens (
                token TEXT PRIMARY KEY,
                aggregate_user_id INTEGER NOT NULL,
                platform TEXT NOT NULL,
                target_external_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                consumed_by_attempt_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS streamers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                aggregate_user_id INTEGER NOT NULL UNIQUE,
                name TEXT NOT NULL,
                youtube_primary_channel_id INTEGER,
                twitch_primary_channel_id INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_experience (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_user_id INTEGER NOT NULL,
                original_user_id INTEGER,
                delta INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_experience_user
                ON chat_experience(chat_user_id);

            CREATE TABLE IF NOT EXISTS experience_snapshots (
                chat_user_id INTEGER PRIMARY KEY,
                total INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS donations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_user_id INTEGER NOT NULL,
                original_user_id INTEGER,
                amount_cents INTEGER NOT NULL,
                currency TEXT NOT NULL,
                message TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_donations_user
                ON donations(chat_user_id);

            CREATE TABLE IF NOT EXISTS user_ranks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_user_id INTEGER NOT NULL,
                streamer_id INTEGER,
                kind TEXT NOT NULL,
                issued_at TEXT NOT NULL,
                expiration_time TEXT,
                revoked_at TEXT,
                assigned_by_user_id INTEGER,
                revoked_by_user_id INTEGER,
                message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_user_ranks_user
                ON user_ranks(chat_user_id);
            ",
        )
    }
}
