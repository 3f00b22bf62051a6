//! Link attempt and link token operations.
//!
//! Attempt creation doubles as admission control: the partial unique index on
//! `link_attempts(default_user_id) WHERE status = 'running'` rejects a second
//! concurrent attempt at the database level, so exclusivity holds across
//! processes without any in-memory lock.

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use super::super::Database;
use super::users::parse_rfc3339;
use crate::models::{
    LinkAttempt, LinkAttemptKind, LinkAttemptStatus, LinkHistoryEntry, LinkHistoryStatus,
    LinkToken,
};

impl Database {
    /// Admit a link attempt. Returns `Ok(None)` when another attempt is
    /// already running for this default user.
    pub fn start_link_attempt(
        &self,
        default_user_id: i64,
        aggregate_user_id: i64,
    ) -> SqliteResult<Option<i64>> {
        self.insert_attempt(default_user_id, Some(aggregate_user_id), LinkAttemptKind::Link)
    }

    /// Admit an unlink attempt, under the same exclusivity contract.
    pub fn start_unlink_attempt(&self, default_user_id: i64) -> SqliteResult<Option<i64>> {
        self.insert_attempt(default_user_id, None, LinkAttemptKind::Unlink)
    }

    fn insert_attempt(
        &self,
        default_user_id: i64,
        aggregate_user_id: Option<i64>,
        kind: LinkAttemptKind,
    ) -> SqliteResult<Option<i64>> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let inserted = conn.execute(
            "INSERT INTO link_attempts (default_user_id, aggregate_user_id, kind, status, started_at)
             VALUES (?1, ?2, ?3, 'running', ?4)",
            rusqlite::params![default_user_id, aggregate_user_id, kind.as_str(), &now],
        );
        match inserted {
            Ok(_) => Ok(Some(conn.last_insert_rowid())),
            // The partial unique index fired: an attempt is already running.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Transition an attempt to its terminal status. A null error message
    /// means success. Only a `running` attempt can transition, so repeated
    /// calls are no-ops.
    pub fn complete_link_attempt(
        &self,
        attempt_id: i64,
        error_message: Option<&str>,
    ) -> SqliteResult<()> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let status = if error_message.is_none() {
            LinkAttemptStatus::Succeeded
        } else {
            LinkAttemptStatus::Failed
        };
        conn.execute(
            "UPDATE link_attempts SET status = ?1, completed_at = ?2, error_message = ?3
             WHERE id = ?4 AND status = 'running'",
            rusqlite::params![status.as_str(), &now, error_message, attempt_id],
        )?;
        Ok(())
    }

    pub fn get_link_attempt(&self, attempt_id: i64) -> SqliteResult<Option<LinkAttempt>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, default_user_id, aggregate_user_id, kind, status, started_at, completed_at, error_message, link_token
             FROM link_attempts WHERE id = ?1",
            [attempt_id],
            Self::row_to_attempt,
        )
        .optional()
    }

    /// Issue a link token authorizing an external-facing link flow for a
    /// specific target channel.
    pub fn create_link_token(
        &self,
        aggregate_user_id: i64,
        platform: &str,
        target_external_id: &str,
    ) -> SqliteResult<LinkToken> {
        let conn = self.conn();
        let token = Uuid::new_v4().simple().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO link_tokens (token, aggregate_user_id, platform, target_external_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![&token, aggregate_user_id, platform, target_external_id, &now],
        )?;
        Ok(LinkToken {
            token,
            aggregate_user_id,
            platform: platform.to_string(),
            target_external_id: target_external_id.to_string(),
            created_at: Utc::now(),
            consumed_by_attempt_id: None,
        })
    }

    pub fn get_link_token(&self, token: &str) -> SqliteResult<Option<LinkToken>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT token, aggregate_user_id, platform, target_external_id, created_at, consumed_by_attempt_id
             FROM link_tokens WHERE token = ?1",
            [token],
            |row| {
                let created_at: String = row.get(4)?;
                Ok(LinkToken {
                    token: row.get(0)?,
                    aggregate_user_id: row.get(1)?,
                    platform: row.get(2)?,
                    target_external_id: row.get(3)?,
                    created_at: parse_rfc3339(&created_at),
                    consumed_by_attempt_id: row.get(5)?,
                })
            },
        )
        .optional()
    }

    /// Associate a token with the attempt that is consuming it.
    pub fn add_link_attempt_to_link_token(&self, token: &str, attempt_id: i64) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE link_tokens SET consumed_by_attempt_id = ?1 WHERE token = ?2",
            rusqlite::params![attempt_id, token],
        )?;
        conn.execute(
            "UPDATE link_attempts SET link_token = ?1 WHERE id = ?2",
            rusqlite::params![token, attempt_id],
        )?;
        Ok(())
    }

    pub fn delete_link_token(&self, token: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM link_tokens WHERE token = ?1", [token])?;
        Ok(rows > 0)
    }

    /// Link/unlink history for a registered account: one row per token or
    /// token-less attempt, newest first.
    pub fn get_link_history(&self, aggregate_user_id: i64) -> SqliteResult<Vec<LinkHistoryEntry>> {
        let conn = self.conn();
        let mut entries = Vec::new();

        // Tokens, joined to the attempt that consumed them (if any).
        let mut stmt = conn.prepare(
            "SELECT t.token, t.platform, t.target_external_id,
                    a.id, a.status, a.kind, a.completed_at, a.error_message,
                    u.id, u.display_name
             FROM link_tokens t
             LEFT JOIN link_attempts a ON a.id = t.consumed_by_attempt_id
             LEFT JOIN default_users u
                    ON u.platform = t.platform AND u.external_id = t.target_external_id
             WHERE t.aggregate_user_id = ?1
             ORDER BY t.created_at DESC",
        )?;
        let token_rows = stmt.query_map([aggregate_user_id], |row| {
            let token: String = row.get(0)?;
            let platform: String = row.get(1)?;
            let external_id: String = row.get(2)?;
            let attempt_status: Option<String> = row.get(4)?;
            let attempt_kind: Option<String> = row.get(5)?;
            let completed_at: Option<String> = row.get(6)?;
            let error_message: Option<String> = row.get(7)?;
            let known_user: Option<i64> = row.get(8)?;
            let display_name: Option<String> = row.get(9)?;

            let status = match attempt_status.as_deref() {
                Some("running") => LinkHistoryStatus::Processing,
                Some("succeeded") => LinkHistoryStatus::Succeeded,
                Some("failed") => LinkHistoryStatus::Failed,
                // No attempt yet: waiting until the channel shows up in chat.
                _ if known_user.is_none() => LinkHistoryStatus::Waiting,
                _ => LinkHistoryStatus::Pending,
            };

            Ok(LinkHistoryEntry {
                status,
                token: Some(token),
                external_id_or_user_name: external_id,
                display_name,
                platform,
                message: error_message,
                date_completed: completed_at.as_deref().map(parse_rfc3339),
                kind: attempt_kind
                    .as_deref()
                    .and_then(crate::models::LinkAttemptKind::from_str)
                    .unwrap_or(crate::models::LinkAttemptKind::Link),
            })
        })?;
        entries.extend(token_rows.filter_map(|r| r.ok()));

        // Token-less attempts (admin links, unlinks) against this aggregate
        // or any of its current members.
        let mut stmt = conn.prepare(
            "SELECT a.status, a.kind, a.completed_at, a.error_message,
                    u.platform, u.external_id, u.display_name
             FROM link_attempts a
             JOIN default_users u ON u.id = a.default_user_id
             WHERE a.link_token IS NULL
               AND (a.aggregate_user_id = ?1 OR u.aggregate_user_id = ?1)
             ORDER BY a.started_at DESC",
        )?;
        let attempt_rows = stmt.query_map([aggregate_user_id], |row| {
            let status: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let completed_at: Option<String> = row.get(2)?;
            let error_message: Option<String> = row.get(3)?;
            let platform: String = row.get(4)?;
            let external_id: String = row.get(5)?;
            let display_name: Option<String> = row.get(6)?;

            Ok(LinkHistoryEntry {
                status: match status.as_str() {
                    "running" => LinkHistoryStatus::Processing,
                    "failed" => LinkHistoryStatus::Failed,
                    _ => LinkHistoryStatus::Succeeded,
                },
                token: None,
                external_id_or_user_name: external_id,
                display_name,
                platform,
                message: error_message,
                date_completed: completed_at.as_deref().map(parse_rfc3339),
                kind: crate::models::LinkAttemptKind::from_str(&kind)
                    .unwrap_or(crate::models::LinkAttemptKind::Link),
            })
        })?;
        entries.extend(attempt_rows.filter_map(|r| r.ok()));

        Ok(entries)
    }

    fn row_to_attempt(row: &rusqlite::Row) -> rusqlite::Result<LinkAttempt> {
        let kind: String = row.get(3)?;
        let status: String = row.get(4)?;
        let started_at: String = row.get(5)?;
        let completed_at: Option<String> = row.get(6)?;
        Ok(LinkAttempt {
            id: row.get(0)?,
            default_user_id: row.get(1)?,
            aggregate_user_id: row.get(2)?,
            kind: LinkAttemptKind::from_str(&kind).unwrap_or(LinkAttemptKind::Link),
            status: LinkAttemptStatus::from_str(&status).unwrap_or(LinkAttemptStatus::Failed),
            started_at: parse_rfc3339(&started_at),
            completed_at: completed_at.as_deref().map(parse_rfc3339),
            error_message: row.get(7)?,
            link_token: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::models::{LinkAttemptStatus, LinkHistoryStatus};

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_second_attempt_refused_while_running() {
        let (_dir, db) = test_db();
        let first = db.start_link_attempt(1, 2).unwrap();
        assert!(first.is_some());

        // Same default user: refused, regardless of attempt kind.
        assert!(db.start_link_attempt(1, 3).unwrap().is_none());
        assert!(db.start_unlink_attempt(1).unwrap().is_none());

        // A different default user is unaffected.
        assert!(db.start_link_attempt(7, 2).unwrap().is_some());
    }

    #[test]
    fn test_attempt_admitted_again_after_completion() {
        let (_dir, db) = test_db();
        let attempt = db.start_link_attempt(1, 2).unwrap().unwrap();
        db.complete_link_attempt(attempt, None).unwrap();

        let next = db.start_unlink_attempt(1).unwrap();
        assert!(next.is_some());
    }

    #[test]
    fn test_completion_is_terminal() {
        let (_dir, db) = test_db();
        let attempt = db.start_link_attempt(1, 2).unwrap().unwrap();
        db.complete_link_attempt(attempt, Some("boom")).unwrap();

        let stored = db.get_link_attempt(attempt).unwrap().unwrap();
        assert_eq!(stored.status, LinkAttemptStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        let completed_at = stored.completed_at;

        // A second completion must not overwrite the terminal state.
        db.complete_link_attempt(attempt, None).unwrap();
        let stored = db.get_link_attempt(attempt).unwrap().unwrap();
        assert_eq!(stored.status, LinkAttemptStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert_eq!(stored.completed_at, completed_at);
    }

    #[test]
    fn test_token_bookkeeping() {
        let (_dir, db) = test_db();
        let token = db.create_link_token(2, "youtube", "UC123").unwrap();
        let attempt = db.start_link_attempt(1, 2).unwrap().unwrap();
        db.add_link_attempt_to_link_token(&token.token, attempt).unwrap();

        let stored = db.get_link_token(&token.token).unwrap().unwrap();
        assert_eq!(stored.consumed_by_attempt_id, Some(attempt));
        let stored_attempt = db.get_link_attempt(attempt).unwrap().unwrap();
        assert_eq!(stored_attempt.link_token.as_deref(), Some(token.token.as_str()));

        assert!(db.delete_link_token(&token.token).unwrap());
        assert!(db.get_link_token(&token.token).unwrap().is_none());
    }

    #[test]
    fn test_history_statuses() {
        let (_dir, db) = test_db();
        let aggregate = db.create_aggregate_user("alice").unwrap();
        let known = db.get_or_create_default_user("youtube", "UC-known", Some("K")).unwrap();

        // Token for a channel never seen in chat: waiting.
        db.create_link_token(aggregate.id, "twitch", "ghost_channel").unwrap();
        // Token for a known channel, consumed by a failed attempt.
        let token = db.create_link_token(aggregate.id, "youtube", "UC-known").unwrap();
        let attempt = db.start_link_attempt(known.id, aggregate.id).unwrap().unwrap();
        db.add_link_attempt_to_link_token(&token.token, attempt).unwrap();
        db.complete_link_attempt(attempt, Some("merge rejected")).unwrap();

        let history = db.get_link_history(aggregate.id).unwrap();
        assert_eq!(history.len(), 2);
        let waiting = history.iter().find(|e| e.platform == "twitch").unwrap();
        assert_eq!(waiting.status, LinkHistoryStatus::Waiting);
        let failed = history.iter().find(|e| e.platform == "youtube").unwrap();
        assert_eq!(failed.status, LinkHistoryStatus::Failed);
        assert_eq!(failed.message.as_deref(), Some("merge rejected"));
    }
}
