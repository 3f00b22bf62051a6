//! Storage for the experience, donation and rank ledgers.
//!
//! Relinking moves row ownership from a default user to an aggregate user
//! while recording the original owner in `original_user_id`, so an unlink can
//! restore exactly the ownership that existed at link time.

use chrono::{DateTime, Utc};
use rusqlite::Result as SqliteResult;

use super::super::Database;
use super::users::parse_rfc3339;
use crate::models::{RankKind, UserRank};

impl Database {
    // Chat experience

    pub fn add_chat_experience(&self, chat_user_id: i64, delta: i64) -> SqliteResult<i64> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chat_experience (chat_user_id, delta, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![chat_user_id, delta, &now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Move experience ownership from `old` to `new`, recording `old` as the
    /// original owner on every moved row.
    pub fn relink_chat_experience_rows(&self, old: i64, new: i64) -> SqliteResult<usize> {
        let conn = self.conn();
        conn.execute(
            "UPDATE chat_experience
             SET original_user_id = COALESCE(original_user_id, chat_user_id), chat_user_id = ?1
             WHERE chat_user_id = ?2",
            rusqlite::params![new, old],
        )
    }

    /// Restore the per-row ownership recorded when `old` was relinked.
    pub fn undo_chat_experience_relink_rows(&self, old: i64) -> SqliteResult<usize> {
        let conn = self.conn();
        conn.execute(
            "UPDATE chat_experience
             SET chat_user_id = original_user_id, original_user_id = NULL
             WHERE original_user_id = ?1",
            [old],
        )
    }

    pub fn delete_experience_snapshots(&self, ids: &[i64]) -> SqliteResult<usize> {
        let conn = self.conn();
        let mut deleted = 0;
        for id in ids {
            deleted += conn.execute(
                "DELETE FROM experience_snapshots WHERE chat_user_id = ?1",
                [id],
            )?;
        }
        Ok(deleted)
    }

    pub fn upsert_experience_snapshot(&self, chat_user_id: i64, total: i64) -> SqliteResult<()> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO experience_snapshots (chat_user_id, total, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_user_id) DO UPDATE SET total = ?2, updated_at = ?3",
            rusqlite::params![chat_user_id, total, &now],
        )?;
        Ok(())
    }

    pub fn total_chat_experience(&self, chat_user_id: i64) -> SqliteResult<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COALESCE(SUM(delta), 0) FROM chat_experience WHERE chat_user_id = ?1",
            [chat_user_id],
            |row| row.get(0),
        )
    }

    // Donations

    pub fn add_donation(
        &self,
        chat_user_id: i64,
        amount_cents: i64,
        currency: &str,
        message: Option<&str>,
    ) -> SqliteResult<i64> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO donations (chat_user_id, amount_cents, currency, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![chat_user_id, amount_cents, currency, message, &now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn relink_donation_rows(&self, old: i64, new: i64) -> SqliteResult<usize> {
        let conn = self.conn();
        conn.execute(
            "UPDATE donations
             SET original_user_id = COALESCE(original_user_id, chat_user_id), chat_user_id = ?1
             WHERE chat_user_id = ?2",
            rusqlite::params![new, old],
        )
    }

    pub fn undo_donation_relink_rows(&self, old: i64) -> SqliteResult<usize> {
        let conn = self.conn();
        conn.execute(
            "UPDATE donations
             SET chat_user_id = original_user_id, original_user_id = NULL
             WHERE original_user_id = ?1",
            [old],
        )
    }

    pub fn total_donation_cents(&self, ids: &[i64]) -> SqliteResult<i64> {
        let conn = self.conn();
        let mut total = 0i64;
        for id in ids {
            let sum: i64 = conn.query_row(
                "SELECT COALESCE(SUM(amount_cents), 0) FROM donations WHERE chat_user_id = ?1",
                [id],
                |row| row.get(0),
            )?;
            total += sum;
        }
        Ok(total)
    }

    // Ranks

    pub fn add_user_rank(
        &self,
        chat_user_id: i64,
        streamer_id: Option<i64>,
        kind: RankKind,
        expiration_time: Option<DateTime<Utc>>,
        assigned_by_user_id: Option<i64>,
    ) -> SqliteResult<i64> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO user_ranks (chat_user_id, streamer_id, kind, issued_at, expiration_time, assigned_by_user_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                chat_user_id,
                streamer_id,
                kind.as_str(),
                &now,
                expiration_time.map(|t| t.to_rfc3339()),
                assigned_by_user_id
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Active (unrevoked, unexpired) ranks held by any of the given users.
    pub fn active_ranks_for_users(&self, ids: &[i64]) -> SqliteResult<Vec<UserRank>> {
        let conn = self.conn();
        let now = Utc::now();
        let mut ranks = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT id, chat_user_id, streamer_id, kind, issued_at, expiration_time, revoked_at,
                    assigned_by_user_id, revoked_by_user_id, message
             FROM user_ranks
             WHERE chat_user_id = ?1 AND revoked_at IS NULL",
        )?;
        for id in ids {
            let rows = stmt
                .query_map([id], Self::row_to_user_rank)?
                .filter_map(|r| r.ok())
                .filter(|r: &UserRank| r.is_active(now));
            ranks.extend(rows);
        }
        Ok(ranks)
    }

    /// Reassign a single rank row to a new owner.
    pub fn reassign_rank_owner(&self, rank_id: i64, new_owner: i64) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE user_ranks SET chat_user_id = ?1 WHERE id = ?2",
            rusqlite::params![new_owner, rank_id],
        )?;
        Ok(())
    }

    pub fn revoke_rank(
        &self,
        rank_id: i64,
        revoked_by: Option<i64>,
        message: &str,
    ) -> SqliteResult<()> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE user_ranks SET revoked_at = ?1, revoked_by_user_id = ?2, message = ?3
             WHERE id = ?4 AND revoked_at IS NULL",
            rusqlite::params![&now, revoked_by, message, rank_id],
        )?;
        Ok(())
    }

    /// Move all active ranks from one owner to another.
    pub fn move_active_ranks(&self, from: i64, to: i64) -> SqliteResult<usize> {
        let conn = self.conn();
        conn.execute(
            "UPDATE user_ranks SET chat_user_id = ?1
             WHERE chat_user_id = ?2 AND revoked_at IS NULL",
            rusqlite::params![to, from],
        )
    }

    /// Copy all active ranks onto a second owner, leaving the source intact.
    pub fn copy_active_ranks(&self, from: i64, to: i64) -> SqliteResult<usize> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO user_ranks (chat_user_id, streamer_id, kind, issued_at, expiration_time, assigned_by_user_id, message)
             SELECT ?1, streamer_id, kind, issued_at, expiration_time, assigned_by_user_id, message
             FROM user_ranks WHERE chat_user_id = ?2 AND revoked_at IS NULL",
            rusqlite::params![to, from],
        )
    }

    /// Repoint assigned-by/revoked-by admin references after a relink.
    pub fn relink_admin_user_refs(&self, old: i64, new: i64) -> SqliteResult<usize> {
        let conn = self.conn();
        let assigned = conn.execute(
            "UPDATE user_ranks SET assigned_by_user_id = ?1 WHERE assigned_by_user_id = ?2",
            rusqlite::params![new, old],
        )?;
        let revoked = conn.execute(
            "UPDATE user_ranks SET revoked_by_user_id = ?1 WHERE revoked_by_user_id = ?2",
            rusqlite::params![new, old],
        )?;
        Ok(assigned + revoked)
    }

    fn row_to_user_rank(row: &rusqlite::Row) -> rusqlite::Result<UserRank> {
        let kind: String = row.get(3)?;
        let issued_at: String = row.get(4)?;
        let expiration_time: Option<String> = row.get(5)?;
        let revoked_at: Option<String> = row.get(6)?;
        Ok(UserRank {
            id: row.get(0)?,
            chat_user_id: row.get(1)?,
            streamer_id: row.get(2)?,
            kind: RankKind::from_str(&kind).unwrap_or(RankKind::Member),
            issued_at: parse_rfc3339(&issued_at),
            expiration_time: expiration_time.as_deref().map(parse_rfc3339),
            revoked_at: revoked_at.as_deref().map(parse_rfc3339),
            assigned_by_user_id: row.get(7)?,
            revoked_by_user_id: row.get(8)?,
            message: row.get(9)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::models::RankKind;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_experience_relink_and_undo_restore_original_ownership() {
        let (_dir, db) = test_db();
        db.add_chat_experience(5, 100).unwrap();
        db.add_chat_experience(5, 50).unwrap();
        db.add_chat_experience(9, 10).unwrap();

        db.relink_chat_experience_rows(5, 12).unwrap();
        assert_eq!(db.total_chat_experience(5).unwrap(), 0);
        assert_eq!(db.total_chat_experience(12).unwrap(), 150);
        assert_eq!(db.total_chat_experience(9).unwrap(), 10);

        db.undo_chat_experience_relink_rows(5).unwrap();
        assert_eq!(db.total_chat_experience(5).unwrap(), 150);
        assert_eq!(db.total_chat_experience(12).unwrap(), 0);
    }

    #[test]
    fn test_donation_relink_and_undo() {
        let (_dir, db) = test_db();
        db.add_donation(5, 500, "usd", Some("hi")).unwrap();
        db.relink_donation_rows(5, 12).unwrap();
        assert_eq!(db.total_donation_cents(&[12]).unwrap(), 500);
        db.undo_donation_relink_rows(5).unwrap();
        assert_eq!(db.total_donation_cents(&[5]).unwrap(), 500);
        assert_eq!(db.total_donation_cents(&[12]).unwrap(), 0);
    }

    #[test]
    fn test_rank_moves_and_admin_relink() {
        let (_dir, db) = test_db();
        let rank = db.add_user_rank(5, Some(1), RankKind::Mod, None, Some(99)).unwrap();
        db.move_active_ranks(5, 12).unwrap();
        let ranks = db.active_ranks_for_users(&[12]).unwrap();
        assert_eq!(ranks.len(), 1);
        assert_eq!(ranks[0].id, rank);

        db.relink_admin_user_refs(99, 12).unwrap();
        let ranks = db.active_ranks_for_users(&[12]).unwrap();
        assert_eq!(ranks[0].assigned_by_user_id, Some(12));
    }

    #[test]
    fn test_revoked_ranks_are_not_active() {
        let (_dir, db) = test_db();
        let rank = db.add_user_rank(5, Some(1), RankKind::Ban, None, None).unwrap();
        db.revoke_rank(rank, None, "merge collision").unwrap();
        assert!(db.active_ranks_for_users(&[5]).unwrap().is_empty());
    }
}
