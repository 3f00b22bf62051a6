//! Identity graph operations: default/aggregate users, the link edge, and
//! connected-set queries.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult};

use super::super::Database;
use crate::models::{AggregateUser, ConnectedUserIds, DefaultUser, Streamer};

impl Database {
    /// Look up a default user's chat identity by channel, creating it the
    /// first time the channel is observed.
    pub fn get_or_create_default_user(
        &self,
        platform: &str,
        external_id: &str,
        display_name: Option<&str>,
    ) -> SqliteResult<DefaultUser> {
        let conn = self.conn();

        let existing = conn
            .query_row(
                "SELECT id, platform, external_id, display_name, aggregate_user_id, linked_at, created_at
                 FROM default_users WHERE platform = ?1 AND external_id = ?2",
                rusqlite::params![platform, external_id],
                Self::row_to_default_user,
            )
            .optional()?;
        if let Some(user) = existing {
            return Ok(user);
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chat_users (kind) VALUES ('default')",
            [],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO default_users (id, platform, external_id, display_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, platform, external_id, display_name, &now],
        )?;

        Ok(DefaultUser {
            id,
            platform: platform.to_string(),
            external_id: external_id.to_string(),
            display_name: display_name.map(|s| s.to_string()),
            aggregate_user_id: None,
            linked_at: None,
            created_at: Utc::now(),
        })
    }

    pub fn get_default_user(&self, id: i64) -> SqliteResult<Option<DefaultUser>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, platform, external_id, display_name, aggregate_user_id, linked_at, created_at
             FROM default_users WHERE id = ?1",
            [id],
            Self::row_to_default_user,
        )
        .optional()
    }

    /// Create the platform-independent identity for a registered account.
    pub fn create_aggregate_user(&self, registered_username: &str) -> SqliteResult<AggregateUser> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chat_users (kind) VALUES ('aggregate')",
            [],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO aggregate_users (id, registered_username, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, registered_username, &now],
        )?;
        Ok(AggregateUser {
            id,
            registered_username: registered_username.to_string(),
            created_at: Utc::now(),
        })
    }

    pub fn get_aggregate_user(&self, id: i64) -> SqliteResult<Option<AggregateUser>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, registered_username, created_at FROM aggregate_users WHERE id = ?1",
            [id],
            |row| {
                let created_at: String = row.get(2)?;
                Ok(AggregateUser {
                    id: row.get(0)?,
                    registered_username: row.get(1)?,
                    created_at: parse_rfc3339(&created_at),
                })
            },
        )
        .optional()
    }

    /// Set the identity graph edge for a default user.
    pub fn link_user(&self, default_user_id: i64, aggregate_user_id: i64) -> SqliteResult<()> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE default_users SET aggregate_user_id = ?1, linked_at = ?2 WHERE id = ?3",
            rusqlite::params![aggregate_user_id, &now, default_user_id],
        )?;
        Ok(())
    }

    /// Clear the identity graph edge and return what it pointed at, for
    /// rollback and downstream relink-undo. `None` if the user was not
    /// linked.
    pub fn unlink_user(&self, default_user_id: i64) -> SqliteResult<Option<i64>> {
        let conn = self.conn();
        let previous: Option<i64> = conn
            .query_row(
                "SELECT aggregate_user_id FROM default_users WHERE id = ?1",
                [default_user_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        if previous.is_some() {
            conn.execute(
                "UPDATE default_users SET aggregate_user_id = NULL, linked_at = NULL WHERE id = ?1",
                [default_user_id],
            )?;
        }
        Ok(previous)
    }

    /// Compute the full connected set for each requested chat user id.
    ///
    /// The set always contains the queried id. For a linked default user or
    /// an aggregate user it also contains the aggregate id and every default
    /// user attached to it.
    pub fn get_connected_chat_user_ids(&self, ids: &[i64]) -> SqliteResult<Vec<ConnectedUserIds>> {
        let conn = self.conn();
        let mut results = Vec::with_capacity(ids.len());

        for &id in ids {
            // Resolve the aggregate root, if any.
            let is_aggregate: bool = conn
                .query_row(
                    "SELECT 1 FROM aggregate_users WHERE id = ?1",
                    [id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            let aggregate_id = if is_aggregate {
                Some(id)
            } else {
                conn.query_row(
                    "SELECT aggregate_user_id FROM default_users WHERE id = ?1",
                    [id],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?
                .flatten()
            };

            let mut connected = vec![id];
            if let Some(aggregate_id) = aggregate_id {
                connected.push(aggregate_id);
                let mut stmt = conn.prepare(
                    "SELECT id FROM default_users WHERE aggregate_user_id = ?1",
                )?;
                let members = stmt
                    .query_map([aggregate_id], |row| row.get::<_, i64>(0))?
                    .filter_map(|r| r.ok());
                connected.extend(members);
            }
            connected.sort_unstable();
            connected.dedup();

            results.push(ConnectedUserIds {
                id,
                connected_ids: connected,
            });
        }

        Ok(results)
    }

    /// All default users currently attached to an aggregate identity.
    pub fn connected_default_users(&self, aggregate_user_id: i64) -> SqliteResult<Vec<DefaultUser>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, platform, external_id, display_name, aggregate_user_id, linked_at, created_at
             FROM default_users WHERE aggregate_user_id = ?1 ORDER BY id",
        )?;
        let users = stmt
            .query_map([aggregate_user_id], Self::row_to_default_user)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(users)
    }

    /// Register a streamer for an aggregate identity.
    pub fn create_streamer(
        &self,
        aggregate_user_id: i64,
        name: &str,
        youtube_primary_channel_id: Option<i64>,
        twitch_primary_channel_id: Option<i64>,
    ) -> SqliteResult<Streamer> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO streamers (aggregate_user_id, name, youtube_primary_channel_id, twitch_primary_channel_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                aggregate_user_id,
                name,
                youtube_primary_channel_id,
                twitch_primary_channel_id,
                &now
            ],
        )?;
        Ok(Streamer {
            id: conn.last_insert_rowid(),
            aggregate_user_id,
            name: name.to_string(),
            youtube_primary_channel_id,
            twitch_primary_channel_id,
        })
    }

    /// The streamer owning a given aggregate identity, if one exists.
    pub fn get_streamer_for_aggregate(&self, aggregate_user_id: i64) -> SqliteResult<Option<Streamer>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, aggregate_user_id, name, youtube_primary_channel_id, twitch_primary_channel_id
             FROM streamers WHERE aggregate_user_id = ?1",
            [aggregate_user_id],
            |row| {
                Ok(Streamer {
                    id: row.get(0)?,
                    aggregate_user_id: row.get(1)?,
                    name: row.get(2)?,
                    youtube_primary_channel_id: row.get(3)?,
                    twitch_primary_channel_id: row.get(4)?,
                })
            },
        )
        .optional()
    }

    fn row_to_default_user(row: &rusqlite::Row) -> rusqlite::Result<DefaultUser> {
        let linked_at: Option<String> = row.get(5)?;
        let created_at: String = row.get(6)?;
        Ok(DefaultUser {
            id: row.get(0)?,
            platform: row.get(1)?,
            external_id: row.get(2)?,
            display_name: row.get(3)?,
            aggregate_user_id: row.get(4)?,
            linked_at: linked_at.as_deref().map(parse_rfc3339),
            created_at: parse_rfc3339(&created_at),
        })
    }
}

pub(crate) fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_default_and_aggregate_ids_share_one_space() {
        let (_dir, db) = test_db();
        let a = db.get_or_create_default_user("youtube", "UC123", Some("alice")).unwrap();
        let b = db.create_aggregate_user("alice").unwrap();
        let c = db.get_or_create_default_user("twitch", "alice_tv", None).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (_dir, db) = test_db();
        let first = db.get_or_create_default_user("youtube", "UC123", Some("alice")).unwrap();
        let second = db.get_or_create_default_user("youtube", "UC123", Some("alice")).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_link_and_unlink_edge() {
        let (_dir, db) = test_db();
        let user = db.get_or_create_default_user("youtube", "UC123", None).unwrap();
        let aggregate = db.create_aggregate_user("alice").unwrap();

        db.link_user(user.id, aggregate.id).unwrap();
        let linked = db.get_default_user(user.id).unwrap().unwrap();
        assert_eq!(linked.aggregate_user_id, Some(aggregate.id));
        assert!(linked.linked_at.is_some());

        let previous = db.unlink_user(user.id).unwrap();
        assert_eq!(previous, Some(aggregate.id));
        let unlinked = db.get_default_user(user.id).unwrap().unwrap();
        assert_eq!(unlinked.aggregate_user_id, None);

        // Unlinking again reports no previous edge.
        assert_eq!(db.unlink_user(user.id).unwrap(), None);
    }

    #[test]
    fn test_connected_set_includes_all_members_and_self() {
        let (_dir, db) = test_db();
        let u1 = db.get_or_create_default_user("youtube", "UC1", None).unwrap();
        let u2 = db.get_or_create_default_user("twitch", "chan2", None).unwrap();
        let aggregate = db.create_aggregate_user("alice").unwrap();
        db.link_user(u1.id, aggregate.id).unwrap();
        db.link_user(u2.id, aggregate.id).unwrap();

        let sets = db.get_connected_chat_user_ids(&[u1.id, aggregate.id]).unwrap();
        let mut expected = vec![u1.id, u2.id, aggregate.id];
        expected.sort_unstable();
        assert_eq!(sets[0].connected_ids, expected);
        assert_eq!(sets[1].connected_ids, expected);
    }

    #[test]
    fn test_unconnected_user_is_its_own_set() {
        let (_dir, db) = test_db();
        let user = db.get_or_create_default_user("youtube", "UC1", None).unwrap();
        let sets = db.get_connected_chat_user_ids(&[user.id]).unwrap();
        assert_eq!(sets[0].connected_ids, vec![user.id]);
    }
}
