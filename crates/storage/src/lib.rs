use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{GroupId, MessageId, ThreadKey, UserId, UserProfile};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredPrivateMessage {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredGroupMessage {
    pub message_id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Refreshes the identity snapshot for a user. Called on every login so
    /// group member resolution can return full profiles.
    pub async fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, photo_url, bio) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                photo_url = excluded.photo_url,
                bio = excluded.bio",
        )
        .bind(profile.id.0)
        .bind(&profile.username)
        .bind(&profile.photo_url)
        .bind(&profile.bio)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT id, username, photo_url, bio FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(profile_from_row))
    }

    /// Resolves a member id set to profiles, skipping ids with no snapshot,
    /// ordered by username for stable rendering.
    pub async fn profiles_for_members(&self, group_id: GroupId) -> Result<Vec<UserProfile>> {
        let rows = sqlx::query(
            "SELECT u.id, u.username, u.photo_url, u.bio
             FROM group_members m
             INNER JOIN users u ON u.id = m.user_id
             WHERE m.group_id = ?
             ORDER BY lower(u.username) ASC",
        )
        .bind(group_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(profile_from_row).collect())
    }

    /// Locates or creates the thread for the sorted participant pair and
    /// appends the message, in one transaction.
    pub async fn append_private_message(
        &self,
        key: ThreadKey,
        sender_id: UserId,
        recipient_id: UserId,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<MessageId> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id FROM chat_threads WHERE low_user_id = ? AND high_user_id = ?",
        )
        .bind(key.low().0)
        .bind(key.high().0)
        .fetch_optional(&mut *tx)
        .await?;

        let thread_id = match existing {
            Some(row) => row.get::<i64, _>(0),
            None => sqlx::query(
                "INSERT INTO chat_threads (low_user_id, high_user_id) VALUES (?, ?) RETURNING id",
            )
            .bind(key.low().0)
            .bind(key.high().0)
            .fetch_one(&mut *tx)
            .await?
            .get::<i64, _>(0),
        };

        let rec = sqlx::query(
            "INSERT INTO chat_messages (thread_id, sender_id, recipient_id, content, sent_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(thread_id)
        .bind(sender_id.0)
        .bind(recipient_id.0)
        .bind(content)
        .bind(sent_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MessageId(rec.get::<i64, _>(0)))
    }

    /// Messages for the pair's thread in insertion order; empty if the pair
    /// has never exchanged a message.
    pub async fn thread_messages(&self, key: ThreadKey) -> Result<Vec<StoredPrivateMessage>> {
        let rows = sqlx::query(
            "SELECT m.id, m.sender_id, m.recipient_id, m.content, m.sent_at
             FROM chat_messages m
             INNER JOIN chat_threads t ON t.id = m.thread_id
             WHERE t.low_user_id = ? AND t.high_user_id = ?
             ORDER BY m.id ASC",
        )
        .bind(key.low().0)
        .bind(key.high().0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StoredPrivateMessage {
                message_id: MessageId(r.get::<i64, _>(0)),
                sender_id: UserId(r.get::<i64, _>(1)),
                recipient_id: UserId(r.get::<i64, _>(2)),
                content: r.get::<String, _>(3),
                sent_at: r.get::<DateTime<Utc>, _>(4),
            })
            .collect())
    }

    pub async fn create_group(&self, name: &str, member_ids: &[UserId]) -> Result<GroupId> {
        let mut tx = self.pool.begin().await?;

        let rec = sqlx::query("INSERT INTO groups (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
        let group_id = GroupId(rec.get::<i64, _>(0));

        for member_id in member_ids {
            sqlx::query("INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?, ?)")
                .bind(group_id.0)
                .bind(member_id.0)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(group_id)
    }

    pub async fn group_name(&self, group_id: GroupId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT name FROM groups WHERE id = ?")
            .bind(group_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    /// Hard delete of the group, its roster, and its message log. Returns
    /// false when the id does not resolve.
    pub async fn delete_group(&self, group_id: GroupId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM group_messages WHERE group_id = ?")
            .bind(group_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(group_id.0)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(group_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    /// Idempotent: adding a member twice leaves the roster unchanged.
    pub async fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?, ?)")
            .bind(group_id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Idempotent: removing an absent member is a no-op.
    pub async fn remove_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn group_member_ids(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        let rows =
            sqlx::query("SELECT user_id FROM group_members WHERE group_id = ? ORDER BY user_id")
                .bind(group_id.0)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|r| UserId(r.get::<i64, _>(0)))
            .collect())
    }

    pub async fn list_groups_for_member(&self, user_id: UserId) -> Result<Vec<(GroupId, String)>> {
        let rows = sqlx::query(
            "SELECT g.id, g.name
             FROM groups g
             INNER JOIN group_members m ON m.group_id = g.id
             WHERE m.user_id = ?
             ORDER BY g.id ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (GroupId(r.get::<i64, _>(0)), r.get::<String, _>(1)))
            .collect())
    }

    /// Appends to the group's log only while the group row exists; the guard
    /// and the insert are one statement, so a send racing a delete affects
    /// zero rows instead of resurrecting the group. Returns None when the
    /// group does not resolve.
    pub async fn append_group_message(
        &self,
        group_id: GroupId,
        sender_id: UserId,
        sender_username: &str,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<Option<MessageId>> {
        let row = sqlx::query(
            "INSERT INTO group_messages (group_id, sender_id, sender_username, content, sent_at)
             SELECT ?, ?, ?, ?, ?
             WHERE EXISTS (SELECT 1 FROM groups WHERE id = ?)
             RETURNING id",
        )
        .bind(group_id.0)
        .bind(sender_id.0)
        .bind(sender_username)
        .bind(content)
        .bind(sent_at)
        .bind(group_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| MessageId(r.get::<i64, _>(0))))
    }

    pub async fn group_messages(&self, group_id: GroupId) -> Result<Vec<StoredGroupMessage>> {
        let rows = sqlx::query(
            "SELECT id, group_id, sender_id, sender_username, content, sent_at
             FROM group_messages
             WHERE group_id = ?
             ORDER BY id ASC",
        )
        .bind(group_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StoredGroupMessage {
                message_id: MessageId(r.get::<i64, _>(0)),
                group_id: GroupId(r.get::<i64, _>(1)),
                sender_id: UserId(r.get::<i64, _>(2)),
                sender_username: r.get::<String, _>(3),
                content: r.get::<String, _>(4),
                sent_at: r.get::<DateTime<Utc>, _>(5),
            })
            .collect())
    }

    /// One row records both directions of the relation; inserting it is a
    /// single atomic statement.
    pub async fn set_block(&self, user_id: UserId, blocked_user_id: UserId) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO user_blocks (user_id, blocked_user_id) VALUES (?, ?)")
            .bind(user_id.0)
            .bind(blocked_user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_block(&self, user_id: UserId, blocked_user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM user_blocks WHERE user_id = ? AND blocked_user_id = ?")
            .bind(user_id.0)
            .bind(blocked_user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Forward lookup: everyone this user has blocked.
    pub async fn blocked_users(&self, user_id: UserId) -> Result<Vec<UserId>> {
        let rows = sqlx::query(
            "SELECT blocked_user_id FROM user_blocks WHERE user_id = ? ORDER BY blocked_user_id",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| UserId(r.get::<i64, _>(0)))
            .collect())
    }

    /// Reverse lookup: everyone who has blocked this user.
    pub async fn blocked_by_users(&self, user_id: UserId) -> Result<Vec<UserId>> {
        let rows =
            sqlx::query("SELECT user_id FROM user_blocks WHERE blocked_user_id = ? ORDER BY user_id")
                .bind(user_id.0)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|r| UserId(r.get::<i64, _>(0)))
            .collect())
    }
}

fn profile_from_row(row: sqlx::sqlite::SqliteRow) -> UserProfile {
    UserProfile {
        id: UserId(row.get::<i64, _>(0)),
        username: row.get::<String, _>(1),
        photo_url: row.get::<String, _>(2),
        bio: row.get::<String, _>(3),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
