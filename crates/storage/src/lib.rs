use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::sync::broadcast;
use tracing::debug;

use shared::{
    domain::{Item, ItemId, ItemRecord, UserId},
    protocol::CollectionPath,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// SQLite-backed shared collection plus the local identity tables.
///
/// Every successful write publishes the affected path on a broadcast channel so
/// in-process subscribers can refresh without polling.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    changes: broadcast::Sender<CollectionPath>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every pooled connection to `sqlite::memory:` would open its own empty database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { pool, changes })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<CollectionPath> {
        self.changes.subscribe()
    }

    fn notify_changed(&self, path: &CollectionPath) {
        // No receivers is not an error: nobody is watching this store yet.
        let _ = self.changes.send(path.clone());
    }

    pub async fn list_items(&self, path: &CollectionPath) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            "SELECT id, name, quantity, expiration_date, owner_id, created_at
             FROM items
             WHERE path = ?
             ORDER BY expiration_date ASC, created_at ASC, id ASC",
        )
        .bind(path.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list items under '{path}'"))?;

        rows.iter().map(item_from_row).collect()
    }

    pub async fn get_item(&self, path: &CollectionPath, id: &ItemId) -> Result<Option<Item>> {
        let row = sqlx::query(
            "SELECT id, name, quantity, expiration_date, owner_id, created_at
             FROM items
             WHERE path = ? AND id = ?",
        )
        .bind(path.as_str())
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn insert_item(&self, path: &CollectionPath, record: &ItemRecord) -> Result<ItemId> {
        ensure_valid_record(record)?;
        let id = ItemId::generate();
        sqlx::query(
            "INSERT INTO items (path, id, name, quantity, expiration_date, owner_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(path.as_str())
        .bind(id.as_str())
        .bind(&record.name)
        .bind(i64::from(record.quantity))
        .bind(record.expiration_date)
        .bind(record.owner_id.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert item under '{path}'"))?;

        debug!(path = %path, item_id = %id, "storage: inserted item");
        self.notify_changed(path);
        Ok(id)
    }

    /// Overwrites every mutable field. `created_at` is never rewritten.
    pub async fn update_item(
        &self,
        path: &CollectionPath,
        id: &ItemId,
        record: &ItemRecord,
    ) -> Result<()> {
        ensure_valid_record(record)?;
        let result = sqlx::query(
            "UPDATE items
             SET name = ?, quantity = ?, expiration_date = ?, owner_id = ?
             WHERE path = ? AND id = ?",
        )
        .bind(&record.name)
        .bind(i64::from(record.quantity))
        .bind(record.expiration_date)
        .bind(record.owner_id.as_str())
        .bind(path.as_str())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update item '{id}' under '{path}'"))?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("item '{id}' not found under '{path}'"));
        }

        debug!(path = %path, item_id = %id, "storage: updated item");
        self.notify_changed(path);
        Ok(())
    }

    /// Deleting an id that is already gone succeeds.
    pub async fn delete_item(&self, path: &CollectionPath, id: &ItemId) -> Result<()> {
        let result = sqlx::query("DELETE FROM items WHERE path = ? AND id = ?")
            .bind(path.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete item '{id}' under '{path}'"))?;

        debug!(
            path = %path,
            item_id = %id,
            removed = result.rows_affected(),
            "storage: deleted item"
        );
        self.notify_changed(path);
        Ok(())
    }

    pub async fn load_identity(&self, profile: &str) -> Result<Option<UserId>> {
        let row = sqlx::query("SELECT user_id FROM identities WHERE profile = ?")
            .bind(profile)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load identity for profile '{profile}'"))?;
        Ok(row.map(|r| UserId(r.get::<String, _>(0))))
    }

    pub async fn save_identity(&self, profile: &str, user_id: &UserId) -> Result<()> {
        sqlx::query(
            "INSERT INTO identities (profile, user_id) VALUES (?, ?)
             ON CONFLICT(profile) DO UPDATE SET user_id = excluded.user_id",
        )
        .bind(profile)
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save identity for profile '{profile}'"))?;
        Ok(())
    }

    pub async fn clear_identity(&self, profile: &str) -> Result<()> {
        sqlx::query("DELETE FROM identities WHERE profile = ?")
            .bind(profile)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn issue_bootstrap_credential(&self, user_id: &UserId) -> Result<String> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO bootstrap_credentials (token, user_id) VALUES (?, ?)")
            .bind(&token)
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .context("failed to issue bootstrap credential")?;
        Ok(token)
    }

    pub async fn exchange_bootstrap_credential(&self, token: &str) -> Result<UserId> {
        let row = sqlx::query("SELECT user_id FROM bootstrap_credentials WHERE token = ?")
            .bind(token.trim())
            .fetch_optional(&self.pool)
            .await
            .context("failed to look up bootstrap credential")?;
        row.map(|r| UserId(r.get::<String, _>(0)))
            .ok_or_else(|| anyhow!("unknown bootstrap credential"))
    }
}

fn ensure_valid_record(record: &ItemRecord) -> Result<()> {
    if record.name.trim().is_empty() {
        return Err(anyhow!("item name must not be empty"));
    }
    if record.quantity == 0 {
        return Err(anyhow!("item quantity must be at least 1"));
    }
    Ok(())
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    let quantity: i64 = row.try_get("quantity")?;
    Ok(Item {
        id: ItemId(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        quantity: u32::try_from(quantity)
            .with_context(|| format!("stored quantity {quantity} is out of range"))?,
        expiration_date: row.try_get::<NaiveDate, _>("expiration_date")?,
        owner_id: UserId(row.try_get::<String, _>("owner_id")?),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
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
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
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
