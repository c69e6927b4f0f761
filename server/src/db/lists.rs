//! Database operations for the reading_lists table.

use chrono::{DateTime, Utc};
use readlist_engine::RemoteList;
use sqlx::{PgPool, Row};

use super::wire_time;

/// A stored list row.
#[derive(Debug)]
pub struct ListRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ListRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ListRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            is_default: row.try_get("is_default")?,
            deleted: row.try_get("deleted")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl ListRow {
    /// Change feed form of the row.
    pub fn to_remote(&self) -> RemoteList {
        RemoteList {
            id: self.id,
            name: Some(self.name.clone()),
            description: self.description.clone(),
            default: self.is_default,
            deleted: self.deleted,
            updated: wire_time(self.updated_at),
            created: Some(wire_time(self.created_at)),
        }
    }
}

const LIST_COLUMNS: &str =
    "id, name, description, is_default, deleted, created_at, updated_at";

/// A live list owned by `user`.
pub async fn find_live_list(
    pool: &PgPool,
    user: &str,
    id: i64,
) -> Result<Option<ListRow>, sqlx::Error> {
    sqlx::query_as::<_, ListRow>(&format!(
        "SELECT {LIST_COLUMNS} FROM reading_lists
         WHERE id = $1 AND user_token = $2 AND NOT deleted"
    ))
    .bind(id)
    .bind(user)
    .fetch_optional(pool)
    .await
}

/// A live list of `user` whose normalized name is `name_key`.
pub async fn find_live_list_by_name(
    pool: &PgPool,
    user: &str,
    name_key: &str,
) -> Result<Option<ListRow>, sqlx::Error> {
    sqlx::query_as::<_, ListRow>(&format!(
        "SELECT {LIST_COLUMNS} FROM reading_lists
         WHERE user_token = $1 AND name_key = $2 AND NOT deleted"
    ))
    .bind(user)
    .bind(name_key)
    .fetch_optional(pool)
    .await
}

/// Insert a list and return its id.
pub async fn insert_list(
    pool: &PgPool,
    user: &str,
    name: &str,
    name_key: &str,
    description: Option<&str>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO reading_lists (user_token, name, name_key, description)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(user)
    .bind(name)
    .bind(name_key)
    .bind(description)
    .fetch_one(pool)
    .await
}

/// Rename or re-describe a list.
pub async fn update_list(
    pool: &PgPool,
    id: i64,
    name: &str,
    name_key: &str,
    description: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE reading_lists
        SET name = $2, name_key = $3, description = $4, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(name_key)
    .bind(description)
    .execute(pool)
    .await?;
    Ok(())
}

/// Tombstone a list together with its live entries.
pub async fn delete_list(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE reading_list_entries SET deleted = TRUE, updated_at = NOW()
        WHERE list_id = $1 AND NOT deleted
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE reading_lists SET deleted = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Lists of `user` changed after `since`, tombstones included.
pub async fn lists_changed_since(
    pool: &PgPool,
    user: &str,
    since: DateTime<Utc>,
) -> Result<Vec<ListRow>, sqlx::Error> {
    sqlx::query_as::<_, ListRow>(&format!(
        "SELECT {LIST_COLUMNS} FROM reading_lists
         WHERE user_token = $1 AND updated_at > $2
         ORDER BY updated_at, id"
    ))
    .bind(user)
    .bind(since)
    .fetch_all(pool)
    .await
}
