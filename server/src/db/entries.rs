//! Database operations for the reading_list_entries table.

use chrono::{DateTime, Utc};
use readlist_engine::{ArticleKey, RemoteEntry};
use sqlx::{PgPool, Row};

use super::wire_time;

/// A stored entry row.
#[derive(Debug)]
pub struct EntryRow {
    pub id: i64,
    pub list_id: i64,
    pub project: String,
    pub title: String,
    pub deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for EntryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(EntryRow {
            id: row.try_get("id")?,
            list_id: row.try_get("list_id")?,
            project: row.try_get("project")?,
            title: row.try_get("title")?,
            deleted: row.try_get("deleted")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl EntryRow {
    /// Change feed form of the row.
    pub fn to_remote(&self) -> RemoteEntry {
        RemoteEntry {
            id: self.id,
            list_id: Some(self.list_id),
            article_key: Some(ArticleKey::new(&self.project, &self.title).to_string()),
            project: Some(self.project.clone()),
            title: Some(self.title.clone()),
            deleted: self.deleted,
            updated: wire_time(self.updated_at),
        }
    }
}

const ENTRY_COLUMNS: &str = "id, list_id, project, title, deleted, updated_at";

/// The live entry of an article in a list.
pub async fn find_live_entry(
    pool: &PgPool,
    list_id: i64,
    project: &str,
    title: &str,
) -> Result<Option<EntryRow>, sqlx::Error> {
    sqlx::query_as::<_, EntryRow>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM reading_list_entries
         WHERE list_id = $1 AND project = $2 AND title = $3 AND NOT deleted"
    ))
    .bind(list_id)
    .bind(project)
    .bind(title)
    .fetch_optional(pool)
    .await
}

/// A live entry by id within a list.
pub async fn find_live_entry_by_id(
    pool: &PgPool,
    list_id: i64,
    id: i64,
) -> Result<Option<EntryRow>, sqlx::Error> {
    sqlx::query_as::<_, EntryRow>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM reading_list_entries
         WHERE id = $1 AND list_id = $2 AND NOT deleted"
    ))
    .bind(id)
    .bind(list_id)
    .fetch_optional(pool)
    .await
}

/// Insert an entry and return its id.
pub async fn insert_entry(
    pool: &PgPool,
    user: &str,
    list_id: i64,
    project: &str,
    title: &str,
) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let id = sqlx::query_scalar(
        r#"
        INSERT INTO reading_list_entries (list_id, user_token, project, title)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(list_id)
    .bind(user)
    .bind(project)
    .bind(title)
    .fetch_one(&mut *tx)
    .await?;

    // Membership changes count as a change of the list.
    sqlx::query("UPDATE reading_lists SET updated_at = NOW() WHERE id = $1")
        .bind(list_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(id)
}

/// Tombstone an entry.
pub async fn delete_entry(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE reading_list_entries SET deleted = TRUE, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Entries of `user` changed after `since`, tombstones included.
pub async fn entries_changed_since(
    pool: &PgPool,
    user: &str,
    since: DateTime<Utc>,
) -> Result<Vec<EntryRow>, sqlx::Error> {
    sqlx::query_as::<_, EntryRow>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM reading_list_entries
         WHERE user_token = $1 AND updated_at > $2
         ORDER BY updated_at, id"
    ))
    .bind(user)
    .bind(since)
    .fetch_all(pool)
    .await
}
