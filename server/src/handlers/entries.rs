//! Entry handlers.

use super::{live_list, require_set_up};
use crate::db;
use crate::error::{AppError, Result};
use readlist_engine::api::{CreatedId, EntryBody};
use sqlx::PgPool;

/// Add an article to a list. Adding it again returns the existing entry.
pub async fn handle_add_entry(
    pool: &PgPool,
    user: &str,
    list_id: i64,
    body: EntryBody,
) -> Result<CreatedId> {
    require_set_up(pool, user).await?;
    live_list(pool, user, list_id).await?;

    let project = body.project.trim();
    let title = body.title.trim();
    if project.is_empty() || title.is_empty() {
        return Err(AppError::BadRequest("project and title are required".into()));
    }

    if let Some(existing) = db::find_live_entry(pool, list_id, project, title).await? {
        return Ok(CreatedId { id: existing.id });
    }

    match db::insert_entry(pool, user, list_id, project, title).await {
        Ok(id) => {
            tracing::debug!(user, list_id, id, "entry added");
            Ok(CreatedId { id })
        }
        // A concurrent add won the unique index.
        Err(err) => match db::find_live_entry(pool, list_id, project, title).await? {
            Some(existing) => Ok(CreatedId { id: existing.id }),
            None => Err(err.into()),
        },
    }
}

/// Tombstone an entry of a list.
pub async fn handle_remove_entry(
    pool: &PgPool,
    user: &str,
    list_id: i64,
    entry_id: i64,
) -> Result<()> {
    require_set_up(pool, user).await?;
    live_list(pool, user, list_id).await?;

    let entry = db::find_live_entry_by_id(pool, list_id, entry_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("entry {entry_id}")))?;
    db::delete_entry(pool, entry.id).await?;
    Ok(())
}
