//! List handlers: provisioning and list CRUD.

use super::{live_list, require_set_up};
use crate::db;
use crate::error::{AppError, Result};
use readlist_engine::api::{CreatedId, ListBody};
use readlist_engine::{canonical_name, name_key};
use sqlx::PgPool;

/// Provision reading list sync. Repeating it is harmless.
pub async fn handle_setup(pool: &PgPool, user: &str) -> Result<()> {
    db::set_up_account(pool, user).await?;
    Ok(())
}

/// Tombstone every list of the account.
pub async fn handle_teardown(pool: &PgPool, user: &str) -> Result<()> {
    require_set_up(pool, user).await?;
    db::tear_down_account(pool, user).await?;
    Ok(())
}

/// Validated name and its uniqueness key.
fn list_name(body: &ListBody) -> Result<(String, String)> {
    let name = canonical_name(&body.name);
    if name.is_empty() {
        return Err(AppError::BadRequest("list name must not be empty".into()));
    }
    let key = name_key(&name);
    Ok((name, key))
}

/// Create a list. Names are unique per account, ignoring case.
pub async fn handle_create_list(pool: &PgPool, user: &str, body: ListBody) -> Result<CreatedId> {
    require_set_up(pool, user).await?;
    let (name, key) = list_name(&body)?;

    if db::find_live_list_by_name(pool, user, &key).await?.is_some() {
        return Err(AppError::DuplicateList(name));
    }

    let id = db::insert_list(pool, user, &name, &key, body.description.as_deref())
        .await
        .map_err(|e| AppError::from_insert(e, &name))?;

    tracing::debug!(user, id, name = %name, "list created");
    Ok(CreatedId { id })
}

/// Rename or re-describe a list. The default list keeps its name.
pub async fn handle_update_list(
    pool: &PgPool,
    user: &str,
    id: i64,
    body: ListBody,
) -> Result<()> {
    require_set_up(pool, user).await?;
    let list = live_list(pool, user, id).await?;
    if list.is_default {
        return Err(AppError::BadRequest("the default list cannot be updated".into()));
    }

    let (name, key) = list_name(&body)?;
    if let Some(other) = db::find_live_list_by_name(pool, user, &key).await? {
        if other.id != id {
            return Err(AppError::DuplicateList(name));
        }
    }

    db::update_list(pool, id, &name, &key, body.description.as_deref())
        .await
        .map_err(|e| AppError::from_insert(e, &name))?;
    Ok(())
}

/// Tombstone a list and its entries.
pub async fn handle_delete_list(pool: &PgPool, user: &str, id: i64) -> Result<()> {
    require_set_up(pool, user).await?;
    let list = live_list(pool, user, id).await?;
    if list.is_default {
        return Err(AppError::BadRequest("the default list cannot be deleted".into()));
    }

    db::delete_list(pool, id).await?;
    tracing::debug!(user, id, "list deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(name: &str) -> ListBody {
        ListBody {
            name: name.to_string(),
            description: None,
        }
    }

    #[test]
    fn list_name_is_canonical() {
        let (name, key) = list_name(&body("  Cafe\u{301} ")).unwrap();
        assert_eq!(name, "Café");
        assert_eq!(key, name_key("CAFÉ"));
    }

    #[test]
    fn blank_list_name_is_rejected() {
        assert!(matches!(list_name(&body("  ")), Err(AppError::BadRequest(_))));
    }
}
