//! Request handlers for the reading list service.
//!
//! Handlers take the pool and the account key so they can be driven without
//! the HTTP layer.

mod changes;
mod entries;
mod lists;

pub use changes::*;
pub use entries::*;
pub use lists::*;

use crate::db;
use crate::error::{AppError, Result};
use sqlx::PgPool;

/// Fail with the not-set-up error unless the account provisioned sync.
async fn require_set_up(pool: &PgPool, user: &str) -> Result<()> {
    if db::is_set_up(pool, user).await? {
        Ok(())
    } else {
        Err(AppError::NotSetUp)
    }
}

/// A live list of the account, or not found.
async fn live_list(pool: &PgPool, user: &str, id: i64) -> Result<db::ListRow> {
    db::find_live_list(pool, user, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("list {id}")))
}
