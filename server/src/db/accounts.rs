//! Per-account provisioning of reading list sync.

use readlist_engine::api::REMOTE_DEFAULT_LIST_NAME;
use readlist_engine::name_key;
use sqlx::PgPool;

/// Whether the account has set up reading list sync.
pub async fn is_set_up(pool: &PgPool, user: &str) -> Result<bool, sqlx::Error> {
    let set_up: Option<bool> =
        sqlx::query_scalar("SELECT set_up FROM reading_list_accounts WHERE user_token = $1")
            .bind(user)
            .fetch_optional(pool)
            .await?;
    Ok(set_up.unwrap_or(false))
}

/// Mark the account as set up and make sure it has a live default list.
pub async fn set_up_account(pool: &PgPool, user: &str) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO reading_list_accounts (user_token, set_up)
        VALUES ($1, TRUE)
        ON CONFLICT (user_token) DO UPDATE SET
            set_up = TRUE,
            updated_at = NOW()
        "#,
    )
    .bind(user)
    .execute(&mut *tx)
    .await?;

    let has_default: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM reading_lists
            WHERE user_token = $1 AND is_default AND NOT deleted
        )
        "#,
    )
    .bind(user)
    .fetch_one(&mut *tx)
    .await?;

    if !has_default {
        sqlx::query(
            r#"
            INSERT INTO reading_lists (user_token, name, name_key, is_default)
            VALUES ($1, $2, $3, TRUE)
            "#,
        )
        .bind(user)
        .bind(REMOTE_DEFAULT_LIST_NAME)
        .bind(name_key(REMOTE_DEFAULT_LIST_NAME))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::info!(user, "reading lists set up");
    Ok(())
}

/// Tombstone every list and entry of the account and clear its setup flag.
pub async fn tear_down_account(pool: &PgPool, user: &str) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE reading_list_entries SET deleted = TRUE, updated_at = NOW()
        WHERE user_token = $1 AND NOT deleted
        "#,
    )
    .bind(user)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE reading_lists SET deleted = TRUE, updated_at = NOW()
        WHERE user_token = $1 AND NOT deleted
        "#,
    )
    .bind(user)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE reading_list_accounts SET set_up = FALSE, updated_at = NOW() WHERE user_token = $1",
    )
    .bind(user)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(user, "reading lists torn down");
    Ok(())
}
