//! Reading list endpoint routes.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use readlist_engine::api::{ArticleSummary, ChangeSet, CreatedId, EntryBody, ListBody};
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_add_entry, handle_changes_since, handle_create_list, handle_delete_list,
    handle_page_summary, handle_remove_entry, handle_setup, handle_teardown, handle_update_list,
    SummaryQuery,
};
use crate::AppState;

/// Create reading list routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/lists/setup", post(setup))
        .route("/lists/teardown", post(teardown))
        .route("/lists", post(create_list))
        .route("/lists/{id}", post(update_list).delete(delete_list))
        .route("/lists/{id}/entries", post(add_entry))
        .route("/lists/{id}/entries/{entry_id}", delete(remove_entry))
        .route("/lists/changes/since/{timestamp}", get(changes_since))
        .route("/page/summary", get(page_summary))
}

/// POST /lists/setup
async fn setup(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Value>> {
    handle_setup(&state.pool, &auth.token).await?;
    Ok(Json(json!({})))
}

/// POST /lists/teardown
async fn teardown(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Value>> {
    handle_teardown(&state.pool, &auth.token).await?;
    Ok(Json(json!({})))
}

/// POST /lists
async fn create_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<ListBody>,
) -> Result<Json<CreatedId>> {
    let created = handle_create_list(&state.pool, &auth.token, body).await?;
    Ok(Json(created))
}

/// POST /lists/{id}
async fn update_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<ListBody>,
) -> Result<Json<Value>> {
    handle_update_list(&state.pool, &auth.token, id, body).await?;
    Ok(Json(json!({})))
}

/// DELETE /lists/{id}
async fn delete_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    handle_delete_list(&state.pool, &auth.token, id).await?;
    Ok(Json(json!({})))
}

/// POST /lists/{id}/entries
async fn add_entry(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(list_id): Path<i64>,
    Json(body): Json<EntryBody>,
) -> Result<Json<CreatedId>> {
    let created = handle_add_entry(&state.pool, &auth.token, list_id, body).await?;
    Ok(Json(created))
}

/// DELETE /lists/{id}/entries/{entry_id}
async fn remove_entry(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((list_id, entry_id)): Path<(i64, i64)>,
) -> Result<Json<Value>> {
    handle_remove_entry(&state.pool, &auth.token, list_id, entry_id).await?;
    Ok(Json(json!({})))
}

/// GET /lists/changes/since/{timestamp}
async fn changes_since(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(timestamp): Path<String>,
) -> Result<Json<ChangeSet>> {
    let changes = handle_changes_since(&state.pool, &auth.token, &timestamp).await?;
    Ok(Json(changes))
}

/// GET /page/summary?key=...
async fn page_summary(
    _auth: AuthUser,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<ArticleSummary>> {
    let summary = handle_page_summary(&query)?;
    Ok(Json(summary))
}
