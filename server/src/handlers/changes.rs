//! Change feed and page summary handlers.

use super::require_set_up;
use crate::db;
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use readlist_engine::api::{ArticleSummary, ChangeSet};
use readlist_engine::ArticleKey;
use serde::Deserialize;
use sqlx::PgPool;

/// Parse the `since` path segment.
pub fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| AppError::BadRequest(format!("invalid timestamp {raw:?}")))
}

/// Lists and entries changed strictly after `since`, tombstones included.
pub async fn handle_changes_since(pool: &PgPool, user: &str, since: &str) -> Result<ChangeSet> {
    let since = parse_since(since)?;
    require_set_up(pool, user).await?;

    let lists = db::lists_changed_since(pool, user, since).await?;
    let entries = db::entries_changed_since(pool, user, since).await?;
    tracing::debug!(
        user,
        lists = lists.len(),
        entries = entries.len(),
        "serving changes"
    );

    Ok(ChangeSet {
        lists: lists.iter().map(db::ListRow::to_remote).collect(),
        entries: entries.iter().map(db::EntryRow::to_remote).collect(),
        malformed: Vec::new(),
    })
}

/// Query parameters of the page summary endpoint.
#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub key: String,
}

/// Summary derived from the article title alone.
pub fn handle_page_summary(query: &SummaryQuery) -> Result<ArticleSummary> {
    let key = ArticleKey::parse(&query.key)
        .ok_or_else(|| AppError::BadRequest(format!("malformed article key {:?}", query.key)))?;
    let title = key.parts().map(|(_, title)| title.to_string()).unwrap_or_default();

    Ok(ArticleSummary {
        display_title: Some(title.replace('_', " ")),
        title,
        description: None,
        thumbnail_url: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_micro_precision() {
        let at = parse_since("2024-03-01T10:15:30.123456Z").unwrap();
        assert_eq!(at.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn rejects_garbage_timestamp() {
        assert!(matches!(parse_since("yesterday"), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn summary_from_title() {
        let summary = handle_page_summary(&SummaryQuery {
            key: "enwiki:Red_panda".into(),
        })
        .unwrap();
        assert_eq!(summary.title, "Red_panda");
        assert_eq!(summary.display_title.as_deref(), Some("Red panda"));
    }

    #[test]
    fn summary_rejects_malformed_key() {
        let result = handle_page_summary(&SummaryQuery {
            key: "Giraffe".into(),
        });
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
