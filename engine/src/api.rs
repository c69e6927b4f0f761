//! Remote reading list service contract and wire types.
//!
//! The engine talks to the remote through [`RemoteApi`]. The wire types here
//! are shared with the reference server so both sides agree on the JSON.

use crate::{
    error::{ApiError, ReadingListError},
    Article, ArticleKey, RemoteId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Error code returned when reading list sync was never provisioned.
pub const NOT_SET_UP_CODE: &str = "readinglists-db-error-not-set-up";

/// Error code returned when a list name is already taken remotely.
pub const DUPLICATE_LIST_CODE: &str = "readinglists-db-error-duplicate-list";

/// Name of the default list created by `setup`.
pub const REMOTE_DEFAULT_LIST_NAME: &str = "default";

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A list as reported by the remote change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteList {
    pub id: RemoteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The remote counterpart of the local default list
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub deleted: bool,
    /// ISO-8601 time of the last remote change
    pub updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl RemoteList {
    /// Parsed `updated` time.
    pub fn updated_at(&self) -> Result<DateTime<Utc>, ReadingListError> {
        parse_timestamp(&self.updated).ok_or_else(|| {
            ReadingListError::MalformedRemoteRecord(format!(
                "list {} has invalid updated time {:?}",
                self.id, self.updated
            ))
        })
    }
}

/// An entry as reported by the remote change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub id: RemoteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<RemoteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    /// ISO-8601 time of the last remote change
    pub updated: String,
}

impl RemoteEntry {
    /// Parsed `updated` time.
    pub fn updated_at(&self) -> Result<DateTime<Utc>, ReadingListError> {
        parse_timestamp(&self.updated).ok_or_else(|| {
            ReadingListError::MalformedRemoteRecord(format!(
                "entry {} has invalid updated time {:?}",
                self.id, self.updated
            ))
        })
    }

    /// Article key, either sent verbatim or built from project and title.
    pub fn key(&self) -> Option<ArticleKey> {
        if let Some(raw) = &self.article_key {
            return ArticleKey::parse(raw);
        }
        match (&self.project, &self.title) {
            (Some(project), Some(title)) => ArticleKey::parse(ArticleKey::new(project, title).as_str()),
            _ => None,
        }
    }
}

/// Remote changes newer than a timestamp.
///
/// Records are decoded one at a time, so a broken record lands in
/// `malformed` instead of failing the whole feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawChangeSet")]
pub struct ChangeSet {
    pub lists: Vec<RemoteList>,
    pub entries: Vec<RemoteEntry>,
    /// Descriptions of records that could not be decoded
    #[serde(skip)]
    pub malformed: Vec<String>,
}

/// Change feed as received, before per-record decoding.
#[derive(Debug, Deserialize)]
struct RawChangeSet {
    #[serde(default)]
    lists: Vec<serde_json::Value>,
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

impl From<RawChangeSet> for ChangeSet {
    fn from(raw: RawChangeSet) -> Self {
        ChangeSet::from_records(raw.lists, raw.entries)
    }
}

impl ChangeSet {
    /// Decode raw feed records, setting aside the ones that do not parse.
    pub fn from_records(lists: Vec<serde_json::Value>, entries: Vec<serde_json::Value>) -> Self {
        let mut malformed = Vec::new();
        let lists = decode_records(lists, "list", &mut malformed);
        let entries = decode_records(entries, "entry", &mut malformed);
        ChangeSet {
            lists,
            entries,
            malformed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty() && self.entries.is_empty() && self.malformed.is_empty()
    }
}

fn decode_records<T: DeserializeOwned>(
    records: Vec<serde_json::Value>,
    kind: &str,
    malformed: &mut Vec<String>,
) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.get("id").cloned();
            match serde_json::from_value(record) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    let id = id.map_or_else(|| "?".to_string(), |id| id.to_string());
                    malformed.push(format!("{kind} {id}: {err}"));
                    None
                }
            }
        })
        .collect()
}

/// Article metadata used to materialize a new local article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleSummary {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl ArticleSummary {
    /// Build the local article record for `key`.
    pub fn into_article(self, key: ArticleKey) -> Article {
        let mut article = Article::new(key);
        article.display_title = self
            .display_title
            .unwrap_or_else(|| self.title.replace('_', " "));
        article.description = self.description;
        article.lead_image_url = self.thumbnail_url;
        article
    }
}

/// Body of list create and update requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBody {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Body of an add-entry request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryBody {
    pub project: String,
    pub title: String,
}

/// Response of create calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedId {
    pub id: RemoteId,
}

/// Error payload returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Typed client for the remote reading list service.
#[async_trait]
pub trait RemoteApi: Send + Sync + 'static {
    /// Provision reading list sync for the account.
    async fn setup(&self) -> ApiResult<()>;

    /// Remove every remote list of the account.
    async fn teardown(&self) -> ApiResult<()>;

    async fn create_list(&self, name: &str, description: Option<&str>) -> ApiResult<RemoteId>;

    async fn update_list(
        &self,
        id: RemoteId,
        name: &str,
        description: Option<&str>,
    ) -> ApiResult<()>;

    async fn delete_list(&self, id: RemoteId) -> ApiResult<()>;

    async fn add_entry(&self, list_id: RemoteId, project: &str, title: &str)
        -> ApiResult<RemoteId>;

    async fn remove_entry(&self, list_id: RemoteId, entry_id: RemoteId) -> ApiResult<()>;

    /// Lists and entries changed after `since`, tombstones included.
    async fn changes_since(&self, since: DateTime<Utc>) -> ApiResult<ChangeSet>;

    async fn article_summary(&self, key: &ArticleKey) -> ApiResult<ArticleSummary>;
}

/// Parse an ISO-8601 timestamp as sent on the wire.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
