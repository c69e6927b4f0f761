//! Record types held by the local store.
//!
//! Lists, entries and articles live in an arena keyed by stable integer ids.
//! Relationships are plain id lookups through the store, never pointers.

use crate::{ArticleKey, EntryId, ListId, RemoteId, Revision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local sync bookkeeping shared by lists and entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFlags {
    /// Pending push
    pub is_updated_locally: bool,
    /// Tombstoned locally, awaiting remote confirmation
    pub is_deleted_locally: bool,
    /// Bumped on every local mutation
    pub revision: Revision,
}

impl SyncFlags {
    /// Flags for a record created by a local user action.
    pub fn created_locally() -> Self {
        Self {
            is_updated_locally: true,
            is_deleted_locally: false,
            revision: 1,
        }
    }

    /// Flags for a record materialized from the remote.
    pub fn synced() -> Self {
        Self::default()
    }

    /// Record a local edit that has to be pushed.
    pub fn touch(&mut self) {
        self.is_updated_locally = true;
        self.revision += 1;
    }

    /// Record a local deletion that has to be pushed.
    pub fn tombstone(&mut self) {
        self.is_deleted_locally = true;
        self.touch();
    }
}

/// A reading list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingList {
    /// Local identifier
    pub id: ListId,
    /// Server identifier, present once synced
    pub remote_id: Option<RemoteId>,
    /// NFC composed name, unique among non-deleted lists
    pub canonical_name: String,
    pub description: Option<String>,
    /// Exactly one list has this set
    pub is_default: bool,
    /// Number of non-deleted entries
    pub entry_count: u64,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    #[serde(flatten)]
    pub flags: SyncFlags,
}

impl ReadingList {
    /// Whether the list is still visible to the user.
    pub fn is_active(&self) -> bool {
        !self.flags.is_deleted_locally
    }

    /// Whether the list still needs to reach the remote.
    pub fn needs_push(&self) -> bool {
        self.flags.is_updated_locally
    }
}

/// Fields for a list about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewList {
    pub remote_id: Option<RemoteId>,
    pub canonical_name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub created_date: DateTime<Utc>,
    pub flags: SyncFlags,
}

/// Membership of an article in a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingListEntry {
    /// Local identifier
    pub id: EntryId,
    /// Server identifier, present once synced
    pub remote_id: Option<RemoteId>,
    /// Owning list
    pub list_id: ListId,
    /// Unique within the owning list
    pub article_key: ArticleKey,
    pub display_title: String,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    #[serde(flatten)]
    pub flags: SyncFlags,
}

impl ReadingListEntry {
    /// Whether the entry is still visible to the user.
    pub fn is_active(&self) -> bool {
        !self.flags.is_deleted_locally
    }
}

/// Fields for an entry about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub remote_id: Option<RemoteId>,
    pub list_id: ListId,
    pub article_key: ArticleKey,
    pub display_title: String,
    pub created_date: DateTime<Utc>,
    pub flags: SyncFlags,
}

/// Article level record referenced by entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub key: ArticleKey,
    pub display_title: String,
    pub description: Option<String>,
    pub lead_image_url: Option<String>,
    /// Set while the article belongs to at least one list
    pub saved_date: Option<DateTime<Utc>>,
}

impl Article {
    /// Create an article with a title derived from its key.
    pub fn new(key: ArticleKey) -> Self {
        let display_title = key
            .display_title()
            .unwrap_or_else(|| key.as_str().to_string());
        Self {
            key,
            display_title,
            description: None,
            lead_image_url: None,
            saved_date: None,
        }
    }

    /// Attach a lead image.
    pub fn with_lead_image(mut self, url: impl Into<String>) -> Self {
        self.lead_image_url = Some(url.into());
        self
    }

    /// Whether the article is saved in any list.
    pub fn is_saved(&self) -> bool {
        self.saved_date.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_for_local_create() {
        let flags = SyncFlags::created_locally();
        assert!(flags.is_updated_locally);
        assert!(!flags.is_deleted_locally);
        assert_eq!(flags.revision, 1);
    }

    #[test]
    fn tombstone_bumps_revision() {
        let mut flags = SyncFlags::synced();
        flags.tombstone();
        assert!(flags.is_deleted_locally);
        assert!(flags.is_updated_locally);
        assert_eq!(flags.revision, 1);

        flags.touch();
        assert_eq!(flags.revision, 2);
    }

    #[test]
    fn article_title_from_key() {
        let article = Article::new(ArticleKey::new("enwiki", "Red panda"));
        assert_eq!(article.display_title, "Red panda");
        assert!(!article.is_saved());

        let article = article.with_lead_image("https://upload.example/panda.jpg");
        assert!(article.lead_image_url.is_some());
    }

    #[test]
    fn list_serializes_flat_flags() {
        let now = Utc::now();
        let list = ReadingList {
            id: 1,
            remote_id: Some(42),
            canonical_name: "Travel".into(),
            description: None,
            is_default: false,
            entry_count: 0,
            created_date: now,
            updated_date: now,
            flags: SyncFlags::created_locally(),
        };

        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["remoteId"], 42);
        assert_eq!(json["isUpdatedLocally"], true);

        let parsed: ReadingList = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, list);
    }
}
