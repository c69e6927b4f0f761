//! Snapshot types for persisting and restoring the local store.
//!
//! A snapshot is the whole arena: lists, entries and articles plus the sync
//! cursor and the sync enablement flag. It uses ordered maps so that two
//! stores with the same content serialize to the same bytes.

use crate::{
    error::{StorageError, StorageResult},
    normalize::name_key,
    Article, ArticleKey, EntryId, ListId, ReadingList, ReadingListEntry, SyncCursor,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Next local id handed out for a list
    pub next_list_id: ListId,
    /// Next local id handed out for an entry
    pub next_entry_id: EntryId,
    /// Pull watermark
    pub cursor: SyncCursor,
    /// Whether sync with the remote is turned on
    pub sync_enabled: bool,
    pub lists: BTreeMap<ListId, ReadingList>,
    pub entries: BTreeMap<EntryId, ReadingListEntry>,
    pub articles: BTreeMap<ArticleKey, Article>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            next_list_id: 1,
            next_entry_id: 1,
            cursor: SyncCursor::new(),
            sync_enabled: false,
            lists: BTreeMap::new(),
            entries: BTreeMap::new(),
            articles: BTreeMap::new(),
        }
    }

    /// Count of lists and entries, tombstones included.
    pub fn record_count(&self) -> usize {
        self.lists.len() + self.entries.len()
    }

    /// Count of lists and entries still visible to the user.
    pub fn active_record_count(&self) -> usize {
        self.lists.values().filter(|l| l.is_active()).count()
            + self.entries.values().filter(|e| e.is_active()).count()
    }

    /// Check the structural invariants of the arena.
    pub fn validate(&self) -> StorageResult<()> {
        let defaults = self.lists.values().filter(|l| l.is_default).count();
        if defaults > 1 {
            return Err(StorageError::InvalidSnapshot(format!(
                "expected at most one default list, found {defaults}"
            )));
        }

        let mut names = HashSet::new();
        for (id, list) in &self.lists {
            if *id != list.id {
                return Err(StorageError::InvalidSnapshot(format!(
                    "list stored under {id} claims id {}",
                    list.id
                )));
            }
            if *id >= self.next_list_id {
                return Err(StorageError::InvalidSnapshot(format!(
                    "list id {id} not below next id {}",
                    self.next_list_id
                )));
            }
            if list.is_active() && !names.insert(name_key(&list.canonical_name)) {
                return Err(StorageError::InvalidSnapshot(format!(
                    "duplicate list name {}",
                    list.canonical_name
                )));
            }
        }

        let mut memberships = HashSet::new();
        for (id, entry) in &self.entries {
            if *id != entry.id {
                return Err(StorageError::InvalidSnapshot(format!(
                    "entry stored under {id} claims id {}",
                    entry.id
                )));
            }
            if *id >= self.next_entry_id {
                return Err(StorageError::InvalidSnapshot(format!(
                    "entry id {id} not below next id {}",
                    self.next_entry_id
                )));
            }
            if !self.lists.contains_key(&entry.list_id) {
                return Err(StorageError::InvalidSnapshot(format!(
                    "entry {id} references missing list {}",
                    entry.list_id
                )));
            }
            if entry.is_active() && !memberships.insert((entry.list_id, &entry.article_key)) {
                return Err(StorageError::InvalidSnapshot(format!(
                    "article {} appears twice in list {}",
                    entry.article_key, entry.list_id
                )));
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> StorageResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> StorageResult<Self> {
        let snapshot: Self = serde_json::from_str(json)
            .map_err(|e| StorageError::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(StorageError::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        snapshot.validate()?;
        Ok(snapshot)
    }
}

/// Summary of a snapshot without the records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub list_count: usize,
    pub entry_count: usize,
    pub article_count: usize,
    /// Lists and entries waiting for a push
    pub pending_count: usize,
    pub cursor: SyncCursor,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        let pending = snapshot
            .lists
            .values()
            .filter(|l| l.flags.is_updated_locally)
            .count()
            + snapshot
                .entries
                .values()
                .filter(|e| e.flags.is_updated_locally)
                .count();
        Self {
            format_version: snapshot.format_version,
            list_count: snapshot.lists.len(),
            entry_count: snapshot.entries.len(),
            article_count: snapshot.articles.len(),
            pending_count: pending,
            cursor: snapshot.cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncFlags;
    use chrono::{TimeZone, Utc};

    fn list(id: ListId, name: &str) -> ReadingList {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ReadingList {
            id,
            remote_id: None,
            canonical_name: name.into(),
            description: None,
            is_default: false,
            entry_count: 0,
            created_date: now,
            updated_date: now,
            flags: SyncFlags::created_locally(),
        }
    }

    fn entry(id: EntryId, list_id: ListId, key: &str) -> ReadingListEntry {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ReadingListEntry {
            id,
            remote_id: None,
            list_id,
            article_key: ArticleKey::from_raw(key),
            display_title: key.into(),
            created_date: now,
            updated_date: now,
            flags: SyncFlags::created_locally(),
        }
    }

    fn populated() -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new();
        snapshot.lists.insert(1, list(1, "Travel"));
        snapshot.lists.insert(2, list(2, "Food"));
        snapshot.entries.insert(1, entry(1, 1, "enwiki:Giraffe"));
        snapshot.next_list_id = 3;
        snapshot.next_entry_id = 2;
        snapshot
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = StoreSnapshot::new();
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.record_count(), 0);
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn json_roundtrip() {
        let mut snapshot = populated();
        snapshot.cursor = SyncCursor::at(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        snapshot.sync_enabled = true;

        let json = snapshot.to_json().unwrap();
        let restored = StoreSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, restored);
    }

    #[test]
    fn deterministic_serialization() {
        let a = populated();
        let mut b = StoreSnapshot::new();
        b.next_list_id = 3;
        b.next_entry_id = 2;
        b.entries.insert(1, entry(1, 1, "enwiki:Giraffe"));
        b.lists.insert(2, list(2, "Food"));
        b.lists.insert(1, list(1, "Travel"));

        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn reject_duplicate_names() {
        let mut snapshot = populated();
        snapshot.lists.insert(2, list(2, "TRAVEL"));
        assert!(matches!(
            snapshot.validate(),
            Err(StorageError::InvalidSnapshot(_))
        ));

        // Tombstoned lists do not take part in uniqueness
        snapshot.lists.get_mut(&2).unwrap().flags.tombstone();
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn reject_dangling_entry() {
        let mut snapshot = populated();
        snapshot.entries.insert(1, entry(1, 9, "enwiki:Giraffe"));
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn reject_two_defaults() {
        let mut snapshot = populated();
        for list in snapshot.lists.values_mut() {
            list.is_default = true;
        }
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn reject_future_format_version() {
        let mut snapshot = StoreSnapshot::new();
        snapshot.format_version = 999;
        let json = serde_json::to_string(&snapshot).unwrap();

        let result = StoreSnapshot::from_json(&json);
        assert!(matches!(result, Err(StorageError::InvalidSnapshot(_))));
    }

    #[test]
    fn snapshot_metadata() {
        let mut snapshot = populated();
        snapshot.lists.get_mut(&2).unwrap().flags = SyncFlags::synced();

        let metadata: SnapshotMetadata = (&snapshot).into();
        assert_eq!(metadata.list_count, 2);
        assert_eq!(metadata.entry_count, 1);
        assert_eq!(metadata.pending_count, 2);
    }
}
