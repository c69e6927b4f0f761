//! Local store adapter.
//!
//! [`LocalStore`] is the contract every other component uses to read and
//! write reading list state. Queries take typed filters instead of string
//! predicates. [`MemoryStore`] is the arena implementation, optionally backed
//! by a JSON snapshot on disk, and [`Database`] serializes access to a store
//! with one transaction per call.

use crate::{
    error::{StorageError, StorageResult},
    normalize::name_key,
    snapshot::StoreSnapshot,
    Article, ArticleKey, EntryId, ListId, NewEntry, NewList, ReadingList, ReadingListEntry,
    RemoteId, SyncCursor,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Selection of reading lists. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    ids: Option<HashSet<ListId>>,
    updated_locally: Option<bool>,
    deleted_locally: Option<bool>,
    has_remote_id: Option<bool>,
    remote_ids: Option<HashSet<RemoteId>>,
    name_keys: Option<HashSet<String>>,
    is_default: Option<bool>,
}

impl ListFilter {
    /// Every list, tombstones included.
    pub fn all() -> Self {
        Self::default()
    }

    /// Lists still visible to the user.
    pub fn active() -> Self {
        Self::default().deleted_locally(false)
    }

    /// Lists waiting for a push.
    pub fn dirty() -> Self {
        Self::default().updated_locally(true)
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = ListId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn updated_locally(mut self, value: bool) -> Self {
        self.updated_locally = Some(value);
        self
    }

    pub fn deleted_locally(mut self, value: bool) -> Self {
        self.deleted_locally = Some(value);
        self
    }

    pub fn has_remote_id(mut self, value: bool) -> Self {
        self.has_remote_id = Some(value);
        self
    }

    pub fn remote_ids(mut self, ids: impl IntoIterator<Item = RemoteId>) -> Self {
        self.remote_ids = Some(ids.into_iter().collect());
        self
    }

    /// Match by normalized name (see [`name_key`]).
    pub fn names<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        self.name_keys = Some(names.into_iter().map(|n| name_key(n.as_ref())).collect());
        self
    }

    pub fn default_list(mut self, value: bool) -> Self {
        self.is_default = Some(value);
        self
    }

    /// Whether a list is selected by this filter.
    pub fn matches(&self, list: &ReadingList) -> bool {
        self.ids.as_ref().map_or(true, |ids| ids.contains(&list.id))
            && self
                .updated_locally
                .map_or(true, |v| list.flags.is_updated_locally == v)
            && self
                .deleted_locally
                .map_or(true, |v| list.flags.is_deleted_locally == v)
            && self
                .has_remote_id
                .map_or(true, |v| list.remote_id.is_some() == v)
            && self.remote_ids.as_ref().map_or(true, |ids| {
                list.remote_id.is_some_and(|remote_id| ids.contains(&remote_id))
            })
            && self
                .name_keys
                .as_ref()
                .map_or(true, |keys| keys.contains(&name_key(&list.canonical_name)))
            && self.is_default.map_or(true, |v| list.is_default == v)
    }
}

/// Selection of reading list entries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    ids: Option<HashSet<EntryId>>,
    list_ids: Option<HashSet<ListId>>,
    article_keys: Option<HashSet<ArticleKey>>,
    updated_locally: Option<bool>,
    deleted_locally: Option<bool>,
    has_remote_id: Option<bool>,
    remote_ids: Option<HashSet<RemoteId>>,
}

impl EntryFilter {
    /// Every entry, tombstones included.
    pub fn all() -> Self {
        Self::default()
    }

    /// Entries still visible to the user.
    pub fn active() -> Self {
        Self::default().deleted_locally(false)
    }

    /// Entries waiting for a push.
    pub fn dirty() -> Self {
        Self::default().updated_locally(true)
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = EntryId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn in_list(self, list_id: ListId) -> Self {
        self.in_lists([list_id])
    }

    pub fn in_lists(mut self, list_ids: impl IntoIterator<Item = ListId>) -> Self {
        self.list_ids = Some(list_ids.into_iter().collect());
        self
    }

    pub fn article_keys(mut self, keys: impl IntoIterator<Item = ArticleKey>) -> Self {
        self.article_keys = Some(keys.into_iter().collect());
        self
    }

    pub fn updated_locally(mut self, value: bool) -> Self {
        self.updated_locally = Some(value);
        self
    }

    pub fn deleted_locally(mut self, value: bool) -> Self {
        self.deleted_locally = Some(value);
        self
    }

    pub fn has_remote_id(mut self, value: bool) -> Self {
        self.has_remote_id = Some(value);
        self
    }

    pub fn remote_ids(mut self, ids: impl IntoIterator<Item = RemoteId>) -> Self {
        self.remote_ids = Some(ids.into_iter().collect());
        self
    }

    /// Whether an entry is selected by this filter.
    pub fn matches(&self, entry: &ReadingListEntry) -> bool {
        self.ids.as_ref().map_or(true, |ids| ids.contains(&entry.id))
            && self
                .list_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&entry.list_id))
            && self
                .article_keys
                .as_ref()
                .map_or(true, |keys| keys.contains(&entry.article_key))
            && self
                .updated_locally
                .map_or(true, |v| entry.flags.is_updated_locally == v)
            && self
                .deleted_locally
                .map_or(true, |v| entry.flags.is_deleted_locally == v)
            && self
                .has_remote_id
                .map_or(true, |v| entry.remote_id.is_some() == v)
            && self.remote_ids.as_ref().map_or(true, |ids| {
                entry.remote_id.is_some_and(|remote_id| ids.contains(&remote_id))
            })
    }
}

/// Contract over the local persistent record store.
///
/// Implementations keep `entry_count` of every list equal to its number of
/// non-deleted entries, and cascade a hard list delete to its entries.
pub trait LocalStore: Send + 'static {
    /// Lists matching a filter, ordered by local id.
    fn lists(&self, filter: &ListFilter) -> StorageResult<Vec<ReadingList>>;

    /// A list by local id, tombstones included.
    fn list(&self, id: ListId) -> StorageResult<Option<ReadingList>>;

    /// Insert a list. Fails when an active list already uses the name.
    fn insert_list(&mut self, list: NewList) -> StorageResult<ReadingList>;

    /// Replace the stored fields of an existing list.
    fn update_list(&mut self, list: &ReadingList) -> StorageResult<()>;

    /// Hard delete a list and all of its entries.
    fn delete_list(&mut self, id: ListId) -> StorageResult<()>;

    /// Entries matching a filter, ordered by local id.
    fn entries(&self, filter: &EntryFilter) -> StorageResult<Vec<ReadingListEntry>>;

    /// An entry by local id, tombstones included.
    fn entry(&self, id: EntryId) -> StorageResult<Option<ReadingListEntry>>;

    /// Insert an entry. Fails when the list is gone or tombstoned, or already
    /// holds the article.
    fn insert_entry(&mut self, entry: NewEntry) -> StorageResult<ReadingListEntry>;

    /// Replace the stored fields of an existing entry.
    fn update_entry(&mut self, entry: &ReadingListEntry) -> StorageResult<()>;

    /// Hard delete an entry.
    fn delete_entry(&mut self, id: EntryId) -> StorageResult<()>;

    fn article(&self, key: &ArticleKey) -> StorageResult<Option<Article>>;

    /// All articles, ordered by key.
    fn articles(&self) -> StorageResult<Vec<Article>>;

    /// Insert or replace an article.
    fn upsert_article(&mut self, article: Article) -> StorageResult<()>;

    fn cursor(&self) -> StorageResult<SyncCursor>;

    fn set_cursor(&mut self, cursor: SyncCursor) -> StorageResult<()>;

    fn sync_enabled(&self) -> StorageResult<bool>;

    fn set_sync_enabled(&mut self, enabled: bool) -> StorageResult<()>;

    /// Start a transaction.
    fn begin(&mut self) -> StorageResult<()>;

    /// Make the changes since [`LocalStore::begin`] durable.
    fn commit(&mut self) -> StorageResult<()>;

    /// Discard the changes since [`LocalStore::begin`].
    fn rollback(&mut self) -> StorageResult<()>;
}

/// In-memory arena store, optionally persisted as a JSON snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: StoreSnapshot,
    /// State at `begin`, restored on rollback
    checkpoint: Option<StoreSnapshot>,
    /// Whether the open transaction modified anything
    changed: bool,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an empty, purely in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading the snapshot at `path` if present.
    ///
    /// Every transaction clones the arena for rollback, and every commit that
    /// changed something rewrites the whole file. Suited to personal-sized
    /// reading lists, not to bulk imports one record per transaction.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            StoreSnapshot::from_json(&fs::read_to_string(&path)?)?
        } else {
            StoreSnapshot::new()
        };
        tracing::debug!(path = %path.display(), records = state.record_count(), "opened store");
        Ok(Self {
            state,
            checkpoint: None,
            changed: false,
            path: Some(path),
        })
    }

    /// Build a store from an existing snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> StorageResult<Self> {
        snapshot.validate()?;
        Ok(Self {
            state: snapshot,
            checkpoint: None,
            changed: false,
            path: None,
        })
    }

    /// Export the current state.
    pub fn export_state(&self) -> StoreSnapshot {
        self.state.clone()
    }

    /// Replace the current state with a snapshot.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> StorageResult<()> {
        snapshot.validate()?;
        self.state = snapshot;
        Ok(())
    }

    /// Write the snapshot file, atomically replacing the previous one.
    pub fn persist(&self) -> StorageResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, self.state.to_json()?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn name_taken(&self, canonical_name: &str, except: Option<ListId>) -> bool {
        let key = name_key(canonical_name);
        self.state
            .lists
            .values()
            .any(|l| l.is_active() && Some(l.id) != except && name_key(&l.canonical_name) == key)
    }

    fn recount(&mut self, list_id: ListId) {
        let count = self
            .state
            .entries
            .values()
            .filter(|e| e.list_id == list_id && e.is_active())
            .count() as u64;
        if let Some(list) = self.state.lists.get_mut(&list_id) {
            list.entry_count = count;
        }
    }
}

impl LocalStore for MemoryStore {
    fn lists(&self, filter: &ListFilter) -> StorageResult<Vec<ReadingList>> {
        Ok(self
            .state
            .lists
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect())
    }

    fn list(&self, id: ListId) -> StorageResult<Option<ReadingList>> {
        Ok(self.state.lists.get(&id).cloned())
    }

    fn insert_list(&mut self, new: NewList) -> StorageResult<ReadingList> {
        self.changed = true;
        if self.name_taken(&new.canonical_name, None) {
            return Err(StorageError::Constraint(format!(
                "list name already in use: {}",
                new.canonical_name
            )));
        }
        if new.is_default && self.state.lists.values().any(|l| l.is_default) {
            return Err(StorageError::Constraint("default list already exists".into()));
        }

        let id = self.state.next_list_id;
        self.state.next_list_id += 1;
        let list = ReadingList {
            id,
            remote_id: new.remote_id,
            canonical_name: new.canonical_name,
            description: new.description,
            is_default: new.is_default,
            entry_count: 0,
            created_date: new.created_date,
            updated_date: new.created_date,
            flags: new.flags,
        };
        self.state.lists.insert(id, list.clone());
        Ok(list)
    }

    fn update_list(&mut self, list: &ReadingList) -> StorageResult<()> {
        self.changed = true;
        let entry_count = self
            .state
            .lists
            .get(&list.id)
            .map(|l| l.entry_count)
            .ok_or(StorageError::ListNotFound(list.id))?;
        if list.is_active() && self.name_taken(&list.canonical_name, Some(list.id)) {
            return Err(StorageError::Constraint(format!(
                "list name already in use: {}",
                list.canonical_name
            )));
        }
        let mut stored = list.clone();
        stored.entry_count = entry_count;
        self.state.lists.insert(list.id, stored);
        Ok(())
    }

    fn delete_list(&mut self, id: ListId) -> StorageResult<()> {
        self.changed = true;
        self.state
            .lists
            .remove(&id)
            .ok_or(StorageError::ListNotFound(id))?;
        self.state.entries.retain(|_, e| e.list_id != id);
        Ok(())
    }

    fn entries(&self, filter: &EntryFilter) -> StorageResult<Vec<ReadingListEntry>> {
        Ok(self
            .state
            .entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    fn entry(&self, id: EntryId) -> StorageResult<Option<ReadingListEntry>> {
        Ok(self.state.entries.get(&id).cloned())
    }

    fn insert_entry(&mut self, new: NewEntry) -> StorageResult<ReadingListEntry> {
        self.changed = true;
        let list = self
            .state
            .lists
            .get(&new.list_id)
            .ok_or(StorageError::ListNotFound(new.list_id))?;
        if !list.is_active() {
            return Err(StorageError::Constraint(format!(
                "list {} is deleted",
                new.list_id
            )));
        }
        let duplicate = self.state.entries.values().any(|e| {
            e.list_id == new.list_id && e.is_active() && e.article_key == new.article_key
        });
        if duplicate {
            return Err(StorageError::Constraint(format!(
                "article {} already in list {}",
                new.article_key, new.list_id
            )));
        }

        let id = self.state.next_entry_id;
        self.state.next_entry_id += 1;
        let entry = ReadingListEntry {
            id,
            remote_id: new.remote_id,
            list_id: new.list_id,
            article_key: new.article_key,
            display_title: new.display_title,
            created_date: new.created_date,
            updated_date: new.created_date,
            flags: new.flags,
        };
        self.state.entries.insert(id, entry.clone());
        self.recount(entry.list_id);
        Ok(entry)
    }

    fn update_entry(&mut self, entry: &ReadingListEntry) -> StorageResult<()> {
        self.changed = true;
        let previous = self
            .state
            .entries
            .get(&entry.id)
            .map(|e| e.list_id)
            .ok_or(StorageError::EntryNotFound(entry.id))?;
        self.state.entries.insert(entry.id, entry.clone());
        self.recount(previous);
        if previous != entry.list_id {
            self.recount(entry.list_id);
        }
        Ok(())
    }

    fn delete_entry(&mut self, id: EntryId) -> StorageResult<()> {
        self.changed = true;
        let entry = self
            .state
            .entries
            .remove(&id)
            .ok_or(StorageError::EntryNotFound(id))?;
        self.recount(entry.list_id);
        Ok(())
    }

    fn article(&self, key: &ArticleKey) -> StorageResult<Option<Article>> {
        Ok(self.state.articles.get(key).cloned())
    }

    fn articles(&self) -> StorageResult<Vec<Article>> {
        Ok(self.state.articles.values().cloned().collect())
    }

    fn upsert_article(&mut self, article: Article) -> StorageResult<()> {
        self.changed = true;
        self.state.articles.insert(article.key.clone(), article);
        Ok(())
    }

    fn cursor(&self) -> StorageResult<SyncCursor> {
        Ok(self.state.cursor)
    }

    fn set_cursor(&mut self, cursor: SyncCursor) -> StorageResult<()> {
        self.changed = true;
        self.state.cursor = cursor;
        Ok(())
    }

    fn sync_enabled(&self) -> StorageResult<bool> {
        Ok(self.state.sync_enabled)
    }

    fn set_sync_enabled(&mut self, enabled: bool) -> StorageResult<()> {
        self.changed = true;
        self.state.sync_enabled = enabled;
        Ok(())
    }

    fn begin(&mut self) -> StorageResult<()> {
        self.checkpoint = Some(self.state.clone());
        self.changed = false;
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        let checkpoint = self.checkpoint.take().ok_or(StorageError::NoTransaction)?;
        if !std::mem::take(&mut self.changed) {
            return Ok(());
        }
        if let Err(err) = self.persist() {
            self.state = checkpoint;
            return Err(err);
        }
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.state = self.checkpoint.take().ok_or(StorageError::NoTransaction)?;
        self.changed = false;
        Ok(())
    }
}

/// Shared handle serializing access to a [`LocalStore`].
///
/// Every `read`/`write` call is one transaction: `write` commits when the
/// closure returns `Ok` and rolls back otherwise. The lock is never held
/// across an await point.
#[derive(Debug)]
pub struct Database<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for Database<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: LocalStore> Database<S> {
    /// Wrap a store.
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Run a read-only closure against the store.
    pub fn read<T, E>(&self, f: impl FnOnce(&S) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let store = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        f(&store)
    }

    /// Run a closure inside a transaction.
    pub fn write<T, E>(&self, f: impl FnOnce(&mut S) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let mut store = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        store.begin()?;
        match f(&mut store) {
            Ok(value) => {
                store.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = store.rollback() {
                    tracing::error!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
