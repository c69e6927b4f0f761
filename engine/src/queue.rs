//! Local mutation queue.
//!
//! Every user change is written to the store together with the flags that
//! queue it for the next push. Nothing here touches the network. The caller
//! owns the transaction, so flags and data commit together or not at all.

use crate::{
    error::{ReadingListError, Result, StorageResult},
    normalize::canonical_name,
    store::{EntryFilter, ListFilter, LocalStore},
    Article, ArticleKey, EntryId, ListId, NewEntry, NewList, ReadingList, ReadingListEntry,
    SyncFlags,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Name given to the default list when it is created locally.
pub const DEFAULT_LIST_NAME: &str = "Saved";

/// Records local changes as pending mutations.
pub struct MutationQueue<'a, S> {
    store: &'a mut S,
    now: DateTime<Utc>,
}

impl<'a, S: LocalStore> MutationQueue<'a, S> {
    /// Queue mutations against `store`, stamping them with `now`.
    pub fn new(store: &'a mut S, now: DateTime<Utc>) -> Self {
        Self { store, now }
    }

    /// The default list, created if the store has none.
    pub fn ensure_default_list(&mut self) -> Result<ReadingList> {
        let existing = self.store.lists(&ListFilter::all().default_list(true))?;
        if let Some(list) = existing.into_iter().next() {
            return Ok(list);
        }
        // Never pushed as a create: it is matched to the remote default list
        // on the next pull.
        let list = self.store.insert_list(NewList {
            remote_id: None,
            canonical_name: DEFAULT_LIST_NAME.to_string(),
            description: None,
            is_default: true,
            created_date: self.now,
            flags: SyncFlags::synced(),
        })?;
        tracing::debug!(list_id = list.id, "created default list");
        Ok(list)
    }

    /// Create a list pending upload.
    pub fn create_list(&mut self, name: &str, description: Option<&str>) -> Result<ReadingList> {
        let canonical = canonical_name(name);
        if canonical.is_empty() {
            return Err(ReadingListError::CreateFailed);
        }
        self.check_name_free(&canonical, None)?;

        let list = self.store.insert_list(NewList {
            remote_id: None,
            canonical_name: canonical,
            description: description.map(str::to_string),
            is_default: false,
            created_date: self.now,
            flags: SyncFlags::created_locally(),
        })?;
        tracing::debug!(list_id = list.id, name = %list.canonical_name, "list created locally");
        Ok(list)
    }

    /// Rename or re-describe a list.
    pub fn update_list(
        &mut self,
        list_id: ListId,
        name: &str,
        description: Option<&str>,
    ) -> Result<ReadingList> {
        let mut list = self.active_list(list_id, ReadingListError::UpdateFailed)?;
        if list.is_default {
            return Err(ReadingListError::UpdateFailed);
        }
        let canonical = canonical_name(name);
        if canonical.is_empty() {
            return Err(ReadingListError::UpdateFailed);
        }
        self.check_name_free(&canonical, Some(list_id))?;

        list.canonical_name = canonical;
        list.description = description.map(str::to_string);
        list.updated_date = self.now;
        list.flags.touch();
        self.store.update_list(&list)?;
        Ok(list)
    }

    /// Tombstone a list and its entries.
    pub fn delete_list(&mut self, list_id: ListId) -> Result<()> {
        let mut list = self.active_list(list_id, ReadingListError::DeleteFailed)?;
        if list.is_default {
            return Err(ReadingListError::DeleteFailed);
        }

        let entries = self
            .store
            .entries(&EntryFilter::active().in_list(list_id))?;
        let keys: BTreeSet<ArticleKey> = entries.iter().map(|e| e.article_key.clone()).collect();
        for mut entry in entries {
            entry.flags.tombstone();
            entry.updated_date = self.now;
            self.store.update_entry(&entry)?;
        }

        list.flags.tombstone();
        list.updated_date = self.now;
        self.store.update_list(&list)?;
        refresh_saved_state(&mut *self.store, keys, self.now)?;
        tracing::debug!(list_id, "list deleted locally");
        Ok(())
    }

    /// Add an article to a list. Returns `None` when it is already there.
    pub fn add_entry(
        &mut self,
        list_id: ListId,
        article: &Article,
    ) -> Result<Option<ReadingListEntry>> {
        self.active_list(list_id, ReadingListError::AddEntryFailed)?;
        if article.key.parts().is_none() {
            return Err(ReadingListError::AddEntryFailed);
        }

        let existing = self.store.entries(
            &EntryFilter::all()
                .in_list(list_id)
                .article_keys([article.key.clone()]),
        )?;
        if existing.iter().any(|e| e.is_active()) {
            return Ok(None);
        }

        if self.store.article(&article.key)?.is_none() {
            self.store.upsert_article(article.clone())?;
        }

        // Revive a pending removal instead of racing a remove and an add of
        // the same remote entry.
        let entry = match existing.into_iter().next() {
            Some(mut entry) => {
                entry.flags.is_deleted_locally = false;
                entry.flags.touch();
                entry.updated_date = self.now;
                self.store.update_entry(&entry)?;
                entry
            }
            None => self.store.insert_entry(NewEntry {
                remote_id: None,
                list_id,
                article_key: article.key.clone(),
                display_title: article.display_title.clone(),
                created_date: self.now,
                flags: SyncFlags::created_locally(),
            })?,
        };

        refresh_saved_state(&mut *self.store, [article.key.clone()], self.now)?;
        tracing::debug!(list_id, entry_id = entry.id, key = %entry.article_key, "entry added locally");
        Ok(Some(entry))
    }

    /// Tombstone an entry.
    pub fn remove_entry(&mut self, entry_id: EntryId) -> Result<()> {
        let mut entry = self
            .store
            .entry(entry_id)?
            .filter(|e| e.is_active())
            .ok_or(ReadingListError::RemoveEntryFailed)?;
        entry.flags.tombstone();
        entry.updated_date = self.now;
        self.store.update_entry(&entry)?;
        refresh_saved_state(&mut *self.store, [entry.article_key.clone()], self.now)?;
        tracing::debug!(entry_id, "entry removed locally");
        Ok(())
    }

    /// Tombstone the entries of `list_id` holding any of `keys`.
    pub fn remove_articles(&mut self, list_id: ListId, keys: &[ArticleKey]) -> Result<usize> {
        let entries = self.store.entries(
            &EntryFilter::active()
                .in_list(list_id)
                .article_keys(keys.iter().cloned()),
        )?;
        let removed = entries.len();
        for entry in entries {
            self.remove_entry(entry.id)?;
        }
        Ok(removed)
    }

    fn active_list(&self, list_id: ListId, missing: ReadingListError) -> Result<ReadingList> {
        self.store
            .list(list_id)?
            .filter(|l| l.is_active())
            .ok_or(missing)
    }

    fn check_name_free(&self, canonical: &str, except: Option<ListId>) -> Result<()> {
        let taken = self
            .store
            .lists(&ListFilter::active().names([canonical]))?
            .into_iter()
            .any(|l| Some(l.id) != except);
        if taken {
            return Err(ReadingListError::ListNameConflict(canonical.to_string()));
        }
        Ok(())
    }
}

/// Recompute the saved flag of articles after their list membership changed.
///
/// An article is saved while at least one non-deleted entry references it.
/// The first save date is kept while it stays saved.
pub fn refresh_saved_state<S, I>(store: &mut S, keys: I, now: DateTime<Utc>) -> StorageResult<()>
where
    S: LocalStore + ?Sized,
    I: IntoIterator<Item = ArticleKey>,
{
    for key in keys {
        let Some(mut article) = store.article(&key)? else {
            continue;
        };
        let referenced = !store
            .entries(&EntryFilter::active().article_keys([key]))?
            .is_empty();
        let saved_date = match (referenced, article.saved_date) {
            (true, Some(date)) => Some(date),
            (true, None) => Some(now),
            (false, _) => None,
        };
        if saved_date != article.saved_date {
            article.saved_date = saved_date;
            store.upsert_article(article)?;
        }
    }
    Ok(())
}
