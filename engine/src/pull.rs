//! Pull phase: merge remote changes since the cursor.
//!
//! Identity resolution for lists runs in two passes. Every remote list is
//! first matched by remote id. Only the remote lists left over are then
//! matched against local lists that never got a remote id: the default list
//! by its flag, any other list by normalized name. A remote id match can
//! therefore never be stolen by a name match. Entries follow the same scheme
//! with `(list, article key)` as the fallback key.

use crate::{
    api::{ChangeSet, RemoteEntry, RemoteList},
    error::{ApiError, ReadingListError, Result},
    normalize::{canonical_name, name_key},
    queue::refresh_saved_state,
    reconcile::Reconciler,
    status::{CycleReport, Phase},
    store::{EntryFilter, ListFilter, LocalStore},
    Article, ArticleKey, NewEntry, NewList, ReadingList, SyncCursor, SyncFlags,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Result of merging one remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    Applied,
    /// Not matched by this pass
    Unmatched,
    Skipped,
}

impl<S: LocalStore> Reconciler<S> {
    /// Fetch changes since the cursor, merge them and advance the cursor.
    pub async fn pull(&self, report: &mut CycleReport) -> Result<()> {
        self.status.set_phase(Phase::Pulling);
        let cursor = self.db.read(|store| store.cursor())?;
        let changes = self
            .remote
            .changes_since(cursor.query_from())
            .await
            .map_err(|err| match err {
                ApiError::NotSetUp => ReadingListError::ServerSetupRequired,
                ApiError::Unavailable(_) => ReadingListError::RemoteUnavailable,
                other => {
                    warn!(error = %other, "change feed request failed");
                    ReadingListError::GenericSyncError
                }
            })?;
        debug!(
            since = %cursor.to_iso8601(),
            lists = changes.lists.len(),
            entries = changes.entries.len(),
            "fetched remote changes"
        );

        let (lists, entries, seen) = validate(changes, report);
        self.merge_lists(&lists, report);
        self.merge_entries(&entries, report).await?;

        let advanced = self.db.write(|store| -> Result<bool> {
            let mut stored = store.cursor()?;
            let moved = stored.merge(&seen);
            if moved {
                store.set_cursor(stored)?;
            }
            Ok(moved)
        })?;
        if advanced {
            info!(cursor = %seen.to_iso8601(), "sync cursor advanced");
        }
        Ok(())
    }

    fn merge_lists(&self, remote: &[RemoteList], report: &mut CycleReport) {
        let mut leftover = Vec::new();
        for list in remote {
            match self.db.write(|store| merge_list_by_id(store, list)) {
                Ok(Merge::Unmatched) => leftover.push(list),
                Ok(Merge::Applied) => report.lists_merged += 1,
                Ok(Merge::Skipped) => report.skipped += 1,
                Err(err) => {
                    warn!(remote_id = list.id, error = %err, "failed to merge remote list");
                    report.skipped += 1;
                }
            }
        }

        for list in leftover {
            match self.db.write(|store| adopt_or_create_list(store, list)) {
                Ok(Merge::Applied) => report.lists_merged += 1,
                Ok(Merge::Unmatched) => {}
                Ok(Merge::Skipped) => report.skipped += 1,
                Err(err) => {
                    warn!(remote_id = list.id, error = %err, "failed to merge remote list");
                    report.skipped += 1;
                }
            }
        }
    }

    async fn merge_entries(&self, remote: &[RemoteEntry], report: &mut CycleReport) -> Result<()> {
        let mut leftover = Vec::new();
        for entry in remote {
            match self.db.write(|store| merge_entry_by_id(store, entry)) {
                Ok(Merge::Unmatched) => leftover.push(entry),
                Ok(Merge::Applied) => report.entries_merged += 1,
                Ok(Merge::Skipped) => report.skipped += 1,
                Err(err) => {
                    warn!(remote_id = entry.id, error = %err, "failed to merge remote entry");
                    report.skipped += 1;
                }
            }
        }

        // New entries need their article before they can be created.
        let wanted: BTreeSet<ArticleKey> = leftover
            .iter()
            .filter(|e| !e.deleted)
            .filter_map(|e| e.key())
            .collect();
        let missing: Vec<ArticleKey> = self.db.read(|store| -> Result<Vec<ArticleKey>> {
            let mut missing = Vec::new();
            for key in wanted {
                if store.article(&key)?.is_none() {
                    missing.push(key);
                }
            }
            Ok(missing)
        })?;
        let articles = self.fetch_articles(missing).await;

        for entry in leftover {
            match self.db.write(|store| adopt_or_create_entry(store, entry, &articles)) {
                Ok(Merge::Applied) => report.entries_merged += 1,
                Ok(Merge::Unmatched) => {}
                Ok(Merge::Skipped) => report.skipped += 1,
                Err(err) => {
                    warn!(remote_id = entry.id, error = %err, "failed to merge remote entry");
                    report.skipped += 1;
                }
            }
        }
        Ok(())
    }

    /// Summaries for new articles, falling back to a stub built from the key.
    async fn fetch_articles(&self, keys: Vec<ArticleKey>) -> BTreeMap<ArticleKey, Article> {
        let remote = &self.remote;
        stream::iter(keys)
            .map(move |key| async move {
                let article = match remote.article_summary(&key).await {
                    Ok(summary) => summary.into_article(key.clone()),
                    Err(err) => {
                        debug!(key = %key, error = %err, "summary unavailable, using stub article");
                        Article::new(key.clone())
                    }
                };
                (key, article)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await
    }
}

/// Drop undecodable records and records with unreadable timestamps, and
/// compute the new watermark.
fn validate(
    changes: ChangeSet,
    report: &mut CycleReport,
) -> (Vec<RemoteList>, Vec<RemoteEntry>, SyncCursor) {
    for record in &changes.malformed {
        let err = ReadingListError::MalformedRemoteRecord(record.clone());
        warn!(error = %err, "skipping malformed remote record");
        report.skipped += 1;
    }

    let mut seen = SyncCursor::new();
    let mut observe = |updated: Result<DateTime<Utc>>, report: &mut CycleReport| match updated {
        Ok(at) => {
            seen.advance(at);
            true
        }
        Err(err) => {
            warn!(error = %err, "skipping malformed remote record");
            report.skipped += 1;
            false
        }
    };

    let lists = changes
        .lists
        .into_iter()
        .filter(|l| observe(l.updated_at(), report))
        .collect();
    let entries = changes
        .entries
        .into_iter()
        .filter(|e| observe(e.updated_at(), report))
        .collect();
    (lists, entries, seen)
}

fn merge_list_by_id<S: LocalStore>(store: &mut S, remote: &RemoteList) -> Result<Merge> {
    let local = store
        .lists(&ListFilter::all().remote_ids([remote.id]))?
        .into_iter()
        .next();
    match local {
        Some(local) => apply_remote_list(store, local, remote),
        None => Ok(Merge::Unmatched),
    }
}

fn adopt_or_create_list<S: LocalStore>(store: &mut S, remote: &RemoteList) -> Result<Merge> {
    let unsynced = store.lists(&ListFilter::all().has_remote_id(false))?;
    let candidate = if remote.default {
        unsynced.into_iter().find(|l| l.is_default)
    } else {
        let key = remote.name.as_deref().map(name_key);
        let mut by_name: Vec<ReadingList> = unsynced
            .into_iter()
            .filter(|l| !l.is_default && Some(name_key(&l.canonical_name)) == key)
            .collect();
        // Prefer a live list over a tombstone of the same name.
        by_name.sort_by_key(|l| l.flags.is_deleted_locally);
        by_name.into_iter().next()
    };

    if let Some(local) = candidate {
        debug!(list_id = local.id, remote_id = remote.id, "adopting remote identity");
        return apply_remote_list(store, local, remote);
    }
    if remote.deleted {
        return Ok(Merge::Unmatched);
    }

    if remote.default {
        // A re-provisioned remote: the local default list takes the new id.
        if let Some(mut local) = store
            .lists(&ListFilter::all().default_list(true))?
            .into_iter()
            .next()
        {
            local.remote_id = Some(remote.id);
            store.update_list(&local)?;
            return Ok(Merge::Applied);
        }
    }

    let Some(name) = remote.name.as_deref().map(canonical_name).filter(|n| !n.is_empty()) else {
        warn!(remote_id = remote.id, "remote list without a name");
        return Ok(Merge::Skipped);
    };
    if !store.lists(&ListFilter::active().names([&name]))?.is_empty() {
        warn!(remote_id = remote.id, name = %name, "remote list collides with a synced local list");
        return Ok(Merge::Skipped);
    }

    let created = remote
        .created
        .as_deref()
        .and_then(crate::api::parse_timestamp)
        .or_else(|| remote.updated_at().ok())
        .unwrap_or_else(Utc::now);
    let list = store.insert_list(NewList {
        remote_id: Some(remote.id),
        canonical_name: name,
        description: remote.description.clone(),
        is_default: remote.default,
        created_date: created,
        flags: SyncFlags::synced(),
    })?;
    debug!(list_id = list.id, remote_id = remote.id, "created list from remote");
    Ok(Merge::Applied)
}

fn apply_remote_list<S: LocalStore>(
    store: &mut S,
    mut local: ReadingList,
    remote: &RemoteList,
) -> Result<Merge> {
    if remote.deleted {
        if local.is_default {
            // The default list outlives its remote counterpart.
            local.remote_id = None;
            store.update_list(&local)?;
            return Ok(Merge::Applied);
        }
        let keys: BTreeSet<ArticleKey> = store
            .entries(&EntryFilter::all().in_list(local.id))?
            .into_iter()
            .map(|e| e.article_key)
            .collect();
        store.delete_list(local.id)?;
        refresh_saved_state(store, keys, Utc::now())?;
        debug!(list_id = local.id, remote_id = remote.id, "list deleted remotely");
        return Ok(Merge::Applied);
    }

    local.remote_id = Some(remote.id);
    if local.flags.is_updated_locally {
        // Pending local edits win; the next push sends them.
        store.update_list(&local)?;
        return Ok(Merge::Applied);
    }

    if let Ok(updated) = remote.updated_at() {
        local.updated_date = updated;
    }
    local.description = remote.description.clone();
    if let Some(name) = remote.name.as_deref().map(canonical_name) {
        if !local.is_default && !name.is_empty() && name != local.canonical_name {
            let collides = store
                .lists(&ListFilter::active().names([&name]))?
                .iter()
                .any(|l| l.id != local.id);
            if collides {
                warn!(list_id = local.id, name = %name, "remote rename collides; keeping local name");
                local.flags.touch();
            } else {
                local.canonical_name = name;
            }
        }
    }
    store.update_list(&local)?;
    Ok(Merge::Applied)
}

fn merge_entry_by_id<S: LocalStore>(store: &mut S, remote: &RemoteEntry) -> Result<Merge> {
    let Some(mut local) = store
        .entries(&EntryFilter::all().remote_ids([remote.id]))?
        .into_iter()
        .next()
    else {
        return Ok(Merge::Unmatched);
    };
    if remote.deleted {
        if local.is_active() && local.flags.is_updated_locally {
            // Re-added locally after the remote removal: push it again.
            local.remote_id = None;
            store.update_entry(&local)?;
            debug!(entry_id = local.id, remote_id = remote.id, "keeping re-added entry");
            return Ok(Merge::Applied);
        }
        store.delete_entry(local.id)?;
        refresh_saved_state(store, [local.article_key], Utc::now())?;
        debug!(entry_id = local.id, remote_id = remote.id, "entry deleted remotely");
    }
    Ok(Merge::Applied)
}

fn adopt_or_create_entry<S: LocalStore>(
    store: &mut S,
    remote: &RemoteEntry,
    articles: &BTreeMap<ArticleKey, Article>,
) -> Result<Merge> {
    if remote.deleted {
        return Ok(Merge::Unmatched);
    }
    let Some(key) = remote.key() else {
        warn!(remote_id = remote.id, "remote entry without a usable article key");
        return Ok(Merge::Skipped);
    };
    let Some(list_remote_id) = remote.list_id else {
        warn!(remote_id = remote.id, "remote entry without a list");
        return Ok(Merge::Skipped);
    };
    let Some(list) = store
        .lists(&ListFilter::all().remote_ids([list_remote_id]))?
        .into_iter()
        .next()
    else {
        debug!(remote_id = remote.id, list_remote_id, "remote entry for unknown list");
        return Ok(Merge::Skipped);
    };

    let unsynced: Vec<_> = store
        .entries(
            &EntryFilter::all()
                .in_list(list.id)
                .article_keys([key.clone()])
                .has_remote_id(false),
        )?;
    if let Some(mut local) = unsynced.into_iter().next() {
        local.remote_id = Some(remote.id);
        if !local.flags.is_deleted_locally {
            // The remote already holds it: nothing left to push.
            local.flags.is_updated_locally = false;
        }
        store.update_entry(&local)?;
        return Ok(Merge::Applied);
    }

    if list.flags.is_deleted_locally {
        return Ok(Merge::Skipped);
    }
    let live = store.entries(
        &EntryFilter::active()
            .in_list(list.id)
            .article_keys([key.clone()]),
    )?;
    if !live.is_empty() {
        // Same article under a different remote id; keep the one we have.
        return Ok(Merge::Skipped);
    }

    let article = match store.article(&key)? {
        Some(article) => article,
        None => {
            let article = articles
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Article::new(key.clone()));
            store.upsert_article(article.clone())?;
            article
        }
    };
    let created = remote.updated_at().unwrap_or_else(|_| Utc::now());
    let entry = store.insert_entry(NewEntry {
        remote_id: Some(remote.id),
        list_id: list.id,
        article_key: key.clone(),
        display_title: article.display_title,
        created_date: created,
        flags: SyncFlags::synced(),
    })?;
    refresh_saved_state(store, [key], Utc::now())?;
    debug!(entry_id = entry.id, remote_id = remote.id, "created entry from remote");
    Ok(Merge::Applied)
}
