//! Reconciliation between the local store and the remote service.
//!
//! A cycle pushes local mutations (lists first, then entries) and, for a full
//! sync, pulls remote changes since the cursor afterwards.
//!
//! # Failure policy
//!
//! - A failed remote call leaves the record flagged; the next cycle retries.
//! - An unreachable remote aborts the cycle without touching any flag.
//! - A pull rejected because sync is not set up turns sync off, keeping all
//!   local data.
//! - A malformed remote record is skipped and logged.

use crate::{
    api::RemoteApi,
    error::{ErrorKind, ReadingListError, Result},
    queue::refresh_saved_state,
    status::{CycleKind, CycleReport, Phase, SyncStatus},
    store::{Database, EntryFilter, ListFilter, LocalStore},
    ArticleKey, SyncCursor, SyncFlags,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs sync cycles against a store and a remote.
pub struct Reconciler<S> {
    pub(crate) db: Database<S>,
    pub(crate) remote: Arc<dyn RemoteApi>,
    pub(crate) status: SyncStatus,
    pub(crate) max_concurrency: usize,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            remote: Arc::clone(&self.remote),
            status: self.status.clone(),
            max_concurrency: self.max_concurrency,
        }
    }
}

impl<S: LocalStore> Reconciler<S> {
    /// Create a reconciler. `max_concurrency` bounds remote calls in flight
    /// within a phase.
    pub fn new(
        db: Database<S>,
        remote: Arc<dyn RemoteApi>,
        status: SyncStatus,
        max_concurrency: usize,
    ) -> Self {
        Self {
            db,
            remote,
            status,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn database(&self) -> &Database<S> {
        &self.db
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// Whether sync with the remote is turned on.
    pub fn is_sync_enabled(&self) -> Result<bool> {
        self.db.read(|store| Ok(store.sync_enabled()?))
    }

    /// Push local mutations only.
    pub async fn update(&self) -> CycleReport {
        let mut report = CycleReport::start(CycleKind::Update);
        match self.push(&mut report).await {
            Ok(()) => self.finish(report.finish()),
            Err(err) => self.fail(report, err).await,
        }
    }

    /// Push local mutations, then merge remote changes.
    pub async fn sync(&self) -> CycleReport {
        let mut report = CycleReport::start(CycleKind::Sync);
        let result = match self.push(&mut report).await {
            Ok(()) => self.pull(&mut report).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => self.finish(report.finish()),
            Err(err) => self.fail(report, err).await,
        }
    }

    /// Local bookkeeping while sync is off: records deleted locally are
    /// purged, nothing is sent.
    pub fn local_only(&self) -> CycleReport {
        let mut report = CycleReport::start(CycleKind::LocalOnly);
        let purged = self.db.write(|store| -> Result<usize> {
            let lists = store.lists(&ListFilter::all().deleted_locally(true))?;
            let entries = store.entries(&EntryFilter::all().deleted_locally(true))?;
            let count = lists.len() + entries.len();
            for list in lists {
                store.delete_list(list.id)?;
            }
            for entry in entries {
                // Already gone when its list was purged above.
                if store.entry(entry.id)?.is_some() {
                    store.delete_entry(entry.id)?;
                }
            }
            Ok(count)
        });
        match purged {
            Ok(count) => {
                report.purged = count;
                self.finish(report.finish())
            }
            Err(err) => {
                warn!(error = %err, "local cleanup failed");
                self.finish(report.abort(err.kind()))
            }
        }
    }

    /// Turn sync on.
    ///
    /// Optionally purges remote lists first, provisions the remote, then
    /// either drops local lists or queues all of them for upload, resets the
    /// cursor and runs a full sync.
    pub async fn enable_sync(&self, delete_local: bool, delete_remote: bool) -> CycleReport {
        let mut report = CycleReport::start(CycleKind::EnableSync);
        if let Err(err) = self.provision(delete_remote).await {
            self.status
                .notify(err.kind(), format!("unable to turn on reading list sync: {err}"));
            return self.fail(report, err).await;
        }

        let reset = self.db.write(|store| -> Result<()> {
            if delete_local {
                delete_local_lists(store)?;
            } else {
                queue_everything_for_upload(store)?;
            }
            store.set_cursor(SyncCursor::new())?;
            store.set_sync_enabled(true)?;
            Ok(())
        });
        if let Err(err) = reset {
            return self.fail(report, err).await;
        }
        self.status.clear_record_errors();
        self.status.set_phase(Phase::Idle);
        info!(delete_local, delete_remote, "reading list sync enabled");

        let result = match self.push(&mut report).await {
            Ok(()) => self.pull(&mut report).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => self.finish(report.finish()),
            Err(err) => self.fail(report, err).await,
        }
    }

    /// Turn sync off, optionally purging remote and local lists.
    pub async fn disable_sync(&self, delete_local: bool, delete_remote: bool) -> CycleReport {
        let report = CycleReport::start(CycleKind::DisableSync);
        if delete_remote {
            if let Err(err) = self.remote.teardown().await {
                let err = ReadingListError::from(err);
                warn!(error = %err, "remote teardown failed");
                self.status
                    .notify(err.kind(), format!("unable to delete synced lists: {err}"));
            }
        }

        let result = self.db.write(|store| -> Result<()> {
            store.set_sync_enabled(false)?;
            if delete_local {
                delete_local_lists(store)?;
            }
            Ok(())
        });
        self.status.set_phase(Phase::Disabled);
        match result {
            Ok(()) => {
                info!(delete_local, delete_remote, "reading list sync disabled");
                self.finish(report.finish())
            }
            Err(err) => {
                warn!(error = %err, "disabling sync failed");
                self.finish(report.abort(err.kind()))
            }
        }
    }

    async fn provision(&self, delete_remote: bool) -> Result<()> {
        if delete_remote {
            match self.remote.teardown().await {
                Ok(()) | Err(crate::error::ApiError::NotSetUp) => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.remote.setup().await?;
        Ok(())
    }

    fn finish(&self, report: CycleReport) -> CycleReport {
        info!(
            kind = ?report.kind,
            outcome = ?report.outcome,
            lists_pushed = report.lists_pushed,
            entries_pushed = report.entries_pushed,
            purged = report.purged,
            lists_merged = report.lists_merged,
            entries_merged = report.entries_merged,
            skipped = report.skipped,
            failures = report.failures,
            "reading list cycle finished"
        );
        self.status.finish_cycle(report.clone());
        report
    }

    async fn fail(&self, report: CycleReport, err: ReadingListError) -> CycleReport {
        let kind = err.kind();
        match kind {
            ErrorKind::ServerSetupRequired => {
                warn!("reading list sync is not set up remotely; turning sync off");
                self.status.notify(
                    kind.clone(),
                    "Reading list sync was turned off because it is not set up for this account",
                );
                let aborted = report.abort(kind);
                self.disable_sync(false, false).await;
                self.finish(aborted)
            }
            ErrorKind::RemoteUnavailable => {
                info!("reading list service unavailable; cycle aborted");
                self.status.notify(kind.clone(), err.to_string());
                self.finish(report.abort(kind))
            }
            _ => {
                warn!(error = %err, "reading list cycle failed");
                self.status.notify(kind.clone(), err.to_string());
                self.finish(report.abort(kind))
            }
        }
    }
}

/// Hard delete every list except the default one, and empty the default.
fn delete_local_lists<S: LocalStore>(store: &mut S) -> Result<()> {
    let keys: BTreeSet<ArticleKey> = store
        .entries(&EntryFilter::all())?
        .into_iter()
        .map(|e| e.article_key)
        .collect();
    for list in store.lists(&ListFilter::all())? {
        if list.is_default {
            for entry in store.entries(&EntryFilter::all().in_list(list.id))? {
                store.delete_entry(entry.id)?;
            }
        } else {
            store.delete_list(list.id)?;
        }
    }
    refresh_saved_state(store, keys, chrono::Utc::now())?;
    Ok(())
}

/// Forget every remote identity and mark all live records for upload.
fn queue_everything_for_upload<S: LocalStore>(store: &mut S) -> Result<()> {
    for mut list in store.lists(&ListFilter::all())? {
        if list.flags.is_deleted_locally {
            store.delete_list(list.id)?;
            continue;
        }
        list.remote_id = None;
        if list.is_default {
            list.flags = SyncFlags::synced();
        } else {
            list.flags.touch();
        }
        store.update_list(&list)?;
    }
    for mut entry in store.entries(&EntryFilter::all())? {
        if entry.flags.is_deleted_locally {
            store.delete_entry(entry.id)?;
            continue;
        }
        entry.remote_id = None;
        entry.flags.touch();
        store.update_entry(&entry)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_remote::{Call, MemoryRemote};
    use crate::queue::MutationQueue;
    use crate::{Article, MemoryStore};
    use chrono::Utc;

    fn setup(remote: &MemoryRemote) -> Reconciler<MemoryStore> {
        let db = Database::new(MemoryStore::new());
        db.write(|store| -> Result<()> {
            store.set_sync_enabled(true)?;
            MutationQueue::new(store, Utc::now()).ensure_default_list()?;
            Ok(())
        })
        .unwrap();
        Reconciler::new(db, Arc::new(remote.clone()), SyncStatus::new(), 4)
    }

    #[tokio::test]
    async fn local_only_purges_without_network() {
        let remote = MemoryRemote::provisioned();
        let reconciler = setup(&remote);
        reconciler
            .db
            .write(|store| -> Result<()> {
                let mut queue = MutationQueue::new(store, Utc::now());
                let list = queue.create_list("Travel", None)?;
                queue.add_entry(list.id, &Article::new(ArticleKey::new("enwiki", "Giraffe")))?;
                queue.delete_list(list.id)?;
                Ok(())
            })
            .unwrap();

        let report = reconciler.local_only();
        assert_eq!(report.purged, 2);
        assert_eq!(remote.total_calls(), 0);
        let lists = reconciler
            .db
            .read(|store| store.lists(&ListFilter::all()))
            .unwrap();
        assert_eq!(lists.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_remote_aborts() {
        let remote = MemoryRemote::provisioned();
        remote.set_offline(true);
        let reconciler = setup(&remote);

        let report = reconciler.sync().await;
        assert!(report.is_aborted());
        assert_eq!(
            reconciler.status.notices()[0].kind,
            ErrorKind::RemoteUnavailable
        );
        assert!(reconciler.is_sync_enabled().unwrap());
    }

    #[tokio::test]
    async fn not_set_up_disables_sync() {
        let remote = MemoryRemote::new();
        let reconciler = setup(&remote);

        let report = reconciler.sync().await;
        assert!(report.is_aborted());
        assert!(!reconciler.is_sync_enabled().unwrap());
        assert_eq!(reconciler.status.phase(), Phase::Disabled);
        assert_eq!(remote.calls(Call::ChangesSince), 1);
    }

    #[tokio::test]
    async fn enable_sync_provisions_and_uploads() {
        let remote = MemoryRemote::new();
        let reconciler = setup(&remote);
        reconciler
            .db
            .write(|store| -> Result<()> {
                store.set_sync_enabled(false)?;
                MutationQueue::new(store, Utc::now()).create_list("Travel", None)?;
                Ok(())
            })
            .unwrap();

        let report = reconciler.enable_sync(false, false).await;
        assert!(!report.is_aborted());
        assert!(reconciler.is_sync_enabled().unwrap());
        assert!(remote.list_named("Travel").is_some());

        let default = reconciler
            .db
            .read(|store| store.lists(&ListFilter::all().default_list(true)))
            .unwrap();
        assert!(default[0].remote_id.is_some());
    }

    #[tokio::test]
    async fn enable_sync_offline_keeps_sync_off() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        let reconciler = setup(&remote);
        reconciler
            .db
            .write(|store| store.set_sync_enabled(false))
            .unwrap();

        let report = reconciler.enable_sync(false, false).await;
        assert!(report.is_aborted());
        assert!(!reconciler.is_sync_enabled().unwrap());
    }

    #[tokio::test]
    async fn disable_sync_with_local_delete_keeps_default_list() {
        let remote = MemoryRemote::provisioned();
        let reconciler = setup(&remote);
        reconciler
            .db
            .write(|store| -> Result<()> {
                let mut queue = MutationQueue::new(store, Utc::now());
                let default = queue.ensure_default_list()?;
                queue.add_entry(default.id, &Article::new(ArticleKey::new("enwiki", "Giraffe")))?;
                queue.create_list("Travel", None)?;
                Ok(())
            })
            .unwrap();

        reconciler.disable_sync(true, true).await;
        assert!(!reconciler.is_sync_enabled().unwrap());
        assert!(!remote.is_set_up());

        let (lists, entries) = reconciler
            .db
            .read(|store| -> Result<_> {
                Ok((
                    store.lists(&ListFilter::all())?,
                    store.entries(&EntryFilter::all())?,
                ))
            })
            .unwrap();
        assert_eq!(lists.len(), 1);
        assert!(lists[0].is_default);
        assert!(entries.is_empty());
    }
}
