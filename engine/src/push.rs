//! Push phase: send local mutations to the remote.
//!
//! Lists go first and are joined before any entry is sent, because an entry
//! create needs the remote id of its list. Within a phase the remote calls
//! run concurrently up to the configured cap, and each result is written in
//! its own transaction so partial progress survives a crash.

use crate::{
    api::{ApiResult, DUPLICATE_LIST_CODE},
    error::{ApiError, ErrorKind, ReadingListError, Result},
    queue::refresh_saved_state,
    reconcile::Reconciler,
    status::{CycleReport, Phase},
    store::{EntryFilter, ListFilter, LocalStore},
    EntryId, ListId, RemoteId, Revision,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

/// Remote call needed to push one list.
#[derive(Debug, Clone, PartialEq)]
enum ListPush {
    Create {
        name: String,
        description: Option<String>,
    },
    Update {
        remote_id: RemoteId,
        name: String,
        description: Option<String>,
    },
    Delete {
        remote_id: RemoteId,
    },
}

/// Remote call needed to push one entry.
#[derive(Debug, Clone, PartialEq)]
enum EntryPush {
    Add {
        list_remote_id: RemoteId,
        project: String,
        title: String,
    },
    Remove {
        list_remote_id: RemoteId,
        remote_id: RemoteId,
    },
}

/// What to do with a dirty record before any network call.
enum Plan<T> {
    /// Send to the remote
    Send(T),
    /// Delete locally, the remote never saw it or can never accept it
    Purge,
    /// Nothing to send, clear the pending flag
    Settle,
    /// Leave queued for a later cycle
    Wait,
}

impl<S: LocalStore> Reconciler<S> {
    /// Push every pending list, then every pending entry.
    pub async fn push(&self, report: &mut CycleReport) -> Result<()> {
        self.status.set_phase(Phase::Pushing);
        self.push_lists(report).await?;
        self.push_entries(report).await
    }

    async fn push_lists(&self, report: &mut CycleReport) -> Result<()> {
        let dirty = self.db.read(|store| store.lists(&ListFilter::dirty()))?;
        let mut tasks = Vec::new();
        for list in dirty {
            let plan = if list.is_default {
                // The default list is matched to the remote one during pull.
                if list.remote_id.is_some() {
                    Plan::Settle
                } else {
                    Plan::Wait
                }
            } else if list.canonical_name.is_empty() {
                Plan::Purge
            } else {
                match (list.remote_id, list.flags.is_deleted_locally) {
                    (None, true) => Plan::Purge,
                    (None, false) => Plan::Send(ListPush::Create {
                        name: list.canonical_name.clone(),
                        description: list.description.clone(),
                    }),
                    (Some(remote_id), true) => Plan::Send(ListPush::Delete { remote_id }),
                    (Some(remote_id), false) => Plan::Send(ListPush::Update {
                        remote_id,
                        name: list.canonical_name.clone(),
                        description: list.description.clone(),
                    }),
                }
            };

            match plan {
                Plan::Send(task) => tasks.push((list.id, list.flags.revision, task)),
                Plan::Purge => {
                    debug!(list_id = list.id, "purging list that never reached the remote");
                    self.db.write(|store| store.delete_list(list.id))?;
                    report.purged += 1;
                }
                Plan::Settle => {
                    self.db.write(|store| settle_list(store, list.id, list.flags.revision))?;
                }
                Plan::Wait => {}
            }
        }

        let mut unavailable = false;
        let remote = &self.remote;
        let mut results = stream::iter(tasks)
            .map(move |(list_id, revision, task)| async move {
                let outcome = match &task {
                    ListPush::Create { name, description } => remote
                        .create_list(name, description.as_deref())
                        .await
                        .map(Some),
                    ListPush::Update {
                        remote_id,
                        name,
                        description,
                    } => remote
                        .update_list(*remote_id, name, description.as_deref())
                        .await
                        .map(|()| None),
                    ListPush::Delete { remote_id } => {
                        already_gone(remote.delete_list(*remote_id).await).map(|()| None)
                    }
                };
                (list_id, revision, task, outcome)
            })
            .buffer_unordered(self.max_concurrency);

        while let Some((list_id, revision, task, outcome)) = results.next().await {
            match outcome {
                Ok(created) => {
                    let applied = self.db.write(|store| -> Result<()> {
                        match task {
                            ListPush::Delete { .. } => {
                                let Some(mut list) = store.list(list_id)? else {
                                    return Ok(());
                                };
                                if list.flags.revision != revision && list.is_active() {
                                    // Restored while the delete was in flight.
                                    list.remote_id = None;
                                    store.update_list(&list)?;
                                } else {
                                    store.delete_list(list_id)?;
                                }
                            }
                            ListPush::Create { .. } | ListPush::Update { .. } => {
                                let Some(mut list) = store.list(list_id)? else {
                                    return Ok(());
                                };
                                if let Some(remote_id) = created {
                                    list.remote_id = Some(remote_id);
                                }
                                if list.flags.revision == revision {
                                    list.flags.is_updated_locally = false;
                                }
                                store.update_list(&list)?;
                            }
                        }
                        Ok(())
                    });
                    match applied {
                        Ok(()) => {
                            report.lists_pushed += 1;
                            self.status.clear_list_error(list_id);
                        }
                        Err(err) => {
                            warn!(list_id, error = %err, "failed to record list push");
                            report.failures += 1;
                        }
                    }
                }
                Err(err) => {
                    unavailable |= err.is_unavailable();
                    let kind = list_failure_kind(&task, &err);
                    warn!(list_id, error = %err, ?kind, "list push failed");
                    self.status.record_list_error(list_id, kind);
                    report.failures += 1;
                }
            }
        }

        if unavailable {
            return Err(ReadingListError::RemoteUnavailable);
        }
        Ok(())
    }

    async fn push_entries(&self, report: &mut CycleReport) -> Result<()> {
        let dirty = self.db.read(|store| store.entries(&EntryFilter::dirty()))?;
        let mut tasks = Vec::new();
        for entry in dirty {
            let list = self.db.read(|store| store.list(entry.list_id))?;
            let plan = match list {
                None => Plan::Purge,
                // The list deletion covers its entries.
                Some(list) if list.flags.is_deleted_locally && list.remote_id.is_some() => {
                    Plan::Wait
                }
                Some(list) => match (entry.article_key.parts(), entry.flags.is_deleted_locally) {
                    (None, _) => Plan::Purge,
                    (Some(_), true) => match (entry.remote_id, list.remote_id) {
                        (Some(remote_id), Some(list_remote_id)) => Plan::Send(EntryPush::Remove {
                            list_remote_id,
                            remote_id,
                        }),
                        _ => Plan::Purge,
                    },
                    (Some((project, title)), false) => match (entry.remote_id, list.remote_id) {
                        // Entries have no remote update.
                        (Some(_), _) => Plan::Settle,
                        (None, Some(list_remote_id)) => Plan::Send(EntryPush::Add {
                            list_remote_id,
                            project: project.to_string(),
                            title: title.to_string(),
                        }),
                        (None, None) => Plan::Wait,
                    },
                },
            };

            match plan {
                Plan::Send(task) => tasks.push((entry.id, entry.flags.revision, task)),
                Plan::Purge => {
                    debug!(entry_id = entry.id, "purging entry that cannot be pushed");
                    self.db.write(|store| store.delete_entry(entry.id))?;
                    report.purged += 1;
                }
                Plan::Settle => {
                    self.db.write(|store| settle_entry(store, entry.id, entry.flags.revision))?;
                }
                Plan::Wait => {
                    debug!(entry_id = entry.id, "entry waits for its list");
                }
            }
        }

        let mut unavailable = false;
        let remote = &self.remote;
        let mut results = stream::iter(tasks)
            .map(move |(entry_id, revision, task)| async move {
                let outcome = match &task {
                    EntryPush::Add {
                        list_remote_id,
                        project,
                        title,
                    } => remote
                        .add_entry(*list_remote_id, project, title)
                        .await
                        .map(Some),
                    EntryPush::Remove {
                        list_remote_id,
                        remote_id,
                    } => already_gone(remote.remove_entry(*list_remote_id, *remote_id).await)
                        .map(|()| None),
                };
                (entry_id, revision, task, outcome)
            })
            .buffer_unordered(self.max_concurrency);

        while let Some((entry_id, revision, task, outcome)) = results.next().await {
            match outcome {
                Ok(created) => {
                    let applied = self.db.write(|store| -> Result<()> {
                        match task {
                            EntryPush::Remove { .. } => {
                                let Some(mut entry) = store.entry(entry_id)? else {
                                    return Ok(());
                                };
                                if entry.flags.revision != revision && entry.is_active() {
                                    // Re-added while the remove was in flight: the
                                    // remote copy is gone, so the next push adds it.
                                    entry.remote_id = None;
                                    store.update_entry(&entry)?;
                                } else {
                                    store.delete_entry(entry_id)?;
                                    refresh_saved_state(store, [entry.article_key], Utc::now())?;
                                }
                            }
                            EntryPush::Add { .. } => {
                                let Some(mut entry) = store.entry(entry_id)? else {
                                    return Ok(());
                                };
                                entry.remote_id = created;
                                if entry.flags.revision == revision {
                                    entry.flags.is_updated_locally = false;
                                }
                                store.update_entry(&entry)?;
                            }
                        }
                        Ok(())
                    });
                    match applied {
                        Ok(()) => {
                            report.entries_pushed += 1;
                            self.status.clear_entry_error(entry_id);
                        }
                        Err(err) => {
                            warn!(entry_id, error = %err, "failed to record entry push");
                            report.failures += 1;
                        }
                    }
                }
                Err(err) => {
                    unavailable |= err.is_unavailable();
                    let kind = match task {
                        EntryPush::Add { .. } => ErrorKind::AddEntryFailed,
                        EntryPush::Remove { .. } => ErrorKind::RemoveEntryFailed,
                    };
                    warn!(entry_id, error = %err, ?kind, "entry push failed");
                    self.status.record_entry_error(entry_id, kind);
                    report.failures += 1;
                }
            }
        }

        if unavailable {
            return Err(ReadingListError::RemoteUnavailable);
        }
        Ok(())
    }
}

/// A delete of something the remote no longer has counts as done.
fn already_gone(result: ApiResult<()>) -> ApiResult<()> {
    match result {
        Err(ApiError::Rejected { status: 404, .. }) => Ok(()),
        other => other,
    }
}

fn list_failure_kind(task: &ListPush, err: &ApiError) -> ErrorKind {
    match task {
        ListPush::Create { name, .. } if err.code() == Some(DUPLICATE_LIST_CODE) => {
            ErrorKind::ListNameConflict(name.clone())
        }
        ListPush::Create { .. } => ErrorKind::CreateFailed,
        ListPush::Update { .. } => ErrorKind::UpdateFailed,
        ListPush::Delete { .. } => ErrorKind::DeleteFailed,
    }
}

fn settle_list<S: LocalStore>(store: &mut S, list_id: ListId, revision: Revision) -> Result<()> {
    if let Some(mut list) = store.list(list_id)? {
        if list.flags.revision == revision {
            list.flags.is_updated_locally = false;
            store.update_list(&list)?;
        }
    }
    Ok(())
}

fn settle_entry<S: LocalStore>(store: &mut S, entry_id: EntryId, revision: Revision) -> Result<()> {
    if let Some(mut entry) = store.entry(entry_id)? {
        if entry.flags.revision == revision {
            entry.flags.is_updated_locally = false;
            store.update_entry(&entry)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_remote::{Call, MemoryRemote};
    use crate::queue::MutationQueue;
    use crate::status::{CycleKind, SyncStatus};
    use crate::store::Database;
    use crate::{Article, ArticleKey, MemoryStore};
    use std::sync::Arc;

    fn reconciler(remote: &MemoryRemote) -> Reconciler<MemoryStore> {
        let db = Database::new(MemoryStore::new());
        db.write(|store| store.set_sync_enabled(true)).unwrap();
        Reconciler::new(db, Arc::new(remote.clone()), SyncStatus::new(), 4)
    }

    fn giraffe() -> Article {
        Article::new(ArticleKey::new("enwiki", "Giraffe"))
    }

    #[tokio::test]
    async fn creates_lists_then_entries() {
        let remote = MemoryRemote::provisioned();
        let r = reconciler(&remote);
        let list_id = r
            .db
            .write(|store| -> Result<ListId> {
                let mut queue = MutationQueue::new(store, Utc::now());
                let list = queue.create_list("Travel", Some("trips"))?;
                queue.add_entry(list.id, &giraffe())?;
                Ok(list.id)
            })
            .unwrap();

        let mut report = CycleReport::start(CycleKind::Update);
        r.push(&mut report).await.unwrap();
        assert_eq!(report.lists_pushed, 1);
        assert_eq!(report.entries_pushed, 1);

        let list = r.db.read(|s| s.list(list_id)).unwrap().unwrap();
        let remote_list = remote.list_named("Travel").unwrap();
        assert_eq!(list.remote_id, Some(remote_list.id));
        assert!(!list.flags.is_updated_locally);
        assert_eq!(remote.entries_of(remote_list.id).len(), 1);
    }

    #[tokio::test]
    async fn failed_create_stays_queued() {
        let remote = MemoryRemote::provisioned();
        remote.fail(
            Call::CreateList,
            ApiError::Rejected {
                status: 500,
                code: "boom".into(),
                message: "boom".into(),
            },
        );
        let r = reconciler(&remote);
        let list = r
            .db
            .write(|s| MutationQueue::new(s, Utc::now()).create_list("Travel", None))
            .unwrap();

        let mut report = CycleReport::start(CycleKind::Update);
        r.push(&mut report).await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(r.status.list_error(list.id), Some(ErrorKind::CreateFailed));

        let stored = r.db.read(|s| s.list(list.id)).unwrap().unwrap();
        assert!(stored.flags.is_updated_locally);
        assert!(stored.remote_id.is_none());
    }

    #[tokio::test]
    async fn entries_wait_for_list_identity() {
        let remote = MemoryRemote::provisioned();
        remote.fail(Call::CreateList, ApiError::InvalidResponse("bad".into()));
        let r = reconciler(&remote);
        r.db.write(|store| -> Result<()> {
            let mut queue = MutationQueue::new(store, Utc::now());
            let list = queue.create_list("Travel", None)?;
            queue.add_entry(list.id, &giraffe())?;
            Ok(())
        })
        .unwrap();

        let mut report = CycleReport::start(CycleKind::Update);
        r.push(&mut report).await.unwrap();
        assert_eq!(remote.calls(Call::AddEntry), 0);

        let pending = r.db.read(|s| s.entries(&EntryFilter::dirty())).unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn offline_aborts_before_entries() {
        let remote = MemoryRemote::provisioned();
        let r = reconciler(&remote);
        r.db.write(|store| -> Result<()> {
            let mut queue = MutationQueue::new(store, Utc::now());
            let list = queue.create_list("Travel", None)?;
            queue.add_entry(list.id, &giraffe())?;
            Ok(())
        })
        .unwrap();
        remote.set_offline(true);

        let mut report = CycleReport::start(CycleKind::Update);
        let err = r.push(&mut report).await.unwrap_err();
        assert!(matches!(err, ReadingListError::RemoteUnavailable));
        assert_eq!(remote.calls(Call::AddEntry), 0);
    }

    #[tokio::test]
    async fn edit_during_create_keeps_flag() {
        let remote = MemoryRemote::provisioned();
        let gate = remote.hold(Call::CreateList);
        let r = reconciler(&remote);
        let list = r
            .db
            .write(|s| MutationQueue::new(s, Utc::now()).create_list("Travel", None))
            .unwrap();

        let pusher = r.clone();
        let push = tokio::spawn(async move {
            let mut report = CycleReport::start(CycleKind::Update);
            pusher.push(&mut report).await
        });
        while remote.calls(Call::CreateList) == 0 {
            tokio::task::yield_now().await;
        }

        r.db.write(|s| {
            MutationQueue::new(s, Utc::now()).update_list(list.id, "Trips", None)
        })
        .unwrap();
        gate.add_permits(1);
        push.await.unwrap().unwrap();

        let stored = r.db.read(|s| s.list(list.id)).unwrap().unwrap();
        assert!(stored.remote_id.is_some());
        assert!(stored.flags.is_updated_locally);
        assert_eq!(stored.canonical_name, "Trips");
    }

    #[tokio::test]
    async fn readd_during_remove_is_kept() {
        let remote = MemoryRemote::provisioned();
        let r = reconciler(&remote);
        let (list, entry) = r
            .db
            .write(|store| -> Result<_> {
                let mut queue = MutationQueue::new(store, Utc::now());
                let list = queue.create_list("Travel", None)?;
                let entry = queue.add_entry(list.id, &giraffe())?;
                Ok((list, entry))
            })
            .unwrap();
        let entry = entry.unwrap();
        let mut report = CycleReport::start(CycleKind::Update);
        r.push(&mut report).await.unwrap();

        r.db.write(|s| MutationQueue::new(s, Utc::now()).remove_entry(entry.id))
            .unwrap();
        let gate = remote.hold(Call::RemoveEntry);
        let pusher = r.clone();
        let push = tokio::spawn(async move {
            let mut report = CycleReport::start(CycleKind::Update);
            pusher.push(&mut report).await
        });
        while remote.calls(Call::RemoveEntry) == 0 {
            tokio::task::yield_now().await;
        }

        let readded = r
            .db
            .write(|s| MutationQueue::new(s, Utc::now()).add_entry(list.id, &giraffe()))
            .unwrap();
        assert_eq!(readded.map(|e| e.id), Some(entry.id));
        gate.add_permits(1);
        push.await.unwrap().unwrap();

        let stored = r.db.read(|s| s.entry(entry.id)).unwrap().unwrap();
        assert!(stored.is_active());
        assert!(stored.remote_id.is_none());
        assert!(stored.flags.is_updated_locally);

        let mut report = CycleReport::start(CycleKind::Update);
        r.push(&mut report).await.unwrap();
        let remote_list = remote.list_named("Travel").unwrap();
        assert_eq!(remote.entries_of(remote_list.id).len(), 1);
        let article = r.db.read(|s| s.article(&giraffe().key)).unwrap().unwrap();
        assert!(article.is_saved());
    }

    #[tokio::test]
    async fn unpushable_records_are_purged() {
        let remote = MemoryRemote::provisioned();
        let r = reconciler(&remote);
        r.db.write(|store| -> Result<()> {
            let mut queue = MutationQueue::new(store, Utc::now());
            let list = queue.create_list("Travel", None)?;
            queue.add_entry(list.id, &giraffe())?;
            // Corrupt the key so it can never be pushed.
            let mut entry = store.entries(&EntryFilter::all())?.remove(0);
            entry.article_key = ArticleKey::from_raw("garbage");
            store.update_entry(&entry)?;
            Ok(())
        })
        .unwrap();

        let mut report = CycleReport::start(CycleKind::Update);
        r.push(&mut report).await.unwrap();
        assert_eq!(report.purged, 1);
        assert_eq!(remote.calls(Call::AddEntry), 0);
        assert!(r.db.read(|s| s.entries(&EntryFilter::all())).unwrap().is_empty());
    }

    #[tokio::test]
    async fn entry_delete_after_sync_removes_remote_entry() {
        let remote = MemoryRemote::provisioned();
        let r = reconciler(&remote);
        let entry = r
            .db
            .write(|store| -> Result<_> {
                let mut queue = MutationQueue::new(store, Utc::now());
                let list = queue.create_list("Travel", None)?;
                Ok(queue.add_entry(list.id, &giraffe())?)
            })
            .unwrap()
            .unwrap();
        let mut report = CycleReport::start(CycleKind::Update);
        r.push(&mut report).await.unwrap();

        r.db.write(|s| MutationQueue::new(s, Utc::now()).remove_entry(entry.id))
            .unwrap();
        let mut report = CycleReport::start(CycleKind::Update);
        r.push(&mut report).await.unwrap();

        assert_eq!(remote.calls(Call::RemoveEntry), 1);
        assert!(remote.entries().is_empty());
        assert!(r.db.read(|s| s.entry(entry.id)).unwrap().is_none());
    }
}
