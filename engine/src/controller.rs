//! Upward-facing API for reading lists.
//!
//! Every mutation commits to the local store before returning and then arms
//! a debounced update cycle. Remote propagation failures never surface here;
//! they show up on [`SyncStatus`] instead.

use crate::{
    api::RemoteApi,
    config::SyncConfig,
    error::{ReadingListError, Result},
    normalize::name_key,
    queue::MutationQueue,
    reconcile::Reconciler,
    scheduler::{SyncOperation, SyncScheduler},
    status::SyncStatus,
    store::{Database, EntryFilter, ListFilter, LocalStore},
    Article, ArticleKey, EntryId, ListId, ReadingList, ReadingListEntry,
};
use chrono::Utc;
use std::sync::Arc;

/// Reading lists backed by a local store and synced with a remote.
pub struct ReadingListsController<S> {
    db: Database<S>,
    scheduler: SyncScheduler<S>,
}

impl<S: LocalStore> ReadingListsController<S> {
    /// Open the controller, creating the default list if the store has none.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn open(store: S, remote: Arc<dyn RemoteApi>, config: &SyncConfig) -> Result<Self> {
        let db = Database::new(store);
        db.write(|store| MutationQueue::new(store, Utc::now()).ensure_default_list())?;
        let reconciler = Reconciler::new(
            db.clone(),
            remote,
            SyncStatus::new(),
            config.max_concurrency,
        );
        Ok(Self {
            db,
            scheduler: SyncScheduler::new(reconciler, config),
        })
    }

    /// Run `f` as one transaction, then schedule an update if it succeeded.
    fn mutate<T>(&self, f: impl FnOnce(&mut MutationQueue<'_, S>) -> Result<T>) -> Result<T> {
        let value = self.db.write(|store| f(&mut MutationQueue::new(store, Utc::now())))?;
        self.scheduler.schedule_update();
        Ok(value)
    }

    /// Create a list holding `articles`.
    pub fn create_list(
        &self,
        name: &str,
        description: Option<&str>,
        articles: &[Article],
    ) -> Result<ReadingList> {
        let list_id = self.mutate(|queue| {
            let list = queue.create_list(name, description)?;
            for article in articles {
                queue.add_entry(list.id, article)?;
            }
            Ok(list.id)
        })?;
        self.list(list_id)
    }

    /// Rename or re-describe a list.
    pub fn update_list(
        &self,
        list_id: ListId,
        name: &str,
        description: Option<&str>,
    ) -> Result<ReadingList> {
        self.mutate(|queue| queue.update_list(list_id, name, description))
    }

    /// Delete lists and their entries. Fails as a whole with
    /// [`ReadingListError::DeleteFailed`] if any of them is the default list.
    pub fn delete_lists(&self, list_ids: &[ListId]) -> Result<()> {
        self.mutate(|queue| {
            for &list_id in list_ids {
                queue.delete_list(list_id)?;
            }
            Ok(())
        })
    }

    /// Add articles to a list, skipping those already in it.
    pub fn add_articles(
        &self,
        articles: &[Article],
        list_id: ListId,
    ) -> Result<Vec<ReadingListEntry>> {
        self.mutate(|queue| {
            let mut added = Vec::new();
            for article in articles {
                if let Some(entry) = queue.add_entry(list_id, article)? {
                    added.push(entry);
                }
            }
            Ok(added)
        })
    }

    /// Remove articles from a list. Returns how many entries were removed.
    pub fn remove_articles(&self, keys: &[ArticleKey], list_id: ListId) -> Result<usize> {
        self.mutate(|queue| queue.remove_articles(list_id, keys))
    }

    pub fn remove_entries(&self, entry_ids: &[EntryId]) -> Result<()> {
        self.mutate(|queue| {
            for &entry_id in entry_ids {
                queue.remove_entry(entry_id)?;
            }
            Ok(())
        })
    }

    /// Save an article to the default list.
    pub fn save(&self, article: &Article) -> Result<()> {
        let default = self.default_list()?;
        self.mutate(|queue| queue.add_entry(default.id, article).map(|_| ()))
    }

    /// Remove articles from every list.
    pub fn unsave(&self, keys: &[ArticleKey]) -> Result<usize> {
        let lists = self.lists()?;
        self.mutate(|queue| {
            let mut removed = 0;
            for list in &lists {
                removed += queue.remove_articles(list.id, keys)?;
            }
            Ok(removed)
        })
    }

    /// Remove every entry of every list.
    pub fn unsave_all(&self) -> Result<usize> {
        let entries = self.db.read(|store| store.entries(&EntryFilter::active()))?;
        self.mutate(|queue| {
            for entry in &entries {
                queue.remove_entry(entry.id)?;
            }
            Ok(entries.len())
        })
    }

    pub fn remove_articles_from_default_list(&self, keys: &[ArticleKey]) -> Result<usize> {
        let default = self.default_list()?;
        self.remove_articles(keys, default.id)
    }

    pub fn default_list(&self) -> Result<ReadingList> {
        self.db
            .read(|store| store.lists(&ListFilter::active().default_list(true)))?
            .into_iter()
            .next()
            .ok_or_else(|| ReadingListError::ListNotFound(crate::queue::DEFAULT_LIST_NAME.into()))
    }

    /// Look up an active list by name, ignoring case and composition.
    pub fn list_named(&self, name: &str) -> Result<ReadingList> {
        let key = name_key(name);
        self.db
            .read(|store| store.lists(&ListFilter::active().names([&key])))?
            .into_iter()
            .next()
            .ok_or_else(|| ReadingListError::ListNotFound(name.to_string()))
    }

    fn list(&self, list_id: ListId) -> Result<ReadingList> {
        self.db
            .read(|store| store.list(list_id))?
            .filter(ReadingList::is_active)
            .ok_or_else(|| ReadingListError::ListNotFound(list_id.to_string()))
    }

    /// Active lists, the default list first.
    pub fn lists(&self) -> Result<Vec<ReadingList>> {
        let mut lists = self.db.read(|store| store.lists(&ListFilter::active()))?;
        lists.sort_by_key(|l| (!l.is_default, l.id));
        Ok(lists)
    }

    /// Active entries of a list, oldest first.
    pub fn entries(&self, list_id: ListId) -> Result<Vec<ReadingListEntry>> {
        let mut entries = self
            .db
            .read(|store| store.entries(&EntryFilter::active().in_list(list_id)))?;
        entries.sort_by_key(|e| (e.created_date, e.id));
        Ok(entries)
    }

    /// Up to `limit` articles of a list that have a lead image, newest
    /// entries first.
    pub fn articles_with_lead_images(&self, list_id: ListId, limit: usize) -> Result<Vec<Article>> {
        let mut entries = self.entries(list_id)?;
        entries.reverse();
        self.db.read(|store| {
            let mut articles = Vec::new();
            for entry in entries {
                if articles.len() == limit {
                    break;
                }
                if let Some(article) = store.article(&entry.article_key)? {
                    if article.lead_image_url.is_some() {
                        articles.push(article);
                    }
                }
            }
            Ok(articles)
        })
    }

    pub fn is_sync_enabled(&self) -> Result<bool> {
        self.scheduler.reconciler().is_sync_enabled()
    }

    /// Turn sync on or off and wait for the transition to finish.
    pub async fn set_sync_enabled(&self, enabled: bool, delete_local: bool, delete_remote: bool) {
        self.scheduler
            .set_sync_enabled(enabled, delete_local, delete_remote)
            .await;
    }

    /// Start periodic syncing.
    pub fn start(&self) {
        self.scheduler.start();
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Push pending changes now and wait for the cycle.
    pub async fn background_update(&self) {
        self.scheduler.background_update().await;
    }

    /// Request a debounced full sync.
    pub fn request_sync(&self) {
        self.scheduler.schedule_sync();
    }

    /// Run a full sync now and wait for it.
    pub async fn sync_now(&self) {
        self.scheduler.cancel_pending();
        self.scheduler.enqueue(SyncOperation::Sync);
        self.scheduler.flush().await;
    }

    pub fn status(&self) -> &SyncStatus {
        self.scheduler.reconciler().status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory_remote::MemoryRemote;
    use crate::scheduler::PendingOperation;
    use crate::MemoryStore;

    fn controller(remote: &MemoryRemote) -> ReadingListsController<MemoryStore> {
        ReadingListsController::open(
            MemoryStore::new(),
            Arc::new(remote.clone()),
            &SyncConfig::default(),
        )
        .unwrap()
    }

    fn article(title: &str) -> Article {
        Article::new(ArticleKey::new("enwiki", title))
    }

    #[tokio::test]
    async fn opens_with_default_list() {
        let controller = controller(&MemoryRemote::new());
        let lists = controller.lists().unwrap();
        assert_eq!(lists.len(), 1);
        assert!(lists[0].is_default);
        assert!(!controller.is_sync_enabled().unwrap());
    }

    #[tokio::test]
    async fn create_list_with_articles() {
        let controller = controller(&MemoryRemote::new());
        let list = controller
            .create_list("Travel", Some("trips"), &[article("Giraffe"), article("Okapi")])
            .unwrap();
        assert_eq!(list.entry_count, 2);
        assert_eq!(controller.entries(list.id).unwrap().len(), 2);
        assert_eq!(
            controller.scheduler.pending(),
            PendingOperation::UpdateScheduled
        );

        let err = controller.create_list("TRAVEL", None, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ListNameConflict("TRAVEL".into()));
    }

    #[tokio::test]
    async fn default_list_cannot_be_deleted() {
        let controller = controller(&MemoryRemote::new());
        let default = controller.default_list().unwrap();
        let other = controller.create_list("Travel", None, &[]).unwrap();

        let err = controller.delete_lists(&[other.id, default.id]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeleteFailed);
        // The whole call rolled back.
        assert_eq!(controller.lists().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_named_ignores_case() {
        let controller = controller(&MemoryRemote::new());
        controller.create_list("Café", None, &[]).unwrap();
        assert!(controller.list_named("CAFE\u{301}").is_ok());

        let err = controller.list_named("Books").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ListNotFound("Books".into()));
    }

    #[tokio::test]
    async fn save_and_unsave() {
        let controller = controller(&MemoryRemote::new());
        let giraffe = article("Giraffe");
        let travel = controller.create_list("Travel", None, &[giraffe.clone()]).unwrap();
        controller.save(&giraffe).unwrap();
        controller.save(&giraffe).unwrap();

        let default = controller.default_list().unwrap();
        assert_eq!(default.entry_count, 1);

        assert_eq!(controller.unsave(&[giraffe.key.clone()]).unwrap(), 2);
        assert!(controller.entries(travel.id).unwrap().is_empty());
        let stored = controller
            .db
            .read(|store| store.article(&giraffe.key))
            .unwrap()
            .unwrap();
        assert!(!stored.is_saved());
    }

    #[tokio::test]
    async fn unsave_all_and_default_removal() {
        let controller = controller(&MemoryRemote::new());
        controller.save(&article("Giraffe")).unwrap();
        controller.save(&article("Okapi")).unwrap();
        controller.create_list("Travel", None, &[article("Zebra")]).unwrap();

        let removed = controller
            .remove_articles_from_default_list(&[ArticleKey::new("enwiki", "Okapi")])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(controller.unsave_all().unwrap(), 2);
    }

    #[tokio::test]
    async fn lead_images_newest_first() {
        let controller = controller(&MemoryRemote::new());
        let list = controller.create_list("Travel", None, &[]).unwrap();
        controller
            .add_articles(
                &[
                    article("Giraffe").with_lead_image("https://img.example/giraffe.jpg"),
                    article("Okapi"),
                    article("Zebra").with_lead_image("https://img.example/zebra.jpg"),
                ],
                list.id,
            )
            .unwrap();

        let articles = controller.articles_with_lead_images(list.id, 1).unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].display_title, "Zebra");
        assert_eq!(controller.articles_with_lead_images(list.id, 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn remove_entries_by_id() {
        let controller = controller(&MemoryRemote::new());
        let list = controller.create_list("Travel", None, &[article("Giraffe")]).unwrap();
        let entries = controller.entries(list.id).unwrap();

        controller.remove_entries(&[entries[0].id]).unwrap();
        assert!(controller.entries(list.id).unwrap().is_empty());
        let err = controller.remove_entries(&[entries[0].id]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoveEntryFailed);
    }
}
