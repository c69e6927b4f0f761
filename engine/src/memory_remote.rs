//! In-process reading list service.
//!
//! [`MemoryRemote`] follows the same rules as the reference server (soft
//! deletes, duplicate name rejection, idempotent entry adds) and records every
//! call so tests can assert on network traffic. Failures can be injected per
//! call kind, and calls can be held until released.

use crate::{
    api::{
        parse_timestamp, ApiResult, ArticleSummary, ChangeSet, RemoteApi, RemoteEntry, RemoteList,
        DUPLICATE_LIST_CODE, REMOTE_DEFAULT_LIST_NAME,
    },
    error::ApiError,
    normalize::name_key,
    ArticleKey, RemoteId,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;

/// Kinds of remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Setup,
    Teardown,
    CreateList,
    UpdateList,
    DeleteList,
    AddEntry,
    RemoveEntry,
    ChangesSince,
    ArticleSummary,
}

#[derive(Debug)]
struct RemoteState {
    set_up: bool,
    offline: bool,
    next_id: RemoteId,
    clock: DateTime<Utc>,
    lists: BTreeMap<RemoteId, RemoteList>,
    entries: BTreeMap<RemoteId, RemoteEntry>,
    /// Undecodable records, always part of the feed
    raw_lists: Vec<serde_json::Value>,
    raw_entries: Vec<serde_json::Value>,
    summaries: HashMap<ArticleKey, ArticleSummary>,
    calls: HashMap<Call, usize>,
    failures: HashMap<Call, ApiError>,
    holds: HashMap<Call, Arc<Semaphore>>,
}

impl RemoteState {
    /// Strictly increasing modification time.
    fn tick(&mut self) -> String {
        self.clock += Duration::seconds(1);
        self.clock.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn allocate_id(&mut self) -> RemoteId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn require_set_up(&self) -> ApiResult<()> {
        if self.set_up {
            Ok(())
        } else {
            Err(ApiError::NotSetUp)
        }
    }

    fn live_list(&mut self, id: RemoteId) -> ApiResult<&mut RemoteList> {
        self.lists
            .get_mut(&id)
            .filter(|l| !l.deleted)
            .ok_or_else(|| rejected(404, "readinglists-db-error-no-such-list", "no such list"))
    }

    fn insert_list(&mut self, name: &str, description: Option<&str>, default: bool) -> RemoteId {
        let id = self.allocate_id();
        let updated = self.tick();
        self.lists.insert(
            id,
            RemoteList {
                id,
                name: Some(name.to_string()),
                description: description.map(str::to_string),
                default,
                deleted: false,
                updated: updated.clone(),
                created: Some(updated),
            },
        );
        id
    }
}

fn rejected(status: u16, code: &str, message: &str) -> ApiError {
    ApiError::Rejected {
        status,
        code: code.to_string(),
        message: message.to_string(),
    }
}

/// In-memory [`RemoteApi`] implementation.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// A remote that has not been set up yet.
    pub fn new() -> Self {
        let clock = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            state: Arc::new(Mutex::new(RemoteState {
                set_up: false,
                offline: false,
                next_id: 1,
                clock,
                lists: BTreeMap::new(),
                entries: BTreeMap::new(),
                raw_lists: Vec::new(),
                raw_entries: Vec::new(),
                summaries: HashMap::new(),
                calls: HashMap::new(),
                failures: HashMap::new(),
                holds: HashMap::new(),
            })),
        }
    }

    /// A remote already provisioned, holding only its default list.
    pub fn provisioned() -> Self {
        let remote = Self::new();
        {
            let mut state = remote.lock();
            state.set_up = true;
            state.insert_list(REMOTE_DEFAULT_LIST_NAME, None, true);
        }
        remote
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        // A panic while holding the lock only happens in a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the call, then apply held gates and injected failures.
    async fn enter(&self, call: Call) -> ApiResult<()> {
        let hold = {
            let mut state = self.lock();
            *state.calls.entry(call).or_default() += 1;
            state.holds.get(&call).cloned()
        };
        if let Some(gate) = hold {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let state = self.lock();
        if state.offline {
            return Err(ApiError::Unavailable("offline".into()));
        }
        if let Some(err) = state.failures.get(&call) {
            return Err(err.clone());
        }
        Ok(())
    }

    /// Number of calls of one kind.
    pub fn calls(&self, call: Call) -> usize {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Number of calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Calls that change remote state.
    pub fn write_calls(&self) -> usize {
        let state = self.lock();
        [
            Call::CreateList,
            Call::UpdateList,
            Call::DeleteList,
            Call::AddEntry,
            Call::RemoveEntry,
        ]
        .iter()
        .map(|c| state.calls.get(c).copied().unwrap_or(0))
        .sum()
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    /// Simulate a network outage.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fail every call of a kind with `err` until cleared.
    pub fn fail(&self, call: Call, err: ApiError) {
        self.lock().failures.insert(call, err);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Make calls of a kind wait until permits are added to the returned
    /// semaphore.
    pub fn hold(&self, call: Call) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.lock().holds.insert(call, Arc::clone(&gate));
        gate
    }

    /// Stop holding calls of a kind.
    pub fn release(&self, call: Call) {
        if let Some(gate) = self.lock().holds.remove(&call) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn is_set_up(&self) -> bool {
        self.lock().set_up
    }

    /// Non-deleted lists.
    pub fn lists(&self) -> Vec<RemoteList> {
        self.lock()
            .lists
            .values()
            .filter(|l| !l.deleted)
            .cloned()
            .collect()
    }

    /// Non-deleted entries.
    pub fn entries(&self) -> Vec<RemoteEntry> {
        self.lock()
            .entries
            .values()
            .filter(|e| !e.deleted)
            .cloned()
            .collect()
    }

    /// Non-deleted list with a matching name.
    pub fn list_named(&self, name: &str) -> Option<RemoteList> {
        let key = name_key(name);
        self.lists()
            .into_iter()
            .find(|l| l.name.as_deref().map(name_key).as_deref() == Some(key.as_str()))
    }

    /// Non-deleted entries of a list.
    pub fn entries_of(&self, list_id: RemoteId) -> Vec<RemoteEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.list_id == Some(list_id))
            .collect()
    }

    /// Create a list as another device would, without counting a call.
    pub fn seed_list(&self, name: &str, description: Option<&str>) -> RemoteId {
        self.lock().insert_list(name, description, false)
    }

    /// Add an entry as another device would, without counting a call.
    pub fn seed_entry(&self, list_id: RemoteId, key: &ArticleKey) -> RemoteId {
        let mut state = self.lock();
        let id = state.allocate_id();
        let updated = state.tick();
        let (project, title) = key
            .parts()
            .map(|(p, t)| (Some(p.to_string()), Some(t.to_string())))
            .unwrap_or((None, None));
        state.entries.insert(
            id,
            RemoteEntry {
                id,
                list_id: Some(list_id),
                article_key: None,
                project,
                title,
                deleted: false,
                updated,
            },
        );
        id
    }

    /// Delete a list as another device would.
    pub fn seed_delete_list(&self, id: RemoteId) {
        let mut state = self.lock();
        let updated = state.tick();
        if let Some(list) = state.lists.get_mut(&id) {
            list.deleted = true;
            list.updated = updated.clone();
        }
        for entry in state.entries.values_mut() {
            if entry.list_id == Some(id) && !entry.deleted {
                entry.deleted = true;
                entry.updated = updated.clone();
            }
        }
    }

    /// Rename a list as another device would.
    pub fn seed_rename_list(&self, id: RemoteId, name: &str) {
        let mut state = self.lock();
        let updated = state.tick();
        if let Some(list) = state.lists.get_mut(&id) {
            list.name = Some(name.to_string());
            list.updated = updated;
        }
    }

    /// Store a raw list record in the change feed.
    pub fn put_list(&self, list: RemoteList) {
        let mut state = self.lock();
        state.next_id = state.next_id.max(list.id + 1);
        state.lists.insert(list.id, list);
    }

    /// Store a raw entry record in the change feed.
    pub fn put_entry(&self, entry: RemoteEntry) {
        let mut state = self.lock();
        state.next_id = state.next_id.max(entry.id + 1);
        state.entries.insert(entry.id, entry);
    }

    /// Put an arbitrary JSON list record in the change feed.
    pub fn put_raw_list(&self, record: serde_json::Value) {
        self.lock().raw_lists.push(record);
    }

    /// Put an arbitrary JSON entry record in the change feed.
    pub fn put_raw_entry(&self, record: serde_json::Value) {
        self.lock().raw_entries.push(record);
    }

    /// Summary served for an article.
    pub fn put_summary(&self, key: ArticleKey, summary: ArticleSummary) {
        self.lock().summaries.insert(key, summary);
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn setup(&self) -> ApiResult<()> {
        self.enter(Call::Setup).await?;
        let mut state = self.lock();
        if !state.set_up {
            state.set_up = true;
            if !state.lists.values().any(|l| l.default && !l.deleted) {
                state.insert_list(REMOTE_DEFAULT_LIST_NAME, None, true);
            }
        }
        Ok(())
    }

    async fn teardown(&self) -> ApiResult<()> {
        self.enter(Call::Teardown).await?;
        let mut state = self.lock();
        let updated = state.tick();
        for list in state.lists.values_mut().filter(|l| !l.deleted) {
            list.deleted = true;
            list.updated = updated.clone();
        }
        for entry in state.entries.values_mut().filter(|e| !e.deleted) {
            entry.deleted = true;
            entry.updated = updated.clone();
        }
        state.set_up = false;
        Ok(())
    }

    async fn create_list(&self, name: &str, description: Option<&str>) -> ApiResult<RemoteId> {
        self.enter(Call::CreateList).await?;
        let mut state = self.lock();
        state.require_set_up()?;
        let key = name_key(name);
        let taken = state
            .lists
            .values()
            .any(|l| !l.deleted && l.name.as_deref().map(name_key).as_deref() == Some(key.as_str()));
        if taken {
            return Err(rejected(409, DUPLICATE_LIST_CODE, "duplicate list name"));
        }
        Ok(state.insert_list(name, description, false))
    }

    async fn update_list(
        &self,
        id: RemoteId,
        name: &str,
        description: Option<&str>,
    ) -> ApiResult<()> {
        self.enter(Call::UpdateList).await?;
        let mut state = self.lock();
        state.require_set_up()?;
        let updated = state.tick();
        let list = state.live_list(id)?;
        if list.default {
            return Err(rejected(
                400,
                "readinglists-db-error-cannot-update-default-list",
                "the default list cannot be updated",
            ));
        }
        list.name = Some(name.to_string());
        list.description = description.map(str::to_string);
        list.updated = updated;
        Ok(())
    }

    async fn delete_list(&self, id: RemoteId) -> ApiResult<()> {
        self.enter(Call::DeleteList).await?;
        let mut state = self.lock();
        state.require_set_up()?;
        let updated = state.tick();
        let list = state.live_list(id)?;
        if list.default {
            return Err(rejected(
                400,
                "readinglists-db-error-cannot-delete-default-list",
                "the default list cannot be deleted",
            ));
        }
        list.deleted = true;
        list.updated = updated.clone();
        for entry in state.entries.values_mut() {
            if entry.list_id == Some(id) && !entry.deleted {
                entry.deleted = true;
                entry.updated = updated.clone();
            }
        }
        Ok(())
    }

    async fn add_entry(
        &self,
        list_id: RemoteId,
        project: &str,
        title: &str,
    ) -> ApiResult<RemoteId> {
        self.enter(Call::AddEntry).await?;
        let mut state = self.lock();
        state.require_set_up()?;
        state.live_list(list_id)?;
        let existing = state.entries.values().find(|e| {
            !e.deleted
                && e.list_id == Some(list_id)
                && e.project.as_deref() == Some(project)
                && e.title.as_deref() == Some(title)
        });
        if let Some(existing) = existing {
            return Ok(existing.id);
        }
        let id = state.allocate_id();
        let updated = state.tick();
        state.entries.insert(
            id,
            RemoteEntry {
                id,
                list_id: Some(list_id),
                article_key: None,
                project: Some(project.to_string()),
                title: Some(title.to_string()),
                deleted: false,
                updated,
            },
        );
        Ok(id)
    }

    async fn remove_entry(&self, list_id: RemoteId, entry_id: RemoteId) -> ApiResult<()> {
        self.enter(Call::RemoveEntry).await?;
        let mut state = self.lock();
        state.require_set_up()?;
        let updated = state.tick();
        let entry = state
            .entries
            .get_mut(&entry_id)
            .filter(|e| !e.deleted && e.list_id == Some(list_id))
            .ok_or_else(|| rejected(404, "readinglists-db-error-no-such-entry", "no such entry"))?;
        entry.deleted = true;
        entry.updated = updated;
        Ok(())
    }

    async fn changes_since(&self, since: DateTime<Utc>) -> ApiResult<ChangeSet> {
        self.enter(Call::ChangesSince).await?;
        let state = self.lock();
        state.require_set_up()?;
        // Records with an unreadable timestamp are always reported.
        let newer = |updated: &str| parse_timestamp(updated).map_or(true, |t| t > since);
        let mut changes = ChangeSet::from_records(state.raw_lists.clone(), state.raw_entries.clone());
        changes.lists.extend(
            state
                .lists
                .values()
                .filter(|l| newer(&l.updated))
                .cloned(),
        );
        changes.entries.extend(
            state
                .entries
                .values()
                .filter(|e| newer(&e.updated))
                .cloned(),
        );
        Ok(changes)
    }

    async fn article_summary(&self, key: &ArticleKey) -> ApiResult<ArticleSummary> {
        self.enter(Call::ArticleSummary).await?;
        let state = self.lock();
        if let Some(summary) = state.summaries.get(key) {
            return Ok(summary.clone());
        }
        let (_, title) = key
            .parts()
            .ok_or_else(|| rejected(400, "invalid-key", "malformed article key"))?;
        Ok(ArticleSummary {
            title: title.to_string(),
            display_title: Some(title.replace('_', " ")),
            description: None,
            thumbnail_url: None,
        })
    }
}
