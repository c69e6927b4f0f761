//! Sync scheduling.
//!
//! A single worker task drains a FIFO channel of [`SyncOperation`]s, so at
//! most one cycle runs at a time. Local mutations do not enqueue work
//! directly: they arm a debounce timer, and only the timer that survives the
//! quiet interval enqueues a cycle. Re-arming cancels the previous timer,
//! never an in-flight cycle.

use crate::{config::SyncConfig, reconcile::Reconciler, store::LocalStore};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Work executed by the scheduler worker, in order.
#[derive(Debug)]
pub enum SyncOperation {
    /// Push local mutations
    Update,
    /// Push, then pull
    Sync,
    /// Purge local tombstones without touching the network
    LocalOnly,
    EnableSync {
        delete_local: bool,
        delete_remote: bool,
    },
    DisableSync {
        delete_local: bool,
        delete_remote: bool,
    },
    /// Resolved once every operation queued before it has run
    Barrier(oneshot::Sender<()>),
}

/// The cycle armed on the debounce timer, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PendingOperation {
    #[default]
    None,
    UpdateScheduled,
    SyncScheduled,
}

impl PendingOperation {
    /// Combine with a new request. A pending sync already covers an update.
    fn merge(self, requested: PendingOperation) -> PendingOperation {
        match (self, requested) {
            (PendingOperation::SyncScheduled, _) => PendingOperation::SyncScheduled,
            (_, requested) => requested,
        }
    }

    fn operation(self) -> Option<SyncOperation> {
        match self {
            PendingOperation::None => None,
            PendingOperation::UpdateScheduled => Some(SyncOperation::Update),
            PendingOperation::SyncScheduled => Some(SyncOperation::Sync),
        }
    }
}

#[derive(Debug, Default)]
struct TimerState {
    pending: PendingOperation,
    /// Bumped on every re-arm so a stale timer cannot fire.
    generation: u64,
    debounce: Option<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serializes sync cycles and owns the debounce and polling timers.
///
/// Must be created inside a Tokio runtime.
pub struct SyncScheduler<S> {
    reconciler: Reconciler<S>,
    sender: mpsc::UnboundedSender<SyncOperation>,
    timers: Arc<Mutex<TimerState>>,
    worker: JoinHandle<()>,
    debounce: Duration,
    poll_interval: Duration,
}

impl<S: LocalStore> SyncScheduler<S> {
    /// Spawn the worker for `reconciler`.
    pub fn new(reconciler: Reconciler<S>, config: &SyncConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(reconciler.clone(), receiver));
        Self {
            reconciler,
            sender,
            timers: Arc::new(Mutex::new(TimerState::default())),
            worker,
            debounce: config.debounce,
            poll_interval: config.poll_interval,
        }
    }

    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    /// Request a push-only cycle after the quiet interval.
    pub fn schedule_update(&self) {
        self.schedule(PendingOperation::UpdateScheduled);
    }

    /// Request a full cycle after the quiet interval. Supersedes a pending
    /// update.
    pub fn schedule_sync(&self) {
        self.schedule(PendingOperation::SyncScheduled);
    }

    /// The cycle currently waiting on the debounce timer.
    pub fn pending(&self) -> PendingOperation {
        lock(&self.timers).pending
    }

    fn schedule(&self, requested: PendingOperation) {
        let mut timers = lock(&self.timers);
        if let Some(timer) = timers.debounce.take() {
            timer.abort();
        }
        timers.pending = timers.pending.merge(requested);
        timers.generation += 1;

        let generation = timers.generation;
        let shared = Arc::clone(&self.timers);
        let sender = self.sender.clone();
        let delay = self.debounce;
        timers.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let operation = {
                let mut timers = lock(&shared);
                if timers.generation != generation {
                    return;
                }
                timers.debounce = None;
                std::mem::take(&mut timers.pending).operation()
            };
            if let Some(operation) = operation {
                debug!(?operation, "debounce elapsed");
                let _ = sender.send(operation);
            }
        }));
    }

    /// Drop a pending debounced cycle, if any.
    pub fn cancel_pending(&self) {
        let mut timers = lock(&self.timers);
        if let Some(timer) = timers.debounce.take() {
            timer.abort();
        }
        timers.pending = PendingOperation::None;
        timers.generation += 1;
    }

    /// Queue an operation behind everything already queued.
    pub fn enqueue(&self, operation: SyncOperation) {
        if self.sender.send(operation).is_err() {
            warn!("sync worker has stopped; operation dropped");
        }
    }

    /// Wait until every operation queued so far has run.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.enqueue(SyncOperation::Barrier(done));
        let _ = wait.await;
    }

    /// Start periodic syncing and run a first sync right away.
    pub fn start(&self) {
        let mut timers = lock(&self.timers);
        if timers.poller.is_some() {
            return;
        }
        let reconciler = self.reconciler.clone();
        let sender = self.sender.clone();
        let period = self.poll_interval;
        timers.poller = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match reconciler.is_sync_enabled() {
                    Ok(true) => {
                        if sender.send(SyncOperation::Sync).is_err() {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(err) => warn!(error = %err, "unable to read sync preference"),
                }
            }
        }));
        info!(poll_secs = period.as_secs(), "sync scheduler started");
    }

    /// Stop periodic syncing and drop any pending debounced cycle. A cycle
    /// already running finishes.
    pub fn stop(&self) {
        if let Some(poller) = lock(&self.timers).poller.take() {
            poller.abort();
            info!("sync scheduler stopped");
        }
        self.cancel_pending();
    }

    /// Whether periodic syncing is running.
    pub fn is_started(&self) -> bool {
        lock(&self.timers).poller.is_some()
    }

    /// Run an update cycle now and wait for it. Returns at once when sync
    /// is disabled.
    pub async fn background_update(&self) {
        match self.reconciler.is_sync_enabled() {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!(error = %err, "unable to read sync preference");
                return;
            }
        }
        self.cancel_pending();
        self.enqueue(SyncOperation::Update);
        self.flush().await;
    }

    /// Queue the transition and wait for it to finish.
    ///
    /// Turning sync off also stops scheduling.
    pub async fn set_sync_enabled(&self, enabled: bool, delete_local: bool, delete_remote: bool) {
        if enabled {
            self.cancel_pending();
            self.enqueue(SyncOperation::EnableSync {
                delete_local,
                delete_remote,
            });
        } else {
            self.stop();
            self.enqueue(SyncOperation::DisableSync {
                delete_local,
                delete_remote,
            });
        }
        self.flush().await;
    }
}

impl<S> Drop for SyncScheduler<S> {
    fn drop(&mut self) {
        let mut timers = lock(&self.timers);
        if let Some(timer) = timers.debounce.take() {
            timer.abort();
        }
        if let Some(poller) = timers.poller.take() {
            poller.abort();
        }
        self.worker.abort();
    }
}

async fn run_worker<S: LocalStore>(
    reconciler: Reconciler<S>,
    mut receiver: mpsc::UnboundedReceiver<SyncOperation>,
) {
    while let Some(operation) = receiver.recv().await {
        execute(&reconciler, operation).await;
    }
    debug!("sync worker exiting");
}

async fn execute<S: LocalStore>(reconciler: &Reconciler<S>, operation: SyncOperation) {
    let enabled = || match reconciler.is_sync_enabled() {
        Ok(enabled) => enabled,
        Err(err) => {
            warn!(error = %err, "unable to read sync preference");
            false
        }
    };
    match operation {
        SyncOperation::Barrier(done) => {
            let _ = done.send(());
        }
        SyncOperation::Update if enabled() => {
            reconciler.update().await;
        }
        SyncOperation::Sync if enabled() => {
            reconciler.sync().await;
        }
        SyncOperation::Update | SyncOperation::Sync | SyncOperation::LocalOnly => {
            reconciler.local_only();
        }
        SyncOperation::EnableSync {
            delete_local,
            delete_remote,
        } => {
            reconciler.enable_sync(delete_local, delete_remote).await;
        }
        SyncOperation::DisableSync {
            delete_local,
            delete_remote,
        } => {
            reconciler.disable_sync(delete_local, delete_remote).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::memory_remote::{Call, MemoryRemote};
    use crate::queue::MutationQueue;
    use crate::status::{CycleKind, SyncStatus};
    use crate::store::{Database, ListFilter};
    use crate::MemoryStore;
    use chrono::Utc;

    fn scheduler(remote: &MemoryRemote, enabled: bool) -> SyncScheduler<MemoryStore> {
        let db = Database::new(MemoryStore::new());
        db.write(|store| -> Result<()> {
            store.set_sync_enabled(enabled)?;
            MutationQueue::new(store, Utc::now()).ensure_default_list()?;
            Ok(())
        })
        .unwrap();
        let reconciler = Reconciler::new(db, Arc::new(remote.clone()), SyncStatus::new(), 4);
        SyncScheduler::new(reconciler, &SyncConfig::default())
    }

    fn create_list(scheduler: &SyncScheduler<MemoryStore>, name: &str) {
        scheduler
            .reconciler
            .database()
            .write(|store| MutationQueue::new(store, Utc::now()).create_list(name, None))
            .unwrap();
    }

    #[test]
    fn sync_supersedes_update() {
        use PendingOperation::*;
        assert_eq!(None.merge(UpdateScheduled), UpdateScheduled);
        assert_eq!(UpdateScheduled.merge(SyncScheduled), SyncScheduled);
        assert_eq!(SyncScheduled.merge(UpdateScheduled), SyncScheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_mutations_coalesce() {
        let remote = MemoryRemote::provisioned();
        let scheduler = scheduler(&remote, true);
        let status = scheduler.reconciler.status().clone();

        create_list(&scheduler, "Travel");
        scheduler.schedule_update();
        tokio::time::sleep(Duration::from_millis(100)).await;
        create_list(&scheduler, "Books");
        scheduler.schedule_update();
        assert_eq!(scheduler.pending(), PendingOperation::UpdateScheduled);

        tokio::time::sleep(Duration::from_millis(600)).await;
        scheduler.flush().await;

        assert_eq!(status.cycles(), 1);
        assert_eq!(status.last_cycle().unwrap().kind, CycleKind::Update);
        assert_eq!(remote.calls(Call::CreateList), 2);
        assert_eq!(scheduler.pending(), PendingOperation::None);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_sync_runs_full_cycle() {
        let remote = MemoryRemote::provisioned();
        let scheduler = scheduler(&remote, true);

        scheduler.schedule_sync();
        scheduler.schedule_update();
        assert_eq!(scheduler.pending(), PendingOperation::SyncScheduled);

        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.flush().await;
        assert_eq!(remote.calls(Call::ChangesSince), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_cycle() {
        let remote = MemoryRemote::provisioned();
        let scheduler = scheduler(&remote, true);

        scheduler.schedule_update();
        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.flush().await;
        assert_eq!(scheduler.reconciler.status().cycles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_requests_syncs() {
        let remote = MemoryRemote::provisioned();
        let scheduler = scheduler(&remote, true);

        scheduler.start();
        assert!(scheduler.is_started());
        tokio::time::sleep(Duration::from_secs(31)).await;
        scheduler.flush().await;
        // Immediately, then at 15s and 30s.
        assert_eq!(remote.calls(Call::ChangesSince), 3);

        scheduler.stop();
        assert!(!scheduler.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_sync_stays_local() {
        let remote = MemoryRemote::provisioned();
        let scheduler = scheduler(&remote, false);
        create_list(&scheduler, "Travel");

        scheduler.schedule_sync();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.flush().await;
        scheduler.background_update().await;

        assert_eq!(remote.total_calls(), 0);
        let report = scheduler.reconciler.status().last_cycle().unwrap();
        assert_eq!(report.kind, CycleKind::LocalOnly);
    }

    #[tokio::test]
    async fn background_update_waits_for_push() {
        let remote = MemoryRemote::provisioned();
        let scheduler = scheduler(&remote, true);
        create_list(&scheduler, "Travel");

        scheduler.background_update().await;
        assert!(remote.list_named("Travel").is_some());
    }

    #[tokio::test]
    async fn toggling_sync() {
        let remote = MemoryRemote::new();
        let scheduler = scheduler(&remote, false);
        create_list(&scheduler, "Travel");

        scheduler.set_sync_enabled(true, false, false).await;
        assert!(scheduler.reconciler.is_sync_enabled().unwrap());
        assert!(remote.list_named("Travel").is_some());

        scheduler.start();
        scheduler.set_sync_enabled(false, false, false).await;
        assert!(!scheduler.reconciler.is_sync_enabled().unwrap());
        assert!(!scheduler.is_started());
        let lists = scheduler
            .reconciler
            .database()
            .read(|store| store.lists(&ListFilter::active()))
            .unwrap();
        assert_eq!(lists.len(), 2);
    }
}
