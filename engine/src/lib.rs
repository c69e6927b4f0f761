//! # Readlist Engine
//!
//! An offline-tolerant, bidirectional sync engine for reading lists.
//!
//! Users create lists and add articles to them while offline. Every local
//! change is recorded as a flag on the affected record and later pushed to a
//! remote service; changes made on other devices are pulled back and merged.
//!
//! ## Design Principles
//!
//! - **Local first**: Mutations commit locally and return immediately
//! - **Flags, not logs**: Pending work is a set of flags on records, so
//!   retries are the next cycle picking up whatever is still flagged
//! - **No data loss**: A failed sync only delays propagation
//! - **Pluggable edges**: Storage behind [`LocalStore`], network behind
//!   [`RemoteApi`]
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! [`ReadingList`], [`ReadingListEntry`] and [`Article`] live in an arena
//! keyed by local integer ids. Lists and entries carry [`SyncFlags`]:
//! - `is_updated_locally` - pending push
//! - `is_deleted_locally` - tombstone awaiting remote confirmation
//! - `revision` - bumped on every local edit
//!
//! ### Cycles
//!
//! The [`Reconciler`] runs cycles: an *update* pushes lists, then entries; a
//! *sync* additionally pulls the changes since the [`SyncCursor`].
//!
//! ### Scheduling
//!
//! The [`SyncScheduler`] debounces bursts of edits into one cycle and runs
//! at most one cycle at a time.
//!
//! ## Quick Start
//!
//! ```rust
//! use readlist_engine::{
//!     Article, ArticleKey, MemoryRemote, MemoryStore, ReadingListsController, SyncConfig,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), readlist_engine::ReadingListError> {
//! let remote = MemoryRemote::provisioned();
//! let controller = ReadingListsController::open(
//!     MemoryStore::new(),
//!     Arc::new(remote.clone()),
//!     &SyncConfig::default(),
//! )?;
//!
//! // 1. Mutate locally
//! let giraffe = Article::new(ArticleKey::new("enwiki", "Giraffe"));
//! let travel = controller.create_list("Travel", None, &[giraffe])?;
//! assert_eq!(travel.entry_count, 1);
//!
//! // 2. Turn sync on: local lists are uploaded
//! controller.set_sync_enabled(true, false, false).await;
//! assert!(remote.list_named("Travel").is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//!
//! [`MemoryStore::open`] backs the arena with a JSON [`StoreSnapshot`]
//! written atomically on every commit.

pub mod api;
pub mod config;
pub mod controller;
pub mod cursor;
pub mod error;
pub mod http;
pub mod memory_remote;
pub mod model;
pub mod normalize;
pub mod pull;
pub mod push;
pub mod queue;
pub mod reconcile;
pub mod scheduler;
pub mod snapshot;
pub mod status;
pub mod store;

// Re-export main types at crate root
pub use api::{ArticleSummary, ChangeSet, RemoteApi, RemoteEntry, RemoteList};
pub use config::{ConfigError, SyncConfig};
pub use controller::ReadingListsController;
pub use cursor::SyncCursor;
pub use error::{ApiError, ErrorKind, ReadingListError, StorageError};
pub use http::HttpRemoteApi;
pub use memory_remote::MemoryRemote;
pub use model::{Article, NewEntry, NewList, ReadingList, ReadingListEntry, SyncFlags};
pub use normalize::{canonical_name, name_key, ArticleKey};
pub use queue::{MutationQueue, DEFAULT_LIST_NAME};
pub use reconcile::Reconciler;
pub use scheduler::{PendingOperation, SyncOperation, SyncScheduler};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use status::{CycleKind, CycleOutcome, CycleReport, Notice, Phase, SyncStatus};
pub use store::{Database, EntryFilter, ListFilter, LocalStore, MemoryStore};

/// Type aliases for clarity
pub type ListId = u64;
pub type EntryId = u64;
pub type RemoteId = i64;
pub type Revision = u64;
