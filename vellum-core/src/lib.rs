//! # Vellum Core
//!
//! Core library for the Vellum vault: a filesystem synchronization engine
//! that keeps a queryable metadata catalog consistent with a directory tree
//! mutated concurrently by an internal API, by live operating-system change
//! notifications, and by external processes acting directly on disk —
//! including while the engine itself is not running.
//!
//! ## Overview
//!
//! The engine is built from small cooperating parts:
//!
//! - [`filter`]: stateless rules deciding which paths are tracked at all
//! - [`locks`]: per-path mutual exclusion spanning every read-compute-write
//! - [`metadata`]: hashes, previews, and timestamps read from ground truth
//! - [`catalog`]: the store abstraction with its freshness-based merge
//!   policy, plus the in-memory reference backend
//! - [`watch`]: live notification bridge with debouncing and move inference
//! - [`scan`]: periodic full-tree discovery and orphan reconciliation
//! - [`service`]: the facade wiring it all together behind `start`/`stop`
//!   and the synchronous write/delete/move API
//!
//! Correctness does not depend on notification arrival order: per-path
//! serialization plus the merge policy guarantee that the final persisted
//! state reflects whichever disk read happened last, never an earlier one.
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use vellum_core::{
//!     MemoryCatalogStore, NoopChangeObserver, SyncConfig, SyncService,
//! };
//!
//! async fn run() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryCatalogStore::new());
//!     let service = SyncService::new(
//!         "/srv/vault",
//!         SyncConfig::default(),
//!         store,
//!         Arc::new(NoopChangeObserver),
//!     )?;
//!     service.start().await?;
//!     service.write_file("inbox/todo.md", b"- [ ] ship it").await?;
//!     service.stop().await;
//!     Ok(())
//! }
//! ```

/// Catalog persistence abstraction and merge policy
pub mod catalog;

/// Engine configuration and environment loading
pub mod config;

/// Error types and result alias
pub mod error;

/// Path exclusion rules
pub mod filter;

/// Per-path lock table
pub mod locks;

/// Disk metadata and content processing
pub mod metadata;

/// Shared per-path processing core and the change-observer seam
pub mod pipeline;

/// Periodic scanning and reconciliation
pub mod scan;

/// Service facade and synchronous API
pub mod service;

/// Live watch pipeline: debouncing, move inference, notify bridge
pub mod watch;

pub use catalog::{CatalogStore, MemoryCatalogStore, merge_entries};
pub use config::{SyncConfig, SyncConfigSource};
pub use error::{Result, SyncError};
pub use filter::{excluded_within, is_excluded};
pub use locks::PathLocks;
pub use metadata::MetadataProcessor;
pub use pipeline::{ChangeObserver, NoopChangeObserver, UpsertOutcome};
pub use scan::{ScanSummary, VaultScanner};
pub use service::SyncService;
pub use watch::{DebouncedEvent, Debouncer, MoveDetector, NotifyKind};

pub use vellum_model as model;
