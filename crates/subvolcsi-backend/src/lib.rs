#![warn(missing_docs)]

//! SubvolCSI backend contract: the filesystem admin API the orchestration
//! core drives.
//!
//! This crate owns the [`FsAdmin`] trait (the full set of subvolume, snapshot,
//! clone and metadata operations the core needs from a CephFS-compatible
//! backend), the wire types those operations exchange, the backend error
//! taxonomy, and an instrumented in-memory mock used throughout the test
//! suites.

pub mod admin;
pub mod error;
pub mod mock;
pub mod types;

pub use admin::FsAdmin;
pub use error::{BackendError, BackendResult};
pub use mock::{MockFsAdmin, MockSnapshot, MockSubvolume};
pub use types::{
    CloneState, CloneStatus, QuotaBytes, RemoveFlags, SnapshotEntry, SubvolumeEntry,
    SubvolumeState, FEATURE_SNAPSHOT_AUTOPROTECT, FEATURE_SNAPSHOT_RETENTION,
};
