//! The filesystem admin trait the orchestration core is written against.
//!
//! Implementations talk to a real CephFS-compatible cluster; the mock in
//! [`crate::mock`] implements the same trait in memory. Every method is a
//! blocking network call from the caller's point of view and may take as long
//! as the backend needs; cancellation is propagated by dropping the future.

use async_trait::async_trait;

use crate::error::BackendResult;
use crate::types::{CloneStatus, RemoveFlags, SnapshotEntry, SubvolumeEntry};

/// Admin operations against a subvolume-capable filesystem backend.
///
/// Error contract (per operation class):
/// - creates return `AlreadyExists` only where the backend is not
///   idempotent; subvolume-group creation is idempotent on all supported
///   backend versions.
/// - lookups return `NotFound` for missing objects and `NotImplemented`
///   when the backend version predates the API.
/// - snapshot protect/unprotect reuse `AlreadyExists` for "already in the
///   requested state", in both directions.
#[async_trait]
pub trait FsAdmin: Send + Sync {
    /// Creates a subvolume group in the filesystem. Idempotent.
    async fn create_subvolume_group(&self, fs: &str, group: &str) -> BackendResult<()>;

    /// Creates a subvolume with the given quota, optionally pinned to a pool.
    async fn create_subvolume(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        size_bytes: u64,
        pool: Option<&str>,
    ) -> BackendResult<()>;

    /// Returns the root path of a subvolume.
    async fn subvolume_path(&self, fs: &str, group: &str, id: &str) -> BackendResult<String>;

    /// Returns raw subvolume information.
    async fn subvolume_info(
        &self,
        fs: &str,
        group: &str,
        id: &str,
    ) -> BackendResult<SubvolumeEntry>;

    /// Resizes a subvolume quota via the dedicated resize API.
    async fn resize_subvolume(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        size_bytes: u64,
    ) -> BackendResult<()>;

    /// Removes a subvolume.
    async fn remove_subvolume(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        flags: RemoveFlags,
    ) -> BackendResult<()>;

    /// Creates a snapshot of a subvolume.
    async fn create_snapshot(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
    ) -> BackendResult<()>;

    /// Removes a snapshot of a subvolume.
    async fn remove_snapshot(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
    ) -> BackendResult<()>;

    /// Marks a snapshot protected, blocking deletion and allowing clones.
    async fn protect_snapshot(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
    ) -> BackendResult<()>;

    /// Removes protection from a snapshot.
    async fn unprotect_snapshot(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
    ) -> BackendResult<()>;

    /// Returns raw snapshot information.
    async fn snapshot_info(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
    ) -> BackendResult<SnapshotEntry>;

    /// Starts an asynchronous clone of a snapshot into a new subvolume.
    #[allow(clippy::too_many_arguments)]
    async fn clone_snapshot(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
        target_id: &str,
        target_group: &str,
        pool: Option<&str>,
    ) -> BackendResult<()>;

    /// Queries the state of a clone by its target subvolume ID.
    async fn clone_status(&self, fs: &str, group: &str, target_id: &str)
        -> BackendResult<CloneStatus>;

    /// Sets a metadata key/value pair on a subvolume.
    async fn set_subvolume_metadata(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        key: &str,
        value: &str,
    ) -> BackendResult<()>;

    /// Removes a metadata key from a subvolume.
    async fn remove_subvolume_metadata(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        key: &str,
    ) -> BackendResult<()>;

    /// Sets a metadata key/value pair on a snapshot.
    #[allow(clippy::too_many_arguments)]
    async fn set_snapshot_metadata(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
        key: &str,
        value: &str,
    ) -> BackendResult<()>;

    /// Removes a metadata key from a snapshot.
    async fn remove_snapshot_metadata(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
        key: &str,
    ) -> BackendResult<()>;
}
