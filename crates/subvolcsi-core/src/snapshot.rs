//! Snapshot CRUD and protection against the backend admin API.

use std::sync::Arc;

use tracing::{debug, error};

use subvolcsi_backend::FsAdmin;

use crate::error::{CoreError, CoreResult};
use crate::types::{ClusterContext, SnapshotInfo, SubvolumeSpec};

/// Store for snapshot operations scoped to a parent subvolume.
///
/// Protect and unprotect both tolerate the backend's already-exists code as
/// success: the backend reuses that one code for "already protected" and
/// "already unprotected". On subvolumes carrying the auto-protect feature
/// neither call reaches the backend at all; depending on the backend
/// version the real call would be a no-op or an error, so it is skipped
/// entirely.
#[derive(Clone)]
pub struct SnapshotStore {
    backend: Arc<dyn FsAdmin>,
    ctx: ClusterContext,
}

impl SnapshotStore {
    /// Builds a store over the given backend.
    pub fn new(backend: Arc<dyn FsAdmin>, ctx: ClusterContext) -> Self {
        Self { backend, ctx }
    }

    /// The cluster context this store operates under.
    pub fn context(&self) -> &ClusterContext {
        &self.ctx
    }

    fn qualified(parent: &SubvolumeSpec, snap_id: &str) -> String {
        format!("{}@{}", parent.qualified_name(), snap_id)
    }

    /// Creates a snapshot of the parent subvolume. Idempotency comes from
    /// the caller's reservation journal, not from this call.
    pub async fn create(&self, parent: &SubvolumeSpec, snap_id: &str) -> CoreResult<()> {
        self.backend
            .create_snapshot(&parent.fs_name, &parent.group, &parent.vol_id, snap_id)
            .await
            .map_err(|err| {
                error!(
                    snapshot = %Self::qualified(parent, snap_id),
                    error = %err,
                    "failed to create snapshot"
                );
                CoreError::backend("create_snapshot", Self::qualified(parent, snap_id), err)
            })?;
        debug!(snapshot = %Self::qualified(parent, snap_id), "created snapshot");

        Ok(())
    }

    /// Deletes a snapshot of the parent subvolume.
    pub async fn delete(&self, parent: &SubvolumeSpec, snap_id: &str) -> CoreResult<()> {
        match self
            .backend
            .remove_snapshot(&parent.fs_name, &parent.group, &parent.vol_id, snap_id)
            .await
        {
            Ok(()) => {
                debug!(snapshot = %Self::qualified(parent, snap_id), "deleted snapshot");

                Ok(())
            }
            Err(err) if err.is_not_found() => Err(CoreError::SnapshotNotFound {
                snapshot: snap_id.to_string(),
            }),
            Err(err) => {
                error!(
                    snapshot = %Self::qualified(parent, snap_id),
                    error = %err,
                    "failed to delete snapshot"
                );

                Err(CoreError::backend(
                    "remove_snapshot",
                    Self::qualified(parent, snap_id),
                    err,
                ))
            }
        }
    }

    /// Returns interpreted snapshot information.
    pub async fn get_info(&self, parent: &SubvolumeSpec, snap_id: &str) -> CoreResult<SnapshotInfo> {
        match self
            .backend
            .snapshot_info(&parent.fs_name, &parent.group, &parent.vol_id, snap_id)
            .await
        {
            Ok(entry) => Ok(SnapshotInfo {
                created_at_secs: entry.created_at_secs,
                protected: entry.protected,
                has_pending_clones: entry.has_pending_clones,
            }),
            Err(err) if err.is_not_found() => Err(CoreError::SnapshotNotFound {
                snapshot: snap_id.to_string(),
            }),
            Err(err) => {
                error!(
                    snapshot = %Self::qualified(parent, snap_id),
                    error = %err,
                    "failed to get snapshot info"
                );

                Err(CoreError::backend(
                    "snapshot_info",
                    Self::qualified(parent, snap_id),
                    err,
                ))
            }
        }
    }

    /// Protects a snapshot so it can be cloned and cannot be deleted.
    ///
    /// No-op on auto-protect subvolumes; already-protected is success.
    pub async fn protect(&self, parent: &SubvolumeSpec, snap_id: &str) -> CoreResult<()> {
        if parent.auto_protects_snapshots() {
            return Ok(());
        }

        match self
            .backend
            .protect_snapshot(&parent.fs_name, &parent.group, &parent.vol_id, snap_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => {
                error!(
                    snapshot = %Self::qualified(parent, snap_id),
                    error = %err,
                    "failed to protect snapshot"
                );

                Err(CoreError::backend(
                    "protect_snapshot",
                    Self::qualified(parent, snap_id),
                    err,
                ))
            }
        }
    }

    /// Removes protection from a snapshot.
    ///
    /// No-op on auto-protect subvolumes; the backend signals "already
    /// unprotected" with its already-exists code, tolerated as success.
    pub async fn unprotect(&self, parent: &SubvolumeSpec, snap_id: &str) -> CoreResult<()> {
        if parent.auto_protects_snapshots() {
            return Ok(());
        }

        match self
            .backend
            .unprotect_snapshot(&parent.fs_name, &parent.group, &parent.vol_id, snap_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => {
                error!(
                    snapshot = %Self::qualified(parent, snap_id),
                    error = %err,
                    "failed to unprotect snapshot"
                );

                Err(CoreError::backend(
                    "unprotect_snapshot",
                    Self::qualified(parent, snap_id),
                    err,
                ))
            }
        }
    }

    /// Starts an asynchronous clone of the snapshot into `target`.
    pub async fn clone_to(
        &self,
        parent: &SubvolumeSpec,
        snap_id: &str,
        target: &SubvolumeSpec,
    ) -> CoreResult<()> {
        match self
            .backend
            .clone_snapshot(
                &parent.fs_name,
                &parent.group,
                &parent.vol_id,
                snap_id,
                &target.vol_id,
                &target.group,
                target.pool.as_deref(),
            )
            .await
        {
            Ok(()) => {
                debug!(
                    snapshot = %Self::qualified(parent, snap_id),
                    target = %target.qualified_name(),
                    "clone started"
                );

                Ok(())
            }
            Err(err) if err.is_not_found() => Err(CoreError::VolumeNotFound {
                volume: parent.vol_id.clone(),
            }),
            Err(err) => {
                error!(
                    snapshot = %Self::qualified(parent, snap_id),
                    target = %target.qualified_name(),
                    error = %err,
                    "failed to clone snapshot"
                );

                Err(CoreError::backend(
                    "clone_snapshot",
                    Self::qualified(parent, snap_id),
                    err,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subvolcsi_backend::{BackendError, MockFsAdmin, FEATURE_SNAPSHOT_AUTOPROTECT};

    fn store(backend: Arc<MockFsAdmin>) -> SnapshotStore {
        SnapshotStore::new(backend, ClusterContext::new("cluster-a"))
    }

    fn parent() -> SubvolumeSpec {
        SubvolumeSpec::new("csi-vol-1", "fs1", "csi", 1024)
    }

    fn autoprotect_parent() -> SubvolumeSpec {
        parent().with_features(vec![FEATURE_SNAPSHOT_AUTOPROTECT.to_string()])
    }

    #[tokio::test]
    async fn test_create_and_info() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-1", 1024, &[]);
        let store = store(backend);

        store.create(&parent(), "snap-1").await.unwrap();
        let info = store.get_info(&parent(), "snap-1").await.unwrap();
        assert!(!info.protected);
        assert!(!info.has_pending_clones);
        assert!(info.created_at_secs > 0);
    }

    #[tokio::test]
    async fn test_get_info_maps_not_found() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-1", 1024, &[]);
        let store = store(backend);
        let err = store.get_info(&parent(), "missing").await.unwrap_err();
        assert!(matches!(err, CoreError::SnapshotNotFound { .. }));
    }

    #[tokio::test]
    async fn test_protect_is_idempotent() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-1", 1024, &[]);
        backend.seed_snapshot("fs1", "csi", "csi-vol-1", "snap-1", false);
        let store = store(backend);

        store.protect(&parent(), "snap-1").await.unwrap();
        store.protect(&parent(), "snap-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_unprotect_is_idempotent() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-1", 1024, &[]);
        backend.seed_snapshot("fs1", "csi", "csi-vol-1", "snap-1", true);
        let store = store(backend);

        store.unprotect(&parent(), "snap-1").await.unwrap();
        store.unprotect(&parent(), "snap-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_autoprotect_short_circuits_backend() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume(
            "fs1",
            "csi",
            "csi-vol-1",
            1024,
            &[FEATURE_SNAPSHOT_AUTOPROTECT],
        );
        backend.seed_snapshot("fs1", "csi", "csi-vol-1", "snap-1", false);
        let store = store(backend.clone());

        store.protect(&autoprotect_parent(), "snap-1").await.unwrap();
        store
            .unprotect(&autoprotect_parent(), "snap-1")
            .await
            .unwrap();
        assert_eq!(backend.calls("protect_snapshot"), 0);
        assert_eq!(backend.calls("unprotect_snapshot"), 0);
    }

    #[tokio::test]
    async fn test_protect_propagates_hard_errors() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-1", 1024, &[]);
        backend.seed_snapshot("fs1", "csi", "csi-vol-1", "snap-1", false);
        backend.fail_with("protect_snapshot", BackendError::other("mds down"));
        let store = store(backend);

        let err = store.protect(&parent(), "snap-1").await.unwrap_err();
        assert!(matches!(err, CoreError::Backend { .. }));
    }

    #[tokio::test]
    async fn test_clone_to_starts_clone() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-1", 1024, &[]);
        backend.seed_snapshot("fs1", "csi", "csi-vol-1", "snap-1", true);
        let store = store(backend.clone());

        let target = SubvolumeSpec::new("csi-vol-2", "fs1", "csi", 1024);
        store.clone_to(&parent(), "snap-1", &target).await.unwrap();
        assert!(backend.subvolume("fs1", "csi", "csi-vol-2").is_some());
    }

    #[tokio::test]
    async fn test_clone_to_maps_not_found() {
        let backend = Arc::new(MockFsAdmin::new());
        let store = store(backend);
        let target = SubvolumeSpec::new("csi-vol-2", "fs1", "csi", 1024);
        let err = store
            .clone_to(&parent(), "snap-1", &target)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::VolumeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_maps_not_found() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-1", 1024, &[]);
        let store = store(backend);
        let err = store.delete(&parent(), "missing").await.unwrap_err();
        assert!(matches!(err, CoreError::SnapshotNotFound { .. }));
    }
}
