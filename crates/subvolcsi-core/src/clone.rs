//! Clone orchestration: the multi-step workflows that turn a subvolume or a
//! snapshot into a new, independent subvolume.
//!
//! Cloning is asynchronous on the backend; the orchestrator issues the
//! clone, interprets the state it settles in, and compensates on failure.
//! Compensation ordering is strict: the half-created target is purged before
//! the source snapshot is touched, and unprotect always precedes delete, so
//! a partially-created volume never outlives a still-protected snapshot.
//! Rollback failures are logged and never mask the error that triggered the
//! rollback.

use std::sync::Arc;

use tracing::{error, warn};

use subvolcsi_backend::{CloneState, CloneStatus, FsAdmin};

use crate::error::{CoreError, CoreResult};
use crate::snapshot::SnapshotStore;
use crate::subvolume::SubvolumeStore;
use crate::types::SubvolumeSpec;

/// Drives clone workflows over the subvolume and snapshot stores.
#[derive(Clone)]
pub struct CloneOrchestrator {
    backend: Arc<dyn FsAdmin>,
    subvolumes: SubvolumeStore,
    snapshots: SnapshotStore,
}

impl CloneOrchestrator {
    /// Builds an orchestrator sharing the given backend and stores.
    pub fn new(
        backend: Arc<dyn FsAdmin>,
        subvolumes: SubvolumeStore,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            backend,
            subvolumes,
            snapshots,
        }
    }

    /// Queries the backend state of the clone targeting `target`.
    ///
    /// A missing target maps to [`CoreError::VolumeNotFound`]; other query
    /// failures pass through with context. Callers poll this until the clone
    /// settles; cadence is the caller's business.
    pub async fn get_clone_status(&self, target: &SubvolumeSpec) -> CoreResult<CloneStatus> {
        match self
            .backend
            .clone_status(&target.fs_name, &target.group, &target.vol_id)
            .await
        {
            Ok(status) => Ok(status),
            Err(err) if err.is_not_found() => Err(CoreError::VolumeNotFound {
                volume: target.vol_id.clone(),
            }),
            Err(err) => {
                error!(clone = %target.qualified_name(), error = %err, "failed to get clone status");

                Err(CoreError::backend(
                    "clone_status",
                    target.qualified_name(),
                    err,
                ))
            }
        }
    }

    /// Maps the clone's settled state to the error the caller dispatches on.
    /// Query failures and states the backend should never report surface as
    /// `InvalidClone`.
    async fn settle_clone(&self, target: &SubvolumeSpec) -> CoreResult<()> {
        let status = match self.get_clone_status(target).await {
            Ok(status) => status,
            Err(err) => {
                return Err(CoreError::InvalidClone {
                    clone: target.vol_id.clone(),
                    message: err.to_string(),
                })
            }
        };

        match status.state {
            CloneState::Complete => Ok(()),
            CloneState::InProgress => Err(CoreError::CloneInProgress {
                clone: target.vol_id.clone(),
            }),
            CloneState::Pending => Err(CoreError::ClonePending {
                clone: target.vol_id.clone(),
            }),
            CloneState::Failed => Err(CoreError::CloneFailed {
                clone: target.vol_id.clone(),
                errno: status.errno.unwrap_or_default(),
                message: status.error_msg.unwrap_or_default(),
            }),
        }
    }

    /// Clones a live subvolume into `target` through an intermediate
    /// snapshot named after the target.
    ///
    /// The snapshot name doubles as the marker that lets a retried request
    /// find and clean up the intermediate snapshot later. On success the
    /// intermediate snapshot is already gone; on failure every step taken is
    /// compensated and the triggering error returned. A failure while
    /// removing the intermediate snapshot leaves the (usable) target in
    /// place and surfaces the cleanup error for the caller to retry.
    pub async fn create_clone_from_subvolume(
        &self,
        parent: &SubvolumeSpec,
        target: &SubvolumeSpec,
    ) -> CoreResult<()> {
        let snap_id = target.vol_id.clone();

        // Nothing to roll back if the snapshot itself cannot be taken.
        self.snapshots.create(parent, &snap_id).await?;

        if let Err(protect_err) = self.snapshots.protect(parent, &snap_id).await {
            self.discard_snapshot(parent, &snap_id).await;

            return Err(protect_err);
        }

        if let Err(clone_err) = self.snapshots.clone_to(parent, &snap_id, target).await {
            self.rollback_failed_clone(parent, &snap_id, target).await;

            return Err(clone_err);
        }

        if let Err(state_err) = self.settle_clone(target).await {
            error!(
                clone = %target.qualified_name(),
                error = %state_err,
                "clone did not complete"
            );
            self.rollback_failed_clone(parent, &snap_id, target).await;

            return Err(state_err);
        }

        // Clones do not reliably inherit the source quota; set it explicitly.
        // The clone itself succeeded, so a failure here is returned without
        // rollback.
        self.subvolumes.expand(target, target.size_bytes).await?;

        self.snapshots.unprotect(parent, &snap_id).await?;
        self.snapshots.delete(parent, &snap_id).await?;

        Ok(())
    }

    /// Clones a pre-existing, caller-owned snapshot into `target`.
    ///
    /// Unlike [`Self::create_clone_from_subvolume`] there is no intermediate
    /// snapshot to tear down, and a retryable settle result (pending,
    /// in-progress) leaves the target in place so the caller can poll the
    /// same operation again without re-cloning.
    pub async fn create_clone_from_snapshot(
        &self,
        snap_parent: &SubvolumeSpec,
        snap_id: &str,
        target: &SubvolumeSpec,
    ) -> CoreResult<()> {
        self.snapshots.clone_to(snap_parent, snap_id, target).await?;

        if let Err(state_err) = self.settle_clone(target).await {
            if !state_err.is_clone_retry() {
                if let Err(purge_err) = self.subvolumes.purge(target, true).await {
                    warn!(
                        clone = %target.qualified_name(),
                        error = %purge_err,
                        "failed to delete failed clone target"
                    );
                }
            }

            return Err(state_err);
        }

        self.subvolumes.expand(target, target.size_bytes).await
    }

    /// Removes the intermediate snapshot a subvolume clone left on `parent`,
    /// if it still exists. Used by retry paths that find a finished or
    /// abandoned clone. Idempotent.
    pub async fn cleanup_snapshot_from_subvolume(
        &self,
        parent: &SubvolumeSpec,
        clone_vol_id: &str,
    ) -> CoreResult<()> {
        // Intermediate snapshots carry their clone's name.
        let snap_id = clone_vol_id;
        let info = match self.snapshots.get_info(parent, snap_id).await {
            Ok(info) => info,
            Err(CoreError::SnapshotNotFound { .. }) => return Ok(()),
            Err(err) => return Err(err),
        };

        if info.protected {
            self.snapshots.unprotect(parent, snap_id).await?;
        }
        self.snapshots.delete(parent, snap_id).await?;

        Ok(())
    }

    /// Best-effort removal of an unprotected snapshot after a failed
    /// protect. Errors are logged, not propagated; the protect failure is
    /// what the caller sees.
    async fn discard_snapshot(&self, parent: &SubvolumeSpec, snap_id: &str) {
        if let Err(err) = self.snapshots.delete(parent, snap_id).await {
            warn!(
                volume = %parent.qualified_name(),
                snapshot = %snap_id,
                error = %err,
                "failed to delete snapshot"
            );
        }
    }

    /// Compensation for a clone that failed after the source snapshot was
    /// protected: purge the target, then unprotect and delete the snapshot,
    /// in that order. Best-effort; each failure is logged and the remaining
    /// steps still run.
    async fn rollback_failed_clone(
        &self,
        parent: &SubvolumeSpec,
        snap_id: &str,
        target: &SubvolumeSpec,
    ) {
        if let Err(err) = self.subvolumes.purge(target, true).await {
            warn!(
                clone = %target.qualified_name(),
                error = %err,
                "rollback: failed to delete clone target"
            );
        }
        // Already-unprotected is tolerated inside unprotect.
        if let Err(err) = self.snapshots.unprotect(parent, snap_id).await {
            warn!(
                volume = %parent.qualified_name(),
                snapshot = %snap_id,
                error = %err,
                "rollback: failed to unprotect snapshot"
            );
        }
        if let Err(err) = self.snapshots.delete(parent, snap_id).await {
            warn!(
                volume = %parent.qualified_name(),
                snapshot = %snap_id,
                error = %err,
                "rollback: failed to delete snapshot"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use subvolcsi_backend::{BackendError, MockFsAdmin};

    use crate::capability::CapabilityRegistry;
    use crate::types::ClusterContext;

    const GIB: u64 = 1 << 30;

    fn orchestrator(backend: Arc<MockFsAdmin>) -> CloneOrchestrator {
        let ctx = ClusterContext::new("cluster-a");
        let caps = Arc::new(CapabilityRegistry::new());
        let subvolumes = SubvolumeStore::new(backend.clone(), caps, ctx.clone());
        let snapshots = SnapshotStore::new(backend.clone(), ctx);
        CloneOrchestrator::new(backend, subvolumes, snapshots)
    }

    fn parent() -> SubvolumeSpec {
        SubvolumeSpec::new("csi-vol-parent", "fs1", "csi", 10 * GIB)
    }

    fn target() -> SubvolumeSpec {
        SubvolumeSpec::new("csi-vol-clone", "fs1", "csi", 10 * GIB)
    }

    #[tokio::test]
    async fn test_clone_from_subvolume_success_sequence() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        let orch = orchestrator(backend.clone());

        orch.create_clone_from_subvolume(&parent(), &target())
            .await
            .unwrap();

        assert_eq!(backend.calls("create_snapshot"), 1);
        assert_eq!(backend.calls("protect_snapshot"), 1);
        assert_eq!(backend.calls("clone_snapshot"), 1);
        assert!(backend.calls("clone_status") >= 1);
        assert_eq!(backend.calls("unprotect_snapshot"), 1);
        assert_eq!(backend.calls("remove_snapshot"), 1);

        // The clone exists at the requested size and no intermediate
        // snapshot remains.
        let clone = backend.subvolume("fs1", "csi", "csi-vol-clone").unwrap();
        assert_eq!(clone.size_bytes, 10 * GIB);
        assert!(backend
            .snapshot("fs1", "csi", "csi-vol-parent", "csi-vol-clone")
            .is_none());
    }

    #[tokio::test]
    async fn test_clone_from_subvolume_clone_failure_rolls_back() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        backend.fail_with("clone_snapshot", BackendError::other("mds overloaded"));
        let orch = orchestrator(backend.clone());

        let err = orch
            .create_clone_from_subvolume(&parent(), &target())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Backend { .. }));

        // End state: no target, no snapshot, nothing protected.
        assert!(backend.subvolume("fs1", "csi", "csi-vol-clone").is_none());
        assert!(backend
            .snapshot("fs1", "csi", "csi-vol-parent", "csi-vol-clone")
            .is_none());
        assert_eq!(backend.calls("unprotect_snapshot"), 1);
        assert_eq!(backend.calls("remove_snapshot"), 1);
    }

    #[tokio::test]
    async fn test_clone_from_subvolume_failed_state_rolls_back() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        backend.script_clone_states(
            "csi-vol-clone",
            vec![CloneStatus::failed("EIO", "copy failed")],
        );
        let orch = orchestrator(backend.clone());

        let err = orch
            .create_clone_from_subvolume(&parent(), &target())
            .await
            .unwrap_err();
        match err {
            CoreError::CloneFailed { errno, message, .. } => {
                assert_eq!(errno, "EIO");
                assert_eq!(message, "copy failed");
            }
            other => panic!("expected CloneFailed, got {other:?}"),
        }

        assert!(backend.subvolume("fs1", "csi", "csi-vol-clone").is_none());
        assert!(backend
            .snapshot("fs1", "csi", "csi-vol-parent", "csi-vol-clone")
            .is_none());
    }

    #[tokio::test]
    async fn test_clone_from_subvolume_protect_failure_discards_snapshot() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        backend.fail_with("protect_snapshot", BackendError::other("mds down"));
        let orch = orchestrator(backend.clone());

        let err = orch
            .create_clone_from_subvolume(&parent(), &target())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Backend { .. }));

        // The unprotected snapshot was deleted; no clone was attempted.
        assert!(backend
            .snapshot("fs1", "csi", "csi-vol-parent", "csi-vol-clone")
            .is_none());
        assert_eq!(backend.calls("clone_snapshot"), 0);
    }

    #[tokio::test]
    async fn test_clone_from_subvolume_in_progress_surfaces_retry_error() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        backend.script_clone_states(
            "csi-vol-clone",
            vec![CloneStatus::new(CloneState::InProgress)],
        );
        let orch = orchestrator(backend.clone());

        let err = orch
            .create_clone_from_subvolume(&parent(), &target())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CloneInProgress { .. }));
        assert!(err.is_clone_retry());
    }

    #[tokio::test]
    async fn test_clone_from_subvolume_status_query_failure_is_invalid_clone() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        backend.fail_with("clone_status", BackendError::other("mgr crashed"));
        let orch = orchestrator(backend.clone());

        let err = orch
            .create_clone_from_subvolume(&parent(), &target())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidClone { .. }));
        // Rollback still ran.
        assert!(backend.subvolume("fs1", "csi", "csi-vol-clone").is_none());
    }

    #[tokio::test]
    async fn test_clone_from_snapshot_success_expands_target() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        backend.seed_snapshot("fs1", "csi", "csi-vol-parent", "csi-snap-1", true);
        let orch = orchestrator(backend.clone());

        orch.create_clone_from_snapshot(&parent(), "csi-snap-1", &target())
            .await
            .unwrap();
        assert_eq!(
            backend.subvolume("fs1", "csi", "csi-vol-clone").unwrap().size_bytes,
            10 * GIB
        );
        // The caller-owned snapshot is untouched.
        assert!(backend
            .snapshot("fs1", "csi", "csi-vol-parent", "csi-snap-1")
            .is_some());
    }

    #[tokio::test]
    async fn test_clone_from_snapshot_retryable_leaves_target() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        backend.seed_snapshot("fs1", "csi", "csi-vol-parent", "csi-snap-1", true);
        backend.script_clone_states("csi-vol-clone", vec![CloneStatus::new(CloneState::Pending)]);
        let orch = orchestrator(backend.clone());

        let err = orch
            .create_clone_from_snapshot(&parent(), "csi-snap-1", &target())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ClonePending { .. }));
        // Target left alone: the caller re-polls without re-cloning.
        assert!(backend.subvolume("fs1", "csi", "csi-vol-clone").is_some());
        assert_eq!(backend.calls("remove_subvolume"), 0);
    }

    #[tokio::test]
    async fn test_clone_from_snapshot_hard_failure_purges_target() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        backend.seed_snapshot("fs1", "csi", "csi-vol-parent", "csi-snap-1", true);
        backend.script_clone_states(
            "csi-vol-clone",
            vec![CloneStatus::failed("EIO", "copy failed")],
        );
        let orch = orchestrator(backend.clone());

        let err = orch
            .create_clone_from_snapshot(&parent(), "csi-snap-1", &target())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CloneFailed { .. }));
        assert!(backend.subvolume("fs1", "csi", "csi-vol-clone").is_none());
    }

    #[tokio::test]
    async fn test_cleanup_snapshot_missing_is_noop() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        let orch = orchestrator(backend);

        orch.cleanup_snapshot_from_subvolume(&parent(), "csi-vol-clone")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_snapshot_unprotects_then_deletes() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        backend.seed_snapshot("fs1", "csi", "csi-vol-parent", "csi-vol-clone", true);
        let orch = orchestrator(backend.clone());

        orch.cleanup_snapshot_from_subvolume(&parent(), "csi-vol-clone")
            .await
            .unwrap();
        assert!(backend
            .snapshot("fs1", "csi", "csi-vol-parent", "csi-vol-clone")
            .is_none());
        assert_eq!(backend.calls("unprotect_snapshot"), 1);
    }

    #[tokio::test]
    async fn test_cleanup_snapshot_unprotected_skips_unprotect() {
        let backend = Arc::new(MockFsAdmin::new());
        backend.seed_subvolume("fs1", "csi", "csi-vol-parent", 10 * GIB, &[]);
        backend.seed_snapshot("fs1", "csi", "csi-vol-parent", "csi-vol-clone", false);
        let orch = orchestrator(backend.clone());

        orch.cleanup_snapshot_from_subvolume(&parent(), "csi-vol-clone")
            .await
            .unwrap();
        assert_eq!(backend.calls("unprotect_snapshot"), 0);
        assert!(backend
            .snapshot("fs1", "csi", "csi-vol-parent", "csi-vol-clone")
            .is_none());
    }
}
