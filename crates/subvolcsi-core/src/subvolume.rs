//! Subvolume CRUD against the backend admin API.

use std::sync::Arc;

use tracing::{debug, error};

use subvolcsi_backend::{BackendError, FsAdmin, QuotaBytes, RemoveFlags, SubvolumeState};

use crate::capability::{Capability, CapabilityRegistry, ProbeState};
use crate::error::{CoreError, CoreResult};
use crate::types::{ClusterContext, SubvolumeInfo, SubvolumeSpec};

/// Store for subvolume operations: create, info, resize/expand, purge.
///
/// Creation is not idempotent on its own; callers dedupe through the
/// reservation journal.
#[derive(Clone)]
pub struct SubvolumeStore {
    backend: Arc<dyn FsAdmin>,
    caps: Arc<CapabilityRegistry>,
    ctx: ClusterContext,
}

impl SubvolumeStore {
    /// Builds a store over the given backend and capability registry.
    pub fn new(
        backend: Arc<dyn FsAdmin>,
        caps: Arc<CapabilityRegistry>,
        ctx: ClusterContext,
    ) -> Self {
        Self { backend, caps, ctx }
    }

    /// The cluster context this store operates under.
    pub fn context(&self) -> &ClusterContext {
        &self.ctx
    }

    /// Creates the subvolume group for `fs_name` once per cluster lifetime.
    ///
    /// The provisioned flag only says we issued the create successfully; if
    /// the group later turns out to be missing, [`Self::create`] resets the
    /// flag so the next request recreates it.
    pub async fn ensure_group(&self, fs_name: &str, group: &str) -> CoreResult<()> {
        if self.caps.is_group_provisioned(&self.ctx.cluster_id, fs_name) {
            return Ok(());
        }
        self.backend
            .create_subvolume_group(fs_name, group)
            .await
            .map_err(|err| {
                error!(fs = %fs_name, group = %group, error = %err, "failed to create subvolume group");
                CoreError::backend("create_subvolume_group", format!("{fs_name}/{group}"), err)
            })?;
        debug!(fs = %fs_name, group = %group, "created subvolume group");
        self.caps
            .mark_group_provisioned(&self.ctx.cluster_id, fs_name);

        Ok(())
    }

    /// Creates the subvolume, provisioning its group first if needed.
    pub async fn create(&self, spec: &SubvolumeSpec) -> CoreResult<()> {
        self.ensure_group(&spec.fs_name, &spec.group).await?;

        match self
            .backend
            .create_subvolume(
                &spec.fs_name,
                &spec.group,
                &spec.vol_id,
                spec.size_bytes,
                spec.pool.as_deref(),
            )
            .await
        {
            Ok(()) => {
                debug!(volume = %spec.qualified_name(), size = spec.size_bytes, "created subvolume");

                Ok(())
            }
            Err(err) => {
                error!(volume = %spec.qualified_name(), error = %err, "failed to create subvolume");
                if err.is_not_found() {
                    // The group vanished underneath us; clear the flag so the
                    // next request recreates it.
                    self.caps.reset_group(&self.ctx.cluster_id, &spec.fs_name);
                }

                Err(CoreError::backend(
                    "create_subvolume",
                    spec.qualified_name(),
                    err,
                ))
            }
        }
    }

    /// Returns the root path of the subvolume.
    pub async fn root_path(&self, spec: &SubvolumeSpec) -> CoreResult<String> {
        match self
            .backend
            .subvolume_path(&spec.fs_name, &spec.group, &spec.vol_id)
            .await
        {
            Ok(path) => Ok(path),
            Err(err) if err.is_not_found() => Err(CoreError::VolumeNotFound {
                volume: spec.vol_id.clone(),
            }),
            Err(err) => {
                error!(volume = %spec.qualified_name(), error = %err, "failed to get subvolume path");

                Err(CoreError::backend(
                    "subvolume_path",
                    spec.qualified_name(),
                    err,
                ))
            }
        }
    }

    /// Returns interpreted subvolume information.
    ///
    /// An infinite quota, or no quota on a snapshot-retained subvolume, is
    /// reported as size 0; any other quota the store cannot interpret is a
    /// hard error.
    pub async fn get_info(&self, spec: &SubvolumeSpec) -> CoreResult<SubvolumeInfo> {
        let entry = match self
            .backend
            .subvolume_info(&spec.fs_name, &spec.group, &spec.vol_id)
            .await
        {
            Ok(entry) => entry,
            Err(err) if err.is_not_found() => {
                return Err(CoreError::VolumeNotFound {
                    volume: spec.vol_id.clone(),
                })
            }
            Err(err) if err.is_not_implemented() => {
                return Err(CoreError::UnsupportedOperation {
                    operation: "subvolume_info".to_string(),
                })
            }
            Err(err) => {
                error!(volume = %spec.qualified_name(), error = %err, "failed to get subvolume info");

                return Err(CoreError::backend(
                    "subvolume_info",
                    spec.qualified_name(),
                    err,
                ));
            }
        };

        let size_bytes = match entry.bytes_quota {
            QuotaBytes::Bytes(n) => n,
            QuotaBytes::Infinite => 0,
            QuotaBytes::Unreported if entry.state == SubvolumeState::SnapshotRetained => 0,
            QuotaBytes::Unreported => {
                return Err(CoreError::UnsupportedQuota {
                    volume: spec.vol_id.clone(),
                })
            }
        };

        Ok(SubvolumeInfo {
            path: entry.path,
            size_bytes,
            features: entry.features,
            state: entry.state,
        })
    }

    /// Grows the subvolume to `requested_bytes` if that exceeds the current
    /// quota. Never shrinks.
    pub async fn expand(&self, spec: &SubvolumeSpec, requested_bytes: u64) -> CoreResult<()> {
        let info = self.get_info(spec).await?;
        if requested_bytes > info.size_bytes {
            debug!(
                volume = %spec.qualified_name(),
                current = info.size_bytes,
                requested = requested_bytes,
                "expanding subvolume"
            );

            return self.resize(spec, requested_bytes).await;
        }

        Ok(())
    }

    /// Resizes the subvolume quota.
    ///
    /// Tries the dedicated resize API while the cluster's probe state is
    /// unknown or supported. A not-implemented response downgrades the
    /// cluster permanently and falls back to re-issuing create with the new
    /// size. The fallback relies on the backend treating create-on-existing
    /// as a quota-only update; verify that holds for the backend version in
    /// use before enabling this path against a new cluster.
    pub async fn resize(&self, spec: &SubvolumeSpec, size_bytes: u64) -> CoreResult<()> {
        if self.caps.probe(&self.ctx.cluster_id, Capability::Resize) != ProbeState::Unsupported {
            match self
                .backend
                .resize_subvolume(&spec.fs_name, &spec.group, &spec.vol_id, size_bytes)
                .await
            {
                Ok(()) => {
                    self.caps.record_probe(
                        &self.ctx.cluster_id,
                        Capability::Resize,
                        ProbeState::Supported,
                    );
                    debug!(volume = %spec.qualified_name(), size = size_bytes, "resized subvolume");

                    return Ok(());
                }
                Err(err) if err.is_not_implemented() => {}
                Err(err) => {
                    error!(volume = %spec.qualified_name(), error = %err, "failed to resize subvolume");

                    return Err(CoreError::backend(
                        "resize_subvolume",
                        spec.qualified_name(),
                        err,
                    ));
                }
            }
        }
        self.caps.record_probe(
            &self.ctx.cluster_id,
            Capability::Resize,
            ProbeState::Unsupported,
        );

        let mut recreate = spec.clone();
        recreate.size_bytes = size_bytes;
        self.create(&recreate).await
    }

    /// Removes the subvolume. Snapshots are retained when the subvolume
    /// carries the snapshot-retention feature.
    pub async fn purge(&self, spec: &SubvolumeSpec, force: bool) -> CoreResult<()> {
        let flags = RemoveFlags {
            force,
            retain_snapshots: spec.retains_snapshots(),
        };

        match self
            .backend
            .remove_subvolume(&spec.fs_name, &spec.group, &spec.vol_id, flags)
            .await
        {
            Ok(()) => {
                debug!(volume = %spec.qualified_name(), ?flags, "purged subvolume");

                Ok(())
            }
            Err(BackendError::NotEmpty { .. }) => Err(CoreError::VolumeHasSnapshots {
                volume: spec.vol_id.clone(),
            }),
            Err(err) if err.is_not_found() => Err(CoreError::VolumeNotFound {
                volume: spec.vol_id.clone(),
            }),
            Err(err) => {
                error!(volume = %spec.qualified_name(), error = %err, "failed to purge subvolume");

                Err(CoreError::backend(
                    "remove_subvolume",
                    spec.qualified_name(),
                    err,
                ))
            }
        }
    }
}
