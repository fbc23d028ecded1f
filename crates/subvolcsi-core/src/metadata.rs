//! Best-effort metadata annotation of subvolumes and snapshots.
//!
//! Metadata support arrived late in backend history, so every call is gated
//! on the per-cluster capability cache: the first not-implemented response
//! permanently downgrades the cluster and all later calls silently succeed
//! without touching the backend. Callers must not depend on metadata being
//! present. Any other failure propagates with key and target context and
//! leaves the capability flag alone.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use subvolcsi_backend::{BackendError, FsAdmin};

use crate::capability::{Capability, CapabilityRegistry, ProbeState};
use crate::error::{CoreError, CoreResult};
use crate::types::{ClusterContext, SubvolumeSpec};

/// Metadata key carrying the name of the cluster that owns the object.
pub const CLUSTER_NAME_KEY: &str = "subvolcsi.io/cluster-name";

enum MetaCall {
    Applied,
    Unsupported,
}

/// Attaches and removes caller metadata, plus the cluster-name tag.
#[derive(Clone)]
pub struct MetadataAnnotator {
    backend: Arc<dyn FsAdmin>,
    caps: Arc<CapabilityRegistry>,
    ctx: ClusterContext,
}

impl MetadataAnnotator {
    /// Builds an annotator over the given backend and capability registry.
    pub fn new(
        backend: Arc<dyn FsAdmin>,
        caps: Arc<CapabilityRegistry>,
        ctx: ClusterContext,
    ) -> Self {
        Self { backend, caps, ctx }
    }

    /// Sets all given key/value pairs on a subvolume, then tags it with the
    /// cluster name. Silently succeeds once the cluster is known not to
    /// support subvolume metadata.
    pub async fn set_all_subvolume(
        &self,
        spec: &SubvolumeSpec,
        parameters: &HashMap<String, String>,
    ) -> CoreResult<()> {
        if !self.ctx.enable_metadata {
            return Ok(());
        }

        for (key, value) in parameters {
            if let MetaCall::Unsupported = self.set_subvolume_key(spec, key, value).await? {
                return Ok(());
            }
        }

        if !self.ctx.cluster_name.is_empty() {
            if let MetaCall::Unsupported = self
                .set_subvolume_key(spec, CLUSTER_NAME_KEY, &self.ctx.cluster_name)
                .await?
            {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Removes all given keys, plus the cluster-name tag, from a subvolume.
    /// Keys that are already absent are not errors.
    pub async fn unset_all_subvolume(
        &self,
        spec: &SubvolumeSpec,
        keys: &[String],
    ) -> CoreResult<()> {
        if !self.ctx.enable_metadata {
            return Ok(());
        }

        for key in keys {
            if let MetaCall::Unsupported = self.unset_subvolume_key(spec, key).await? {
                return Ok(());
            }
        }
        self.unset_subvolume_key(spec, CLUSTER_NAME_KEY).await?;

        Ok(())
    }

    /// Sets all given key/value pairs on a snapshot, then tags it with the
    /// cluster name. Gated on the snapshot-metadata capability, which is
    /// tracked separately from subvolume metadata.
    pub async fn set_all_snapshot(
        &self,
        parent: &SubvolumeSpec,
        snap_id: &str,
        parameters: &HashMap<String, String>,
    ) -> CoreResult<()> {
        if !self.ctx.enable_metadata {
            return Ok(());
        }

        for (key, value) in parameters {
            if let MetaCall::Unsupported =
                self.set_snapshot_key(parent, snap_id, key, value).await?
            {
                return Ok(());
            }
        }

        if !self.ctx.cluster_name.is_empty() {
            if let MetaCall::Unsupported = self
                .set_snapshot_key(parent, snap_id, CLUSTER_NAME_KEY, &self.ctx.cluster_name)
                .await?
            {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Removes all given keys, plus the cluster-name tag, from a snapshot.
    pub async fn unset_all_snapshot(
        &self,
        parent: &SubvolumeSpec,
        snap_id: &str,
        keys: &[String],
    ) -> CoreResult<()> {
        if !self.ctx.enable_metadata {
            return Ok(());
        }

        for key in keys {
            if let MetaCall::Unsupported = self.unset_snapshot_key(parent, snap_id, key).await? {
                return Ok(());
            }
        }
        self.unset_snapshot_key(parent, snap_id, CLUSTER_NAME_KEY)
            .await?;

        Ok(())
    }

    async fn set_subvolume_key(
        &self,
        spec: &SubvolumeSpec,
        key: &str,
        value: &str,
    ) -> CoreResult<MetaCall> {
        if self.probe(Capability::SubvolumeMetadata) == ProbeState::Unsupported {
            return Ok(MetaCall::Unsupported);
        }

        let result = self
            .backend
            .set_subvolume_metadata(&spec.fs_name, &spec.group, &spec.vol_id, key, value)
            .await;
        self.classify(Capability::SubvolumeMetadata, "set", key, spec.qualified_name(), result)
    }

    async fn unset_subvolume_key(&self, spec: &SubvolumeSpec, key: &str) -> CoreResult<MetaCall> {
        if self.probe(Capability::SubvolumeMetadata) == ProbeState::Unsupported {
            return Ok(MetaCall::Unsupported);
        }

        let result = match self
            .backend
            .remove_subvolume_metadata(&spec.fs_name, &spec.group, &spec.vol_id, key)
            .await
        {
            Err(BackendError::NoSuchKey { .. }) => Ok(()),
            other => other,
        };
        self.classify(Capability::SubvolumeMetadata, "unset", key, spec.qualified_name(), result)
    }

    async fn set_snapshot_key(
        &self,
        parent: &SubvolumeSpec,
        snap_id: &str,
        key: &str,
        value: &str,
    ) -> CoreResult<MetaCall> {
        if self.probe(Capability::SnapshotMetadata) == ProbeState::Unsupported {
            return Ok(MetaCall::Unsupported);
        }

        let result = self
            .backend
            .set_snapshot_metadata(
                &parent.fs_name,
                &parent.group,
                &parent.vol_id,
                snap_id,
                key,
                value,
            )
            .await;
        let object = format!("{}@{}", parent.qualified_name(), snap_id);
        self.classify(Capability::SnapshotMetadata, "set", key, object, result)
    }

    async fn unset_snapshot_key(
        &self,
        parent: &SubvolumeSpec,
        snap_id: &str,
        key: &str,
    ) -> CoreResult<MetaCall> {
        if self.probe(Capability::SnapshotMetadata) == ProbeState::Unsupported {
            return Ok(MetaCall::Unsupported);
        }

        let result = match self
            .backend
            .remove_snapshot_metadata(&parent.fs_name, &parent.group, &parent.vol_id, snap_id, key)
            .await
        {
            Err(BackendError::NoSuchKey { .. }) => Ok(()),
            other => other,
        };
        let object = format!("{}@{}", parent.qualified_name(), snap_id);
        self.classify(Capability::SnapshotMetadata, "unset", key, object, result)
    }

    fn probe(&self, capability: Capability) -> ProbeState {
        self.caps.probe(&self.ctx.cluster_id, capability)
    }

    /// Shared outcome handling: success records the capability supported, a
    /// not-implemented response downgrades it permanently, and anything else
    /// propagates without touching the flag.
    fn classify(
        &self,
        capability: Capability,
        action: &'static str,
        key: &str,
        object: String,
        result: Result<(), BackendError>,
    ) -> CoreResult<MetaCall> {
        match result {
            Ok(()) => {
                self.caps
                    .record_probe(&self.ctx.cluster_id, capability, ProbeState::Supported);

                Ok(MetaCall::Applied)
            }
            Err(err) if err.is_not_implemented() => {
                debug!(
                    cluster = %self.ctx.cluster_id,
                    ?capability,
                    "metadata not supported, disabling for this cluster"
                );
                self.caps
                    .record_probe(&self.ctx.cluster_id, capability, ProbeState::Unsupported);

                Ok(MetaCall::Unsupported)
            }
            Err(err) => Err(CoreError::Metadata {
                action,
                key: key.to_string(),
                object,
                source: err,
            }),
        }
    }
}
