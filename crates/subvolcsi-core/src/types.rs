//! Core-level types shared by the stores and the orchestrator.

use subvolcsi_backend::{SubvolumeState, FEATURE_SNAPSHOT_AUTOPROTECT, FEATURE_SNAPSHOT_RETENTION};

/// Per-cluster identity the stores operate under.
#[derive(Debug, Clone)]
pub struct ClusterContext {
    /// Unique ID of the cluster this driver instance serves.
    pub cluster_id: String,
    /// Human-facing cluster name, tagged onto created objects when metadata
    /// is enabled. May be empty.
    pub cluster_name: String,
    /// Whether to attach metadata to created subvolumes/snapshots.
    pub enable_metadata: bool,
}

impl ClusterContext {
    /// Builds a context with metadata disabled.
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            cluster_name: String::new(),
            enable_metadata: false,
        }
    }

    /// Sets the cluster name used for object tagging.
    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    /// Enables metadata attachment.
    pub fn with_metadata(mut self) -> Self {
        self.enable_metadata = true;
        self
    }
}

/// Identity and requested shape of one subvolume.
///
/// `vol_id` is the generated backend name, unique within
/// `(fs_name, group)`. `features` is populated from backend info when the
/// caller has fetched it; feature-dependent paths (snapshot auto-protect,
/// snapshot retention) consult it.
#[derive(Debug, Clone)]
pub struct SubvolumeSpec {
    /// Generated backend name of the subvolume.
    pub vol_id: String,
    /// Filesystem the subvolume lives in.
    pub fs_name: String,
    /// Subvolume group within the filesystem.
    pub group: String,
    /// Optional pool placement hint.
    pub pool: Option<String>,
    /// Requested quota in bytes.
    pub size_bytes: u64,
    /// Backend feature markers, when known.
    pub features: Vec<String>,
}

impl SubvolumeSpec {
    /// Builds a spec with no pool hint and no known features.
    pub fn new(
        vol_id: impl Into<String>,
        fs_name: impl Into<String>,
        group: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            vol_id: vol_id.into(),
            fs_name: fs_name.into(),
            group: group.into(),
            pool: None,
            size_bytes,
            features: Vec::new(),
        }
    }

    /// Sets the pool placement hint.
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Sets the known backend features.
    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }

    /// True if the subvolume carries the named backend feature.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// True if snapshots of this subvolume are implicitly protected by the
    /// backend.
    pub fn auto_protects_snapshots(&self) -> bool {
        self.has_feature(FEATURE_SNAPSHOT_AUTOPROTECT)
    }

    /// True if the subvolume supports removal with snapshots retained.
    pub fn retains_snapshots(&self) -> bool {
        self.has_feature(FEATURE_SNAPSHOT_RETENTION)
    }

    /// `fs/group/id` form used in logs and error context.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}/{}", self.fs_name, self.group, self.vol_id)
    }
}

/// Interpreted subvolume information.
#[derive(Debug, Clone)]
pub struct SubvolumeInfo {
    /// Root path assigned by the backend.
    pub path: String,
    /// Quota in bytes; 0 when no quota is set or the subvolume is in the
    /// snapshot-retained state.
    pub size_bytes: u64,
    /// Backend feature markers of this subvolume instance.
    pub features: Vec<String>,
    /// Lifecycle state.
    pub state: SubvolumeState,
}

/// Interpreted snapshot information.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// Creation time, seconds since epoch.
    pub created_at_secs: u64,
    /// Whether the snapshot is currently protected.
    pub protected: bool,
    /// Whether clones of this snapshot are still materializing.
    pub has_pending_clones: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builders() {
        let spec = SubvolumeSpec::new("csi-vol-1", "fs1", "csi", 1024)
            .with_pool("fast")
            .with_features(vec!["snapshot-autoprotect".to_string()]);
        assert_eq!(spec.pool.as_deref(), Some("fast"));
        assert!(spec.auto_protects_snapshots());
        assert!(!spec.retains_snapshots());
    }

    #[test]
    fn test_qualified_name() {
        let spec = SubvolumeSpec::new("csi-vol-1", "fs1", "csi", 0);
        assert_eq!(spec.qualified_name(), "fs1/csi/csi-vol-1");
    }

    #[test]
    fn test_context_builders() {
        let ctx = ClusterContext::new("cluster-a")
            .with_cluster_name("east")
            .with_metadata();
        assert_eq!(ctx.cluster_id, "cluster-a");
        assert_eq!(ctx.cluster_name, "east");
        assert!(ctx.enable_metadata);
    }
}
