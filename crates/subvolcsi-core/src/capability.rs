//! Per-cluster backend capability cache.
//!
//! Whether a cluster supports resize-via-API or subvolume/snapshot metadata
//! cannot change while the driver process runs, so the first observed
//! outcome of each probe is cached and trusted for the cluster's lifetime.
//! Unknown degrades to "assume supported, try it". Entries are never
//! removed; the cache is in-memory only and rediscovered after restart.
//!
//! Concurrent first-probes may race and both hit the backend; outcomes are
//! deterministic per cluster, so last-write-wins convergence is fine and no
//! lock is held across backend I/O.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};

/// Outcome of a capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Not yet probed; attempt the real call.
    Unknown,
    /// The backend supports the operation.
    Supported,
    /// The backend returned not-implemented; do not call again.
    Unsupported,
}

impl ProbeState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ProbeState::Supported,
            2 => ProbeState::Unsupported,
            _ => ProbeState::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ProbeState::Unknown => 0,
            ProbeState::Supported => 1,
            ProbeState::Unsupported => 2,
        }
    }
}

/// The optional backend APIs tracked per cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// The dedicated subvolume resize API.
    Resize,
    /// Subvolume metadata set/remove.
    SubvolumeMetadata,
    /// Snapshot metadata set/remove.
    SnapshotMetadata,
}

/// Capability flags and provisioned-group bookkeeping for one cluster.
#[derive(Debug, Default)]
pub struct ClusterCapabilityState {
    resize: AtomicU8,
    subvolume_metadata: AtomicU8,
    snapshot_metadata: AtomicU8,
    /// Filesystems whose subvolume group has been created in this cluster.
    provisioned_groups: DashSet<String>,
}

impl ClusterCapabilityState {
    fn slot(&self, capability: Capability) -> &AtomicU8 {
        match capability {
            Capability::Resize => &self.resize,
            Capability::SubvolumeMetadata => &self.subvolume_metadata,
            Capability::SnapshotMetadata => &self.snapshot_metadata,
        }
    }

    /// Current probe state for a capability.
    pub fn probe(&self, capability: Capability) -> ProbeState {
        ProbeState::from_u8(self.slot(capability).load(Ordering::Relaxed))
    }

    /// Records a probe outcome.
    pub fn record(&self, capability: Capability, state: ProbeState) {
        self.slot(capability).store(state.as_u8(), Ordering::Relaxed);
    }

    /// True if the subvolume group for `fs_name` was already created.
    pub fn group_provisioned(&self, fs_name: &str) -> bool {
        self.provisioned_groups.contains(fs_name)
    }

    /// Marks the subvolume group for `fs_name` created.
    pub fn mark_group_provisioned(&self, fs_name: &str) {
        self.provisioned_groups.insert(fs_name.to_string());
    }

    /// Clears the provisioned flag so the next caller recreates the group.
    /// Used when the backend reports the group missing after we thought it
    /// existed.
    pub fn reset_group(&self, fs_name: &str) {
        self.provisioned_groups.remove(fs_name);
    }
}

/// Registry of per-cluster capability state, injected into the stores.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    clusters: DashMap<String, Arc<ClusterCapabilityState>>,
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state for a cluster, creating it on first use. Never
    /// blocks on backend I/O.
    pub fn get_or_init(&self, cluster_id: &str) -> Arc<ClusterCapabilityState> {
        self.clusters
            .entry(cluster_id.to_string())
            .or_default()
            .clone()
    }

    /// Current probe state for a cluster capability.
    pub fn probe(&self, cluster_id: &str, capability: Capability) -> ProbeState {
        self.get_or_init(cluster_id).probe(capability)
    }

    /// Records a probe outcome for a cluster capability.
    pub fn record_probe(&self, cluster_id: &str, capability: Capability, state: ProbeState) {
        self.get_or_init(cluster_id).record(capability, state);
    }

    /// True if the subvolume group for `(cluster, fs)` was already created.
    pub fn is_group_provisioned(&self, cluster_id: &str, fs_name: &str) -> bool {
        self.get_or_init(cluster_id).group_provisioned(fs_name)
    }

    /// Marks the subvolume group for `(cluster, fs)` created.
    pub fn mark_group_provisioned(&self, cluster_id: &str, fs_name: &str) {
        self.get_or_init(cluster_id).mark_group_provisioned(fs_name);
    }

    /// Clears the provisioned flag for `(cluster, fs)`.
    pub fn reset_group(&self, cluster_id: &str, fs_name: &str) {
        self.get_or_init(cluster_id).reset_group(fs_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_defaults_to_unknown() {
        let registry = CapabilityRegistry::new();
        assert_eq!(
            registry.probe("cluster-a", Capability::Resize),
            ProbeState::Unknown
        );
    }

    #[test]
    fn test_record_probe_is_sticky_per_cluster() {
        let registry = CapabilityRegistry::new();
        registry.record_probe("cluster-a", Capability::Resize, ProbeState::Unsupported);
        assert_eq!(
            registry.probe("cluster-a", Capability::Resize),
            ProbeState::Unsupported
        );
        // Other clusters are unaffected.
        assert_eq!(
            registry.probe("cluster-b", Capability::Resize),
            ProbeState::Unknown
        );
    }

    #[test]
    fn test_capabilities_are_independent() {
        let registry = CapabilityRegistry::new();
        registry.record_probe("c", Capability::SubvolumeMetadata, ProbeState::Unsupported);
        assert_eq!(
            registry.probe("c", Capability::SnapshotMetadata),
            ProbeState::Unknown
        );
        assert_eq!(registry.probe("c", Capability::Resize), ProbeState::Unknown);
    }

    #[test]
    fn test_group_provisioning_flags() {
        let registry = CapabilityRegistry::new();
        assert!(!registry.is_group_provisioned("c", "fs1"));
        registry.mark_group_provisioned("c", "fs1");
        assert!(registry.is_group_provisioned("c", "fs1"));
        assert!(!registry.is_group_provisioned("c", "fs2"));

        registry.reset_group("c", "fs1");
        assert!(!registry.is_group_provisioned("c", "fs1"));
    }

    #[test]
    fn test_get_or_init_returns_same_entry() {
        let registry = CapabilityRegistry::new();
        let a = registry.get_or_init("c");
        a.record(Capability::Resize, ProbeState::Supported);
        let b = registry.get_or_init("c");
        assert_eq!(b.probe(Capability::Resize), ProbeState::Supported);
    }

    #[test]
    fn test_shared_across_threads() {
        let registry = Arc::new(CapabilityRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                registry.record_probe("c", Capability::Resize, ProbeState::Supported);
                registry.mark_group_provisioned("c", "fs1");
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.probe("c", Capability::Resize), ProbeState::Supported);
        assert!(registry.is_group_provisioned("c", "fs1"));
    }
}
