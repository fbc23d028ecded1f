#![warn(missing_docs)]

//! SubvolCSI orchestration core: the subvolume/snapshot/clone lifecycle
//! engine behind the CSI-facing provisioning layer.
//!
//! The core drives an eventually-consistent backend through multi-step
//! create/clone/snapshot/resize/purge workflows: it reserves stable
//! identities in the journal, walks the backend's asynchronous clone state
//! machine, compensates on partial failure, and caches per-cluster
//! capability probes so unsupported APIs are not retried forever.
//!
//! The CSI/gRPC layer above is responsible for request serialization: every
//! journal-touching entry point requires a caller-held lock scoped to the
//! request name.

pub mod capability;
pub mod clone;
pub mod error;
pub mod metadata;
pub mod provision;
pub mod snapshot;
pub mod subvolume;
pub mod types;

pub use capability::{Capability, CapabilityRegistry, ClusterCapabilityState, ProbeState};
pub use clone::CloneOrchestrator;
pub use error::{CoreError, CoreResult};
pub use metadata::{MetadataAnnotator, CLUSTER_NAME_KEY};
pub use provision::{
    CloneSource, Provisioner, SnapshotIdentity, SnapshotOptions, VolumeIdentity, VolumeOptions,
};
pub use snapshot::SnapshotStore;
pub use subvolume::SubvolumeStore;
pub use types::{ClusterContext, SnapshotInfo, SubvolumeInfo, SubvolumeSpec};
