//! Wire types exchanged with the backend admin API.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Quota reported for a subvolume.
///
/// A subvolume without a quota set reports `Infinite`; the core translates
/// that (and the snapshot-retained lifecycle state) into an unset size rather
/// than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaBytes {
    /// Quota set to a concrete byte count.
    Bytes(u64),
    /// No quota set.
    Infinite,
    /// The backend reported no quota field at all; seen on subvolumes in the
    /// snapshot-retained state.
    Unreported,
}

/// Lifecycle state of a subvolume as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubvolumeState {
    /// Fully created and usable.
    Complete,
    /// The subvolume was removed with snapshots retained; only its snapshots
    /// remain.
    SnapshotRetained,
}

/// Raw subvolume information returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubvolumeEntry {
    /// Filesystem path of the subvolume root, assigned by the backend.
    pub path: String,
    /// Reported quota.
    pub bytes_quota: QuotaBytes,
    /// Capability markers of this subvolume instance, e.g.
    /// "snapshot-autoprotect" or "snapshot-retention".
    pub features: Vec<String>,
    /// Lifecycle state.
    pub state: SubvolumeState,
}

/// Raw snapshot information returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Creation time, seconds since epoch.
    pub created_at_secs: u64,
    /// Whether the snapshot is currently protected.
    pub protected: bool,
    /// Whether clones of this snapshot are still materializing.
    pub has_pending_clones: bool,
}

/// Flags for subvolume removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveFlags {
    /// Remove even if the backend would normally refuse.
    pub force: bool,
    /// Keep snapshots alive, moving the subvolume to the snapshot-retained
    /// state.
    pub retain_snapshots: bool,
}

/// State of an asynchronous clone operation on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloneState {
    /// Queued, not yet started.
    Pending,
    /// Copying data.
    InProgress,
    /// Terminal success; the target subvolume is usable.
    Complete,
    /// Terminal failure.
    Failed,
}

impl fmt::Display for CloneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloneState::Pending => "pending",
            CloneState::InProgress => "in-progress",
            CloneState::Complete => "complete",
            CloneState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Clone status report: state plus failure detail when the backend has any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneStatus {
    /// Current state of the clone.
    pub state: CloneState,
    /// Backend errno string, set on failure.
    pub errno: Option<String>,
    /// Backend failure message, set on failure.
    pub error_msg: Option<String>,
}

impl CloneStatus {
    /// Builds a status with no failure detail.
    pub fn new(state: CloneState) -> Self {
        Self {
            state,
            errno: None,
            error_msg: None,
        }
    }

    /// Builds a failed status carrying the backend's errno and message.
    pub fn failed(errno: impl Into<String>, error_msg: impl Into<String>) -> Self {
        Self {
            state: CloneState::Failed,
            errno: Some(errno.into()),
            error_msg: Some(error_msg.into()),
        }
    }
}

/// Feature marker: snapshots of this subvolume are protected implicitly by
/// the backend.
pub const FEATURE_SNAPSHOT_AUTOPROTECT: &str = "snapshot-autoprotect";

/// Feature marker: the subvolume supports removal with snapshots retained.
pub const FEATURE_SNAPSHOT_RETENTION: &str = "snapshot-retention";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_state_display() {
        assert_eq!(format!("{}", CloneState::Pending), "pending");
        assert_eq!(format!("{}", CloneState::InProgress), "in-progress");
        assert_eq!(format!("{}", CloneState::Complete), "complete");
        assert_eq!(format!("{}", CloneState::Failed), "failed");
    }

    #[test]
    fn test_clone_status_failed_carries_detail() {
        let status = CloneStatus::failed("EIO", "read error");
        assert_eq!(status.state, CloneState::Failed);
        assert_eq!(status.errno.as_deref(), Some("EIO"));
        assert_eq!(status.error_msg.as_deref(), Some("read error"));
    }

    #[test]
    fn test_remove_flags_default() {
        let flags = RemoveFlags::default();
        assert!(!flags.force);
        assert!(!flags.retain_snapshots);
    }

    #[test]
    fn test_quota_roundtrip_serde() {
        let q = QuotaBytes::Bytes(10 << 30);
        let json = serde_json::to_string(&q).unwrap();
        let back: QuotaBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);
    }
}
