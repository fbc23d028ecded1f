//! Error taxonomy of the orchestration core.
//!
//! Callers dispatch on the variant, not on a wrapped sentinel chain: each
//! failure class the CSI layer needs to distinguish has its own variant,
//! and unclassified backend failures pass through with operation context
//! attached.

use thiserror::Error;

use subvolcsi_backend::BackendError;
use subvolcsi_id::IdError;
use subvolcsi_journal::JournalError;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error variants for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The subvolume does not exist on the backend.
    #[error("volume not found: {volume}")]
    VolumeNotFound {
        /// The missing volume.
        volume: String,
    },

    /// The snapshot does not exist on the backend.
    #[error("snapshot not found: {snapshot}")]
    SnapshotNotFound {
        /// The missing snapshot.
        snapshot: String,
    },

    /// The backend version does not implement the requested operation.
    #[error("operation not supported by backend: {operation}")]
    UnsupportedOperation {
        /// The unimplemented operation.
        operation: String,
    },

    /// Purge was blocked by existing snapshots.
    #[error("volume {volume} has snapshots")]
    VolumeHasSnapshots {
        /// The volume that could not be purged.
        volume: String,
    },

    /// The clone is still copying data; retry later.
    #[error("clone from snapshot is already in progress: {clone}")]
    CloneInProgress {
        /// The clone target.
        clone: String,
    },

    /// The clone is queued and has not started; retry later.
    #[error("clone from snapshot is pending: {clone}")]
    ClonePending {
        /// The clone target.
        clone: String,
    },

    /// The clone reached the terminal failed state.
    #[error("clone from snapshot failed: {clone} ({errno}: {message})")]
    CloneFailed {
        /// The clone target.
        clone: String,
        /// Backend errno, when reported.
        errno: String,
        /// Backend failure message, when reported.
        message: String,
    },

    /// The clone state could not be determined.
    #[error("invalid clone state: {clone}: {message}")]
    InvalidClone {
        /// The clone target.
        clone: String,
        /// Description of the query failure.
        message: String,
    },

    /// The backend reported a quota encoding the core cannot interpret.
    #[error("volume {volume} has unsupported quota")]
    UnsupportedQuota {
        /// The volume with the unparseable quota.
        volume: String,
    },

    /// Metadata set/unset failed for a reason other than missing backend
    /// support.
    #[error("failed to {action} metadata key {key:?} on {object}")]
    Metadata {
        /// "set" or "unset".
        action: &'static str,
        /// The metadata key involved.
        key: String,
        /// The subvolume or snapshot the key was applied to.
        object: String,
        /// The underlying backend failure.
        #[source]
        source: BackendError,
    },

    /// A reservation journal failure.
    #[error("journal: {0}")]
    Journal(#[from] JournalError),

    /// A composite-identifier failure.
    #[error("identifier: {0}")]
    Id(#[from] IdError),

    /// Unclassified backend failure, wrapped with operation context.
    #[error("{operation} failed for {object}")]
    Backend {
        /// The operation that failed.
        operation: &'static str,
        /// The object the operation targeted.
        object: String,
        /// The underlying backend failure.
        #[source]
        source: BackendError,
    },
}

impl CoreError {
    /// Wraps an unclassified backend error with operation context.
    pub fn backend(operation: &'static str, object: impl Into<String>, source: BackendError) -> Self {
        Self::Backend {
            operation,
            object: object.into(),
            source,
        }
    }

    /// True for clone states the caller resolves by retrying the same
    /// request: pending and in-progress.
    pub fn is_clone_retry(&self) -> bool {
        matches!(
            self,
            Self::CloneInProgress { .. } | Self::ClonePending { .. }
        )
    }

    /// True if this is the not-found class (volume or snapshot).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::VolumeNotFound { .. } | Self::SnapshotNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_retry_classification() {
        let in_progress = CoreError::CloneInProgress {
            clone: "csi-vol-x".to_string(),
        };
        let pending = CoreError::ClonePending {
            clone: "csi-vol-x".to_string(),
        };
        let failed = CoreError::CloneFailed {
            clone: "csi-vol-x".to_string(),
            errno: "EIO".to_string(),
            message: "read error".to_string(),
        };
        assert!(in_progress.is_clone_retry());
        assert!(pending.is_clone_retry());
        assert!(!failed.is_clone_retry());
    }

    #[test]
    fn test_not_found_classification() {
        let vol = CoreError::VolumeNotFound {
            volume: "csi-vol-x".to_string(),
        };
        let snap = CoreError::SnapshotNotFound {
            snapshot: "csi-snap-x".to_string(),
        };
        assert!(vol.is_not_found());
        assert!(snap.is_not_found());
        assert!(!vol.is_clone_retry());
    }

    #[test]
    fn test_backend_wrap_carries_context() {
        let err = CoreError::backend(
            "create_subvolume",
            "fs1/g1/vol-1",
            BackendError::other("boom"),
        );
        assert!(format!("{err}").contains("create_subvolume"));
        assert!(format!("{err}").contains("fs1/g1/vol-1"));
    }

    #[test]
    fn test_journal_error_converts() {
        let err: CoreError = JournalError::UuidConflictExhausted.into();
        assert!(matches!(err, CoreError::Journal(_)));
    }
}
