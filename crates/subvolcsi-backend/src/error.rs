//! Error taxonomy for backend admin calls.

use thiserror::Error;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Error variants a backend admin call can return.
///
/// The variants mirror the error classes the core dispatches on: not-found,
/// already-exists (which the backend also reuses for already-protected and
/// already-unprotected snapshots), not-implemented (old backend version),
/// not-empty, and missing metadata keys. Everything else is `Other`.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The referenced object (filesystem, group, subvolume, snapshot) does
    /// not exist.
    #[error("not found: {object}")]
    NotFound {
        /// Identifier of the missing object.
        object: String,
    },

    /// The object already exists. Snapshot protect/unprotect reuse this code
    /// for "already in the requested protection state".
    #[error("already exists: {object}")]
    AlreadyExists {
        /// Identifier of the conflicting object.
        object: String,
    },

    /// The backend version does not implement the requested operation.
    #[error("not implemented: {operation}")]
    NotImplemented {
        /// Name of the unimplemented operation.
        operation: String,
    },

    /// The object still has children and cannot be removed.
    #[error("not empty: {object}")]
    NotEmpty {
        /// Identifier of the non-empty object.
        object: String,
    },

    /// The metadata key is not set on the object.
    #[error("no such key: {key}")]
    NoSuchKey {
        /// The missing metadata key.
        key: String,
    },

    /// Unclassified backend failure.
    #[error("backend error: {message}")]
    Other {
        /// Description from the backend.
        message: String,
    },
}

impl BackendError {
    /// Builds a `NotFound` error for the given object identifier.
    pub fn not_found(object: impl Into<String>) -> Self {
        Self::NotFound {
            object: object.into(),
        }
    }

    /// Builds an `AlreadyExists` error for the given object identifier.
    pub fn already_exists(object: impl Into<String>) -> Self {
        Self::AlreadyExists {
            object: object.into(),
        }
    }

    /// Builds a `NotImplemented` error for the given operation name.
    pub fn not_implemented(operation: impl Into<String>) -> Self {
        Self::NotImplemented {
            operation: operation.into(),
        }
    }

    /// Builds an unclassified backend error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// True if this is the not-found class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True if this is the already-exists class.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// True if this is the not-implemented class.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }
}
