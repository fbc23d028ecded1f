//! Error types for the reservation journal.

use thiserror::Error;

use crate::omap::OmapError;

/// Result type alias for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Error variants for journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// A lower-level object-store failure.
    #[error("omap error: {0}")]
    Omap(#[from] OmapError),

    /// A live reservation already exists for the request name.
    #[error("reservation already exists for request {request_name}")]
    ReservationExists {
        /// The request name that is already reserved.
        request_name: String,
    },

    /// The UUID directory does not point back at the request name that led
    /// to it. This should never happen; manual cleanup may be required.
    #[error(
        "journal inconsistent: request {request_name} maps to uuid {uuid} whose \
         back-pointer is {stored_request}"
    )]
    StateInconsistent {
        /// The request name being checked.
        request_name: String,
        /// The UUID the directory entry pointed at.
        uuid: String,
        /// The request name stored in the UUID directory.
        stored_request: String,
    },

    /// A snapshot reservation points at a different source volume than the
    /// one requested: a request-name conflict.
    #[error(
        "snapshot name conflict: request {request_name} expected source \
         {expected_source}, journal has {stored_source}"
    )]
    SnapSourceConflict {
        /// The request name being checked.
        request_name: String,
        /// The source the caller expected.
        expected_source: String,
        /// The source recorded in the journal.
        stored_source: String,
    },

    /// A snapshot source was supplied to a journal not configured to track
    /// sources.
    #[error("journal does not track snapshot sources")]
    SourceUnsupported,

    /// UUID generation kept colliding with existing reservations.
    #[error("uuid conflicts exceeded retry threshold")]
    UuidConflictExhausted,

    /// A generated object name was too short to carry a UUID suffix.
    #[error("unable to parse uuid from generated name {name:?}")]
    MalformedGeneratedName {
        /// The offending name.
        name: String,
    },
}
