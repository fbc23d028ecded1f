#![warn(missing_docs)]

//! SubvolCSI reservation journal: the idempotency ledger mapping
//! orchestrator-supplied request names to generated backend object names.
//!
//! The journal is stored as key/value entries in a namespaced object store
//! (an omap-equivalent). Two levels of objects are maintained per journal:
//! a directory object keyed by request name, and one object per reserved
//! UUID holding back-pointers (request name, generated object name, and the
//! snapshot source where applicable). Creation and deletion walk these
//! levels in inverse order, which is what makes stale entries safe to
//! garbage collect.
//!
//! All journal entry points require the caller to hold a request-name-scoped
//! lock for the duration of the check/reserve/undo sequence; the journal
//! itself performs no locking.

pub mod error;
pub mod omap;
pub mod reservation;

pub use error::{JournalError, JournalResult};
pub use omap::{MemOmapStore, OmapError, OmapResult, OmapStore};
pub use reservation::{
    ImageAttributes, JournalConfig, ReservationJournal, ReservationRecord,
};
