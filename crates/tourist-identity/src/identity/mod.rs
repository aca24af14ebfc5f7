//! Tourist identity records as held by the ledger.
//!
//! The ledger owns every record; the reconciler only ever reads a fresh
//! copy and, when a record has expired, asks for its inactivation.

pub mod record;

pub use record::{IdentityRecord, IdentityStatus, StakeholderRole, TouristId};
