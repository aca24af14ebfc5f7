//! Expiry classification.
//!
//! Pure decisions over a record and the engine's wall clock. A record is
//! not expired at the exact boundary second: `now == end_time` is a no-op.

use serde::{Deserialize, Serialize};

use crate::identity::{IdentityRecord, IdentityStatus};

/// Why a candidate was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// Inactive or Suspended when read.
    #[serde(rename = "non-active")]
    NonActive,
    /// Enumerated, then gone by the time it was fetched.
    #[serde(rename = "vanished-between-read")]
    Vanished,
    /// Active when read, but no longer Active when the write landed.
    #[serde(rename = "settled-concurrently")]
    SettledConcurrently,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonActive => "non-active",
            Self::Vanished => "vanished-between-read",
            Self::SettledConcurrently => "settled-concurrently",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    NoOp,
    Transition,
    Skip(SkipReason),
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOp => f.write_str("no-op"),
            Self::Transition => f.write_str("transition"),
            Self::Skip(reason) => write!(f, "skip ({reason})"),
        }
    }
}

/// Classify `record` against `now` (Unix seconds).
pub fn classify(record: &IdentityRecord, now: u64) -> Classification {
    if record.status != IdentityStatus::Active {
        Classification::Skip(SkipReason::NonActive)
    } else if now > record.end_time {
        Classification::Transition
    } else {
        Classification::NoOp
    }
}

/// Whether the telemetry side may still track this identity.
pub fn is_trackable(record: &IdentityRecord, now: u64) -> bool {
    record.status == IdentityStatus::Active && now <= record.end_time
}
