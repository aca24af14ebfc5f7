//! Identity record data model.

use chrono::Datelike;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::SignerAddress;

/// Opaque unique key of a tourist identity.
///
/// Minted IDs look like `T{year}{month}-{n}` (e.g. `T20259-48213`), but the
/// reconciler never interprets the format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TouristId(pub String);

impl TouristId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh ID for the current UTC month.
    pub fn generate() -> Self {
        let now = chrono::Utc::now();
        let n: u32 = rand::thread_rng().gen_range(10_001..=999_998);
        Self(format!("T{}{}-{}", now.year(), now.month(), n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TouristId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TouristId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a record. Wire codes: 0 Active, 1 Inactive, 2 Suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum IdentityStatus {
    Active,
    Inactive,
    /// Asserted by an external authority; never written by the reconciler.
    Suspended,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }
}

impl std::fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<IdentityStatus> for u8 {
    fn from(status: IdentityStatus) -> u8 {
        match status {
            IdentityStatus::Active => 0,
            IdentityStatus::Inactive => 1,
            IdentityStatus::Suspended => 2,
        }
    }
}

impl TryFrom<u8> for IdentityStatus {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Active),
            1 => Ok(Self::Inactive),
            2 => Ok(Self::Suspended),
            other => Err(format!("unknown identity status code {other}")),
        }
    }
}

/// Who registered the identity. Wire code `u8`; unknown codes round-trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum StakeholderRole {
    #[default]
    TourOperator,
    Other(u8),
}

impl From<u8> for StakeholderRole {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::TourOperator,
            other => Self::Other(other),
        }
    }
}

impl From<StakeholderRole> for u8 {
    fn from(role: StakeholderRole) -> u8 {
        match role {
            StakeholderRole::TourOperator => 0,
            StakeholderRole::Other(code) => code,
        }
    }
}

impl std::fmt::Display for StakeholderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TourOperator => f.write_str("tour-operator"),
            Self::Other(code) => write!(f, "stakeholder-{code}"),
        }
    }
}

/// A tourist's time-bounded digital identity as stored on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    #[serde(rename = "touristID")]
    pub tourist_id: TouristId,
    pub registered_by: SignerAddress,
    pub stakeholder_role: StakeholderRole,
    /// Hash of the off-ledger KYC artifact. Never interpreted here.
    pub kyc_hash: String,
    /// Unix seconds.
    pub start_time: u64,
    /// Unix seconds, `>= start_time`.
    pub end_time: u64,
    /// Ledger write time of the latest status change.
    pub last_update_time: u64,
    pub status: IdentityStatus,
}

impl IdentityRecord {
    /// Length of the validity window in seconds.
    pub fn duration_secs(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }

    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }
}
