//! # Identity Newtypes
//!
//! Domain-primitive newtypes for every identifier in the escrow stack. Each
//! identifier is a distinct type — a [`TransactionId`] is not interchangeable
//! with a [`TaskId`] even though both wrap a UUID.
//!
//! ## Validation
//!
//! UUID-based identifiers are always valid by construction. String-based
//! identifiers ([`PartyId`], [`PropertyId`], [`AgentId`], [`WalletId`],
//! [`LedgerRef`]) originate outside this process — a CRM, a listing source,
//! the wallet gateway, the ledger — and validate non-emptiness at
//! construction and at deserialization time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Implement `Deserialize` for string newtypes that must validate their
/// contents. Deserializes as a plain `String`, then routes through the
/// type's `new()` constructor so invalid values are rejected at
/// deserialization time — not silently accepted.
macro_rules! impl_validating_deserialize {
    ($ty:ident) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Declare a UUID-backed identifier newtype with the standard surface:
/// `new`, `from_uuid`, `as_uuid`, `Default`, `Display`, `FromStr`.
macro_rules! uuid_id {
    ($(#[$doc:meta])* $ty:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $ty(Uuid);

        impl $ty {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an identifier from an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $ty {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix(concat!($prefix, ":")).unwrap_or(s);
                Uuid::from_str(s).map(Self)
            }
        }
    };
}

// ── UUID-based identifiers ─────────────────────────────────────────────

uuid_id!(
    /// A unique identifier for an escrow transaction.
    TransactionId,
    "txn"
);

uuid_id!(
    /// A unique identifier for a verification task within a workflow.
    TaskId,
    "task"
);

uuid_id!(
    /// A unique identifier for a submitted verification report.
    ReportId,
    "report"
);

uuid_id!(
    /// A unique identifier for a payment record.
    PaymentId,
    "pay"
);

uuid_id!(
    /// A unique identifier for a final settlement.
    SettlementId,
    "settle"
);

uuid_id!(
    /// A unique identifier for a ledger audit event.
    LedgerEventId,
    "levt"
);

/// A unique identifier for a wallet milestone.
///
/// Milestones are one-to-one with verification tasks, so the milestone id is
/// derived from the task id. This makes milestone release naturally
/// idempotent: retrying a release for the same task always names the same
/// milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MilestoneId(Uuid);

impl MilestoneId {
    /// Create a milestone identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<TaskId> for MilestoneId {
    fn from(task_id: TaskId) -> Self {
        Self(*task_id.as_uuid())
    }
}

impl std::fmt::Display for MilestoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ms:{}", self.0)
    }
}

// ── String-based identifiers ───────────────────────────────────────────

/// Declare a string-backed identifier newtype validated as non-empty.
macro_rules! string_id {
    ($(#[$doc:meta])* $ty:ident, $err:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        pub struct $ty(String);

        impl $ty {
            /// Create a new identifier, rejecting empty or blank values.
            pub fn new(raw: impl Into<String>) -> Result<Self, ValidationError> {
                let raw = raw.into();
                if raw.trim().is_empty() {
                    return Err(ValidationError::$err);
                }
                Ok(Self(raw))
            }

            /// Access the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl_validating_deserialize!($ty);
    };
}

string_id!(
    /// An external party identifier (buyer, seller, agent, vendor).
    ///
    /// Opaque to this system; issued by the party directory upstream.
    PartyId,
    EmptyPartyId
);

string_id!(
    /// An external property/listing identifier.
    PropertyId,
    EmptyPropertyId
);

string_id!(
    /// An identifier for a verification agent integration.
    AgentId,
    EmptyAgentId
);

string_id!(
    /// A wallet identifier issued by the wallet gateway.
    WalletId,
    EmptyWalletId
);

string_id!(
    /// An opaque reference returned by the ledger for a recorded event.
    ///
    /// For the built-in ledger this is the hex SHA-256 digest of the event,
    /// chained to the previous event for the same transaction.
    LedgerRef,
    EmptyLedgerRef
);
