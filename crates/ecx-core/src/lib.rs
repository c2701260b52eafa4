//! # ecx-core — Domain Primitives
//!
//! Foundation crate for the ECX escrow stack. Everything here is a
//! dependency of every other crate in the workspace:
//!
//! - **Identity** ([`identity`]): Distinct newtypes for every identifier in
//!   the system. You cannot pass a [`TaskId`] where a [`PaymentId`] is
//!   expected.
//!
//! - **Money** ([`money`]): Exact-arithmetic monetary amounts in integer
//!   minor units. Floats never appear in a fund computation.
//!
//! - **Temporal** ([`temporal`]): UTC-only [`Timestamp`] with canonical
//!   ISO 8601 serialization.
//!
//! - **Error** ([`error`]): The four-kind error taxonomy shared by the whole
//!   stack, plus the caller-facing [`ErrorKind`] classification.
//!
//! - **Config** ([`config`]): One [`EscrowConfig`] struct constructed at
//!   process start and passed by reference into each component constructor.
//!   There is no ambient global state anywhere in the workspace.

pub mod config;
pub mod error;
pub mod identity;
pub mod money;
pub mod temporal;

// Re-export primary types for ergonomic imports.

pub use config::{EscrowConfig, RetrySettings};
pub use error::{
    ErrorKind, EscrowError, IntegrationError, PaymentError, ValidationError, WorkflowError,
};
pub use identity::{
    AgentId, LedgerEventId, LedgerRef, MilestoneId, PartyId, PaymentId, PropertyId, ReportId,
    SettlementId, TaskId, TransactionId, WalletId,
};
pub use money::{CurrencyCode, Money};
pub use temporal::Timestamp;

/// The verification disciplines a closing runs through.
///
/// Shared vocabulary across the workflow engine, the agent registry, and the
/// orchestrator. Dependency and fee data live with the agents and task
/// templates, not on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    /// Title search and lien review.
    TitleSearch,
    /// Physical property inspection.
    Inspection,
    /// Independent valuation of the property.
    Appraisal,
    /// Lender underwriting and loan approval.
    Lending,
}

impl VerificationType {
    /// All verification types, in template order.
    pub fn all() -> &'static [VerificationType] {
        &[
            Self::TitleSearch,
            Self::Inspection,
            Self::Appraisal,
            Self::Lending,
        ]
    }

    /// The canonical string identifier for serialization and agent routing.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TitleSearch => "title_search",
            Self::Inspection => "inspection",
            Self::Appraisal => "appraisal",
            Self::Lending => "lending",
        }
    }
}

impl std::fmt::Display for VerificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
