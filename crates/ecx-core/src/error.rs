//! # Error Hierarchy
//!
//! Structured error types for the escrow stack, built with `thiserror`.
//! No `Box<dyn Error>`, no `.unwrap()` outside tests.
//!
//! Four kinds partition every failure in the system:
//!
//! - [`ValidationError`] — malformed input or a business-rule violation.
//!   Returned to the caller immediately; never retried.
//! - [`PaymentError`] — the wallet gateway rejected or failed a fund
//!   movement. Retried within the payment budget, then surfaced with the
//!   transaction left unchanged.
//! - [`WorkflowError`] — an illegal state transition or task-dependency
//!   violation. A caller or programming error; never retried.
//! - [`IntegrationError`] — an external dependency is unavailable beyond
//!   the retry/circuit-breaker budget. Surfaced with explicit
//!   temporarily-unavailable semantics; transaction state is preserved.
//!
//! Transient infrastructure failures are absorbed by the retry layer in
//! `ecx-gateways` and never leak past it unless the budget is exhausted.

use thiserror::Error;

use crate::money::Money;

/// Top-level error type for the escrow stack.
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Malformed input or business-rule violation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Fund movement rejected or failed.
    #[error("payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Illegal state transition or task-dependency violation.
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// External dependency unavailable beyond the retry budget.
    #[error("integration error: {0}")]
    Integration(#[from] IntegrationError),
}

/// Caller-facing classification of an [`EscrowError`].
///
/// Lets an orchestrating caller (e.g. a conversational layer) choose
/// wording without inspecting error internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was invalid; correct it and resubmit.
    InvalidRequest,
    /// A dependency is unavailable or a fund movement failed; the same
    /// request can be retried later without side effects.
    TemporarilyUnavailable,
    /// The attempted operation indicates a bug or inconsistent state.
    InternalInconsistency,
}

impl EscrowError {
    /// Classify this error for caller-facing messaging.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::InvalidRequest,
            Self::Payment(_) | Self::Integration(_) => ErrorKind::TemporarilyUnavailable,
            Self::Workflow(_) => ErrorKind::InternalInconsistency,
        }
    }
}

/// Malformed input or business-rule violations. Never retried.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Party identifier is empty.
    #[error("invalid party ID: must be non-empty")]
    EmptyPartyId,

    /// Property identifier is empty.
    #[error("invalid property ID: must be non-empty")]
    EmptyPropertyId,

    /// Agent identifier is empty.
    #[error("invalid agent ID: must be non-empty")]
    EmptyAgentId,

    /// Wallet identifier is empty.
    #[error("invalid wallet ID: must be non-empty")]
    EmptyWalletId,

    /// Ledger reference is empty.
    #[error("invalid ledger reference: must be non-empty")]
    EmptyLedgerRef,

    /// Currency code is not three uppercase ASCII letters.
    #[error("invalid currency code: \"{0}\" (expected three uppercase letters)")]
    InvalidCurrencyCode(String),

    /// Arithmetic attempted across different currencies.
    #[error("currency mismatch in {operation}: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency on the left-hand side.
        left: String,
        /// Currency on the right-hand side.
        right: String,
        /// The operation that mixed them.
        operation: &'static str,
    },

    /// Monetary arithmetic overflowed `i64` minor units.
    #[error("amount overflow in {operation}")]
    AmountOverflow {
        /// The operation that overflowed.
        operation: &'static str,
    },

    /// An amount went negative where only non-negative values are allowed.
    #[error("negative amount: {minor_units} minor units {currency}")]
    NegativeAmount {
        /// The offending value in minor units.
        minor_units: i64,
        /// Currency of the amount.
        currency: String,
    },

    /// A monetary field that must be strictly positive was zero.
    #[error("{field} must be greater than zero")]
    NonPositiveAmount {
        /// The field name.
        field: &'static str,
    },

    /// Buyer and seller are the same party.
    #[error("buyer and seller must be distinct parties: {party}")]
    SamePartyBothSides {
        /// The duplicated party identifier.
        party: String,
    },

    /// Earnest money exceeds the total purchase price.
    #[error("earnest money {earnest} exceeds total price {total}")]
    EarnestExceedsPrice {
        /// Proposed earnest money.
        earnest: Money,
        /// Total purchase price.
        total: Money,
    },

    /// A verification report failed structural validation for its task type.
    #[error("malformed {verification_type} report: {reason}")]
    MalformedReport {
        /// The verification discipline the report was submitted for.
        verification_type: String,
        /// What the structural check found.
        reason: String,
    },

    /// Settlement distribution lines do not sum to the settlement total.
    #[error("unbalanced distribution: lines sum to {lines_minor} minor units, total is {total_minor}")]
    UnbalancedDistribution {
        /// Sum of the distribution line items in minor units.
        lines_minor: i64,
        /// Settlement total in minor units.
        total_minor: i64,
    },

    /// An inbound webhook failed authentication.
    #[error("webhook rejected from {claimed_source}: authentication failed")]
    WebhookRejected {
        /// The claimed webhook source.
        claimed_source: String,
    },
}

/// Fund-movement failures from the wallet gateway. Retried within the
/// payment budget before surfacing.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Deposit confirmation did not match the agreed earnest money.
    #[error("deposit mismatch: expected {expected}, gateway confirmed {actual}")]
    DepositMismatch {
        /// The agreed earnest money.
        expected: Money,
        /// What the gateway actually confirmed.
        actual: Money,
    },

    /// The gateway rejected the operation.
    #[error("gateway rejected {operation}: {reason}")]
    Rejected {
        /// The gateway operation.
        operation: &'static str,
        /// The gateway's stated reason.
        reason: String,
    },

    /// The wallet holds less than the requested movement.
    #[error("insufficient escrow funds: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Requested amount.
        requested: Money,
        /// Escrowed balance available.
        available: Money,
    },

    /// The wallet is unknown to the gateway.
    #[error("unknown wallet: {0}")]
    UnknownWallet(String),

    /// The milestone was never configured on the wallet.
    #[error("unknown milestone {milestone} on wallet {wallet}")]
    UnknownMilestone {
        /// The milestone identifier.
        milestone: String,
        /// The wallet identifier.
        wallet: String,
    },
}

/// Illegal state transitions and task-dependency violations. Never retried.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// The attempted transition is not valid from the current state.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// The current state name.
        from: String,
        /// The attempted target state name.
        to: String,
        /// Why the transition was rejected.
        reason: String,
    },

    /// The transaction is in a terminal state and accepts no transitions.
    #[error("transaction {transaction_id} is terminal in state {state}")]
    TerminalState {
        /// The transaction identifier.
        transaction_id: String,
        /// The terminal state name.
        state: String,
    },

    /// No transaction with this identifier exists.
    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    /// No verification task with this identifier exists.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// A task was started before its prerequisites were approved.
    #[error("task {task_id} is not ready: waiting on {missing}")]
    TaskNotReady {
        /// The task identifier.
        task_id: String,
        /// The unmet prerequisite types.
        missing: String,
    },

    /// The task template contains a dependency cycle.
    #[error("task template contains a dependency cycle involving {0}")]
    DependencyCycle(String),

    /// The task template names the same verification type twice.
    #[error("task template declares {0} more than once")]
    DuplicateTaskType(String),

    /// A template dependency names a type the template does not contain.
    #[error("task {task_type} depends on {dependency}, which is not in the template")]
    UnknownDependency {
        /// The dependent task type.
        task_type: String,
        /// The missing dependency type.
        dependency: String,
    },

    /// A workflow already exists for the transaction.
    #[error("workflow already exists for transaction {0}")]
    WorkflowAlreadyExists(String),

    /// No workflow has been created for the transaction.
    #[error("no workflow for transaction {0}")]
    WorkflowMissing(String),

    /// The report references a different task than the one submitted for.
    #[error("report {report_id} belongs to task {report_task_id}, not {task_id}")]
    ReportMismatch {
        /// The report identifier.
        report_id: String,
        /// The task the report was created for.
        report_task_id: String,
        /// The task the caller submitted against.
        task_id: String,
    },

    /// The transaction is disputed; milestone releases are frozen.
    #[error("transaction {transaction_id} is disputed; operation refused")]
    Disputed {
        /// The transaction identifier.
        transaction_id: String,
    },

    /// Dispute resolution was requested with no dispute outstanding.
    #[error("transaction {transaction_id} has no active dispute")]
    NoActiveDispute {
        /// The transaction identifier.
        transaction_id: String,
    },
}

/// External-dependency failures that survived the retry and circuit-breaker
/// budget. The transaction is left in its last valid state.
#[derive(Error, Debug)]
pub enum IntegrationError {
    /// The circuit breaker for this dependency is open.
    #[error("{dependency} circuit open; retry after {cooldown_remaining_ms}ms")]
    CircuitOpen {
        /// The guarded dependency name.
        dependency: &'static str,
        /// Milliseconds until the breaker admits a trial call.
        cooldown_remaining_ms: u64,
    },

    /// All retry attempts were exhausted.
    #[error("{dependency} {operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// The dependency name.
        dependency: &'static str,
        /// The logical operation.
        operation: &'static str,
        /// How many attempts were made.
        attempts: u32,
        /// The final attempt's failure.
        last_error: String,
    },

    /// The call exceeded its bounded timeout.
    #[error("{dependency} {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// The dependency name.
        dependency: &'static str,
        /// The logical operation.
        operation: &'static str,
        /// The configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The dependency returned a non-success HTTP status.
    #[error("{endpoint} returned {status}: {body}")]
    Http {
        /// The endpoint called.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        body: String,
    },

    /// Transport-level failure (connection refused, DNS, TLS).
    #[error("transport failure calling {endpoint}: {reason}")]
    Transport {
        /// The endpoint called.
        endpoint: String,
        /// The transport error.
        reason: String,
    },

    /// The dependency's response could not be deserialized.
    #[error("failed to deserialize response from {endpoint}: {reason}")]
    Deserialization {
        /// The endpoint called.
        endpoint: String,
        /// The deserialization failure.
        reason: String,
    },
}

impl IntegrationError {
    /// Whether this failure is transient and worth retrying.
    ///
    /// Non-retryable: 4xx responses and deserialization failures — repeating
    /// the identical request cannot change the outcome.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::CircuitOpen { .. }
            | Self::RetriesExhausted { .. }
            | Self::Deserialization { .. } => false,
        }
    }
}
