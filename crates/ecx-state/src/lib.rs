//! # ecx-state — Transaction Lifecycle
//!
//! The authoritative state machine for an escrow transaction:
//!
//! ```text
//! INITIATED → FUNDED → VERIFICATION_IN_PROGRESS → VERIFICATION_COMPLETE
//!     → SETTLEMENT_PENDING → SETTLED
//! ```
//!
//! with `DISPUTED` reachable from every non-terminal state (resolving back
//! to the suspended state or forward to `CANCELLED`) and `CANCELLED`
//! reachable from every non-terminal state.
//!
//! ## Design Choice: Validated Enum over Typestate
//!
//! Disputes and cancellation are reachable from five different states, and
//! a resolved dispute restores whichever state was suspended. Typestate
//! would duplicate `raise_dispute()`/`cancel()` across five `impl` blocks
//! and still need a runtime value for the restore target. A validated enum
//! with typed guard evidence per transition gives the same per-call-site
//! guarantee — you cannot call [`Transaction::fund`] without a
//! [`FundingConfirmation`] — while serializing directly via serde for
//! storage and transport.
//!
//! The state machine communicates outward only through returned
//! [`StateChange`] events; it holds no reference to the orchestrator.

pub mod lifecycle;

pub use lifecycle::{
    CancellationReason, DisputeResolution, FundingConfirmation, SettlementConfirmation,
    StateChange, Transaction, TransactionState, TransitionRecord, VerificationSummary,
};
