//! # ecx-orchestrator — Escrow Coordination
//!
//! The top of the ECX stack. [`EscrowOrchestrator`] drives a real-estate
//! closing from initiation through verification, milestone release, dispute
//! handling, and final settlement, coordinating the wallet, ledger, and
//! notification ports:
//!
//! - **Orchestrator** ([`orchestrator`]): The coordinator itself, generic
//!   over the three port traits so tests run against the in-memory bindings
//!   and deployments against the HTTP ones.
//!
//! - **Payment** ([`payment`]): The orchestrator's record of every fund
//!   movement it caused.
//!
//! - **Settlement** ([`settlement`]): Exact-arithmetic computation of the
//!   final distribution; the seller's proceeds are the remainder, so the
//!   lines always sum to the purchase price.
//!
//! State is advanced write-after-confirm: a gateway call must succeed before
//! the transaction record or a payment record reflects it. A failed call
//! leaves the transaction in its last valid state with an error that says
//! whether retrying can help.

pub mod orchestrator;
pub mod payment;
pub mod settlement;

pub use orchestrator::{DispatchOutcome, EscrowOrchestrator, InitiateRequest};
pub use payment::{Payment, PaymentStatus, PaymentType};
pub use settlement::{compute_breakdown, Settlement, SettlementBreakdown};
