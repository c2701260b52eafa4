//! # ecx-workflow — Verification Workflow Engine
//!
//! Builds and drives the dependency graph of verification tasks for a
//! transaction:
//!
//! - **Task** ([`task`]): The [`VerificationTask`] and
//!   [`VerificationReport`] records and their status vocabularies.
//!
//! - **Template** ([`template`]): The fixed `{type, dependencies, deadline
//!   offset, fee, agent}` template a workflow is instantiated from,
//!   validated acyclic and closed at construction.
//!
//! - **Engine** ([`engine`]): Readiness gating (a task is ready when every
//!   dependency type has an approved report), dispatch tracking, deadline
//!   escalation, and fresh-attempt resubmission after a rejected report.
//!
//! The engine never auto-retries verification work — a rejected inspection
//! is domain judgment, not a transient fault — and escalation of an overdue
//! task is advisory: an operator decides the outcome.

pub mod engine;
pub mod task;
pub mod template;

pub use engine::{EscalationEvent, WorkflowEngine, WorkflowSummary};
pub use task::{ReportStatus, TaskStatus, VerificationReport, VerificationTask};
pub use template::{TaskSpec, TaskTemplate};
