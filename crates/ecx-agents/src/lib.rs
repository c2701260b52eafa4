//! # ecx-agents — Verification Agent Variants
//!
//! The four verification disciplines a closing runs through, dispatched as
//! one enum rather than a trait-object hierarchy:
//!
//! - **Agent** ([`agent`]): [`VerificationAgent`] with `execute_verification`
//!   and `validate_report` per variant. Fee and dependency data live in the
//!   registry's [`AgentProfile`], not on the variants.
//!
//! - **Registry** ([`registry`]): [`AgentRegistry`] wiring each verification
//!   type to its agent and profile, and producing the standard closing task
//!   template from that data.
//!
//! Agents are external collaborators at the system boundary; the variants
//! here are the in-process bindings that produce and structurally validate
//! reports. The orchestrator routes every report through `validate_report`
//! before it reaches the workflow engine, regardless of origin.

pub mod agent;
pub mod registry;

pub use agent::{VerificationAgent, VerificationContext};
pub use registry::{AgentProfile, AgentRegistry};
