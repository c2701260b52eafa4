//! # Agent Registry
//!
//! Wires each verification type to its agent variant and profile, and
//! derives the standard closing task template from that data. Fee and
//! dependency facts live here as data rather than behavior on the agents.

use std::collections::HashMap;
use std::time::Duration;

use ecx_core::{
    AgentId, EscrowConfig, Money, ValidationError, VerificationType, WorkflowError,
};
use ecx_workflow::{TaskSpec, TaskTemplate};

use crate::agent::VerificationAgent;

/// Fee, dependency, and scheduling data for one verification discipline.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    /// The discipline.
    pub verification_type: VerificationType,
    /// The agent integration identifier.
    pub agent_id: AgentId,
    /// Fixed fee released from escrow on approval.
    pub fee: Money,
    /// Disciplines whose reports must be approved first.
    pub depends_on: Vec<VerificationType>,
    /// Deadline offset from task assignment.
    pub deadline_offset: Duration,
}

/// Registry of verification agents and their profiles.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: HashMap<VerificationType, VerificationAgent>,
    profiles: Vec<AgentProfile>,
}

const DAY: u64 = 24 * 3600;

impl AgentRegistry {
    /// The standard closing registry.
    ///
    /// Title search and inspection run first and independently. Appraisal
    /// waits on both. Lending waits on the appraisal and carries no fee;
    /// lender costs are settled outside escrow, so its milestone release
    /// is a no-op.
    pub fn standard(config: &EscrowConfig) -> Result<Self, ValidationError> {
        let currency = config.currency;
        let profile = |vt: VerificationType,
                       fee_minor: i64,
                       depends_on: Vec<VerificationType>,
                       days: u64|
         -> Result<AgentProfile, ValidationError> {
            Ok(AgentProfile {
                verification_type: vt,
                agent_id: AgentId::new(format!("agent:{vt}"))?,
                fee: Money::from_minor(fee_minor, currency)?,
                depends_on,
                deadline_offset: Duration::from_secs(days * DAY),
            })
        };

        let profiles = vec![
            profile(VerificationType::TitleSearch, 50_000, vec![], 5)?,
            profile(VerificationType::Inspection, 40_000, vec![], 5)?,
            profile(
                VerificationType::Appraisal,
                45_000,
                vec![VerificationType::TitleSearch, VerificationType::Inspection],
                7,
            )?,
            profile(
                VerificationType::Lending,
                0,
                vec![VerificationType::Appraisal],
                10,
            )?,
        ];

        let agents = VerificationType::all()
            .iter()
            .map(|vt| (*vt, VerificationAgent::for_type(*vt)))
            .collect();

        Ok(Self { agents, profiles })
    }

    /// The agent for a verification type.
    pub fn agent_for(&self, verification_type: VerificationType) -> Option<&VerificationAgent> {
        self.agents.get(&verification_type)
    }

    /// The profile for a verification type.
    pub fn profile_for(&self, verification_type: VerificationType) -> Option<&AgentProfile> {
        self.profiles
            .iter()
            .find(|p| p.verification_type == verification_type)
    }

    /// All profiles, in template order.
    pub fn profiles(&self) -> &[AgentProfile] {
        &self.profiles
    }

    /// Build the task template the workflow engine instantiates from.
    pub fn task_template(&self) -> Result<TaskTemplate, WorkflowError> {
        TaskTemplate::new(
            self.profiles
                .iter()
                .map(|p| TaskSpec {
                    verification_type: p.verification_type,
                    depends_on: p.depends_on.clone(),
                    deadline_offset: p.deadline_offset,
                    fee: p.fee,
                    agent_id: p.agent_id.clone(),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_type() {
        let registry = AgentRegistry::standard(&EscrowConfig::default()).expect("registry");
        for vt in VerificationType::all() {
            assert!(registry.agent_for(*vt).is_some());
            assert!(registry.profile_for(*vt).is_some());
        }
    }

    #[test]
    fn standard_template_is_valid() {
        let registry = AgentRegistry::standard(&EscrowConfig::default()).expect("registry");
        let template = registry.task_template().expect("acyclic and closed");
        assert_eq!(template.len(), 4);
        let lending = template
            .spec_for(VerificationType::Lending)
            .expect("present");
        assert!(lending.fee.is_zero());
        assert_eq!(lending.depends_on, vec![VerificationType::Appraisal]);
    }

    #[test]
    fn appraisal_waits_on_title_and_inspection() {
        let registry = AgentRegistry::standard(&EscrowConfig::default()).expect("registry");
        let appraisal = registry
            .profile_for(VerificationType::Appraisal)
            .expect("present");
        assert_eq!(
            appraisal.depends_on,
            vec![VerificationType::TitleSearch, VerificationType::Inspection]
        );
    }
}
