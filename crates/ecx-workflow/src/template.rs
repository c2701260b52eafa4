//! # Task Templates
//!
//! A workflow is instantiated from a fixed template: one [`TaskSpec`] per
//! verification type with its dependencies, deadline offset, fee, and
//! assigned agent. Templates are validated at construction — duplicate
//! types, dangling dependencies, and cycles are rejected before any
//! workflow can be built from them.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ecx_core::{AgentId, Money, Timestamp, VerificationType, WorkflowError};

/// One entry in a task template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// The verification discipline.
    pub verification_type: VerificationType,
    /// Types whose reports must be approved before this task may start.
    pub depends_on: Vec<VerificationType>,
    /// Deadline offset from assignment time.
    pub deadline_offset: Duration,
    /// Fixed fee released on approval. Zero-fee tasks skip release.
    pub fee: Money,
    /// The agent integration that performs this work.
    pub agent_id: AgentId,
}

impl TaskSpec {
    /// The deadline for a task assigned at `assigned_at`.
    pub fn deadline_from(&self, assigned_at: Timestamp) -> Timestamp {
        assigned_at.plus(chrono::Duration::seconds(self.deadline_offset.as_secs() as i64))
    }
}

/// A validated task template.
///
/// Construction guarantees: each verification type appears at most once,
/// every dependency names a type in the template, and the dependency graph
/// is acyclic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    specs: Vec<TaskSpec>,
}

impl TaskTemplate {
    /// Create a template, validating structure.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::DuplicateTaskType`],
    /// [`WorkflowError::UnknownDependency`], or
    /// [`WorkflowError::DependencyCycle`].
    pub fn new(specs: Vec<TaskSpec>) -> Result<Self, WorkflowError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.verification_type) {
                return Err(WorkflowError::DuplicateTaskType(
                    spec.verification_type.to_string(),
                ));
            }
        }
        for spec in &specs {
            for dep in &spec.depends_on {
                if !seen.contains(dep) {
                    return Err(WorkflowError::UnknownDependency {
                        task_type: spec.verification_type.to_string(),
                        dependency: dep.to_string(),
                    });
                }
            }
        }
        Self::check_acyclic(&specs)?;
        Ok(Self { specs })
    }

    /// The template entries, in declaration order.
    pub fn specs(&self) -> &[TaskSpec] {
        &self.specs
    }

    /// The entry for a verification type.
    pub fn spec_for(&self, verification_type: VerificationType) -> Option<&TaskSpec> {
        self.specs
            .iter()
            .find(|s| s.verification_type == verification_type)
    }

    /// Number of verification types in the template.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the template is empty.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Depth-first cycle check over the dependency edges.
    fn check_acyclic(specs: &[TaskSpec]) -> Result<(), WorkflowError> {
        let deps: HashMap<VerificationType, &Vec<VerificationType>> = specs
            .iter()
            .map(|s| (s.verification_type, &s.depends_on))
            .collect();

        // 0 = unvisited, 1 = on the current path, 2 = done.
        let mut mark: HashMap<VerificationType, u8> = HashMap::new();

        fn visit(
            node: VerificationType,
            deps: &HashMap<VerificationType, &Vec<VerificationType>>,
            mark: &mut HashMap<VerificationType, u8>,
        ) -> Result<(), WorkflowError> {
            match mark.get(&node) {
                Some(1) => return Err(WorkflowError::DependencyCycle(node.to_string())),
                Some(2) => return Ok(()),
                _ => {}
            }
            mark.insert(node, 1);
            if let Some(children) = deps.get(&node) {
                for child in children.iter() {
                    visit(*child, deps, mark)?;
                }
            }
            mark.insert(node, 2);
            Ok(())
        }

        for spec in specs {
            visit(spec.verification_type, &deps, &mut mark)?;
        }
        Ok(())
    }
}
