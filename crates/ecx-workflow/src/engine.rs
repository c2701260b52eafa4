//! # Workflow Engine
//!
//! In-memory workflow manager backed by `DashMap`. One workflow per
//! transaction, instantiated from the engine's [`TaskTemplate`].
//!
//! A task is *ready* when every one of its prerequisite types has a report
//! in approved status. Independent tasks are handed out together for
//! concurrent dispatch; dependent tasks are withheld until prerequisites
//! resolve. Overdue tasks raise advisory escalation events — the engine
//! never auto-fails or auto-retries verification work.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use ecx_core::{
    ReportId, TaskId, Timestamp, TransactionId, VerificationType, WorkflowError,
};

use crate::task::{ReportStatus, TaskStatus, VerificationReport, VerificationTask};
use crate::template::TaskTemplate;

// ── Events and summaries ───────────────────────────────────────────────

/// Advisory escalation for a task past its deadline.
///
/// Raised for operator intervention; the task itself is left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    /// The overdue task.
    pub task_id: TaskId,
    /// The transaction the task belongs to.
    pub transaction_id: TransactionId,
    /// The verification discipline.
    pub verification_type: VerificationType,
    /// The missed deadline.
    pub deadline: Timestamp,
    /// How far past the deadline the task is, in seconds.
    pub overdue_secs: u64,
    /// When the escalation was raised.
    pub raised_at: Timestamp,
}

/// Aggregate progress of one transaction's workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Verification types in the template.
    pub total_types: u32,
    /// Types with an approved report.
    pub approved_types: u32,
    /// Tasks not yet in a terminal status.
    pub outstanding_tasks: u32,
}

impl WorkflowSummary {
    /// Whether every verification type is approved and nothing is open.
    pub fn all_approved(&self) -> bool {
        self.total_types > 0
            && self.approved_types == self.total_types
            && self.outstanding_tasks == 0
    }
}

// ── Internal workflow state ────────────────────────────────────────────

#[derive(Debug)]
struct WorkflowRecord {
    tasks: HashMap<TaskId, VerificationTask>,
    reports: HashMap<ReportId, VerificationReport>,
    /// The active task attempt for each verification type.
    current: HashMap<VerificationType, TaskId>,
    approved: HashSet<VerificationType>,
    /// Task creation order, for stable listings.
    order: Vec<TaskId>,
}

impl WorkflowRecord {
    fn ready_task_ids(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| {
                self.tasks.get(id).is_some_and(|t| {
                    t.status == TaskStatus::Assigned
                        && t.prerequisites.iter().all(|p| self.approved.contains(p))
                })
            })
            .copied()
            .collect()
    }
}

// ── The Engine ─────────────────────────────────────────────────────────

/// Workflow engine for verification task graphs.
///
/// Thread-safe via `DashMap`; every mutation validates and commits under a
/// single entry lock, so readiness checks are TOCTOU-free.
pub struct WorkflowEngine {
    template: TaskTemplate,
    workflows: DashMap<TransactionId, WorkflowRecord>,
    task_index: DashMap<TaskId, TransactionId>,
}

impl WorkflowEngine {
    /// Create an engine that instantiates workflows from `template`.
    pub fn new(template: TaskTemplate) -> Self {
        Self {
            template,
            workflows: DashMap::new(),
            task_index: DashMap::new(),
        }
    }

    /// The template this engine instantiates.
    pub fn template(&self) -> &TaskTemplate {
        &self.template
    }

    /// Build the task graph for a transaction and return the tasks that are
    /// ready for immediate dispatch.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::WorkflowAlreadyExists`] if the transaction already
    /// has a workflow.
    pub fn create_workflow(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<VerificationTask>, WorkflowError> {
        if self.workflows.contains_key(&transaction_id) {
            return Err(WorkflowError::WorkflowAlreadyExists(
                transaction_id.to_string(),
            ));
        }

        let now = Timestamp::now();
        let mut record = WorkflowRecord {
            tasks: HashMap::new(),
            reports: HashMap::new(),
            current: HashMap::new(),
            approved: HashSet::new(),
            order: Vec::new(),
        };

        for spec in self.template.specs() {
            let task = VerificationTask {
                id: TaskId::new(),
                transaction_id,
                verification_type: spec.verification_type,
                agent_id: spec.agent_id.clone(),
                status: TaskStatus::Assigned,
                assigned_at: now,
                deadline: spec.deadline_from(now),
                fee: spec.fee,
                prerequisites: spec.depends_on.clone(),
                report_id: None,
                attempt: 1,
            };
            self.task_index.insert(task.id, transaction_id);
            record.current.insert(spec.verification_type, task.id);
            record.order.push(task.id);
            record.tasks.insert(task.id, task);
        }

        let ready: Vec<VerificationTask> = record
            .ready_task_ids()
            .iter()
            .filter_map(|id| record.tasks.get(id).cloned())
            .collect();

        tracing::info!(
            transaction_id = %transaction_id,
            tasks = record.order.len(),
            ready = ready.len(),
            "verification workflow created"
        );
        self.workflows.insert(transaction_id, record);
        Ok(ready)
    }

    /// Tasks currently ready for dispatch.
    pub fn ready_tasks(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<VerificationTask>, WorkflowError> {
        let record = self.get(transaction_id)?;
        Ok(record
            .ready_task_ids()
            .iter()
            .filter_map(|id| record.tasks.get(id).cloned())
            .collect())
    }

    /// Record that a ready task was dispatched to its agent:
    /// `assigned → in_progress`.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::TaskNotReady`] if a prerequisite type is not yet
    /// approved — a task never enters `in_progress` early.
    pub fn mark_dispatched(&self, task_id: TaskId) -> Result<VerificationTask, WorkflowError> {
        let transaction_id = self.owner_of(task_id)?;
        let mut entry = self.get_mut(transaction_id)?;
        let record = entry.value_mut();

        let missing: Vec<String> = {
            let task = record
                .tasks
                .get(&task_id)
                .ok_or_else(|| WorkflowError::UnknownTask(task_id.to_string()))?;
            if task.status != TaskStatus::Assigned {
                return Err(WorkflowError::InvalidTransition {
                    from: task.status.to_string(),
                    to: TaskStatus::InProgress.to_string(),
                    reason: format!("task {task_id} is not awaiting dispatch"),
                });
            }
            task.prerequisites
                .iter()
                .filter(|p| !record.approved.contains(p))
                .map(|p| p.to_string())
                .collect()
        };
        if !missing.is_empty() {
            return Err(WorkflowError::TaskNotReady {
                task_id: task_id.to_string(),
                missing: missing.join(", "),
            });
        }

        let task = record
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| WorkflowError::UnknownTask(task_id.to_string()))?;
        task.status = TaskStatus::InProgress;
        Ok(task.clone())
    }

    /// Record a submitted report for a task and return the tasks that
    /// became ready as a result.
    ///
    /// - `approved` completes the task and unlocks dependents.
    /// - `rejected` fails the task and creates a fresh attempt for the same
    ///   type (returned if its prerequisites are already approved).
    /// - `needs_review` stores the report and leaves the task open.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::ReportMismatch`] if the report names a different
    /// task; [`WorkflowError::TaskNotReady`] if prerequisites are unmet;
    /// [`WorkflowError::InvalidTransition`] if the task is terminal.
    pub fn mark_complete(
        &self,
        task_id: TaskId,
        report: &VerificationReport,
    ) -> Result<Vec<VerificationTask>, WorkflowError> {
        if report.task_id != task_id {
            return Err(WorkflowError::ReportMismatch {
                report_id: report.id.to_string(),
                report_task_id: report.task_id.to_string(),
                task_id: task_id.to_string(),
            });
        }

        let transaction_id = self.owner_of(task_id)?;
        let mut entry = self.get_mut(transaction_id)?;
        let record = entry.value_mut();

        let (verification_type, spec_missing) = {
            let task = record
                .tasks
                .get(&task_id)
                .ok_or_else(|| WorkflowError::UnknownTask(task_id.to_string()))?;
            if task.status.is_terminal() {
                return Err(WorkflowError::InvalidTransition {
                    from: task.status.to_string(),
                    to: "completed".to_string(),
                    reason: format!("task {task_id} already finished"),
                });
            }
            let missing: Vec<String> = task
                .prerequisites
                .iter()
                .filter(|p| !record.approved.contains(p))
                .map(|p| p.to_string())
                .collect();
            (task.verification_type, missing)
        };
        // A report for a withheld task means a dependency was skipped.
        if !spec_missing.is_empty() {
            return Err(WorkflowError::TaskNotReady {
                task_id: task_id.to_string(),
                missing: spec_missing.join(", "),
            });
        }

        record.reports.insert(report.id, report.clone());

        let mut newly_ready: Vec<TaskId> = Vec::new();
        match report.status {
            ReportStatus::Approved => {
                let previously_ready: HashSet<TaskId> =
                    record.ready_task_ids().into_iter().collect();
                {
                    let task = record.tasks.get_mut(&task_id).expect_present();
                    task.status = TaskStatus::Completed;
                    task.report_id = Some(report.id);
                }
                record.approved.insert(verification_type);
                newly_ready = record
                    .ready_task_ids()
                    .into_iter()
                    .filter(|id| !previously_ready.contains(id))
                    .collect();
            }
            ReportStatus::Rejected => {
                {
                    let task = record.tasks.get_mut(&task_id).expect_present();
                    task.status = TaskStatus::Failed;
                    task.report_id = Some(report.id);
                }
                // Fresh attempt for the same type; no auto-retry of the
                // rejected work itself.
                let attempt = self.spawn_attempt(record, transaction_id, verification_type, task_id);
                let ready = record
                    .tasks
                    .get(&attempt)
                    .is_some_and(|t| t.prerequisites.iter().all(|p| record.approved.contains(p)));
                if ready {
                    newly_ready.push(attempt);
                }
            }
            ReportStatus::NeedsReview => {
                let task = record.tasks.get_mut(&task_id).expect_present();
                task.status = TaskStatus::InProgress;
                task.report_id = Some(report.id);
            }
        }

        tracing::info!(
            transaction_id = %transaction_id,
            task_id = %task_id,
            verification_type = %verification_type,
            report_status = %report.status,
            newly_ready = newly_ready.len(),
            "verification report recorded"
        );

        Ok(newly_ready
            .iter()
            .filter_map(|id| record.tasks.get(id).cloned())
            .collect())
    }

    /// All non-terminal tasks past their deadline, as escalation events.
    ///
    /// Escalation is advisory: the tasks keep their status and an operator
    /// decides the outcome.
    pub fn overdue_tasks(&self, now: Timestamp) -> Vec<EscalationEvent> {
        let mut events = Vec::new();
        for entry in self.workflows.iter() {
            for task in entry.value().tasks.values() {
                if !task.status.is_terminal() && now > task.deadline {
                    let overdue = now.since(task.deadline);
                    let event = EscalationEvent {
                        task_id: task.id,
                        transaction_id: task.transaction_id,
                        verification_type: task.verification_type,
                        deadline: task.deadline,
                        overdue_secs: overdue.num_seconds().max(0) as u64,
                        raised_at: now,
                    };
                    tracing::warn!(
                        task_id = %event.task_id,
                        transaction_id = %event.transaction_id,
                        verification_type = %event.verification_type,
                        overdue_secs = event.overdue_secs,
                        "verification task overdue"
                    );
                    events.push(event);
                }
            }
        }
        events
    }

    /// Cancel every non-terminal task for a transaction.
    pub fn cancel_remaining(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<VerificationTask>, WorkflowError> {
        let mut entry = self.get_mut(transaction_id)?;
        let record = entry.value_mut();
        let mut cancelled = Vec::new();
        for id in record.order.clone() {
            if let Some(task) = record.tasks.get_mut(&id) {
                if !task.status.is_terminal() {
                    task.status = TaskStatus::Cancelled;
                    cancelled.push(task.clone());
                }
            }
        }
        Ok(cancelled)
    }

    /// All tasks for a transaction, in creation order.
    pub fn tasks_for(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<VerificationTask>, WorkflowError> {
        let record = self.get(transaction_id)?;
        Ok(record
            .order
            .iter()
            .filter_map(|id| record.tasks.get(id).cloned())
            .collect())
    }

    /// A single task by identifier.
    pub fn task(&self, task_id: TaskId) -> Result<VerificationTask, WorkflowError> {
        let transaction_id = self.owner_of(task_id)?;
        let record = self.get(transaction_id)?;
        record
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownTask(task_id.to_string()))
    }

    /// All reports recorded for a transaction.
    pub fn reports_for(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<VerificationReport>, WorkflowError> {
        let record = self.get(transaction_id)?;
        let mut reports: Vec<VerificationReport> = record.reports.values().cloned().collect();
        reports.sort_by_key(|r| r.submitted_at);
        Ok(reports)
    }

    /// Aggregate progress for a transaction's workflow.
    pub fn summary(&self, transaction_id: TransactionId) -> Result<WorkflowSummary, WorkflowError> {
        let record = self.get(transaction_id)?;
        let outstanding = record
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .count() as u32;
        Ok(WorkflowSummary {
            total_types: self.template.len() as u32,
            approved_types: record.approved.len() as u32,
            outstanding_tasks: outstanding,
        })
    }

    fn spawn_attempt(
        &self,
        record: &mut WorkflowRecord,
        transaction_id: TransactionId,
        verification_type: VerificationType,
        failed_task: TaskId,
    ) -> TaskId {
        let now = Timestamp::now();
        let prior_attempt = record
            .tasks
            .get(&failed_task)
            .map(|t| t.attempt)
            .unwrap_or(1);
        // The spec for this type is present by template closure.
        let spec = self
            .template
            .spec_for(verification_type)
            .cloned()
            .unwrap_or_else(|| unreachable_spec(verification_type));
        let deadline = spec.deadline_from(now);
        let task = VerificationTask {
            id: TaskId::new(),
            transaction_id,
            verification_type,
            agent_id: spec.agent_id,
            status: TaskStatus::Assigned,
            assigned_at: now,
            deadline,
            fee: spec.fee,
            prerequisites: spec.depends_on,
            report_id: None,
            attempt: prior_attempt + 1,
        };
        let id = task.id;
        self.task_index.insert(id, transaction_id);
        record.current.insert(verification_type, id);
        record.order.push(id);
        record.tasks.insert(id, task);
        id
    }

    fn owner_of(&self, task_id: TaskId) -> Result<TransactionId, WorkflowError> {
        self.task_index
            .get(&task_id)
            .map(|e| *e.value())
            .ok_or_else(|| WorkflowError::UnknownTask(task_id.to_string()))
    }

    fn get(
        &self,
        transaction_id: TransactionId,
    ) -> Result<dashmap::mapref::one::Ref<'_, TransactionId, WorkflowRecord>, WorkflowError> {
        self.workflows
            .get(&transaction_id)
            .ok_or_else(|| WorkflowError::WorkflowMissing(transaction_id.to_string()))
    }

    fn get_mut(
        &self,
        transaction_id: TransactionId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, TransactionId, WorkflowRecord>, WorkflowError> {
        self.workflows
            .get_mut(&transaction_id)
            .ok_or_else(|| WorkflowError::WorkflowMissing(transaction_id.to_string()))
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("workflows", &self.workflows.len())
            .finish()
    }
}

/// Fallback for a template entry that disappeared after validation.
/// Unreachable by construction; keeps the hot path free of panics.
fn unreachable_spec(verification_type: VerificationType) -> crate::template::TaskSpec {
    crate::template::TaskSpec {
        verification_type,
        depends_on: Vec::new(),
        deadline_offset: std::time::Duration::from_secs(7 * 24 * 3600),
        fee: ecx_core::Money::zero(ecx_core::CurrencyCode::USD),
        agent_id: ecx_core::AgentId::new(format!("agent:{verification_type}"))
            .unwrap_or_else(|_| unreachable!("static agent id is non-empty")),
    }
}

/// `expect` with intent, restricted to lookups guarded earlier in the same
/// locked section.
trait ExpectPresent<T> {
    fn expect_present(self) -> T;
}

impl<'a, T> ExpectPresent<&'a mut T> for Option<&'a mut T> {
    fn expect_present(self) -> &'a mut T {
        match self {
            Some(v) => v,
            // Checked under the same entry lock a few lines above.
            None => unreachable!("task present under entry lock"),
        }
    }
}
