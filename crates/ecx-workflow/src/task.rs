//! # Verification Tasks and Reports
//!
//! Record types for one unit of due-diligence work and its submitted
//! outcome. Reports are immutable once created — a resubmission creates a
//! new report linked to a new task attempt, never mutates an existing one.

use serde::{Deserialize, Serialize};

use ecx_core::{AgentId, Money, ReportId, TaskId, Timestamp, TransactionId, VerificationType};

// ── Status vocabularies ────────────────────────────────────────────────

/// The lifecycle status of a verification task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created and waiting for prerequisites or dispatch.
    Assigned,
    /// Dispatched to the agent; work underway.
    InProgress,
    /// Finished with an approved report. Terminal.
    Completed,
    /// Finished with a rejected report; a fresh attempt replaces it. Terminal.
    Failed,
    /// Withdrawn because the transaction ended. Terminal.
    Cancelled,
}

impl TaskStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this status admits no further task activity.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The review outcome recorded on a verification report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Findings accepted; the task counts toward workflow completion.
    Approved,
    /// Findings unacceptable; the task fails and a fresh attempt is created.
    Rejected,
    /// Findings ambiguous; held for operator review, task stays open.
    NeedsReview,
}

impl ReportStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsReview => "needs_review",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Records ────────────────────────────────────────────────────────────

/// One unit of due-diligence work assigned to a verification agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationTask {
    /// Unique task identifier.
    pub id: TaskId,
    /// The transaction this task verifies.
    pub transaction_id: TransactionId,
    /// The verification discipline.
    pub verification_type: VerificationType,
    /// The agent integration assigned to the work.
    pub agent_id: AgentId,
    /// Current status.
    pub status: TaskStatus,
    /// When the task was assigned.
    pub assigned_at: Timestamp,
    /// Assignment time plus the template's deadline offset.
    pub deadline: Timestamp,
    /// Fixed fee released from escrow when the report is approved.
    pub fee: Money,
    /// Verification types that must be approved before this task may start.
    pub prerequisites: Vec<VerificationType>,
    /// The report submitted for this task, once one exists.
    pub report_id: Option<ReportId>,
    /// Attempt number for this verification type, starting at 1.
    pub attempt: u32,
}

/// The submitted outcome of a verification task. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Unique report identifier.
    pub id: ReportId,
    /// The task this report was submitted for.
    pub task_id: TaskId,
    /// Review outcome.
    pub status: ReportStatus,
    /// Structured findings, shaped per verification type.
    pub findings: serde_json::Value,
    /// References to supporting documents.
    pub documents: Vec<String>,
    /// When the agent submitted the report.
    pub submitted_at: Timestamp,
    /// When the report was reviewed, if review has happened.
    pub reviewed_at: Option<Timestamp>,
}

impl VerificationReport {
    /// Create a report for a task.
    pub fn new(
        task_id: TaskId,
        status: ReportStatus,
        findings: serde_json::Value,
        documents: Vec<String>,
    ) -> Self {
        Self {
            id: ReportId::new(),
            task_id,
            status,
            findings,
            documents,
            submitted_at: Timestamp::now(),
            reviewed_at: None,
        }
    }
}
