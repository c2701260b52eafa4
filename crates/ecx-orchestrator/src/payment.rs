//! # Payment Records
//!
//! The orchestrator's record of every fund movement it caused. One record
//! per successful movement; a retried milestone release reuses the same
//! milestone id at the gateway and therefore never produces a second
//! record.

use serde::{Deserialize, Serialize};

use ecx_core::{
    LedgerRef, MilestoneId, Money, PartyId, PaymentId, TaskId, Timestamp, TransactionId,
};

/// What a payment was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    /// The buyer's earnest-money deposit into escrow.
    EarnestMoney,
    /// A verification fee released on report approval.
    Verification,
    /// An agent commission paid at settlement.
    Commission,
    /// Closing costs paid at settlement.
    ClosingCost,
    /// The seller's proceeds paid at settlement.
    Settlement,
}

impl PaymentType {
    /// The canonical string name of this payment type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EarnestMoney => "earnest_money",
            Self::Verification => "verification",
            Self::Commission => "commission",
            Self::ClosingCost => "closing_cost",
            Self::Settlement => "settlement",
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created but not yet submitted to the gateway.
    Pending,
    /// Submitted and awaiting gateway confirmation.
    Processing,
    /// Confirmed by the gateway.
    Completed,
    /// The gateway refused or the retry budget ran out.
    Failed,
}

/// One fund movement caused by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Gateway payment identifier.
    pub id: PaymentId,
    /// The transaction the payment belongs to.
    pub transaction_id: TransactionId,
    /// What the payment was for.
    pub payment_type: PaymentType,
    /// Who received the funds.
    pub recipient: PartyId,
    /// Amount moved.
    pub amount: Money,
    /// Current status.
    pub status: PaymentStatus,
    /// The milestone released, for verification payments.
    pub milestone_id: Option<MilestoneId>,
    /// The task whose approval triggered the payment.
    pub task_id: Option<TaskId>,
    /// Ledger reference of the recorded payment event.
    pub ledger_ref: Option<LedgerRef>,
    /// When the record was created.
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_type_names_are_stable() {
        assert_eq!(PaymentType::EarnestMoney.as_str(), "earnest_money");
        assert_eq!(PaymentType::ClosingCost.as_str(), "closing_cost");
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Processing).expect("serialize"),
            "\"processing\""
        );
    }
}
