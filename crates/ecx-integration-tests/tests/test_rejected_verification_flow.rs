//! # Rejected Verification Flow
//!
//! A rejected inspection must fail its task, keep the appraisal locked,
//! keep the transaction out of `SETTLEMENT_PENDING`, and release no fee.
//! A fresh attempt for the same discipline then carries the closing to
//! completion, releasing the inspection fee exactly once.

use std::sync::Arc;

use ecx_core::{CurrencyCode, EscrowConfig, Money, PartyId, PropertyId, TaskId, VerificationType};
use ecx_gateways::{InMemoryLedger, InMemoryNotifier, InMemoryWalletGateway};
use ecx_orchestrator::{EscrowOrchestrator, InitiateRequest, PaymentType};
use ecx_state::TransactionState;
use ecx_workflow::{ReportStatus, TaskStatus, VerificationReport, VerificationTask};
use serde_json::json;

type Orchestrator = EscrowOrchestrator<InMemoryWalletGateway, InMemoryLedger, InMemoryNotifier>;

fn usd(minor: i64) -> Money {
    Money::from_minor(minor, CurrencyCode::USD).unwrap()
}

fn stack() -> Orchestrator {
    EscrowOrchestrator::new(
        EscrowConfig::default(),
        Arc::new(InMemoryWalletGateway::new()),
        Arc::new(InMemoryLedger::new()),
        Arc::new(InMemoryNotifier::new()),
    )
    .unwrap()
}

async fn funded_with_workflow(orch: &Orchestrator) -> ecx_state::Transaction {
    let txn = orch
        .initiate_transaction(InitiateRequest {
            buyer: PartyId::new("party:buyer").unwrap(),
            seller: PartyId::new("party:seller").unwrap(),
            property_id: PropertyId::new("prop:7-oak").unwrap(),
            earnest_money: usd(1_000_000),
            total_price: usd(40_000_000),
            target_closing: None,
            metadata: json!({}),
        })
        .await
        .unwrap();
    orch.create_verification_workflow(txn.id).await.unwrap();
    orch.get_transaction(txn.id).unwrap()
}

fn task_of(tasks: &[VerificationTask], vt: VerificationType, status: TaskStatus) -> TaskId {
    tasks
        .iter()
        .find(|t| t.verification_type == vt && t.status == status)
        .map(|t| t.id)
        .unwrap()
}

fn approved(task_id: TaskId, findings: serde_json::Value) -> VerificationReport {
    VerificationReport::new(
        task_id,
        ReportStatus::Approved,
        findings,
        vec!["doc://reports/approved.pdf".to_string()],
    )
}

#[tokio::test]
async fn rejected_inspection_blocks_appraisal_and_settlement() {
    let orch = stack();
    let txn = funded_with_workflow(&orch).await;
    let tasks = orch.list_tasks(txn.id).unwrap();
    let inspection = task_of(&tasks, VerificationType::Inspection, TaskStatus::Assigned);

    let rejection = VerificationReport::new(
        inspection,
        ReportStatus::Rejected,
        json!({
            "severity": "major",
            "defects": ["foundation crack along east wall"],
        }),
        vec!["doc://reports/inspection-1.pdf".to_string()],
    );
    let newly_ready = orch
        .process_verification_completion(inspection, rejection)
        .await
        .unwrap();

    // The rejected task failed and a fresh attempt is immediately ready.
    let tasks = orch.list_tasks(txn.id).unwrap();
    let failed = tasks.iter().find(|t| t.id == inspection).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    let retry = tasks
        .iter()
        .find(|t| t.verification_type == VerificationType::Inspection && t.attempt == 2)
        .unwrap();
    assert_eq!(retry.status, TaskStatus::Assigned);
    assert!(newly_ready.iter().any(|t| t.id == retry.id));

    // No fee moved and the lifecycle did not advance.
    assert!(orch
        .list_payments(txn.id)
        .iter()
        .all(|p| p.payment_type != PaymentType::Verification));
    assert_eq!(
        orch.get_transaction(txn.id).unwrap().state,
        TransactionState::VerificationInProgress
    );

    // Appraisal stays locked behind the unapproved inspection.
    let appraisal = task_of(&tasks, VerificationType::Appraisal, TaskStatus::Assigned);
    let premature = approved(appraisal, json!({"appraised_value_minor": 40_000_000}));
    assert!(orch
        .process_verification_completion(appraisal, premature)
        .await
        .is_err());
}

#[tokio::test]
async fn fresh_attempt_carries_the_closing_to_settlement() {
    let orch = stack();
    let txn = funded_with_workflow(&orch).await;
    let tasks = orch.list_tasks(txn.id).unwrap();
    let inspection = task_of(&tasks, VerificationType::Inspection, TaskStatus::Assigned);

    let rejection = VerificationReport::new(
        inspection,
        ReportStatus::Rejected,
        json!({"severity": "critical", "defects": ["active roof leak"]}),
        vec![],
    );
    orch.process_verification_completion(inspection, rejection)
        .await
        .unwrap();

    // Approve the remaining disciplines in dependency order.
    let tasks = orch.list_tasks(txn.id).unwrap();
    let title = task_of(&tasks, VerificationType::TitleSearch, TaskStatus::Assigned);
    orch.process_verification_completion(
        title,
        approved(title, json!({"title_clear": true, "liens": []})),
    )
    .await
    .unwrap();

    let retry = tasks
        .iter()
        .find(|t| t.verification_type == VerificationType::Inspection && t.attempt == 2)
        .map(|t| t.id)
        .unwrap();
    orch.process_verification_completion(
        retry,
        approved(retry, json!({"severity": "minor", "defects": ["loose gutter"]})),
    )
    .await
    .unwrap();

    let tasks = orch.list_tasks(txn.id).unwrap();
    let appraisal = task_of(&tasks, VerificationType::Appraisal, TaskStatus::Assigned);
    orch.process_verification_completion(
        appraisal,
        approved(appraisal, json!({"appraised_value_minor": 40_000_000})),
    )
    .await
    .unwrap();

    let lending = task_of(&tasks, VerificationType::Lending, TaskStatus::Assigned);
    orch.process_verification_completion(
        lending,
        approved(lending, json!({"loan_approved": true, "conditions": []})),
    )
    .await
    .unwrap();

    assert_eq!(
        orch.get_transaction(txn.id).unwrap().state,
        TransactionState::SettlementPending
    );

    // The inspection fee moved exactly once, for the successful attempt.
    let payments = orch.list_payments(txn.id);
    let inspection_payments: Vec<_> = payments
        .iter()
        .filter(|p| p.payment_type == PaymentType::Verification && p.amount == usd(40_000))
        .collect();
    assert_eq!(inspection_payments.len(), 1);
    assert_eq!(inspection_payments[0].task_id, Some(retry));

    let settlement = orch.execute_settlement(txn.id).await.unwrap();
    assert_eq!(settlement.breakdown.total, usd(40_000_000));
}

#[tokio::test]
async fn malformed_report_is_refused_before_the_workflow_sees_it() {
    let orch = stack();
    let txn = funded_with_workflow(&orch).await;
    let tasks = orch.list_tasks(txn.id).unwrap();
    let title = task_of(&tasks, VerificationType::TitleSearch, TaskStatus::Assigned);

    // An approved title report claiming outstanding liens is structurally
    // inconsistent and must be rejected without touching the task.
    let inconsistent = approved(
        title,
        json!({"title_clear": false, "liens": ["hoa lien 2019"]}),
    );
    let err = orch.process_verification_completion(title, inconsistent).await;
    assert!(err.is_err());

    let after = orch.list_tasks(txn.id).unwrap();
    let task = after.iter().find(|t| t.id == title).unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert!(task.report_id.is_none());
}
