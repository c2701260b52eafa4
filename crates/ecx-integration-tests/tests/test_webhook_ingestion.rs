//! # Inbound Webhook Ingestion
//!
//! Agent reports arriving over the webhook surface are authenticated with
//! the shared token (constant-time compare, fail closed on an empty
//! configuration) before they touch the workflow.

use std::sync::Arc;

use ecx_core::{CurrencyCode, EscrowConfig, EscrowError, Money, PartyId, PropertyId,
    VerificationType};
use ecx_gateways::{
    InboundReport, InMemoryLedger, InMemoryNotifier, InMemoryWalletGateway, WebhookEnvelope,
};
use ecx_orchestrator::{EscrowOrchestrator, InitiateRequest, PaymentType};
use ecx_workflow::TaskStatus;
use serde_json::json;

type Orchestrator = EscrowOrchestrator<InMemoryWalletGateway, InMemoryLedger, InMemoryNotifier>;

fn usd(minor: i64) -> Money {
    Money::from_minor(minor, CurrencyCode::USD).unwrap()
}

fn stack(token: &str) -> Orchestrator {
    let config = EscrowConfig {
        webhook_token: token.to_string(),
        ..EscrowConfig::default()
    };
    EscrowOrchestrator::new(
        config,
        Arc::new(InMemoryWalletGateway::new()),
        Arc::new(InMemoryLedger::new()),
        Arc::new(InMemoryNotifier::new()),
    )
    .unwrap()
}

async fn with_workflow(orch: &Orchestrator) -> (ecx_state::Transaction, ecx_core::TaskId) {
    let txn = orch
        .initiate_transaction(InitiateRequest {
            buyer: PartyId::new("party:buyer").unwrap(),
            seller: PartyId::new("party:seller").unwrap(),
            property_id: PropertyId::new("prop:5-ash").unwrap(),
            earnest_money: usd(1_000_000),
            total_price: usd(40_000_000),
            target_closing: None,
            metadata: json!({}),
        })
        .await
        .unwrap();
    let ready = orch.create_verification_workflow(txn.id).await.unwrap();
    let title = ready
        .iter()
        .find(|t| t.verification_type == VerificationType::TitleSearch)
        .unwrap()
        .id;
    (orch.get_transaction(txn.id).unwrap(), title)
}

fn envelope(token: &str, task_id: ecx_core::TaskId, status: &str) -> WebhookEnvelope {
    WebhookEnvelope {
        source: "agent:title_search".to_string(),
        token: token.to_string(),
        report: InboundReport {
            task_id,
            status: status.to_string(),
            findings: json!({"title_clear": true, "liens": []}),
            documents: vec!["doc://title/report.pdf".to_string()],
        },
    }
}

#[tokio::test]
async fn authenticated_report_completes_the_task() {
    let orch = stack("s3cret-rotating-token");
    let (txn, title) = with_workflow(&orch).await;

    orch.process_verification_webhook(envelope("s3cret-rotating-token", title, "approved"))
        .await
        .unwrap();

    let task = orch
        .list_tasks(txn.id)
        .unwrap()
        .into_iter()
        .find(|t| t.id == title)
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        orch.list_payments(txn.id)
            .iter()
            .filter(|p| p.payment_type == PaymentType::Verification)
            .count(),
        1
    );
}

#[tokio::test]
async fn wrong_token_is_rejected_without_side_effects() {
    let orch = stack("s3cret-rotating-token");
    let (txn, title) = with_workflow(&orch).await;

    let err = orch
        .process_verification_webhook(envelope("s3cret-rotating-tokeN", title, "approved"))
        .await;
    assert!(matches!(err, Err(EscrowError::Validation(_))));

    let task = orch
        .list_tasks(txn.id)
        .unwrap()
        .into_iter()
        .find(|t| t.id == title)
        .unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
}

#[tokio::test]
async fn empty_configured_token_fails_closed() {
    let orch = stack("");
    let (_, title) = with_workflow(&orch).await;

    // Even an empty presented token must not match an empty configuration.
    let err = orch.process_verification_webhook(envelope("", title, "approved")).await;
    assert!(matches!(err, Err(EscrowError::Validation(_))));
}

#[tokio::test]
async fn unknown_status_string_is_malformed() {
    let orch = stack("s3cret-rotating-token");
    let (_, title) = with_workflow(&orch).await;

    let err = orch
        .process_verification_webhook(envelope("s3cret-rotating-token", title, "looks-fine"))
        .await;
    assert!(matches!(err, Err(EscrowError::Validation(_))));
}
