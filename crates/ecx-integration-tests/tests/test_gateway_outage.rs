//! # Wallet Gateway Outage
//!
//! When the wallet gateway fails past the retry budget during a milestone
//! release, the task keeps its completed status, no payment record is
//! created, and the transaction stays in its last valid state. The release
//! is safely retryable afterwards, and repeating it moves funds only once.
//!
//! A sustained outage trips the circuit breaker: further calls are refused
//! without touching the gateway until the cooldown elapses.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ecx_core::{
    CurrencyCode, EscrowConfig, EscrowError, IntegrationError, MilestoneId, Money, PartyId,
    PropertyId, RetrySettings, TransactionId, VerificationType, WalletId,
};
use ecx_gateways::{
    DepositConfirmation, DistributionLine, InMemoryLedger, InMemoryNotifier,
    InMemoryWalletGateway, LedgerEventType, Milestone, PaymentResult, SettlementResult,
    WalletGateway,
};
use ecx_orchestrator::{EscrowOrchestrator, InitiateRequest, PaymentType};
use ecx_state::{DisputeResolution, TransactionState};
use ecx_workflow::{ReportStatus, TaskStatus, VerificationReport};
use serde_json::json;

fn usd(minor: i64) -> Money {
    Money::from_minor(minor, CurrencyCode::USD).unwrap()
}

fn transport() -> EscrowError {
    EscrowError::Integration(IntegrationError::Transport {
        endpoint: "http://wallet.test/releases".to_string(),
        reason: "connection refused".to_string(),
    })
}

/// Delegating gateway that fails a configured number of calls per
/// operation before recovering.
struct FlakyWalletGateway {
    inner: InMemoryWalletGateway,
    release_failures: AtomicU32,
    create_failures: AtomicU32,
    refund_failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyWalletGateway {
    fn new(create_failures: u32, release_failures: u32) -> Self {
        Self {
            inner: InMemoryWalletGateway::new(),
            release_failures: AtomicU32::new(release_failures),
            create_failures: AtomicU32::new(create_failures),
            refund_failures: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    fn failing_refunds(refund_failures: u32) -> Self {
        Self {
            refund_failures: AtomicU32::new(refund_failures),
            ..Self::new(0, 0)
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl WalletGateway for FlakyWalletGateway {
    async fn create_wallet(
        &self,
        transaction_id: TransactionId,
        deposit: Money,
    ) -> Result<DepositConfirmation, EscrowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.create_failures) {
            return Err(transport());
        }
        self.inner.create_wallet(transaction_id, deposit).await
    }

    async fn deposit_funds(&self, wallet_id: WalletId, amount: Money) -> Result<Money, EscrowError> {
        self.inner.deposit_funds(wallet_id, amount).await
    }

    async fn configure_milestones(
        &self,
        wallet_id: WalletId,
        milestones: Vec<Milestone>,
    ) -> Result<(), EscrowError> {
        self.inner.configure_milestones(wallet_id, milestones).await
    }

    async fn release_milestone(
        &self,
        wallet_id: WalletId,
        milestone_id: MilestoneId,
        recipient: PartyId,
        amount: Money,
    ) -> Result<PaymentResult, EscrowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.release_failures) {
            return Err(transport());
        }
        self.inner
            .release_milestone(wallet_id, milestone_id, recipient, amount)
            .await
    }

    async fn execute_final_settlement(
        &self,
        wallet_id: WalletId,
        distributions: Vec<DistributionLine>,
    ) -> Result<SettlementResult, EscrowError> {
        self.inner.execute_final_settlement(wallet_id, distributions).await
    }

    async fn refund_remaining(
        &self,
        wallet_id: WalletId,
        recipient: PartyId,
    ) -> Result<Money, EscrowError> {
        if Self::take_failure(&self.refund_failures) {
            return Err(transport());
        }
        self.inner.refund_remaining(wallet_id, recipient).await
    }

    async fn wallet_balance(&self, wallet_id: WalletId) -> Result<Money, EscrowError> {
        self.inner.wallet_balance(wallet_id).await
    }
}

fn config(breaker_threshold: u32) -> EscrowConfig {
    EscrowConfig {
        payment_retry: RetrySettings {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        },
        breaker_failure_threshold: breaker_threshold,
        ..EscrowConfig::default()
    }
}

fn orchestrator(
    cfg: EscrowConfig,
    wallet: Arc<FlakyWalletGateway>,
) -> EscrowOrchestrator<FlakyWalletGateway, InMemoryLedger, InMemoryNotifier> {
    EscrowOrchestrator::new(
        cfg,
        wallet,
        Arc::new(InMemoryLedger::new()),
        Arc::new(InMemoryNotifier::new()),
    )
    .unwrap()
}

fn request() -> InitiateRequest {
    InitiateRequest {
        buyer: PartyId::new("party:buyer").unwrap(),
        seller: PartyId::new("party:seller").unwrap(),
        property_id: PropertyId::new("prop:9-birch").unwrap(),
        earnest_money: usd(1_000_000),
        total_price: usd(40_000_000),
        target_closing: None,
        metadata: json!({}),
    }
}

#[tokio::test]
async fn exhausted_release_leaves_the_task_payable() {
    let wallet = Arc::new(FlakyWalletGateway::new(0, 3));
    let orch = orchestrator(config(10), Arc::clone(&wallet));

    let txn = orch.initiate_transaction(request()).await.unwrap();
    orch.create_verification_workflow(txn.id).await.unwrap();
    let title = orch
        .list_tasks(txn.id)
        .unwrap()
        .into_iter()
        .find(|t| t.verification_type == VerificationType::TitleSearch)
        .unwrap();

    let report = VerificationReport::new(
        title.id,
        ReportStatus::Approved,
        json!({"title_clear": true, "liens": []}),
        vec!["doc://title.pdf".to_string()],
    );
    let err = orch
        .process_verification_completion(title.id, report)
        .await;
    assert!(matches!(
        err,
        Err(EscrowError::Integration(
            IntegrationError::RetriesExhausted { attempts: 3, .. }
        ))
    ));

    // The verification outcome survives the outage; only the payment is
    // outstanding.
    let after = orch
        .list_tasks(txn.id)
        .unwrap()
        .into_iter()
        .find(|t| t.id == title.id)
        .unwrap();
    assert_eq!(after.status, TaskStatus::Completed);
    assert!(orch
        .list_payments(txn.id)
        .iter()
        .all(|p| p.payment_type != PaymentType::Verification));
    assert_eq!(
        orch.get_transaction(txn.id).unwrap().state,
        TransactionState::VerificationInProgress
    );

    // Gateway recovered: the retry releases the fee exactly once.
    let wallet_id = orch.get_transaction(txn.id).unwrap().wallet_id.unwrap();
    let before = wallet.wallet_balance(wallet_id.clone()).await.unwrap();
    let payment = orch.retry_failed_payment(title.id).await.unwrap();
    assert_eq!(payment.amount, usd(50_000));
    assert_eq!(payment.task_id, Some(title.id));

    let replay = orch.retry_failed_payment(title.id).await.unwrap();
    assert_eq!(replay.id, payment.id);
    let after_balance = wallet.wallet_balance(wallet_id).await.unwrap();
    assert_eq!(before.checked_sub(after_balance).unwrap(), usd(50_000));
    assert_eq!(
        orch.list_payments(txn.id)
            .iter()
            .filter(|p| p.payment_type == PaymentType::Verification)
            .count(),
        1
    );
}

#[tokio::test]
async fn sustained_outage_trips_the_breaker() {
    let wallet = Arc::new(FlakyWalletGateway::new(u32::MAX, 0));
    let orch = orchestrator(config(2), Arc::clone(&wallet));

    // Two consecutive failures open the breaker; the third attempt is
    // refused before reaching the gateway.
    let err = orch.initiate_transaction(request()).await;
    assert!(matches!(
        err,
        Err(EscrowError::Integration(IntegrationError::CircuitOpen { .. }))
    ));
    assert_eq!(wallet.calls.load(Ordering::SeqCst), 2);

    // The half-funded transaction was driven to CANCELLED, not left dangling.
    let stranded = &orch.list_transactions()[0];
    assert_eq!(stranded.state, TransactionState::Cancelled);

    // While open, new work is refused without a single gateway call.
    let err = orch.initiate_transaction(request()).await;
    assert!(matches!(
        err,
        Err(EscrowError::Integration(IntegrationError::CircuitOpen { .. }))
    ));
    assert_eq!(wallet.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_refund_keeps_the_dispute_open() {
    let wallet = Arc::new(FlakyWalletGateway::failing_refunds(3));
    let orch = orchestrator(config(10), Arc::clone(&wallet));

    let txn = orch.initiate_transaction(request()).await.unwrap();
    orch.create_verification_workflow(txn.id).await.unwrap();
    orch.handle_dispute(txn.id, "zoning misrepresentation")
        .await
        .unwrap();

    let err = orch.resolve_dispute(txn.id, DisputeResolution::Cancel).await;
    assert!(matches!(
        err,
        Err(EscrowError::Integration(
            IntegrationError::RetriesExhausted { .. }
        ))
    ));

    // The store stays Disputed and the ledger never claims the dispute
    // closed while the refund is outstanding.
    assert_eq!(
        orch.get_transaction(txn.id).unwrap().state,
        TransactionState::Disputed
    );
    let trail = orch.get_audit_trail(txn.id).await.unwrap();
    assert!(trail
        .iter()
        .all(|e| e.event_type != LedgerEventType::DisputeResolved));

    // Gateway recovered: the retry completes the cancellation with exactly
    // one resolution event, recorded after the wind-down.
    let cancelled = orch
        .resolve_dispute(txn.id, DisputeResolution::Cancel)
        .await
        .unwrap();
    assert_eq!(cancelled.state, TransactionState::Cancelled);
    let trail = orch.get_audit_trail(txn.id).await.unwrap();
    assert_eq!(
        trail
            .iter()
            .filter(|e| e.event_type == LedgerEventType::DisputeResolved)
            .count(),
        1
    );
    assert_eq!(
        trail.last().unwrap().event_type,
        LedgerEventType::DisputeResolved
    );
}

#[tokio::test]
async fn failed_funding_surfaces_and_cancels() {
    let wallet = Arc::new(FlakyWalletGateway::new(3, 0));
    let orch = orchestrator(config(10), Arc::clone(&wallet));

    let err = orch.initiate_transaction(request()).await;
    assert!(matches!(
        err,
        Err(EscrowError::Integration(
            IntegrationError::RetriesExhausted { .. }
        ))
    ));
    let txn = &orch.list_transactions()[0];
    assert_eq!(txn.state, TransactionState::Cancelled);
    assert!(txn.wallet_id.is_none());
}
