//! # Escrow Orchestrator
//!
//! The top-level coordinator. Owns the transaction store, the workflow
//! engine, and the agent registry; drives every transaction through the
//! wallet, ledger, and notification ports.
//!
//! ## Concurrency
//!
//! Operations on different transactions run fully in parallel. Within one
//! transaction every mutating operation serializes through a per-transaction
//! `tokio::sync::Mutex`, so state transitions and milestone releases are
//! linearizable. Agent fan-out happens outside that lock; completion
//! handling re-acquires it per task.
//!
//! ## Failure posture
//!
//! Outbound calls go through the shared retry wrapper and the dependency's
//! circuit breaker. When a budget is exhausted the transaction stays in its
//! last valid state — never silently advanced — and the surfaced error says
//! whether retrying later can help. Notification failures are logged and
//! swallowed; they never fail an operation.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinSet;

use ecx_agents::{AgentRegistry, VerificationContext};
use ecx_core::{
    EscrowConfig, EscrowError, LedgerEventId, MilestoneId, Money, PartyId, PaymentError,
    PropertyId, ReportId, TaskId, Timestamp, TransactionId, ValidationError, VerificationType,
    WorkflowError,
};
use ecx_gateways::{
    call_with_retry, CircuitBreaker, LedgerClient, LedgerEvent, LedgerEventType, Milestone,
    NotificationEngine, WalletGateway, WebhookAuthenticator, WebhookEnvelope,
};
use ecx_state::{
    CancellationReason, DisputeResolution, FundingConfirmation, SettlementConfirmation,
    Transaction, TransactionState, VerificationSummary,
};
use ecx_workflow::{
    EscalationEvent, ReportStatus, VerificationReport, VerificationTask, WorkflowEngine,
};

use crate::payment::{Payment, PaymentStatus, PaymentType};
use crate::settlement::{compute_breakdown, Settlement, SettlementBreakdown};

// ── Request and outcome types ──────────────────────────────────────────

/// Inputs to [`EscrowOrchestrator::initiate_transaction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateRequest {
    /// The purchasing party.
    pub buyer: PartyId,
    /// The selling party.
    pub seller: PartyId,
    /// The property being closed.
    pub property_id: PropertyId,
    /// Earnest money to deposit into escrow.
    pub earnest_money: Money,
    /// Agreed purchase price.
    pub total_price: Money,
    /// Target closing date, if agreed.
    pub target_closing: Option<Timestamp>,
    /// Free-form contract metadata.
    pub metadata: serde_json::Value,
}

/// Per-task outcome of one fan-out dispatch round.
///
/// The round as a whole succeeds even when individual tasks fail; each
/// failure is carried here for the caller to act on.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// The dispatched task.
    pub task_id: TaskId,
    /// Its verification discipline.
    pub verification_type: VerificationType,
    /// The processed report, or why the task failed.
    pub outcome: Result<ReportId, EscrowError>,
}

// ── The Orchestrator ───────────────────────────────────────────────────

/// Central coordinator owning every transaction's lifecycle.
pub struct EscrowOrchestrator<W, L, N> {
    config: EscrowConfig,
    registry: AgentRegistry,
    engine: WorkflowEngine,
    wallet: Arc<W>,
    ledger: Arc<L>,
    notifier: Arc<N>,
    wallet_breaker: CircuitBreaker,
    ledger_breaker: CircuitBreaker,
    authenticator: WebhookAuthenticator,
    transactions: DashMap<TransactionId, Transaction>,
    payments: DashMap<TransactionId, Vec<Payment>>,
    settlements: DashMap<TransactionId, Settlement>,
    locks: DashMap<TransactionId, Arc<tokio::sync::Mutex<()>>>,
}

impl<W, L, N> EscrowOrchestrator<W, L, N>
where
    W: WalletGateway,
    L: LedgerClient,
    N: NotificationEngine,
{
    /// Build an orchestrator over the three ports.
    pub fn new(
        config: EscrowConfig,
        wallet: Arc<W>,
        ledger: Arc<L>,
        notifier: Arc<N>,
    ) -> Result<Self, EscrowError> {
        let registry = AgentRegistry::standard(&config)?;
        let engine = WorkflowEngine::new(registry.task_template()?);
        let wallet_breaker = CircuitBreaker::new(
            "wallet_gateway",
            config.breaker_failure_threshold,
            config.breaker_cooldown,
        );
        let ledger_breaker = CircuitBreaker::new(
            "ledger",
            config.breaker_failure_threshold,
            config.breaker_cooldown,
        );
        let authenticator = WebhookAuthenticator::new(&config);
        Ok(Self {
            config,
            registry,
            engine,
            wallet,
            ledger,
            notifier,
            wallet_breaker,
            ledger_breaker,
            authenticator,
            transactions: DashMap::new(),
            payments: DashMap::new(),
            settlements: DashMap::new(),
            locks: DashMap::new(),
        })
    }

    // ── Lifecycle operations ───────────────────────────────────────────

    /// Create a transaction, open its escrow wallet, and confirm funding.
    ///
    /// The transaction only reaches `FUNDED` after the gateway confirms a
    /// deposit matching the agreed earnest money. On a mismatch or a wallet
    /// failure the transaction is driven to `CANCELLED` — never left
    /// half-funded — and the underlying error is surfaced.
    pub async fn initiate_transaction(
        &self,
        request: InitiateRequest,
    ) -> Result<Transaction, EscrowError> {
        let transaction = Transaction::initiate(
            request.buyer,
            request.seller,
            request.property_id,
            request.earnest_money,
            request.total_price,
            request.target_closing,
            request.metadata,
        )?;
        let id = transaction.id;
        self.transactions.insert(id, transaction.clone());
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        self.log(
            id,
            LedgerEventType::TransactionInitiated,
            json!({
                "buyer": transaction.buyer,
                "seller": transaction.seller,
                "property_id": transaction.property_id,
                "earnest_minor": transaction.earnest_money.minor_units(),
                "total_minor": transaction.total_price.minor_units(),
            }),
        )
        .await?;

        let earnest = transaction.earnest_money;
        let confirmation = match call_with_retry(
            &self.wallet_breaker,
            self.config.payment_retry,
            "create_wallet",
            || async { self.wallet.create_wallet(id, earnest).await },
        )
        .await
        {
            Ok(confirmation) => confirmation,
            Err(err) => {
                self.abandon(id, "escrow wallet could not be opened").await;
                return Err(err);
            }
        };

        if confirmation.confirmed != earnest {
            // Return whatever actually landed before cancelling.
            if let Err(err) = self
                .wallet
                .refund_remaining(confirmation.wallet_id.clone(), transaction.buyer.clone())
                .await
            {
                tracing::warn!(transaction_id = %id, "mismatched deposit refund failed: {err}");
            }
            self.abandon(id, "deposit confirmation mismatch").await;
            return Err(PaymentError::DepositMismatch {
                expected: earnest,
                actual: confirmation.confirmed,
            }
            .into());
        }

        let mut updated = self.get(id)?;
        let change = updated.fund(FundingConfirmation {
            wallet_id: confirmation.wallet_id.clone(),
            deposited: confirmation.confirmed,
        })?;
        let escrow = PartyId::new(format!("escrow:{}", confirmation.wallet_id))?;

        // A transition commits only after its audit event is recorded. When
        // that write exhausts its budget the deposit is already sitting in
        // escrow, so it goes back to the buyer before the cancel.
        let event = match self
            .log(
                id,
                LedgerEventType::EarnestDeposited,
                json!({
                    "wallet_id": confirmation.wallet_id.clone(),
                    "deposited_minor": confirmation.confirmed.minor_units(),
                    "note": change.note,
                }),
            )
            .await
        {
            Ok(event) => event,
            Err(err) => {
                if let Err(refund_err) = self
                    .wallet
                    .refund_remaining(confirmation.wallet_id, transaction.buyer.clone())
                    .await
                {
                    tracing::error!(
                        transaction_id = %id,
                        "earnest refund after failed funding audit failed: {refund_err}"
                    );
                }
                self.abandon(id, "funding audit record could not be written")
                    .await;
                return Err(err);
            }
        };
        self.transactions.insert(id, updated.clone());
        self.record_payment(Payment {
            id: ecx_core::PaymentId::new(),
            transaction_id: id,
            payment_type: PaymentType::EarnestMoney,
            recipient: escrow,
            amount: confirmation.confirmed,
            status: PaymentStatus::Completed,
            milestone_id: None,
            task_id: None,
            ledger_ref: Some(event.ledger_ref),
            created_at: Timestamp::now(),
        });
        self.notify(id, "transaction_funded").await;

        tracing::info!(transaction_id = %id, state = %updated.state, "transaction initiated and funded");
        Ok(updated)
    }

    /// Build the verification workflow, configure wallet milestones for the
    /// fee-bearing tasks, and transition to `VERIFICATION_IN_PROGRESS`.
    ///
    /// Returns the tasks that are ready for immediate dispatch.
    pub async fn create_verification_workflow(
        &self,
        id: TransactionId,
    ) -> Result<Vec<VerificationTask>, EscrowError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut updated = self.get(id)?;
        // Guard first so a wrong-state call never creates a workflow.
        let change = updated.begin_verification()?;
        let wallet_id = updated
            .wallet_id
            .clone()
            .ok_or(ValidationError::EmptyWalletId)?;

        let ready = self.engine.create_workflow(id)?;
        let tasks = self.engine.tasks_for(id)?;

        let milestones: Vec<Milestone> = tasks
            .iter()
            .filter(|t| !t.fee.is_zero())
            .map(|t| {
                Ok(Milestone {
                    id: MilestoneId::from(t.id),
                    recipient: PartyId::new(t.agent_id.as_str())?,
                    amount: t.fee,
                })
            })
            .collect::<Result<_, ValidationError>>()?;
        call_with_retry(
            &self.wallet_breaker,
            self.config.payment_retry,
            "configure_milestones",
            || {
                let milestones = milestones.clone();
                let wallet_id = wallet_id.clone();
                async move { self.wallet.configure_milestones(wallet_id, milestones).await }
            },
        )
        .await?;

        for task in &tasks {
            self.log(
                id,
                LedgerEventType::TaskAssigned,
                json!({
                    "task_id": task.id,
                    "verification_type": task.verification_type,
                    "agent_id": task.agent_id,
                    "fee_minor": task.fee.minor_units(),
                    "deadline": task.deadline,
                }),
            )
            .await?;
        }
        self.transactions.insert(id, updated);
        self.notify(id, "verification_started").await;

        tracing::info!(
            transaction_id = %id,
            tasks = tasks.len(),
            ready = ready.len(),
            note = %change.note,
            "verification workflow created"
        );
        Ok(ready)
    }

    /// Run one fan-out round: dispatch every ready task to its agent
    /// concurrently, then feed each returned report through
    /// [`process_verification_completion`].
    ///
    /// Individual task failures do not abort the round; they are collected
    /// in the per-task outcomes.
    ///
    /// [`process_verification_completion`]: Self::process_verification_completion
    pub async fn dispatch_ready_tasks(
        &self,
        id: TransactionId,
    ) -> Result<Vec<DispatchOutcome>, EscrowError> {
        let transaction = self.get(id)?;
        if transaction.state != TransactionState::VerificationInProgress {
            return Err(WorkflowError::InvalidTransition {
                from: transaction.state.as_str().to_string(),
                to: TransactionState::VerificationInProgress.as_str().to_string(),
                reason: "verification is not running".to_string(),
            }
            .into());
        }
        let context = VerificationContext {
            transaction_id: id,
            property_id: transaction.property_id.clone(),
            buyer: transaction.buyer.clone(),
            seller: transaction.seller.clone(),
            total_price: transaction.total_price,
        };

        let mut set: JoinSet<(TaskId, VerificationType, Result<VerificationReport, EscrowError>)> =
            JoinSet::new();
        for task in self.engine.ready_tasks(id)? {
            let task = self.engine.mark_dispatched(task.id)?;
            let agent = *self
                .registry
                .agent_for(task.verification_type)
                .ok_or(ValidationError::EmptyAgentId)?;
            let context = context.clone();
            set.spawn(async move {
                let result = agent
                    .execute_verification(&context, &task)
                    .await
                    .map_err(EscrowError::from);
                (task.id, task.verification_type, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            let (task_id, verification_type, result) = match joined {
                Ok(triple) => triple,
                Err(err) => {
                    tracing::error!(transaction_id = %id, "agent task panicked: {err}");
                    continue;
                }
            };
            let outcome = match result {
                Ok(report) => {
                    let report_id = report.id;
                    self.process_verification_completion(task_id, report)
                        .await
                        .map(|_| report_id)
                }
                Err(err) => Err(err),
            };
            if let Err(err) = &outcome {
                tracing::warn!(
                    transaction_id = %id,
                    task_id = %task_id,
                    verification_type = %verification_type,
                    "verification task failed: {err}"
                );
            }
            outcomes.push(DispatchOutcome {
                task_id,
                verification_type,
                outcome,
            });
        }
        Ok(outcomes)
    }

    /// Drive verification rounds until no task is ready or a round makes no
    /// progress. Returns every per-task outcome in dispatch order.
    pub async fn run_verification(
        &self,
        id: TransactionId,
    ) -> Result<Vec<DispatchOutcome>, EscrowError> {
        let mut all = Vec::new();
        loop {
            if self.get(id)?.state != TransactionState::VerificationInProgress {
                break;
            }
            if self.engine.ready_tasks(id)?.is_empty() {
                break;
            }
            let outcomes = self.dispatch_ready_tasks(id).await?;
            let progressed = outcomes.iter().any(|o| o.outcome.is_ok());
            all.extend(outcomes);
            if !progressed {
                break;
            }
        }
        Ok(all)
    }

    /// Validate and record one verification report; on approval release the
    /// task's milestone and, when the whole workflow is approved, advance
    /// the transaction to `SETTLEMENT_PENDING`.
    ///
    /// Milestone releases are frozen while the transaction is disputed.
    /// Returns the tasks that became ready.
    pub async fn process_verification_completion(
        &self,
        task_id: TaskId,
        report: VerificationReport,
    ) -> Result<Vec<VerificationTask>, EscrowError> {
        let task = self.engine.task(task_id)?;
        let id = task.transaction_id;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let transaction = self.get(id)?;
        match transaction.state {
            TransactionState::Disputed => {
                return Err(WorkflowError::Disputed {
                    transaction_id: id.to_string(),
                }
                .into())
            }
            TransactionState::VerificationInProgress => {}
            other => {
                return Err(WorkflowError::InvalidTransition {
                    from: other.as_str().to_string(),
                    to: other.as_str().to_string(),
                    reason: "verification is not running".to_string(),
                }
                .into())
            }
        }

        let agent = self
            .registry
            .agent_for(task.verification_type)
            .ok_or(ValidationError::EmptyAgentId)?;
        agent.validate_report(&report)?;

        let newly_ready = self.engine.mark_complete(task_id, &report)?;
        self.log(
            id,
            LedgerEventType::TaskCompleted,
            json!({
                "task_id": task_id,
                "verification_type": task.verification_type,
                "report_id": report.id,
                "report_status": report.status,
            }),
        )
        .await?;

        match report.status {
            ReportStatus::Approved => {
                if !task.fee.is_zero() {
                    self.release_task_milestone(&transaction, &task).await?;
                }
                if self.engine.summary(id)?.all_approved() {
                    self.advance_to_settlement_pending(id).await?;
                }
            }
            ReportStatus::Rejected => {
                self.escalate(
                    id,
                    &format!(
                        "{} report rejected; fresh attempt created",
                        task.verification_type
                    ),
                )
                .await;
            }
            ReportStatus::NeedsReview => {
                self.escalate(
                    id,
                    &format!("{} report held for review", task.verification_type),
                )
                .await;
            }
        }

        Ok(newly_ready)
    }

    /// Accept an inbound webhook report after authenticating its token.
    pub async fn process_verification_webhook(
        &self,
        envelope: WebhookEnvelope,
    ) -> Result<Vec<VerificationTask>, EscrowError> {
        self.authenticator.authenticate_envelope(&envelope)?;
        let status = match envelope.report.status.as_str() {
            "approved" => ReportStatus::Approved,
            "rejected" => ReportStatus::Rejected,
            "needs_review" => ReportStatus::NeedsReview,
            other => {
                return Err(ValidationError::MalformedReport {
                    verification_type: envelope.source.clone(),
                    reason: format!("unknown report status \"{other}\""),
                }
                .into())
            }
        };
        let report = VerificationReport::new(
            envelope.report.task_id,
            status,
            envelope.report.findings,
            envelope.report.documents,
        );
        self.process_verification_completion(envelope.report.task_id, report)
            .await
    }

    /// Compute the settlement distribution without executing it.
    pub fn preview_settlement(&self, id: TransactionId) -> Result<SettlementBreakdown, EscrowError> {
        let transaction = self.get(id)?;
        Ok(compute_breakdown(
            &self.config,
            &transaction.seller,
            transaction.total_price,
            self.fee_schedule_total()?,
        )?)
    }

    /// Execute the final settlement distribution and transition to
    /// `SETTLED`.
    ///
    /// Idempotent with respect to final outcome: repeating a successful
    /// call returns the existing settlement without re-executing.
    pub async fn execute_settlement(&self, id: TransactionId) -> Result<Settlement, EscrowError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.settlements.get(&id) {
            return Ok(existing.clone());
        }

        let transaction = self.get(id)?;
        if transaction.state != TransactionState::SettlementPending {
            return Err(WorkflowError::InvalidTransition {
                from: transaction.state.as_str().to_string(),
                to: TransactionState::Settled.as_str().to_string(),
                reason: "settlement is not pending".to_string(),
            }
            .into());
        }
        let wallet_id = transaction
            .wallet_id
            .clone()
            .ok_or(ValidationError::EmptyWalletId)?;

        let breakdown = compute_breakdown(
            &self.config,
            &transaction.seller,
            transaction.total_price,
            self.fee_schedule_total()?,
        )?;

        // Collect the buyer's closing balance so the wallet holds the full
        // distribution before anything moves.
        let balance = call_with_retry(
            &self.wallet_breaker,
            self.config.payment_retry,
            "wallet_balance",
            || {
                let wallet_id = wallet_id.clone();
                async move { self.wallet.wallet_balance(wallet_id).await }
            },
        )
        .await?;
        let shortfall = breakdown.total.checked_sub(balance).map_err(EscrowError::from)?;
        if !shortfall.is_zero() {
            call_with_retry(
                &self.wallet_breaker,
                self.config.payment_retry,
                "deposit_funds",
                || {
                    let wallet_id = wallet_id.clone();
                    async move { self.wallet.deposit_funds(wallet_id, shortfall).await }
                },
            )
            .await?;
        }

        let result = call_with_retry(
            &self.wallet_breaker,
            self.config.payment_retry,
            "execute_final_settlement",
            || {
                let wallet_id = wallet_id.clone();
                let lines = breakdown.distributions.clone();
                async move { self.wallet.execute_final_settlement(wallet_id, lines).await }
            },
        )
        .await?;

        let mut updated = self.get(id)?;
        updated.settle(SettlementConfirmation {
            settlement_id: result.settlement_id,
        })?;
        let event = self
            .log(
                id,
                LedgerEventType::SettlementExecuted,
                json!({
                    "settlement_id": result.settlement_id,
                    "total_minor": breakdown.total.minor_units(),
                    "seller_minor": breakdown.seller_amount.minor_units(),
                    "distributions": breakdown.distributions,
                }),
            )
            .await?;
        self.transactions.insert(id, updated);

        for line in &breakdown.distributions {
            self.record_payment(Payment {
                id: ecx_core::PaymentId::new(),
                transaction_id: id,
                payment_type: match line.purpose.as_str() {
                    "seller_proceeds" => PaymentType::Settlement,
                    "closing_costs" => PaymentType::ClosingCost,
                    _ => PaymentType::Commission,
                },
                recipient: line.recipient.clone(),
                amount: line.amount,
                status: PaymentStatus::Completed,
                milestone_id: None,
                task_id: None,
                ledger_ref: Some(event.ledger_ref.clone()),
                created_at: Timestamp::now(),
            });
        }

        let settlement = Settlement {
            id: result.settlement_id,
            transaction_id: id,
            breakdown,
            ledger_ref: Some(event.ledger_ref),
            executed_at: result.executed_at,
        };
        self.settlements.insert(id, settlement.clone());
        self.notify(id, "transaction_settled").await;

        tracing::info!(
            transaction_id = %id,
            settlement_id = %settlement.id,
            "settlement executed"
        );
        Ok(settlement)
    }

    /// Raise a dispute, freezing milestone releases and the lifecycle.
    pub async fn handle_dispute(
        &self,
        id: TransactionId,
        details: &str,
    ) -> Result<Transaction, EscrowError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut updated = self.get(id)?;
        let change = updated.raise_dispute(details)?;
        self.log(
            id,
            LedgerEventType::DisputeRaised,
            json!({"reason": details, "suspended_state": change.from}),
        )
        .await?;
        self.transactions.insert(id, updated.clone());
        self.escalate(id, &format!("dispute raised: {details}")).await;
        Ok(updated)
    }

    /// Resolve the active dispute, restoring the suspended state or
    /// cancelling outright.
    pub async fn resolve_dispute(
        &self,
        id: TransactionId,
        resolution: DisputeResolution,
    ) -> Result<Transaction, EscrowError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut updated = self.get(id)?;
        let change = updated.resolve_dispute(resolution.clone())?;
        if updated.state == TransactionState::Cancelled {
            self.wind_down(&updated, "dispute resolved by cancellation")
                .await?;
        }
        // Logged after the wind-down: a failed refund must not leave the
        // ledger claiming the dispute closed while the store stays Disputed.
        self.log(
            id,
            LedgerEventType::DisputeResolved,
            json!({"restored_state": change.to, "note": change.note}),
        )
        .await?;
        self.transactions.insert(id, updated.clone());
        self.notify(id, "dispute_resolved").await;
        Ok(updated)
    }

    /// Cancel from any non-terminal state, refunding unreleased escrow.
    pub async fn cancel_transaction(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> Result<Transaction, EscrowError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut updated = self.get(id)?;
        updated.cancel(CancellationReason {
            reason: reason.to_string(),
        })?;
        self.wind_down(&updated, reason).await?;
        self.transactions.insert(id, updated.clone());
        self.notify(id, "transaction_cancelled").await;
        Ok(updated)
    }

    /// Re-attempt the milestone release for a completed, approved task
    /// whose payment previously failed.
    ///
    /// Safe to call repeatedly: the gateway's milestone idempotency
    /// guarantees at most one fund movement.
    pub async fn retry_failed_payment(&self, task_id: TaskId) -> Result<Payment, EscrowError> {
        let task = self.engine.task(task_id)?;
        let id = task.transaction_id;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let transaction = self.get(id)?;
        if transaction.state == TransactionState::Disputed {
            return Err(WorkflowError::Disputed {
                transaction_id: id.to_string(),
            }
            .into());
        }
        if transaction.state.is_terminal() {
            return Err(WorkflowError::TerminalState {
                transaction_id: id.to_string(),
                state: transaction.state.as_str().to_string(),
            }
            .into());
        }
        if task.status != ecx_workflow::TaskStatus::Completed {
            return Err(WorkflowError::TaskNotReady {
                task_id: task_id.to_string(),
                missing: "an approved report".to_string(),
            }
            .into());
        }

        let milestone = MilestoneId::from(task_id);
        if let Some(existing) = self.payment_for_milestone(id, milestone) {
            return Ok(existing);
        }
        self.release_task_milestone(&transaction, &task).await?;
        self.payment_for_milestone(id, milestone)
            .ok_or_else(|| {
                WorkflowError::UnknownTask(task_id.to_string()).into()
            })
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// A transaction by identifier.
    pub fn get_transaction(&self, id: TransactionId) -> Result<Transaction, EscrowError> {
        self.get(id)
    }

    /// All transactions, newest first.
    pub fn list_transactions(&self) -> Vec<Transaction> {
        let mut all: Vec<Transaction> =
            self.transactions.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// All verification tasks for a transaction, in creation order.
    pub fn list_tasks(&self, id: TransactionId) -> Result<Vec<VerificationTask>, EscrowError> {
        Ok(self.engine.tasks_for(id)?)
    }

    /// All payments recorded for a transaction, oldest first.
    pub fn list_payments(&self, id: TransactionId) -> Vec<Payment> {
        self.payments
            .get(&id)
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// The executed settlement, if any.
    pub fn get_settlement(&self, id: TransactionId) -> Option<Settlement> {
        self.settlements.get(&id).map(|s| s.clone())
    }

    /// All overdue tasks across every workflow; each raises an operator
    /// escalation.
    pub async fn overdue_tasks(&self, now: Timestamp) -> Vec<EscalationEvent> {
        let events = self.engine.overdue_tasks(now);
        for event in &events {
            self.escalate(
                event.transaction_id,
                &format!(
                    "{} task {} overdue by {}s",
                    event.verification_type, event.task_id, event.overdue_secs
                ),
            )
            .await;
        }
        events
    }

    /// The full audit trail for a transaction, oldest first.
    pub async fn get_audit_trail(&self, id: TransactionId) -> Result<Vec<LedgerEvent>, EscrowError> {
        call_with_retry(
            &self.ledger_breaker,
            self.config.ledger_retry,
            "get_audit_trail",
            || async { self.ledger.get_audit_trail(id).await },
        )
        .await
    }

    /// Verify one recorded ledger event against its chain.
    pub async fn verify_ledger_event(
        &self,
        id: TransactionId,
        event_id: LedgerEventId,
    ) -> Result<bool, EscrowError> {
        call_with_retry(
            &self.ledger_breaker,
            self.config.ledger_retry,
            "verify_event",
            || async { self.ledger.verify_event(id, event_id).await },
        )
        .await
    }

    /// The wallet gateway's circuit breaker, for observability.
    pub fn wallet_breaker(&self) -> &CircuitBreaker {
        &self.wallet_breaker
    }

    /// The ledger's circuit breaker, for observability.
    pub fn ledger_breaker(&self) -> &CircuitBreaker {
        &self.ledger_breaker
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn lock_for(&self, id: TransactionId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn get(&self, id: TransactionId) -> Result<Transaction, EscrowError> {
        self.transactions
            .get(&id)
            .map(|t| t.clone())
            .ok_or_else(|| WorkflowError::UnknownTransaction(id.to_string()).into())
    }

    fn record_payment(&self, payment: Payment) {
        self.payments
            .entry(payment.transaction_id)
            .or_default()
            .push(payment);
    }

    fn payment_for_milestone(
        &self,
        id: TransactionId,
        milestone: MilestoneId,
    ) -> Option<Payment> {
        self.payments.get(&id).and_then(|payments| {
            payments
                .iter()
                .find(|p| p.milestone_id == Some(milestone) && p.status == PaymentStatus::Completed)
                .cloned()
        })
    }

    /// Total of the fixed verification fee schedule.
    fn fee_schedule_total(&self) -> Result<Money, ValidationError> {
        Money::sum(
            self.config.currency,
            self.registry.profiles().iter().map(|p| p.fee),
        )
    }

    /// Release the milestone for an approved task, record the payment, and
    /// ledger-log it. The caller holds the transaction lock.
    async fn release_task_milestone(
        &self,
        transaction: &Transaction,
        task: &VerificationTask,
    ) -> Result<(), EscrowError> {
        let id = transaction.id;
        let wallet_id = transaction
            .wallet_id
            .clone()
            .ok_or(ValidationError::EmptyWalletId)?;
        let milestone = MilestoneId::from(task.id);
        let recipient = PartyId::new(task.agent_id.as_str())?;

        // A respawned attempt has a fresh task id; make sure its milestone
        // exists before releasing.
        let configured = vec![Milestone {
            id: milestone,
            recipient: recipient.clone(),
            amount: task.fee,
        }];
        call_with_retry(
            &self.wallet_breaker,
            self.config.payment_retry,
            "configure_milestones",
            || {
                let wallet_id = wallet_id.clone();
                let configured = configured.clone();
                async move { self.wallet.configure_milestones(wallet_id, configured).await }
            },
        )
        .await?;

        let result = call_with_retry(
            &self.wallet_breaker,
            self.config.payment_retry,
            "release_milestone",
            || {
                let wallet_id = wallet_id.clone();
                let recipient = recipient.clone();
                async move {
                    self.wallet
                        .release_milestone(wallet_id, milestone, recipient, task.fee)
                        .await
                }
            },
        )
        .await?;

        let event = self
            .log(
                id,
                LedgerEventType::PaymentReleased,
                json!({
                    "payment_id": result.payment_id,
                    "milestone_id": milestone.to_string(),
                    "task_id": task.id,
                    "recipient": result.recipient,
                    "amount_minor": result.amount.minor_units(),
                }),
            )
            .await?;

        self.record_payment(Payment {
            id: result.payment_id,
            transaction_id: id,
            payment_type: PaymentType::Verification,
            recipient: result.recipient,
            amount: result.amount,
            status: PaymentStatus::Completed,
            milestone_id: Some(milestone),
            task_id: Some(task.id),
            ledger_ref: Some(event.ledger_ref),
            created_at: Timestamp::now(),
        });
        self.notify(id, "milestone_released").await;
        Ok(())
    }

    /// `VERIFICATION_IN_PROGRESS → VERIFICATION_COMPLETE →
    /// SETTLEMENT_PENDING`, once every task is approved. The caller holds
    /// the transaction lock.
    async fn advance_to_settlement_pending(&self, id: TransactionId) -> Result<(), EscrowError> {
        let summary = self.engine.summary(id)?;
        let mut updated = self.get(id)?;
        updated.complete_verification(VerificationSummary {
            total_tasks: summary.total_types,
            approved_tasks: summary.approved_types,
        })?;
        updated.ready_settlement()?;
        self.transactions.insert(id, updated);
        self.notify(id, "verification_complete").await;
        tracing::info!(transaction_id = %id, "all verifications approved; settlement pending");
        Ok(())
    }

    /// Cancel-path side effects: withdraw open tasks, refund unreleased
    /// escrow, and ledger-log the cancellation. The caller holds the
    /// transaction lock and has already committed the `Cancelled` state.
    async fn wind_down(&self, transaction: &Transaction, reason: &str) -> Result<(), EscrowError> {
        let id = transaction.id;
        match self.engine.cancel_remaining(id) {
            Ok(cancelled) if !cancelled.is_empty() => {
                tracing::info!(
                    transaction_id = %id,
                    cancelled = cancelled.len(),
                    "open verification tasks withdrawn"
                );
            }
            Ok(_) => {}
            Err(WorkflowError::WorkflowMissing(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let mut refunded_minor = 0i64;
        if let Some(wallet_id) = transaction.wallet_id.clone() {
            let buyer = transaction.buyer.clone();
            let refunded = call_with_retry(
                &self.wallet_breaker,
                self.config.payment_retry,
                "refund_remaining",
                || {
                    let wallet_id = wallet_id.clone();
                    let buyer = buyer.clone();
                    async move { self.wallet.refund_remaining(wallet_id, buyer).await }
                },
            )
            .await?;
            refunded_minor = refunded.minor_units();
        }

        self.log(
            id,
            LedgerEventType::TransactionCancelled,
            json!({"reason": reason, "refunded_minor": refunded_minor}),
        )
        .await?;
        Ok(())
    }

    /// Drive a transaction that failed during funding to `Cancelled`.
    /// Best effort; the original failure is what the caller surfaces.
    async fn abandon(&self, id: TransactionId, reason: &str) {
        if let Ok(mut updated) = self.get(id) {
            if updated
                .cancel(CancellationReason {
                    reason: reason.to_string(),
                })
                .is_ok()
            {
                self.transactions.insert(id, updated);
            }
        }
        if let Err(err) = self
            .log(
                id,
                LedgerEventType::TransactionCancelled,
                json!({"reason": reason, "refunded_minor": 0}),
            )
            .await
        {
            tracing::error!(transaction_id = %id, "failed to ledger-log abandonment: {err}");
        }
        tracing::warn!(transaction_id = %id, reason, "transaction abandoned during funding");
    }

    async fn log(
        &self,
        id: TransactionId,
        event_type: LedgerEventType,
        payload: serde_json::Value,
    ) -> Result<LedgerEvent, EscrowError> {
        call_with_retry(
            &self.ledger_breaker,
            self.config.ledger_retry,
            "log_event",
            || {
                let payload = payload.clone();
                async move { self.ledger.log_event(id, event_type, payload).await }
            },
        )
        .await
    }

    async fn notify(&self, id: TransactionId, event: &str) {
        let channels = ["email".to_string(), "sms".to_string()];
        if let Err(err) = self.notifier.notify_parties(id, event, &channels).await {
            tracing::warn!(transaction_id = %id, event, "notification failed: {err}");
        }
    }

    async fn escalate(&self, id: TransactionId, issue: &str) {
        if let Err(err) = self.notifier.send_escalation(id, issue).await {
            tracing::warn!(transaction_id = %id, issue, "escalation failed: {err}");
        }
    }
}

impl<W, L, N> std::fmt::Debug for EscrowOrchestrator<W, L, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowOrchestrator")
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecx_gateways::{InMemoryLedger, InMemoryNotifier, InMemoryWalletGateway};
    use ecx_core::CurrencyCode;

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, CurrencyCode::USD).expect("non-negative")
    }

    fn orchestrator() -> EscrowOrchestrator<InMemoryWalletGateway, InMemoryLedger, InMemoryNotifier>
    {
        EscrowOrchestrator::new(
            EscrowConfig::default(),
            Arc::new(InMemoryWalletGateway::new()),
            Arc::new(InMemoryLedger::new()),
            Arc::new(InMemoryNotifier::new()),
        )
        .expect("orchestrator")
    }

    fn request() -> InitiateRequest {
        InitiateRequest {
            buyer: PartyId::new("party:buyer").expect("valid"),
            seller: PartyId::new("party:seller").expect("valid"),
            property_id: PropertyId::new("prop:42-elm-st").expect("valid"),
            earnest_money: usd(1_000_000),
            total_price: usd(40_000_000),
            target_closing: None,
            metadata: json!({"listing": "MLS-88"}),
        }
    }

    #[tokio::test]
    async fn initiate_funds_the_transaction() {
        let orch = orchestrator();
        let txn = orch.initiate_transaction(request()).await.expect("initiate");
        assert_eq!(txn.state, TransactionState::Funded);
        assert!(txn.wallet_id.is_some());

        let trail = orch.get_audit_trail(txn.id).await.expect("trail");
        let types: Vec<LedgerEventType> = trail.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                LedgerEventType::TransactionInitiated,
                LedgerEventType::EarnestDeposited,
            ]
        );
        assert_eq!(orch.list_payments(txn.id).len(), 1);
    }

    #[tokio::test]
    async fn invalid_initiation_is_rejected_before_any_side_effect() {
        let orch = orchestrator();
        let mut bad = request();
        bad.seller = bad.buyer.clone();
        let err = orch.initiate_transaction(bad).await;
        assert!(matches!(err, Err(EscrowError::Validation(_))));
        assert!(orch.list_transactions().is_empty());
    }

    #[tokio::test]
    async fn workflow_requires_funded_state() {
        let orch = orchestrator();
        let txn = orch.initiate_transaction(request()).await.expect("initiate");
        orch.create_verification_workflow(txn.id)
            .await
            .expect("workflow");
        // Second creation: state is no longer FUNDED.
        let err = orch.create_verification_workflow(txn.id).await;
        assert!(matches!(err, Err(EscrowError::Workflow(_))));
    }

    #[tokio::test]
    async fn full_run_reaches_settled() {
        let orch = orchestrator();
        let txn = orch.initiate_transaction(request()).await.expect("initiate");
        let ready = orch
            .create_verification_workflow(txn.id)
            .await
            .expect("workflow");
        assert_eq!(ready.len(), 2);

        orch.run_verification(txn.id).await.expect("verification");
        assert_eq!(
            orch.get_transaction(txn.id).expect("txn").state,
            TransactionState::SettlementPending
        );

        let settlement = orch.execute_settlement(txn.id).await.expect("settle");
        assert_eq!(
            orch.get_transaction(txn.id).expect("txn").state,
            TransactionState::Settled
        );

        // Idempotent repeat.
        let again = orch.execute_settlement(txn.id).await.expect("repeat");
        assert_eq!(settlement.id, again.id);
    }

    #[tokio::test]
    async fn settlement_refused_before_pending() {
        let orch = orchestrator();
        let txn = orch.initiate_transaction(request()).await.expect("initiate");
        let err = orch.execute_settlement(txn.id).await;
        assert!(matches!(err, Err(EscrowError::Workflow(_))));
        assert_eq!(
            orch.get_transaction(txn.id).expect("txn").state,
            TransactionState::Funded
        );
    }

    #[tokio::test]
    async fn dispute_freezes_completion_processing() {
        let orch = orchestrator();
        let txn = orch.initiate_transaction(request()).await.expect("initiate");
        let ready = orch
            .create_verification_workflow(txn.id)
            .await
            .expect("workflow");
        orch.handle_dispute(txn.id, "access denied").await.expect("dispute");

        let report = VerificationReport::new(
            ready[0].id,
            ReportStatus::Approved,
            json!({"title_clear": true, "liens": []}),
            vec!["doc://x".to_string()],
        );
        let err = orch.process_verification_completion(ready[0].id, report).await;
        assert!(matches!(
            err,
            Err(EscrowError::Workflow(WorkflowError::Disputed { .. }))
        ));

        let restored = orch
            .resolve_dispute(txn.id, DisputeResolution::ReturnToPriorState)
            .await
            .expect("resolve");
        assert_eq!(restored.state, TransactionState::VerificationInProgress);
    }

    #[tokio::test]
    async fn cancellation_refunds_and_logs() {
        let orch = orchestrator();
        let txn = orch.initiate_transaction(request()).await.expect("initiate");
        let cancelled = orch
            .cancel_transaction(txn.id, "buyer withdrew")
            .await
            .expect("cancel");
        assert_eq!(cancelled.state, TransactionState::Cancelled);

        let trail = orch.get_audit_trail(txn.id).await.expect("trail");
        assert_eq!(
            trail.last().expect("events").event_type,
            LedgerEventType::TransactionCancelled
        );
    }

    #[tokio::test]
    async fn webhook_with_bad_token_is_rejected() {
        let orch = orchestrator();
        let txn = orch.initiate_transaction(request()).await.expect("initiate");
        let ready = orch
            .create_verification_workflow(txn.id)
            .await
            .expect("workflow");

        let envelope = WebhookEnvelope {
            source: "agent:title_search".to_string(),
            token: "anything".to_string(),
            report: ecx_gateways::InboundReport {
                task_id: ready[0].id,
                status: "approved".to_string(),
                findings: json!({"title_clear": true, "liens": []}),
                documents: vec!["doc://x".to_string()],
            },
        };
        // Default config has no webhook token: fails closed.
        let err = orch.process_verification_webhook(envelope).await;
        assert!(matches!(err, Err(EscrowError::Validation(_))));
    }
}
