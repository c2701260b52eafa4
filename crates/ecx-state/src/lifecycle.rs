//! # Transaction Lifecycle
//!
//! The [`Transaction`] record and its guarded state transitions. Every
//! transition method takes a specific evidence struct, validates the guard,
//! appends a [`TransitionRecord`] to the append-only log, and returns a
//! [`StateChange`] event for the orchestrator to ledger-log and notify.
//! A failed guard returns [`WorkflowError`] and leaves the record untouched.

use serde::{Deserialize, Serialize};

use ecx_core::{
    Money, PartyId, PropertyId, SettlementId, Timestamp, TransactionId, ValidationError,
    WalletId, WorkflowError,
};

// ── Transaction State ──────────────────────────────────────────────────

/// The lifecycle state of an escrow transaction.
///
/// ## Transition Graph
///
/// ```text
/// Initiated ──fund()──▶ Funded ──begin_verification()──▶ VerificationInProgress
///                                                              │
///                                          complete_verification()
///                                                              ▼
///   SettlementPending ◀──ready_settlement()── VerificationComplete
///          │
///      settle()──▶ Settled (terminal)
///
/// Every non-terminal state:
///   ──raise_dispute()──▶ Disputed ──resolve_dispute()──▶ suspended state
///   ──cancel()─────────▶ Cancelled (terminal)   └───────▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// Transaction created; earnest money not yet confirmed.
    Initiated,
    /// Earnest money confirmed in escrow.
    Funded,
    /// Verification workflow is running.
    VerificationInProgress,
    /// Every verification task completed with an approved report.
    VerificationComplete,
    /// Settlement computed and awaiting execution.
    SettlementPending,
    /// Funds distributed. Terminal state.
    Settled,
    /// A dispute suspends the lifecycle; milestone releases are frozen.
    Disputed,
    /// Transaction cancelled; unreleased escrow refunded. Terminal state.
    Cancelled,
}

impl TransactionState {
    /// The canonical string name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Funded => "FUNDED",
            Self::VerificationInProgress => "VERIFICATION_IN_PROGRESS",
            Self::VerificationComplete => "VERIFICATION_COMPLETE",
            Self::SettlementPending => "SETTLEMENT_PENDING",
            Self::Settled => "SETTLED",
            Self::Disputed => "DISPUTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether this state is terminal (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Cancelled)
    }

    /// Valid target states from this state.
    ///
    /// For [`Disputed`](Self::Disputed) this is the superset of restore
    /// targets; [`Transaction::resolve_dispute`] only ever restores the
    /// state that was actually suspended.
    pub fn valid_transitions(&self) -> &'static [TransactionState] {
        match self {
            Self::Initiated => &[Self::Funded, Self::Disputed, Self::Cancelled],
            Self::Funded => &[
                Self::VerificationInProgress,
                Self::Disputed,
                Self::Cancelled,
            ],
            Self::VerificationInProgress => &[
                Self::VerificationComplete,
                Self::Disputed,
                Self::Cancelled,
            ],
            Self::VerificationComplete => {
                &[Self::SettlementPending, Self::Disputed, Self::Cancelled]
            }
            Self::SettlementPending => &[Self::Settled, Self::Disputed, Self::Cancelled],
            Self::Disputed => &[
                Self::Initiated,
                Self::Funded,
                Self::VerificationInProgress,
                Self::VerificationComplete,
                Self::SettlementPending,
                Self::Cancelled,
            ],
            Self::Settled | Self::Cancelled => &[],
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Transition Evidence Types ──────────────────────────────────────────

/// Evidence for `Initiated → Funded`: the gateway confirmed the deposit.
#[derive(Debug, Clone)]
pub struct FundingConfirmation {
    /// The wallet the gateway opened for this transaction.
    pub wallet_id: WalletId,
    /// The deposit the gateway actually confirmed.
    pub deposited: Money,
}

/// Evidence for `VerificationInProgress → VerificationComplete`.
#[derive(Debug, Clone, Copy)]
pub struct VerificationSummary {
    /// Tasks in the workflow.
    pub total_tasks: u32,
    /// Tasks completed with an approved report.
    pub approved_tasks: u32,
}

impl VerificationSummary {
    /// Whether every task is approved.
    pub fn all_approved(&self) -> bool {
        self.total_tasks > 0 && self.approved_tasks == self.total_tasks
    }
}

/// Evidence for `SettlementPending → Settled`.
#[derive(Debug, Clone)]
pub struct SettlementConfirmation {
    /// The executed settlement.
    pub settlement_id: SettlementId,
}

/// How an active dispute is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeResolution {
    /// Restore the state held immediately before the dispute.
    ReturnToPriorState,
    /// Cancel the transaction outright.
    Cancel,
}

/// Why a transaction was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReason {
    /// Operator- or caller-supplied reason.
    pub reason: String,
}

// ── Events and audit log ───────────────────────────────────────────────

/// A successful state transition, returned to the orchestrator.
///
/// The orchestrator ledger-logs the change and notifies parties; the state
/// machine never calls outward itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    /// The transaction that transitioned.
    pub transaction_id: TransactionId,
    /// State before the transition.
    pub from: TransactionState,
    /// State after the transition.
    pub to: TransactionState,
    /// When the transition occurred.
    pub at: Timestamp,
    /// Short human-readable context (guard evidence summary).
    pub note: String,
}

/// One entry in the transaction's append-only transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// State before the transition.
    pub from_state: TransactionState,
    /// State after the transition.
    pub to_state: TransactionState,
    /// When the transition occurred.
    pub timestamp: Timestamp,
    /// Short human-readable context.
    pub note: String,
}

// ── The Transaction ────────────────────────────────────────────────────

/// An escrow transaction owned by the orchestrator.
///
/// Mutated only through the guarded transition methods below; never
/// deleted, only driven to `Settled` or `Cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    pub id: TransactionId,
    /// The buying party.
    pub buyer: PartyId,
    /// The selling party.
    pub seller: PartyId,
    /// The property being closed.
    pub property_id: PropertyId,
    /// Earnest money held in escrow.
    pub earnest_money: Money,
    /// Total purchase price.
    pub total_price: Money,
    /// Current lifecycle state.
    pub state: TransactionState,
    /// Escrow wallet, set once funding is confirmed.
    pub wallet_id: Option<WalletId>,
    /// Target closing date agreed in the contract.
    pub target_closing: Option<Timestamp>,
    /// Actual closing date, set at settlement.
    pub actual_closing: Option<Timestamp>,
    /// Free-form metadata supplied at initiation.
    pub metadata: serde_json::Value,
    /// The state suspended by an active dispute.
    pub disputed_from: Option<TransactionState>,
    /// Reason supplied when the active dispute was raised.
    pub dispute_reason: Option<String>,
    /// When the transaction was created.
    pub created_at: Timestamp,
    /// When the transaction was last updated.
    pub updated_at: Timestamp,
    /// Complete transition history.
    pub transition_log: Vec<TransitionRecord>,
}

impl Transaction {
    /// Create a transaction in the `Initiated` state.
    ///
    /// This is the only constructor. Input validation happens here so that
    /// no invalid transaction can exist in any state.
    ///
    /// # Errors
    ///
    /// [`ValidationError`] if buyer and seller coincide, earnest money is
    /// zero, or earnest money exceeds the purchase price.
    pub fn initiate(
        buyer: PartyId,
        seller: PartyId,
        property_id: PropertyId,
        earnest_money: Money,
        total_price: Money,
        target_closing: Option<Timestamp>,
        metadata: serde_json::Value,
    ) -> Result<Self, ValidationError> {
        if buyer == seller {
            return Err(ValidationError::SamePartyBothSides {
                party: buyer.to_string(),
            });
        }
        if earnest_money.is_zero() {
            return Err(ValidationError::NonPositiveAmount {
                field: "earnest_money",
            });
        }
        // Also rejects currency mixing between the two amounts.
        if total_price.checked_sub(earnest_money).is_err() {
            return Err(ValidationError::EarnestExceedsPrice {
                earnest: earnest_money,
                total: total_price,
            });
        }
        let now = Timestamp::now();
        Ok(Self {
            id: TransactionId::new(),
            buyer,
            seller,
            property_id,
            earnest_money,
            total_price,
            state: TransactionState::Initiated,
            wallet_id: None,
            target_closing,
            actual_closing: None,
            metadata,
            disputed_from: None,
            dispute_reason: None,
            created_at: now,
            updated_at: now,
            transition_log: Vec::new(),
        })
    }

    /// Transition `Initiated → Funded`.
    ///
    /// Guard: the confirmed deposit equals the agreed earnest money. The
    /// orchestrator surfaces an amount mismatch as a payment error before
    /// ever reaching this method; the guard here is the last line.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::InvalidTransition`] if not in `Initiated` or the
    /// deposit does not match.
    pub fn fund(&mut self, confirmation: FundingConfirmation) -> Result<StateChange, WorkflowError> {
        self.require_state(TransactionState::Initiated, TransactionState::Funded)?;
        if confirmation.deposited != self.earnest_money {
            return Err(WorkflowError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: TransactionState::Funded.as_str().to_string(),
                reason: format!(
                    "confirmed deposit {} does not match earnest money {}",
                    confirmation.deposited, self.earnest_money
                ),
            });
        }
        let note = format!(
            "earnest money {} confirmed in wallet {}",
            confirmation.deposited, confirmation.wallet_id
        );
        self.wallet_id = Some(confirmation.wallet_id);
        Ok(self.commit(TransactionState::Funded, note))
    }

    /// Transition `Funded → VerificationInProgress`.
    ///
    /// Guard: a funded wallet exists.
    pub fn begin_verification(&mut self) -> Result<StateChange, WorkflowError> {
        self.require_state(
            TransactionState::Funded,
            TransactionState::VerificationInProgress,
        )?;
        if self.wallet_id.is_none() {
            return Err(WorkflowError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: TransactionState::VerificationInProgress.as_str().to_string(),
                reason: "no escrow wallet attached".to_string(),
            });
        }
        Ok(self.commit(
            TransactionState::VerificationInProgress,
            "verification workflow created".to_string(),
        ))
    }

    /// Transition `VerificationInProgress → VerificationComplete`.
    ///
    /// Guard: every workflow task has an approved report.
    pub fn complete_verification(
        &mut self,
        summary: VerificationSummary,
    ) -> Result<StateChange, WorkflowError> {
        self.require_state(
            TransactionState::VerificationInProgress,
            TransactionState::VerificationComplete,
        )?;
        if !summary.all_approved() {
            return Err(WorkflowError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: TransactionState::VerificationComplete.as_str().to_string(),
                reason: format!(
                    "{}/{} tasks approved",
                    summary.approved_tasks, summary.total_tasks
                ),
            });
        }
        Ok(self.commit(
            TransactionState::VerificationComplete,
            format!("all {} verification tasks approved", summary.total_tasks),
        ))
    }

    /// Transition `VerificationComplete → SettlementPending`.
    pub fn ready_settlement(&mut self) -> Result<StateChange, WorkflowError> {
        self.require_state(
            TransactionState::VerificationComplete,
            TransactionState::SettlementPending,
        )?;
        Ok(self.commit(
            TransactionState::SettlementPending,
            "settlement computation pending".to_string(),
        ))
    }

    /// Transition `SettlementPending → Settled`. Terminal.
    ///
    /// Sets the actual closing date.
    pub fn settle(
        &mut self,
        confirmation: SettlementConfirmation,
    ) -> Result<StateChange, WorkflowError> {
        self.require_state(TransactionState::SettlementPending, TransactionState::Settled)?;
        self.actual_closing = Some(Timestamp::now());
        Ok(self.commit(
            TransactionState::Settled,
            format!("settlement {} executed", confirmation.settlement_id),
        ))
    }

    /// Suspend the lifecycle: any non-terminal state `→ Disputed`.
    ///
    /// Records the suspended state so resolution can restore it. Milestone
    /// releases are frozen while disputed.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::TerminalState`] from terminal states;
    /// [`WorkflowError::InvalidTransition`] if already disputed.
    pub fn raise_dispute(&mut self, reason: impl Into<String>) -> Result<StateChange, WorkflowError> {
        if self.state.is_terminal() {
            return Err(self.terminal_error());
        }
        if self.state == TransactionState::Disputed {
            return Err(WorkflowError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: TransactionState::Disputed.as_str().to_string(),
                reason: "a dispute is already active".to_string(),
            });
        }
        let reason = reason.into();
        self.disputed_from = Some(self.state);
        self.dispute_reason = Some(reason.clone());
        Ok(self.commit(TransactionState::Disputed, format!("dispute raised: {reason}")))
    }

    /// Resolve the active dispute: `Disputed →` suspended state, or
    /// `Disputed → Cancelled`.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::NoActiveDispute`] if not disputed.
    pub fn resolve_dispute(
        &mut self,
        resolution: DisputeResolution,
    ) -> Result<StateChange, WorkflowError> {
        if self.state != TransactionState::Disputed {
            return Err(WorkflowError::NoActiveDispute {
                transaction_id: self.id.to_string(),
            });
        }
        // Invariant: disputed_from is always set while Disputed.
        let prior = self.disputed_from.ok_or_else(|| WorkflowError::NoActiveDispute {
            transaction_id: self.id.to_string(),
        })?;
        self.disputed_from = None;
        self.dispute_reason = None;
        let (target, note) = match resolution {
            DisputeResolution::ReturnToPriorState => {
                (prior, format!("dispute resolved; restored {}", prior.as_str()))
            }
            DisputeResolution::Cancel => (
                TransactionState::Cancelled,
                "dispute resolved by cancellation".to_string(),
            ),
        };
        Ok(self.commit(target, note))
    }

    /// Cancel the transaction from any non-terminal state. Terminal.
    ///
    /// The orchestrator performs the reverse-flow refund of unreleased
    /// escrow before confirming cancellation.
    pub fn cancel(&mut self, reason: CancellationReason) -> Result<StateChange, WorkflowError> {
        if self.state.is_terminal() {
            return Err(self.terminal_error());
        }
        self.disputed_from = None;
        self.dispute_reason = None;
        Ok(self.commit(
            TransactionState::Cancelled,
            format!("cancelled: {}", reason.reason),
        ))
    }

    /// Whether the target state is reachable from the current state right
    /// now, accounting for the dispute restore target.
    pub fn can_transition_to(&self, target: TransactionState) -> bool {
        match self.state {
            TransactionState::Disputed => {
                target == TransactionState::Cancelled || Some(target) == self.disputed_from
            }
            state => state.valid_transitions().contains(&target),
        }
    }

    fn require_state(
        &self,
        expected: TransactionState,
        target: TransactionState,
    ) -> Result<(), WorkflowError> {
        if self.state.is_terminal() {
            return Err(self.terminal_error());
        }
        if self.state != expected {
            return Err(WorkflowError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: target.as_str().to_string(),
                reason: format!("expected state {}, got {}", expected, self.state),
            });
        }
        Ok(())
    }

    fn terminal_error(&self) -> WorkflowError {
        WorkflowError::TerminalState {
            transaction_id: self.id.to_string(),
            state: self.state.as_str().to_string(),
        }
    }

    /// Apply the transition: append the audit record, update state and
    /// timestamps, and build the outward event.
    fn commit(&mut self, to: TransactionState, note: String) -> StateChange {
        let from = self.state;
        let at = Timestamp::now();
        self.transition_log.push(TransitionRecord {
            from_state: from,
            to_state: to,
            timestamp: at,
            note: note.clone(),
        });
        self.state = to;
        self.updated_at = at;
        StateChange {
            transaction_id: self.id,
            from,
            to,
            at,
            note,
        }
    }
}
