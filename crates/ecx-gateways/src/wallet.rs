//! # Wallet Gateway Port
//!
//! The escrow custody interface: create a wallet seeded with earnest money,
//! configure milestone release conditions, release milestones, and execute
//! the final multi-way distribution.
//!
//! Contract points that every binding must honor:
//!
//! - `release_milestone` is idempotent. A second call with the same
//!   milestone id is a no-op that returns the original result, so a
//!   retried release can never pay twice.
//! - `execute_final_settlement` is atomic. Either every distribution line
//!   applies or none do; a repeated call returns the existing result.

use serde::{Deserialize, Serialize};

use ecx_core::{
    EscrowError, Money, MilestoneId, PartyId, PaymentError, PaymentId, SettlementId, Timestamp,
    TransactionId, WalletId,
};

// ── Port types ─────────────────────────────────────────────────────────

/// Gateway confirmation of a wallet opening and its seeded deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositConfirmation {
    /// The opened wallet.
    pub wallet_id: WalletId,
    /// The amount the gateway actually confirmed on deposit.
    pub confirmed: Money,
}

/// A milestone release condition configured on a wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    /// Milestone identifier; derived from the verification task it gates.
    pub id: MilestoneId,
    /// Recipient of the release.
    pub recipient: PartyId,
    /// Amount released when the milestone's condition is met.
    pub amount: Money,
}

/// The outcome of one milestone release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    /// Gateway payment identifier. Stable across idempotent replays.
    pub payment_id: PaymentId,
    /// The released milestone.
    pub milestone_id: MilestoneId,
    /// Who received the funds.
    pub recipient: PartyId,
    /// Amount moved.
    pub amount: Money,
    /// When the original release executed.
    pub executed_at: Timestamp,
}

/// One line of a final settlement distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionLine {
    /// Recipient of this line.
    pub recipient: PartyId,
    /// What the line pays for.
    pub purpose: String,
    /// Amount of the line.
    pub amount: Money,
}

/// The outcome of a final settlement distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResult {
    /// Gateway settlement identifier. Stable across idempotent replays.
    pub settlement_id: SettlementId,
    /// The applied distribution lines.
    pub distributions: Vec<DistributionLine>,
    /// When the distribution executed.
    pub executed_at: Timestamp,
}

// ── The port ───────────────────────────────────────────────────────────

/// Custody interface to the payment processor.
pub trait WalletGateway: Send + Sync {
    /// Open an escrow wallet for a transaction, seeded with the deposit.
    fn create_wallet(
        &self,
        transaction_id: TransactionId,
        deposit: Money,
    ) -> impl std::future::Future<Output = Result<DepositConfirmation, EscrowError>> + Send;

    /// Credit additional funds to a wallet. Used for the buyer's closing
    /// balance ahead of final settlement. Returns the new balance.
    fn deposit_funds(
        &self,
        wallet_id: WalletId,
        amount: Money,
    ) -> impl std::future::Future<Output = Result<Money, EscrowError>> + Send;

    /// Configure milestone release conditions on a wallet.
    fn configure_milestones(
        &self,
        wallet_id: WalletId,
        milestones: Vec<Milestone>,
    ) -> impl std::future::Future<Output = Result<(), EscrowError>> + Send;

    /// Release one milestone. Idempotent per milestone id.
    fn release_milestone(
        &self,
        wallet_id: WalletId,
        milestone_id: MilestoneId,
        recipient: PartyId,
        amount: Money,
    ) -> impl std::future::Future<Output = Result<PaymentResult, EscrowError>> + Send;

    /// Execute the final multi-way distribution. Atomic; idempotent per
    /// wallet.
    fn execute_final_settlement(
        &self,
        wallet_id: WalletId,
        distributions: Vec<DistributionLine>,
    ) -> impl std::future::Future<Output = Result<SettlementResult, EscrowError>> + Send;

    /// Refund all unreleased funds to a recipient. Used on cancellation.
    fn refund_remaining(
        &self,
        wallet_id: WalletId,
        recipient: PartyId,
    ) -> impl std::future::Future<Output = Result<Money, EscrowError>> + Send;

    /// Current escrowed balance of a wallet.
    fn wallet_balance(
        &self,
        wallet_id: WalletId,
    ) -> impl std::future::Future<Output = Result<Money, EscrowError>> + Send;
}

// ── In-memory binding ──────────────────────────────────────────────────

#[derive(Debug)]
struct WalletRecord {
    transaction_id: TransactionId,
    balance: Money,
    milestones: std::collections::HashMap<MilestoneId, Milestone>,
    released: std::collections::HashMap<MilestoneId, PaymentResult>,
    settlement: Option<SettlementResult>,
}

/// In-memory wallet gateway.
///
/// The reference binding for tests and local deployments. Honors the full
/// port contract, including idempotent release and atomic settlement.
#[derive(Debug, Default)]
pub struct InMemoryWalletGateway {
    wallets: dashmap::DashMap<WalletId, WalletRecord>,
}

impl InMemoryWalletGateway {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn get_mut(
        &self,
        wallet_id: WalletId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, WalletId, WalletRecord>, EscrowError> {
        self.wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| PaymentError::UnknownWallet(wallet_id.to_string()).into())
    }
}

impl WalletGateway for InMemoryWalletGateway {
    async fn create_wallet(
        &self,
        transaction_id: TransactionId,
        deposit: Money,
    ) -> Result<DepositConfirmation, EscrowError> {
        let wallet_id = WalletId::new(format!("wallet:{}", uuid_suffix(transaction_id)))
            .map_err(EscrowError::from)?;
        // One wallet per transaction; a replayed create must not reset an
        // escrowed balance.
        if let Some(existing) = self
            .wallets
            .iter()
            .find(|w| w.value().transaction_id == transaction_id)
        {
            return Err(PaymentError::Rejected {
                operation: "create_wallet",
                reason: format!("transaction already holds wallet {}", existing.key()),
            }
            .into());
        }
        self.wallets.insert(
            wallet_id.clone(),
            WalletRecord {
                transaction_id,
                balance: deposit,
                milestones: std::collections::HashMap::new(),
                released: std::collections::HashMap::new(),
                settlement: None,
            },
        );
        tracing::info!(
            transaction_id = %transaction_id,
            wallet_id = %wallet_id,
            deposit = %deposit,
            "escrow wallet opened"
        );
        Ok(DepositConfirmation {
            wallet_id,
            confirmed: deposit,
        })
    }

    async fn deposit_funds(&self, wallet_id: WalletId, amount: Money) -> Result<Money, EscrowError> {
        let mut record = self.get_mut(wallet_id.clone())?;
        record.balance = record.balance.checked_add(amount).map_err(EscrowError::from)?;
        tracing::info!(
            wallet_id = %wallet_id,
            amount = %amount,
            balance = %record.balance,
            "funds deposited"
        );
        Ok(record.balance)
    }

    async fn configure_milestones(
        &self,
        wallet_id: WalletId,
        milestones: Vec<Milestone>,
    ) -> Result<(), EscrowError> {
        let mut record = self.get_mut(wallet_id.clone())?;
        for milestone in milestones {
            record.milestones.insert(milestone.id, milestone);
        }
        Ok(())
    }

    async fn release_milestone(
        &self,
        wallet_id: WalletId,
        milestone_id: MilestoneId,
        recipient: PartyId,
        amount: Money,
    ) -> Result<PaymentResult, EscrowError> {
        let mut record = self.get_mut(wallet_id.clone())?;

        // Idempotent replay: same milestone id returns the original result.
        if let Some(existing) = record.released.get(&milestone_id) {
            tracing::info!(
                wallet_id = %wallet_id,
                milestone_id = %milestone_id,
                payment_id = %existing.payment_id,
                "milestone already released; returning original result"
            );
            return Ok(existing.clone());
        }

        if !record.milestones.contains_key(&milestone_id) {
            return Err(PaymentError::UnknownMilestone {
                milestone: milestone_id.to_string(),
                wallet: wallet_id.to_string(),
            }
            .into());
        }
        if amount.minor_units() > record.balance.minor_units() {
            return Err(PaymentError::InsufficientFunds {
                requested: amount,
                available: record.balance,
            }
            .into());
        }

        record.balance = record.balance.checked_sub(amount).map_err(EscrowError::from)?;
        let result = PaymentResult {
            payment_id: PaymentId::new(),
            milestone_id,
            recipient,
            amount,
            executed_at: Timestamp::now(),
        };
        record.released.insert(milestone_id, result.clone());
        tracing::info!(
            wallet_id = %wallet_id,
            milestone_id = %milestone_id,
            amount = %amount,
            "milestone released"
        );
        Ok(result)
    }

    async fn execute_final_settlement(
        &self,
        wallet_id: WalletId,
        distributions: Vec<DistributionLine>,
    ) -> Result<SettlementResult, EscrowError> {
        let mut record = self.get_mut(wallet_id.clone())?;

        if let Some(existing) = &record.settlement {
            return Ok(existing.clone());
        }

        // Validate every line before moving anything: all or none.
        let total = Money::sum(
            record.balance.currency(),
            distributions.iter().map(|d| d.amount),
        )
        .map_err(EscrowError::from)?;
        if total.minor_units() > record.balance.minor_units() {
            return Err(PaymentError::InsufficientFunds {
                requested: total,
                available: record.balance,
            }
            .into());
        }

        record.balance = record.balance.checked_sub(total).map_err(EscrowError::from)?;
        let result = SettlementResult {
            settlement_id: SettlementId::new(),
            distributions,
            executed_at: Timestamp::now(),
        };
        record.settlement = Some(result.clone());
        tracing::info!(
            wallet_id = %wallet_id,
            settlement_id = %result.settlement_id,
            lines = result.distributions.len(),
            total = %total,
            "final settlement executed"
        );
        Ok(result)
    }

    async fn refund_remaining(
        &self,
        wallet_id: WalletId,
        recipient: PartyId,
    ) -> Result<Money, EscrowError> {
        let mut record = self.get_mut(wallet_id.clone())?;
        let refunded = record.balance;
        record.balance = Money::zero(refunded.currency());
        tracing::info!(
            wallet_id = %wallet_id,
            recipient = %recipient,
            refunded = %refunded,
            "unreleased escrow refunded"
        );
        Ok(refunded)
    }

    async fn wallet_balance(&self, wallet_id: WalletId) -> Result<Money, EscrowError> {
        Ok(self.get_mut(wallet_id)?.balance)
    }
}

fn uuid_suffix(transaction_id: TransactionId) -> String {
    transaction_id.as_uuid().simple().to_string()
}
