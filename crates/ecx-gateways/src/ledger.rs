//! # Ledger Client Port
//!
//! The append-only audit trail. Every state-affecting action in the system
//! is recorded as a [`LedgerEvent`] through this port and nowhere else.
//!
//! The in-memory binding chains events per transaction: each ledger
//! reference is the SHA-256 digest of the event contents plus the previous
//! event's reference. Altering or removing any past event breaks the chain
//! for every event after it, which is what [`LedgerClient::verify_event`]
//! checks.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ecx_core::{
    EscrowError, IntegrationError, LedgerEventId, LedgerRef, Timestamp, TransactionId,
    ValidationError,
};

// ── Event vocabulary ───────────────────────────────────────────────────

/// The fixed vocabulary of auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventType {
    /// A transaction was created.
    TransactionInitiated,
    /// Earnest money was confirmed on deposit.
    EarnestDeposited,
    /// A verification task was assigned to an agent.
    TaskAssigned,
    /// A verification task finished with a report.
    TaskCompleted,
    /// A milestone payment was released from escrow.
    PaymentReleased,
    /// The final settlement distribution executed.
    SettlementExecuted,
    /// A dispute was raised.
    DisputeRaised,
    /// A dispute was resolved.
    DisputeResolved,
    /// The transaction was cancelled.
    TransactionCancelled,
}

impl LedgerEventType {
    /// The canonical string name of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionInitiated => "transaction_initiated",
            Self::EarnestDeposited => "earnest_deposited",
            Self::TaskAssigned => "task_assigned",
            Self::TaskCompleted => "task_completed",
            Self::PaymentReleased => "payment_released",
            Self::SettlementExecuted => "settlement_executed",
            Self::DisputeRaised => "dispute_raised",
            Self::DisputeResolved => "dispute_resolved",
            Self::TransactionCancelled => "transaction_cancelled",
        }
    }
}

impl std::fmt::Display for LedgerEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Event identifier.
    pub id: LedgerEventId,
    /// The transaction the event belongs to.
    pub transaction_id: TransactionId,
    /// What happened.
    pub event_type: LedgerEventType,
    /// Structured event payload.
    pub payload: serde_json::Value,
    /// The ledger's reference for this event.
    pub ledger_ref: LedgerRef,
    /// When the event was recorded.
    pub recorded_at: Timestamp,
}

// ── The port ───────────────────────────────────────────────────────────

/// Audit-trail interface to the ledger.
pub trait LedgerClient: Send + Sync {
    /// Append one event. Returns the recorded event with its ledger
    /// reference.
    fn log_event(
        &self,
        transaction_id: TransactionId,
        event_type: LedgerEventType,
        payload: serde_json::Value,
    ) -> impl std::future::Future<Output = Result<LedgerEvent, EscrowError>> + Send;

    /// The full event history for a transaction, oldest first.
    fn get_audit_trail(
        &self,
        transaction_id: TransactionId,
    ) -> impl std::future::Future<Output = Result<Vec<LedgerEvent>, EscrowError>> + Send;

    /// Check that a recorded event is intact in its chain.
    fn verify_event(
        &self,
        transaction_id: TransactionId,
        event_id: LedgerEventId,
    ) -> impl std::future::Future<Output = Result<bool, EscrowError>> + Send;
}

// ── In-memory binding ──────────────────────────────────────────────────

/// Digest-chained in-memory ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    trails: dashmap::DashMap<TransactionId, Vec<LedgerEvent>>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn chain_digest(
        prev_ref: &str,
        event_id: LedgerEventId,
        transaction_id: TransactionId,
        event_type: LedgerEventType,
        payload: &serde_json::Value,
        recorded_at: Timestamp,
    ) -> Result<String, EscrowError> {
        let payload_bytes = serde_json::to_vec(payload).map_err(|e| {
            EscrowError::from(ValidationError::MalformedReport {
                verification_type: "ledger_payload".to_string(),
                reason: e.to_string(),
            })
        })?;
        let mut hasher = Sha256::new();
        hasher.update(prev_ref.as_bytes());
        hasher.update(event_id.to_string().as_bytes());
        hasher.update(transaction_id.to_string().as_bytes());
        hasher.update(event_type.as_str().as_bytes());
        hasher.update(&payload_bytes);
        hasher.update(recorded_at.to_canonical_string().as_bytes());
        let digest = hasher.finalize();
        Ok(hex_encode(&digest))
    }
}

impl LedgerClient for InMemoryLedger {
    async fn log_event(
        &self,
        transaction_id: TransactionId,
        event_type: LedgerEventType,
        payload: serde_json::Value,
    ) -> Result<LedgerEvent, EscrowError> {
        let mut trail = self.trails.entry(transaction_id).or_default();
        let prev_ref = trail
            .last()
            .map(|e| e.ledger_ref.as_str().to_string())
            .unwrap_or_default();

        let id = LedgerEventId::new();
        let recorded_at = Timestamp::now();
        let digest = Self::chain_digest(
            &prev_ref,
            id,
            transaction_id,
            event_type,
            &payload,
            recorded_at,
        )?;
        let event = LedgerEvent {
            id,
            transaction_id,
            event_type,
            payload,
            ledger_ref: LedgerRef::new(digest).map_err(EscrowError::from)?,
            recorded_at,
        };
        trail.push(event.clone());
        tracing::info!(
            transaction_id = %transaction_id,
            event_type = %event_type,
            ledger_ref = %event.ledger_ref,
            sequence = trail.len(),
            "ledger event recorded"
        );
        Ok(event)
    }

    async fn get_audit_trail(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEvent>, EscrowError> {
        Ok(self
            .trails
            .get(&transaction_id)
            .map(|t| t.clone())
            .unwrap_or_default())
    }

    async fn verify_event(
        &self,
        transaction_id: TransactionId,
        event_id: LedgerEventId,
    ) -> Result<bool, EscrowError> {
        let trail = match self.trails.get(&transaction_id) {
            Some(t) => t,
            None => {
                return Err(IntegrationError::Deserialization {
                    endpoint: "memory://ledger".to_string(),
                    reason: format!("no trail for {transaction_id}"),
                }
                .into())
            }
        };
        let Some(position) = trail.iter().position(|e| e.id == event_id) else {
            return Ok(false);
        };
        let prev_ref = if position == 0 {
            String::new()
        } else {
            trail[position - 1].ledger_ref.as_str().to_string()
        };
        let event = &trail[position];
        let expected = Self::chain_digest(
            &prev_ref,
            event.id,
            event.transaction_id,
            event.event_type,
            &event.payload,
            event.recorded_at,
        )?;
        Ok(expected == event.ledger_ref.as_str())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_chain_in_order() {
        let ledger = InMemoryLedger::new();
        let txn = TransactionId::new();

        let first = ledger
            .log_event(txn, LedgerEventType::TransactionInitiated, json!({"n": 1}))
            .await
            .expect("log");
        let second = ledger
            .log_event(txn, LedgerEventType::EarnestDeposited, json!({"n": 2}))
            .await
            .expect("log");

        let trail = ledger.get_audit_trail(txn).await.expect("trail");
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].id, first.id);
        assert_eq!(trail[1].id, second.id);
        assert_ne!(first.ledger_ref, second.ledger_ref);
    }

    #[tokio::test]
    async fn intact_events_verify() {
        let ledger = InMemoryLedger::new();
        let txn = TransactionId::new();
        let mut ids = Vec::new();
        for n in 0..5 {
            let event = ledger
                .log_event(txn, LedgerEventType::TaskCompleted, json!({"n": n}))
                .await
                .expect("log");
            ids.push(event.id);
        }
        for id in ids {
            assert!(ledger.verify_event(txn, id).await.expect("verify"));
        }
    }

    #[tokio::test]
    async fn tampering_breaks_verification() {
        let ledger = InMemoryLedger::new();
        let txn = TransactionId::new();
        let event = ledger
            .log_event(txn, LedgerEventType::PaymentReleased, json!({"amount": 100}))
            .await
            .expect("log");

        // Reach behind the port and alter the stored payload.
        ledger
            .trails
            .get_mut(&txn)
            .expect("trail")
            .last_mut()
            .expect("event")
            .payload = json!({"amount": 100_000});

        assert!(!ledger.verify_event(txn, event.id).await.expect("verify"));
    }

    #[tokio::test]
    async fn unknown_event_does_not_verify() {
        let ledger = InMemoryLedger::new();
        let txn = TransactionId::new();
        ledger
            .log_event(txn, LedgerEventType::TransactionInitiated, json!({}))
            .await
            .expect("log");
        assert!(!ledger
            .verify_event(txn, LedgerEventId::new())
            .await
            .expect("verify"));
    }

    #[tokio::test]
    async fn empty_trail_reads_as_empty() {
        let ledger = InMemoryLedger::new();
        let trail = ledger
            .get_audit_trail(TransactionId::new())
            .await
            .expect("trail");
        assert!(trail.is_empty());
    }
}
