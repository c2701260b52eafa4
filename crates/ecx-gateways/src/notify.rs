//! # Notification Port
//!
//! Outbound party notifications and operator escalations. Delivery
//! transports (email, SMS, webhook fan-out) live outside this system; the
//! port only states what happened and to whom.

use serde::{Deserialize, Serialize};

use ecx_core::{EscrowError, Timestamp, TransactionId};

/// A recorded outbound notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// The transaction the notification concerns.
    pub transaction_id: TransactionId,
    /// The event or issue being communicated.
    pub subject: String,
    /// Delivery channels requested.
    pub channels: Vec<String>,
    /// Whether this was an operator escalation rather than a party update.
    pub escalation: bool,
    /// When the notification was sent.
    pub sent_at: Timestamp,
}

/// Notification interface to the delivery layer.
pub trait NotificationEngine: Send + Sync {
    /// Notify the transaction's parties of an event.
    fn notify_parties(
        &self,
        transaction_id: TransactionId,
        event: &str,
        channels: &[String],
    ) -> impl std::future::Future<Output = Result<(), EscrowError>> + Send;

    /// Escalate an issue to an operator.
    fn send_escalation(
        &self,
        transaction_id: TransactionId,
        issue: &str,
    ) -> impl std::future::Future<Output = Result<(), EscrowError>> + Send;
}

/// In-memory notifier that records what would have been delivered.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: parking_lot::Mutex<Vec<NotificationRecord>>,
}

impl InMemoryNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    pub fn sent(&self) -> Vec<NotificationRecord> {
        self.sent.lock().clone()
    }
}

impl NotificationEngine for InMemoryNotifier {
    async fn notify_parties(
        &self,
        transaction_id: TransactionId,
        event: &str,
        channels: &[String],
    ) -> Result<(), EscrowError> {
        tracing::info!(transaction_id = %transaction_id, event, "notifying parties");
        self.sent.lock().push(NotificationRecord {
            transaction_id,
            subject: event.to_string(),
            channels: channels.to_vec(),
            escalation: false,
            sent_at: Timestamp::now(),
        });
        Ok(())
    }

    async fn send_escalation(
        &self,
        transaction_id: TransactionId,
        issue: &str,
    ) -> Result<(), EscrowError> {
        tracing::warn!(transaction_id = %transaction_id, issue, "operator escalation");
        self.sent.lock().push(NotificationRecord {
            transaction_id,
            subject: issue.to_string(),
            channels: vec![],
            escalation: true,
            sent_at: Timestamp::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_notifications_and_escalations() {
        let notifier = InMemoryNotifier::new();
        let txn = TransactionId::new();
        notifier
            .notify_parties(txn, "funded", &["email".to_string()])
            .await
            .expect("notify");
        notifier
            .send_escalation(txn, "inspection overdue")
            .await
            .expect("escalate");

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(!sent[0].escalation);
        assert!(sent[1].escalation);
        assert_eq!(sent[1].subject, "inspection overdue");
    }
}
