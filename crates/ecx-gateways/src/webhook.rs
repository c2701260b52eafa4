//! # Webhook Authentication
//!
//! Inbound webhooks from the wallet gateway and the verification agents
//! carry a shared token. Comparison is constant-time; a missing configured
//! token means no webhook is ever accepted.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use ecx_core::{EscrowConfig, TaskId, ValidationError};

/// The body of an inbound verification webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// The claimed sender (gateway or agent identifier).
    pub source: String,
    /// Shared authentication token.
    pub token: String,
    /// The report being submitted.
    pub report: InboundReport,
}

/// A verification report as submitted over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundReport {
    /// The task the report is for.
    pub task_id: TaskId,
    /// Review outcome: `approved`, `rejected`, or `needs_review`.
    pub status: String,
    /// Structured findings.
    pub findings: serde_json::Value,
    /// Supporting document references.
    #[serde(default)]
    pub documents: Vec<String>,
}

/// Constant-time shared-token authenticator for inbound webhooks.
#[derive(Debug, Clone)]
pub struct WebhookAuthenticator {
    token: String,
}

impl WebhookAuthenticator {
    /// Build from process configuration.
    pub fn new(config: &EscrowConfig) -> Self {
        Self {
            token: config.webhook_token.clone(),
        }
    }

    /// Authenticate a presented token.
    ///
    /// Fails closed: an empty configured token rejects everything. The
    /// comparison itself is constant-time in the token contents.
    pub fn authenticate(&self, source: &str, presented: &str) -> Result<(), ValidationError> {
        let rejected = || ValidationError::WebhookRejected {
            claimed_source: source.to_string(),
        };
        if self.token.is_empty() {
            return Err(rejected());
        }
        if self.token.len() != presented.len() {
            return Err(rejected());
        }
        if self.token.as_bytes().ct_eq(presented.as_bytes()).into() {
            Ok(())
        } else {
            Err(rejected())
        }
    }

    /// Authenticate a full envelope.
    pub fn authenticate_envelope(&self, envelope: &WebhookEnvelope) -> Result<(), ValidationError> {
        self.authenticate(&envelope.source, &envelope.token)
    }
}
