//! # Process Configuration
//!
//! One [`EscrowConfig`] constructed at process start and passed by reference
//! into each component's constructor. Components never read configuration
//! from the environment or from module-level state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::money::CurrencyCode;

/// Retry budget for one class of outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each subsequent retry.
    pub base_delay: Duration,
}

/// Configuration for the escrow stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Currency for all fund movements in this deployment.
    pub currency: CurrencyCode,

    /// Buyer's agent commission, in basis points of the purchase price.
    pub buyer_agent_commission_bps: u32,

    /// Seller's agent commission, in basis points of the purchase price.
    pub seller_agent_commission_bps: u32,

    /// Percentage component of closing costs, in basis points of the
    /// purchase price. Verification fees are added on top.
    pub closing_cost_bps: u32,

    /// Retry budget for wallet-gateway fund movements.
    pub payment_retry: RetrySettings,

    /// Retry budget for ledger writes.
    pub ledger_retry: RetrySettings,

    /// Bounded timeout applied to every external call.
    pub call_timeout: Duration,

    /// Consecutive failures before a dependency's circuit breaker opens.
    pub breaker_failure_threshold: u32,

    /// How long an open breaker short-circuits before admitting a trial call.
    pub breaker_cooldown: Duration,

    /// Shared token expected on inbound gateway and agent webhooks.
    ///
    /// Empty means "no webhooks accepted" — authentication fails closed.
    pub webhook_token: String,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::USD,
            buyer_agent_commission_bps: 250,
            seller_agent_commission_bps: 300,
            closing_cost_bps: 100,
            payment_retry: RetrySettings {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
            },
            ledger_retry: RetrySettings {
                max_attempts: 5,
                base_delay: Duration::from_secs(2),
            },
            call_timeout: Duration::from_secs(5),
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
            webhook_token: String::new(),
        }
    }
}

impl EscrowConfig {
    /// Total commission load in basis points.
    pub fn total_commission_bps(&self) -> u32 {
        self.buyer_agent_commission_bps + self.seller_agent_commission_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budgets_match_policy() {
        let cfg = EscrowConfig::default();
        assert_eq!(cfg.payment_retry.max_attempts, 3);
        assert_eq!(cfg.payment_retry.base_delay, Duration::from_secs(1));
        assert_eq!(cfg.ledger_retry.max_attempts, 5);
        assert_eq!(cfg.ledger_retry.base_delay, Duration::from_secs(2));
    }

    #[test]
    fn default_webhook_token_fails_closed() {
        assert!(EscrowConfig::default().webhook_token.is_empty());
    }

    #[test]
    fn commission_total() {
        let cfg = EscrowConfig::default();
        assert_eq!(cfg.total_commission_bps(), 550);
    }
}
