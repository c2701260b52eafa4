//! # ecx-gateways — External Dependency Ports
//!
//! Every external system the orchestrator touches goes through a port
//! defined here:
//!
//! - **Wallet** ([`wallet`]): The [`WalletGateway`] trait for custodying
//!   escrow funds, with an in-memory binding whose milestone release is
//!   idempotent and whose final settlement is atomic.
//!
//! - **Ledger** ([`ledger`]): The [`LedgerClient`] trait for the append-only
//!   audit trail, with a digest-chained in-memory binding and per-event
//!   verification.
//!
//! - **Notify** ([`notify`]): The [`NotificationEngine`] trait; delivery
//!   transports live outside this system.
//!
//! - **Breaker** ([`breaker`]): Three-state circuit breaker per dependency
//!   with observable state transitions.
//!
//! - **Retry** ([`retry`]): Shared bounded-retry wrapper with exponential
//!   backoff. Transient transport failures and gateway payment rejections
//!   are retried within budget; validation and workflow errors are not.
//!
//! - **Webhook** ([`webhook`]): Constant-time shared-token authentication
//!   for inbound gateway and agent webhooks. Fails closed when no token is
//!   configured.
//!
//! - **Http** ([`http`]): `reqwest`-backed bindings of the wallet and ledger
//!   ports for live payment-processor and chain RPC deployments.

pub mod breaker;
pub mod http;
pub mod ledger;
pub mod notify;
pub mod retry;
pub mod wallet;
pub mod webhook;

pub use breaker::{BreakerState, BreakerTransition, CircuitBreaker};
pub use http::{HttpLedgerClient, HttpWalletGateway, LedgerRpcConfig, WalletApiConfig};
pub use ledger::{InMemoryLedger, LedgerClient, LedgerEvent, LedgerEventType};
pub use notify::{InMemoryNotifier, NotificationEngine, NotificationRecord};
pub use retry::call_with_retry;
pub use wallet::{
    DepositConfirmation, DistributionLine, InMemoryWalletGateway, Milestone, PaymentResult,
    SettlementResult, WalletGateway,
};
pub use webhook::{InboundReport, WebhookAuthenticator, WebhookEnvelope};
