//! # HTTP Port Bindings
//!
//! `reqwest`-backed bindings of the wallet gateway and ledger client ports
//! for live deployments: the wallet gateway binds to the payment
//! processor's REST API, the ledger client to a chain RPC endpoint.
//!
//! Retries are NOT built in here. Callers wrap every operation with
//! [`crate::retry::call_with_retry`] and the dependency's circuit breaker;
//! these adapters only map one request to one typed response, with
//! endpoint, status, and body context on failure.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use ecx_core::{
    CurrencyCode, EscrowError, IntegrationError, LedgerEventId, LedgerRef, Money, MilestoneId,
    PartyId, PaymentId, SettlementId, Timestamp, TransactionId, WalletId,
};

use crate::ledger::{LedgerClient, LedgerEvent, LedgerEventType};
use crate::wallet::{
    DepositConfirmation, DistributionLine, Milestone, PaymentResult, SettlementResult,
    WalletGateway,
};

const BODY_EXCERPT_LEN: usize = 512;

// ── Shared request plumbing ────────────────────────────────────────────

#[derive(Debug)]
struct HttpPort {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    dependency: &'static str,
}

impl HttpPort {
    fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        dependency: &'static str,
    ) -> Result<Self, IntegrationError> {
        let base_url = Url::parse(base_url).map_err(|e| IntegrationError::Transport {
            endpoint: base_url.to_string(),
            reason: format!("invalid base URL: {e}"),
        })?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(
                |_| IntegrationError::Transport {
                    endpoint: base_url.to_string(),
                    reason: "API key contains invalid header characters".to_string(),
                },
            )?,
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| IntegrationError::Transport {
                endpoint: base_url.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            timeout,
            dependency,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IntegrationError> {
        self.base_url
            .join(path)
            .map_err(|e| IntegrationError::Transport {
                endpoint: format!("{}{path}", self.base_url),
                reason: format!("invalid endpoint path: {e}"),
            })
    }

    async fn execute<Resp: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &Url,
        operation: &'static str,
    ) -> Result<Resp, IntegrationError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                IntegrationError::Timeout {
                    dependency: self.dependency,
                    operation,
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                IntegrationError::Transport {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(BODY_EXCERPT_LEN);
            return Err(IntegrationError::Http {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| IntegrationError::Deserialization {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
        operation: &'static str,
    ) -> Result<Resp, IntegrationError> {
        let endpoint = self.endpoint(path)?;
        let request = self.client.post(endpoint.clone()).json(body);
        self.execute(request, &endpoint, operation).await
    }

    async fn get_json<Resp: DeserializeOwned>(
        &self,
        path: &str,
        operation: &'static str,
    ) -> Result<Resp, IntegrationError> {
        let endpoint = self.endpoint(path)?;
        let request = self.client.get(endpoint.clone());
        self.execute(request, &endpoint, operation).await
    }
}

// ── Wire DTOs ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AmountDto {
    minor_units: i64,
    currency: String,
}

impl From<Money> for AmountDto {
    fn from(m: Money) -> Self {
        Self {
            minor_units: m.minor_units(),
            currency: m.currency().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AmountRespDto {
    minor_units: i64,
    currency: String,
}

impl AmountRespDto {
    fn into_money(self, endpoint: &str) -> Result<Money, IntegrationError> {
        let currency =
            CurrencyCode::new(&self.currency).map_err(|e| IntegrationError::Deserialization {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        Money::from_minor(self.minor_units, currency).map_err(|e| {
            IntegrationError::Deserialization {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateWalletRequest {
    transaction_id: TransactionId,
    deposit: AmountDto,
}

#[derive(Debug, Deserialize)]
struct CreateWalletResponse {
    wallet_id: WalletId,
    confirmed: AmountRespDto,
}

#[derive(Debug, Serialize)]
struct MilestoneDto {
    milestone_id: String,
    recipient: PartyId,
    amount: AmountDto,
}

#[derive(Debug, Serialize)]
struct ConfigureMilestonesRequest {
    milestones: Vec<MilestoneDto>,
}

#[derive(Debug, Deserialize)]
struct AcceptedResponse {
    #[allow(dead_code)]
    accepted: bool,
}

#[derive(Debug, Serialize)]
struct ReleaseMilestoneRequest {
    milestone_id: String,
    recipient: PartyId,
    amount: AmountDto,
}

#[derive(Debug, Deserialize)]
struct ReleaseMilestoneResponse {
    payment_id: PaymentId,
    recipient: PartyId,
    amount: AmountRespDto,
    executed_at: Timestamp,
}

#[derive(Debug, Serialize)]
struct SettlementRequest {
    distributions: Vec<DistributionLineDto>,
}

#[derive(Debug, Serialize)]
struct DistributionLineDto {
    recipient: PartyId,
    purpose: String,
    amount: AmountDto,
}

#[derive(Debug, Deserialize)]
struct SettlementResponse {
    settlement_id: SettlementId,
    executed_at: Timestamp,
}

#[derive(Debug, Serialize)]
struct RefundRequest {
    recipient: PartyId,
}

#[derive(Debug, Serialize)]
struct DepositRequest {
    amount: AmountDto,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: AmountRespDto,
}

#[derive(Debug, Serialize)]
struct LogEventRequest {
    transaction_id: TransactionId,
    event_type: LedgerEventType,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct LogEventResponse {
    event_id: LedgerEventId,
    ledger_ref: LedgerRef,
    recorded_at: Timestamp,
}

#[derive(Debug, Deserialize)]
struct VerifyEventResponse {
    intact: bool,
}

// ── Wallet gateway binding ─────────────────────────────────────────────

/// Configuration for the payment-processor wallet API.
#[derive(Debug, Clone)]
pub struct WalletApiConfig {
    /// Base URL of the wallet API.
    pub base_url: String,
    /// Bearer token for the wallet API.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl WalletApiConfig {
    /// Create a configuration with the standard five-second timeout.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP binding of the wallet gateway port.
#[derive(Debug)]
pub struct HttpWalletGateway {
    port: HttpPort,
}

impl HttpWalletGateway {
    /// Create a gateway from configuration.
    pub fn new(config: WalletApiConfig) -> Result<Self, IntegrationError> {
        Ok(Self {
            port: HttpPort::new(
                &config.base_url,
                &config.api_key,
                config.timeout,
                "wallet_gateway",
            )?,
        })
    }
}

impl WalletGateway for HttpWalletGateway {
    async fn create_wallet(
        &self,
        transaction_id: TransactionId,
        deposit: Money,
    ) -> Result<DepositConfirmation, EscrowError> {
        let response: CreateWalletResponse = self
            .port
            .post_json(
                "wallets",
                &CreateWalletRequest {
                    transaction_id,
                    deposit: deposit.into(),
                },
                "create_wallet",
            )
            .await?;
        let confirmed = response.confirmed.into_money("wallets")?;
        Ok(DepositConfirmation {
            wallet_id: response.wallet_id,
            confirmed,
        })
    }

    async fn deposit_funds(&self, wallet_id: WalletId, amount: Money) -> Result<Money, EscrowError> {
        let path = format!("wallets/{wallet_id}/deposits");
        let response: BalanceResponse = self
            .port
            .post_json(&path, &DepositRequest { amount: amount.into() }, "deposit_funds")
            .await?;
        Ok(response.balance.into_money(&path)?)
    }

    async fn configure_milestones(
        &self,
        wallet_id: WalletId,
        milestones: Vec<Milestone>,
    ) -> Result<(), EscrowError> {
        let path = format!("wallets/{wallet_id}/milestones");
        let request = ConfigureMilestonesRequest {
            milestones: milestones
                .into_iter()
                .map(|m| MilestoneDto {
                    milestone_id: m.id.to_string(),
                    recipient: m.recipient,
                    amount: m.amount.into(),
                })
                .collect(),
        };
        let _: AcceptedResponse = self
            .port
            .post_json(&path, &request, "configure_milestones")
            .await?;
        Ok(())
    }

    async fn release_milestone(
        &self,
        wallet_id: WalletId,
        milestone_id: MilestoneId,
        recipient: PartyId,
        amount: Money,
    ) -> Result<PaymentResult, EscrowError> {
        let path = format!("wallets/{wallet_id}/releases");
        let response: ReleaseMilestoneResponse = self
            .port
            .post_json(
                &path,
                &ReleaseMilestoneRequest {
                    milestone_id: milestone_id.to_string(),
                    recipient,
                    amount: amount.into(),
                },
                "release_milestone",
            )
            .await?;
        let amount = response.amount.into_money(&path)?;
        Ok(PaymentResult {
            payment_id: response.payment_id,
            milestone_id,
            recipient: response.recipient,
            amount,
            executed_at: response.executed_at,
        })
    }

    async fn execute_final_settlement(
        &self,
        wallet_id: WalletId,
        distributions: Vec<DistributionLine>,
    ) -> Result<SettlementResult, EscrowError> {
        let path = format!("wallets/{wallet_id}/settlement");
        let request = SettlementRequest {
            distributions: distributions
                .iter()
                .map(|d| DistributionLineDto {
                    recipient: d.recipient.clone(),
                    purpose: d.purpose.clone(),
                    amount: d.amount.into(),
                })
                .collect(),
        };
        let response: SettlementResponse = self
            .port
            .post_json(&path, &request, "execute_final_settlement")
            .await?;
        Ok(SettlementResult {
            settlement_id: response.settlement_id,
            distributions,
            executed_at: response.executed_at,
        })
    }

    async fn refund_remaining(
        &self,
        wallet_id: WalletId,
        recipient: PartyId,
    ) -> Result<Money, EscrowError> {
        let path = format!("wallets/{wallet_id}/refund");
        let response: BalanceResponse = self
            .port
            .post_json(&path, &RefundRequest { recipient }, "refund_remaining")
            .await?;
        Ok(response.balance.into_money(&path)?)
    }

    async fn wallet_balance(&self, wallet_id: WalletId) -> Result<Money, EscrowError> {
        let path = format!("wallets/{wallet_id}/balance");
        let response: BalanceResponse = self.port.get_json(&path, "wallet_balance").await?;
        Ok(response.balance.into_money(&path)?)
    }
}

// ── Ledger client binding ──────────────────────────────────────────────

/// Configuration for the chain RPC ledger endpoint.
#[derive(Debug, Clone)]
pub struct LedgerRpcConfig {
    /// Base URL of the ledger RPC.
    pub base_url: String,
    /// Bearer token for the ledger RPC.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl LedgerRpcConfig {
    /// Create a configuration with the standard five-second timeout.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP binding of the ledger client port.
#[derive(Debug)]
pub struct HttpLedgerClient {
    port: HttpPort,
}

impl HttpLedgerClient {
    /// Create a client from configuration.
    pub fn new(config: LedgerRpcConfig) -> Result<Self, IntegrationError> {
        Ok(Self {
            port: HttpPort::new(&config.base_url, &config.api_key, config.timeout, "ledger")?,
        })
    }
}

impl LedgerClient for HttpLedgerClient {
    async fn log_event(
        &self,
        transaction_id: TransactionId,
        event_type: LedgerEventType,
        payload: serde_json::Value,
    ) -> Result<LedgerEvent, EscrowError> {
        let response: LogEventResponse = self
            .port
            .post_json(
                "events",
                &LogEventRequest {
                    transaction_id,
                    event_type,
                    payload: payload.clone(),
                },
                "log_event",
            )
            .await?;
        Ok(LedgerEvent {
            id: response.event_id,
            transaction_id,
            event_type,
            payload,
            ledger_ref: response.ledger_ref,
            recorded_at: response.recorded_at,
        })
    }

    async fn get_audit_trail(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEvent>, EscrowError> {
        let path = format!("trails/{transaction_id}");
        Ok(self.port.get_json(&path, "get_audit_trail").await?)
    }

    async fn verify_event(
        &self,
        transaction_id: TransactionId,
        event_id: LedgerEventId,
    ) -> Result<bool, EscrowError> {
        let path = format!("trails/{transaction_id}/events/{event_id}/verify");
        let response: VerifyEventResponse = self.port.get_json(&path, "verify_event").await?;
        Ok(response.intact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, CurrencyCode::USD).expect("non-negative")
    }

    async fn gateway(server: &MockServer) -> HttpWalletGateway {
        HttpWalletGateway::new(WalletApiConfig::new(format!("{}/", server.uri()), "test-key"))
            .expect("gateway")
    }

    #[tokio::test]
    async fn create_wallet_maps_the_confirmation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wallets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "wallet_id": "wallet:abc123",
                "confirmed": {"minor_units": 1_000_000, "currency": "USD"},
            })))
            .mount(&server)
            .await;

        let confirmation = gateway(&server)
            .await
            .create_wallet(TransactionId::new(), usd(1_000_000))
            .await
            .expect("confirmation");
        assert_eq!(confirmation.wallet_id.as_str(), "wallet:abc123");
        assert_eq!(confirmation.confirmed, usd(1_000_000));
    }

    #[tokio::test]
    async fn server_error_maps_to_transient_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wallets"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .await
            .create_wallet(TransactionId::new(), usd(100))
            .await;
        match err {
            Err(EscrowError::Integration(e)) => {
                assert!(matches!(e, IntegrationError::Http { status: 503, .. }));
                assert!(e.is_transient());
            }
            other => panic!("expected integration error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_error_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wallets"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad deposit"))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .await
            .create_wallet(TransactionId::new(), usd(100))
            .await;
        match err {
            Err(EscrowError::Integration(e)) => assert!(!e.is_transient()),
            other => panic!("expected integration error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_maps_to_deserialization_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wallets"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .await
            .create_wallet(TransactionId::new(), usd(100))
            .await;
        assert!(matches!(
            err,
            Err(EscrowError::Integration(
                IntegrationError::Deserialization { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn ledger_log_event_round_trips() {
        let server = MockServer::start().await;
        let event_id = LedgerEventId::new();
        Mock::given(method("POST"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "event_id": event_id,
                "ledger_ref": "deadbeef",
                "recorded_at": "2026-08-24T12:00:00Z",
            })))
            .mount(&server)
            .await;

        let client =
            HttpLedgerClient::new(LedgerRpcConfig::new(format!("{}/", server.uri()), "key"))
                .expect("client");
        let txn = TransactionId::new();
        let event = client
            .log_event(txn, LedgerEventType::EarnestDeposited, json!({"minor": 100}))
            .await
            .expect("event");
        assert_eq!(event.id, event_id);
        assert_eq!(event.transaction_id, txn);
        assert_eq!(event.ledger_ref.as_str(), "deadbeef");
    }

    #[tokio::test]
    async fn verify_event_reads_the_flag() {
        let server = MockServer::start().await;
        let txn = TransactionId::new();
        let event_id = LedgerEventId::new();
        Mock::given(method("GET"))
            .and(path(format!("/trails/{txn}/events/{event_id}/verify")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"intact": false})))
            .mount(&server)
            .await;

        let client =
            HttpLedgerClient::new(LedgerRpcConfig::new(format!("{}/", server.uri()), "key"))
                .expect("client");
        assert!(!client.verify_event(txn, event_id).await.expect("verify"));
    }
}
