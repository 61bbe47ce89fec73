use crate::config::PolymarketConfig;
use crate::execution::clob_auth::ClobAuth;
use crate::execution::order_builder::{plan_fok, OrderBuilder, OrderSide, SignedOrder};
use crate::execution::ExecError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Result of one order submission attempt. Failures are values, not errors:
/// the scanner decides whether to retry, burn the candle, or record a row.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub success: bool,
    pub order_id: String,
    pub status: String,
    pub actual_amount: f64,
    pub actual_size: f64,
    pub limit_price: f64,
    pub error: Option<String>,
}

impl OrderOutcome {
    pub fn is_matched(&self) -> bool {
        self.success && self.status == "MATCHED"
    }

    pub fn failure(limit_price: f64, error: String) -> Self {
        Self {
            success: false,
            order_id: String::new(),
            status: String::new(),
            actual_amount: 0.0,
            actual_size: 0.0,
            limit_price,
            error: Some(error),
        }
    }
}

/// Order submission seam. The live implementation signs and POSTs to the
/// CLOB; the dry-run implementation fabricates matched fills so the whole
/// pipeline and ledger run without network I/O.
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn place_order(
        &self,
        token_id: &str,
        amount: f64,
        price: f64,
        side: OrderSide,
        retry_count: u32,
    ) -> OrderOutcome;

    /// Current on-chain USDC collateral balance.
    async fn fetch_balance(&self) -> Result<f64, ExecError>;
}

#[derive(Debug, Serialize)]
struct PostOrderRequest {
    order: SignedOrder,
    owner: String,
    #[serde(rename = "orderType")]
    order_type: String,
    #[serde(rename = "postOnly")]
    post_only: bool,
}

#[derive(Debug, Deserialize)]
struct PostOrderResponse {
    success: Option<bool>,
    #[serde(rename = "orderID")]
    order_id: Option<String>,
    status: Option<String>,
    #[serde(rename = "errorMsg")]
    error_msg: Option<String>,
    /// API returns "error" on rejections (different from "errorMsg")
    error: Option<String>,
}

/// REST client for the Polymarket CLOB order endpoint.
pub struct ClobClient {
    host: String,
    http: reqwest::Client,
    auth: ClobAuth,
    builder: OrderBuilder,
    signature_type: u8,
}

impl ClobClient {
    pub fn new(config: &PolymarketConfig, http_timeout_ms: u64) -> Result<Self, ExecError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Some(std::time::Duration::from_secs(30)))
            .connect_timeout(std::time::Duration::from_millis(http_timeout_ms))
            .timeout(std::time::Duration::from_millis(http_timeout_ms))
            .build()?;

        let mut builder = OrderBuilder::new(
            config.chain_id,
            &config.private_key,
            config.funder_address.as_deref(),
        );
        // All up/down 5-minute markets route through the neg risk adapter.
        builder.set_neg_risk(true);

        let auth = ClobAuth::new(
            format!("{:?}", builder.address()),
            config.api_key.clone(),
            &config.api_secret,
            config.passphrase.clone(),
        )?;

        Ok(Self {
            host: config.clob_host.clone(),
            http,
            auth,
            signature_type: builder.signature_type(),
            builder,
        })
    }

    pub fn address(&self) -> String {
        self.auth.address().to_string()
    }

    /// One throwaway GET to open the TLS connection before the first order.
    pub async fn warm_up(&self) {
        let url = format!("{}/time", self.host);
        match self.http.get(&url).send().await {
            Ok(_) => debug!("CLOB connection pool warmed"),
            Err(e) => debug!("CLOB warmup failed: {e}"),
        }
    }

    async fn submit(&self, signed: SignedOrder) -> Result<PostOrderResponse, ExecError> {
        let body = PostOrderRequest {
            order: signed,
            owner: self.auth.api_key().to_string(),
            order_type: "FOK".to_string(),
            post_only: false,
        };
        let body_json =
            serde_json::to_string(&body).map_err(|e| ExecError::Parse(e.to_string()))?;

        let headers = self.auth.l2_headers("POST", "/order", &body_json);
        let url = format!("{}/order", self.host);
        let resp = headers
            .apply(self.http.post(&url))
            .header("Content-Type", "application/json")
            .body(body_json)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ExecError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| ExecError::Parse(format!("{e}: {text}")))
    }
}

#[async_trait]
impl OrderApi for ClobClient {
    async fn place_order(
        &self,
        token_id: &str,
        amount: f64,
        price: f64,
        side: OrderSide,
        retry_count: u32,
    ) -> OrderOutcome {
        let built = match self
            .builder
            .build_fok(token_id, amount, price, side, retry_count)
            .await
        {
            Ok(b) => b,
            Err(e) => {
                error!("Order build failed: {e}");
                return OrderOutcome::failure(price, e.to_string());
            }
        };
        let plan = built.plan;

        match self.submit(built.signed).await {
            Ok(resp) => {
                let success = resp.success.unwrap_or(false);
                let status = resp.status.unwrap_or_default().to_uppercase();
                if success {
                    info!(
                        "Order {}: id={} limit={:.2} size={:.2}",
                        status,
                        resp.order_id.as_deref().unwrap_or("?"),
                        plan.limit_price,
                        plan.size
                    );
                } else {
                    error!(
                        "Order rejected: {}",
                        resp.error.as_deref().or(resp.error_msg.as_deref()).unwrap_or("?")
                    );
                }
                OrderOutcome {
                    success,
                    order_id: resp.order_id.unwrap_or_default(),
                    status,
                    actual_amount: plan.actual_amount(),
                    actual_size: plan.size,
                    limit_price: plan.limit_price,
                    error: resp.error.or(resp.error_msg),
                }
            }
            Err(e) => {
                error!("Order submit failed: {e}");
                OrderOutcome::failure(plan.limit_price, e.to_string())
            }
        }
    }

    async fn fetch_balance(&self) -> Result<f64, ExecError> {
        let path = format!(
            "/balance-allowance?asset_type=COLLATERAL&signature_type={}",
            self.signature_type
        );
        let headers = self.auth.l2_headers("GET", &path, "");
        let url = format!("{}{}", self.host, path);
        let resp = headers.apply(self.http.get(&url)).send().await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ExecError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let val: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ExecError::Parse(e.to_string()))?;
        let raw = val
            .get("balance")
            .and_then(|b| {
                b.as_str()
                    .and_then(|s| s.parse::<f64>().ok())
                    .or_else(|| b.as_f64())
            })
            .ok_or_else(|| ExecError::Parse(format!("no balance field in {text}")))?;

        Ok(normalize_balance(raw))
    }
}

/// The balance endpoint answers in raw USDC micro-units for some accounts
/// and in decimal USDC for others.
fn normalize_balance(raw: f64) -> f64 {
    if raw > 1_000_000.0 {
        raw / 1_000_000.0
    } else {
        raw
    }
}

/// Dry-run order path: every well-formed order matches at its limit.
pub struct DryRunOrderApi;

#[async_trait]
impl OrderApi for DryRunOrderApi {
    async fn place_order(
        &self,
        _token_id: &str,
        amount: f64,
        price: f64,
        side: OrderSide,
        retry_count: u32,
    ) -> OrderOutcome {
        match plan_fok(amount, price, side, retry_count) {
            Ok(plan) => OrderOutcome {
                success: true,
                order_id: format!("dry-{}", uuid::Uuid::new_v4()),
                status: "MATCHED".to_string(),
                actual_amount: plan.actual_amount(),
                actual_size: plan.size,
                limit_price: plan.limit_price,
                error: None,
            },
            Err(e) => OrderOutcome::failure(price, e.to_string()),
        }
    }

    async fn fetch_balance(&self) -> Result<f64, ExecError> {
        Err(ExecError::Auth("no on-chain balance in dry-run".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micro_unit_balances_are_scaled() {
        assert_eq!(normalize_balance(5_123_456.0), 5.123456);
        assert_eq!(normalize_balance(512.34), 512.34);
        assert_eq!(normalize_balance(1_000_000.0), 1_000_000.0);
    }

    #[test]
    fn matched_requires_success_and_status() {
        let mut outcome = OrderOutcome {
            success: true,
            order_id: "o".into(),
            status: "MATCHED".into(),
            actual_amount: 2.0,
            actual_size: 5.0,
            limit_price: 0.40,
            error: None,
        };
        assert!(outcome.is_matched());
        outcome.status = "LIVE".into();
        assert!(!outcome.is_matched());
        outcome.status = "MATCHED".into();
        outcome.success = false;
        assert!(!outcome.is_matched());
    }

    #[tokio::test]
    async fn dry_run_orders_match_at_limit() {
        let api = DryRunOrderApi;
        let outcome = api
            .place_order("111", 4.0, 0.44, OrderSide::Buy, 0)
            .await;
        assert!(outcome.is_matched());
        assert_eq!(outcome.limit_price, 0.45);
        assert!(outcome.actual_size >= 5.0);
        assert!((outcome.actual_amount - outcome.actual_size * 0.45).abs() < 1e-9);
    }
}
