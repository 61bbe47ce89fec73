use crate::execution::ExecError;
use alloy_primitives::{Address, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, Eip712Domain, SolStruct};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

// Use alloy's sol! macro to get the canonical EIP-712 hash computation.
// Struct must be named "Order" to match Polymarket's on-chain type hash:
// "Order(uint256 salt,address maker,...)"
sol! {
    #[derive(Debug)]
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

// --- Polymarket CTF Exchange EIP-712 constants ---

/// CTF Exchange contract on Polygon mainnet
const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
/// Neg Risk CTF Exchange (markets routed through the neg risk adapter)
const NEG_RISK_CTF_EXCHANGE: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";

const DOMAIN_NAME: &str = "Polymarket CTF Exchange";
const DOMAIN_VERSION: &str = "1";

/// Short-duration crypto markets charge a 10% taker fee.
pub const FEE_RATE_BPS: u32 = 1000;

/// Minimum order size in outcome tokens.
pub const MIN_ORDER_TOKENS: f64 = 5.0;

const LIMIT_FLOOR: f64 = 0.01;
const LIMIT_CEIL: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    fn as_u8(&self) -> u8 {
        match self {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }
}

/// Price/size plan for one fill-or-kill attempt, before signing.
///
/// Each retry escalates the limit by two extra cents of slippage allowance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FokPlan {
    pub limit_price: f64,
    pub size: f64,
    /// USDC micro-units, floored to a multiple of 10^4 (two decimals).
    pub maker_units: u64,
    /// Token micro-units, floored to a multiple of 10^2 (four decimals).
    pub taker_units: u64,
}

impl FokPlan {
    /// USDC actually committed at the limit.
    pub fn actual_amount(&self) -> f64 {
        self.size * self.limit_price
    }
}

/// Limit price after slippage escalation, clamped and rounded to cent ticks.
pub fn slipped_limit(price: f64, side: OrderSide, retry_count: u32) -> f64 {
    let ticks = 1 + retry_count * 2;
    let slip = ticks as f64 / 100.0;
    let limit = match side {
        OrderSide::Buy => price + slip,
        OrderSide::Sell => price - slip,
    };
    (limit.clamp(LIMIT_FLOOR, LIMIT_CEIL) * 100.0).round() / 100.0
}

/// Compute the FOK sizing for `amount` USDC at `price` on attempt `retry_count`.
pub fn plan_fok(
    amount: f64,
    price: f64,
    side: OrderSide,
    retry_count: u32,
) -> Result<FokPlan, ExecError> {
    let limit_price = slipped_limit(price, side, retry_count);
    if limit_price <= 0.0 {
        return Err(ExecError::InvalidOrder(format!("limit {limit_price} <= 0")));
    }

    let size = ((amount / limit_price) * 100.0).floor() / 100.0;
    let size = size.max(MIN_ORDER_TOKENS);

    let maker_raw = (size * limit_price * 1_000_000.0).round() as u64;
    let maker_units = (maker_raw / 10_000) * 10_000;
    let taker_raw = (size * 1_000_000.0).round() as u64;
    let taker_units = (taker_raw / 100) * 100;

    if maker_units == 0 || taker_units == 0 {
        return Err(ExecError::InvalidOrder(format!(
            "degenerate amounts: maker={maker_units} taker={taker_units}"
        )));
    }

    Ok(FokPlan {
        limit_price,
        size,
        maker_units,
        taker_units,
    })
}

/// Wire form of a signed order, as the CLOB expects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: u64,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: String,
    pub signature_type: u8,
    pub signature: String,
}

#[derive(Debug, Clone)]
pub struct BuiltOrder {
    pub signed: SignedOrder,
    pub plan: FokPlan,
}

/// Builds and signs EIP-712 orders for CLOB submission.
///
/// The signer, maker, signature type, and domain are all derived once at
/// construction; per-order work is the struct hash and one secp256k1 sign.
pub struct OrderBuilder {
    signer: PrivateKeySigner,
    maker_address: Address,
    funder_address: Option<Address>,
    signature_type: u8,
    chain_id: u64,
    use_neg_risk: bool,
    domain: Eip712Domain,
    /// The scanner only ever touches the active market's two tokens, so a
    /// two-entry parse cache covers every order.
    token_cache: DashMap<String, U256>,
}

impl OrderBuilder {
    pub fn new(chain_id: u64, private_key: &str, funder_address: Option<&str>) -> Self {
        let signer = if private_key.is_empty() {
            PrivateKeySigner::random()
        } else {
            let key_hex = private_key.strip_prefix("0x").unwrap_or(private_key);
            key_hex.parse::<PrivateKeySigner>().unwrap_or_else(|_| {
                tracing::warn!("Invalid private key, using random signer (dry-run mode)");
                PrivateKeySigner::random()
            })
        };

        let maker_address = signer.address();
        let funder = funder_address.and_then(|f| f.parse::<Address>().ok());
        // Funded (proxy wallet) orders sign as the operator: sigType 1.
        let signature_type = if funder.is_some() { 1 } else { 0 };

        let domain = Self::build_domain(chain_id, false);

        Self {
            signer,
            maker_address,
            funder_address: funder,
            signature_type,
            chain_id,
            use_neg_risk: false,
            domain,
            token_cache: DashMap::new(),
        }
    }

    fn build_domain(chain_id: u64, neg_risk: bool) -> Eip712Domain {
        let exchange = if neg_risk {
            NEG_RISK_CTF_EXCHANGE
        } else {
            CTF_EXCHANGE
        };
        Eip712Domain {
            name: Some(DOMAIN_NAME.into()),
            version: Some(DOMAIN_VERSION.into()),
            chain_id: Some(U256::from(chain_id)),
            verifying_contract: Some(exchange.parse::<Address>().expect("const address parses")),
            salt: None,
        }
    }

    /// Route through the neg risk CTF exchange adapter.
    pub fn set_neg_risk(&mut self, neg_risk: bool) {
        self.use_neg_risk = neg_risk;
        self.domain = Self::build_domain(self.chain_id, neg_risk);
    }

    pub fn address(&self) -> Address {
        self.maker_address
    }

    pub fn signature_type(&self) -> u8 {
        self.signature_type
    }

    fn parse_token_id(&self, token_id: &str) -> U256 {
        if let Some(cached) = self.token_cache.get(token_id) {
            return *cached;
        }
        let value = if let Some(hex_digits) = token_id
            .strip_prefix("0x")
            .or_else(|| token_id.strip_prefix("0X"))
        {
            U256::from_str_radix(hex_digits, 16).unwrap_or(U256::ZERO)
        } else {
            U256::from_str_radix(token_id, 10).unwrap_or(U256::ZERO)
        };
        if self.token_cache.len() >= 2 {
            self.token_cache.clear();
        }
        self.token_cache.insert(token_id.to_string(), value);
        value
    }

    /// Build and sign one fill-or-kill order.
    pub async fn build_fok(
        &self,
        token_id: &str,
        amount: f64,
        price: f64,
        side: OrderSide,
        retry_count: u32,
    ) -> Result<BuiltOrder, ExecError> {
        let plan = plan_fok(amount, price, side, retry_count)?;

        let salt = Utc::now().timestamp_millis() as u64;
        let maker = self.funder_address.unwrap_or(self.maker_address);

        let sol_order = Order {
            salt: U256::from(salt),
            maker,
            signer: self.maker_address,
            taker: Address::ZERO, // open taker
            tokenId: self.parse_token_id(token_id),
            makerAmount: U256::from(plan.maker_units),
            takerAmount: U256::from(plan.taker_units),
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            feeRateBps: U256::from(FEE_RATE_BPS),
            side: side.as_u8(),
            signatureType: self.signature_type,
        };

        let digest = sol_order.eip712_signing_hash(&self.domain);
        let signature = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| ExecError::Signing(e.to_string()))?;
        let sig_hex = format!("0x{}", hex::encode(signature.as_bytes()));

        debug!(
            "Signed FOK: token={} side={} limit={:.2} size={:.2} maker={} taker={}",
            token_id,
            side.as_str(),
            plan.limit_price,
            plan.size,
            plan.maker_units,
            plan.taker_units
        );

        Ok(BuiltOrder {
            signed: SignedOrder {
                salt,
                maker: format!("{maker:?}"),
                signer: format!("{:?}", self.maker_address),
                taker: format!("{:?}", Address::ZERO),
                token_id: token_id.to_string(),
                maker_amount: plan.maker_units.to_string(),
                taker_amount: plan.taker_units.to_string(),
                expiration: "0".to_string(),
                nonce: "0".to_string(),
                fee_rate_bps: FEE_RATE_BPS.to_string(),
                side: side.as_str().to_string(),
                signature_type: self.signature_type,
                signature: sig_hex,
            },
            plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_escalates_by_two_ticks() {
        assert_eq!(slipped_limit(0.54, OrderSide::Buy, 0), 0.55);
        assert_eq!(slipped_limit(0.54, OrderSide::Buy, 1), 0.57);
        assert_eq!(slipped_limit(0.54, OrderSide::Buy, 2), 0.59);
        assert_eq!(slipped_limit(0.54, OrderSide::Buy, 3), 0.61);
        assert_eq!(slipped_limit(0.54, OrderSide::Sell, 0), 0.53);
    }

    #[test]
    fn limit_clamped_to_valid_band() {
        assert_eq!(slipped_limit(0.985, OrderSide::Buy, 2), 0.99);
        assert_eq!(slipped_limit(0.02, OrderSide::Sell, 3), 0.01);
    }

    #[test]
    fn plan_enforces_five_token_minimum() {
        let plan = plan_fok(1.0, 0.50, OrderSide::Buy, 0).unwrap();
        // 1 USDC at 0.51 would be ~1.96 tokens; floor is 5
        assert_eq!(plan.size, MIN_ORDER_TOKENS);
    }

    #[test]
    fn plan_amounts_are_unit_aligned() {
        let plan = plan_fok(4.0, 0.44, OrderSide::Buy, 0).unwrap();
        assert_eq!(plan.limit_price, 0.45);
        assert_eq!(plan.size, (4.0f64 / 0.45 * 100.0).floor() / 100.0);
        assert_eq!(plan.maker_units % 10_000, 0);
        assert_eq!(plan.taker_units % 100, 0);
        assert!(plan.maker_units > 0 && plan.taker_units > 0);
    }

    #[test]
    fn actual_amount_is_size_times_limit() {
        let plan = plan_fok(10.0, 0.54, OrderSide::Buy, 1).unwrap();
        assert!((plan.actual_amount() - plan.size * 0.57).abs() < 1e-9);
    }

    #[tokio::test]
    async fn signature_recovers_to_signer_address() {
        let builder = OrderBuilder::new(137, "", None);
        let built = builder
            .build_fok("12345678901234567890", 5.0, 0.45, OrderSide::Buy, 0)
            .await
            .unwrap();

        // Recompute the digest from the wire order and recover the signer.
        let sol_order = Order {
            salt: U256::from(built.signed.salt),
            maker: builder.address(),
            signer: builder.address(),
            taker: Address::ZERO,
            tokenId: U256::from_str_radix("12345678901234567890", 10).unwrap(),
            makerAmount: U256::from(built.signed.maker_amount.parse::<u64>().unwrap()),
            takerAmount: U256::from(built.signed.taker_amount.parse::<u64>().unwrap()),
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            feeRateBps: U256::from(FEE_RATE_BPS),
            side: 0,
            signatureType: 0,
        };
        let digest = sol_order.eip712_signing_hash(&builder.domain);

        let sig_bytes = hex::decode(built.signed.signature.trim_start_matches("0x")).unwrap();
        assert_eq!(sig_bytes.len(), 65);
        let signature = alloy_primitives::Signature::try_from(sig_bytes.as_slice()).unwrap();
        let recovered = signature.recover_address_from_prehash(&digest).unwrap();
        assert_eq!(recovered, builder.address());
    }

    #[test]
    fn funder_presence_selects_signature_type() {
        let eoa = OrderBuilder::new(137, "", None);
        assert_eq!(eoa.signature_type(), 0);
        let proxied = OrderBuilder::new(
            137,
            "",
            Some("0x2222222222222222222222222222222222222222"),
        );
        assert_eq!(proxied.signature_type(), 1);
    }

    #[test]
    fn token_cache_holds_last_two_ids() {
        let builder = OrderBuilder::new(137, "", None);
        let a = builder.parse_token_id("111");
        let b = builder.parse_token_id("222");
        assert_eq!(a, U256::from(111u64));
        assert_eq!(b, U256::from(222u64));
        assert_eq!(builder.token_cache.len(), 2);
        builder.parse_token_id("333");
        assert_eq!(builder.token_cache.len(), 1);
    }

    #[test]
    fn order_type_string_matches_onchain_definition() {
        // Guard against drift in the sol! struct definition.
        assert_eq!(
            Order::eip712_encode_type(),
            "Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)",
        );
    }
}
