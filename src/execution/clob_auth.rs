use crate::execution::ExecError;
use chrono::Utc;

/// Polymarket CLOB L2 (API key) authentication.
///
/// Every authenticated request carries five headers signed with
/// HMAC-SHA256 over `timestamp + METHOD + path + body`, where the key is the
/// base64-url-decoded API secret. The official client excludes the query
/// string from the signed path.
pub struct ClobAuth {
    address: String,
    api_key: String,
    passphrase: String,
    secret: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub address: String,
    pub api_key: String,
    pub passphrase: String,
    pub timestamp: String,
    pub signature: String,
}

impl ClobAuth {
    /// Decode the shared secret once at startup; a bad secret is a config
    /// error, not something to discover on the first order.
    pub fn new(
        address: String,
        api_key: String,
        api_secret: &str,
        passphrase: String,
    ) -> Result<Self, ExecError> {
        let secret = base64_decode(api_secret)
            .map_err(|e| ExecError::Auth(format!("api secret is not base64url: {e}")))?;
        Ok(Self {
            address,
            api_key,
            passphrase,
            secret,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Generate L2 headers for one request.
    pub fn l2_headers(&self, method: &str, path: &str, body: &str) -> AuthHeaders {
        let timestamp = Utc::now().timestamp().to_string();
        self.l2_headers_at(&timestamp, method, path, body)
    }

    /// Deterministic variant used by tests.
    pub fn l2_headers_at(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> AuthHeaders {
        let path_only = path.split('?').next().unwrap_or(path);
        let payload = format!("{}{}{}{}", timestamp, method.to_uppercase(), path_only, body);
        let signature = base64_encode(&hmac_sha256(&self.secret, payload.as_bytes()));

        AuthHeaders {
            address: self.address.clone(),
            api_key: self.api_key.clone(),
            passphrase: self.passphrase.clone(),
            timestamp: timestamp.to_string(),
            signature,
        }
    }
}

impl AuthHeaders {
    /// Apply auth headers to a reqwest RequestBuilder.
    pub fn apply(self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("POLY_ADDRESS", &self.address)
            .header("POLY_API_KEY", &self.api_key)
            .header("POLY_PASSPHRASE", &self.passphrase)
            .header("POLY_TIMESTAMP", &self.timestamp)
            .header("POLY_SIGNATURE", &self.signature)
    }
}

// --- Crypto helpers (sha2, hmac, base64 crates) ---

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn base64_decode(input: &str) -> anyhow::Result<Vec<u8>> {
    use base64::Engine;
    // Official client uses URL_SAFE base64 for both decode and encode
    base64::engine::general_purpose::URL_SAFE
        .decode(input)
        .map_err(|e| anyhow::anyhow!("base64 decode error: {e}"))
}

fn base64_encode(input: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE.encode(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> ClobAuth {
        // secret = base64url("super-secret")
        ClobAuth::new(
            "0x1111111111111111111111111111111111111111".into(),
            "key-1".into(),
            "c3VwZXItc2VjcmV0",
            "pass-1".into(),
        )
        .unwrap()
    }

    #[test]
    fn test_base64_roundtrip() {
        let original = b"Hello, Polymarket!";
        let encoded = base64_encode(original);
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn bad_secret_is_rejected_at_construction() {
        let result = ClobAuth::new("0x".into(), "k".into(), "!!!not-base64!!!", "p".into());
        assert!(result.is_err());
    }

    #[test]
    fn signature_is_deterministic_for_fixed_timestamp() {
        let a = auth().l2_headers_at("1770933900", "POST", "/order", "{}");
        let b = auth().l2_headers_at("1770933900", "POST", "/order", "{}");
        assert_eq!(a.signature, b.signature);
        assert_eq!(a.timestamp, "1770933900");
        assert_eq!(a.api_key, "key-1");
    }

    #[test]
    fn query_string_is_excluded_from_signed_path() {
        let with_query = auth().l2_headers_at(
            "1770933900",
            "GET",
            "/balance-allowance?asset_type=COLLATERAL&signature_type=0",
            "",
        );
        let without = auth().l2_headers_at("1770933900", "GET", "/balance-allowance", "");
        assert_eq!(with_query.signature, without.signature);
    }

    #[test]
    fn body_and_method_change_the_signature() {
        let base = auth().l2_headers_at("1770933900", "POST", "/order", "{}");
        let other_body = auth().l2_headers_at("1770933900", "POST", "/order", "{\"a\":1}");
        let other_method = auth().l2_headers_at("1770933900", "DELETE", "/order", "{}");
        assert_ne!(base.signature, other_body.signature);
        assert_ne!(base.signature, other_method.signature);
    }
}
