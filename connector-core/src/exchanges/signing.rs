//! HMAC-SHA256 request signing

use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::form_urlencoded;

use super::errors::{ExchangeError, ExchangeResult};

type HmacSha256 = Hmac<Sha256>;

/// Request parameters in insertion order.
///
/// Order matters: the encoded string is exactly what gets signed and sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: &str, value: impl ToString) {
        self.pairs.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `application/x-www-form-urlencoded` query string
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }
}

/// Signs request payloads with the account secret key
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(secret_key: &str) -> ExchangeResult<Self> {
        let mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|e| ExchangeError::Config(format!("unusable secret key: {}", e)))?;
        Ok(Self { mac })
    }

    /// Hex encoded HMAC-SHA256 of `payload`
    pub fn signature(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Append `timestamp`, sign the finalized parameters and return the query string to send
    pub fn sign(&self, mut params: RequestParams, timestamp_ms: i64) -> String {
        params.push("timestamp", timestamp_ms);
        let payload = params.encode();
        let signature = self.signature(&payload);
        format!("{}&signature={}", payload, signature)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(..)")
    }
}
