use crate::core::config::Config;
use crate::core::errors::OpenApiError;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Result type for signing operations: headers to attach to the request
pub type SignatureResult = Result<HashMap<String, String>, OpenApiError>;

pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_SIGNATURE: &str = "x-api-signature";

const SIGNED_HEADERS: &str = "authorization;x-api-key;x-timestamp";

/// Signer trait for request authentication
///
/// Implementations must be pure: the same inputs always produce the same
/// headers, and no shared state is mutated, so one signer can serve any
/// number of concurrent requests.
pub trait Signer: Send + Sync {
    /// Sign a request and return the headers to include in it
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.)
    /// * `path` - API path, without query string
    /// * `query_string` - Percent-encoded query string exactly as transmitted (without leading '?')
    /// * `body` - Raw request body bytes exactly as transmitted
    /// * `timestamp` - Request timestamp in milliseconds
    fn sign_request(
        &self,
        method: &str,
        path: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult;
}

/// HMAC-SHA256 signer for the OpenAPI gateway
pub struct HmacSigner {
    app_key: String,
    app_secret: Secret<String>,
    access_token: Secret<String>,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("app_key", &self.app_key)
            .finish_non_exhaustive()
    }
}

impl HmacSigner {
    pub fn new(app_key: String, app_secret: String, access_token: String) -> Self {
        Self {
            app_key,
            app_secret: Secret::new(app_secret),
            access_token: Secret::new(access_token),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.app_key().to_string(),
            config.app_secret().to_string(),
            config.access_token().to_string(),
        )
    }

    fn format_timestamp(timestamp: u64) -> String {
        format!("{}.{:03}", timestamp / 1000, timestamp % 1000)
    }

    fn canonical_request(
        &self,
        method: &str,
        path: &str,
        query_string: &str,
        body: &[u8],
        timestamp: &str,
    ) -> String {
        let body_digest = if body.is_empty() {
            String::new()
        } else {
            hex::encode(Sha256::digest(body))
        };

        format!(
            "{}|{}|{}|authorization:{}\nx-api-key:{}\nx-timestamp:{}\n|{}|{}",
            method.to_uppercase(),
            path,
            query_string,
            self.access_token.expose_secret(),
            self.app_key,
            timestamp,
            SIGNED_HEADERS,
            body_digest
        )
    }

    fn sign(&self, payload: &str) -> Result<String, OpenApiError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.app_secret.expose_secret().as_bytes())
            .map_err(|e| OpenApiError::Protocol(format!("Invalid app secret: {}", e)))?;

        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl Signer for HmacSigner {
    fn sign_request(
        &self,
        method: &str,
        path: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult {
        let timestamp = Self::format_timestamp(timestamp);
        let canonical = self.canonical_request(method, path, query_string, body, &timestamp);
        let string_to_sign = format!(
            "HMAC-SHA256|{}",
            hex::encode(Sha256::digest(canonical.as_bytes()))
        );
        let signature = self.sign(&string_to_sign)?;

        let mut headers = HashMap::new();
        headers.insert(HEADER_API_KEY.to_string(), self.app_key.clone());
        headers.insert(
            HEADER_AUTHORIZATION.to_string(),
            self.access_token.expose_secret().clone(),
        );
        headers.insert(HEADER_TIMESTAMP.to_string(), timestamp);
        headers.insert(
            HEADER_SIGNATURE.to_string(),
            format!(
                "HMAC-SHA256 SignedHeaders={}, Signature={}",
                SIGNED_HEADERS, signature
            ),
        );

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> HmacSigner {
        HmacSigner::new(
            "app-key".to_string(),
            "app-secret".to_string(),
            "access-token".to_string(),
        )
    }

    #[test]
    fn test_signature_is_deterministic() {
        let signer = signer();
        let a = signer
            .sign_request("POST", "/v1/trade/order", "", br#"{"a":1}"#, 1_650_000_000_123)
            .unwrap();
        let b = signer
            .sign_request("POST", "/v1/trade/order", "", br#"{"a":1}"#, 1_650_000_000_123)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a[HEADER_TIMESTAMP], "1650000000.123");
        assert_eq!(a[HEADER_API_KEY], "app-key");
        assert_eq!(a[HEADER_AUTHORIZATION], "access-token");
        assert!(a[HEADER_SIGNATURE]
            .starts_with("HMAC-SHA256 SignedHeaders=authorization;x-api-key;x-timestamp, Signature="));
    }

    #[test]
    fn test_signature_covers_body_query_and_time() {
        let signer = signer();
        let base = signer
            .sign_request("GET", "/v1/trade/order", "order_id=1", b"", 1_000)
            .unwrap();
        let other_query = signer
            .sign_request("GET", "/v1/trade/order", "order_id=2", b"", 1_000)
            .unwrap();
        let other_body = signer
            .sign_request("GET", "/v1/trade/order", "order_id=1", b"x", 1_000)
            .unwrap();
        let other_time = signer
            .sign_request("GET", "/v1/trade/order", "order_id=1", b"", 1_001)
            .unwrap();

        assert_ne!(base[HEADER_SIGNATURE], other_query[HEADER_SIGNATURE]);
        assert_ne!(base[HEADER_SIGNATURE], other_body[HEADER_SIGNATURE]);
        assert_ne!(base[HEADER_SIGNATURE], other_time[HEADER_SIGNATURE]);
    }

    #[test]
    fn test_method_case_does_not_matter() {
        let signer = signer();
        let upper = signer.sign_request("GET", "/p", "", b"", 5).unwrap();
        let lower = signer.sign_request("get", "/p", "", b"", 5).unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let debug = format!("{:?}", signer());
        assert!(!debug.contains("app-secret"));
        assert!(!debug.contains("access-token"));
    }
}
