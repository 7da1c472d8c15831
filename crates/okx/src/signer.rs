use std::sync::Arc;

use alphaark_core::ExchangeError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::Sha256;

use crate::clock::ClockSync;
use crate::config::OkxConfig;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_KEY: &str = "OK-ACCESS-KEY";
pub const HEADER_SIGN: &str = "OK-ACCESS-SIGN";
pub const HEADER_TIMESTAMP: &str = "OK-ACCESS-TIMESTAMP";
pub const HEADER_PASSPHRASE: &str = "OK-ACCESS-PASSPHRASE";

/// Produces OKX authentication headers for private endpoints.
pub struct RequestSigner {
    config: Arc<OkxConfig>,
    clock: Arc<ClockSync>,
}

impl RequestSigner {
    pub fn new(config: Arc<OkxConfig>, clock: Arc<ClockSync>) -> Self {
        Self { config, clock }
    }

    pub fn ensure_credentials(&self) -> Result<(), ExchangeError> {
        let missing = self.config.missing_credentials();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExchangeError::Config(format!(
                "OKX credentials incomplete, missing: {}",
                missing.join(", ")
            )))
        }
    }

    /// base64(HMAC-SHA256(secret, timestamp + METHOD + requestPath + body)).
    ///
    /// `request_path` includes the query string exactly as it will be sent.
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<String, ExchangeError> {
        sign_message(
            self.config.secret_key.expose_secret(),
            timestamp,
            method,
            request_path,
            body,
        )
    }

    /// The four authentication headers plus `Content-Type`, stamped with the
    /// current server-adjusted time.
    pub async fn build_headers(
        &self,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<Vec<(String, String)>, ExchangeError> {
        self.ensure_credentials()?;
        let timestamp = self.clock.timestamp().await;
        let signature = self.sign(&timestamp, method, request_path, body)?;

        Ok(vec![
            (HEADER_KEY.to_string(), self.config.api_key.clone()),
            (HEADER_SIGN.to_string(), signature),
            (HEADER_TIMESTAMP.to_string(), timestamp),
            (
                HEADER_PASSPHRASE.to_string(),
                self.config.passphrase.expose_secret().to_string(),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ])
    }
}

pub fn sign_message(
    secret: &str,
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Config(format!("Unusable secret key: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.to_uppercase().as_bytes());
    mac.update(request_path.as_bytes());
    mac.update(body.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::testing::*;

    const TS: &str = "2024-01-15T08:00:00.000Z";

    fn signer(config: OkxConfig) -> RequestSigner {
        let clock = Arc::new(ClockSync::new(
            FakeTransport::new(),
            ManualClock::new(),
            TEST_BASE_URL,
            &SyncSettings::default(),
        ));
        RequestSigner::new(Arc::new(config), clock)
    }

    #[test]
    fn test_signature_known_vector() {
        let sig = sign_message("test-secret", TS, "GET", "/api/v5/account/balance", "").unwrap();
        assert_eq!(sig, "1zcVb278hIf5yDWpCljxvMxRHW4MVZ8D7FZPlbwfz/k=");
    }

    #[test]
    fn test_signature_covers_query_string() {
        let s = signer(OkxConfig::new("key", "test-secret", "pass"));
        let sig = s
            .sign(TS, "get", "/api/v5/account/positions?instType=SWAP&posId=42", "")
            .unwrap();
        assert_eq!(sig, "/m2qe+dQYgSFxgSKglKrnQ29TlRugwRcmYI1C6yLV6k=");
        let bare = s.sign(TS, "GET", "/api/v5/account/positions", "").unwrap();
        assert_ne!(sig, bare);
    }

    #[tokio::test]
    async fn test_build_headers_shape() {
        // No server time scripted: the sync fails and the zero offset is used.
        let s = signer(OkxConfig::new("key-123", "test-secret", "pass-456"));
        let headers = s.build_headers("GET", "/api/v5/account/balance", "").await.unwrap();
        let names: Vec<&str> = headers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec![HEADER_KEY, HEADER_SIGN, HEADER_TIMESTAMP, HEADER_PASSPHRASE, "Content-Type"]
        );
        assert_eq!(headers[0].1, "key-123");
        assert_eq!(headers[1].1, "1zcVb278hIf5yDWpCljxvMxRHW4MVZ8D7FZPlbwfz/k=");
        assert_eq!(headers[2].1, TS);
        assert_eq!(headers[3].1, "pass-456");
    }

    #[tokio::test]
    async fn test_missing_credentials_rejected() {
        let s = signer(OkxConfig::new("key", "", "pass"));
        let err = s.build_headers("GET", "/api/v5/account/balance", "").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Config(msg) if msg.contains("secret_key")));
    }
}
