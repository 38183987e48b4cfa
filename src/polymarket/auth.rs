use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid base64 secret: {0}")]
    InvalidSecret(#[from] base64::DecodeError),

    #[error("HMAC key rejected: {0}")]
    InvalidKey(String),
}

/// CLOB L2 API credentials (key, secret, passphrase) for authenticated REST reads.
#[derive(Clone)]
pub struct PolymarketAuth {
    api_key: String,
    api_secret: String,
    passphrase: String,
}

impl std::fmt::Debug for PolymarketAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymarketAuth")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl PolymarketAuth {
    pub fn new(api_key: String, api_secret: String, passphrase: String) -> Self {
        Self {
            api_key,
            api_secret,
            passphrase,
        }
    }

    /// URL-safe base64 HMAC-SHA256 over `{timestamp}{method}{path}{body}`.
    ///
    /// `path` excludes the query string.
    pub fn sign(
        &self,
        timestamp: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, AuthError> {
        // Secrets are issued URL-safe; accept standard encoding too.
        let secret = URL_SAFE
            .decode(&self.api_secret)
            .or_else(|_| STANDARD.decode(&self.api_secret))?;

        let mut mac =
            HmacSha256::new_from_slice(&secret).map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());

        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    /// The `POLY_*` header set for one request made on behalf of `address`.
    pub fn l2_headers(
        &self,
        address: &str,
        timestamp: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let signature = self.sign(timestamp, method, path, body)?;
        Ok(vec![
            ("POLY_ADDRESS", address.to_string()),
            ("POLY_API_KEY", self.api_key.clone()),
            ("POLY_PASSPHRASE", self.passphrase.clone()),
            ("POLY_SIGNATURE", signature),
            ("POLY_TIMESTAMP", timestamp.to_string()),
        ])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> PolymarketAuth {
        PolymarketAuth::new(
            "key".into(),
            URL_SAFE.encode(b"polycopy-test-secret-0123456789ab"),
            "pass".into(),
        )
    }

    #[test]
    fn test_sign_known_vector() {
        let sig = auth().sign(1_700_000_000, "GET", "/data/trades", "").unwrap();
        assert_eq!(sig, "nKCthIduTFKYlOrHXbwMpsSUBJFcMGDgxigkKui7z_k=");
    }

    #[test]
    fn test_standard_base64_secret_accepted() {
        let standard = PolymarketAuth::new(
            "key".into(),
            STANDARD.encode(b"polycopy-test-secret-0123456789ab"),
            "pass".into(),
        );
        assert_eq!(
            standard.sign(1_700_000_000, "GET", "/data/trades", "").unwrap(),
            auth().sign(1_700_000_000, "GET", "/data/trades", "").unwrap()
        );
    }

    #[test]
    fn test_l2_headers_and_redacted_debug() {
        let headers = auth()
            .l2_headers("0xabc", 1_700_000_000, "GET", "/data/trades", "")
            .unwrap();
        assert_eq!(headers[0], ("POLY_ADDRESS", "0xabc".to_string()));
        assert_eq!(headers[4], ("POLY_TIMESTAMP", "1700000000".to_string()));
        assert!(!format!("{:?}", auth()).contains("pass"));
    }
}
