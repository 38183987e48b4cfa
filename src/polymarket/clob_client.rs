use reqwest::{Client, RequestBuilder};
use thiserror::Error;

use super::auth::PolymarketAuth;
use super::types::{ApiClobTrade, ApiOrderBook, ApiPage};

const CLOB_API_BASE: &str = "https://clob.polymarket.com";

#[derive(Debug, Error)]
pub enum ClobClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication error: {0}")]
    Auth(#[from] super::auth::AuthError),

    #[error("L2 API credentials not configured")]
    MissingCredentials,
}

/// REST client for the CLOB. Order books are public; trade history needs
/// L2 credentials.
#[derive(Debug, Clone)]
pub struct ClobClient {
    http: Client,
    auth: Option<PolymarketAuth>,
    base_url: String,
}

impl ClobClient {
    pub fn new(http: Client, auth: Option<PolymarketAuth>) -> Self {
        Self {
            http,
            auth,
            base_url: CLOB_API_BASE.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn has_auth(&self) -> bool {
        self.auth.is_some()
    }

    /// Authenticated GET on behalf of `address`. Only `path` is signed; the
    /// query string is attached separately.
    fn authenticated_get(
        &self,
        address: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<RequestBuilder, ClobClientError> {
        let auth = self.auth.as_ref().ok_or(ClobClientError::MissingCredentials)?;
        let timestamp = chrono::Utc::now().timestamp();

        let mut req = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(query);
        for (name, value) in auth.l2_headers(address, timestamp, "GET", path, "")? {
            req = req.header(name, value);
        }
        Ok(req)
    }

    /// Fetch order book for a specific token (public endpoint).
    pub async fn get_order_book(&self, token_id: &str) -> Result<ApiOrderBook, ClobClientError> {
        let url = format!("{}/book", self.base_url);
        let book: ApiOrderBook = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(book)
    }

    /// Fills where `maker_address` took part (first page, newest first).
    pub async fn get_trades(&self, maker_address: &str) -> Result<Vec<ApiClobTrade>, ClobClientError> {
        let page: ApiPage<ApiClobTrade> = self
            .authenticated_get(maker_address, "/data/trades", &[("maker_address", maker_address)])?
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page.data)
    }
}
