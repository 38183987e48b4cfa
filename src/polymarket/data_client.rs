use reqwest::Client;
use thiserror::Error;

use super::types::ApiActivity;

const DATA_API_BASE: &str = "https://data-api.polymarket.com";

#[derive(Debug, Error)]
pub enum DataClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct DataClient {
    http: Client,
    base_url: String,
}

impl DataClient {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            base_url: DATA_API_BASE.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Most recent TRADE activity for a wallet, newest first.
    pub async fn get_user_activity(
        &self,
        user: &str,
        limit: u32,
    ) -> Result<Vec<ApiActivity>, DataClientError> {
        let url = format!("{}/activity", self.base_url);
        let limit = limit.to_string();
        let resp = self
            .http
            .get(&url)
            .query(&[("user", user), ("type", "TRADE"), ("limit", limit.as_str())])
            .send()
            .await?
            .error_for_status()?;

        let activity: Vec<ApiActivity> = resp.json().await?;
        Ok(activity)
    }
}
