use serde_json::json;

use crate::models::CopyTrade;

/// Telegram notification service. Failures are logged but never block the main flow.
#[derive(Debug, Clone)]
pub struct Notifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl Notifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }

    /// Send a Telegram message. Failures are logged as warnings.
    pub async fn send(&self, message: &str) {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.bot_token
        );

        let body = json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "Markdown",
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) => {
                if !resp.status().is_success() {
                    tracing::warn!(
                        status = %resp.status(),
                        "Telegram sendMessage returned non-2xx"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send Telegram notification");
            }
        }
    }
}

fn short(addr: &str) -> String {
    if addr.len() > 10 {
        format!("{}...{}", &addr[..6], &addr[addr.len() - 4..])
    } else {
        addr.to_string()
    }
}

/// Operator alert for a copy trade that gave up.
pub fn format_expired(trade: &CopyTrade) -> String {
    format!(
        "*Copy Trade Expired*\nFollower: `{}`\nLeader: `{}`\nSide: {}\nNotional: ${} USDC\nAttempts: {}\nToken: `{}`\nError: {}",
        short(&trade.follower_wallet),
        short(&trade.leader_wallet),
        trade.copy_side,
        trade.copy_notional.round_dp(2),
        trade.retry_count,
        &trade.token_id[..16.min(trade.token_id.len())],
        trade.error_message.as_deref().unwrap_or("unknown"),
    )
}
