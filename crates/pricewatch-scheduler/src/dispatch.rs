//! Notification dispatch: renders owner notifications and sends them.
//! Telegram Bot API (`sendMessage`, HTML) for production, log-only otherwise.

use async_trait::async_trait;
use pricewatch_core::config::TelegramConfig;
use pricewatch_core::error::{PriceWatchError, Result};
use pricewatch_core::traits::Notifier;
use pricewatch_core::types::{Notification, NotificationKind};
use serde::Deserialize;

/// Message body for a notification, Telegram HTML flavour.
pub fn render(notification: &Notification) -> String {
    let title = escape_html(&notification.title);
    let target = notification.target;
    match &notification.kind {
        NotificationKind::DealReached { price } => format!(
            "🎉 Deal! “{title}” reached the target.\nNow: <b>{price}</b> ≤ target <b>{target}</b>."
        ),
        NotificationKind::DealOver { price } => format!(
            "ℹ️ “{title}” is no longer below target.\nNow: <b>{price}</b> > target <b>{target}</b>."
        ),
        NotificationKind::FetchFailed { reason } => format!(
            "⚠️ Could not read the price of “{title}”: {}.\nWe keep trying on every check.",
            escape_html(reason)
        ),
    }
}

/// Escape the three characters Telegram's HTML mode cares about.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Sends notifications to the owner's Telegram chat.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.send_timeout_secs))
            .build()
            .map_err(|e| PriceWatchError::Http(format!("Telegram client: {e}")))?;
        Ok(Self {
            client,
            bot_token: config.bot_token.clone(),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    fn payload(chat_id: i64, notification: &Notification) -> serde_json::Value {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": render(notification),
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if matches!(notification.kind, NotificationKind::DealReached { .. }) {
            body["reply_markup"] = serde_json::json!({
                "inline_keyboard": [[{ "text": "🛒 Open product", "url": notification.url }]]
            });
        }
        body
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, user_id: i64, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&Self::payload(user_id, notification))
            .send()
            .await
            .map_err(|e| PriceWatchError::Notification(format!("sendMessage failed: {e}")))?;

        let result: TelegramApiResponse = response
            .json()
            .await
            .map_err(|e| PriceWatchError::Notification(format!("Invalid send response: {e}")))?;

        if !result.ok {
            return Err(PriceWatchError::Notification(format!(
                "Send failed: {}",
                result.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

/// Writes notifications to the log. Used when no bot token is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, user_id: i64, notification: &Notification) -> Result<()> {
        tracing::info!(
            "📢 [{}] to {user_id}: {}",
            notification.kind.name(),
            render(notification).replace('\n', " ")
        );
        Ok(())
    }
}
