use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::commands::{self, Command};
use crate::error::DeliveryError;
use crate::settings::SettingsStore;
use crate::store::TradeStore;

/// Timeout for ordinary Bot API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side long-poll duration for `getUpdates`.
const LONG_POLL_SECS: u64 = 30;

/// Delay after a failed `getUpdates` before polling again.
const UPDATE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

/// Minimal Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: impl Into<String>) -> anyhow::Result<Self> {
        let base = Url::parse(api_base)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_base: base.as_str().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, DeliveryError> {
        // reqwest errors embed the request URL, which contains the bot token.
        let resp = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::from(e.without_url()))?;

        let status = resp.status();
        let envelope: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| DeliveryError::from(e.without_url()))?;

        if !envelope.ok {
            return Err(DeliveryError::Rejected {
                status: envelope.error_code.unwrap_or(status.as_u16()),
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }
        envelope.result.ok_or_else(|| DeliveryError::Rejected {
            status: status.as_u16(),
            description: format!("{method} returned no result"),
        })
    }

    /// Identity of the bot; used to validate the token.
    pub async fn get_me(&self) -> Result<BotUser, DeliveryError> {
        self.call("getMe", json!({}), REQUEST_TIMEOUT).await
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let _: serde_json::Value = self.call("sendMessage", body, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`, waiting up to `timeout_secs` server-side.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, DeliveryError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        let http_timeout = Duration::from_secs(timeout_secs) + REQUEST_TIMEOUT;
        self.call("getUpdates", body, http_timeout).await
    }
}

/// Receives commands from the authorized chat and applies them to the stores.
pub struct CommandListener {
    client: TelegramClient,
    chat_id: String,
    settings: Arc<SettingsStore>,
    trades: Arc<TradeStore>,
}

impl CommandListener {
    pub fn new(
        client: TelegramClient,
        chat_id: impl Into<String>,
        settings: Arc<SettingsStore>,
        trades: Arc<TradeStore>,
    ) -> Self {
        Self {
            client,
            chat_id: chat_id.into(),
            settings,
            trades,
        }
    }

    /// Skip updates queued while the bot was offline. Returns the next offset.
    async fn drop_pending(&self) -> i64 {
        match self.client.get_updates(-1, 0).await {
            Ok(updates) => updates.last().map(|u| u.update_id + 1).unwrap_or(0),
            Err(e) => {
                warn!("Failed to skip pending updates: {e}");
                0
            }
        }
    }

    /// Poll for commands until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut offset = self.drop_pending().await;
        info!("Listening for commands from chat {}", self.chat_id);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let updates = tokio::select! {
                _ = shutdown.changed() => break,
                res = self.client.get_updates(offset, LONG_POLL_SECS) => res,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(message) = update.message {
                            self.handle_message(message).await;
                        }
                    }
                }
                Err(e) => {
                    warn!("getUpdates failed: {e}");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(UPDATE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!("Command listener stopped");
    }

    async fn handle_message(&self, message: Message) {
        let Some(text) = message.text.as_deref() else {
            return;
        };
        if !text.starts_with('/') {
            return;
        }

        let chat = message.chat.id.to_string();
        let reply = if chat != self.chat_id {
            warn!("Rejected command from unauthorized chat {chat}");
            "⛔ Unauthorized access.".to_string()
        } else {
            debug!("Command from authorized chat: {text}");
            match Command::parse(text) {
                Ok(cmd) => commands::execute(&cmd, &self.settings, &self.trades),
                Err(e) => format!("⚠️ {e}"),
            }
        };

        if let Err(e) = self.client.send_message(&chat, &reply).await {
            warn!("Failed to reply to chat {chat}: {e}");
        }
    }
}
