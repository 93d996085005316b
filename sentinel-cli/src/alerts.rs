use async_trait::async_trait;
use reqwest::Client;
use sentinel_broker::{BrokerResult, Notifier};
use serde_json::json;
use tracing::{error, warn};

/// Pushes operator-facing messages to an optional webhook. Without a
/// configured webhook every alert still lands in the log.
#[derive(Clone)]
pub struct AlertDispatcher {
    client: Client,
    webhook: Option<String>,
}

impl AlertDispatcher {
    pub fn new(webhook: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| anyhow::anyhow!("failed to create alert http client: {err}"))?;
        Ok(Self { client, webhook })
    }

    async fn dispatch(&self, message: &str) {
        warn!(%message, "alert raised");
        let Some(url) = self.webhook.as_ref() else {
            return;
        };
        let payload = json!({ "message": message });
        if let Err(err) = self.client.post(url).json(&payload).send().await {
            error!(error = %err, "failed to send alert webhook");
        }
    }
}

#[async_trait]
impl Notifier for AlertDispatcher {
    /// Fire-and-forget: webhook failures are logged inside `dispatch` and
    /// never surface to the trading path.
    async fn notify(&self, message: &str) -> BrokerResult<()> {
        self.dispatch(message).await;
        Ok(())
    }
}
