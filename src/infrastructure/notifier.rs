//! Agent notification delivery
//!
//! The notification service sits in front of the actual channel (WhatsApp,
//! SMS); this client just posts the ticket payload to it.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::NotifierConfig;
use crate::domain::callback::CallbackTicket;
use crate::domain::ports::Notifier;
use crate::domain::shared::{CoreError, Result};

pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoreError::ExternalService(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, ticket: &CallbackTicket) -> Result<()> {
        debug!(ticket_id = ticket.id, extension = %ticket.extension, "notifying agent");
        let body = json!({
            "ticket_id": ticket.id,
            "tenant": ticket.tenant,
            "extension": ticket.extension,
            "caller_number": ticket.number,
            "reason": ticket.reason,
            "scheduled_at": ticket.scheduled_at,
        });
        let response = self
            .client
            .post(format!("{}/notifications", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ExternalService(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::ExternalService(format!(
                "notifier returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
