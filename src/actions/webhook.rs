use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::payload::WebhookPayload;
use super::{ActionError, DeliveryBackend, DeliveryReceipt};

/// Posts the payload form-encoded to a marketing-automation endpoint.
pub struct WebhookPoster {
    client: reqwest::Client,
}

impl WebhookPoster {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| format!("Failed to build webhook client: {e}"))?;
        Ok(Self { client })
    }
}

fn form_fields(payload: &WebhookPayload) -> Vec<(String, String)> {
    payload
        .payload
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

#[async_trait]
impl DeliveryBackend<WebhookPayload> for WebhookPoster {
    async fn send(&self, payload: &WebhookPayload) -> Result<DeliveryReceipt, ActionError> {
        let resp = self
            .client
            .post(&payload.url)
            .form(&form_fields(payload))
            .send()
            .await
            .map_err(ActionError::from_request)?;

        // Redirects are not followed; a 3xx still means the form was taken.
        let status = resp.status();
        if status.as_u16() >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(ActionError::from_status(status, &body));
        }

        Ok(DeliveryReceipt::new(status.as_u16().to_string()))
    }
}
