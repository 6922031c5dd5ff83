use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::payload::{NotifyEmailPayload, NotifyLetterPayload};
use super::{ActionError, DeliveryBackend, DeliveryReceipt};

const UUID_LEN: usize = 36;

/// Service id and signing secret packed into a notification API key
/// (`<key name>-<service id>-<secret>`).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKey {
    pub service_id: String,
    secret: String,
}

impl ApiKey {
    pub fn parse(key: &str) -> Result<Self, String> {
        let len = key.len();
        if len < UUID_LEN * 2 + 1 || !key.is_ascii() {
            return Err("Notification API key is malformed".into());
        }
        Ok(Self {
            service_id: key[len - (UUID_LEN * 2 + 1)..len - (UUID_LEN + 1)].to_string(),
            secret: key[len - UUID_LEN..].to_string(),
        })
    }

    pub fn bearer_token(&self) -> Result<String, ActionError> {
        let claims = Claims {
            iss: self.service_id.clone(),
            iat: Utc::now().timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ActionError::Permanent(format!("JWT encode failed: {e}")))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    iat: i64,
}

/// Client for the notification service. One instance per API key, so email
/// and letters can be billed to different services.
pub struct NotifyClient {
    client: reqwest::Client,
    base_url: String,
    key: ApiKey,
}

impl NotifyClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build notify client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: ApiKey::parse(api_key)?,
        })
    }

    async fn post_notification(&self, kind: &str, body: &Value) -> Result<DeliveryReceipt, ActionError> {
        let url = format!("{}/v2/notifications/{kind}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.key.bearer_token()?)
            .json(body)
            .send()
            .await
            .map_err(ActionError::from_request)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ActionError::from_status(status, &body));
        }

        let created: Value = resp.json().await.unwrap_or_default();
        Ok(DeliveryReceipt {
            reference: created["id"].as_str().map(String::from),
        })
    }
}

#[async_trait]
impl DeliveryBackend<NotifyEmailPayload> for NotifyClient {
    async fn send(&self, payload: &NotifyEmailPayload) -> Result<DeliveryReceipt, ActionError> {
        let mut body = json!({
            "template_id": payload.template_id,
            "email_address": payload.email_address,
            "personalisation": payload.personalisation,
        });
        if let Some(reply_to) = &payload.email_reply_to_id {
            body["email_reply_to_id"] = json!(reply_to);
        }
        self.post_notification("email", &body).await
    }
}

#[async_trait]
impl DeliveryBackend<NotifyLetterPayload> for NotifyClient {
    async fn send(&self, payload: &NotifyLetterPayload) -> Result<DeliveryReceipt, ActionError> {
        let body = json!({
            "template_id": payload.template_id,
            "personalisation": payload.personalisation,
        });
        self.post_notification("letter", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SERVICE_ID: &str = "26785a09-ab16-4eb0-8407-a37497a57506";
    const SECRET: &str = "3d844edf-8d35-48ac-975b-e847b4f122b0";

    fn api_key() -> String {
        format!("test_key-{SERVICE_ID}-{SECRET}")
    }

    fn email_payload() -> NotifyEmailPayload {
        NotifyEmailPayload {
            template_id: "213123".into(),
            email_address: "jim@example.com".into(),
            personalisation: json!({"name": "Jim"}).as_object().unwrap().clone(),
            email_reply_to_id: Some("123".into()),
        }
    }

    #[test]
    fn splits_api_key() {
        let key = ApiKey::parse(&api_key()).unwrap();
        assert_eq!(key.service_id, SERVICE_ID);
        assert_eq!(key.secret, SECRET);
        assert!(ApiKey::parse("short").is_err());
    }

    #[test]
    fn token_is_signed_by_service() {
        let token = ApiKey::parse(&api_key()).unwrap().bearer_token().unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let claims = decode::<Claims>(&token, &DecodingKey::from_secret(SECRET.as_bytes()), &validation)
            .unwrap()
            .claims;

        assert_eq!(claims.iss, SERVICE_ID);
        assert!((Utc::now().timestamp() - claims.iat).abs() < 5);
    }

    #[tokio::test]
    async fn sends_email_notification() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/notifications/email"))
            .and(header_exists("authorization"))
            .and(body_json(json!({
                "template_id": "213123",
                "email_address": "jim@example.com",
                "personalisation": {"name": "Jim"},
                "email_reply_to_id": "123",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "notification-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = NotifyClient::new(&server.uri(), &api_key(), Duration::from_secs(5)).unwrap();
        let receipt = client.send(&email_payload()).await.unwrap();

        assert_eq!(receipt.reference.as_deref(), Some("notification-1"));
    }

    #[tokio::test]
    async fn sends_letter_notification() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/notifications/letter"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "letter-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = NotifyClient::new(&server.uri(), &api_key(), Duration::from_secs(5)).unwrap();
        let payload = NotifyLetterPayload {
            template_id: "t1".into(),
            personalisation: json!({"address_line_1": "1 Road"}).as_object().unwrap().clone(),
        };

        assert!(client.send(&payload).await.is_ok());
    }

    #[tokio::test]
    async fn rejected_notification_is_permanent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"errors": ["bad template"]})))
            .mount(&server)
            .await;

        let client = NotifyClient::new(&server.uri(), &api_key(), Duration::from_secs(5)).unwrap();
        let err = client.send(&email_payload()).await.unwrap_err();

        assert!(matches!(err, ActionError::Permanent(_)));
    }
}
