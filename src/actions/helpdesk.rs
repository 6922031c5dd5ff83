use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::payload::TicketPayload;
use super::{ActionError, DeliveryBackend, DeliveryReceipt};
use crate::config::{HelpdeskConfig, HelpdeskCredentials};

/// Creates helpdesk tickets through the Zendesk-style REST API, picking the
/// credential set by the payload's subdomain.
pub struct HelpdeskClient {
    client: reqwest::Client,
    config: HelpdeskConfig,
}

impl HelpdeskClient {
    pub fn new(config: HelpdeskConfig, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build helpdesk client: {e}"))?;
        Ok(Self { client, config })
    }

    fn credentials(&self, subdomain: Option<&str>) -> Result<&HelpdeskCredentials, ActionError> {
        let subdomain = subdomain
            .or(self.config.default_subdomain.as_deref())
            .ok_or_else(|| ActionError::Unsupported("No helpdesk subdomain given and no default configured".into()))?;

        self.config
            .credentials
            .get(subdomain)
            .ok_or_else(|| ActionError::Unsupported(format!("Unknown helpdesk subdomain: {subdomain}")))
    }

    async fn post(
        &self,
        creds: &HelpdeskCredentials,
        path: &str,
        body: &Value,
    ) -> Result<Value, ActionError> {
        let url = format!("{}{path}", creds.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .basic_auth(format!("{}/token", creds.email), Some(&creds.token))
            .json(body)
            .send()
            .await
            .map_err(ActionError::from_request)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ActionError::from_status(status, &body));
        }

        resp.json()
            .await
            .map_err(|e| ActionError::Permanent(format!("Unreadable helpdesk response: {e}")))
    }

    async fn create_or_update_user(
        &self,
        creds: &HelpdeskCredentials,
        full_name: &str,
        email_address: &str,
    ) -> Result<i64, ActionError> {
        let body = json!({"user": {"name": full_name, "email": email_address}});
        let resp = self
            .post(creds, "/api/v2/users/create_or_update.json", &body)
            .await?;

        resp["user"]["id"]
            .as_i64()
            .ok_or_else(|| ActionError::Permanent("Helpdesk user response has no id".into()))
    }
}

#[async_trait]
impl DeliveryBackend<TicketPayload> for HelpdeskClient {
    async fn send(&self, payload: &TicketPayload) -> Result<DeliveryReceipt, ActionError> {
        let creds = self.credentials(payload.subdomain.as_deref())?;
        let user_id = self
            .create_or_update_user(creds, &payload.full_name, &payload.email_address)
            .await?;

        let ticket = build_ticket(payload, user_id, creds.custom_field_id);
        let resp = self
            .post(creds, "/api/v2/tickets.json", &json!({ "ticket": ticket }))
            .await?;

        let ticket_id = resp["ticket"]["id"]
            .as_i64()
            .ok_or_else(|| ActionError::Permanent("Helpdesk ticket response has no id".into()))?;

        tracing::debug!(ticket_id, "Helpdesk ticket created");
        Ok(DeliveryReceipt::new(ticket_id.to_string()))
    }
}

pub fn build_ticket(payload: &TicketPayload, user_id: i64, service_field_id: i64) -> Value {
    let fields = &payload.payload;
    let sort = fields
        .get("_sort_fields_alphabetically")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let mut custom_fields = vec![json!({"id": service_field_id, "value": payload.service_name})];
    if let Some(extra) = fields.get("_custom_fields").and_then(Value::as_array) {
        custom_fields.extend(extra.iter().cloned());
    }

    let mut ticket = json!({
        "subject": payload.subject,
        "comment": {"body": render_description(fields, sort)},
        "requester_id": user_id,
        "submitter_id": user_id,
        "custom_fields": custom_fields,
    });
    if let Some(tags) = fields.get("_tags").filter(|t| t.is_array()) {
        ticket["tags"] = tags.clone();
    }
    ticket
}

/// One `Key: value` line per public field. Keys starting with `_` are
/// routing directives and never shown.
pub fn render_description(fields: &Map<String, Value>, sort: bool) -> String {
    let mut entries: Vec<(&String, &Value)> = fields
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .collect();
    if sort {
        entries.sort_by(|a, b| a.0.cmp(b.0));
    }

    entries
        .into_iter()
        .map(|(key, value)| format!("{}: {}", title_case(key).replace('_', " "), display_value(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First letter of every word upper-cased, the rest lower-cased. Anything
/// that is not a letter starts a new word.
fn title_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut in_word = false;
    for c in key.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn ticket_payload(subdomain: Option<&str>) -> TicketPayload {
        TicketPayload {
            subject: "Help".into(),
            full_name: "Jim Example".into(),
            email_address: "jim@example.com".into(),
            payload: fields(json!({"field": "value", "_tags": ["urgent"]})),
            service_name: "great".into(),
            subdomain: subdomain.map(String::from),
        }
    }

    fn client_for(server: &MockServer) -> HelpdeskClient {
        let mut credentials = HashMap::new();
        credentials.insert(
            "alpha".to_string(),
            HelpdeskCredentials {
                email: "agent@example.com".into(),
                token: "secret".into(),
                custom_field_id: 31281329,
                base_url: server.uri(),
            },
        );
        let config = HelpdeskConfig {
            default_subdomain: Some("alpha".into()),
            credentials,
        };
        HelpdeskClient::new(config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn single_field_description() {
        assert_eq!(render_description(&fields(json!({"field": "value"})), true), "Field: value");
    }

    #[test]
    fn description_sorted_by_default() {
        let payload = fields(json!({"b": "2", "a": "1"}));
        assert_eq!(render_description(&payload, true), "A: 1\nB: 2");
    }

    #[test]
    fn description_keeps_submitted_order_when_unsorted() {
        let payload = fields(json!({"b": "2", "a": "1"}));
        assert_eq!(render_description(&payload, false), "B: 2\nA: 1");
    }

    #[test]
    fn description_skips_routing_directives() {
        let payload = fields(json!({
            "ingress_url": "https://example.com",
            "_tags": ["a"],
            "_sort_fields_alphabetically": true,
            "count": 3,
        }));
        assert_eq!(
            render_description(&payload, true),
            "Count: 3\nIngress Url: https://example.com"
        );
    }

    #[test]
    fn title_case_matches_word_boundaries() {
        assert_eq!(title_case("full_NAME"), "Full_Name");
        assert_eq!(title_case("address2line"), "Address2Line");
    }

    #[test]
    fn ticket_carries_tags_and_custom_fields() {
        let mut payload = ticket_payload(None);
        payload.payload.insert("_custom_fields".into(), json!([{"id": 1, "value": "x"}]));
        payload.payload.insert("_sort_fields_alphabetically".into(), json!(false));

        let ticket = build_ticket(&payload, 7, 99);

        assert_eq!(ticket["requester_id"], 7);
        assert_eq!(ticket["submitter_id"], 7);
        assert_eq!(ticket["tags"], json!(["urgent"]));
        assert_eq!(
            ticket["custom_fields"],
            json!([{"id": 99, "value": "great"}, {"id": 1, "value": "x"}])
        );
        assert_eq!(ticket["comment"]["body"], "Field: value");
    }

    #[tokio::test]
    async fn creates_user_then_ticket() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v2/users/create_or_update.json"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({"user": {"email": "jim@example.com"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": {"id": 42}})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v2/tickets.json"))
            .and(body_partial_json(json!({"ticket": {"requester_id": 42, "subject": "Help"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ticket": {"id": 1001}})))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = client_for(&server).send(&ticket_payload(None)).await.unwrap();
        assert_eq!(receipt.reference.as_deref(), Some("1001"));
    }

    #[tokio::test]
    async fn unknown_subdomain_is_not_retried() {
        let server = MockServer::start().await;

        let err = client_for(&server)
            .send(&ticket_payload(Some("nope")))
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::Unsupported(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_outage_is_retryable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).send(&ticket_payload(None)).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
