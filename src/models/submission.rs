use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub data: Value,
    pub meta: Value,
    pub form_url: Option<String>,
    pub is_sent: bool,
    pub client_id: Option<Uuid>,
    pub sender_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Dispatch key, as written by the caller.
    pub fn action_name(&self) -> Option<&str> {
        self.meta.get("action_name").and_then(Value::as_str)
    }

    pub fn recipient_email(&self) -> Option<&str> {
        self.meta
            .get("email_address")
            .and_then(Value::as_str)
            .or_else(|| {
                self.meta
                    .get("recipients")
                    .and_then(Value::as_array)
                    .and_then(|r| r.first())
                    .and_then(Value::as_str)
            })
    }

    pub fn ip_address(&self) -> Option<IpAddr> {
        ip_address(&self.meta)
    }

    pub fn funnel(&self) -> Vec<String> {
        self.meta
            .get("funnel_steps")
            .and_then(Value::as_array)
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// `meta.sender.ip_address`, when present and parseable.
pub fn ip_address(meta: &Value) -> Option<IpAddr> {
    meta.get("sender")
        .and_then(|s| s.get("ip_address"))
        .and_then(Value::as_str)
        .and_then(|ip| ip.trim().parse().ok())
}
