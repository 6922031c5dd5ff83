use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Sender {
    pub id: Uuid,
    pub email_address: String,
    pub is_blacklisted: bool,
    pub is_whitelisted: bool,
    pub blacklisted_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sender {
    /// Whitelisting always wins over blacklisting.
    pub fn is_enabled(&self) -> bool {
        self.is_whitelisted || !self.is_blacklisted
    }

    pub fn blacklist_reason(&self) -> Option<BlacklistReason> {
        self.blacklisted_reason.as_deref().and_then(BlacklistReason::parse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlacklistReason {
    Manual,
    RateLimit,
}

impl BlacklistReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlacklistReason::Manual => "manual",
            BlacklistReason::RateLimit => "rate-limit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(BlacklistReason::Manual),
            "rate-limit" => Some(BlacklistReason::RateLimit),
            _ => None,
        }
    }
}

impl fmt::Display for BlacklistReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(is_blacklisted: bool, is_whitelisted: bool) -> Sender {
        Sender {
            id: Uuid::now_v7(),
            email_address: "test@example.com".to_string(),
            is_blacklisted,
            is_whitelisted,
            blacklisted_reason: is_blacklisted.then(|| "manual".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn whitelist_overrides_blacklist() {
        assert!(sender(false, false).is_enabled());
        assert!(!sender(true, false).is_enabled());
        assert!(sender(false, true).is_enabled());
        assert!(sender(true, true).is_enabled());
    }

    #[test]
    fn reason_codes_round_trip_through_text() {
        for reason in [BlacklistReason::Manual, BlacklistReason::RateLimit] {
            assert_eq!(BlacklistReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(sender(true, false).blacklist_reason(), Some(BlacklistReason::Manual));
    }
}
