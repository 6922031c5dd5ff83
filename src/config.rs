use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::rate_limit::Rate;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub encryption_key: String,
    pub host: IpAddr,
    pub port: u16,
    pub max_body_size: usize,
    pub log_level: String,
    pub worker_count: usize,
    /// `None` disables the per-IP submission rate limit.
    pub rate_limit: Option<Rate>,
    pub task_max_attempts: i32,
    pub delivery_timeout: Duration,
    pub sweep_interval: Duration,
    pub sweep_window: chrono::Duration,
    pub signature_max_skew_secs: i64,
    pub smtp: Option<SmtpConfig>,
    pub helpdesk: HelpdeskConfig,
    pub notify: Option<NotifyConfig>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
    pub tls_mode: String,
}

/// Credential sets for the helpdesk, keyed by routing subdomain.
#[derive(Debug, Clone, Default)]
pub struct HelpdeskConfig {
    pub default_subdomain: Option<String>,
    pub credentials: HashMap<String, HelpdeskCredentials>,
}

#[derive(Debug, Clone)]
pub struct HelpdeskCredentials {
    pub email: String,
    pub token: String,
    pub custom_field_id: i64,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub api_key: String,
    pub letter_api_key: String,
    pub base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;
        let encryption_key = env_required("FORMRELAY_ENCRYPTION_KEY")?;

        let host: IpAddr = env_or("FORMRELAY_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_HOST: {e}"))?;

        let port: u16 = env_or("FORMRELAY_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_PORT: {e}"))?;

        let max_body_size: usize = env_or("FORMRELAY_MAX_BODY_SIZE", "1048576")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_MAX_BODY_SIZE: {e}"))?;

        let log_level = env_or("FORMRELAY_LOG_LEVEL", "info");

        let worker_count: usize = env_or("FORMRELAY_WORKER_COUNT", "4")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_WORKER_COUNT: {e}"))?;

        let rate_limit = match env_or("FORMRELAY_RATELIMIT_ENABLED", "true").as_str() {
            "false" | "0" | "no" => None,
            _ => Some(
                env_or("FORMRELAY_RATELIMIT_RATE", "15/h")
                    .parse::<Rate>()
                    .map_err(|e| format!("Invalid FORMRELAY_RATELIMIT_RATE: {e}"))?,
            ),
        };

        let task_max_attempts: i32 = env_or("FORMRELAY_TASK_MAX_ATTEMPTS", "5")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_TASK_MAX_ATTEMPTS: {e}"))?;

        let delivery_timeout_secs: u64 = env_or("FORMRELAY_DELIVERY_TIMEOUT_SECS", "5")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_DELIVERY_TIMEOUT_SECS: {e}"))?;

        let sweep_interval_secs: u64 = env_or("FORMRELAY_SWEEP_INTERVAL_SECS", "900")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_SWEEP_INTERVAL_SECS: {e}"))?;

        let sweep_window_hours: i64 = env_or("FORMRELAY_SWEEP_WINDOW_HOURS", "72")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_SWEEP_WINDOW_HOURS: {e}"))?;

        let signature_max_skew_secs: i64 = env_or("FORMRELAY_SIGNATURE_MAX_SKEW_SECS", "60")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_SIGNATURE_MAX_SKEW_SECS: {e}"))?;

        let smtp = match (
            std::env::var("FORMRELAY_SMTP_HOST").ok(),
            std::env::var("FORMRELAY_SMTP_PORT").ok(),
            std::env::var("FORMRELAY_SMTP_USER").ok(),
            std::env::var("FORMRELAY_SMTP_PASS").ok(),
            std::env::var("FORMRELAY_SMTP_FROM").ok(),
        ) {
            (Some(host), Some(port), Some(user), Some(pass), Some(from)) => Some(SmtpConfig {
                host,
                port: port
                    .parse()
                    .map_err(|e| format!("Invalid FORMRELAY_SMTP_PORT: {e}"))?,
                user,
                pass,
                from,
                tls_mode: env_or("FORMRELAY_SMTP_TLS", "starttls"),
            }),
            _ => None,
        };

        let helpdesk = helpdesk_from_env()?;

        let notify = match (
            std::env::var("FORMRELAY_NOTIFY_API_KEY").ok(),
            std::env::var("FORMRELAY_NOTIFY_LETTER_API_KEY").ok(),
        ) {
            (Some(api_key), letter_api_key) => Some(NotifyConfig {
                letter_api_key: letter_api_key.unwrap_or_else(|| api_key.clone()),
                api_key,
                base_url: env_or(
                    "FORMRELAY_NOTIFY_BASE_URL",
                    "https://api.notifications.service.gov.uk",
                ),
            }),
            (None, _) => None,
        };

        Ok(Config {
            database_url,
            encryption_key,
            host,
            port,
            max_body_size,
            log_level,
            worker_count: worker_count.max(1),
            rate_limit,
            task_max_attempts: task_max_attempts.max(1),
            delivery_timeout: Duration::from_secs(delivery_timeout_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs.max(1)),
            sweep_window: chrono::Duration::hours(sweep_window_hours),
            signature_max_skew_secs,
            smtp,
            helpdesk,
            notify,
        })
    }
}

fn helpdesk_from_env() -> Result<HelpdeskConfig, String> {
    let mut credentials = HashMap::new();

    for subdomain in env_or("FORMRELAY_HELPDESK_SUBDOMAINS", "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let prefix = format!(
            "FORMRELAY_HELPDESK_{}",
            subdomain.to_uppercase().replace('-', "_")
        );
        let custom_field_id = env_required(&format!("{prefix}_CUSTOM_FIELD_ID"))?
            .parse()
            .map_err(|e| format!("Invalid {prefix}_CUSTOM_FIELD_ID: {e}"))?;

        credentials.insert(
            subdomain.to_string(),
            HelpdeskCredentials {
                email: env_required(&format!("{prefix}_EMAIL"))?,
                token: env_required(&format!("{prefix}_TOKEN"))?,
                custom_field_id,
                base_url: env_or(
                    &format!("{prefix}_BASE_URL"),
                    &format!("https://{subdomain}.zendesk.com"),
                ),
            },
        );
    }

    let default_subdomain = std::env::var("FORMRELAY_HELPDESK_DEFAULT_SUBDOMAIN")
        .ok()
        .or_else(|| {
            // A single configured set is the default.
            if credentials.len() == 1 {
                credentials.keys().next().cloned()
            } else {
                None
            }
        });

    Ok(HelpdeskConfig {
        default_subdomain,
        credentials,
    })
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
