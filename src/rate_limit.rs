use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use sqlx::PgPool;

use crate::db;

/// An allowance of `limit` requests per `period`, written as `15/h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub limit: u32,
    pub period: Duration,
}

impl FromStr for Rate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, unit) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("expected <count>/<unit>, got '{s}'"))?;

        let limit: u32 = count
            .trim()
            .parse()
            .map_err(|e| format!("invalid count '{count}': {e}"))?;

        let secs = match unit.trim() {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            other => return Err(format!("unknown unit '{other}' (use s, m, h or d)")),
        };

        Ok(Rate {
            limit,
            period: Duration::from_secs(secs),
        })
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.period.as_secs() {
            1 => "s",
            60 => "m",
            3600 => "h",
            _ => "d",
        };
        write!(f, "{}/{}", self.limit, unit)
    }
}

/// Per-IP submission rate limiter. Counters live in Postgres so every API
/// process shares the same window.
pub struct SubmissionRateLimiter {
    rate: Option<Rate>,
}

impl SubmissionRateLimiter {
    pub fn new(rate: Option<Rate>) -> Self {
        Self { rate }
    }

    pub fn rate(&self) -> Option<Rate> {
        self.rate
    }

    /// Count this request against the IP's window. Returns `true` when the
    /// request exceeds the configured rate. Requests without an IP are never
    /// limited.
    pub async fn is_limited(&self, pool: &PgPool, ip: Option<IpAddr>) -> Result<bool, sqlx::Error> {
        let (Some(rate), Some(ip)) = (self.rate, ip) else {
            return Ok(false);
        };

        let count = db::rate_limits::record_attempt(
            pool,
            &format!("ip:{ip}"),
            rate.period.as_secs_f64(),
        )
        .await?;

        Ok(exceeds(count, rate))
    }
}

fn exceeds(count: i32, rate: Rate) -> bool {
    i64::from(count) > i64::from(rate.limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rates() {
        let rate: Rate = "15/h".parse().unwrap();
        assert_eq!(rate.limit, 15);
        assert_eq!(rate.period, Duration::from_secs(3600));

        let rate: Rate = " 100000/s ".parse().unwrap();
        assert_eq!(rate.limit, 100_000);
        assert_eq!(rate.period, Duration::from_secs(1));

        assert_eq!("5/m".parse::<Rate>().unwrap().to_string(), "5/m");
    }

    #[test]
    fn rejects_malformed_rates() {
        assert!("15".parse::<Rate>().is_err());
        assert!("x/h".parse::<Rate>().is_err());
        assert!("15/w".parse::<Rate>().is_err());
    }

    #[test]
    fn only_requests_past_the_limit_are_limited() {
        let rate: Rate = "5/h".parse().unwrap();
        assert!(!exceeds(1, rate));
        assert!(!exceeds(5, rate));
        assert!(exceeds(6, rate));
    }
}
