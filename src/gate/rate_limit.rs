use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::GatewayError;

/// `count` requests per `window`, written as `"10/minute"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RateLimit {
    pub count: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(count: u32, window: Duration) -> Self {
        Self { count, window }
    }

    fn unit(&self) -> (u64, &'static str) {
        let secs = self.window.as_secs();
        match secs {
            86_400 => (1, "day"),
            3_600 => (1, "hour"),
            60 => (1, "minute"),
            1 => (1, "second"),
            _ => (secs, "seconds"),
        }
    }
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, period) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("Rate limit must look like \"10/minute\": {}", s))?;

        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid request count in rate limit: {}", s))?;
        if count == 0 {
            anyhow::bail!("Rate limit count must be positive: {}", s);
        }

        let period = period.trim().to_lowercase();
        let (amount, unit) = match period.split_once(' ') {
            Some((amount, unit)) => (
                amount
                    .parse::<u64>()
                    .map_err(|_| anyhow::anyhow!("Invalid period in rate limit: {}", s))?,
                unit.trim().to_string(),
            ),
            None => (1, period),
        };

        let unit_secs = match unit.trim_end_matches('s') {
            "second" | "sec" => 1,
            "minute" | "min" => 60,
            "hour" => 3_600,
            "day" => 86_400,
            _ => anyhow::bail!("Unknown rate limit period: {}", s),
        };

        if amount == 0 {
            anyhow::bail!("Rate limit period must be positive: {}", s);
        }

        Ok(Self::new(count, Duration::from_secs(amount * unit_secs)))
    }
}

impl TryFrom<String> for RateLimit {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RateLimit> for String {
    fn from(limit: RateLimit) -> Self {
        limit.to_string()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit() {
            (1, unit) => write!(f, "{}/{}", self.count, unit),
            (amount, unit) => write!(f, "{}/{} {}", self.count, amount, unit),
        }
    }
}

/// Sliding-window request counter keyed by caller
pub struct RateLimiter {
    limit: RateLimit,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Count a request for `key`, or reject it with the time until a slot frees up
    pub async fn check(&self, key: &str) -> Result<(), GatewayError> {
        self.check_at(key, Instant::now()).await
    }

    pub(crate) async fn check_at(&self, key: &str, now: Instant) -> Result<(), GatewayError> {
        let mut hits = self.hits.lock().await;

        // Drop callers whose whole window has expired
        hits.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) < self.limit.window)
        });

        let entries = hits.entry(key.to_string()).or_default();
        while entries
            .front()
            .is_some_and(|first| now.saturating_duration_since(*first) >= self.limit.window)
        {
            entries.pop_front();
        }

        if entries.len() >= self.limit.count as usize {
            let oldest = entries.front().copied().unwrap_or(now);
            let reset_in = self
                .limit
                .window
                .saturating_sub(now.saturating_duration_since(oldest));
            let retry_after_secs = reset_in.as_secs_f64().ceil().max(1.0) as u64;

            tracing::debug!(key, retry_after_secs, "Rate limit exceeded");
            return Err(GatewayError::RateLimited { retry_after_secs });
        }

        entries.push_back(now);
        Ok(())
    }
}
