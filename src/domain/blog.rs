//! Per-blog configuration as read by the pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: i64 = 86_400;

/// Runs-per-day frequency, written as `frequency: { daily: 2 }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency {
    pub daily: u32,
}

impl Frequency {
    /// Upper bound on runs per day (one every 30 minutes)
    pub const MAX_DAILY: u32 = 48;

    /// Nominal time between two scheduled runs (rounded down to seconds)
    pub fn interval(&self) -> Duration {
        Duration::seconds(SECONDS_PER_DAY / i64::from(self.daily.max(1)))
    }

    /// Start of the slot containing `now`.
    ///
    /// A day is cut into exactly `daily` slots starting at UTC midnight. Slot
    /// `i` starts at the first whole second at or after `i * 86400 / daily`,
    /// so a `daily` that does not divide the day still yields `daily` slots.
    pub fn slot_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(now);
        let daily = i64::from(self.daily.max(1));
        let elapsed = (now - midnight).num_seconds().clamp(0, SECONDS_PER_DAY - 1);
        let index = elapsed * daily / SECONDS_PER_DAY;
        midnight + Duration::seconds((index * SECONDS_PER_DAY + daily - 1) / daily)
    }
}

/// Theme text plus structured style hints (tone, audience, length, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub style: BTreeMap<String, String>,
}

/// Configuration for one blog. Loaded fresh on every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogConfig {
    /// Directory name of the blog; filled in by the loader
    #[serde(skip)]
    pub id: String,

    /// Ordered topic list
    pub topics: Vec<String>,

    #[serde(default)]
    pub theme: Theme,

    pub frequency: Frequency,

    /// No run is scheduled while this is false
    #[serde(default)]
    pub ready: bool,
}

impl BlogConfig {
    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> Result<(), String> {
        if self.topics.is_empty() {
            return Err("topic list is empty".to_string());
        }
        if let Some(i) = self.topics.iter().position(|t| t.trim().is_empty()) {
            return Err(format!("topic {} is blank", i));
        }
        if self.frequency.daily == 0 || self.frequency.daily > Frequency::MAX_DAILY {
            return Err(format!(
                "frequency.daily must be between 1 and {}, got {}",
                Frequency::MAX_DAILY,
                self.frequency.daily
            ));
        }
        Ok(())
    }
}
