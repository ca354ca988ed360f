use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;

use crate::poller::PollPolicy;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("visibility threshold {0} must be within (0, 1]")]
    Threshold(f64),
}

/// Tunables of the synchronization engine. Every field falls back to its
/// default when absent from a config file.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "dwell_delay_ms")]
    pub dwell_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub visibility_threshold: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "progress_tick_ms")]
    pub progress_tick: Duration,
    pub ttl: CacheTtls,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dwell_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(1000),
            poll_max_attempts: 60,
            visibility_threshold: 0.4,
            progress_tick: Duration::from_millis(1000),
            ttl: CacheTtls::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dwell_delay.is_zero() {
            return Err(ConfigError::Zero("dwell_delay_ms"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll_interval_ms"));
        }
        if self.poll_max_attempts == 0 {
            return Err(ConfigError::Zero("poll_max_attempts"));
        }
        if self.progress_tick.is_zero() {
            return Err(ConfigError::Zero("progress_tick_ms"));
        }
        let threshold = self.visibility_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Threshold(threshold));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            max_attempts: self.poll_max_attempts,
        }
    }
}

/// Expiration per class of cache key.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "distilled_content_ms")]
    pub distilled_content: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "section_lists_ms")]
    pub section_lists: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "content_section_ms")]
    pub content_section: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "book_list_ms")]
    pub book_list: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "check_ins_ms")]
    pub check_ins: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "app_config_ms")]
    pub app_config: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "book_ms")]
    pub book: Duration,
}

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            distilled_content: DAY,
            section_lists: DAY,
            content_section: DAY,
            book_list: FIVE_MINUTES,
            check_ins: FIVE_MINUTES,
            app_config: Duration::from_secs(60),
            book: Duration::from_millis(1),
        }
    }
}
