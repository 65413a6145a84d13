//! Run configuration.
//!
//! Plain data with an explicit `defaults()` factory. Files are TOML; every
//! field is optional and falls back to its default:
//!
//! ```toml
//! workers = 4
//! idle_backoff_ms = 50
//! max_depth = 3
//! politeness_interval_ms = 1000
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 2000
//!
//! [persistence]
//! dir = "./trawl-state"
//! durability = { mode = "batched", max_events = 64, max_delay_ms = 200 }
//! snapshot = { every_events = 10000, every_secs = 30 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::CrawlError;
use crate::persistence::{DurabilityPolicy, PersistenceConfig};
use crate::queue::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of worker loops.
    pub workers: usize,

    /// How long an idle worker waits before polling again.
    #[serde(rename = "idle_backoff_ms", with = "crate::serde_ext::millis")]
    pub idle_backoff: Duration,

    /// Discovered links deeper than this are dropped. `None` follows links
    /// without limit.
    pub max_depth: Option<u32>,

    /// Minimum gap between dispatches to one lane. Zero disables politeness.
    #[serde(rename = "politeness_interval_ms", with = "crate::serde_ext::millis")]
    pub politeness_interval: Duration,

    pub retry: RetryPolicy,

    pub persistence: PersistenceConfig,
}

impl RunConfig {
    pub fn defaults() -> Self {
        Self {
            workers: 4,
            idle_backoff: Duration::from_millis(50),
            max_depth: None,
            politeness_interval: Duration::from_secs(1),
            retry: RetryPolicy::simple(),
            persistence: PersistenceConfig::defaults(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, CrawlError> {
        let config: Self = toml::from_str(s).map_err(|e| CrawlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CrawlError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), CrawlError> {
        let invalid = |msg: String| Err(CrawlError::Config(msg));

        if self.workers == 0 {
            return invalid("workers must be at least 1".into());
        }
        let retry = &self.retry;
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return invalid(format!("retry.multiplier must be >= 1.0, got {}", retry.multiplier));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return invalid(format!("retry.jitter must be within [0, 1], got {}", retry.jitter));
        }
        if retry.base_delay > retry.max_delay {
            return invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                retry.base_delay.as_millis(),
                retry.max_delay.as_millis()
            ));
        }
        if let DurabilityPolicy::Batched { max_events: 0, .. } = self.persistence.durability {
            return invalid("persistence.durability.max_events must be at least 1".into());
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::defaults()
    }
}
