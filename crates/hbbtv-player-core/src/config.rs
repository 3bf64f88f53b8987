//! Player configuration

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Upper bound accepted for `retry.max_retries`
const MAX_RETRIES_LIMIT: u32 = 10;

/// Runtime and adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Retry budget applied by the HLS and DASH adapters
    pub retry: RetryPolicy,
    /// Ask streaming engines to start playback as soon as they can
    pub autoplay: bool,
    /// Restart from the beginning when playback ends
    pub loop_playback: bool,
    /// Queue depth above which the runtime logs a warning
    pub queue_warn_depth: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            autoplay: false,
            loop_playback: false,
            queue_warn_depth: 64,
        }
    }
}

impl PlayerConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            return Err(Error::InvalidConfig(format!(
                "retry.max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, self.retry.max_retries
            )));
        }
        if self.queue_warn_depth == 0 {
            return Err(Error::InvalidConfig("queue_warn_depth must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert!(!config.autoplay);
        assert!(!config.loop_playback);
    }

    #[test]
    fn test_partial_json() {
        let config =
            PlayerConfig::from_json(r#"{"autoplay": true, "retry": {"max_retries": 5}}"#).unwrap();
        assert!(config.autoplay);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = PlayerConfig::from_json(r#"{"retry": {"max_retries": 50}}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(matches!(PlayerConfig::from_json("{"), Err(Error::ConfigParse(_))));
    }
}
