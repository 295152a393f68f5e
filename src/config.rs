//! Runtime settings shared by every reconcile pass

use crate::error::{OperatorError, Result};
use crate::retry::RetryConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Delay before re-running the chain after a step asked for a requeue
    pub requeue_delay: Duration,
    /// Delay before retrying after a failed pass
    pub error_requeue: Duration,
    /// Periodic re-evaluation while an external scaler is active
    pub resync_interval: Duration,
    /// Backoff for optimistic-concurrency conflicts
    pub retry: RetryConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            requeue_delay: Duration::from_secs(10),
            error_requeue: Duration::from_secs(30),
            resync_interval: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Reject settings that would spin the controller or never retry.
    pub fn validate(&self) -> Result<()> {
        if self.retry.steps == 0 {
            return Err(OperatorError::Configuration(
                "conflict retry steps must be at least 1".to_string(),
            ));
        }
        for (flag, value) in [
            ("requeue delay", self.requeue_delay),
            ("error requeue delay", self.error_requeue),
            ("resync interval", self.resync_interval),
        ] {
            if value.is_zero() {
                return Err(OperatorError::Configuration(format!("{flag} must be positive")));
            }
        }
        if matches!(self.namespace.as_deref(), Some("")) {
            return Err(OperatorError::Configuration(
                "watched namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(OperatorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_unusable_settings() {
        let cfg = OperatorConfig {
            retry: RetryConfig::with_steps(0),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, OperatorError::Configuration(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: conflict retry steps must be at least 1"
        );

        let cfg = OperatorConfig {
            resync_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate().unwrap_err().to_string(),
            "Configuration error: resync interval must be positive"
        );

        let cfg = OperatorConfig {
            namespace: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(OperatorError::Configuration(_))));
    }
}
