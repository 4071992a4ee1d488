//! Engine tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stability::StabilityOptions;

/// Which flow drives the engine. Determines the allowed action vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseMode {
    /// Multi-step goal planner.
    #[default]
    Planner,
    /// Single natural-language command translator.
    Command,
}

/// Timing and sizing for a session. Every field has a default, so config
/// files only need to name what they change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub mode: UseMode,
    /// Goal loop step ceiling.
    pub max_steps: usize,
    /// History entries shown to the oracle.
    pub history_window: usize,
    /// Max elements per snapshot.
    pub element_cap: usize,
    /// Max characters of element text.
    pub text_limit: usize,
    pub retry_attempts: u32,
    /// Backoff before retry `n` is `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    /// Shared budget for trying every candidate selector.
    pub resolve_budget_ms: u64,
    pub resolve_poll_ms: u64,
    pub navigation_timeout_ms: u64,
    pub click_timeout_ms: u64,
    pub load_timeout_ms: u64,
    pub stability_max_wait_ms: u64,
    pub stability_quiet_ms: u64,
    /// Pause after each action, before the stability wait.
    pub settle_ms: u64,
    /// Delay between typed characters.
    pub typing_delay_ms: u64,
    /// Name of the test function in the replay script.
    pub test_name: String,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            mode: UseMode::Planner,
            max_steps: 15,
            history_window: 10,
            element_cap: 75,
            text_limit: 100,
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            resolve_budget_ms: 10_000,
            resolve_poll_ms: 100,
            navigation_timeout_ms: 30_000,
            click_timeout_ms: 5_000,
            load_timeout_ms: 3_000,
            stability_max_wait_ms: 5_000,
            stability_quiet_ms: 500,
            settle_ms: 500,
            typing_delay_ms: 50,
            test_name: "pilot generated test".into(),
        }
    }
}

impl PilotConfig {
    pub fn stability(&self) -> StabilityOptions {
        StabilityOptions {
            load_timeout: Duration::from_millis(self.load_timeout_ms),
            max_wait: Duration::from_millis(self.stability_max_wait_ms),
            quiet_window: Duration::from_millis(self.stability_quiet_ms),
            ..Default::default()
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn resolve_budget(&self) -> Duration {
        Duration::from_millis(self.resolve_budget_ms)
    }

    pub fn resolve_poll(&self) -> Duration {
        Duration::from_millis(self.resolve_poll_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn click_timeout(&self) -> Duration {
        Duration::from_millis(self.click_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn typing_delay(&self) -> Duration {
        Duration::from_millis(self.typing_delay_ms)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_steps == 0 {
            return Err("max_steps must be at least 1".into());
        }
        if self.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".into());
        }
        if self.element_cap == 0 {
            return Err("element_cap must be at least 1".into());
        }
        if self.test_name.trim().is_empty() {
            return Err("test_name must not be empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = PilotConfig::default();
        assert_eq!(c.max_steps, 15);
        assert_eq!(c.element_cap, 75);
        assert_eq!(c.text_limit, 100);
        assert_eq!(c.retry_attempts, 3);
        assert_eq!(c.stability().max_wait, Duration::from_secs(5));
        assert_eq!(c.stability().quiet_window, Duration::from_millis(500));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let c: PilotConfig = serde_json::from_str(r#"{"max_steps": 4, "mode": "command"}"#).unwrap();
        assert_eq!(c.max_steps, 4);
        assert_eq!(c.mode, UseMode::Command);
        assert_eq!(c.history_window, 10);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let c = PilotConfig {
            max_steps: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
        let c = PilotConfig {
            retry_attempts: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }
}
