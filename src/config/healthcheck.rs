// ABOUTME: Container health check definition stored with the container.
// ABOUTME: Docker-shaped test command with interval, timeout, retries and start period.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckConfig {
    /// `["CMD", ...]`, `["CMD-SHELL", "..."]` or `["NONE"]`.
    pub test: Vec<String>,

    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_start_period", with = "humantime_serde")]
    pub start_period: Duration,
}

impl HealthcheckConfig {
    /// Health check running `cmd` through the container shell.
    pub fn shell(cmd: &str) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), cmd.to_string()],
            interval: default_interval(),
            timeout: default_timeout(),
            retries: default_retries(),
            start_period: default_start_period(),
        }
    }

    /// Health check explicitly disabled with `--no-healthcheck`.
    pub fn disabled() -> Self {
        Self {
            test: vec!["NONE".to_string()],
            ..Self::shell("")
        }
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retries() -> u32 {
    3
}

fn default_start_period() -> Duration {
    Duration::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_use_humantime() {
        let hc: HealthcheckConfig =
            serde_json::from_str(r#"{"test":["CMD","true"],"interval":"5s"}"#).unwrap();
        assert_eq!(hc.interval, Duration::from_secs(5));
        assert_eq!(hc.retries, 3);

        let json = serde_json::to_string(&hc).unwrap();
        assert!(json.contains(r#""interval":"5s""#));
    }
}
