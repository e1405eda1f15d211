//! Configuration loading.
//!
//! Mirrors the shape of the teacher's `cfg::main_cfg` module: a plain
//! `serde`-derived struct loaded from a YAML file on disk, with
//! defaults applied for anything the file omits (the original Go
//! `LoadConfig` does the same after `json.Decode`).

use std::fs;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::router::SelectionMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseCfg,
    #[serde(default)]
    pub router: RouterCfg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCfg {
    pub host: Ipv4Addr,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
}

fn default_db_port() -> u16 {
    3306
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterCfg {
    #[serde(default)]
    pub did_selection_mode: SelectionMode,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_s")]
    pub retry_delay_s: u64,
    #[serde(default = "default_call_timeout_s")]
    pub call_timeout_s: i64,
    #[serde(default = "default_stuck_did_threshold_minutes")]
    pub stuck_did_threshold_minutes: i64,
    #[serde(default = "default_reclaimer_period_s")]
    pub reclaimer_period_s: u64,
}

impl Default for RouterCfg {
    fn default() -> Self {
        Self {
            did_selection_mode: SelectionMode::default(),
            max_retries: default_max_retries(),
            retry_delay_s: default_retry_delay_s(),
            call_timeout_s: default_call_timeout_s(),
            stuck_did_threshold_minutes: default_stuck_did_threshold_minutes(),
            reclaimer_period_s: default_reclaimer_period_s(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_s() -> u64 {
    5
}

fn default_call_timeout_s() -> i64 {
    300
}

fn default_stuck_did_threshold_minutes() -> i64 {
    60
}

fn default_reclaimer_period_s() -> u64 {
    60
}

impl DatabaseCfg {
    pub fn dsn(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.name
        )
    }
}

/// Loads and validates a `Config` from a YAML file.
///
/// Unlike the teacher's `load_main_cfg`, this never panics: a missing
/// or malformed config file at startup is the one fatal condition
/// `spec.md` §7 allows, and it is surfaced as an `Err` so `main` can
/// decide how to report it rather than have the library crash a caller
/// embedding it.
pub fn load(path: &str) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(ConfigError::Io)?;
    serde_yaml::from_str(&raw).map_err(ConfigError::Parse)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_missing_router_block() {
        let yaml = r#"
database:
  host: 127.0.0.1
  username: root
  password: temppass
  name: call_routing
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.router.max_retries, 3);
        assert_eq!(cfg.router.call_timeout_s, 300);
        assert_eq!(cfg.router.stuck_did_threshold_minutes, 60);
        assert_eq!(cfg.router.did_selection_mode, SelectionMode::Random);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let yaml = r#"
database:
  host: 10.0.0.5
  port: 3307
  username: root
  password: pw
  name: routing
router:
  did_selection_mode: sequential
  call_timeout_s: 30
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.database.port, 3307);
        assert_eq!(cfg.router.did_selection_mode, SelectionMode::Sequential);
        assert_eq!(cfg.router.call_timeout_s, 30);
        assert_eq!(cfg.router.max_retries, 3);
    }
}
