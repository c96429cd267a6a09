// src/scan/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::scan::providers::{DummySource, NvidiaSource};
use crate::scan::scheduler::SchedulerCfg;
use crate::scan::types::Source;

pub const ENV_CONFIG_PATH: &str = "STOCKSCAN_CONFIG_PATH";
pub const ENV_INTERVAL_SECS: &str = "STOCKSCAN_INTERVAL_SECS";

fn default_interval_secs() -> u64 {
    30
}
fn default_alert_max_failures() -> u32 {
    5
}
fn default_locale() -> String {
    "fr-fr".to_string()
}
fn default_weight() -> u32 {
    1
}
fn default_delay_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSpec {
    Dummy {
        #[serde(default)]
        name: Option<String>,
        #[serde(default = "default_weight")]
        stocks: u32,
        #[serde(default = "default_weight")]
        unavailable: u32,
        #[serde(default = "default_weight")]
        error: u32,
        #[serde(default = "default_delay_ms")]
        delay_ms: u64,
    },
    Nvidia {
        search: String,
        #[serde(default = "default_locale")]
        locale: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Request timeout for HTTP sources; defaults to the interval.
    #[serde(default)]
    pub poll_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Consecutive errors on one source before the alert level escalates.
    #[serde(default = "default_alert_max_failures")]
    pub alert_max_failures: u32,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            poll_timeout_secs: None,
            max_concurrency: None,
            alert_max_failures: default_alert_max_failures(),
            sources: vec![SourceSpec::Dummy {
                name: None,
                stocks: 1,
                unavailable: 1,
                error: 1,
                delay_ms: default_delay_ms(),
            }],
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.unwrap_or(self.interval_secs))
    }

    pub fn scheduler_cfg(&self) -> SchedulerCfg {
        SchedulerCfg {
            interval: self.interval(),
            // HTTP sources carry their own request timeout.
            poll_timeout: None,
            max_concurrency: self.max_concurrency,
        }
    }

    pub fn build_sources(&self) -> Result<Vec<Arc<dyn Source>>> {
        let timeout = self.poll_timeout();
        let mut out: Vec<Arc<dyn Source>> = Vec::with_capacity(self.sources.len());
        for spec in &self.sources {
            match spec {
                SourceSpec::Dummy {
                    name,
                    stocks,
                    unavailable,
                    error,
                    delay_ms,
                } => {
                    let mut s = DummySource::new(
                        *stocks,
                        *unavailable,
                        *error,
                        Duration::from_millis(*delay_ms),
                    );
                    if let Some(n) = name {
                        s = s.named(n.clone());
                    }
                    out.push(Arc::new(s));
                }
                SourceSpec::Nvidia { search, locale } => {
                    out.push(Arc::new(NvidiaSource::from_api(search, locale, timeout)?));
                }
            }
        }
        Ok(out)
    }

    fn sanitize(mut self) -> Self {
        if self.interval_secs == 0 {
            self.interval_secs = 1;
        }
        if self.poll_timeout_secs == Some(0) {
            self.poll_timeout_secs = None;
        }
        if let Some(n) = self.max_concurrency.as_mut() {
            *n = (*n).max(1);
        }
        self
    }

    fn apply_env(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(ENV_INTERVAL_SECS) {
            self.interval_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_INTERVAL_SECS}={raw:?} is not a number"))?;
        }
        Ok(self)
    }
}

/// Load a config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<MonitorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing config {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $STOCKSCAN_CONFIG_PATH
/// 2) config/stockscan.toml
/// 3) config/stockscan.json
/// 4) built-in defaults
///
/// `$STOCKSCAN_INTERVAL_SECS` overrides the interval in every case.
pub fn load_config_default() -> Result<MonitorConfig> {
    let cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            bail!("{ENV_CONFIG_PATH} points to non-existent path");
        }
        load_config_from(&pb)?
    } else {
        let toml_p = PathBuf::from("config/stockscan.toml");
        let json_p = PathBuf::from("config/stockscan.json");
        if toml_p.exists() {
            load_config_from(&toml_p)?
        } else if json_p.exists() {
            load_config_from(&json_p)?
        } else {
            MonitorConfig::default()
        }
    };
    Ok(cfg.apply_env()?.sanitize())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<MonitorConfig> {
    match hint_ext {
        "toml" => return parse_toml(s),
        "json" => return parse_json(s),
        _ => {}
    }
    // Unknown extension: sniff JSON first, then TOML.
    if s.trim_start().starts_with('{') {
        if let Ok(v) = parse_json(s) {
            return Ok(v);
        }
    }
    parse_toml(s).map_err(|e| anyhow!("unsupported config format: {e:#}"))
}

fn parse_toml(s: &str) -> Result<MonitorConfig> {
    let v: MonitorConfig = toml::from_str(s)?;
    Ok(v.sanitize())
}

fn parse_json(s: &str) -> Result<MonitorConfig> {
    let v: MonitorConfig = serde_json::from_str(s)?;
    Ok(v.sanitize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_sources_are_tagged_by_kind() {
        let toml = r#"
interval_secs = 10
max_concurrency = 0

[[sources]]
kind = "nvidia"
search = "3080"

[[sources]]
kind = "dummy"
error = 5
delay_ms = 0
"#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.interval_secs, 10);
        assert_eq!(cfg.max_concurrency, Some(1));
        assert_eq!(cfg.alert_max_failures, 5);
        assert_eq!(
            cfg.sources[0],
            SourceSpec::Nvidia {
                search: "3080".into(),
                locale: "fr-fr".into()
            }
        );
        assert_eq!(
            cfg.sources[1],
            SourceSpec::Dummy {
                name: None,
                stocks: 1,
                unavailable: 1,
                error: 5,
                delay_ms: 0
            }
        );
    }

    #[test]
    fn zero_interval_and_timeout_are_sanitized() {
        let cfg = parse_json(r#"{"interval_secs": 0, "poll_timeout_secs": 0}"#).unwrap();
        assert_eq!(cfg.interval_secs, 1);
        assert_eq!(cfg.poll_timeout(), Duration::from_secs(1));
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn unknown_extension_sniffs_format() {
        assert_eq!(
            parse_config(r#"{"interval_secs": 7}"#, "").unwrap().interval_secs,
            7
        );
        assert_eq!(parse_config("interval_secs = 8", "conf").unwrap().interval_secs, 8);
        assert!(parse_config("interval_secs = [", "").is_err());
    }

    #[test]
    fn default_config_builds_one_dummy_source() {
        let cfg = MonitorConfig::default();
        let sources = cfg.build_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name(), "Dummy");
        assert_eq!(cfg.scheduler_cfg().interval, Duration::from_secs(30));
    }
}
