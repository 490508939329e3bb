//! Load tests described in TOML or JSON files.
//!
//! ```toml
//! name = "checkout"
//!
//! [load]
//! users = 50
//! duration = "5m"
//! ramp_up = "30s"
//! profile = "ramp_up"
//! think_time = "500ms"
//!
//! [[scenarios]]
//! name = "browse"
//! weight = 3.0
//!
//! [[scenarios]]
//! name = "buy"
//!
//! [thresholds]
//! p95_response_time = "800ms"
//! max_error_rate = 0.01
//! ```
//!
//! Files only carry scenario names. The actions come from the caller through
//! [`LoadTestConfigFile::bind`].

use std::{collections::HashMap, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    load::{LoadProfile, LoadScenario, LoadTestConfig},
    report::PerformanceThresholds,
    scenario::Action,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestConfigFile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub load: LoadSection,
    #[serde(default)]
    pub scenarios: Vec<ScenarioSection>,
    #[serde(default)]
    pub thresholds: Option<ThresholdsSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSection {
    #[serde(default = "default_users")]
    pub users: usize,
    #[serde(default = "default_duration")]
    pub duration: String,
    #[serde(default = "default_ramp_up")]
    pub ramp_up: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub requests_per_second: Option<u32>,
    #[serde(default)]
    pub think_time: Option<String>,
    #[serde(default)]
    pub max_response_time: Option<String>,
    #[serde(default)]
    pub success_rate_threshold: Option<f64>,
    #[serde(default)]
    pub report_interval: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSection {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdsSection {
    pub max_response_time: Option<String>,
    pub p50_response_time: Option<String>,
    pub p90_response_time: Option<String>,
    pub p95_response_time: Option<String>,
    pub p99_response_time: Option<String>,
    pub min_requests_per_second: Option<f64>,
    pub max_error_rate: Option<f64>,
    pub min_success_rate: Option<f64>,
}

fn default_name() -> String {
    "Load Test".to_string()
}

fn default_users() -> usize {
    1
}

fn default_duration() -> String {
    "1m".to_string()
}

fn default_ramp_up() -> String {
    "10s".to_string()
}

fn default_profile() -> String {
    "constant".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl LoadTestConfigFile {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Read `path`, picking the format from its extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "toml" => Self::from_toml_str(&fs::read_to_string(path)?),
            "json" => Self::from_json_str(&fs::read_to_string(path)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn to_load_test_config(&self) -> Result<LoadTestConfig, ConfigError> {
        let load = &self.load;
        let defaults = LoadTestConfig::default();
        let config = LoadTestConfig {
            users: load.users,
            duration: parse_duration(&load.duration)?,
            ramp_up: parse_duration(&load.ramp_up)?,
            requests_per_second: load.requests_per_second,
            think_time: parse_optional(load.think_time.as_deref())?.unwrap_or_default(),
            profile: load.profile.parse::<LoadProfile>()?,
            report_interval: parse_optional(load.report_interval.as_deref())?
                .unwrap_or(defaults.report_interval),
            max_response_time: parse_optional(load.max_response_time.as_deref())?,
            success_rate_threshold: load
                .success_rate_threshold
                .unwrap_or(defaults.success_rate_threshold),
        };
        config.validate()?;
        Ok(config)
    }

    /// `None` when the file has no `thresholds` section.
    pub fn to_performance_thresholds(&self) -> Result<Option<PerformanceThresholds>, ConfigError> {
        let Some(t) = &self.thresholds else {
            return Ok(None);
        };
        let defaults = PerformanceThresholds::default();
        Ok(Some(PerformanceThresholds {
            max_response_time: parse_optional(t.max_response_time.as_deref())?,
            p50_response_time: parse_optional(t.p50_response_time.as_deref())?,
            p90_response_time: parse_optional(t.p90_response_time.as_deref())?,
            p95_response_time: parse_optional(t.p95_response_time.as_deref())?,
            p99_response_time: parse_optional(t.p99_response_time.as_deref())?,
            min_requests_per_second: t.min_requests_per_second,
            max_error_rate: t.max_error_rate.unwrap_or(defaults.max_error_rate),
            min_success_rate: t.min_success_rate.unwrap_or(defaults.min_success_rate),
        }))
    }

    /// Pair every enabled scenario with its action from `actions`.
    pub fn bind(&self, actions: &HashMap<String, Action>) -> Result<Vec<LoadScenario>, ConfigError> {
        self.scenarios
            .iter()
            .filter(|s| s.enabled)
            .map(|s| {
                let action = actions
                    .get(&s.name)
                    .ok_or_else(|| ConfigError::UnknownScenario(s.name.clone()))?;
                Ok(LoadScenario::from_action(&s.name, s.weight, action.clone()))
            })
            .collect()
    }
}

/// Parse `"250ms"`, `"30s"`, `"5m"` or `"1h"`.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(value.to_string());
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (number, unit) = trimmed.split_at(split);
    let number: u64 = number.parse().map_err(|_| invalid())?;
    let duration = match unit.trim() {
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(number.checked_mul(60).ok_or_else(invalid)?),
        "h" => Duration::from_secs(number.checked_mul(3600).ok_or_else(invalid)?),
        _ => return Err(invalid()),
    };
    Ok(duration)
}

fn parse_optional(value: Option<&str>) -> Result<Option<Duration>, ConfigError> {
    value.map(parse_duration).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::action;

    const TOML: &str = r#"
        name = "checkout"
        description = "peak traffic"

        [load]
        users = 50
        duration = "5m"
        ramp_up = "30s"
        profile = "RAMP_UP"
        think_time = "500ms"
        requests_per_second = 200

        [[scenarios]]
        name = "browse"
        weight = 3.0

        [[scenarios]]
        name = "buy"

        [[scenarios]]
        name = "admin"
        enabled = false

        [thresholds]
        p95_response_time = "800ms"
        max_error_rate = 0.01
    "#;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        for bad in ["", "5", "m", "5d", "-1s", "1.5s"] {
            assert!(
                matches!(parse_duration(bad), Err(ConfigError::InvalidDuration(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn toml_file_to_config() {
        let file = LoadTestConfigFile::from_toml_str(TOML).unwrap();
        assert_eq!(file.name, "checkout");

        let config = file.to_load_test_config().unwrap();
        assert_eq!(config.users, 50);
        assert_eq!(config.duration, Duration::from_secs(300));
        assert_eq!(config.ramp_up, Duration::from_secs(30));
        assert_eq!(config.profile, LoadProfile::RampUp);
        assert_eq!(config.think_time, Duration::from_millis(500));
        assert_eq!(config.requests_per_second, Some(200));
        assert_eq!(config.report_interval, Duration::from_secs(10));

        let thresholds = file.to_performance_thresholds().unwrap().unwrap();
        assert_eq!(thresholds.p95_response_time, Some(Duration::from_millis(800)));
        assert_eq!(thresholds.max_error_rate, 0.01);
        assert_eq!(thresholds.min_success_rate, 0.95);
    }

    #[test]
    fn json_uses_defaults() {
        let file = LoadTestConfigFile::from_json_str(r#"{ "load": {} }"#).unwrap();
        assert_eq!(file.name, "Load Test");
        let config = file.to_load_test_config().unwrap();
        assert_eq!(config.users, 1);
        assert_eq!(config.duration, Duration::from_secs(60));
        assert_eq!(config.ramp_up, Duration::from_secs(10));
        assert_eq!(config.profile, LoadProfile::Constant);
        assert!(file.to_performance_thresholds().unwrap().is_none());
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let file = LoadTestConfigFile::from_json_str(
            r#"{ "load": { "duration": "soon" } }"#,
        )
        .unwrap();
        assert!(matches!(
            file.to_load_test_config(),
            Err(ConfigError::InvalidDuration(_))
        ));

        let file = LoadTestConfigFile::from_json_str(
            r#"{ "load": { "profile": "sawtooth" } }"#,
        )
        .unwrap();
        assert!(matches!(
            file.to_load_test_config(),
            Err(ConfigError::UnknownProfile(_))
        ));

        assert!(matches!(
            LoadTestConfigFile::from_toml_str("load = 3"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            LoadTestConfigFile::load("plan.yaml"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn bind_skips_disabled_and_rejects_unknown() {
        let file = LoadTestConfigFile::from_toml_str(TOML).unwrap();
        let mut actions: HashMap<String, Action> = HashMap::new();
        actions.insert("browse".into(), action(|| async { Ok(()) }));
        actions.insert("buy".into(), action(|| async { Ok(()) }));

        let scenarios = file.bind(&actions).unwrap();
        let names: Vec<_> = scenarios.iter().map(|s| (s.name(), s.weight())).collect();
        assert_eq!(names, [("browse", 3.0), ("buy", 1.0)]);

        actions.remove("buy");
        assert!(matches!(
            file.bind(&actions),
            Err(ConfigError::UnknownScenario(name)) if name == "buy"
        ));
    }

    #[test]
    fn loads_from_disk() {
        let path = std::env::temp_dir().join(format!("barrage-config-{}.toml", std::process::id()));
        fs::write(&path, TOML).unwrap();
        let file = LoadTestConfigFile::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(file.scenarios.len(), 3);
    }
}
