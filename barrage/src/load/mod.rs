//! Load generation with virtual users.
//!
//! A [`LoadGenerator`] spawns one Tokio task per virtual user. Each user waits
//! for its start delay (given by the [`LoadProfile`]), then loops over its
//! scenario's action until the configured duration elapses, recording one
//! [`RequestMetric`](crate::metric::RequestMetric) per iteration. Users keep
//! their samples locally and hand them back when they exit, so the hot path
//! never contends on a shared collection.
//!
//! When [`LoadTestConfig::requests_per_second`] is set, a token governor caps
//! the combined iteration rate of all users. Without it, users run as fast as
//! their action and `think_time` allow.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use barrage::load::{LoadGenerator, LoadProfile, LoadScenario, LoadTestConfig};
//!
//! # async fn run() -> Result<(), barrage::error::LoadError> {
//! let config = LoadTestConfig::builder()
//!     .users(20)
//!     .duration(Duration::from_secs(30))
//!     .ramp_up(Duration::from_secs(5))
//!     .profile(LoadProfile::RampUp)
//!     .build();
//!
//! let results = LoadGenerator::new(config)
//!     .run(vec![LoadScenario::new("ping", 1.0, || async {
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!         Ok(())
//!     })])
//!     .await?;
//!
//! println!("{results}");
//! # Ok(())
//! # }
//! ```

mod generator;
mod profile;
mod rate;

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{error::ConfigError, report::PerformanceThresholds};

pub use generator::{LoadGenerator, LoadScenario, RecordedRun};
pub use profile::{exit_offset, start_delay};

/// How virtual users are brought online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadProfile {
    /// Users start evenly spread over `ramp_up` and stay until the end.
    #[default]
    Constant,
    /// Same schedule as `Constant`.
    RampUp,
    /// Everyone starts at once and users leave one by one.
    RampDown,
    /// Everyone starts together after `ramp_up`.
    Spike,
    /// Five equal groups, each starting `ramp_up / 5` after the previous one.
    Step,
    /// Four groups a quarter of `ramp_up` apart, users 100ms apart inside a group.
    Wave,
}

impl fmt::Display for LoadProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadProfile::Constant => "constant",
            LoadProfile::RampUp => "ramp_up",
            LoadProfile::RampDown => "ramp_down",
            LoadProfile::Spike => "spike",
            LoadProfile::Step => "step",
            LoadProfile::Wave => "wave",
        };
        f.write_str(name)
    }
}

impl FromStr for LoadProfile {
    type Err = ConfigError;

    /// Case-insensitive; `-` and `_` separators are optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "constant" => Ok(LoadProfile::Constant),
            "rampup" => Ok(LoadProfile::RampUp),
            "rampdown" => Ok(LoadProfile::RampDown),
            "spike" => Ok(LoadProfile::Spike),
            "step" => Ok(LoadProfile::Step),
            "wave" => Ok(LoadProfile::Wave),
            _ => Err(ConfigError::UnknownProfile(s.to_string())),
        }
    }
}

/// Shape and limits of a load test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct LoadTestConfig {
    /// Total virtual users, split across scenarios by weight.
    #[builder(default = 10)]
    pub users: usize,
    /// How long users keep starting iterations.
    #[builder(default = Duration::from_secs(60))]
    pub duration: Duration,
    /// Window over which the profile spreads user start times.
    #[builder(default = Duration::ZERO)]
    pub ramp_up: Duration,
    /// Cap on iterations per second across all users.
    #[builder(default, setter(strip_option))]
    pub requests_per_second: Option<u32>,
    /// Pause after each iteration. Zero means none.
    #[builder(default = Duration::ZERO)]
    pub think_time: Duration,
    #[builder(default)]
    pub profile: LoadProfile,
    /// How often progress is logged while the run is going.
    #[builder(default = Duration::from_secs(10))]
    pub report_interval: Duration,
    #[builder(default, setter(strip_option))]
    pub max_response_time: Option<Duration>,
    /// Lowest acceptable share of successful iterations, in `0.0..=1.0`.
    #[builder(default = 0.95)]
    pub success_rate_threshold: f64,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl LoadTestConfig {
    /// A short sanity run.
    pub fn smoke() -> Self {
        Self::builder()
            .users(5)
            .duration(Duration::from_secs(30))
            .ramp_up(Duration::from_secs(5))
            .build()
    }

    pub fn stress(max_users: usize) -> Self {
        Self::builder()
            .users(max_users)
            .duration(Duration::from_secs(5 * 60))
            .ramp_up(Duration::from_secs(2 * 60))
            .profile(LoadProfile::RampUp)
            .build()
    }

    pub fn spike(users: usize) -> Self {
        Self::builder()
            .users(users)
            .duration(Duration::from_secs(2 * 60))
            .ramp_up(Duration::from_secs(5))
            .profile(LoadProfile::Spike)
            .build()
    }

    pub fn endurance(users: usize, hours: u64) -> Self {
        Self::builder()
            .users(users)
            .duration(Duration::from_secs(hours.saturating_mul(3600)))
            .ramp_up(Duration::from_secs(5 * 60))
            .profile(LoadProfile::Constant)
            .build()
    }

    /// Finds the breaking point by stepping up to 500 users.
    pub fn capacity() -> Self {
        Self::builder()
            .users(500)
            .duration(Duration::from_secs(10 * 60))
            .ramp_up(Duration::from_secs(5 * 60))
            .profile(LoadProfile::Step)
            .build()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.users == 0 {
            return Err(ConfigError::NoUsers);
        }
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::ZeroReportInterval);
        }
        if self.requests_per_second == Some(0) {
            return Err(ConfigError::ZeroRequestRate);
        }
        if !(0.0..=1.0).contains(&self.success_rate_threshold) {
            return Err(ConfigError::InvalidSuccessRate(self.success_rate_threshold));
        }
        Ok(())
    }

    /// Pass/fail criteria implied by `max_response_time` and
    /// `success_rate_threshold`.
    pub fn thresholds(&self) -> PerformanceThresholds {
        PerformanceThresholds {
            max_response_time: self.max_response_time,
            min_success_rate: self.success_rate_threshold,
            max_error_rate: 1.0 - self.success_rate_threshold,
            ..PerformanceThresholds::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let smoke = LoadTestConfig::smoke();
        assert_eq!(smoke.users, 5);
        assert_eq!(smoke.duration, Duration::from_secs(30));
        assert_eq!(smoke.ramp_up, Duration::from_secs(5));

        let stress = LoadTestConfig::stress(100);
        assert_eq!(stress.users, 100);
        assert_eq!(stress.profile, LoadProfile::RampUp);

        assert_eq!(LoadTestConfig::spike(200).profile, LoadProfile::Spike);
        assert_eq!(
            LoadTestConfig::endurance(50, 2).duration,
            Duration::from_secs(7200)
        );
        assert_eq!(LoadTestConfig::capacity().profile, LoadProfile::Step);

        for config in [smoke, stress, LoadTestConfig::capacity()] {
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn rejects_invalid_values() {
        let no_users = LoadTestConfig::builder().users(0).build();
        assert!(matches!(no_users.validate(), Err(ConfigError::NoUsers)));

        let zero = LoadTestConfig::builder().duration(Duration::ZERO).build();
        assert!(matches!(zero.validate(), Err(ConfigError::ZeroDuration)));

        let interval = LoadTestConfig::builder()
            .report_interval(Duration::ZERO)
            .build();
        assert!(matches!(
            interval.validate(),
            Err(ConfigError::ZeroReportInterval)
        ));

        let rate = LoadTestConfig::builder().requests_per_second(0).build();
        assert!(matches!(rate.validate(), Err(ConfigError::ZeroRequestRate)));

        let threshold = LoadTestConfig::builder()
            .success_rate_threshold(1.5)
            .build();
        assert!(matches!(
            threshold.validate(),
            Err(ConfigError::InvalidSuccessRate(_))
        ));

        let nan = LoadTestConfig::builder()
            .success_rate_threshold(f64::NAN)
            .build();
        assert!(nan.validate().is_err());
    }

    #[test]
    fn profile_names_parse_loosely() {
        assert_eq!("RAMP_UP".parse::<LoadProfile>().unwrap(), LoadProfile::RampUp);
        assert_eq!("ramp-down".parse::<LoadProfile>().unwrap(), LoadProfile::RampDown);
        assert_eq!("Wave".parse::<LoadProfile>().unwrap(), LoadProfile::Wave);
        assert!(matches!(
            "sawtooth".parse::<LoadProfile>(),
            Err(ConfigError::UnknownProfile(_))
        ));
        for profile in [LoadProfile::Spike, LoadProfile::RampUp] {
            assert_eq!(profile.to_string().parse::<LoadProfile>().unwrap(), profile);
        }
    }

    #[test]
    fn thresholds_follow_the_config() {
        let config = LoadTestConfig::builder()
            .max_response_time(Duration::from_millis(250))
            .success_rate_threshold(0.9)
            .build();
        let thresholds = config.thresholds();
        assert_eq!(thresholds.max_response_time, Some(Duration::from_millis(250)));
        assert_eq!(thresholds.min_success_rate, 0.9);
        assert!((thresholds.max_error_rate - 0.1).abs() < 1e-12);
    }
}
