use std::{fmt::Debug, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// A single sample produced while a scenario runs.
pub trait Metric
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
}

/// Outcome of one load-test iteration.
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct RequestMetric {
    /// Unix epoch milliseconds at which the iteration started.
    pub timestamp_millis: u64,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
    pub scenario_name: String,
}

impl Metric for RequestMetric {}

impl RequestMetric {
    pub fn success(scenario_name: impl Into<String>, timestamp_millis: u64, duration: Duration) -> Self {
        Self {
            timestamp_millis,
            duration,
            success: true,
            error: None,
            scenario_name: scenario_name.into(),
        }
    }

    pub fn failure(
        scenario_name: impl Into<String>,
        timestamp_millis: u64,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_millis,
            duration,
            success: false,
            error: Some(error.into()),
            scenario_name: scenario_name.into(),
        }
    }
}
