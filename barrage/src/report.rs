use std::{collections::BTreeMap, fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use typed_builder::TypedBuilder;

use crate::{
    aggregate::{Aggregate, LatencyAggregate},
    error::ReportError,
    metric::RequestMetric,
    outcome::ExecutionSummary,
};

/// Final statistics derived from an [`Aggregate`].
pub trait Report<A>
where
    Self: Sized + Send + Sync + fmt::Debug + Serialize + DeserializeOwned,
    A: Aggregate,
{
    /// Derive the report from `aggregate`, gathered over `elapsed` wall-clock time.
    fn from_aggregate(aggregate: A, elapsed: Duration) -> Self;
}

/// Hands a finished report to some sink.
#[async_trait]
pub trait Reporter<R: Sync> {
    async fn report(&self, report: &R) -> Result<(), ReportError>;
}

/// Statistics of a load test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestResults {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_duration: Duration,
    pub min_response_time: Duration,
    pub max_response_time: Duration,
    pub avg_response_time: Duration,
    pub p50_response_time: Duration,
    pub p90_response_time: Duration,
    pub p95_response_time: Duration,
    pub p99_response_time: Duration,
    pub requests_per_second: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    /// Failure count per error message.
    pub errors: BTreeMap<String, u64>,
}

impl Report<LatencyAggregate> for LoadTestResults {
    fn from_aggregate(aggregate: LatencyAggregate, elapsed: Duration) -> Self {
        let LatencyAggregate {
            mut latencies,
            total_latency,
            successful,
            failed,
            errors,
        } = aggregate;
        latencies.sort_unstable();

        let total = successful + failed;
        let ratio = |part: u64| {
            if total == 0 {
                0.0
            } else {
                part as f64 / total as f64
            }
        };
        let secs = elapsed.as_secs_f64();
        let avg = if total == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((total_latency.as_nanos() / u128::from(total)) as u64)
        };

        Self {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            total_duration: elapsed,
            min_response_time: latencies.first().copied().unwrap_or_default(),
            max_response_time: latencies.last().copied().unwrap_or_default(),
            avg_response_time: avg,
            p50_response_time: percentile(&latencies, 0.50),
            p90_response_time: percentile(&latencies, 0.90),
            p95_response_time: percentile(&latencies, 0.95),
            p99_response_time: percentile(&latencies, 0.99),
            requests_per_second: if secs > 0.0 { total as f64 / secs } else { 0.0 },
            success_rate: ratio(successful),
            error_rate: ratio(failed),
            errors,
        }
    }
}

/// Nearest-rank percentile over ascending `sorted`: the sample at `⌊(n-1)·p⌋`.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let last = sorted.len() - 1;
    let index = ((last as f64) * p.clamp(0.0, 1.0)).floor() as usize;
    sorted[index.min(last)]
}

/// Reduces raw [`RequestMetric`]s into [`LoadTestResults`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticsAggregator;

impl StatisticsAggregator {
    /// Input order does not matter and the metrics are not modified.
    pub fn aggregate(metrics: &[RequestMetric], total_duration: Duration) -> LoadTestResults {
        let mut aggregate = LatencyAggregate::new();
        aggregate.aggregate(metrics);
        LoadTestResults::from_aggregate(aggregate, total_duration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct PerformanceThresholds {
    #[builder(default, setter(strip_option))]
    pub max_response_time: Option<Duration>,
    #[builder(default, setter(strip_option))]
    pub p50_response_time: Option<Duration>,
    #[builder(default, setter(strip_option))]
    pub p90_response_time: Option<Duration>,
    #[builder(default, setter(strip_option))]
    pub p95_response_time: Option<Duration>,
    #[builder(default, setter(strip_option))]
    pub p99_response_time: Option<Duration>,
    #[builder(default, setter(strip_option))]
    pub min_requests_per_second: Option<f64>,
    #[builder(default = 0.05)]
    pub max_error_rate: f64,
    #[builder(default = 0.95)]
    pub min_success_rate: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdViolation {
    ResponseTime {
        metric: &'static str,
        limit: Duration,
        actual: Duration,
    },
    Throughput { limit: f64, actual: f64 },
    ErrorRate { limit: f64, actual: f64 },
    SuccessRate { limit: f64, actual: f64 },
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResponseTime {
                metric,
                limit,
                actual,
            } => write!(
                f,
                "{metric} response time {}ms exceeds {}ms",
                actual.as_millis(),
                limit.as_millis()
            ),
            Self::Throughput { limit, actual } => {
                write!(f, "throughput {actual:.2} req/s is below {limit:.2} req/s")
            }
            Self::ErrorRate { limit, actual } => write!(
                f,
                "error rate {:.2}% exceeds {:.2}%",
                actual * 100.0,
                limit * 100.0
            ),
            Self::SuccessRate { limit, actual } => write!(
                f,
                "success rate {:.2}% is below {:.2}%",
                actual * 100.0,
                limit * 100.0
            ),
        }
    }
}

impl LoadTestResults {
    pub fn meets_thresholds(&self, thresholds: &PerformanceThresholds) -> bool {
        self.threshold_violations(thresholds).is_empty()
    }

    pub fn threshold_violations(&self, thresholds: &PerformanceThresholds) -> Vec<ThresholdViolation> {
        let response_times = [
            ("max", thresholds.max_response_time, self.max_response_time),
            ("p50", thresholds.p50_response_time, self.p50_response_time),
            ("p90", thresholds.p90_response_time, self.p90_response_time),
            ("p95", thresholds.p95_response_time, self.p95_response_time),
            ("p99", thresholds.p99_response_time, self.p99_response_time),
        ];
        let mut violations: Vec<_> = response_times
            .into_iter()
            .filter_map(|(metric, limit, actual)| {
                let limit = limit?;
                (actual > limit).then_some(ThresholdViolation::ResponseTime {
                    metric,
                    limit,
                    actual,
                })
            })
            .collect();

        if let Some(limit) = thresholds.min_requests_per_second {
            if self.requests_per_second < limit {
                violations.push(ThresholdViolation::Throughput {
                    limit,
                    actual: self.requests_per_second,
                });
            }
        }
        if self.error_rate > thresholds.max_error_rate {
            violations.push(ThresholdViolation::ErrorRate {
                limit: thresholds.max_error_rate,
                actual: self.error_rate,
            });
        }
        if self.success_rate < thresholds.min_success_rate {
            violations.push(ThresholdViolation::SuccessRate {
                limit: thresholds.min_success_rate,
                actual: self.success_rate,
            });
        }
        violations
    }
}

impl fmt::Display for LoadTestResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Duration| d.as_millis();
        writeln!(f, "Load Test Results:")?;
        writeln!(f, "==================")?;
        writeln!(f, "Total Requests:     {}", self.total_requests)?;
        writeln!(f, "Successful:         {}", self.successful_requests)?;
        writeln!(f, "Failed:             {}", self.failed_requests)?;
        writeln!(f, "Success Rate:       {:.2}%", self.success_rate * 100.0)?;
        writeln!(f, "Error Rate:         {:.2}%", self.error_rate * 100.0)?;
        writeln!(f)?;
        writeln!(f, "Response Times:")?;
        writeln!(f, "==================")?;
        writeln!(f, "Min:                {}ms", ms(self.min_response_time))?;
        writeln!(f, "Max:                {}ms", ms(self.max_response_time))?;
        writeln!(f, "Average:            {}ms", ms(self.avg_response_time))?;
        writeln!(f, "p50 (median):       {}ms", ms(self.p50_response_time))?;
        writeln!(f, "p90:                {}ms", ms(self.p90_response_time))?;
        writeln!(f, "p95:                {}ms", ms(self.p95_response_time))?;
        writeln!(f, "p99:                {}ms", ms(self.p99_response_time))?;
        writeln!(f)?;
        writeln!(f, "Throughput:")?;
        writeln!(f, "==================")?;
        writeln!(f, "Requests/sec:       {:.2}", self.requests_per_second)?;
        write!(f, "Duration:           {}s", self.total_duration.as_secs())
    }
}

/// Emits reports as JSON on a `tracing` event. Installs no subscriber itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

#[async_trait]
impl Reporter<LoadTestResults> for TracingReporter {
    async fn report(&self, report: &LoadTestResults) -> Result<(), ReportError> {
        let json = serde_json::to_string(report)?;
        tracing::info!(
            total = report.total_requests,
            failed = report.failed_requests,
            p95_ms = report.p95_response_time.as_millis() as u64,
            rps = report.requests_per_second,
            report = %json,
            "Load test results"
        );
        Ok(())
    }
}

#[async_trait]
impl Reporter<ExecutionSummary> for TracingReporter {
    async fn report(&self, report: &ExecutionSummary) -> Result<(), ReportError> {
        let json = serde_json::to_string(report)?;
        tracing::info!(
            total = report.total,
            passed = report.passed,
            failed = report.failed,
            skipped = report.skipped,
            report = %json,
            "Execution summary"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[u64]) -> Vec<RequestMetric> {
        values
            .iter()
            .map(|&v| RequestMetric::success("s", 0, Duration::from_millis(v)))
            .collect()
    }

    #[test]
    fn exact_percentiles() {
        // Shuffled on purpose.
        let metrics = ms(&[70, 10, 100, 40, 20, 90, 30, 60, 50, 80]);
        let results = StatisticsAggregator::aggregate(&metrics, Duration::from_secs(2));

        assert_eq!(results.p50_response_time, Duration::from_millis(50));
        assert_eq!(results.p90_response_time, Duration::from_millis(90));
        assert_eq!(results.p95_response_time, Duration::from_millis(90));
        assert_eq!(results.p99_response_time, Duration::from_millis(90));
        assert_eq!(results.min_response_time, Duration::from_millis(10));
        assert_eq!(results.max_response_time, Duration::from_millis(100));
        assert_eq!(results.avg_response_time, Duration::from_millis(55));
        assert_eq!(results.requests_per_second, 5.0);
        assert_eq!(results.success_rate, 1.0);
        assert_eq!(results.error_rate, 0.0);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let samples = [3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8, 9, 7, 9, 3, 2, 3, 8, 4];
        for len in 1..=samples.len() {
            let results = StatisticsAggregator::aggregate(&ms(&samples[..len]), Duration::from_secs(1));
            assert!(results.min_response_time <= results.p50_response_time);
            assert!(results.p50_response_time <= results.p90_response_time);
            assert!(results.p90_response_time <= results.p95_response_time);
            assert!(results.p95_response_time <= results.p99_response_time);
            assert!(results.p99_response_time <= results.max_response_time);
        }
    }

    #[test]
    fn empty_input_is_all_zero() {
        let results = StatisticsAggregator::aggregate(&[], Duration::ZERO);
        assert_eq!(results.total_requests, 0);
        assert_eq!(results.p99_response_time, Duration::ZERO);
        assert_eq!(results.avg_response_time, Duration::ZERO);
        assert_eq!(results.requests_per_second, 0.0);
        assert_eq!(results.success_rate, 0.0);
        assert_eq!(results.error_rate, 0.0);
    }

    #[test]
    fn error_histogram_and_rates() {
        let mut metrics = ms(&[5, 5]);
        metrics.push(RequestMetric::failure("s", 0, Duration::from_millis(7), "503"));
        metrics.push(RequestMetric::failure("s", 0, Duration::from_millis(7), "503"));
        metrics.push(RequestMetric::failure("s", 0, Duration::from_millis(7), "reset"));

        let results = StatisticsAggregator::aggregate(&metrics, Duration::from_secs(1));
        assert_eq!(results.failed_requests, 3);
        assert_eq!(results.errors.get("503"), Some(&2));
        assert_eq!(results.errors.get("reset"), Some(&1));
        assert!((results.error_rate - 0.6).abs() < 1e-12);
        assert!((results.success_rate - 0.4).abs() < 1e-12);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let metrics = ms(&[12, 7, 33, 7, 100, 1]);
        let first = StatisticsAggregator::aggregate(&metrics, Duration::from_millis(1500));
        let second = StatisticsAggregator::aggregate(&metrics, Duration::from_millis(1500));
        assert_eq!(first, second);
        assert_eq!(
            first.requests_per_second.to_bits(),
            second.requests_per_second.to_bits()
        );
    }

    #[test]
    fn thresholds_report_each_violation() {
        let metrics = ms(&[10, 20, 30, 400]);
        let results = StatisticsAggregator::aggregate(&metrics, Duration::from_secs(4));

        let relaxed = PerformanceThresholds::default();
        assert!(results.meets_thresholds(&relaxed));

        let strict = PerformanceThresholds::builder()
            .max_response_time(Duration::from_millis(100))
            .min_requests_per_second(10.0)
            .build();
        let violations = results.threshold_violations(&strict);
        assert_eq!(violations.len(), 2);
        assert!(matches!(
            violations[0],
            ThresholdViolation::ResponseTime { metric: "max", .. }
        ));
        assert!(matches!(violations[1], ThresholdViolation::Throughput { .. }));
    }

    #[test]
    fn summary_mentions_the_key_numbers() {
        let results = StatisticsAggregator::aggregate(&ms(&[10, 20]), Duration::from_secs(1));
        let text = results.to_string();
        assert!(text.contains("Total Requests:     2"));
        assert!(text.contains("p50 (median):       10ms"));
        assert!(text.contains("Requests/sec:       2.00"));
    }
}
