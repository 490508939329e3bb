use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::metric::{Metric, RequestMetric};

/// Collects [`Metric`]s into a mergeable intermediate form.
///
/// An aggregate keeps raw material such as counts, sums, samples and error
/// tallies. It does not compute percentiles or rates; that belongs to the
/// [`Report`](crate::report::Report) built from it.
///
/// Virtual users each keep their own aggregate and the load generator merges
/// them once every user has exited, so `merge` must be associative and
/// commutative.
///
/// ```rust
/// use std::time::Duration;
/// use barrage::{Aggregate, aggregate::LatencyAggregate, metric::RequestMetric};
///
/// let mut left = LatencyAggregate::new();
/// left.consume(&RequestMetric::success("a", 0, Duration::from_millis(5)));
/// let mut right = LatencyAggregate::new();
/// right.consume(&RequestMetric::failure("a", 0, Duration::from_millis(9), "503"));
///
/// left.merge(right);
/// assert_eq!(left.count(), 2);
/// ```
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
    type Metric: Metric;

    fn new() -> Self;

    /// Consume every metric in `metrics`.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    fn consume(&mut self, metric: &Self::Metric);

    fn merge(&mut self, other: Self);
}

/// Raw latency samples plus outcome and error tallies.
///
/// Every latency is kept so the report can use exact nearest-rank
/// percentiles. Memory grows linearly with the number of iterations.
#[derive(Debug, Clone, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct LatencyAggregate {
    pub latencies: Vec<Duration>,
    pub total_latency: Duration,
    pub successful: u64,
    pub failed: u64,
    pub errors: BTreeMap<String, u64>,
}

impl LatencyAggregate {
    pub fn count(&self) -> u64 {
        self.successful + self.failed
    }
}

impl Aggregate for LatencyAggregate {
    type Metric = RequestMetric;

    fn new() -> Self {
        Self::default()
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.latencies.push(metric.duration);
        self.total_latency += metric.duration;
        if metric.success {
            self.successful += 1;
        } else {
            self.failed += 1;
            if let Some(error) = &metric.error {
                *self.errors.entry(error.clone()).or_default() += 1;
            }
        }
    }

    fn merge(&mut self, other: Self) {
        self.latencies.extend(other.latencies);
        self.total_latency += other.total_latency;
        self.successful += other.successful;
        self.failed += other.failed;
        for (error, count) in other.errors {
            *self.errors.entry(error).or_default() += count;
        }
    }
}
