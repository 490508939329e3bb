//! Barrage: the execution engine behind an API testing toolkit.
//!
//! Barrage runs the same scenarios in two ways. The [`FunctionalExecutor`]
//! runs each scenario once, with retries, timeouts and optional parallelism,
//! and reports pass/fail per scenario. The [`LoadGenerator`] drives scenarios
//! with many virtual users for a fixed duration and reduces every iteration
//! into latency percentiles, throughput and error rates.
//!
//! The engine knows nothing about HTTP or any other protocol. A step is an
//! async closure returning `Result<(), StepError>`; what it does is up to the
//! caller.
//!
//! # Architecture
//!
//! - [`Scenario`]: a named, tagged list of steps with before and after hooks.
//!   [`Suite`](scenario::Suite) adds hooks shared by several scenarios.
//! - [`TestFilter`]: selects scenarios by tag, name or pattern.
//! - [`RetryPolicy`]: bounded retries with exponential backoff.
//! - [`ExecutionListener`]: lifecycle callbacks for progress reporting.
//! - [`FunctionalExecutor`]: runs a filtered batch and returns an
//!   [`ExecutionSummary`](outcome::ExecutionSummary).
//! - [`LoadGenerator`]: spawns virtual users following a
//!   [`LoadProfile`](load::LoadProfile), optionally capped by a token governor.
//! - [`Metric`] and [`Aggregate`]: a virtual user produces one
//!   [`RequestMetric`](metric::RequestMetric) per iteration; aggregates
//!   collect them in a mergeable form.
//! - [`Report`] and [`Reporter`]: a report derives final statistics from an
//!   aggregate and a reporter ships it somewhere.
//!   [`StatisticsAggregator`] goes straight from metrics to
//!   [`LoadTestResults`](report::LoadTestResults).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use barrage::{
//!     ExecutionConfig, FunctionalExecutor, Reporter, Scenario, TestFilter,
//!     error::StepError,
//!     load::{LoadGenerator, LoadScenario, LoadTestConfig},
//!     report::TracingReporter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let login = Scenario::new("login")
//!         .tag("smoke")
//!         .step("submit credentials", || async {
//!             tokio::time::sleep(Duration::from_millis(20)).await;
//!             Ok::<_, StepError>(())
//!         });
//!
//!     let summary = FunctionalExecutor::new(ExecutionConfig::builder().parallel(true).build())
//!         .run(vec![login.clone()], &TestFilter::default().with_tags(["smoke"]))
//!         .await?;
//!     TracingReporter.report(&summary).await?;
//!
//!     let results = LoadGenerator::new(LoadTestConfig::smoke())
//!         .run(vec![LoadScenario::from_scenario(login, 1.0)])
//!         .await?;
//!     println!("{results}");
//!     Ok(())
//! }
//! ```
//!
//! # Where to start
//!
//! - Read the docs for [`FunctionalExecutor`] and [`LoadGenerator`].
//! - See `examples/` for a runnable smoke test (`examples/smoke.rs`).

/// Metric aggregators
pub mod aggregate;
/// Load test files in TOML or JSON
pub mod config;
/// Error types
pub mod error;
/// Functional batch execution
pub mod executor;
/// Scenario selection
pub mod filter;
/// Lifecycle callbacks
pub mod listener;
/// Virtual users and load profiles
pub mod load;
/// Single metrics
pub mod metric;
/// Per-scenario and per-batch results
pub mod outcome;
/// Reports and Reporters
pub mod report;
/// Bounded retries with backoff
pub mod retry;
/// Scenarios, steps and suites
pub mod scenario;

pub use aggregate::Aggregate;
pub use executor::{ExecutionConfig, FunctionalExecutor};
pub use filter::TestFilter;
pub use listener::ExecutionListener;
pub use load::{LoadGenerator, LoadTestConfig};
pub use metric::Metric;
pub use report::{Report, Reporter, StatisticsAggregator};
pub use retry::{RetryConfig, RetryPolicy};
pub use scenario::Scenario;
