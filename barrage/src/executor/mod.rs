//! Functional executor: runs a batch of scenarios and summarizes the outcome.
//!
//! The [`FunctionalExecutor`] takes a list of [`Scenario`]s, keeps the ones the
//! [`TestFilter`] selects and runs each exactly once through a [`RetryPolicy`].
//! Every filtered-in scenario ends up with one [`ExecutionOutcome`]: passed,
//! failed or skipped.
//!
//! # High-level flow
//! 1. Validate the [`ExecutionConfig`]. Nothing runs if it is invalid.
//! 2. Filter the scenarios and reject duplicate names (outcomes are keyed by name).
//! 3. Notify listeners that the batch started.
//! 4. Run the scenarios:
//!    - sequentially, in input order, or
//!    - in parallel, with a `tokio::sync::Semaphore` limiting how many run at once
//!      to `max_parallel`.
//! 5. Build the [`ExecutionSummary`] from the recorded outcomes and the atomic
//!    pass/fail/skip counters, then notify listeners once more.
//!
//! # Attempts
//! An attempt runs the scenario's before-hooks, steps and after-hooks in order
//! and stops at the first failure. Steps are never retried on their own. The
//! retry policy decides whether the whole scenario gets another attempt. Each
//! attempt is bounded by `timeout`. A timeout is an ordinary failure and can be
//! retried. A panic inside a step is caught and recorded as a failure.
//!
//! # Fail-fast
//! With `fail_fast`, a scenario that is about to start is skipped once any
//! failure has been recorded. In parallel mode the check happens when a
//! scenario obtains its permit. Scenarios already running when the first
//! failure lands finish normally, so how many get skipped depends on timing.
//!
//! # Cancellation
//! [`FunctionalExecutor::cancel_token`] stops the batch early. Scenarios that
//! have not started are skipped. Running attempts end with
//! [`Failure::Cancelled`] and are not retried. A cancelled executor stays
//! cancelled.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{FutureExt, future::join_all};
use parking_lot::Mutex;
use tokio::{sync::Semaphore, time::Instant};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::{
    error::{ConfigError, ExecutionError, Failure, panic_message},
    filter::TestFilter,
    listener::Listeners,
    outcome::{ExecutionOutcome, ExecutionStatus, ExecutionSummary, StepOutcome},
    retry::{RetryConfig, RetryPolicy},
    scenario::{Scenario, Suite},
};

/// Classifies failures as worth retrying or not.
pub type RetryPredicate = Arc<dyn Fn(&Failure) -> bool + Send + Sync>;

fn always_retry() -> RetryPredicate {
    Arc::new(|_| true)
}

#[derive(Clone, TypedBuilder)]
pub struct ExecutionConfig {
    /// Run scenarios concurrently instead of in input order.
    #[builder(default = false)]
    pub parallel: bool,
    /// Scenarios allowed to run at once in parallel mode. Defaults to the CPU count.
    #[builder(default = num_cpus::get())]
    pub max_parallel: usize,
    /// Skip scenarios that have not started once anything has failed.
    #[builder(default = false)]
    pub fail_fast: bool,
    /// Upper bound for a single attempt.
    #[builder(default = Duration::from_secs(300))]
    pub timeout: Duration,
    /// Applied to whole scenarios, never to single steps.
    #[builder(default)]
    pub retry: RetryConfig,
    /// Decides which failures get another attempt. Retries everything by default.
    #[builder(default = always_retry())]
    pub retryable: RetryPredicate,
    #[builder(default, setter(into))]
    pub listeners: Listeners,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel == 0 {
            return Err(ConfigError::MaxParallelZero);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        self.retry.validate()
    }
}

impl fmt::Debug for ExecutionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionConfig")
            .field("parallel", &self.parallel)
            .field("max_parallel", &self.max_parallel)
            .field("fail_fast", &self.fail_fast)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct FunctionalExecutor {
    config: ExecutionConfig,
    cancel: CancellationToken,
}

impl FunctionalExecutor {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run_suites(
        &self,
        suites: Vec<Suite>,
        filter: &TestFilter,
    ) -> Result<ExecutionSummary, ExecutionError> {
        let scenarios = suites.into_iter().flat_map(Suite::into_scenarios).collect();
        self.run(scenarios, filter).await
    }

    pub async fn run(
        &self,
        scenarios: Vec<Scenario>,
        filter: &TestFilter,
    ) -> Result<ExecutionSummary, ExecutionError> {
        self.config.validate()?;

        let selected: Vec<Scenario> = scenarios
            .into_iter()
            .filter(|s| filter.matches(s.reference()))
            .collect();
        let mut seen = HashSet::with_capacity(selected.len());
        for scenario in &selected {
            if !seen.insert(scenario.name()) {
                return Err(ConfigError::DuplicateScenario(scenario.name().to_string()).into());
            }
        }
        let order: Vec<String> = selected.iter().map(|s| s.name().to_string()).collect();

        tracing::info!(
            scenarios = selected.len(),
            parallel = self.config.parallel,
            "Starting execution"
        );
        let started = Instant::now();
        let batch = Arc::new(Batch::new(self.config.clone(), self.cancel.clone()));
        batch.config.listeners.execution_start();

        if self.config.parallel {
            batch.run_parallel(selected).await?;
        } else {
            batch.run_sequential(selected).await;
        }

        let summary = batch.summarize(&order, started.elapsed());
        tracing::info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Execution finished"
        );
        batch.config.listeners.execution_complete(&summary);
        Ok(summary)
    }
}

/// Failure of one attempt, with whatever steps completed before it.
#[derive(Debug)]
struct FailedAttempt {
    failure: Failure,
    steps: Vec<StepOutcome>,
}

impl From<Failure> for FailedAttempt {
    fn from(failure: Failure) -> Self {
        Self {
            failure,
            steps: Vec::new(),
        }
    }
}

impl fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.failure.fmt(f)
    }
}

/// State shared by every worker of one `run` call.
struct Batch {
    config: ExecutionConfig,
    policy: RetryPolicy,
    cancel: CancellationToken,
    results: Mutex<HashMap<String, ExecutionOutcome>>,
    passed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl Batch {
    fn new(config: ExecutionConfig, cancel: CancellationToken) -> Self {
        let policy = RetryPolicy::new(config.retry).with_cancellation(cancel.clone());
        Self {
            config,
            policy,
            cancel,
            results: Mutex::new(HashMap::new()),
            passed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    async fn run_sequential(&self, scenarios: Vec<Scenario>) {
        for scenario in scenarios {
            if self.should_skip() {
                self.skip(scenario.name());
                continue;
            }
            self.execute(&scenario).await;
        }
    }

    async fn run_parallel(self: &Arc<Self>, scenarios: Vec<Scenario>) -> Result<(), ExecutionError> {
        let permits = Arc::new(Semaphore::new(self.config.max_parallel));
        let handles: Vec<_> = scenarios
            .into_iter()
            .map(|scenario| {
                let batch = Arc::clone(self);
                let permits = Arc::clone(&permits);
                tokio::spawn(async move {
                    // Held until the scenario's outcome is recorded.
                    let _permit = permits.acquire_owned().await;
                    if batch.should_skip() {
                        batch.skip(scenario.name());
                    } else {
                        batch.execute(&scenario).await;
                    }
                })
            })
            .collect();

        for handle in join_all(handles).await {
            handle?;
        }
        Ok(())
    }

    fn should_skip(&self) -> bool {
        self.cancel.is_cancelled()
            || (self.config.fail_fast && self.failed.load(Ordering::SeqCst) > 0)
    }

    fn skip(&self, name: &str) {
        tracing::debug!(scenario = name, "Skipping scenario");
        self.record(ExecutionOutcome::skipped(name));
    }

    async fn execute(&self, scenario: &Scenario) {
        let name = scenario.name();
        self.config.listeners.scenario_start(name);
        let started = Instant::now();

        let retryable = &self.config.retryable;
        let attempted = self
            .policy
            .execute_tracked(
                || self.attempt(scenario),
                |failed: &FailedAttempt| {
                    !matches!(failed.failure, Failure::Cancelled) && retryable(&failed.failure)
                },
            )
            .await;

        let duration = started.elapsed();
        let outcome = match attempted.result {
            Ok(steps) => ExecutionOutcome {
                scenario_name: name.to_string(),
                status: ExecutionStatus::Passed,
                duration,
                error: None,
                steps,
                attempts: attempted.attempts,
            },
            Err(FailedAttempt { failure, steps }) => {
                tracing::warn!(
                    scenario = name,
                    attempts = attempted.attempts,
                    "Scenario failed: {failure}"
                );
                ExecutionOutcome {
                    scenario_name: name.to_string(),
                    status: ExecutionStatus::Failed,
                    duration,
                    error: Some(failure),
                    steps,
                    attempts: attempted.attempts,
                }
            }
        };
        self.record(outcome);
    }

    async fn attempt(&self, scenario: &Scenario) -> Result<Vec<StepOutcome>, FailedAttempt> {
        let timeout = self.config.timeout;
        let run = AssertUnwindSafe(scenario.run_once()).catch_unwind();

        let report = tokio::select! {
            res = tokio::time::timeout(timeout, run) => match res {
                Ok(Ok(report)) => report,
                Ok(Err(payload)) => {
                    return Err(Failure::Panicked {
                        message: panic_message(payload.as_ref()),
                    }
                    .into());
                }
                Err(_) => return Err(Failure::Timeout { after: timeout }.into()),
            },
            _ = self.cancel.cancelled() => return Err(Failure::Cancelled.into()),
        };

        match report.failure {
            None => Ok(report.steps),
            Some(failure) => Err(FailedAttempt {
                failure,
                steps: report.steps,
            }),
        }
    }

    fn record(&self, outcome: ExecutionOutcome) {
        let counter = match outcome.status {
            ExecutionStatus::Passed => &self.passed,
            ExecutionStatus::Failed => &self.failed,
            ExecutionStatus::Skipped => &self.skipped,
        };
        let name = outcome.scenario_name.clone();
        self.results.lock().insert(name.clone(), outcome.clone());
        counter.fetch_add(1, Ordering::SeqCst);
        self.config.listeners.scenario_complete(&name, &outcome);
    }

    fn summarize(&self, order: &[String], duration: Duration) -> ExecutionSummary {
        let mut results = self.results.lock();
        let outcomes: Vec<ExecutionOutcome> =
            order.iter().filter_map(|name| results.remove(name)).collect();
        ExecutionSummary {
            total: outcomes.len(),
            passed: self.passed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            duration,
            outcomes,
        }
    }
}
