use std::{
    collections::HashSet,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::{FutureExt, future::join_all};
use tokio::{sync::Semaphore, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{LoadTestConfig, profile, rate::Governor};
use crate::{
    aggregate::{Aggregate, LatencyAggregate},
    error::{ConfigError, LoadError, StepError, panic_message},
    metric::RequestMetric,
    report::{LoadTestResults, Report},
    scenario::{Action, Scenario, action},
};

/// How far ahead an instant that would overflow is clamped to.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A weighted action driven by virtual users.
#[derive(Clone)]
pub struct LoadScenario {
    name: String,
    /// Relative share of the virtual users. Must be finite and positive.
    weight: f64,
    /// Called once per iteration.
    action: Action,
}

impl LoadScenario {
    pub fn new<F, Fut>(name: impl Into<String>, weight: f64, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        Self::from_action(name, weight, action(f))
    }

    pub fn from_action(name: impl Into<String>, weight: f64, action: Action) -> Self {
        Self {
            name: name.into(),
            weight,
            action,
        }
    }

    /// Drive a functional [`Scenario`] under load. One iteration is one
    /// `run_once`, hooks included.
    pub fn from_scenario(scenario: Scenario, weight: f64) -> Self {
        let name = scenario.name().to_string();
        let scenario = Arc::new(scenario);
        Self::new(name, weight, move || {
            let scenario = scenario.clone();
            async move {
                match scenario.run_once().await.failure {
                    Some(failure) => Err(StepError::new(failure.message())),
                    None => Ok(()),
                }
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }
}

impl std::fmt::Debug for LoadScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadScenario")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// Results of a run together with the samples they were computed from.
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub results: LoadTestResults,
    pub metrics: Vec<RequestMetric>,
    /// Unix epoch milliseconds at which the run started.
    pub started_at_millis: u64,
}

/// Runs [`LoadScenario`]s with the shape described by a [`LoadTestConfig`].
#[derive(Debug)]
pub struct LoadGenerator {
    config: LoadTestConfig,
    cancel: CancellationToken,
}

/// State shared by every task of one run.
struct RunContext {
    start: Instant,
    end: Instant,
    epoch_millis: u64,
    think_time: Duration,
    cancel: CancellationToken,
    tokens: Option<Arc<Semaphore>>,
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// What one virtual user hands back when it exits.
struct UserRun {
    metrics: Vec<RequestMetric>,
    aggregate: LatencyAggregate,
}

/// Where a virtual user sits in its scenario's schedule.
struct Slot {
    scenario: Arc<str>,
    action: Action,
    delay: Duration,
    exit_offset: Duration,
}

impl LoadGenerator {
    pub fn new(config: LoadTestConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    /// Cancelling stops every user at its next iteration boundary and
    /// aborts pending start delays. Metrics gathered so far are kept.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, scenarios: Vec<LoadScenario>) -> Result<LoadTestResults, LoadError> {
        Ok(self.run_recorded(scenarios).await?.results)
    }

    pub async fn run_recorded(&self, scenarios: Vec<LoadScenario>) -> Result<RecordedRun, LoadError> {
        self.config.validate()?;
        validate_scenarios(&scenarios)?;

        let config = &self.config;
        let allocation = allocate_users(config.users, &scenarios);
        let start = Instant::now();
        let epoch_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let user_cancel = self.cancel.child_token();
        let background = user_cancel.child_token();
        let governor = config
            .requests_per_second
            .map(|rate| Governor::spawn(rate, background.clone()));

        let ctx = Arc::new(RunContext {
            start,
            end: later(start, config.duration),
            epoch_millis,
            think_time: config.think_time,
            cancel: user_cancel,
            tokens: governor.as_ref().map(|g| g.tokens.clone()),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        tracing::info!(
            users = config.users,
            duration_ms = config.duration.as_millis() as u64,
            profile = %config.profile,
            "Starting load test..."
        );
        let reporter = tokio::spawn(report_progress(
            ctx.clone(),
            config.report_interval,
            background.clone(),
        ));

        tracing::info!("Spawning virtual users...");
        let mut handles = Vec::new();
        for (scenario, users) in scenarios.iter().zip(allocation) {
            tracing::debug!(scenario = scenario.name(), users, "Allocated virtual users");
            let name: Arc<str> = Arc::from(scenario.name());
            for index in 0..users {
                let slot = Slot {
                    scenario: name.clone(),
                    action: scenario.action.clone(),
                    delay: profile::start_delay(config.profile, index, users, config.ramp_up),
                    exit_offset: profile::exit_offset(config.profile, index, users, config.duration),
                };
                handles.push(tokio::spawn(virtual_user(ctx.clone(), slot)));
            }
        }

        let joined = join_all(handles).await;
        let elapsed = start.elapsed();
        background.cancel();
        reporter.await?;
        if let Some(governor) = governor {
            governor.handle.await?;
        }

        tracing::info!("Processing results...");
        let mut metrics = Vec::new();
        let mut aggregate = LatencyAggregate::new();
        for user in joined {
            let user = user?;
            metrics.extend(user.metrics);
            aggregate.merge(user.aggregate);
        }
        let results = LoadTestResults::from_aggregate(aggregate, elapsed);
        tracing::info!(
            total = results.total_requests,
            failed = results.failed_requests,
            elapsed_ms = elapsed.as_millis() as u64,
            "Load test finished"
        );

        Ok(RecordedRun {
            results,
            metrics,
            started_at_millis: epoch_millis,
        })
    }
}

fn validate_scenarios(scenarios: &[LoadScenario]) -> Result<(), ConfigError> {
    if scenarios.is_empty() {
        return Err(ConfigError::NoScenarios);
    }
    let mut seen = HashSet::new();
    for scenario in scenarios {
        if !seen.insert(scenario.name.as_str()) {
            return Err(ConfigError::DuplicateScenario(scenario.name.clone()));
        }
        if !scenario.weight.is_finite() || scenario.weight <= 0.0 {
            return Err(ConfigError::InvalidWeight {
                name: scenario.name.clone(),
                weight: scenario.weight,
            });
        }
    }
    Ok(())
}

/// Users per scenario. A single scenario gets every user; several get
/// `round(users * weight / total_weight)` each, so the sum may drift from
/// `users` by rounding.
fn allocate_users(users: usize, scenarios: &[LoadScenario]) -> Vec<usize> {
    if let [_] = scenarios {
        return vec![users];
    }
    let total: f64 = scenarios.iter().map(|s| s.weight).sum();
    scenarios
        .iter()
        .map(|s| (users as f64 * s.weight / total).round() as usize)
        .collect()
}

/// `at + by`, clamped to a far-future instant instead of overflowing.
fn later(at: Instant, by: Duration) -> Instant {
    at.checked_add(by)
        .unwrap_or_else(|| at.checked_add(FAR_FUTURE).unwrap_or(at))
}

async fn virtual_user(ctx: Arc<RunContext>, slot: Slot) -> UserRun {
    let mut metrics = Vec::new();
    let mut aggregate = LatencyAggregate::new();
    let begin = later(ctx.start, slot.delay).min(ctx.end);
    tokio::select! {
        _ = ctx.cancel.cancelled() => return UserRun { metrics, aggregate },
        _ = tokio::time::sleep_until(begin) => {}
    }
    let deadline = ctx.end.checked_sub(slot.exit_offset).unwrap_or(ctx.start);

    ctx.active.fetch_add(1, Ordering::Relaxed);
    loop {
        let now = Instant::now();
        if now >= ctx.end || ctx.cancel.is_cancelled() {
            break;
        }
        if !metrics.is_empty() && now >= deadline {
            break;
        }
        if let Some(tokens) = &ctx.tokens {
            tokio::select! {
                permit = tokens.acquire() => match permit {
                    Ok(p) => p.forget(),
                    Err(_) => break,
                },
                _ = tokio::time::sleep_until(ctx.end) => break,
                _ = ctx.cancel.cancelled() => break,
            }
        }

        let metric = ctx.iterate(&slot.scenario, &slot.action).await;
        aggregate.consume(&metric);
        metrics.push(metric);

        if !ctx.think_time.is_zero() {
            let wake = later(Instant::now(), ctx.think_time).min(ctx.end);
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
    ctx.active.fetch_sub(1, Ordering::Relaxed);
    UserRun { metrics, aggregate }
}

impl RunContext {
    async fn iterate(&self, scenario: &str, action: &Action) -> RequestMetric {
        let started = Instant::now();
        let timestamp = self.epoch_millis + started.duration_since(self.start).as_millis() as u64;
        let outcome = AssertUnwindSafe(async { action().await })
            .catch_unwind()
            .await;
        let duration = started.elapsed();

        self.completed.fetch_add(1, Ordering::Relaxed);
        let error = match outcome {
            Ok(Ok(())) => return RequestMetric::success(scenario, timestamp, duration),
            Ok(Err(err)) => err.message().to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(scenario, error = %error, "Iteration failed");
        RequestMetric::failure(scenario, timestamp, duration, error)
    }
}

async fn report_progress(ctx: Arc<RunContext>, interval: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval_at(later(ctx.start, interval), interval);
    let mut last_tick = ctx.start;
    let mut last_completed = 0;

    loop {
        let now = tokio::select! {
            _ = stop.cancelled() => break,
            now = ticker.tick() => now,
        };
        let completed = ctx.completed.load(Ordering::Relaxed);
        let window = now.duration_since(last_tick).as_secs_f64();
        let rps = if window > 0.0 {
            (completed - last_completed) as f64 / window
        } else {
            0.0
        };
        tracing::info!(
            elapsed_s = now.duration_since(ctx.start).as_secs(),
            active = ctx.active.load(Ordering::Relaxed),
            completed,
            failed = ctx.failed.load(Ordering::Relaxed),
            "Progress: {rps:.1} req/s"
        );
        last_tick = now;
        last_completed = completed;
    }
}
