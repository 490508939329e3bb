use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use barrage::{
    ExecutionConfig, ExecutionListener, FunctionalExecutor, LoadGenerator, LoadTestConfig,
    Reporter, RetryConfig, Scenario, TestFilter,
    error::StepError,
    listener::ProgressListener,
    load::{LoadProfile, LoadScenario},
    report::TracingReporter,
};
use tracing_subscriber::EnvFilter;

/// Stand-in for a real API call: slow-ish, and every seventh call fails.
async fn fake_request(calls: &AtomicU64) -> Result<(), StepError> {
    let n = calls.fetch_add(1, Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(20 + n % 30)).await;
    if n % 7 == 6 {
        return Err(StepError::new("HTTP 503"));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // NEVER build heavy things like clients inside a step, share them instead
    let calls = Arc::new(AtomicU64::new(0));
    let request = {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            async move { fake_request(&calls).await }
        }
    };

    let scenarios = vec![
        Scenario::new("list users")
            .tag("smoke")
            .step("GET /users", request.clone()),
        Scenario::new("create user")
            .tags(["smoke", "write"])
            .step("POST /users", request.clone())
            .step("GET /users/{id}", request.clone()),
        Scenario::new("bulk import")
            .tag("slow")
            .step("POST /import", request.clone()),
    ];

    let filter = TestFilter::new().with_tags(["smoke"]);
    let progress: Vec<Arc<dyn ExecutionListener>> = vec![Arc::new(ProgressListener::new(2).verbose())];
    let config = ExecutionConfig::builder()
        .parallel(true)
        .max_parallel(2)
        .retry(
            RetryConfig::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(100))
                .build(),
        )
        .listeners(progress)
        .build();
    let summary = FunctionalExecutor::new(config)
        .run(scenarios.clone(), &filter)
        .await?;
    TracingReporter.report(&summary).await?;

    let load = LoadTestConfig::builder()
        .users(20)
        .duration(Duration::from_secs(10))
        .ramp_up(Duration::from_secs(2))
        .profile(LoadProfile::RampUp)
        .report_interval(Duration::from_secs(2))
        .think_time(Duration::from_millis(50))
        .build();
    let thresholds = load.thresholds();
    let load_scenarios = scenarios
        .into_iter()
        .filter(|s| filter.matches(s.reference()))
        .map(|s| LoadScenario::from_scenario(s, 1.0))
        .collect();
    let results = LoadGenerator::new(load).run(load_scenarios).await?;

    println!("{results}");
    for violation in results.threshold_violations(&thresholds) {
        println!("threshold violated: {violation}");
    }
    TracingReporter.report(&results).await?;
    Ok(())
}
