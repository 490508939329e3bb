//! Lifecycle callbacks for functional runs.
//!
//! Implement [`ExecutionListener`] to drive progress bars, log streams or
//! collectors. Every method has a no-op default. Listeners are called in
//! registration order, and one that panics is logged and skipped; it never
//! takes the batch down with it.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    error::panic_message,
    outcome::{ExecutionOutcome, ExecutionStatus, ExecutionSummary},
};

pub trait ExecutionListener: Send + Sync {
    fn on_execution_start(&self) {}
    fn on_scenario_start(&self, _name: &str) {}
    fn on_scenario_complete(&self, _name: &str, _outcome: &ExecutionOutcome) {}
    fn on_execution_complete(&self, _summary: &ExecutionSummary) {}
}

/// Ordered set of listeners with panic isolation.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Vec<Arc<dyn ExecutionListener>>,
}

impl Listeners {
    pub fn new(inner: Vec<Arc<dyn ExecutionListener>>) -> Self {
        Self { inner }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn execution_start(&self) {
        self.each("on_execution_start", |l| l.on_execution_start());
    }

    pub fn scenario_start(&self, name: &str) {
        self.each("on_scenario_start", |l| l.on_scenario_start(name));
    }

    pub fn scenario_complete(&self, name: &str, outcome: &ExecutionOutcome) {
        self.each("on_scenario_complete", |l| {
            l.on_scenario_complete(name, outcome)
        });
    }

    pub fn execution_complete(&self, summary: &ExecutionSummary) {
        self.each("on_execution_complete", |l| l.on_execution_complete(summary));
    }

    fn each(&self, callback: &'static str, f: impl Fn(&dyn ExecutionListener)) {
        for (index, listener) in self.inner.iter().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
                tracing::error!(
                    listener = index,
                    callback,
                    "Listener panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.inner.len())
            .finish()
    }
}

impl From<Vec<Arc<dyn ExecutionListener>>> for Listeners {
    fn from(inner: Vec<Arc<dyn ExecutionListener>>) -> Self {
        Self::new(inner)
    }
}

/// Reports progress through `tracing`.
#[derive(Debug)]
pub struct ProgressListener {
    total: usize,
    verbose: bool,
    completed: AtomicUsize,
}

impl ProgressListener {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            verbose: false,
            completed: AtomicUsize::new(0),
        }
    }

    /// Log each scenario start and result instead of a running percentage.
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}

impl ExecutionListener for ProgressListener {
    fn on_execution_start(&self) {
        tracing::info!(total = self.total, "Starting test execution...");
    }

    fn on_scenario_start(&self, name: &str) {
        if self.verbose {
            tracing::info!(scenario = name, "Running");
        }
    }

    fn on_scenario_complete(&self, name: &str, outcome: &ExecutionOutcome) {
        let count = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let percentage = (count * 100).checked_div(self.total).unwrap_or(100);
        let mark = match outcome.status {
            ExecutionStatus::Passed => "✓",
            ExecutionStatus::Failed => "✗",
            ExecutionStatus::Skipped => "⊘",
        };
        if self.verbose {
            tracing::info!(
                scenario = name,
                status = ?outcome.status,
                duration_ms = outcome.duration.as_millis() as u64,
                "{mark} {name}"
            );
        } else {
            tracing::info!("Progress: {percentage}% ({count}/{})", self.total);
        }
    }

    fn on_execution_complete(&self, summary: &ExecutionSummary) {
        tracing::info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            duration_ms = summary.duration.as_millis() as u64,
            "Test execution summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Exploding;

    impl ExecutionListener for Exploding {
        fn on_scenario_start(&self, _name: &str) {
            panic!("listener bug");
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl ExecutionListener for Recording {
        fn on_scenario_start(&self, name: &str) {
            self.0.lock().push(name.to_string());
        }
    }

    #[test]
    fn panicking_listener_does_not_stop_the_others() {
        let recording = Arc::new(Recording::default());
        let all: Vec<Arc<dyn ExecutionListener>> = vec![Arc::new(Exploding), recording.clone()];
        let listeners = Listeners::new(all);

        listeners.scenario_start("first");
        listeners.scenario_start("second");

        assert_eq!(*recording.0.lock(), ["first", "second"]);
    }

    #[test]
    fn progress_counts_completions() {
        let progress = ProgressListener::new(2);
        let outcome = ExecutionOutcome::skipped("a");
        progress.on_scenario_complete("a", &outcome);
        progress.on_scenario_complete("b", &outcome);
        assert_eq!(progress.completed(), 2);
    }
}
