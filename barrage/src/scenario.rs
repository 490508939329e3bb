use std::{collections::BTreeSet, fmt, sync::Arc};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{
    error::{Failure, StepError},
    outcome::{ExecutionStatus, StepOutcome},
};

/// A unit of work supplied by the caller. Called once per execution.
pub type Action = Arc<dyn Fn() -> BoxFuture<'static, Result<(), StepError>> + Send + Sync>;

/// Box a closure into an [`Action`].
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Identity of a runnable scenario.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioRef {
    pub name: String,
    pub tags: BTreeSet<String>,
}

impl ScenarioRef {
    pub fn new<I, S>(name: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

/// A named step or hook.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    action: Action,
}

impl Step {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        Self::from_action(name, action(f))
    }

    pub fn from_action(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }

    pub fn run(&self) -> BoxFuture<'static, Result<(), StepError>> {
        (self.action)()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// Steps, and hooks around them, recorded by a single attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub steps: Vec<StepOutcome>,
    pub failure: Option<Failure>,
}

/// An ordered list of steps under one name.
///
/// ```rust
/// use barrage::scenario::Scenario;
///
/// let scenario = Scenario::new("create user")
///     .tag("smoke")
///     .step("POST /users", || async { Ok(()) })
///     .step("GET /users/1", || async { Ok(()) });
/// assert_eq!(scenario.steps().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Scenario {
    reference: ScenarioRef,
    before: Vec<Step>,
    steps: Vec<Step>,
    after: Vec<Step>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            reference: ScenarioRef::new(name, std::iter::empty::<String>()),
            before: Vec::new(),
            steps: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.reference.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reference.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn step<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.steps.push(Step::new(name, f));
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Runs before the steps of every attempt.
    pub fn before(mut self, hook: Step) -> Self {
        self.before.push(hook);
        self
    }

    /// Runs after the steps of every attempt that got that far.
    pub fn after(mut self, hook: Step) -> Self {
        self.after.push(hook);
        self
    }

    pub fn reference(&self) -> &ScenarioRef {
        &self.reference
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run hooks and steps in order, stopping at the first failure.
    pub async fn run_once(&self) -> AttemptReport {
        let mut steps = Vec::with_capacity(self.steps.len());

        for hook in &self.before {
            if let Err(err) = hook.run().await {
                return AttemptReport {
                    steps,
                    failure: Some(hook_failure(hook, err)),
                };
            }
        }

        for step in &self.steps {
            tracing::debug!(scenario = %self.name(), step = %step.name, "Executing step");
            let started = Instant::now();
            let result = step.run().await;
            let duration = started.elapsed();
            match result {
                Ok(()) => steps.push(StepOutcome {
                    name: step.name.clone(),
                    status: ExecutionStatus::Passed,
                    duration,
                    error: None,
                }),
                Err(err) => {
                    let failure = Failure::Step {
                        step: step.name.clone(),
                        message: err.message().to_string(),
                    };
                    tracing::debug!(scenario = %self.name(), step = %step.name, error = %err, "Step failed");
                    steps.push(StepOutcome {
                        name: step.name.clone(),
                        status: ExecutionStatus::Failed,
                        duration,
                        error: Some(failure.clone()),
                    });
                    return AttemptReport {
                        steps,
                        failure: Some(failure),
                    };
                }
            }
        }

        for hook in &self.after {
            if let Err(err) = hook.run().await {
                return AttemptReport {
                    steps,
                    failure: Some(hook_failure(hook, err)),
                };
            }
        }

        AttemptReport {
            steps,
            failure: None,
        }
    }
}

fn hook_failure(hook: &Step, err: StepError) -> Failure {
    Failure::Hook {
        hook: hook.name.clone(),
        message: err.message().to_string(),
    }
}

/// Scenarios sharing before/after hooks.
#[derive(Debug, Clone)]
pub struct Suite {
    pub name: String,
    before_each: Vec<Step>,
    after_each: Vec<Step>,
    scenarios: Vec<Scenario>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            before_each: Vec::new(),
            after_each: Vec::new(),
            scenarios: Vec::new(),
        }
    }

    pub fn before_each(mut self, hook: Step) -> Self {
        self.before_each.push(hook);
        self
    }

    pub fn after_each(mut self, hook: Step) -> Self {
        self.after_each.push(hook);
        self
    }

    pub fn scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    /// Flatten into scenarios, suite hooks wrapping each scenario's own.
    pub fn into_scenarios(self) -> Vec<Scenario> {
        let Suite {
            before_each,
            after_each,
            scenarios,
            ..
        } = self;
        scenarios
            .into_iter()
            .map(|mut scenario| {
                let mut before = before_each.clone();
                before.append(&mut scenario.before);
                scenario.before = before;
                scenario.after.extend(after_each.iter().cloned());
                scenario
            })
            .collect()
    }
}
