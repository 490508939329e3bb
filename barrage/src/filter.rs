use std::collections::BTreeSet;

use regex::Regex;

use crate::{error::ConfigError, scenario::ScenarioRef};

/// Decides which scenarios take part in a run.
///
/// All configured criteria must hold; an empty criterion matches everything.
#[derive(Debug, Clone, Default)]
pub struct TestFilter {
    tags: BTreeSet<String>,
    exclude_tags: BTreeSet<String>,
    scenario_names: BTreeSet<String>,
    pattern: Option<Regex>,
}

impl TestFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep scenarios carrying at least one of `tags`.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Drop scenarios carrying any of `tags`.
    pub fn exclude_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scenario_names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Keep scenarios whose whole name matches `pattern`.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.pattern = Some(Regex::new(&format!("^(?:{pattern})$"))?);
        Ok(self)
    }

    pub fn matches(&self, scenario: &ScenarioRef) -> bool {
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(&scenario.name) {
                return false;
            }
        }
        if !self.scenario_names.is_empty() && !self.scenario_names.contains(&scenario.name) {
            return false;
        }
        if !self.tags.is_empty() && self.tags.is_disjoint(&scenario.tags) {
            return false;
        }
        if !self.exclude_tags.is_empty() && !self.exclude_tags.is_disjoint(&scenario.tags) {
            return false;
        }
        true
    }
}
