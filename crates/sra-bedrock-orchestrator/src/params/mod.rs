//! Resource-property decoding and validation
//!
//! The lifecycle event carries a flat map of string properties. They are
//! decoded once per invocation into [`BaselineParams`]; every violation found
//! along the way is collected and reported as a single
//! [`BaselineError::ParameterValidation`].

mod globals;
mod kinds;

pub use globals::{GlobalParams, LogLevel};
pub use kinds::{
    CHECK_PREFIX, CheckKind, CheckSpec, FILTER_PREFIX, FilterKind, FilterParams, FilterSpec,
    OBSERVABILITY_PROPERTY, ObservabilitySpec,
};

use crate::error::BaselineError;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

/// Where a resource kind deploys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceSpec {
    pub deploy: bool,
    /// Accounts the kind applies to; empty means all
    pub accounts: Vec<String>,
    /// Regions the kind applies to; empty means all
    pub regions: Vec<String>,
}

impl ResourceSpec {
    pub fn applies_to(&self, account: &str, region: &str) -> bool {
        (self.accounts.is_empty() || self.accounts.iter().any(|a| a == account))
            && (self.regions.is_empty() || self.regions.iter().any(|r| r == region))
    }

    pub fn deploys_to(&self, account: &str, region: &str) -> bool {
        self.deploy && self.applies_to(account, region)
    }
}

/// Everything the event asks for, decoded and validated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineParams {
    pub globals: GlobalParams,
    pub checks: Vec<CheckSpec>,
    pub filters: Vec<FilterSpec>,
    pub observability: ObservabilitySpec,
}

impl BaselineParams {
    /// Decode every property, failing with all violations at once
    pub fn decode(properties: &Map<String, Value>) -> Result<Self, BaselineError> {
        let mut problems = Problems::default();

        let globals = globals::decode_globals(properties, &mut problems);
        let checks = kinds::decode_checks(properties, &mut problems);
        let filters = kinds::decode_filters(properties, &mut problems);
        let observability = kinds::decode_observability(properties, &mut problems);

        match globals {
            Some(globals) if problems.is_empty() => Ok(Self {
                globals,
                checks,
                filters,
                observability,
            }),
            _ => Err(BaselineError::ParameterValidation {
                errors: problems.0,
            }),
        }
    }

    /// Decode from the `ResourceProperties` value of an event
    pub fn from_value(properties: &Value) -> Result<Self, BaselineError> {
        match properties.as_object() {
            Some(map) => Self::decode(map),
            None => Err(BaselineError::ParameterValidation {
                errors: vec!["ResourceProperties is not an object".to_string()],
            }),
        }
    }

    pub fn dry_run(&self) -> bool {
        self.globals.dry_run
    }

    pub fn solution(&self) -> &str {
        &self.globals.solution_name
    }

    /// Checks that deploy somewhere
    pub fn deployed_checks(&self) -> impl Iterator<Item = &CheckSpec> {
        self.checks.iter().filter(|c| c.spec.deploy)
    }

    /// Filters that deploy somewhere
    pub fn deployed_filters(&self) -> impl Iterator<Item = &FilterSpec> {
        self.filters.iter().filter(|f| f.spec.deploy)
    }
}

/// Violations collected while decoding
#[derive(Debug, Default)]
pub(crate) struct Problems(Vec<String>);

impl Problems {
    pub fn push(&mut self, problem: String) {
        self.0.push(problem);
    }

    pub fn extend(&mut self, problems: impl IntoIterator<Item = String>) {
        self.0.extend(problems);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn contains(&self, problem: &str) -> bool {
        self.0.iter().any(|p| p == problem)
    }
}

/// Property value as text; the stack passes strings, hand-written events
/// sometimes do not
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn element_errors(key: &str, items: &[String], re: &Regex) -> Vec<String> {
    items
        .iter()
        .filter(|item| !re.is_match(item))
        .map(|item| format!("Parameter '{key}' has an invalid entry '{item}'"))
        .collect()
}
