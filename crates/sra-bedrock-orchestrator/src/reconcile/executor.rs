//! Dry-run gate for mutating provider calls

use super::report::{Effect, RunLedger};
use anyhow::Result;
use std::future::Future;
use tracing::info;

/// A mutation described for both run modes
#[derive(Debug, Clone)]
pub struct Action {
    pub key: String,
    /// What would happen (dry run)
    pub planned: String,
    /// What happened (live run)
    pub applied: String,
    pub effect: Effect,
}

/// Runs mutations in live mode and only narrates them in dry-run mode.
///
/// Reads never go through the executor; they run identically in both modes.
#[derive(Debug, Clone, Copy)]
pub struct ShadowExecutor {
    dry_run: bool,
}

impl ShadowExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Perform `op` (live) or record the plan (dry run). Returns `None` when
    /// the operation was only planned.
    pub async fn run<T, F, Fut>(&self, report: &mut RunLedger, action: Action, op: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.dry_run {
            info!(action = %action.key, "DRY_RUN: {}", action.planned);
            report.plan(&action.key, &action.planned);
            return Ok(None);
        }

        let output = op().await?;
        info!(action = %action.key, "{}", action.applied);
        report.apply(&action.key, &action.applied, action.effect);
        Ok(Some(output))
    }
}
