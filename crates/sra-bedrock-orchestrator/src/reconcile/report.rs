//! Per-invocation run ledger
//!
//! Collects the human-readable action narrative (one map for dry runs, one
//! for live runs) and the deployment counters reported back to the stack.

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// What an applied action did to the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// A new resource identity exists
    Created,
    /// A resource identity was deleted
    Removed,
    /// An existing resource's configuration changed
    Configured,
    /// Configuration was detached or revoked
    Deconfigured,
    /// Artifacts were staged; nothing was provisioned
    Staged,
}

/// Counters reported to the stack manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentInfo {
    pub action_count: i64,
    pub resources_deployed: i64,
    pub configuration_changes: i64,
}

/// Action narrative and counters for one invocation
#[derive(Debug, Default)]
pub struct RunLedger {
    dry_run: bool,
    dry_run_actions: BTreeMap<String, String>,
    live_run_actions: BTreeMap<String, String>,
    info: DeploymentInfo,
}

impl RunLedger {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Record an action a dry run would have taken
    pub fn plan(&mut self, key: &str, description: &str) {
        self.dry_run_actions
            .insert(key.to_string(), format!("DRY_RUN: {description}"));
    }

    /// Record an action a live run took and count it
    pub fn apply(&mut self, key: &str, description: &str, effect: Effect) {
        self.live_run_actions
            .insert(key.to_string(), description.to_string());

        self.info.action_count += 1;
        match effect {
            Effect::Created => self.info.resources_deployed += 1,
            Effect::Removed => self.info.resources_deployed -= 1,
            Effect::Configured | Effect::Deconfigured => self.info.configuration_changes += 1,
            Effect::Staged => {}
        }
    }

    pub fn dry_run_actions(&self) -> &BTreeMap<String, String> {
        &self.dry_run_actions
    }

    pub fn live_run_actions(&self) -> &BTreeMap<String, String> {
        &self.live_run_actions
    }

    pub fn deployment_info(&self) -> DeploymentInfo {
        self.info
    }

    /// Data attached to the stack-manager signal
    pub fn signal_data(&self) -> serde_json::Value {
        json!({
            "dry_run": self.dry_run,
            "deployment_info": self.info,
        })
    }

    /// Narrative for the mode this invocation ran in
    pub fn run_data(&self) -> &BTreeMap<String, String> {
        if self.dry_run {
            &self.dry_run_actions
        } else {
            &self.live_run_actions
        }
    }
}
