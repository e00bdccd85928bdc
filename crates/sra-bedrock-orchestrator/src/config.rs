//! Configuration types for the orchestrator
//!
//! [`HandlerConfig`] holds process-level settings from the command line and
//! environment. [`RunContext`] is built once per invocation from the handler
//! config, the decoded event properties and the landing-zone prerequisites,
//! and is passed by reference to every phase.

use crate::params::BaselineParams;
use crate::prereq::Prerequisites;
use crate::reconcile::{PolicyCompare, Scope};
use serde_json::Value;
use sra_bedrock_common::defaults::STATE_TABLE;

/// How per-region work is dispatched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FanOutMode {
    /// Reconcile every region in this process
    Inline,
    /// Publish one message per region to the configuration topic
    #[default]
    Topic,
}

/// Where the managed-resource ledger lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LedgerBackend {
    /// Table in the security account's home region
    #[default]
    Dynamodb,
    /// Local file under the project data directory
    Sqlite,
}

/// AWS location of the handler
#[derive(Debug, Clone)]
pub struct AwsSettings {
    /// Home region (where the handler runs)
    pub region: String,
    pub partition: String,
}

/// Identity of the handler function, used to subscribe it to the
/// configuration topic
#[derive(Debug, Clone, Default)]
pub struct FunctionIdentity {
    pub name: Option<String>,
    pub arn: Option<String>,
}

/// Behavior switches
#[derive(Debug, Clone)]
pub struct HandlerFlags {
    pub fan_out: FanOutMode,
    pub ledger: LedgerBackend,
    pub policy_compare: PolicyCompare,
}

/// Process-level configuration
///
/// Composed of focused sub-configs, like the per-invocation context.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub aws: AwsSettings,
    pub function: FunctionIdentity,
    pub flags: HandlerFlags,
}

impl HandlerConfig {
    pub fn region(&self) -> &str {
        &self.aws.region
    }
    pub fn partition(&self) -> &str {
        &self.aws.partition
    }
    pub fn fan_out(&self) -> FanOutMode {
        self.flags.fan_out
    }
    pub fn ledger(&self) -> LedgerBackend {
        self.flags.ledger
    }
    pub fn policy_compare(&self) -> PolicyCompare {
        self.flags.policy_compare
    }
}

/// Immutable view of one invocation
#[derive(Debug, Clone)]
pub struct RunContext {
    pub params: BaselineParams,
    /// Properties exactly as received, forwarded untouched in fan-out messages
    pub properties: Value,
    pub prereqs: Prerequisites,
    pub management_account: String,
    pub home_region: String,
    pub partition: String,
    pub fan_out: FanOutMode,
    /// ARN of the handler function, when known
    pub function_arn: Option<String>,
}

impl RunContext {
    pub fn new(
        config: &HandlerConfig,
        properties: &Value,
        params: BaselineParams,
        prereqs: Prerequisites,
        management_account: &str,
    ) -> Self {
        let function_arn = config.function.arn.clone().or_else(|| {
            config.function.name.as_ref().map(|name| {
                format!(
                    "arn:{}:lambda:{}:{}:function:{}",
                    config.partition(),
                    config.region(),
                    management_account,
                    name
                )
            })
        });

        Self {
            params,
            properties: properties.clone(),
            prereqs,
            management_account: management_account.to_string(),
            home_region: config.region().to_string(),
            partition: config.partition().to_string(),
            fan_out: config.fan_out(),
            function_arn,
        }
    }

    pub fn solution(&self) -> &str {
        self.params.solution()
    }
    pub fn dry_run(&self) -> bool {
        self.params.dry_run()
    }
    pub fn security_account(&self) -> &str {
        &self.prereqs.security_account
    }
    pub fn staging_bucket(&self) -> &str {
        &self.prereqs.staging_bucket
    }
    pub fn organization_id(&self) -> &str {
        &self.prereqs.organization_id
    }

    /// Management account in the home region
    pub fn management_scope(&self) -> Scope {
        Scope::new(&self.management_account, &self.home_region)
    }

    /// Security account in the home region
    pub fn security_scope(&self) -> Scope {
        Scope::new(self.security_account(), &self.home_region)
    }

    /// Accounts a region message covers: the listed ones plus management
    pub fn target_accounts(&self, accounts: &[String]) -> Vec<String> {
        let mut targets: Vec<String> = Vec::with_capacity(accounts.len() + 1);
        for account in accounts.iter().chain(std::iter::once(&self.management_account)) {
            if !targets.contains(account) {
                targets.push(account.clone());
            }
        }
        targets
    }

    /// ARN of the ledger table
    pub fn state_table_arn(&self) -> String {
        format!(
            "arn:{}:dynamodb:{}:{}:table/{}",
            self.partition,
            self.home_region,
            self.security_account(),
            STATE_TABLE
        )
    }
}
