//! Idempotent reconciliation engine
//!
//! A [`Reconciler`] drives one invocation: it checks each desired resource
//! against the provider by its stable key, creates or updates it through the
//! [`ShadowExecutor`] and keeps the ledger in step with what it did. Reads run
//! in every mode; mutations and ledger writes only happen in live mode.

mod capability;
mod compare;
mod executor;
pub mod kinds;
mod report;

pub use capability::{Capability, Desired, Existing, Scope};
pub use compare::PolicyCompare;
pub use executor::{Action, ShadowExecutor};
pub use report::{DeploymentInfo, Effect, RunLedger};

use crate::state::{RecordAttrs, StateLedger, mark_removed, record_resource};
use anyhow::Result;
use kinds::*;
use sra_bedrock_common::{AwsService, ComponentState, ComponentType, ResourceKind};
use std::future::Future;
use tracing::debug;

/// Every capability the orchestrator needs from a cloud provider
pub trait Provider:
    Capability<RoleSpec>
    + Capability<PolicySpec>
    + Capability<AttachmentSpec>
    + Capability<FunctionSpec>
    + Capability<PermissionSpec>
    + Capability<ConfigRuleSpec>
    + Capability<KeySpec>
    + Capability<AliasSpec>
    + Capability<TopicSpec>
    + Capability<TopicPolicySpec>
    + Capability<SubscriptionSpec>
    + Capability<MetricFilterSpec>
    + Capability<AlarmSpec>
    + Capability<SinkSpec>
    + Capability<SinkPolicySpec>
    + Capability<LinkSpec>
    + Capability<DashboardSpec>
    + Capability<CodeArchiveSpec>
{
}

impl<T> Provider for T where
    T: Capability<RoleSpec>
        + Capability<PolicySpec>
        + Capability<AttachmentSpec>
        + Capability<FunctionSpec>
        + Capability<PermissionSpec>
        + Capability<ConfigRuleSpec>
        + Capability<KeySpec>
        + Capability<AliasSpec>
        + Capability<TopicSpec>
        + Capability<TopicPolicySpec>
        + Capability<SubscriptionSpec>
        + Capability<MetricFilterSpec>
        + Capability<AlarmSpec>
        + Capability<SinkSpec>
        + Capability<SinkPolicySpec>
        + Capability<LinkSpec>
        + Capability<DashboardSpec>
        + Capability<CodeArchiveSpec>
{
}

/// Run-ledger key of an action: `{key}_{account}[_{region}]_{Label}{suffix}`
pub fn action_key(scope: &Scope, kind: ResourceKind, key: &str, suffix: &str) -> String {
    if kind.is_global() {
        format!("{key}_{}_{}{suffix}", scope.account, kind.label())
    } else {
        format!("{key}_{}_{}_{}{suffix}", scope.account, scope.region, kind.label())
    }
}

fn create_effect(kind: ResourceKind) -> Effect {
    match kind {
        ResourceKind::CodeArchive => Effect::Staged,
        k if k.is_identity() => Effect::Created,
        _ => Effect::Configured,
    }
}

fn delete_effect(kind: ResourceKind) -> Effect {
    if kind.is_identity() {
        Effect::Removed
    } else {
        Effect::Deconfigured
    }
}

/// Reconciles desired resources for one invocation
pub struct Reconciler<'a, P, L> {
    provider: &'a P,
    ledger: &'a L,
    solution: String,
    compare: PolicyCompare,
    executor: ShadowExecutor,
    report: RunLedger,
}

impl<'a, P, L: StateLedger> Reconciler<'a, P, L> {
    pub fn new(
        provider: &'a P,
        ledger: &'a L,
        solution: &str,
        dry_run: bool,
        compare: PolicyCompare,
    ) -> Self {
        Self {
            provider,
            ledger,
            solution: solution.to_string(),
            compare,
            executor: ShadowExecutor::new(dry_run),
            report: RunLedger::new(dry_run),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.executor.is_dry_run()
    }

    pub fn report(&self) -> &RunLedger {
        &self.report
    }

    pub fn into_report(self) -> RunLedger {
        self.report
    }

    /// Read-only lookup that never plans or records anything
    pub async fn lookup<D: Desired>(&self, scope: &Scope, desired: &D) -> Result<Option<Existing>>
    where
        P: Capability<D>,
    {
        <P as Capability<D>>::find(self.provider, scope, desired).await
    }

    /// Bring one resource to its desired state and return its identity.
    ///
    /// In dry-run mode a resource that does not exist yet comes back as a
    /// placeholder (see [`Existing::is_planned`]).
    pub async fn ensure<D: Desired>(&mut self, scope: &Scope, desired: &D) -> Result<Existing>
    where
        P: Capability<D>,
    {
        self.converge(scope, desired, false).await
    }

    /// Find, then create or bring the body in line
    async fn converge<D: Desired>(
        &mut self,
        scope: &Scope,
        desired: &D,
        fresh_parent: bool,
    ) -> Result<Existing>
    where
        P: Capability<D>,
    {
        let provider = self.provider;
        let Some(existing) = <P as Capability<D>>::find(provider, scope, desired).await? else {
            return self.create(scope, desired).await;
        };

        debug!(
            kind = D::KIND.label(),
            key = desired.key(),
            account = %scope.account,
            region = %scope.region,
            "Resource already exists"
        );

        if let Some(want) = desired.body() {
            let in_sync = existing
                .body
                .as_deref()
                .is_some_and(|have| self.compare.equivalent(have, want));
            if !in_sync {
                let label = D::KIND.label();
                let action = if fresh_parent {
                    Action {
                        key: action_key(scope, D::KIND, desired.key(), ""),
                        planned: format!("Create {label} {} in {}", desired.key(), scope.region),
                        applied: format!("Created {label} {} in {}", desired.key(), scope.region),
                        effect: create_effect(D::KIND),
                    }
                } else {
                    Action {
                        key: action_key(scope, D::KIND, desired.key(), "Update"),
                        planned: format!("Update {label} {} in {}", desired.key(), scope.region),
                        applied: format!("Updated {label} {} in {}", desired.key(), scope.region),
                        effect: Effect::Configured,
                    }
                };
                self.executor
                    .run(&mut self.report, action, || {
                        <P as Capability<D>>::update(provider, scope, &existing, desired)
                    })
                    .await?;
            }
        }

        if !self.is_dry_run() {
            self.record_identity(scope, desired, &existing).await?;
        }
        Ok(existing)
    }

    /// Like [`ensure`](Self::ensure) for a resource that depends on `parent`.
    ///
    /// When the parent only exists in a dry-run plan the dependent cannot
    /// exist either, so the create is planned without asking the provider.
    /// A parent created in this invocation may already carry a service
    /// default for the dependent; replacing it counts as the create.
    pub async fn ensure_under<D: Desired>(
        &mut self,
        scope: &Scope,
        desired: &D,
        parent: &Existing,
    ) -> Result<Existing>
    where
        P: Capability<D>,
    {
        if parent.is_planned() {
            return self.create(scope, desired).await;
        }
        self.converge(scope, desired, parent.is_fresh()).await
    }

    async fn create<D: Desired>(&mut self, scope: &Scope, desired: &D) -> Result<Existing>
    where
        P: Capability<D>,
    {
        let provider = self.provider;
        let label = D::KIND.label();
        let action = Action {
            key: action_key(scope, D::KIND, desired.key(), ""),
            planned: format!("Create {label} {} in {}", desired.key(), scope.region),
            applied: format!("Created {label} {} in {}", desired.key(), scope.region),
            effect: create_effect(D::KIND),
        };

        let created = self
            .executor
            .run(&mut self.report, action, || {
                <P as Capability<D>>::create(provider, scope, desired)
            })
            .await?;

        match created {
            Some(created) => {
                self.record_identity(scope, desired, &created).await?;
                Ok(created.created_now())
            }
            None => Ok(Existing::placeholder(D::KIND, scope, desired.key())),
        }
    }

    /// Delete one resource if it exists. Returns whether it was found.
    pub async fn remove<D: Desired>(&mut self, scope: &Scope, desired: &D) -> Result<bool>
    where
        P: Capability<D>,
    {
        let provider = self.provider;
        let Some(existing) = <P as Capability<D>>::find(provider, scope, desired).await? else {
            debug!(
                kind = D::KIND.label(),
                key = desired.key(),
                account = %scope.account,
                region = %scope.region,
                "Nothing to remove"
            );
            return Ok(false);
        };

        let label = D::KIND.label();
        let action = Action {
            key: action_key(scope, D::KIND, desired.key(), "Delete"),
            planned: format!("Delete {label} {} in {}", desired.key(), scope.region),
            applied: format!("Deleted {label} {} in {}", desired.key(), scope.region),
            effect: delete_effect(D::KIND),
        };
        let deleted = self
            .executor
            .run(&mut self.report, action, || {
                <P as Capability<D>>::delete(provider, scope, &existing)
            })
            .await?;

        if deleted.is_some() && D::KIND.is_identity() {
            mark_removed(self.ledger, &self.solution, &existing.arn).await?;
        }
        Ok(true)
    }

    /// Ensure the ledger's own table exists, then record it.
    pub async fn ensure_state_table(&mut self, scope: &Scope, arn: &str) -> Result<()> {
        let ledger = self.ledger;
        let table = ledger.table().to_string();

        if !ledger.table_exists().await? {
            let label = ResourceKind::StateTable.label();
            let action = Action {
                key: action_key(scope, ResourceKind::StateTable, &table, ""),
                planned: format!("Create {label} {table} in {}", scope.region),
                applied: format!("Created {label} {table} in {}", scope.region),
                effect: Effect::Created,
            };
            self.executor
                .run(&mut self.report, action, || ledger.create_table())
                .await?;
        }

        if self.is_dry_run() {
            return Ok(());
        }
        let attrs = RecordAttrs {
            service: AwsService::Dynamodb,
            component_state: ComponentState::Implemented,
            account: scope.account.clone(),
            region: scope.region.clone(),
            component_type: ComponentType::Table,
            component_name: table,
            arn: arn.to_string(),
            description: "state table".to_string(),
        };
        record_resource(ledger, &self.solution, &attrs).await?;
        Ok(())
    }

    /// Run a mutation that is not tied to a resource kind (fan-out publishes)
    pub async fn apply<T, F, Fut>(&mut self, action: Action, op: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.executor.run(&mut self.report, action, op).await
    }

    async fn record_identity<D: Desired>(
        &self,
        scope: &Scope,
        desired: &D,
        existing: &Existing,
    ) -> Result<()> {
        let Some(component_type) = D::KIND.component_type() else {
            return Ok(());
        };
        let attrs = RecordAttrs {
            service: D::KIND.service(),
            component_state: ComponentState::Implemented,
            account: scope.account.clone(),
            region: scope.region_for(D::KIND).to_string(),
            component_type,
            component_name: desired.key().to_string(),
            arn: existing.arn.clone(),
            description: desired.description(),
        };
        record_resource(self.ledger, &self.solution, &attrs).await?;
        Ok(())
    }
}
