//! Per-kind capability interface over the cloud control plane

use anyhow::Result;
use sra_bedrock_common::ResourceKind;
use sra_bedrock_common::defaults::GLOBAL_REGION;

/// Account and region a resource lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub account: String,
    pub region: String,
}

impl Scope {
    pub fn new(account: &str, region: &str) -> Self {
        Self {
            account: account.to_string(),
            region: region.to_string(),
        }
    }

    /// Region recorded in the ledger and action keys for `kind`
    pub fn region_for(&self, kind: ResourceKind) -> &str {
        if kind.is_global() {
            GLOBAL_REGION
        } else {
            &self.region
        }
    }
}

/// Desired state of one resource of a fixed kind
pub trait Desired: Send + Sync {
    const KIND: ResourceKind;

    /// Stable secondary key used for existence checks (name, alias, ...)
    fn key(&self) -> &str;

    /// Body compared against the existing resource, when the kind has one
    fn body(&self) -> Option<&str> {
        None
    }

    /// Description stored in the ledger
    fn description(&self) -> String;
}

/// A resource as found in (or created by) the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Existing {
    pub arn: String,
    /// Provider-side identifier (key id, topic arn, rule name, ...)
    pub id: String,
    pub body: Option<String>,
    planned: bool,
    fresh: bool,
}

impl Existing {
    pub fn new(arn: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            arn: arn.into(),
            id: id.into(),
            body: None,
            planned: false,
            fresh: false,
        }
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    /// Stand-in for a resource a dry run only planned to create
    pub fn placeholder(kind: ResourceKind, scope: &Scope, key: &str) -> Self {
        let arn = format!(
            "arn:dry-run:{}:{}:{}:{}",
            kind.label(),
            scope.region_for(kind),
            scope.account,
            key
        );
        Self {
            id: key.to_string(),
            arn,
            body: None,
            planned: true,
            fresh: false,
        }
    }

    /// Whether this resource exists only in a dry-run plan
    pub fn is_planned(&self) -> bool {
        self.planned
    }

    pub(crate) fn created_now(mut self) -> Self {
        self.fresh = true;
        self
    }

    /// Whether this invocation created the resource
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }
}

/// Find/create/update/delete for one kind.
///
/// `find` is read-only and runs in every mode. Implementations of `delete`
/// treat "already gone" as success.
#[allow(async_fn_in_trait)]
pub trait Capability<D: Desired>: Send + Sync {
    async fn find(&self, scope: &Scope, desired: &D) -> Result<Option<Existing>>;

    async fn create(&self, scope: &Scope, desired: &D) -> Result<Existing>;

    /// Bring an existing resource's body in line with `desired`
    async fn update(&self, _scope: &Scope, _existing: &Existing, _desired: &D) -> Result<()> {
        anyhow::bail!("{} does not support in-place updates", D::KIND.label())
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()>;
}
