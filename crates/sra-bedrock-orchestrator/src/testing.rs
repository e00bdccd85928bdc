//! In-memory provider for reconciliation tests

use crate::reconcile::{Capability, Desired, Existing, Scope};
use anyhow::Result;
use sra_bedrock_common::ResourceKind;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Find,
    Create,
    Update,
    Delete,
}

impl Call {
    pub fn is_mutation(self) -> bool {
        self != Call::Find
    }
}

/// One provider call with the resource it targeted
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub call: Call,
    pub kind: ResourceKind,
    pub account: String,
    pub region: String,
    pub key: String,
}

type Slot = (ResourceKind, String, String, String);

/// Provider backed by a map, recording every call it receives.
///
/// Keys are found through their alias the way KMS resolves them: a key whose
/// alias points elsewhere is reported absent.
#[derive(Debug, Default)]
pub struct FakeProvider {
    resources: Mutex<HashMap<Slot, Existing>>,
    log: Mutex<Vec<CallRecord>>,
    /// (parent kind, dependent kind, body the service sets on parent create)
    defaults: Vec<(ResourceKind, ResourceKind, String)>,
}

impl FakeProvider {
    fn slot(kind: ResourceKind, scope: &Scope, key: &str) -> Slot {
        (
            kind,
            scope.account.clone(),
            scope.region_for(kind).to_string(),
            key.to_string(),
        )
    }

    fn arn(kind: ResourceKind, scope: &Scope, key: &str) -> String {
        format!(
            "arn:aws:{}:{}:{}:{}/{}",
            kind.service(),
            scope.region_for(kind),
            scope.account,
            kind.label(),
            key
        )
    }

    fn note(&self, call: Call, kind: ResourceKind, scope: &Scope, key: &str) {
        self.log.lock().unwrap().push(CallRecord {
            call,
            kind,
            account: scope.account.clone(),
            region: scope.region.clone(),
            key: key.to_string(),
        });
    }

    /// Creating a `parent` also brings a `dependent` with the same key and
    /// this body into being, as SNS does with a topic's access policy.
    pub fn with_service_default(mut self, parent: ResourceKind, dependent: ResourceKind, body: &str) -> Self {
        self.defaults.push((parent, dependent, body.to_string()));
        self
    }

    fn aliased_elsewhere(resources: &HashMap<Slot, Existing>, scope: &Scope, key: &Existing) -> bool {
        resources
            .get(&Self::slot(ResourceKind::Alias, scope, &key.id))
            .and_then(|alias| alias.body.as_deref())
            .is_some_and(|target| target != key.id)
    }

    /// Pretend a resource already exists
    pub fn seed<D: Desired>(&self, scope: &Scope, desired: &D) -> Existing {
        let existing = Existing::new(Self::arn(D::KIND, scope, desired.key()), desired.key())
            .with_body(desired.body().map(str::to_string));
        self.resources
            .lock()
            .unwrap()
            .insert(Self::slot(D::KIND, scope, desired.key()), existing.clone());
        existing
    }

    pub fn contains(&self, kind: ResourceKind, scope: &Scope, key: &str) -> bool {
        self.resources
            .lock()
            .unwrap()
            .contains_key(&Self::slot(kind, scope, key))
    }

    pub fn len(&self) -> usize {
        self.resources.lock().unwrap().len()
    }

    pub fn log(&self) -> Vec<CallRecord> {
        self.log.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log().into_iter().map(|r| r.call).collect()
    }

    pub fn count(&self, call: Call) -> usize {
        self.log().iter().filter(|r| r.call == call).count()
    }

    pub fn mutations(&self) -> usize {
        self.log().iter().filter(|r| r.call.is_mutation()).count()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }
}

impl<D: Desired> Capability<D> for FakeProvider {
    async fn find(&self, scope: &Scope, desired: &D) -> Result<Option<Existing>> {
        self.note(Call::Find, D::KIND, scope, desired.key());
        let resources = self.resources.lock().unwrap();
        let found = resources.get(&Self::slot(D::KIND, scope, desired.key())).cloned();
        if D::KIND == ResourceKind::Key {
            return Ok(found.filter(|key| !Self::aliased_elsewhere(&resources, scope, key)));
        }
        Ok(found)
    }

    async fn create(&self, scope: &Scope, desired: &D) -> Result<Existing> {
        self.note(Call::Create, D::KIND, scope, desired.key());
        let slot = Self::slot(D::KIND, scope, desired.key());
        let mut resources = self.resources.lock().unwrap();
        if resources.contains_key(&slot) {
            anyhow::bail!("{} {} already exists", D::KIND.label(), desired.key());
        }
        let existing = Existing::new(Self::arn(D::KIND, scope, desired.key()), desired.key())
            .with_body(desired.body().map(str::to_string));
        resources.insert(slot, existing.clone());
        for (parent, dependent, body) in &self.defaults {
            if *parent == D::KIND {
                let implied = Existing::new(Self::arn(*dependent, scope, desired.key()), desired.key())
                    .with_body(Some(body.clone()));
                resources.insert(Self::slot(*dependent, scope, desired.key()), implied);
            }
        }
        Ok(existing)
    }

    async fn update(&self, scope: &Scope, existing: &Existing, desired: &D) -> Result<()> {
        self.note(Call::Update, D::KIND, scope, desired.key());
        let mut resources = self.resources.lock().unwrap();
        let Some(stored) = resources.get_mut(&Self::slot(D::KIND, scope, desired.key())) else {
            anyhow::bail!("{} {} does not exist", D::KIND.label(), existing.id);
        };
        stored.body = desired.body().map(str::to_string);
        Ok(())
    }

    async fn delete(&self, scope: &Scope, existing: &Existing) -> Result<()> {
        self.note(Call::Delete, D::KIND, scope, &existing.id);
        self.resources
            .lock()
            .unwrap()
            .remove(&Self::slot(D::KIND, scope, &existing.id));
        Ok(())
    }
}
