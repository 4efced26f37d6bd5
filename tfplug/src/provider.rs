//! Provider trait and the typed resource registry
//!
//! A provider names its resource types with an enum implementing
//! [`ResourceKind`]. Once configured it hands out a [`ResourceRegistry`]
//! holding one handler per kind, each already wired to the provider's
//! API client.

use crate::context::Context;
use crate::error::{Result, TfplugError};
use crate::resource::Resource;
use crate::schema::Schema;
use crate::types::{Diagnostic, DynamicValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Closed set of resource types a provider serves
pub trait ResourceKind: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    fn all() -> &'static [Self];

    fn type_name(&self) -> &'static str;

    fn from_type_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.type_name() == name)
    }
}

pub struct ResourceRegistry<K: ResourceKind> {
    resources: HashMap<K, Arc<dyn Resource>>,
}

impl<K: ResourceKind> ResourceRegistry<K> {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: K, resource: impl Resource + 'static) -> Result<()> {
        if resource.type_name() != kind.type_name() {
            return Err(TfplugError::ResourceKindMismatch {
                expected: kind.type_name().to_string(),
                actual: resource.type_name().to_string(),
            });
        }
        if self.resources.contains_key(&kind) {
            return Err(TfplugError::DuplicateResource(kind.type_name().to_string()));
        }
        self.resources.insert(kind, Arc::new(resource));
        Ok(())
    }

    pub fn get(&self, kind: K) -> Option<Arc<dyn Resource>> {
        self.resources.get(&kind).cloned()
    }

    pub fn get_by_name(&self, type_name: &str) -> Result<(K, Arc<dyn Resource>)> {
        let kind = K::from_type_name(type_name)
            .ok_or_else(|| TfplugError::ResourceNotFound(type_name.to_string()))?;
        let resource = self
            .get(kind)
            .ok_or_else(|| TfplugError::ResourceNotFound(type_name.to_string()))?;
        Ok((kind, resource))
    }

    /// Registered kinds, in declaration order
    pub fn kinds(&self) -> Vec<K> {
        K::all()
            .iter()
            .copied()
            .filter(|kind| self.resources.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl<K: ResourceKind> Default for ResourceRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    type Kind: ResourceKind;

    /// Provider name such as "packet"; resource type names share it as prefix
    fn type_name(&self) -> &str;

    async fn schema(&self, ctx: Context, request: ProviderSchemaRequest) -> ProviderSchemaResponse;

    /// Builds the API client from provider configuration, falling back to
    /// environment variables for unset attributes
    async fn configure(
        &mut self,
        ctx: Context,
        request: ConfigureProviderRequest,
    ) -> ConfigureProviderResponse;

    /// Fails with [`TfplugError::ProviderNotConfigured`] before a successful
    /// `configure`
    fn resources(&self) -> Result<ResourceRegistry<Self::Kind>>;
}

pub struct ProviderSchemaRequest;

pub struct ProviderSchemaResponse {
    pub schema: Schema,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct ConfigureProviderRequest {
    pub terraform_version: String,
    pub config: DynamicValue,
}

pub struct ConfigureProviderResponse {
    pub diagnostics: Vec<Diagnostic>,
}
