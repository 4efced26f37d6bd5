use super::check::StateCheck;
use super::config::{Configuration, ResourceBlock};
use super::state::{ResourceState, TestState, UNKNOWN_VALUE};
use super::{AcceptanceError, ImportStep, TestCase, TestStep};
use crate::context::Context;
use crate::plan::{plan_resource_change, PlanAction};
use crate::provider::{ConfigureProviderRequest, Provider, ProviderSchemaRequest, ResourceKind, ResourceRegistry};
use crate::resource::{
    CreateResourceRequest, DeleteResourceRequest, ImportResourceStateRequest, ReadResourceRequest,
    Resource, ResourceSchemaRequest, UpdateResourceRequest, ValidateResourceConfigRequest,
};
use crate::schema::Schema;
use crate::types::{format_errors, has_errors, Diagnostic, DynamicValue};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const TERRAFORM_VERSION: &str = "1.9.0";

pub(super) async fn execute<P: Provider>(case: TestCase<P>) -> Result<(), AcceptanceError> {
    let TestCase {
        mut provider,
        provider_config,
        check_destroy,
        steps,
        operation_timeout,
    } = case;

    let ctx = Context::new();
    configure_provider(&mut provider, &ctx, provider_config).await?;

    let mut runner = Runner::new(ctx, operation_timeout, provider.resources()?).await?;

    let mut failure = None;
    for (i, step) in steps.into_iter().enumerate() {
        let step_number = i + 1;
        info!(provider = provider.type_name(), step = step_number, "running test step");
        if let Err(e) = runner.run_step(step).await {
            warn!(step = step_number, error = %e, "test step failed");
            failure = Some(AcceptanceError::Step {
                step: step_number,
                source: Box::new(e),
            });
            break;
        }
    }

    let snapshot = runner.state.clone();
    let destroyed = runner.destroy_all().await;

    match (failure, destroyed) {
        (Some(failure), Err(e)) => {
            warn!(error = %e, "destroy after failed step also failed");
            Err(failure)
        }
        (Some(failure), Ok(())) => Err(failure),
        (None, Err(e)) => Err(e),
        (None, Ok(())) => {
            if let Some(check) = check_destroy {
                check
                    .check(&snapshot)
                    .await
                    .map_err(AcceptanceError::CheckDestroy)?;
            }
            info!(provider = provider.type_name(), "test case passed");
            Ok(())
        }
    }
}

async fn configure_provider<P: Provider>(
    provider: &mut P,
    ctx: &Context,
    config: DynamicValue,
) -> Result<(), AcceptanceError> {
    let schema = provider.schema(ctx.clone(), ProviderSchemaRequest).await;
    let mut diagnostics = schema.diagnostics;
    diagnostics.extend(schema.schema.validate_config(&config));
    if has_errors(&diagnostics) {
        return Err(AcceptanceError::ProviderConfigure(format_errors(&diagnostics)));
    }

    let response = provider
        .configure(
            ctx.clone(),
            ConfigureProviderRequest {
                terraform_version: TERRAFORM_VERSION.to_string(),
                config,
            },
        )
        .await;
    if has_errors(&response.diagnostics) {
        return Err(AcceptanceError::ProviderConfigure(format_errors(
            &response.diagnostics,
        )));
    }
    Ok(())
}

/// Raises error diagnostics as an [`AcceptanceError`] and logs warnings
fn fail_on_errors(
    address: &str,
    operation: &str,
    diagnostics: &[Diagnostic],
) -> Result<(), AcceptanceError> {
    for diag in diagnostics.iter().filter(|d| !d.is_error()) {
        warn!(address, operation, "{}", diag);
    }
    if has_errors(diagnostics) {
        return Err(AcceptanceError::Diagnostics {
            address: address.to_string(),
            operation: operation.to_string(),
            message: format_errors(diagnostics),
        });
    }
    Ok(())
}

/// Differences between two flattened states, one line per key
fn diff_attributes(
    expected: &BTreeMap<String, String>,
    actual: &BTreeMap<String, String>,
    ignore: &[String],
) -> Vec<String> {
    let display = |v: Option<&String>| match v.map(String::as_str) {
        None => "<absent>".to_string(),
        Some(UNKNOWN_VALUE) => "(known after apply)".to_string(),
        Some(v) => format!("{:?}", v),
    };

    let keys: std::collections::BTreeSet<&String> = expected.keys().chain(actual.keys()).collect();
    keys.into_iter()
        .filter(|key| !ignore.iter().any(|prefix| key.starts_with(prefix.as_str())))
        .filter(|key| expected.get(*key) != actual.get(*key))
        .map(|key| {
            format!(
                "  {}: {} => {}",
                key,
                display(expected.get(key)),
                display(actual.get(key))
            )
        })
        .collect()
}

struct Runner<K: ResourceKind> {
    ctx: Context,
    operation_timeout: Option<Duration>,
    registry: ResourceRegistry<K>,
    schemas: HashMap<String, Arc<Schema>>,
    state: TestState,
}

impl<K: ResourceKind> Runner<K> {
    async fn new(
        ctx: Context,
        operation_timeout: Option<Duration>,
        registry: ResourceRegistry<K>,
    ) -> Result<Self, AcceptanceError> {
        let mut schemas = HashMap::new();
        for kind in registry.kinds() {
            let type_name = kind.type_name();
            let (_, resource) = registry.get_by_name(type_name)?;
            let response = resource.schema(ctx.clone(), ResourceSchemaRequest).await;
            fail_on_errors(type_name, "schema", &response.diagnostics)?;
            schemas.insert(type_name.to_string(), Arc::new(response.schema));
        }

        Ok(Self {
            ctx,
            operation_timeout,
            registry,
            schemas,
            state: TestState::default(),
        })
    }

    fn op_ctx(&self) -> Context {
        match self.operation_timeout {
            Some(timeout) => self.ctx.clone().with_timeout(timeout),
            None => self.ctx.clone(),
        }
    }

    fn lookup(&self, type_name: &str) -> Result<(Arc<dyn Resource>, Arc<Schema>), AcceptanceError> {
        let (_, resource) = self.registry.get_by_name(type_name)?;
        let schema = self.schemas.get(type_name).cloned().ok_or_else(|| {
            AcceptanceError::Config(format!("no schema loaded for {}", type_name))
        })?;
        Ok((resource, schema))
    }

    async fn run_step(&mut self, step: TestStep) -> Result<(), AcceptanceError> {
        let TestStep {
            config,
            import,
            check,
            expect_error,
        } = step;

        let result = match (config, import) {
            (_, Some(import)) => self.run_import_step(&import, check.as_deref()).await,
            (Some(config), None) => self.run_config_step(&config, check.as_deref()).await,
            (None, None) => Err(AcceptanceError::Config(
                "step has neither a configuration nor an import".to_string(),
            )),
        };

        match (result, expect_error) {
            (Ok(()), None) => Ok(()),
            (Ok(()), Some(pattern)) => Err(AcceptanceError::ExpectedError(pattern.to_string())),
            (Err(e), Some(pattern)) => {
                let message = e.to_string();
                if pattern.is_match(&message) {
                    debug!(error = %message, "step failed as expected");
                    Ok(())
                } else {
                    Err(AcceptanceError::UnexpectedErrorMessage {
                        pattern: pattern.to_string(),
                        message,
                    })
                }
            }
            (Err(e), None) => Err(e),
        }
    }

    async fn run_config_step(
        &mut self,
        config: &Configuration,
        check: Option<&dyn StateCheck>,
    ) -> Result<(), AcceptanceError> {
        debug!("applying configuration:\n{}", config);
        let ordered = config.ordered()?;

        self.refresh().await?;

        for block in &ordered {
            self.apply_block(block).await?;
        }

        let declared: HashSet<String> = ordered.iter().map(|b| b.address()).collect();
        for address in self.state.destroy_order() {
            if !declared.contains(&address) {
                info!(address = %address, "destroying resource removed from configuration");
                self.destroy_resource(&address).await?;
            }
        }

        self.refresh().await?;
        let pending = self.pending_changes(&ordered)?;
        if !pending.is_empty() {
            return Err(AcceptanceError::NonEmptyPlan(pending.join("\n")));
        }

        if let Some(check) = check {
            check.check(&self.state).await?;
        }
        Ok(())
    }

    /// Brings every resource in state up to date; resources that no longer
    /// exist remotely are dropped
    async fn refresh(&mut self) -> Result<(), AcceptanceError> {
        for address in self.state.addresses() {
            let Some(current) = self.state.get(&address).cloned() else {
                continue;
            };
            let (resource, _) = self.lookup(&current.type_name)?;
            let response = resource
                .read(
                    self.op_ctx(),
                    ReadResourceRequest {
                        type_name: current.type_name.clone(),
                        current_state: current.state.clone(),
                    },
                )
                .await;
            fail_on_errors(&address, "read", &response.diagnostics)?;

            match response.new_state {
                Some(new_state) if !new_state.is_null() => {
                    self.state.insert(
                        address,
                        ResourceState::new(current.type_name, new_state, current.dependencies),
                    );
                }
                _ => {
                    warn!(address = %address, "resource no longer exists, removing from state");
                    self.state.remove(&address);
                }
            }
        }
        Ok(())
    }

    async fn validate(
        &self,
        address: &str,
        resource: &Arc<dyn Resource>,
        schema: &Schema,
        config: &DynamicValue,
    ) -> Result<(), AcceptanceError> {
        let mut diagnostics = schema.validate_config(config);
        let response = resource
            .validate(
                self.op_ctx(),
                ValidateResourceConfigRequest {
                    type_name: resource.type_name().to_string(),
                    config: config.clone(),
                },
            )
            .await;
        diagnostics.extend(response.diagnostics);
        fail_on_errors(address, "validate", &diagnostics)
    }

    async fn apply_block(&mut self, block: &ResourceBlock) -> Result<(), AcceptanceError> {
        let address = block.address();
        let (resource, schema) = self.lookup(&block.type_name)?;
        let config = block.resolve(&self.state)?;
        self.validate(&address, &resource, &schema, &config).await?;

        let prior = self.state.get(&address).map(|r| r.state.clone());
        let change = plan_resource_change(&schema, prior.as_ref(), &config);
        fail_on_errors(&address, "plan", &change.diagnostics)?;
        info!(address = %address, action = %change.action, "planned change");

        let new_state = match (change.action, prior) {
            (PlanAction::NoOp, Some(prior)) => prior,
            (PlanAction::Update, Some(prior)) => {
                let response = resource
                    .update(
                        self.op_ctx(),
                        UpdateResourceRequest {
                            type_name: block.type_name.clone(),
                            prior_state: prior,
                            planned_state: change.planned_state,
                            config,
                        },
                    )
                    .await;
                fail_on_errors(&address, "update", &response.diagnostics)?;
                response.new_state
            }
            (PlanAction::Replace, Some(_)) => {
                debug!(
                    address = %address,
                    attributes = ?change.requires_replace.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "replacement forced"
                );
                self.destroy_resource(&address).await?;
                self.create(&address, &resource, &block.type_name, change.planned_state, config)
                    .await?
            }
            (_, _) => {
                self.create(&address, &resource, &block.type_name, change.planned_state, config)
                    .await?
            }
        };

        check_applied_state(&address, &new_state)?;
        self.state.insert(
            address,
            ResourceState::new(block.type_name.clone(), new_state, block.dependencies()),
        );
        Ok(())
    }

    async fn create(
        &self,
        address: &str,
        resource: &Arc<dyn Resource>,
        type_name: &str,
        planned_state: DynamicValue,
        config: DynamicValue,
    ) -> Result<DynamicValue, AcceptanceError> {
        let response = resource
            .create(
                self.op_ctx(),
                CreateResourceRequest {
                    type_name: type_name.to_string(),
                    planned_state,
                    config,
                },
            )
            .await;
        fail_on_errors(address, "create", &response.diagnostics)?;
        Ok(response.new_state)
    }

    async fn destroy_resource(&mut self, address: &str) -> Result<(), AcceptanceError> {
        let Some(current) = self.state.get(address).cloned() else {
            return Ok(());
        };
        let (resource, _) = self.lookup(&current.type_name)?;
        let response = resource
            .delete(
                self.op_ctx(),
                DeleteResourceRequest {
                    type_name: current.type_name.clone(),
                    prior_state: current.state,
                },
            )
            .await;
        fail_on_errors(address, "delete", &response.diagnostics)?;
        self.state.remove(address);
        info!(address = %address, "destroyed");
        Ok(())
    }

    /// Human-readable list of blocks that would still change
    fn pending_changes(&self, ordered: &[&ResourceBlock]) -> Result<Vec<String>, AcceptanceError> {
        let mut pending = Vec::new();
        for block in ordered {
            let address = block.address();
            let (_, schema) = self.lookup(&block.type_name)?;
            let prior = self.state.get(&address);

            let config = match block.resolve(&self.state) {
                Ok(config) => config,
                Err(e) => {
                    pending.push(format!("{}: {}", address, e));
                    continue;
                }
            };
            let change = plan_resource_change(&schema, prior.map(|r| &r.state), &config);
            if change.is_noop() {
                continue;
            }

            let before = prior.map(ResourceState::attributes).unwrap_or_default();
            let after =
                ResourceState::new(block.type_name.clone(), change.planned_state, vec![]).attributes();
            pending.push(format!("{} will be {}d", address, change.action));
            pending.extend(diff_attributes(&before, &after, &[]));
        }
        Ok(pending)
    }

    async fn run_import_step(
        &mut self,
        import: &ImportStep,
        check: Option<&dyn StateCheck>,
    ) -> Result<(), AcceptanceError> {
        let address = import.resource_name.as_str();
        let import_error = |message: String| AcceptanceError::Import {
            address: address.to_string(),
            message,
        };

        let existing = self
            .state
            .get(address)
            .cloned()
            .ok_or_else(|| import_error("resource not found in state".to_string()))?;
        let id = match &import.id {
            Some(id) => id.clone(),
            None => existing
                .id()
                .map(str::to_string)
                .ok_or_else(|| import_error("resource in state has no id".to_string()))?,
        };
        let (resource, _) = self.lookup(&existing.type_name)?;
        info!(address, id = %id, "importing resource");

        let response = resource
            .import_state(
                self.op_ctx(),
                ImportResourceStateRequest {
                    type_name: existing.type_name.clone(),
                    id: id.clone(),
                },
            )
            .await;
        if has_errors(&response.diagnostics) {
            return Err(import_error(format_errors(&response.diagnostics)));
        }
        let imported = response
            .imported_resources
            .into_iter()
            .find(|r| r.type_name == existing.type_name)
            .ok_or_else(|| {
                import_error(format!("no {} returned for id {}", existing.type_name, id))
            })?;

        let read = resource
            .read(
                self.op_ctx(),
                ReadResourceRequest {
                    type_name: existing.type_name.clone(),
                    current_state: imported.state,
                },
            )
            .await;
        if has_errors(&read.diagnostics) {
            return Err(import_error(format_errors(&read.diagnostics)));
        }
        let imported_state = match read.new_state {
            Some(state) if !state.is_null() => state,
            _ => {
                return Err(import_error(format!(
                    "cannot import non-existent remote object with id {}",
                    id
                )))
            }
        };

        let imported = ResourceState::new(existing.type_name.clone(), imported_state, vec![]);
        let diff = diff_attributes(
            &existing.attributes(),
            &imported.attributes(),
            &import.verify_ignore,
        );
        if !diff.is_empty() {
            return Err(AcceptanceError::ImportVerify {
                address: address.to_string(),
                diff: diff.join("\n"),
            });
        }

        if let Some(check) = check {
            let mut imported_view = self.state.clone();
            imported_view.insert(address, imported);
            check.check(&imported_view).await?;
        }
        Ok(())
    }

    async fn destroy_all(&mut self) -> Result<(), AcceptanceError> {
        let mut errors = Vec::new();
        for address in self.state.destroy_order() {
            if let Err(e) = self.destroy_resource(&address).await {
                warn!(address = %address, error = %e, "failed to destroy resource");
                errors.push(e.to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AcceptanceError::Destroy(errors.join("\n")))
        }
    }
}

/// Applied state must carry a known id and no unknown values
fn check_applied_state(address: &str, state: &DynamicValue) -> Result<(), AcceptanceError> {
    let invalid = |message: &str| AcceptanceError::Diagnostics {
        address: address.to_string(),
        operation: "apply".to_string(),
        message: message.to_string(),
    };

    let id_known = state
        .get(&crate::types::AttributePath::new("id"))
        .and_then(|id| id.as_str())
        .is_some_and(|id| !id.is_empty());
    if !id_known {
        return Err(invalid("provider returned state without an id"));
    }
    if !state.value.is_wholly_known() {
        return Err(invalid("provider returned unknown values after apply"));
    }
    Ok(())
}
