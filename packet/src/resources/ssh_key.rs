//! SSH key resources
//!
//! `packet_ssh_key` manages keys owned by the authenticated user and
//! `packet_project_ssh_key` manages keys owned by a project. Both share the
//! `/ssh-keys/{id}` endpoints for read, update and delete; they only differ
//! in where the key is created and in the extra `project_id` attribute.

use async_trait::async_trait;
use regex::Regex;
use tfplug::context::Context;
use tfplug::import::import_state_passthrough_id;
use tfplug::plan_modifier::UseStateForUnknown;
use tfplug::resource::{
    CreateResourceRequest, CreateResourceResponse, DeleteResourceRequest, DeleteResourceResponse,
    ImportResourceStateRequest, ImportResourceStateResponse, ReadResourceRequest,
    ReadResourceResponse, Resource, ResourceSchemaRequest, ResourceSchemaResponse,
    UpdateResourceRequest, UpdateResourceResponse,
};
use tfplug::schema::{AttributeBuilder, SchemaBuilder};
use tfplug::types::{AttributePath, Diagnostic, DynamicValue};
use tfplug::validator::{StringLengthValidator, StringPatternValidator};

use super::{api_diagnostic, required_string};
use crate::api::ssh_keys::{CreateSshKeyRequest, SshKey, UpdateSshKeyRequest};
use crate::api::{with_context, Client};
use crate::PacketProviderData;

const PUBLIC_KEY_PATTERN: &str = r"^(ssh-(rsa|dss|ed25519)|ecdsa-sha2-nistp(256|384|521)|sk-ssh-ed25519@openssh\.com|sk-ecdsa-sha2-nistp256@openssh\.com) [A-Za-z0-9+/]+={0,3}( [^\r\n]*)?\s*$";

fn public_key_validator() -> Result<StringPatternValidator, regex::Error> {
    Ok(StringPatternValidator::new(
        Regex::new(PUBLIC_KEY_PATTERN)?,
        "an OpenSSH public key",
    ))
}

/// Who owns the keys a resource manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    Account,
    Project,
}

pub struct SshKeyResource {
    client: Client,
    scope: KeyScope,
}

impl SshKeyResource {
    /// `packet_ssh_key`
    pub fn account(data: &PacketProviderData) -> Self {
        Self {
            client: data.client.clone(),
            scope: KeyScope::Account,
        }
    }

    /// `packet_project_ssh_key`
    pub fn project(data: &PacketProviderData) -> Self {
        Self {
            client: data.client.clone(),
            scope: KeyScope::Project,
        }
    }

    fn key_state(&self, key: &SshKey) -> Result<DynamicValue, Diagnostic> {
        let mut state = DynamicValue::object();
        let build = |state: &mut DynamicValue| -> tfplug::Result<()> {
            state.set_string(&AttributePath::new("id"), key.id.as_str())?;
            state.set_string(&AttributePath::new("name"), key.label.as_str())?;
            state.set_string(&AttributePath::new("public_key"), key.key.as_str())?;
            state.set_string(&AttributePath::new("fingerprint"), key.fingerprint.as_str())?;
            state.set_optional_string(&AttributePath::new("owner_id"), key.owner_id())?;
            state.set_string(&AttributePath::new("created"), key.created_at.as_str())?;
            state.set_string(&AttributePath::new("updated"), key.updated_at.as_str())?;
            if self.scope == KeyScope::Project {
                state.set_optional_string(&AttributePath::new("project_id"), key.project_id())?;
            }
            Ok(())
        };
        build(&mut state).map_err(|e| Diagnostic::error("Failed to build SSH key state", e.to_string()))?;
        Ok(state)
    }

    async fn create_key(&self, ctx: &Context, config: &DynamicValue) -> Result<SshKey, Diagnostic> {
        let request = CreateSshKeyRequest {
            label: required_string(config, "name")?,
            key: required_string(config, "public_key")?,
        };
        let api = self.client.ssh_keys();
        let result = match self.scope {
            KeyScope::Account => with_context(ctx, api.create(&request)).await,
            KeyScope::Project => {
                let project_id = required_string(config, "project_id")?;
                with_context(ctx, api.create_in_project(&project_id, &request)).await
            }
        };
        result.map_err(|e| api_diagnostic("Failed to create SSH key", &e))
    }

    async fn update_key(
        &self,
        ctx: &Context,
        prior: &DynamicValue,
        config: &DynamicValue,
    ) -> Result<SshKey, Diagnostic> {
        let id = required_string(prior, "id")?;
        let label = required_string(config, "name")?;
        let key = required_string(config, "public_key")?;

        let request = UpdateSshKeyRequest {
            label: (required_string(prior, "name").ok().as_deref() != Some(label.as_str()))
                .then_some(label),
            key: (required_string(prior, "public_key").ok().as_deref() != Some(key.as_str()))
                .then_some(key),
        };

        let api = self.client.ssh_keys();
        let result = if request.is_empty() {
            with_context(ctx, api.get(&id)).await
        } else {
            with_context(ctx, api.update(&id, &request)).await
        };
        result.map_err(|e| api_diagnostic("Failed to update SSH key", &e))
    }
}

#[async_trait]
impl Resource for SshKeyResource {
    fn type_name(&self) -> &str {
        match self.scope {
            KeyScope::Account => "packet_ssh_key",
            KeyScope::Project => "packet_project_ssh_key",
        }
    }

    async fn schema(&self, _ctx: Context, _request: ResourceSchemaRequest) -> ResourceSchemaResponse {
        let mut diagnostics = vec![];

        let mut public_key = AttributeBuilder::string("public_key")
            .description("The public key in OpenSSH format")
            .required();
        match public_key_validator() {
            Ok(validator) => public_key = public_key.validator(validator),
            Err(e) => diagnostics.push(Diagnostic::error(
                "Invalid public key pattern",
                e.to_string(),
            )),
        }

        let description = match self.scope {
            KeyScope::Account => "Manages an SSH key owned by the authenticated user",
            KeyScope::Project => "Manages an SSH key owned by a project",
        };

        let mut builder = SchemaBuilder::new()
            .version(0)
            .description(description)
            .attribute(
                AttributeBuilder::string("id")
                    .description("The key identifier")
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .attribute(
                AttributeBuilder::string("name")
                    .description("The label of the key")
                    .required()
                    .validator(StringLengthValidator {
                        min: Some(1),
                        max: None,
                    })
                    .build(),
            )
            .attribute(public_key.build())
            .attribute(
                AttributeBuilder::string("fingerprint")
                    .description("The fingerprint of the key")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::string("owner_id")
                    .description("The id of the user or project owning the key")
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .attribute(
                AttributeBuilder::string("created")
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .attribute(AttributeBuilder::string("updated").computed().build());

        if self.scope == KeyScope::Project {
            builder = builder.attribute(
                AttributeBuilder::string("project_id")
                    .description("The project the key belongs to")
                    .required()
                    .force_new()
                    .build(),
            );
        }

        ResourceSchemaResponse {
            schema: builder.build(),
            diagnostics,
        }
    }

    async fn create(&self, ctx: Context, request: CreateResourceRequest) -> CreateResourceResponse {
        let result = match self.create_key(&ctx, &request.config).await {
            Ok(key) => {
                tracing::info!(id = %key.id, resource = self.type_name(), "created SSH key");
                self.key_state(&key)
            }
            Err(diag) => Err(diag),
        };

        match result {
            Ok(new_state) => CreateResourceResponse {
                new_state,
                diagnostics: vec![],
            },
            Err(diag) => CreateResourceResponse {
                new_state: request.planned_state,
                diagnostics: vec![diag],
            },
        }
    }

    async fn read(&self, ctx: Context, request: ReadResourceRequest) -> ReadResourceResponse {
        let id = match required_string(&request.current_state, "id") {
            Ok(id) => id,
            Err(diag) => {
                return ReadResourceResponse {
                    new_state: Some(request.current_state),
                    diagnostics: vec![diag],
                }
            }
        };

        match with_context(&ctx, self.client.ssh_keys().get(&id)).await {
            Ok(key) => {
                if self.scope == KeyScope::Project && key.project_id().is_none() {
                    return ReadResourceResponse {
                        new_state: Some(request.current_state),
                        diagnostics: vec![Diagnostic::error(
                            "Not a project SSH key",
                            format!("SSH key {} is not owned by a project", id),
                        )],
                    };
                }
                match self.key_state(&key) {
                    Ok(state) => ReadResourceResponse {
                        new_state: Some(state),
                        diagnostics: vec![],
                    },
                    Err(diag) => ReadResourceResponse {
                        new_state: Some(request.current_state),
                        diagnostics: vec![diag],
                    },
                }
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(%id, "SSH key not found, removing from state");
                ReadResourceResponse {
                    new_state: None,
                    diagnostics: vec![],
                }
            }
            Err(e) => ReadResourceResponse {
                new_state: Some(request.current_state),
                diagnostics: vec![api_diagnostic("Failed to read SSH key", &e)],
            },
        }
    }

    async fn update(&self, ctx: Context, request: UpdateResourceRequest) -> UpdateResourceResponse {
        let result = match self
            .update_key(&ctx, &request.prior_state, &request.config)
            .await
        {
            Ok(key) => {
                tracing::info!(id = %key.id, "updated SSH key");
                self.key_state(&key)
            }
            Err(diag) => Err(diag),
        };

        match result {
            Ok(new_state) => UpdateResourceResponse {
                new_state,
                diagnostics: vec![],
            },
            Err(diag) => UpdateResourceResponse {
                new_state: request.prior_state,
                diagnostics: vec![diag],
            },
        }
    }

    async fn delete(&self, ctx: Context, request: DeleteResourceRequest) -> DeleteResourceResponse {
        let id = match required_string(&request.prior_state, "id") {
            Ok(id) => id,
            Err(diag) => {
                return DeleteResourceResponse {
                    diagnostics: vec![diag],
                }
            }
        };

        let diagnostics = match with_context(&ctx, self.client.ssh_keys().delete(&id)).await {
            Ok(()) => {
                tracing::info!(%id, "deleted SSH key");
                vec![]
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(%id, "SSH key already gone");
                vec![]
            }
            Err(e) => vec![api_diagnostic("Failed to delete SSH key", &e)],
        };

        DeleteResourceResponse { diagnostics }
    }

    async fn import_state(
        &self,
        ctx: Context,
        request: ImportResourceStateRequest,
    ) -> ImportResourceStateResponse {
        let mut response = ImportResourceStateResponse {
            imported_resources: vec![],
            diagnostics: vec![],
        };
        import_state_passthrough_id(&ctx, AttributePath::new("id"), &request, &mut response);
        response
    }
}
