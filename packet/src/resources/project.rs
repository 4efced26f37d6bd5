//! Project resource implementation

use async_trait::async_trait;
use tfplug::context::Context;
use tfplug::defaults::StaticDefault;
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
use tfplug::validator::StringLengthValidator;

use super::{api_diagnostic, optional_string, required_string};
use crate::api::projects::{CreateProjectRequest, Project, UpdateProjectRequest};
use crate::api::{with_context, Client};
use crate::PacketProviderData;

pub struct ProjectResource {
    client: Client,
}

impl ProjectResource {
    pub fn new(data: &PacketProviderData) -> Self {
        Self {
            client: data.client.clone(),
        }
    }
}

fn project_state(project: &Project) -> Result<DynamicValue, Diagnostic> {
    let mut state = DynamicValue::object();
    let build = |state: &mut DynamicValue| -> tfplug::Result<()> {
        state.set_string(&AttributePath::new("id"), project.id.as_str())?;
        state.set_string(&AttributePath::new("name"), project.name.as_str())?;
        state.set_optional_string(
            &AttributePath::new("organization_id"),
            project.organization_id(),
        )?;
        state.set_optional_string(
            &AttributePath::new("payment_method_id"),
            project.payment_method_id(),
        )?;
        state.set_bool(
            &AttributePath::new("backend_transfer"),
            project.backend_transfer_enabled,
        )?;
        state.set_string(&AttributePath::new("created"), project.created_at.as_str())?;
        state.set_string(&AttributePath::new("updated"), project.updated_at.as_str())?;
        Ok(())
    };
    build(&mut state)
        .map_err(|e| Diagnostic::error("Failed to build project state", e.to_string()))?;
    Ok(state)
}

/// `backend_transfer` from a plan; the planner fills in the default
fn backend_transfer(value: &DynamicValue) -> bool {
    value
        .get_optional_bool(&AttributePath::new("backend_transfer"))
        .ok()
        .flatten()
        .unwrap_or(false)
}

impl ProjectResource {
    async fn create_project(
        &self,
        ctx: &Context,
        request: &CreateResourceRequest,
    ) -> Result<Project, Diagnostic> {
        let config = &request.config;
        let create = CreateProjectRequest {
            name: required_string(config, "name")?,
            organization_id: optional_string(config, "organization_id")?,
            payment_method_id: optional_string(config, "payment_method_id")?,
        };

        let api = self.client.projects();
        let project = with_context(ctx, api.create(&create))
            .await
            .map_err(|e| api_diagnostic("Failed to create project", &e))?;
        tracing::info!(id = %project.id, "created project");

        // Backend transfer can only be switched on after creation
        if backend_transfer(&request.planned_state) && !project.backend_transfer_enabled {
            let update = UpdateProjectRequest {
                backend_transfer_enabled: Some(true),
                ..UpdateProjectRequest::default()
            };
            return with_context(ctx, api.update(&project.id, &update))
                .await
                .map_err(|e| api_diagnostic("Failed to enable backend transfer", &e));
        }

        Ok(project)
    }

    async fn update_project(
        &self,
        ctx: &Context,
        request: &UpdateResourceRequest,
    ) -> Result<Project, Diagnostic> {
        let prior = &request.prior_state;
        let config = &request.config;
        let id = required_string(prior, "id")?;

        let name = required_string(config, "name")?;
        let payment_method_id = optional_string(config, "payment_method_id")?;
        let transfer = backend_transfer(&request.planned_state);
        let prior_payment_method = optional_string(prior, "payment_method_id")?;

        let update = UpdateProjectRequest {
            name: (optional_string(prior, "name")?.as_deref() != Some(name.as_str()))
                .then_some(name),
            payment_method_id: payment_method_id
                .filter(|pm| prior_payment_method.as_ref() != Some(pm)),
            backend_transfer_enabled: (backend_transfer(prior) != transfer).then_some(transfer),
        };

        let api = self.client.projects();
        let result = if update.is_empty() {
            with_context(ctx, api.get(&id)).await
        } else {
            with_context(ctx, api.update(&id, &update)).await
        };
        result.map_err(|e| api_diagnostic("Failed to update project", &e))
    }
}

#[async_trait]
impl Resource for ProjectResource {
    fn type_name(&self) -> &str {
        "packet_project"
    }

    async fn schema(&self, _ctx: Context, _request: ResourceSchemaRequest) -> ResourceSchemaResponse {
        let schema = SchemaBuilder::new()
            .version(0)
            .description("Manages a Packet project")
            .attribute(
                AttributeBuilder::string("id")
                    .description("The project identifier")
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .attribute(
                AttributeBuilder::string("name")
                    .description("The name of the project")
                    .required()
                    .validator(StringLengthValidator {
                        min: Some(1),
                        max: Some(80),
                    })
                    .build(),
            )
            .attribute(
                AttributeBuilder::string("organization_id")
                    .description("The organization owning the project; defaults to the user's primary organization")
                    .optional()
                    .computed()
                    .force_new()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .attribute(
                AttributeBuilder::string("payment_method_id")
                    .description("The payment method billed for the project")
                    .optional()
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .attribute(
                AttributeBuilder::bool("backend_transfer")
                    .description("Enable backend transfer between facilities")
                    .optional()
                    .computed()
                    .default(StaticDefault::bool(false))
                    .build(),
            )
            .attribute(
                AttributeBuilder::string("created")
                    .computed()
                    .plan_modifier(UseStateForUnknown)
                    .build(),
            )
            .attribute(AttributeBuilder::string("updated").computed().build())
            .build();

        ResourceSchemaResponse {
            schema,
            diagnostics: vec![],
        }
    }

    async fn create(&self, ctx: Context, request: CreateResourceRequest) -> CreateResourceResponse {
        match self
            .create_project(&ctx, &request)
            .await
            .and_then(|project| project_state(&project))
        {
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

        match with_context(&ctx, self.client.projects().get(&id)).await {
            Ok(project) => match project_state(&project) {
                Ok(state) => ReadResourceResponse {
                    new_state: Some(state),
                    diagnostics: vec![],
                },
                Err(diag) => ReadResourceResponse {
                    new_state: Some(request.current_state),
                    diagnostics: vec![diag],
                },
            },
            Err(e) if e.is_not_found() => {
                tracing::warn!(%id, "project not found, removing from state");
                ReadResourceResponse {
                    new_state: None,
                    diagnostics: vec![],
                }
            }
            Err(e) => ReadResourceResponse {
                new_state: Some(request.current_state),
                diagnostics: vec![api_diagnostic("Failed to read project", &e)],
            },
        }
    }

    async fn update(&self, ctx: Context, request: UpdateResourceRequest) -> UpdateResourceResponse {
        match self
            .update_project(&ctx, &request)
            .await
            .and_then(|project| project_state(&project))
        {
            Ok(new_state) => {
                tracing::info!("updated project");
                UpdateResourceResponse {
                    new_state,
                    diagnostics: vec![],
                }
            }
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

        let diagnostics = match with_context(&ctx, self.client.projects().delete(&id)).await {
            Ok(()) => {
                tracing::info!(%id, "deleted project");
                vec![]
            }
            Err(e) if e.is_not_found() => vec![],
            Err(e) => vec![api_diagnostic("Failed to delete project", &e)],
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_helpers::create_test_client;
    use mockito::{Matcher, Server};
    use tfplug::plan::{plan_resource_change, PlanAction};
    use tfplug::types::Dynamic;

    fn resource(url: &str) -> ProjectResource {
        ProjectResource::new(&PacketProviderData::new(create_test_client(url)))
    }

    fn project_body(transfer: bool) -> String {
        serde_json::json!({
            "id": "proj-1",
            "name": "test-1",
            "created_at": "2020-01-01T00:00:00Z",
            "updated_at": "2020-01-01T00:00:00Z",
            "organization": {"href": "/organizations/org-1"},
            "payment_method": {"href": "/payment-methods/pm-1"},
            "backend_transfer_enabled": transfer,
            "href": "/projects/proj-1"
        })
        .to_string()
    }

    fn object(entries: &[(&str, Dynamic)]) -> DynamicValue {
        let mut value = DynamicValue::object();
        for (name, v) in entries {
            value.set_dynamic(&AttributePath::new(name), v.clone()).unwrap();
        }
        value
    }

    #[tokio::test]
    async fn create_enables_backend_transfer_after_creation() {
        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", "/projects")
            .match_body(Matcher::Json(serde_json::json!({"name": "test-1"})))
            .with_status(201)
            .with_body(project_body(false))
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/projects/proj-1")
            .match_body(Matcher::Json(
                serde_json::json!({"backend_transfer_enabled": true}),
            ))
            .with_status(200)
            .with_body(project_body(true))
            .create_async()
            .await;

        let config = object(&[("name", "test-1".into()), ("backend_transfer", true.into())]);
        let response = resource(&server.url())
            .create(
                Context::new(),
                CreateResourceRequest {
                    type_name: "packet_project".into(),
                    planned_state: config.clone(),
                    config,
                },
            )
            .await;

        assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
        let state = response.new_state;
        assert!(state.get_bool(&AttributePath::new("backend_transfer")).unwrap());
        assert_eq!(
            state.get_string(&AttributePath::new("organization_id")).unwrap(),
            "org-1"
        );

        create.assert_async().await;
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn create_skips_the_patch_without_backend_transfer() {
        let mut server = Server::new_async().await;
        let _create = server
            .mock("POST", "/projects")
            .with_status(201)
            .with_body(project_body(false))
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/projects/proj-1")
            .expect(0)
            .create_async()
            .await;

        let config = object(&[("name", "test-1".into())]);
        let response = resource(&server.url())
            .create(
                Context::new(),
                CreateResourceRequest {
                    type_name: "packet_project".into(),
                    planned_state: object(&[
                        ("name", "test-1".into()),
                        ("backend_transfer", false.into()),
                    ]),
                    config,
                },
            )
            .await;

        assert!(response.diagnostics.is_empty());
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn update_renames_without_touching_other_fields() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PATCH", "/projects/proj-1")
            .match_body(Matcher::Json(serde_json::json!({"name": "test-1"})))
            .with_status(200)
            .with_body(project_body(false))
            .create_async()
            .await;

        let prior = object(&[
            ("id", "proj-1".into()),
            ("name", "test-0".into()),
            ("payment_method_id", "pm-1".into()),
            ("backend_transfer", false.into()),
        ]);
        let response = resource(&server.url())
            .update(
                Context::new(),
                UpdateResourceRequest {
                    type_name: "packet_project".into(),
                    prior_state: prior,
                    planned_state: object(&[
                        ("name", "test-1".into()),
                        ("backend_transfer", false.into()),
                    ]),
                    config: object(&[("name", "test-1".into())]),
                },
            )
            .await;

        assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn update_switches_payment_method_in_place() {
        let mut body: serde_json::Value = serde_json::from_str(&project_body(false)).unwrap();
        body["payment_method"] = serde_json::json!({"href": "/payment-methods/pm-2"});

        let mut server = Server::new_async().await;
        let mock = server
            .mock("PATCH", "/projects/proj-1")
            .match_body(Matcher::Json(
                serde_json::json!({"payment_method_id": "pm-2"}),
            ))
            .with_status(200)
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;

        let resource = resource(&server.url());
        let schema = resource
            .schema(Context::new(), ResourceSchemaRequest)
            .await
            .schema;
        let prior = project_state(&serde_json::from_str(&project_body(false)).unwrap()).unwrap();
        let config = object(&[
            ("name", "test-1".into()),
            ("payment_method_id", "pm-2".into()),
        ]);
        let change = plan_resource_change(&schema, Some(&prior), &config);
        assert_eq!(change.action, PlanAction::Update);
        assert!(change.requires_replace.is_empty());

        let response = resource
            .update(
                Context::new(),
                UpdateResourceRequest {
                    type_name: "packet_project".into(),
                    prior_state: prior,
                    planned_state: change.planned_state,
                    config,
                },
            )
            .await;

        assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
        assert_eq!(
            response
                .new_state
                .get_string(&AttributePath::new("payment_method_id"))
                .unwrap(),
            "pm-2"
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn changing_organization_replaces_the_project() {
        let schema = resource("http://localhost")
            .schema(Context::new(), ResourceSchemaRequest)
            .await
            .schema;
        let prior = project_state(&serde_json::from_str(&project_body(false)).unwrap()).unwrap();

        let same = object(&[("name", "test-1".into())]);
        assert_eq!(
            plan_resource_change(&schema, Some(&prior), &same).action,
            PlanAction::NoOp
        );

        let moved = object(&[("name", "test-1".into()), ("organization_id", "org-2".into())]);
        let change = plan_resource_change(&schema, Some(&prior), &moved);
        assert_eq!(change.action, PlanAction::Replace);
        assert_eq!(change.requires_replace, vec![AttributePath::new("organization_id")]);
    }

    #[tokio::test]
    async fn read_of_deleted_project_removes_it_from_state() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/projects/proj-1")
            .with_status(404)
            .with_body(r#"{"errors":["Not found"]}"#)
            .create_async()
            .await;

        let response = resource(&server.url())
            .read(
                Context::new(),
                ReadResourceRequest {
                    type_name: "packet_project".into(),
                    current_state: object(&[("id", "proj-1".into())]),
                },
            )
            .await;

        assert!(response.new_state.is_none());
        assert!(response.diagnostics.is_empty());
    }
}
