//! Project API implementation

use super::common::Href;
use super::{ApiError, Client};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub organization: Option<Href>,
    #[serde(default)]
    pub payment_method: Option<Href>,
    #[serde(default)]
    pub backend_transfer_enabled: bool,
    #[serde(default)]
    pub href: String,
}

impl Project {
    pub fn organization_id(&self) -> Option<&str> {
        self.organization.as_ref().and_then(Href::id)
    }

    pub fn payment_method_id(&self) -> Option<&str> {
        self.payment_method.as_ref().and_then(Href::id)
    }
}

/// Request body for creating projects
#[derive(Debug, Serialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<String>,
}

/// Request body for updating projects; unset fields are left unchanged
#[derive(Debug, Default, Serialize)]
pub struct UpdateProjectRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_transfer_enabled: Option<bool>,
}

impl UpdateProjectRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.payment_method_id.is_none()
            && self.backend_transfer_enabled.is_none()
    }
}

fn project_path(id: &str) -> String {
    format!("/projects/{}", urlencoding::encode(id))
}

/// Projects API
pub struct ProjectsApi<'a> {
    client: &'a Client,
}

impl<'a> ProjectsApi<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// POST /projects
    pub async fn create(&self, request: &CreateProjectRequest) -> Result<Project, ApiError> {
        self.client.post("/projects", request).await
    }

    /// GET /projects/{id}
    pub async fn get(&self, id: &str) -> Result<Project, ApiError> {
        self.client.get(&project_path(id)).await
    }

    /// PATCH /projects/{id}
    pub async fn update(
        &self,
        id: &str,
        request: &UpdateProjectRequest,
    ) -> Result<Project, ApiError> {
        self.client.patch(&project_path(id), request).await
    }

    /// DELETE /projects/{id}
    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.client.delete(&project_path(id)).await
    }
}
