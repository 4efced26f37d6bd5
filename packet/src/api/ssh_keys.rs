//! SSH key API implementation

use super::common::Href;
use super::{ApiError, Client};
use serde::{Deserialize, Serialize};

/// SSH key as returned by the API
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SshKey {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub owner: Option<Href>,
    #[serde(default)]
    pub href: String,
}

impl SshKey {
    /// Id of the user or project owning the key
    pub fn owner_id(&self) -> Option<&str> {
        self.owner.as_ref().and_then(Href::id)
    }

    /// Project id when the key belongs to a project
    pub fn project_id(&self) -> Option<&str> {
        self.owner
            .as_ref()
            .filter(|owner| owner.href.contains("/projects/"))
            .and_then(Href::id)
    }
}

/// Request body for creating SSH keys
#[derive(Debug, Serialize)]
pub struct CreateSshKeyRequest {
    pub label: String,
    pub key: String,
}

/// Request body for updating SSH keys; unset fields are left unchanged
#[derive(Debug, Default, Serialize)]
pub struct UpdateSshKeyRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl UpdateSshKeyRequest {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.key.is_none()
    }
}

fn key_path(id: &str) -> String {
    format!("/ssh-keys/{}", urlencoding::encode(id))
}

/// SSH keys API
pub struct SshKeysApi<'a> {
    client: &'a Client,
}

impl<'a> SshKeysApi<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// POST /ssh-keys
    pub async fn create(&self, request: &CreateSshKeyRequest) -> Result<SshKey, ApiError> {
        self.client.post("/ssh-keys", request).await
    }

    /// POST /projects/{project_id}/ssh-keys
    pub async fn create_in_project(
        &self,
        project_id: &str,
        request: &CreateSshKeyRequest,
    ) -> Result<SshKey, ApiError> {
        let path = format!("/projects/{}/ssh-keys", urlencoding::encode(project_id));
        self.client.post(&path, request).await
    }

    /// GET /ssh-keys/{id}
    pub async fn get(&self, id: &str) -> Result<SshKey, ApiError> {
        self.client.get(&key_path(id)).await
    }

    /// PATCH /ssh-keys/{id}
    pub async fn update(&self, id: &str, request: &UpdateSshKeyRequest) -> Result<SshKey, ApiError> {
        self.client.patch(&key_path(id), request).await
    }

    /// DELETE /ssh-keys/{id}
    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.client.delete(&key_path(id)).await
    }
}
