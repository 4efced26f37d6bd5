//! Shared setup for the acceptance tests
//!
//! Tests run against an in-process fake of the Packet API unless `TF_ACC`
//! is set, in which case they talk to the live API with
//! `PACKET_AUTH_TOKEN` (and `PACKET_API_URL` if set).

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use packet::api::{Client, DEFAULT_BASE_URL};
use packet::{PacketProvider, ENV_API_URL, ENV_AUTH_TOKEN};
use tfplug::testing::{
    acceptance_enabled, init_logging, CheckError, ResourceBlock, StateCheck, TestCase, TestState,
};
use tfplug::types::{AttributePath, DynamicValue};

const FAKE_TOKEN: &str = "fake-auth-token";
const FAKE_USER: &str = "user-0001";

/// Provider configuration plus a client for out-of-band checks
pub struct AccContext {
    pub provider_config: DynamicValue,
    pub client: Client,
    /// Present when running against the fake API
    pub fake: Option<FakePacketApi>,
    _server: Option<MockServer>,
}

impl AccContext {
    pub async fn new() -> Self {
        init_logging();
        if acceptance_enabled() {
            Self::live()
        } else {
            Self::fake().await
        }
    }

    fn live() -> Self {
        let token = std::env::var(ENV_AUTH_TOKEN)
            .expect("PACKET_AUTH_TOKEN must be set for acceptance tests");
        let base_url = std::env::var(ENV_API_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let mut provider_config = DynamicValue::object();
        provider_config
            .set_string(&AttributePath::new("auth_token"), token.as_str())
            .unwrap();
        provider_config
            .set_string(&AttributePath::new("base_url"), base_url.as_str())
            .unwrap();

        Self {
            provider_config,
            client: Client::new(&base_url, &token).unwrap(),
            fake: None,
            _server: None,
        }
    }

    async fn fake() -> Self {
        let server = MockServer::start().await;
        let fake = FakePacketApi::default();
        Mock::given(any())
            .respond_with(fake.clone())
            .mount(&server)
            .await;

        let mut provider_config = DynamicValue::object();
        provider_config
            .set_string(&AttributePath::new("auth_token"), FAKE_TOKEN)
            .unwrap();
        provider_config
            .set_string(&AttributePath::new("base_url"), server.uri())
            .unwrap();
        provider_config
            .set_number(&AttributePath::new("max_retries"), 0.0)
            .unwrap();

        Self {
            provider_config,
            client: Client::new(&server.uri(), FAKE_TOKEN).unwrap(),
            fake: Some(fake),
            _server: Some(server),
        }
    }

    /// A test case with the provider configured for this context and a
    /// destroy check covering every resource type
    pub fn case(&self) -> TestCase<PacketProvider> {
        TestCase::new(PacketProvider::new())
            .provider_config(self.provider_config.clone())
            .operation_timeout(Duration::from_secs(120))
            .check_destroy(Box::new(ResourcesDestroyed {
                client: self.client.clone(),
            }))
    }

    pub fn ssh_key_exists(&self, address: &str) -> Box<dyn StateCheck> {
        Box::new(SshKeyExists {
            client: self.client.clone(),
            address: address.to_string(),
        })
    }
}

pub fn ssh_key_block(n: u32, public_key: &str) -> ResourceBlock {
    ResourceBlock::new("packet_ssh_key", "foobar")
        .attr("name", format!("foobar-{}", n))
        .attr("public_key", public_key)
}

pub fn project_block(n: u32) -> ResourceBlock {
    named_project_block("test", n)
}

pub fn named_project_block(name: &str, n: u32) -> ResourceBlock {
    ResourceBlock::new("packet_project", name).attr("name", format!("{}-{}", name, n))
}

pub fn project_ssh_key_block(n: u32, public_key: &str) -> ResourceBlock {
    project_ssh_key_block_in("test", n, public_key)
}

/// `packet_project_ssh_key.foobar` owned by `packet_project.<project>`
pub fn project_ssh_key_block_in(project: &str, n: u32, public_key: &str) -> ResourceBlock {
    ResourceBlock::new("packet_project_ssh_key", "foobar")
        .attr("name", format!("foobar-{}", n))
        .attr("public_key", public_key)
        .reference("project_id", &format!("packet_project.{}", project), "id")
}

/// Collects the `id` of a resource each time its check runs
#[derive(Clone, Default)]
pub struct IdHistory {
    ids: Arc<Mutex<Vec<String>>>,
}

impl IdHistory {
    pub fn record(&self, address: &str) -> Box<dyn StateCheck> {
        Box::new(RecordId {
            ids: self.ids.clone(),
            address: address.to_string(),
        })
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.lock().unwrap().clone()
    }
}

struct RecordId {
    ids: Arc<Mutex<Vec<String>>>,
    address: String,
}

#[async_trait]
impl StateCheck for RecordId {
    async fn check(&self, state: &TestState) -> Result<(), CheckError> {
        let id = state
            .get(&self.address)
            .and_then(|resource| resource.id())
            .ok_or_else(|| CheckError::ResourceNotFound {
                address: self.address.clone(),
            })?;
        self.ids.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

/// The key recorded in state exists remotely under the same id
pub struct SshKeyExists {
    client: Client,
    address: String,
}

#[async_trait]
impl StateCheck for SshKeyExists {
    async fn check(&self, state: &TestState) -> Result<(), CheckError> {
        let resource = state
            .get(&self.address)
            .ok_or_else(|| CheckError::ResourceNotFound {
                address: self.address.clone(),
            })?;
        let id = resource
            .id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CheckError::Failed("No Record ID is set".to_string()))?;

        let key = self
            .client
            .ssh_keys()
            .get(id)
            .await
            .map_err(|e| CheckError::Failed(e.to_string()))?;
        if key.id != id {
            return Err(CheckError::Failed(format!(
                "SSH key not found: {} - {:?}",
                id, key
            )));
        }
        Ok(())
    }
}

/// No resource from the final state can still be fetched
pub struct ResourcesDestroyed {
    client: Client,
}

#[async_trait]
impl StateCheck for ResourcesDestroyed {
    async fn check(&self, state: &TestState) -> Result<(), CheckError> {
        for (address, resource) in state.iter() {
            let Some(id) = resource.id() else {
                continue;
            };
            let (found, what) = match resource.type_name.as_str() {
                "packet_ssh_key" | "packet_project_ssh_key" => {
                    (self.client.ssh_keys().get(id).await.map(|_| ()), "SSH key")
                }
                "packet_project" => (self.client.projects().get(id).await.map(|_| ()), "Project"),
                _ => continue,
            };
            match found {
                Ok(()) => {
                    return Err(CheckError::Failed(format!(
                        "{} still exists: {} ({})",
                        what, address, id
                    )))
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(CheckError::Failed(e.to_string())),
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeStore {
    ssh_keys: BTreeMap<String, Value>,
    projects: BTreeMap<String, Value>,
    next_id: u64,
    requests: Vec<String>,
}

impl FakeStore {
    fn new_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }

    fn timestamp(&self) -> String {
        format!(
            "2024-01-01T{:02}:{:02}:{:02}Z",
            self.next_id / 3600 % 24,
            self.next_id / 60 % 60,
            self.next_id % 60
        )
    }
}

/// Stateful stand-in for the Packet API, mounted on a wiremock server
#[derive(Clone, Default)]
pub struct FakePacketApi {
    store: Arc<Mutex<FakeStore>>,
}

fn reply(status: u16, body: Value) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(body)
}

fn api_errors(status: u16, message: &str) -> ResponseTemplate {
    reply(status, json!({ "errors": [message] }))
}

fn not_found() -> ResponseTemplate {
    api_errors(404, "Not found")
}

fn str_field<'a>(body: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    body.get(name).and_then(Value::as_str)
}

/// Checks that the key blob decodes and names the same type as its prefix
fn key_is_valid(key: &str) -> bool {
    let mut parts = key.split_whitespace();
    let (Some(kind), Some(blob)) = (parts.next(), parts.next()) else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(blob) else {
        return false;
    };
    if decoded.len() < 4 {
        return false;
    }
    let len = u32::from_be_bytes([decoded[0], decoded[1], decoded[2], decoded[3]]) as usize;
    decoded.get(4..4 + len) == Some(kind.as_bytes())
}

fn fingerprint(key: &str) -> String {
    let blob = key
        .split_whitespace()
        .nth(1)
        .and_then(|b| STANDARD.decode(b).ok())
        .unwrap_or_default();
    blob.iter()
        .rev()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

impl FakePacketApi {
    /// Requests received so far, as `METHOD /path`
    pub fn requests(&self) -> Vec<String> {
        self.store.lock().unwrap().requests.clone()
    }

    pub fn count_requests(&self, method: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.starts_with(&format!("{} ", method)))
            .count()
    }

    fn create_key(
        &self,
        store: &mut FakeStore,
        owner: String,
        body: &Map<String, Value>,
    ) -> ResponseTemplate {
        let label = str_field(body, "label").unwrap_or_default();
        let key = str_field(body, "key").unwrap_or_default();
        if label.is_empty() {
            return api_errors(422, "Label can't be blank");
        }
        if !key_is_valid(key) {
            return api_errors(422, "Key is invalid");
        }

        let id = store.new_id("key");
        let now = store.timestamp();
        let record = json!({
            "id": id,
            "label": label,
            "key": key,
            "fingerprint": fingerprint(key),
            "created_at": now,
            "updated_at": now,
            "owner": { "href": owner },
            "href": format!("/ssh-keys/{}", id),
        });
        store.ssh_keys.insert(id, record.clone());
        reply(201, record)
    }

    fn update_key(
        &self,
        store: &mut FakeStore,
        id: &str,
        body: &Map<String, Value>,
    ) -> ResponseTemplate {
        let now = store.timestamp();
        let Some(record) = store.ssh_keys.get_mut(id) else {
            return not_found();
        };
        if let Some(key) = str_field(body, "key") {
            if !key_is_valid(key) {
                return api_errors(422, "Key is invalid");
            }
            record["key"] = json!(key);
            record["fingerprint"] = json!(fingerprint(key));
        }
        if let Some(label) = str_field(body, "label") {
            record["label"] = json!(label);
        }
        record["updated_at"] = json!(now);
        reply(200, record.clone())
    }

    fn create_project(&self, store: &mut FakeStore, body: &Map<String, Value>) -> ResponseTemplate {
        let Some(name) = str_field(body, "name").filter(|n| !n.is_empty()) else {
            return api_errors(422, "Name can't be blank");
        };
        let organization = str_field(body, "organization_id").unwrap_or("org-default");
        let payment_method = str_field(body, "payment_method_id").unwrap_or("pm-default");

        let id = store.new_id("proj");
        let now = store.timestamp();
        let record = json!({
            "id": id,
            "name": name,
            "created_at": now,
            "updated_at": now,
            "organization": { "href": format!("/organizations/{}", organization) },
            "payment_method": { "href": format!("/payment-methods/{}", payment_method) },
            "backend_transfer_enabled": false,
            "href": format!("/projects/{}", id),
        });
        store.projects.insert(id, record.clone());
        reply(201, record)
    }

    fn update_project(
        &self,
        store: &mut FakeStore,
        id: &str,
        body: &Map<String, Value>,
    ) -> ResponseTemplate {
        let now = store.timestamp();
        let Some(record) = store.projects.get_mut(id) else {
            return not_found();
        };
        if let Some(name) = str_field(body, "name") {
            record["name"] = json!(name);
        }
        if let Some(pm) = str_field(body, "payment_method_id") {
            record["payment_method"] = json!({ "href": format!("/payment-methods/{}", pm) });
        }
        if let Some(enabled) = body.get("backend_transfer_enabled").and_then(Value::as_bool) {
            record["backend_transfer_enabled"] = json!(enabled);
        }
        record["updated_at"] = json!(now);
        reply(200, record.clone())
    }
}

impl Respond for FakePacketApi {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let method = request.method.as_str().to_string();
        let path = request.url.path().to_string();

        let mut store = self.store.lock().unwrap();
        store.requests.push(format!("{} {}", method, path));

        let token = request
            .headers
            .get("x-auth-token")
            .and_then(|v| v.to_str().ok());
        if token != Some(FAKE_TOKEN) {
            return api_errors(401, "Invalid authentication token");
        }

        let body: Map<String, Value> = if request.body.is_empty() {
            Map::new()
        } else {
            match serde_json::from_slice(&request.body) {
                Ok(body) => body,
                Err(_) => return api_errors(400, "Malformed JSON body"),
            }
        };

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match (method.as_str(), segments.as_slice()) {
            ("POST", ["ssh-keys"]) => {
                self.create_key(&mut store, format!("/users/{}", FAKE_USER), &body)
            }
            ("POST", ["projects", project_id, "ssh-keys"]) => {
                if !store.projects.contains_key(*project_id) {
                    return not_found();
                }
                self.create_key(&mut store, format!("/projects/{}", project_id), &body)
            }
            ("GET", ["ssh-keys", id]) => match store.ssh_keys.get(*id) {
                Some(record) => reply(200, record.clone()),
                None => not_found(),
            },
            ("PATCH", ["ssh-keys", id]) => self.update_key(&mut store, id, &body),
            ("DELETE", ["ssh-keys", id]) => match store.ssh_keys.remove(*id) {
                Some(_) => ResponseTemplate::new(204),
                None => not_found(),
            },
            ("POST", ["projects"]) => self.create_project(&mut store, &body),
            ("GET", ["projects", id]) => match store.projects.get(*id) {
                Some(record) => reply(200, record.clone()),
                None => not_found(),
            },
            ("PATCH", ["projects", id]) => self.update_project(&mut store, id, &body),
            ("DELETE", ["projects", id]) => {
                if store.projects.remove(*id).is_none() {
                    return not_found();
                }
                // Project keys go with their project
                let owner = format!("/projects/{}", id);
                store
                    .ssh_keys
                    .retain(|_, key| key["owner"]["href"].as_str() != Some(owner.as_str()));
                ResponseTemplate::new(204)
            }
            _ => not_found(),
        }
    }
}
