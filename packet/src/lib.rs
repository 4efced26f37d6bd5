//! Packet provider
//!
//! Manages SSH keys and projects through the Packet REST API.

pub mod api;
pub mod provider_data;
pub mod resources;

pub use provider_data::PacketProviderData;
pub use resources::PacketResourceKind;

use async_trait::async_trait;
use tfplug::context::Context;
use tfplug::provider::{
    ConfigureProviderRequest, ConfigureProviderResponse, Provider, ProviderSchemaRequest,
    ProviderSchemaResponse, ResourceRegistry,
};
use tfplug::schema::{AttributeBuilder, SchemaBuilder};
use tfplug::types::{AttributePath, Diagnostic, DynamicValue};
use tfplug::validator::{IntegerValidator, NumberRangeValidator};
use tfplug::TfplugError;

use resources::{ProjectResource, SshKeyResource};

pub const ENV_AUTH_TOKEN: &str = "PACKET_AUTH_TOKEN";
pub const ENV_API_URL: &str = "PACKET_API_URL";

const DEFAULT_MAX_RETRIES: u32 = 10;
const DEFAULT_MAX_RETRY_WAIT_SECONDS: u64 = 30;
const MAX_RETRIES_LIMIT: u32 = 100;
const MAX_RETRY_WAIT_SECONDS_LIMIT: u64 = 3600;

#[derive(Default)]
pub struct PacketProvider {
    provider_data: Option<PacketProviderData>,
}

impl PacketProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider already wired to `client`, for callers that build the
    /// client themselves
    pub fn with_client(client: api::Client) -> Self {
        Self {
            provider_data: Some(PacketProviderData::new(client)),
        }
    }

    pub fn provider_data(&self) -> Option<&PacketProviderData> {
        self.provider_data.as_ref()
    }
}

/// Provider settings after merging configuration and environment
#[derive(Debug, Clone, PartialEq)]
struct ProviderSettings {
    auth_token: String,
    base_url: String,
    max_retries: u32,
    max_retry_wait_seconds: u64,
}

fn config_string(config: &DynamicValue, name: &str) -> Option<String> {
    config
        .get_optional_string(&AttributePath::new(name))
        .ok()
        .flatten()
        .filter(|s| !s.is_empty())
}

fn config_number(config: &DynamicValue, name: &str) -> Option<f64> {
    config
        .get(&AttributePath::new(name))
        .and_then(|v| v.as_number())
}

/// A whole number within `min..=max`, or `None` when unset
fn config_integer(
    config: &DynamicValue,
    name: &str,
    min: u64,
    max: u64,
) -> Result<Option<u64>, Diagnostic> {
    let Some(n) = config_number(config, name) else {
        return Ok(None);
    };
    if n.is_finite() && n.fract() == 0.0 && n >= min as f64 && n <= max as f64 {
        return Ok(Some(n as u64));
    }
    Err(Diagnostic::error(
        format!("{} must be a whole number between {} and {}", name, min, max),
        format!("Got {}", n),
    )
    .with_attribute(AttributePath::new(name)))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

impl ProviderSettings {
    fn resolve(config: &DynamicValue) -> Result<Self, Diagnostic> {
        let auth_token = config_string(config, "auth_token")
            .or_else(|| env_string(ENV_AUTH_TOKEN))
            .ok_or_else(|| {
                Diagnostic::error(
                    "auth_token is required",
                    format!(
                        "Set auth_token in the provider configuration or the {} environment variable",
                        ENV_AUTH_TOKEN
                    ),
                )
                .with_attribute(AttributePath::new("auth_token"))
            })?;

        let base_url = config_string(config, "base_url")
            .or_else(|| env_string(ENV_API_URL))
            .unwrap_or_else(|| api::DEFAULT_BASE_URL.to_string());

        let max_retries = config_integer(config, "max_retries", 0, MAX_RETRIES_LIMIT.into())?
            .map_or(DEFAULT_MAX_RETRIES, |n| n as u32);
        let max_retry_wait_seconds =
            config_integer(config, "max_retry_wait_seconds", 1, MAX_RETRY_WAIT_SECONDS_LIMIT)?
                .unwrap_or(DEFAULT_MAX_RETRY_WAIT_SECONDS);

        Ok(Self {
            auth_token,
            base_url,
            max_retries,
            max_retry_wait_seconds,
        })
    }

    fn retry_config(&self) -> api::RetryConfig {
        api::RetryConfig {
            max_retries: self.max_retries,
            max_backoff_ms: self.max_retry_wait_seconds.saturating_mul(1000),
            ..api::RetryConfig::default()
        }
    }
}

#[async_trait]
impl Provider for PacketProvider {
    type Kind = PacketResourceKind;

    fn type_name(&self) -> &str {
        "packet"
    }

    async fn schema(&self, _ctx: Context, _request: ProviderSchemaRequest) -> ProviderSchemaResponse {
        let schema = SchemaBuilder::new()
            .version(0)
            .description("Packet provider")
            .attribute(
                AttributeBuilder::string("auth_token")
                    .description(
                        "The API auth key for API operations; defaults to PACKET_AUTH_TOKEN",
                    )
                    .optional()
                    .sensitive()
                    .build(),
            )
            .attribute(
                AttributeBuilder::string("base_url")
                    .description("The Packet API base URL; defaults to PACKET_API_URL")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::number("max_retries")
                    .description("Maximum number of retries for failed requests")
                    .optional()
                    .validator(IntegerValidator)
                    .validator(NumberRangeValidator {
                        min: Some(0.0),
                        max: Some(f64::from(MAX_RETRIES_LIMIT)),
                    })
                    .build(),
            )
            .attribute(
                AttributeBuilder::number("max_retry_wait_seconds")
                    .description("Upper bound for the wait between retries")
                    .optional()
                    .validator(IntegerValidator)
                    .validator(NumberRangeValidator {
                        min: Some(1.0),
                        max: Some(MAX_RETRY_WAIT_SECONDS_LIMIT as f64),
                    })
                    .build(),
            )
            .build();

        ProviderSchemaResponse {
            schema,
            diagnostics: vec![],
        }
    }

    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureProviderRequest,
    ) -> ConfigureProviderResponse {
        let mut diagnostics = vec![];

        match ProviderSettings::resolve(&request.config) {
            Ok(settings) => {
                match api::Client::with_config(
                    &settings.base_url,
                    &settings.auth_token,
                    settings.retry_config(),
                ) {
                    Ok(client) => {
                        tracing::debug!(base_url = %settings.base_url, "configured Packet client");
                        self.provider_data = Some(PacketProviderData::new(client));
                    }
                    Err(e) => diagnostics.push(Diagnostic::error(
                        "Failed to create API client",
                        e.to_string(),
                    )),
                }
            }
            Err(diag) => diagnostics.push(diag),
        }

        ConfigureProviderResponse { diagnostics }
    }

    fn resources(&self) -> tfplug::Result<ResourceRegistry<PacketResourceKind>> {
        let data = self
            .provider_data
            .as_ref()
            .ok_or(TfplugError::ProviderNotConfigured)?;

        let mut registry = ResourceRegistry::new();
        registry.register(PacketResourceKind::SshKey, SshKeyResource::account(data))?;
        registry.register(
            PacketResourceKind::ProjectSshKey,
            SshKeyResource::project(data),
        )?;
        registry.register(PacketResourceKind::Project, ProjectResource::new(data))?;
        Ok(registry)
    }
}
