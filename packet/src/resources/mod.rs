//! Resource implementations

pub mod project;
pub mod ssh_key;

pub use project::ProjectResource;
pub use ssh_key::SshKeyResource;

use crate::api::ApiError;
use tfplug::provider::ResourceKind;
use tfplug::types::{AttributePath, Diagnostic, DynamicValue};

/// Resource types served by the Packet provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketResourceKind {
    SshKey,
    ProjectSshKey,
    Project,
}

impl ResourceKind for PacketResourceKind {
    fn all() -> &'static [Self] {
        &[
            PacketResourceKind::SshKey,
            PacketResourceKind::ProjectSshKey,
            PacketResourceKind::Project,
        ]
    }

    fn type_name(&self) -> &'static str {
        match self {
            PacketResourceKind::SshKey => "packet_ssh_key",
            PacketResourceKind::ProjectSshKey => "packet_project_ssh_key",
            PacketResourceKind::Project => "packet_project",
        }
    }
}

pub(crate) fn api_diagnostic(summary: &str, err: &ApiError) -> Diagnostic {
    Diagnostic::error(summary, err.to_string())
}

pub(crate) fn required_string(
    value: &DynamicValue,
    name: &str,
) -> Result<String, Diagnostic> {
    value.get_string(&AttributePath::new(name)).map_err(|e| {
        Diagnostic::error(format!("Invalid {}", name), e.to_string())
            .with_attribute(AttributePath::new(name))
    })
}

pub(crate) fn optional_string(
    value: &DynamicValue,
    name: &str,
) -> Result<Option<String>, Diagnostic> {
    value
        .get_optional_string(&AttributePath::new(name))
        .map_err(|e| {
            Diagnostic::error(format!("Invalid {}", name), e.to_string())
                .with_attribute(AttributePath::new(name))
        })
}
