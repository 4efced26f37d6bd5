//! tfplug - provider framework for Rust
//!
//! Schemas, dynamic values, the `Provider`/`Resource` capability traits, a
//! planner and an in-process acceptance-test harness for providers that
//! manage remote API objects.

// Core modules
pub mod context;
pub mod error;
pub mod schema;
pub mod types;

// Provider API modules
pub mod provider;
pub mod resource;

// Helper modules
pub mod defaults;
pub mod import;
pub mod plan_modifier;
pub mod validator;

// Planning and acceptance testing
pub mod plan;
pub mod testing;

// Re-exports for convenience
pub use context::Context;
pub use error::{Result, TfplugError};
pub use import::import_state_passthrough_id;
pub use plan::{plan_resource_change, PlanAction, PlannedChange};
pub use provider::{Provider, ResourceKind, ResourceRegistry};
pub use resource::Resource;
pub use schema::{AttributeBuilder, AttributeType, Schema, SchemaBuilder};
pub use types::{AttributePath, Diagnostic, Dynamic, DynamicValue};
