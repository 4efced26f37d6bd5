//! Default values for optional attributes
//!
//! A default is used by the planner whenever the configuration leaves an
//! optional attribute null.
//!
//! ```no_run
//! use tfplug::defaults::StaticDefault;
//! use tfplug::schema::AttributeBuilder;
//!
//! let backend_transfer = AttributeBuilder::bool("backend_transfer")
//!     .optional()
//!     .computed()
//!     .default(StaticDefault::bool(false))
//!     .build();
//! ```

use crate::types::{AttributePath, Dynamic};

pub struct DefaultRequest {
    pub path: AttributePath,
}

pub struct DefaultResponse {
    pub value: Dynamic,
}

pub trait Default: Send + Sync {
    fn description(&self) -> String;

    fn default_value(&self, request: DefaultRequest) -> DefaultResponse;
}

/// StaticDefault always yields the same value
pub struct StaticDefault {
    value: Dynamic,
}

impl StaticDefault {
    pub fn new(value: Dynamic) -> Self {
        Self { value }
    }

    pub fn bool(value: bool) -> Self {
        Self::new(Dynamic::Bool(value))
    }
}

impl Default for StaticDefault {
    fn description(&self) -> String {
        format!("static default value: {:?}", self.value)
    }

    fn default_value(&self, _request: DefaultRequest) -> DefaultResponse {
        DefaultResponse {
            value: self.value.clone(),
        }
    }
}
