//! Types shared by the Packet API endpoints

use serde::{Deserialize, Serialize};

/// Reference to another API object, e.g. `{"href": "/projects/abc"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Href {
    pub href: String,
}

impl Href {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }

    /// Last path segment of the href, which is the referenced object's id
    pub fn id(&self) -> Option<&str> {
        self.href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
    }
}

/// Error body returned by the API on non-2xx responses
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiErrorResponse {
    pub fn messages(self) -> Vec<String> {
        let mut messages = self.errors;
        messages.extend(self.error);
        messages
    }
}
