//! Acceptance-test harness
//!
//! A [`TestCase`] drives a provider through a sequence of [`TestStep`]s the
//! way `terraform apply` would: refresh, validate, plan, apply, then require
//! that a second plan is empty and run the step's checks. Import steps
//! import an existing resource by id and compare the result with state.
//! Everything left in state is destroyed at the end, even after a failure,
//! and the case's `check_destroy` then confirms the remote objects are gone.
//!
//! ```no_run
//! # async fn example(provider: impl tfplug::Provider) -> Result<(), tfplug::testing::AcceptanceError> {
//! use tfplug::testing::*;
//!
//! let name = format!("foobar-{}", rand_int());
//! TestCase::new(provider)
//!     .step(
//!         TestStep::config(Configuration::new().resource(
//!             ResourceBlock::new("packet_ssh_key", "foobar")
//!                 .attr("name", name.as_str())
//!                 .attr("public_key", rand_ssh_public_key()),
//!         ))
//!         .check(check_resource_attr("packet_ssh_key.foobar", "name", name.as_str())),
//!     )
//!     .step(TestStep::import(ImportStep::new("packet_ssh_key.foobar")))
//!     .run()
//!     .await
//! # }
//! ```

pub mod check;
pub mod config;
pub mod random;
mod runner;
pub mod state;

pub use check::{
    check_resource_attr, check_resource_attr_pair, check_resource_attr_set, compose, CheckError,
    StateCheck,
};
pub use config::{Configuration, Expression, ResourceBlock};
pub use random::{rand_int, rand_ssh_public_key, rand_string};
pub use state::{ResourceState, TestState};

use crate::error::TfplugError;
use crate::provider::Provider;
use crate::types::DynamicValue;
use regex::Regex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Environment variable enabling acceptance tests against live APIs
pub const ENV_ACC: &str = "TF_ACC";

/// Environment variable holding the log filter for harness output
pub const ENV_LOG: &str = "TF_LOG";

/// Whether `TF_ACC` is set to a non-empty value
pub fn acceptance_enabled() -> bool {
    std::env::var(ENV_ACC).map(|v| !v.is_empty()).unwrap_or(false)
}

/// Installs a test-friendly tracing subscriber filtered by `TF_LOG`
/// (e.g. `TF_LOG=debug` or `TF_LOG=packet=trace`). Safe to call repeatedly.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, thiserror::Error)]
pub enum AcceptanceError {
    #[error("provider configuration failed: {0}")]
    ProviderConfigure(String),

    #[error("invalid test configuration: {0}")]
    Config(String),

    #[error("{operation} {address}: {message}")]
    Diagnostics {
        address: String,
        operation: String,
        message: String,
    },

    #[error("after applying this step, the plan was not empty:\n{0}")]
    NonEmptyPlan(String),

    #[error("check failed: {0}")]
    Check(#[from] CheckError),

    #[error("step {step}: {source}")]
    Step {
        step: usize,
        source: Box<AcceptanceError>,
    },

    #[error("expected an error matching /{0}/, but the step succeeded")]
    ExpectedError(String),

    #[error("expected an error matching /{pattern}/, got: {message}")]
    UnexpectedErrorMessage { pattern: String, message: String },

    #[error("imported state of {address} differs from state:\n{diff}")]
    ImportVerify { address: String, diff: String },

    #[error("import of {address} failed: {message}")]
    Import { address: String, message: String },

    #[error("destroy failed: {0}")]
    Destroy(String),

    #[error("check destroy failed: {0}")]
    CheckDestroy(CheckError),

    #[error(transparent)]
    Framework(#[from] TfplugError),
}

pub struct TestCase<P: Provider> {
    pub provider: P,
    pub provider_config: DynamicValue,
    /// Runs after the final destroy against the last state held before it
    pub check_destroy: Option<Box<dyn StateCheck>>,
    pub steps: Vec<TestStep>,
    /// Deadline applied to every individual resource operation
    pub operation_timeout: Option<Duration>,
}

impl<P: Provider> TestCase<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            provider_config: DynamicValue::object(),
            check_destroy: None,
            steps: Vec::new(),
            operation_timeout: None,
        }
    }

    pub fn provider_config(mut self, config: DynamicValue) -> Self {
        self.provider_config = config;
        self
    }

    pub fn check_destroy(mut self, check: Box<dyn StateCheck>) -> Self {
        self.check_destroy = Some(check);
        self
    }

    pub fn step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub async fn run(self) -> Result<(), AcceptanceError> {
        run(self).await
    }
}

/// Executes every step of `case`, then destroys all remaining resources
pub async fn run<P: Provider>(case: TestCase<P>) -> Result<(), AcceptanceError> {
    init_logging();
    runner::execute(case).await
}

pub struct TestStep {
    pub config: Option<Configuration>,
    pub import: Option<ImportStep>,
    pub check: Option<Box<dyn StateCheck>>,
    /// The step must fail with an error whose message matches
    pub expect_error: Option<Regex>,
}

impl TestStep {
    pub fn config(config: Configuration) -> Self {
        Self {
            config: Some(config),
            import: None,
            check: None,
            expect_error: None,
        }
    }

    pub fn import(import: ImportStep) -> Self {
        Self {
            config: None,
            import: Some(import),
            check: None,
            expect_error: None,
        }
    }

    pub fn check(mut self, check: Box<dyn StateCheck>) -> Self {
        self.check = Some(check);
        self
    }

    pub fn expect_error(mut self, pattern: Regex) -> Self {
        self.expect_error = Some(pattern);
        self
    }
}

pub struct ImportStep {
    /// Address of the resource in state, e.g. `packet_ssh_key.foobar`
    pub resource_name: String,
    /// Import id; defaults to the `id` of the resource in state
    pub id: Option<String>,
    /// Flatmap keys (or key prefixes) excluded from verification
    pub verify_ignore: Vec<String>,
}

impl ImportStep {
    pub fn new(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            id: None,
            verify_ignore: Vec::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn verify_ignore(mut self, keys: &[&str]) -> Self {
        self.verify_ignore = keys.iter().map(|k| k.to_string()).collect();
        self
    }
}
