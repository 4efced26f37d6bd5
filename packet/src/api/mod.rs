//! Packet API client
//!
//! Covers the two endpoint families the provider manages, SSH keys and
//! projects. Every call goes through [`Client`], which adds the
//! `X-Auth-Token` header and retries rate-limited or failing requests.

pub mod client;
pub mod common;
pub mod error;
pub mod projects;
pub mod ssh_keys;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use client::{Client, RetryConfig, DEFAULT_BASE_URL};
pub use error::ApiError;

use std::future::Future;
use tfplug::context::Context;

/// Runs an API call under the operation's context, so an expired deadline
/// or a cancel aborts the request
pub async fn with_context<T, F>(ctx: &Context, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    ctx.run(fut).await.map_err(|_| ApiError::Cancelled)?
}
