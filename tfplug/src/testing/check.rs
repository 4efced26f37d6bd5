//! Assertions run against state after a step is applied

use super::state::TestState;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("{address}: resource not found in state")]
    ResourceNotFound { address: String },

    #[error("{address}: attribute '{key}' is not set")]
    AttributeNotSet { address: String, key: String },

    #[error("{address}: attribute '{key}' expected {expected:?}, got {actual:?}")]
    AttributeMismatch {
        address: String,
        key: String,
        expected: String,
        actual: String,
    },

    #[error("{left}: {left_value:?} does not match {right}: {right_value:?}")]
    PairMismatch {
        left: String,
        left_value: String,
        right: String,
        right_value: String,
    },

    #[error("{0}")]
    Failed(String),
}

/// A check may call out to the remote API, so it is async
#[async_trait]
pub trait StateCheck: Send + Sync {
    async fn check(&self, state: &TestState) -> Result<(), CheckError>;
}

fn attribute(state: &TestState, address: &str, key: &str) -> Result<Option<String>, CheckError> {
    let resource = state
        .get(address)
        .ok_or_else(|| CheckError::ResourceNotFound {
            address: address.to_string(),
        })?;
    Ok(resource.attributes().get(key).cloned())
}

struct ResourceAttr {
    address: String,
    key: String,
    value: String,
}

#[async_trait]
impl StateCheck for ResourceAttr {
    async fn check(&self, state: &TestState) -> Result<(), CheckError> {
        let actual = attribute(state, &self.address, &self.key)?;
        match actual {
            Some(actual) if actual == self.value => Ok(()),
            actual => Err(CheckError::AttributeMismatch {
                address: self.address.clone(),
                key: self.key.clone(),
                expected: self.value.clone(),
                actual: actual.unwrap_or_default(),
            }),
        }
    }
}

/// `key` on `address` equals `value` (flatmap representation)
pub fn check_resource_attr(
    address: &str,
    key: &str,
    value: impl Into<String>,
) -> Box<dyn StateCheck> {
    Box::new(ResourceAttr {
        address: address.to_string(),
        key: key.to_string(),
        value: value.into(),
    })
}

struct ResourceAttrSet {
    address: String,
    key: String,
}

#[async_trait]
impl StateCheck for ResourceAttrSet {
    async fn check(&self, state: &TestState) -> Result<(), CheckError> {
        match attribute(state, &self.address, &self.key)? {
            Some(value) if !value.is_empty() => Ok(()),
            _ => Err(CheckError::AttributeNotSet {
                address: self.address.clone(),
                key: self.key.clone(),
            }),
        }
    }
}

/// `key` on `address` is present and non-empty
pub fn check_resource_attr_set(address: &str, key: &str) -> Box<dyn StateCheck> {
    Box::new(ResourceAttrSet {
        address: address.to_string(),
        key: key.to_string(),
    })
}

struct ResourceAttrPair {
    left_address: String,
    left_key: String,
    right_address: String,
    right_key: String,
}

#[async_trait]
impl StateCheck for ResourceAttrPair {
    async fn check(&self, state: &TestState) -> Result<(), CheckError> {
        let left = attribute(state, &self.left_address, &self.left_key)?;
        let right = attribute(state, &self.right_address, &self.right_key)?;
        match (left, right) {
            (Some(l), Some(r)) if l == r => Ok(()),
            (left, right) => Err(CheckError::PairMismatch {
                left: format!("{}.{}", self.left_address, self.left_key),
                left_value: left.unwrap_or_default(),
                right: format!("{}.{}", self.right_address, self.right_key),
                right_value: right.unwrap_or_default(),
            }),
        }
    }
}

/// Two attributes, possibly on different resources, hold the same value
pub fn check_resource_attr_pair(
    left_address: &str,
    left_key: &str,
    right_address: &str,
    right_key: &str,
) -> Box<dyn StateCheck> {
    Box::new(ResourceAttrPair {
        left_address: left_address.to_string(),
        left_key: left_key.to_string(),
        right_address: right_address.to_string(),
        right_key: right_key.to_string(),
    })
}

struct Composed(Vec<Box<dyn StateCheck>>);

#[async_trait]
impl StateCheck for Composed {
    async fn check(&self, state: &TestState) -> Result<(), CheckError> {
        for check in &self.0 {
            check.check(state).await?;
        }
        Ok(())
    }
}

/// Runs checks in order, stopping at the first failure
pub fn compose(checks: Vec<Box<dyn StateCheck>>) -> Box<dyn StateCheck> {
    Box::new(Composed(checks))
}
