//! Typed test configurations
//!
//! Instead of parsing configuration text, tests build a [`Configuration`]
//! out of [`ResourceBlock`]s. Attribute values are literals or references to
//! another resource's attribute, resolved against the current state right
//! before that resource is planned.

use super::state::TestState;
use super::AcceptanceError;
use crate::types::{Dynamic, DynamicValue};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Dynamic),
    /// `<address>.<attribute>`, e.g. `packet_project.test.id`
    Reference { address: String, attribute: String },
}

impl Expression {
    pub fn reference(address: impl Into<String>, attribute: impl Into<String>) -> Self {
        Expression::Reference {
            address: address.into(),
            attribute: attribute.into(),
        }
    }
}

impl From<&str> for Expression {
    fn from(value: &str) -> Self {
        Expression::Literal(Dynamic::from(value))
    }
}

impl From<String> for Expression {
    fn from(value: String) -> Self {
        Expression::Literal(Dynamic::from(value))
    }
}

impl From<bool> for Expression {
    fn from(value: bool) -> Self {
        Expression::Literal(Dynamic::Bool(value))
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Expression::Literal(Dynamic::Number(value))
    }
}

impl From<i64> for Expression {
    fn from(value: i64) -> Self {
        Expression::Literal(Dynamic::Number(value as f64))
    }
}

impl From<Dynamic> for Expression {
    fn from(value: Dynamic) -> Self {
        Expression::Literal(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBlock {
    pub type_name: String,
    pub name: String,
    pub attributes: BTreeMap<String, Expression>,
}

impl ResourceBlock {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attr(mut self, name: &str, value: impl Into<Expression>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn reference(self, name: &str, address: &str, attribute: &str) -> Self {
        self.attr(name, Expression::reference(address, attribute))
    }

    pub fn address(&self) -> String {
        format!("{}.{}", self.type_name, self.name)
    }

    /// Addresses this block refers to, deduplicated
    pub fn dependencies(&self) -> Vec<String> {
        let deps: BTreeSet<String> = self
            .attributes
            .values()
            .filter_map(|expr| match expr {
                Expression::Reference { address, .. } => Some(address.clone()),
                Expression::Literal(_) => None,
            })
            .collect();
        deps.into_iter().collect()
    }

    /// Evaluates the block into a configuration object. References must
    /// point at known values of resources already in `state`.
    pub fn resolve(&self, state: &TestState) -> Result<DynamicValue, AcceptanceError> {
        let mut entries = BTreeMap::new();
        for (name, expr) in &self.attributes {
            let value = match expr {
                Expression::Literal(value) => value.clone(),
                Expression::Reference { address, attribute } => {
                    let resource = state.get(address).ok_or_else(|| {
                        AcceptanceError::Config(format!(
                            "{}.{}: referenced resource {} is not in state",
                            self.address(),
                            name,
                            address
                        ))
                    })?;
                    match resource.get(attribute) {
                        Some(value) if value.is_wholly_known() && !value.is_null() => {
                            value.clone()
                        }
                        _ => {
                            return Err(AcceptanceError::Config(format!(
                                "{}.{}: {}.{} has no known value",
                                self.address(),
                                name,
                                address,
                                attribute
                            )))
                        }
                    }
                }
            };
            entries.insert(name.clone(), value);
        }
        Ok(DynamicValue::new(Dynamic::Map(entries)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    pub resources: Vec<ResourceBlock>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, block: ResourceBlock) -> Self {
        self.resources.push(block);
        self
    }

    pub fn get(&self, address: &str) -> Option<&ResourceBlock> {
        self.resources.iter().find(|block| block.address() == address)
    }

    /// Blocks ordered so that every block comes after the blocks it
    /// references. Ties keep declaration order.
    pub fn ordered(&self) -> Result<Vec<&ResourceBlock>, AcceptanceError> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, block) in self.resources.iter().enumerate() {
            if index.insert(block.address(), i).is_some() {
                return Err(AcceptanceError::Config(format!(
                    "duplicate resource block {}",
                    block.address()
                )));
            }
        }

        let mut in_degree = vec![0usize; self.resources.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.resources.len()];
        for (i, block) in self.resources.iter().enumerate() {
            for dep in block.dependencies() {
                let &j = index.get(&dep).ok_or_else(|| {
                    AcceptanceError::Config(format!(
                        "{} references undeclared resource {}",
                        block.address(),
                        dep
                    ))
                })?;
                in_degree[i] += 1;
                dependents[j].push(i);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.resources.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut ordered = Vec::with_capacity(self.resources.len());
        while let Some(i) = ready.pop_front() {
            ordered.push(&self.resources[i]);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        if ordered.len() != self.resources.len() {
            return Err(AcceptanceError::Config(
                "resource references form a cycle".to_string(),
            ));
        }
        Ok(ordered)
    }
}

fn render_literal(f: &mut fmt::Formatter<'_>, value: &Dynamic) -> fmt::Result {
    match value {
        Dynamic::Null => f.write_str("null"),
        Dynamic::Unknown => f.write_str("(known after apply)"),
        Dynamic::Bool(b) => write!(f, "{}", b),
        Dynamic::Number(n) if n.fract() == 0.0 => write!(f, "{}", *n as i64),
        Dynamic::Number(n) => write!(f, "{}", n),
        Dynamic::String(s) => write!(f, "{:?}", s),
        Dynamic::List(items) => {
            f.write_str("[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                render_literal(f, item)?;
            }
            f.write_str("]")
        }
        Dynamic::Map(entries) => {
            f.write_str("{ ")?;
            for (key, item) in entries {
                write!(f, "{} = ", key)?;
                render_literal(f, item)?;
                f.write_str(" ")?;
            }
            f.write_str("}")
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(value) => render_literal(f, value),
            Expression::Reference { address, attribute } => {
                write!(f, "{}.{}", address, attribute)
            }
        }
    }
}

impl fmt::Display for ResourceBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "resource {:?} {:?} {{", self.type_name, self.name)?;
        let width = self.attributes.keys().map(String::len).max().unwrap_or(0);
        for (name, expr) in &self.attributes {
            writeln!(f, "  {:width$} = {}", name, expr, width = width)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, block) in self.resources.iter().enumerate() {
            if i > 0 {
                f.write_str("\n\n")?;
            }
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}
