//! State tracked by the acceptance harness between steps

use crate::types::{AttributePath, Dynamic, DynamicValue};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Value Terraform uses in flatmap output for unknown values
pub const UNKNOWN_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState {
    pub type_name: String,
    pub state: DynamicValue,
    /// Addresses this resource referenced when it was last applied
    pub dependencies: Vec<String>,
}

impl ResourceState {
    pub fn new(type_name: impl Into<String>, state: DynamicValue, dependencies: Vec<String>) -> Self {
        Self {
            type_name: type_name.into(),
            state,
            dependencies,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.get("id").and_then(Dynamic::as_str)
    }

    pub fn get(&self, attribute: &str) -> Option<&Dynamic> {
        self.state.get(&AttributePath::new(attribute))
    }

    /// Flattened attributes: nested values use dotted keys, lists add a
    /// `<key>.#` count and maps a `<key>.%` count. Null values are omitted.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut flat = BTreeMap::new();
        if let Dynamic::Map(entries) = &self.state.value {
            for (key, value) in entries {
                flatten(key, value, &mut flat);
            }
        }
        flat
    }
}

fn flatten(prefix: &str, value: &Dynamic, out: &mut BTreeMap<String, String>) {
    match value {
        Dynamic::Null => {}
        Dynamic::Unknown => {
            out.insert(prefix.to_string(), UNKNOWN_VALUE.to_string());
        }
        Dynamic::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Dynamic::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
            out.insert(prefix.to_string(), (*n as i64).to_string());
        }
        Dynamic::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Dynamic::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Dynamic::List(items) => {
            out.insert(format!("{}.#", prefix), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                flatten(&format!("{}.{}", prefix, i), item, out);
            }
        }
        Dynamic::Map(entries) => {
            out.insert(format!("{}.%", prefix), entries.len().to_string());
            for (key, item) in entries {
                flatten(&format!("{}.{}", prefix, key), item, out);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestState {
    resources: BTreeMap<String, ResourceState>,
}

impl TestState {
    pub fn get(&self, address: &str) -> Option<&ResourceState> {
        self.resources.get(address)
    }

    pub fn insert(&mut self, address: impl Into<String>, resource: ResourceState) {
        self.resources.insert(address.into(), resource);
    }

    pub fn remove(&mut self, address: &str) -> Option<ResourceState> {
        self.resources.remove(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResourceState)> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Addresses ordered so that dependents come before the resources they
    /// depend on. Dependencies on addresses no longer in state are ignored.
    pub fn destroy_order(&self) -> Vec<String> {
        let addresses = self.addresses();
        let mut in_degree: HashMap<&str, usize> =
            addresses.iter().map(|a| (a.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for (address, resource) in &self.resources {
            for dep in &resource.dependencies {
                if self.resources.contains_key(dep) {
                    if let Some(count) = in_degree.get_mut(address.as_str()) {
                        *count += 1;
                    }
                    dependents
                        .entry(dep.as_str())
                        .or_default()
                        .push(address.as_str());
                }
            }
        }

        let mut ready: VecDeque<&str> = addresses
            .iter()
            .map(String::as_str)
            .filter(|a| in_degree.get(a) == Some(&0))
            .collect();
        let mut create_order = Vec::with_capacity(addresses.len());
        while let Some(address) = ready.pop_front() {
            create_order.push(address.to_string());
            for &next in dependents.get(address).into_iter().flatten() {
                if let Some(count) = in_degree.get_mut(next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(next);
                    }
                }
            }
        }

        // A dependency cycle cannot come out of an ordered apply; keep any
        // leftovers anyway so nothing escapes destruction
        for address in &addresses {
            if !create_order.contains(address) {
                create_order.push(address.clone());
            }
        }

        create_order.reverse();
        create_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(entries: Vec<(&str, Dynamic)>, deps: Vec<&str>) -> ResourceState {
        ResourceState::new(
            "test_thing",
            DynamicValue::new(Dynamic::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            )),
            deps.into_iter().map(String::from).collect(),
        )
    }

    #[test]
    fn attributes_are_flattened() {
        let state = resource(
            vec![
                ("id", Dynamic::from("abc")),
                ("count", Dynamic::Number(3.0)),
                ("enabled", Dynamic::Bool(true)),
                ("missing", Dynamic::Null),
                (
                    "tags",
                    Dynamic::List(vec![Dynamic::from("a"), Dynamic::from("b")]),
                ),
                (
                    "labels",
                    Dynamic::Map(BTreeMap::from([("env".to_string(), Dynamic::from("dev"))])),
                ),
            ],
            vec![],
        );

        let flat = state.attributes();
        assert_eq!(flat["id"], "abc");
        assert_eq!(flat["count"], "3");
        assert_eq!(flat["enabled"], "true");
        assert!(!flat.contains_key("missing"));
        assert_eq!(flat["tags.#"], "2");
        assert_eq!(flat["tags.1"], "b");
        assert_eq!(flat["labels.%"], "1");
        assert_eq!(flat["labels.env"], "dev");
        assert_eq!(state.id(), Some("abc"));
    }

    #[test]
    fn destroy_order_removes_dependents_first() {
        let mut state = TestState::default();
        state.insert(
            "packet_project_ssh_key.foobar",
            resource(vec![], vec!["packet_project.test"]),
        );
        state.insert("packet_project.test", resource(vec![], vec![]));
        state.insert("packet_ssh_key.zzz", resource(vec![], vec!["packet_gone.x"]));

        let order = state.destroy_order();
        let pos = |a: &str| order.iter().position(|o| o == a).unwrap();
        assert_eq!(order.len(), 3);
        assert!(pos("packet_project_ssh_key.foobar") < pos("packet_project.test"));
    }
}
