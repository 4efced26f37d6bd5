//! Planning a single resource change
//!
//! Given the schema, the prior state (if the resource exists) and the
//! configuration, decide whether the resource is created, updated, replaced
//! or left alone, and what its state is expected to look like afterwards.
//!
//! Rules:
//! 1. Without prior state the resource is created; computed attributes that
//!    the configuration leaves null are unknown.
//! 2. With prior state, configurable attributes take their configured (or
//!    default) value and everything else keeps its prior value. If no
//!    configurable attribute differs from the prior state the plan is a
//!    no-op.
//! 3. Otherwise computed attributes not set by configuration become unknown,
//!    then each attribute's plan modifiers run. Any modifier requesting
//!    replacement turns the update into a replace.

use crate::defaults::DefaultRequest;
use crate::plan_modifier::PlanModifyRequest;
use crate::schema::{Attribute, Schema};
use crate::types::{AttributePath, Diagnostic, Dynamic, DynamicValue};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    NoOp,
    Create,
    Update,
    /// Delete the existing object, then create a new one
    Replace,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanAction::NoOp => "no-op",
            PlanAction::Create => "create",
            PlanAction::Update => "update",
            PlanAction::Replace => "replace",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub action: PlanAction,
    pub planned_state: DynamicValue,
    pub requires_replace: Vec<AttributePath>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PlannedChange {
    pub fn is_noop(&self) -> bool {
        self.action == PlanAction::NoOp
    }
}

pub fn plan_resource_change(
    schema: &Schema,
    prior_state: Option<&DynamicValue>,
    config: &DynamicValue,
) -> PlannedChange {
    match prior_state {
        Some(prior) if !prior.is_null() => plan_update(schema, prior, config),
        _ => plan_create(schema, config),
    }
}

fn config_value(config: &DynamicValue, attr: &Attribute) -> Dynamic {
    config.get(&attr.path()).cloned().unwrap_or(Dynamic::Null)
}

fn with_default(attr: &Attribute, value: Dynamic) -> Dynamic {
    match (&attr.default, value) {
        (Some(default), Dynamic::Null) => {
            default
                .default_value(DefaultRequest { path: attr.path() })
                .value
        }
        (_, value) => value,
    }
}

fn set_planned(
    planned: &mut DynamicValue,
    attr: &Attribute,
    value: Dynamic,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if let Err(e) = planned.set_dynamic(&attr.path(), value) {
        diagnostics.push(
            Diagnostic::error("Failed to plan attribute", e.to_string()).with_attribute(attr.path()),
        );
    }
}

fn plan_create(schema: &Schema, config: &DynamicValue) -> PlannedChange {
    let mut planned = DynamicValue::object();
    let mut diagnostics = Vec::new();

    for attr in &schema.attributes {
        let mut value = config_value(config, attr);
        if attr.is_configurable() {
            value = with_default(attr, value);
        }
        if value.is_null() && attr.computed {
            value = Dynamic::Unknown;
        }
        set_planned(&mut planned, attr, value, &mut diagnostics);
    }

    PlannedChange {
        action: PlanAction::Create,
        planned_state: planned,
        requires_replace: Vec::new(),
        diagnostics,
    }
}

fn plan_update(schema: &Schema, prior: &DynamicValue, config: &DynamicValue) -> PlannedChange {
    let prior_value =
        |attr: &Attribute| prior.get(&attr.path()).cloned().unwrap_or(Dynamic::Null);

    let changed = schema
        .attributes
        .iter()
        .filter(|attr| attr.is_configurable())
        .any(|attr| {
            let configured = with_default(attr, config_value(config, attr));
            // Optional+computed attributes left unset keep whatever the
            // provider chose
            if configured.is_null() && attr.computed {
                return false;
            }
            configured != prior_value(attr)
        });

    if !changed {
        return PlannedChange {
            action: PlanAction::NoOp,
            planned_state: prior.clone(),
            requires_replace: Vec::new(),
            diagnostics: Vec::new(),
        };
    }

    let mut planned = DynamicValue::object();
    let mut requires_replace = Vec::new();
    let mut diagnostics = Vec::new();

    for attr in &schema.attributes {
        let state = prior_value(attr);
        let configured = if attr.is_configurable() {
            with_default(attr, config_value(config, attr))
        } else {
            Dynamic::Null
        };

        let mut plan_value = if configured.is_null() && attr.computed {
            Dynamic::Unknown
        } else {
            configured.clone()
        };

        for modifier in &attr.plan_modifiers {
            let response = modifier.modify_plan(PlanModifyRequest {
                state: state.clone(),
                plan: plan_value,
                config: configured.clone(),
                path: attr.path(),
            });
            plan_value = response.plan_value;
            if response.requires_replace {
                requires_replace.push(attr.path());
            }
            diagnostics.extend(response.diagnostics);
        }

        set_planned(&mut planned, attr, plan_value, &mut diagnostics);
    }

    if requires_replace.is_empty() {
        return PlannedChange {
            action: PlanAction::Update,
            planned_state: planned,
            requires_replace,
            diagnostics,
        };
    }

    let mut replacement = plan_create(schema, config);
    diagnostics.append(&mut replacement.diagnostics);
    PlannedChange {
        action: PlanAction::Replace,
        planned_state: replacement.planned_state,
        requires_replace,
        diagnostics,
    }
}
