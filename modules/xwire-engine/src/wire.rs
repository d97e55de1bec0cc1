//! Wires: single reactions to an event.
//!
//! A wire receives each emission of the event it is bound to, together with
//! a [`WireContext`], and performs one state mutation or dispatches one
//! action. Wires are built by the module-scoped factory returned from
//! [`with_module`] and can be wrapped with the operators at the bottom of
//! this file.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use xwire_state::{select_paths, ModulePath, Store};

use crate::bus::Bus;
use crate::debounce::Debouncer;
use crate::error::PluginError;
use crate::event::BusEvent;

/// Root namespace every module's state is nested under.
pub const ROOT_MODULE: &str = "x";

/// State path of a module: `x/<name>`.
pub fn module_path(module_name: &str) -> ModulePath {
    ModulePath::new([ROOT_MODULE, module_name])
}

/// Handles a wire needs while it runs.
#[derive(Clone)]
pub struct WireContext {
    pub store: Store,
    pub bus: Bus,
}

type WireFn = dyn Fn(&WireContext, &BusEvent) -> anyhow::Result<()> + Send + Sync;

/// A reaction to one event. Cheap to clone; errors propagate to whoever
/// emitted the event.
#[derive(Clone)]
pub struct Wire(Arc<WireFn>);

impl Wire {
    pub fn new(
        wire: impl Fn(&WireContext, &BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(wire))
    }

    pub fn call(&self, ctx: &WireContext, event: &BusEvent) -> anyhow::Result<()> {
        (self.0)(ctx, event)
    }

    /// True if both handles point at the same wire function.
    pub fn ptr_eq(&self, other: &Wire) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Wire")
    }
}

// ---------------------------------------------------------------------------
// Module-scoped factories
// ---------------------------------------------------------------------------

/// Factory for wires that target one module's mutations and actions.
#[derive(Debug, Clone)]
pub struct ModuleWires {
    path: ModulePath,
}

/// Wire factory scoped to `module_name`.
pub fn with_module(module_name: &str) -> ModuleWires {
    ModuleWires {
        path: module_path(module_name),
    }
}

impl ModuleWires {
    pub fn path(&self) -> &ModulePath {
        &self.path
    }

    /// Commit `mutation` with the event payload.
    pub fn wire_commit(&self, mutation: &str) -> Wire {
        let path = self.path.clone();
        let mutation = mutation.to_string();
        Wire::new(move |ctx, event| {
            Ok(ctx.store.commit(&path, &mutation, event.payload.clone())?)
        })
    }

    /// Commit `mutation` with a fixed payload, ignoring the event's.
    pub fn wire_commit_with(&self, mutation: &str, payload: Value) -> Wire {
        let path = self.path.clone();
        let mutation = mutation.to_string();
        Wire::new(move |ctx, _| Ok(ctx.store.commit(&path, &mutation, payload.clone())?))
    }

    pub fn wire_commit_without_payload(&self, mutation: &str) -> Wire {
        self.wire_commit_with(mutation, Value::Null)
    }

    /// Dispatch `action` with the event payload.
    pub fn wire_dispatch(&self, action: &str) -> Wire {
        let path = self.path.clone();
        let action = action.to_string();
        Wire::new(move |ctx, event| {
            Ok(ctx.store.dispatch(&path, &action, event.payload.clone())?)
        })
    }

    pub fn wire_dispatch_without_payload(&self, action: &str) -> Wire {
        let path = self.path.clone();
        let action = action.to_string();
        Wire::new(move |ctx, _| Ok(ctx.store.dispatch(&path, &action, Value::Null)?))
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Only let through emissions matching `predicate`.
pub fn filter(
    wire: Wire,
    predicate: impl Fn(&BusEvent) -> bool + Send + Sync + 'static,
) -> Wire {
    Wire::new(move |ctx, event| {
        if predicate(event) {
            wire.call(ctx, event)
        } else {
            Ok(())
        }
    })
}

pub fn filter_truthy_payload(wire: Wire) -> Wire {
    filter(wire, |event| is_truthy(&event.payload))
}

pub fn filter_falsy_payload(wire: Wire) -> Wire {
    filter(wire, |event| !is_truthy(&event.payload))
}

/// Only react to emissions whose metadata names one of `modules`.
pub fn filter_whitelisted_modules(wire: Wire, modules: &[&str]) -> Wire {
    let modules: Vec<String> = modules.iter().map(|m| m.to_string()).collect();
    filter(wire, move |event| {
        event
            .metadata
            .module_name
            .as_ref()
            .is_some_and(|name| modules.contains(name))
    })
}

/// Ignore emissions whose metadata names one of `modules`.
pub fn filter_blacklisted_modules(wire: Wire, modules: &[&str]) -> Wire {
    let modules: Vec<String> = modules.iter().map(|m| m.to_string()).collect();
    filter(wire, move |event| {
        event
            .metadata
            .module_name
            .as_ref()
            .map_or(true, |name| !modules.contains(name))
    })
}

/// Transform the payload before handing the event on.
pub fn map_wire(wire: Wire, map: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Wire {
    Wire::new(move |ctx, event| {
        let mapped = BusEvent {
            payload: map(&event.payload),
            ..event.clone()
        };
        wire.call(ctx, &mapped)
    })
}

/// Replace the payload with an object built from `(key, path)` pairs.
/// Paths missing from the payload are logged and left out.
pub fn map_payload_paths(wire: Wire, mapping: &[(&str, &str)]) -> Wire {
    let mapping: Vec<(String, String)> = mapping
        .iter()
        .map(|(k, p)| (k.to_string(), p.to_string()))
        .collect();
    map_wire(wire, move |payload| {
        Value::Object(select_paths(
            payload,
            mapping.iter().map(|(k, p)| (k.as_str(), p.as_str())),
        ))
    })
}

/// Collapse bursts: the wire runs once with the last event after `delay`
/// passes without another emission. Runs on a later tokio task, so errors
/// are logged rather than returned.
///
/// Must be called inside a tokio runtime; the timers run there.
pub fn debounce(wire: Wire, delay: Duration) -> Result<Wire, PluginError> {
    let debouncer = Arc::new(Debouncer::new(
        delay,
        move |(ctx, event): (WireContext, BusEvent)| wire.call(&ctx, &event),
    )?);
    Ok(Wire::new(move |ctx, event| {
        debouncer.push((ctx.clone(), event.clone()));
        Ok(())
    }))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
