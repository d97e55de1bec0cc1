//! Wiring tables: which wires fire on which events.
//!
//! A table maps event names to named wires. Both levels keep their declared
//! order, and that order is the execution order when the table is
//! registered. Wire names are unique within one event.

use crate::bus::{Bus, Subscription};
use crate::error::PluginError;
use crate::wire::{Wire, WireContext};

#[derive(Debug, Clone)]
struct EventWires {
    event: String,
    wires: Vec<(String, Wire)>,
}

/// Immutable event-to-wires mapping for one module.
#[derive(Debug, Clone, Default)]
pub struct Wiring {
    entries: Vec<EventWires>,
}

impl Wiring {
    pub fn builder() -> WiringBuilder {
        WiringBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Event names, in declared order.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.event.as_str())
    }

    /// Wires bound to `event`, in declared order.
    pub fn wires<'a>(&'a self, event: &'a str) -> impl Iterator<Item = (&'a str, &'a Wire)> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.event == event)
            .flat_map(|e| e.wires.iter().map(|(name, wire)| (name.as_str(), wire)))
    }

    /// Every `(event, wire name, wire)` triple, in declared order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Wire)> {
        self.entries.iter().flat_map(|e| {
            e.wires
                .iter()
                .map(move |(name, wire)| (e.event.as_str(), name.as_str(), wire))
        })
    }

    pub fn wire_count(&self) -> usize {
        self.entries.iter().map(|e| e.wires.len()).sum()
    }

    /// Layer `overrides` on top of this table without touching either.
    ///
    /// A wire present in both keeps its original position but takes the
    /// override's function. Events and wires only present in the override
    /// are appended.
    pub fn merged(&self, overrides: &Wiring) -> Wiring {
        let mut result = self.clone();
        for incoming in &overrides.entries {
            match result.entries.iter_mut().find(|e| e.event == incoming.event) {
                Some(existing) => {
                    for (name, wire) in &incoming.wires {
                        match existing.wires.iter_mut().find(|(n, _)| n == name) {
                            Some(slot) => slot.1 = wire.clone(),
                            None => existing.wires.push((name.clone(), wire.clone())),
                        }
                    }
                }
                None => result.entries.push(incoming.clone()),
            }
        }
        result
    }

    /// Subscribe every wire to its event on `bus`. Each emission runs the
    /// wire with `ctx`.
    pub fn register(&self, bus: &Bus, ctx: &WireContext) -> Vec<Subscription> {
        let mut subscriptions = Vec::with_capacity(self.wire_count());
        for entry in &self.entries {
            let stream = bus.on(entry.event.as_str());
            for (_, wire) in &entry.wires {
                let wire = wire.clone();
                let ctx = ctx.clone();
                subscriptions.push(stream.subscribe(move |event| wire.call(&ctx, event)));
            }
        }
        subscriptions
    }
}

/// Collects `(event, wire name, wire)` declarations and validates them.
#[derive(Default)]
pub struct WiringBuilder {
    entries: Vec<EventWires>,
    errors: Vec<String>,
}

impl WiringBuilder {
    pub fn wire(mut self, event: &str, name: &str, wire: Wire) -> Self {
        if event.is_empty() {
            self.errors.push(format!("empty event name for wire `{name}`"));
            return self;
        }
        if name.is_empty() {
            self.errors.push(format!("empty wire name on event `{event}`"));
            return self;
        }

        let index = match self.entries.iter().position(|e| e.event == event) {
            Some(index) => index,
            None => {
                self.entries.push(EventWires {
                    event: event.to_string(),
                    wires: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        let bucket = &mut self.entries[index].wires;
        if bucket.iter().any(|(n, _)| n == name) {
            self.errors
                .push(format!("duplicate wire `{name}` on event `{event}`"));
        } else {
            bucket.push((name.to_string(), wire));
        }
        self
    }

    pub fn build(self) -> Result<Wiring, PluginError> {
        if self.errors.is_empty() {
            Ok(Wiring {
                entries: self.entries,
            })
        } else {
            Err(PluginError::InvalidWiring(self.errors.join("; ")))
        }
    }
}

/// Build a table from `event -> [(wire name, wire)]` declarations.
pub fn create_wiring<'a>(
    declarations: impl IntoIterator<Item = (&'a str, Vec<(&'a str, Wire)>)>,
) -> Result<Wiring, PluginError> {
    declarations
        .into_iter()
        .fold(Wiring::builder(), |builder, (event, wires)| {
            wires
                .into_iter()
                .fold(builder, |builder, (name, wire)| builder.wire(event, name, wire))
        })
        .build()
}
