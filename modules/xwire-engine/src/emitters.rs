//! Store emitters: turn state changes into bus events.
//!
//! Each emitter watches one selector inside its module's namespace. Every
//! distinct new value is emitted under the emitter's event name, tagged
//! with the module as origin. Debounced emitters hold back bursts and emit
//! only the last value, each emitter on its own timer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use xwire_state::{ModulePath, Selector, Store, WatchHandle};

use crate::bus::Bus;
use crate::debounce::Debouncer;
use crate::error::PluginError;
use crate::event::WireMetadata;

/// `filter(new, old)`: return false to skip an emission.
pub type EmitterFilter = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct StoreEmitter {
    pub selector: Selector,
    pub debounce: Option<Duration>,
    /// Also emit the current value once the module finishes registering.
    pub immediate: bool,
    pub filter: Option<EmitterFilter>,
}

impl StoreEmitter {
    /// Observe a dot-path inside the module state.
    pub fn state(path: &str) -> Self {
        Self::from_selector(Selector::State(path.to_string()))
    }

    /// Observe one of the module's getters.
    pub fn getter(name: &str) -> Self {
        Self::from_selector(Selector::Getter(name.to_string()))
    }

    fn from_selector(selector: Selector) -> Self {
        Self {
            selector,
            debounce: None,
            immediate: false,
            filter: None,
        }
    }

    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.debounce = Some(delay);
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn with_filter(
        mut self,
        filter: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    fn passes(&self, new: &Value, old: &Value) -> bool {
        self.filter.as_ref().map_or(true, |f| f(new, old))
    }
}

impl fmt::Debug for StoreEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreEmitter")
            .field("selector", &self.selector)
            .field("debounce", &self.debounce)
            .field("immediate", &self.immediate)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// A module's emitters, keyed by the event they emit. Declared order is kept.
#[derive(Debug, Clone, Default)]
pub struct StoreEmitters {
    entries: Vec<(String, StoreEmitter)>,
}

impl StoreEmitters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an emitter. An existing emitter for the same event is replaced
    /// in place.
    pub fn emitter(mut self, event: &str, emitter: StoreEmitter) -> Self {
        match self.entries.iter_mut().find(|(e, _)| e == event) {
            Some(slot) => slot.1 = emitter,
            None => self.entries.push((event.to_string(), emitter)),
        }
        self
    }

    pub fn get(&self, event: &str) -> Option<&StoreEmitter> {
        self.entries.iter().find(|(e, _)| e == event).map(|(_, em)| em)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoreEmitter)> {
        self.entries.iter().map(|(e, em)| (e.as_str(), em))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Layer `overrides` on top; colliding events take the override.
    pub fn merged(&self, overrides: &StoreEmitters) -> StoreEmitters {
        overrides
            .iter()
            .fold(self.clone(), |acc, (event, emitter)| acc.emitter(event, emitter.clone()))
    }
}

/// Live emitters of one module. Keeps the watch handles for teardown.
pub struct RegisteredEmitters {
    module_name: String,
    path: ModulePath,
    bus: Bus,
    store: Store,
    watches: Vec<WatchHandle>,
    immediate: Vec<(String, StoreEmitter)>,
}

impl RegisteredEmitters {
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Emit the current value of every `immediate` emitter.
    pub fn emit_immediate(&self) -> anyhow::Result<()> {
        for (event, emitter) in &self.immediate {
            let value = self.store.current(&self.path, &emitter.selector)?;
            if emitter.passes(&value, &Value::Null) {
                self.bus
                    .emit(event, value, WireMetadata::from_module(self.module_name.as_str()))?;
            }
        }
        Ok(())
    }

    /// Stop watching. Pending debounced values are dropped with the watchers.
    pub fn cancel(self) {
        for watch in self.watches {
            watch.cancel();
        }
    }
}

/// Watch every emitter's selector in the module at `path` and emit on change.
///
/// Fails without leaving partial watchers behind if a selector names an
/// unknown getter, the module is not registered, or a debounced emitter is
/// registered outside a tokio runtime.
pub fn register_store_emitters(
    module_name: &str,
    path: &ModulePath,
    emitters: &StoreEmitters,
    bus: &Bus,
    store: &Store,
) -> Result<RegisteredEmitters, PluginError> {
    let mut watches = Vec::with_capacity(emitters.len());
    for (event, emitter) in emitters.iter() {
        match watch_emitter(module_name, path, event, emitter, bus, store) {
            Ok(handle) => watches.push(handle),
            Err(e) => {
                for handle in watches {
                    handle.cancel();
                }
                return Err(e);
            }
        }
    }

    tracing::debug!(module = module_name, emitters = watches.len(), "Registered store emitters");
    Ok(RegisteredEmitters {
        module_name: module_name.to_string(),
        path: path.clone(),
        bus: bus.clone(),
        store: store.clone(),
        watches,
        immediate: emitters
            .iter()
            .filter(|(_, em)| em.immediate)
            .map(|(event, em)| (event.to_string(), em.clone()))
            .collect(),
    })
}

fn watch_emitter(
    module_name: &str,
    path: &ModulePath,
    event: &str,
    emitter: &StoreEmitter,
    bus: &Bus,
    store: &Store,
) -> Result<WatchHandle, PluginError> {
    let emit = {
        let bus = bus.clone();
        let event = event.to_string();
        let module_name = module_name.to_string();
        move |value: Value| bus.emit(&event, value, WireMetadata::from_module(module_name.as_str()))
    };

    let gate = emitter.clone();
    let handle = match emitter.debounce {
        Some(delay) => {
            let debouncer = Debouncer::new(delay, emit)?;
            store.watch(path, emitter.selector.clone(), move |new, old| {
                if gate.passes(new, old) {
                    debouncer.push(new.clone());
                }
                Ok(())
            })?
        }
        None => store.watch(path, emitter.selector.clone(), move |new, old| {
            if gate.passes(new, old) {
                emit(new.clone())
            } else {
                Ok(())
            }
        })?,
    };
    Ok(handle)
}
