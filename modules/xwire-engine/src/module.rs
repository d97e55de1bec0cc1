//! Module descriptors: the unit of registration.

use xwire_state::{ModulePath, StoreModule};

use crate::emitters::StoreEmitters;
use crate::wire::module_path;
use crate::wiring::Wiring;

/// A named feature module: its state fragment, the emitters that publish
/// its state changes, and the wiring that reacts to events.
///
/// `name` is the identity. Registering two descriptors with the same name
/// registers only the first.
#[derive(Debug, Clone)]
pub struct XModule {
    pub name: String,
    pub store_module: StoreModule,
    pub store_emitters: StoreEmitters,
    pub wiring: Wiring,
}

impl XModule {
    pub fn new(name: impl Into<String>, store_module: StoreModule) -> Self {
        Self {
            name: name.into(),
            store_module,
            store_emitters: StoreEmitters::default(),
            wiring: Wiring::default(),
        }
    }

    pub fn with_store_emitters(mut self, store_emitters: StoreEmitters) -> Self {
        self.store_emitters = store_emitters;
        self
    }

    pub fn with_wiring(mut self, wiring: Wiring) -> Self {
        self.wiring = wiring;
        self
    }

    /// Where this module's state lives: `x/<name>`.
    pub fn path(&self) -> ModulePath {
        module_path(&self.name)
    }
}
