//! Per-installation module customization.
//!
//! Overrides are layered onto a module descriptor without touching it:
//!
//! * wiring and store emitters merge key by key, overrides winning;
//! * state is deep-merged with priority config > state override > default;
//! * private mutations, actions and getters replace same-named defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use xwire_state::{deep_merge, Action, ActionContext, Getter, Mutation, StoreModule};

use crate::emitters::StoreEmitters;
use crate::module::XModule;
use crate::wiring::Wiring;

/// Public per-module installation options.
#[derive(Debug, Clone, Default)]
pub struct ModuleOptions {
    /// Merged onto the module state with the highest priority.
    pub config: Option<Value>,
    /// Merged onto the module's default wiring.
    pub wiring: Option<Wiring>,
}

impl ModuleOptions {
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_wiring(mut self, wiring: Wiring) -> Self {
        self.wiring = Some(wiring);
        self
    }
}

/// Structural overrides for a module's store fragment.
#[derive(Clone, Default)]
pub struct StoreModuleOverride {
    pub state: Option<Value>,
    pub mutations: BTreeMap<String, Mutation>,
    pub actions: BTreeMap<String, Action>,
    pub getters: BTreeMap<String, Getter>,
}

impl StoreModuleOverride {
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn mutation(
        mut self,
        name: impl Into<String>,
        mutation: impl Fn(&mut Value, Value) + Send + Sync + 'static,
    ) -> Self {
        self.mutations.insert(name.into(), Arc::new(mutation));
        self
    }

    pub fn action(
        mut self,
        name: impl Into<String>,
        action: impl Fn(&ActionContext, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    pub fn getter(
        mut self,
        name: impl Into<String>,
        getter: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }
}

impl fmt::Debug for StoreModuleOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreModuleOverride")
            .field("state", &self.state)
            .field("mutations", &self.mutations.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Structural options that reach inside a module. Not meant for end users.
#[derive(Debug, Clone, Default)]
pub struct PrivateModuleOptions {
    pub store_module: Option<StoreModuleOverride>,
    pub store_emitters: Option<StoreEmitters>,
}

impl PrivateModuleOptions {
    pub fn with_store_module(mut self, store_module: StoreModuleOverride) -> Self {
        self.store_module = Some(store_module);
        self
    }

    pub fn with_store_emitters(mut self, store_emitters: StoreEmitters) -> Self {
        self.store_emitters = Some(store_emitters);
        self
    }
}

/// Apply installation overrides to `module`, returning a new descriptor.
pub fn customize(
    module: &XModule,
    options: Option<&ModuleOptions>,
    private: Option<&PrivateModuleOptions>,
) -> XModule {
    let wiring = match options.and_then(|o| o.wiring.as_ref()) {
        Some(overrides) => module.wiring.merged(overrides),
        None => module.wiring.clone(),
    };
    let store_emitters = match private.and_then(|p| p.store_emitters.as_ref()) {
        Some(overrides) => module.store_emitters.merged(overrides),
        None => module.store_emitters.clone(),
    };
    let store_module = customize_store_module(
        &module.store_module,
        private.and_then(|p| p.store_module.as_ref()),
        options.and_then(|o| o.config.as_ref()),
    );

    XModule {
        name: module.name.clone(),
        store_module,
        store_emitters,
        wiring,
    }
}

fn customize_store_module(
    default: &StoreModule,
    overrides: Option<&StoreModuleOverride>,
    config: Option<&Value>,
) -> StoreModule {
    let mut customized = default.clone();

    if let Some(overrides) = overrides {
        customized
            .mutations
            .extend(overrides.mutations.iter().map(|(k, v)| (k.clone(), v.clone())));
        customized
            .actions
            .extend(overrides.actions.iter().map(|(k, v)| (k.clone(), v.clone())));
        customized
            .getters
            .extend(overrides.getters.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let state_override = overrides.and_then(|o| o.state.clone());
    let config = config.cloned();
    if state_override.is_some() || config.is_some() {
        let default_state = default.state.clone();
        customized.state = Arc::new(move || {
            let mut state = default_state();
            for layer in state_override.iter().chain(config.iter()) {
                deep_merge(&mut state, layer);
            }
            state
        });
    }

    customized
}
