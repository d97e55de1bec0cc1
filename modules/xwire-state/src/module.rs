//! Store module definitions: default state plus mutations, actions and getters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::StoreError;
use crate::store::{ModulePath, Store};

/// Produces a fresh copy of a module's default state.
pub type StateFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Synchronous state write. The only path through which state changes.
pub type Mutation = Arc<dyn Fn(&mut Value, Value) + Send + Sync>;

/// Derived read over a module's state.
pub type Getter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Effectful operation. May read state, commit mutations and dispatch
/// other actions through the [`ActionContext`].
pub type Action = Arc<dyn Fn(&ActionContext, Value) -> anyhow::Result<()> + Send + Sync>;

/// The state fragment a feature module contributes to the shared store.
#[derive(Clone)]
pub struct StoreModule {
    pub state: StateFactory,
    pub mutations: BTreeMap<String, Mutation>,
    pub actions: BTreeMap<String, Action>,
    pub getters: BTreeMap<String, Getter>,
}

impl StoreModule {
    pub fn new(state: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(state),
            mutations: BTreeMap::new(),
            actions: BTreeMap::new(),
            getters: BTreeMap::new(),
        }
    }

    /// A module whose default state is a clone of `state`.
    pub fn with_state(state: Value) -> Self {
        Self::new(move || state.clone())
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

    /// Evaluate the state factory.
    pub fn default_state(&self) -> Value {
        (self.state)()
    }
}

impl Default for StoreModule {
    fn default() -> Self {
        Self::with_state(Value::Object(Default::default()))
    }
}

impl fmt::Debug for StoreModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreModule")
            .field("mutations", &self.mutations.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Handle passed to actions, scoped to the module that declared them.
pub struct ActionContext {
    store: Store,
    path: ModulePath,
}

impl ActionContext {
    pub(crate) fn new(store: Store, path: ModulePath) -> Self {
        Self { store, path }
    }

    pub fn path(&self) -> &ModulePath {
        &self.path
    }

    /// The whole store, for actions that hand work off to spawned tasks.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn state(&self) -> Result<Value, StoreError> {
        self.store.state(&self.path)
    }

    pub fn getter(&self, name: &str) -> Result<Value, StoreError> {
        self.store.getter(&self.path, name)
    }

    pub fn commit(&self, mutation: &str, payload: Value) -> Result<(), StoreError> {
        self.store.commit(&self.path, mutation, payload)
    }

    pub fn dispatch(&self, action: &str, payload: Value) -> Result<(), StoreError> {
        self.store.dispatch(&self.path, action, payload)
    }
}

/// Ready-made mutations.
pub mod mutations {
    use serde_json::Value;

    /// Replace `state[field]` with the payload.
    pub fn set_field(field: impl Into<String>) -> impl Fn(&mut Value, Value) + Send + Sync + 'static {
        let field = field.into();
        move |state: &mut Value, payload: Value| {
            if let Value::Object(map) = state {
                map.insert(field.clone(), payload);
            }
        }
    }
}
