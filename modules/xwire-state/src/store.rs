//! Namespaced state container.
//!
//! A single JSON state tree, partitioned by [`ModulePath`]. Each registered
//! module contributes its default state at its path, plus the mutations,
//! actions and getters that operate on it. Watchers observe a selector
//! inside a module and are told about every distinct new value after a
//! commit.
//!
//! No lock is held while user callbacks run (actions, watcher callbacks),
//! so a callback may freely commit, dispatch or register more modules.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::module::{ActionContext, Getter, StoreModule};
use crate::path;

// ---------------------------------------------------------------------------
// Paths and selectors
// ---------------------------------------------------------------------------

/// Location of a module inside the state tree, e.g. `x/searchBox`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePath(Vec<String>);

impl ModulePath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// True if one path is a prefix of the other.
    fn overlaps(&self, other: &ModulePath) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl From<&str> for ModulePath {
    fn from(path: &str) -> Self {
        Self::new(path.split('/').filter(|s| !s.is_empty()))
    }
}

/// What a watcher observes inside a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Dot-path into the module state. Empty selects the whole state.
    State(String),
    /// Named getter of the module.
    Getter(String),
}

pub type WatchCallback = Arc<dyn Fn(&Value, &Value) -> anyhow::Result<()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Shared, cloneable handle to the state container.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<StoreInner>>,
}

struct StoreInner {
    state: Value,
    modules: BTreeMap<ModulePath, Registered>,
    watchers: Vec<Watcher>,
    next_watch_id: u64,
}

struct Registered {
    mutations: BTreeMap<String, crate::module::Mutation>,
    actions: BTreeMap<String, crate::module::Action>,
    getters: BTreeMap<String, Getter>,
}

struct Watcher {
    id: u64,
    path: ModulePath,
    selector: Selector,
    last: Value,
    /// Bumped whenever `last` changes, so a pending notification can tell
    /// that a nested commit already delivered a newer value.
    version: u64,
    callback: WatchCallback,
}

struct Change {
    watcher: u64,
    version: u64,
    callback: WatchCallback,
    new: Value,
    old: Value,
}

impl Default for StoreInner {
    fn default() -> Self {
        Self {
            state: Value::Object(Map::new()),
            modules: BTreeMap::new(),
            watchers: Vec::new(),
            next_watch_id: 1,
        }
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `module` at `path`, seeding its default state.
    pub fn register_module(&self, path: ModulePath, module: StoreModule) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.modules.contains_key(&path) {
            return Err(StoreError::ModuleAlreadyRegistered(path));
        }

        let state = module.default_state();
        insert_state(&mut inner.state, &path, state)?;
        inner.modules.insert(
            path.clone(),
            Registered {
                mutations: module.mutations,
                actions: module.actions,
                getters: module.getters,
            },
        );

        tracing::debug!(module = %path, "Registered store module");
        Ok(())
    }

    /// Remove the module at `path` with its state and watchers. Modules
    /// nested below it are left alone.
    pub fn unregister_module(&self, path: &ModulePath) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.modules.remove(path).is_none() {
            return Err(StoreError::ModuleNotFound(path.clone()));
        }
        inner.watchers.retain(|w| &w.path != path);
        if let Some((last, parents)) = path.segments().split_last() {
            let parent = if parents.is_empty() {
                Some(&mut inner.state)
            } else {
                module_state_mut(&mut inner.state, &ModulePath::new(parents.iter()))
            };
            if let Some(Value::Object(map)) = parent {
                map.remove(last);
            }
        }

        tracing::debug!(module = %path, "Unregistered store module");
        Ok(())
    }

    pub fn has_module(&self, path: &ModulePath) -> bool {
        self.lock().modules.contains_key(path)
    }

    pub fn module_paths(&self) -> Vec<ModulePath> {
        self.lock().modules.keys().cloned().collect()
    }

    /// Snapshot of the whole state tree.
    pub fn root_state(&self) -> Value {
        self.lock().state.clone()
    }

    /// Snapshot of one module's state.
    pub fn state(&self, path: &ModulePath) -> Result<Value, StoreError> {
        let inner = self.lock();
        module_state(&inner.state, path)
            .cloned()
            .ok_or_else(|| StoreError::ModuleNotFound(path.clone()))
    }

    /// Read a dot-path inside a module's state. `None` if the path is absent.
    pub fn get(&self, path: &ModulePath, dot_path: &str) -> Result<Option<Value>, StoreError> {
        let inner = self.lock();
        let state = module_state(&inner.state, path)
            .ok_or_else(|| StoreError::ModuleNotFound(path.clone()))?;
        Ok(path::lookup(state, dot_path).ok().cloned())
    }

    pub fn getter(&self, path: &ModulePath, name: &str) -> Result<Value, StoreError> {
        self.current(path, &Selector::Getter(name.to_string()))
    }

    /// Current value of `selector` inside the module at `path`.
    pub fn current(&self, path: &ModulePath, selector: &Selector) -> Result<Value, StoreError> {
        self.lock().evaluate(path, selector)
    }

    /// Run a mutation, then notify every watcher whose value changed.
    ///
    /// Watcher errors abort the remaining notifications and are returned.
    /// A callback may commit again; watchers it already notified with a newer
    /// value are skipped here instead of receiving the stale one.
    pub fn commit(&self, path: &ModulePath, mutation: &str, payload: Value) -> Result<(), StoreError> {
        let changes = {
            let mut inner = self.lock();
            let handler = inner
                .modules
                .get(path)
                .ok_or_else(|| StoreError::ModuleNotFound(path.clone()))?
                .mutations
                .get(mutation)
                .cloned()
                .ok_or_else(|| StoreError::UnknownMutation {
                    module: path.clone(),
                    mutation: mutation.to_string(),
                })?;
            let state = module_state_mut(&mut inner.state, path)
                .ok_or_else(|| StoreError::ModuleNotFound(path.clone()))?;
            handler(state, payload);
            inner.collect_changes(path)
        };

        tracing::trace!(module = %path, mutation, changed = changes.len(), "Committed");
        for change in changes {
            if !self.lock().is_current(&change) {
                continue;
            }
            (change.callback)(&change.new, &change.old).map_err(StoreError::Subscriber)?;
        }
        Ok(())
    }

    /// Run an action outside the store lock.
    pub fn dispatch(&self, path: &ModulePath, action: &str, payload: Value) -> Result<(), StoreError> {
        let handler = {
            let inner = self.lock();
            inner
                .modules
                .get(path)
                .ok_or_else(|| StoreError::ModuleNotFound(path.clone()))?
                .actions
                .get(action)
                .cloned()
                .ok_or_else(|| StoreError::UnknownAction {
                    module: path.clone(),
                    action: action.to_string(),
                })?
        };

        tracing::trace!(module = %path, action, "Dispatching");
        let ctx = ActionContext::new(self.clone(), path.clone());
        handler(&ctx, payload).map_err(|source| StoreError::Action {
            module: path.clone(),
            action: action.to_string(),
            source,
        })
    }

    /// Observe `selector` inside the module at `path`. The current value is
    /// the baseline; `callback(new, old)` runs after each commit that
    /// changes it.
    pub fn watch(
        &self,
        path: &ModulePath,
        selector: Selector,
        callback: impl Fn(&Value, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Result<WatchHandle, StoreError> {
        let mut inner = self.lock();
        let last = inner.evaluate(path, &selector)?;
        let id = inner.next_watch_id;
        inner.next_watch_id += 1;
        inner.watchers.push(Watcher {
            id,
            path: path.clone(),
            selector,
            last,
            version: 0,
            callback: Arc::new(callback),
        });
        Ok(WatchHandle {
            id,
            store: Arc::downgrade(&self.inner),
        })
    }

    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Store")
            .field("modules", &inner.modules.keys().collect::<Vec<_>>())
            .field("watchers", &inner.watchers.len())
            .finish()
    }
}

impl StoreInner {
    fn evaluate(&self, path: &ModulePath, selector: &Selector) -> Result<Value, StoreError> {
        let registered = self
            .modules
            .get(path)
            .ok_or_else(|| StoreError::ModuleNotFound(path.clone()))?;
        let state = module_state(&self.state, path)
            .ok_or_else(|| StoreError::ModuleNotFound(path.clone()))?;
        match selector {
            Selector::State(dot_path) => Ok(path::get_or_null(state, dot_path)),
            Selector::Getter(name) => registered
                .getters
                .get(name)
                .map(|getter| getter(state))
                .ok_or_else(|| StoreError::UnknownGetter {
                    module: path.clone(),
                    getter: name.clone(),
                }),
        }
    }

    /// Whether `change` is still the latest value its watcher has seen.
    /// Cancelled watchers are never current.
    fn is_current(&self, change: &Change) -> bool {
        self.watchers
            .iter()
            .any(|w| w.id == change.watcher && w.version == change.version)
    }

    fn collect_changes(&mut self, committed: &ModulePath) -> Vec<Change> {
        let StoreInner {
            state,
            modules,
            watchers,
            ..
        } = self;

        let mut changes = Vec::new();
        for watcher in watchers.iter_mut().filter(|w| w.path.overlaps(committed)) {
            let Some(module) = module_state(state, &watcher.path) else {
                continue;
            };
            let value = match &watcher.selector {
                Selector::State(dot_path) => path::get_or_null(module, dot_path),
                Selector::Getter(name) => match modules
                    .get(&watcher.path)
                    .and_then(|m| m.getters.get(name))
                {
                    Some(getter) => getter(module),
                    None => continue,
                },
            };
            if value != watcher.last {
                let old = std::mem::replace(&mut watcher.last, value.clone());
                watcher.version += 1;
                changes.push(Change {
                    watcher: watcher.id,
                    version: watcher.version,
                    callback: watcher.callback.clone(),
                    new: value,
                    old,
                });
            }
        }
        changes
    }
}

fn module_state<'a>(root: &'a Value, path: &ModulePath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |value, segment| value.get(segment.as_str()))
}

fn module_state_mut<'a>(root: &'a mut Value, path: &ModulePath) -> Option<&'a mut Value> {
    path.segments()
        .iter()
        .try_fold(root, |value, segment| value.get_mut(segment.as_str()))
}

fn insert_state(root: &mut Value, path: &ModulePath, state: Value) -> Result<(), StoreError> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(StoreError::InvalidStatePath(path.clone()));
    };

    let mut current = root;
    for segment in parents {
        let Value::Object(map) = current else {
            return Err(StoreError::InvalidStatePath(path.clone()));
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    match current {
        Value::Object(map) => {
            map.insert(last.clone(), state);
            Ok(())
        }
        _ => Err(StoreError::InvalidStatePath(path.clone())),
    }
}

// ---------------------------------------------------------------------------
// Watch handles
// ---------------------------------------------------------------------------

/// Detaches a watcher. Dropping the handle leaves the watcher in place.
#[derive(Debug)]
pub struct WatchHandle {
    id: u64,
    store: Weak<Mutex<StoreInner>>,
}

impl WatchHandle {
    pub fn cancel(self) {
        if let Some(inner) = self.store.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.watchers.retain(|w| w.id != self.id);
        }
    }
}
