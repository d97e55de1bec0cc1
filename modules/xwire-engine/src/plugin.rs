//! The registrar: installs the engine and registers feature modules.
//!
//! An [`XPlugin`] owns everything a running installation needs: the bus it
//! was created with, the bound store and adapter, the per-module overrides,
//! the set of registered modules and the live subscriptions and watches
//! those modules created. Modules registered before installation wait in a
//! pending table and are drained, in order, by [`XPlugin::install`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use xwire_state::{ModulePath, Store, StoreModule};

use crate::adapter::SearchAdapter;
use crate::bus::{Bus, Subscription};
use crate::customize::{customize, ModuleOptions, PrivateModuleOptions};
use crate::emitters::{register_store_emitters, RegisteredEmitters};
use crate::error::PluginError;
use crate::event::{AdapterConfigChanged, ModuleRegistered, WireMetadata};
use crate::module::XModule;
use crate::options::{Helper, XPluginOptions};
use crate::wire::{module_path, WireContext, ROOT_MODULE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninstalled,
    /// The store is bound; modules register immediately.
    Installing,
    Installed,
}

pub struct XPlugin {
    bus: Bus,
    inner: Mutex<PluginInner>,
}

struct PluginInner {
    lifecycle: Lifecycle,
    store: Option<Store>,
    adapter: Option<Arc<dyn SearchAdapter>>,
    adapter_listener: Option<Arc<AtomicBool>>,
    x_modules: HashMap<String, ModuleOptions>,
    private_x_modules: HashMap<String, PrivateModuleOptions>,
    helpers: BTreeMap<String, Helper>,
    /// Names in registration order. A name is present from the moment its
    /// registration starts.
    installed: Vec<String>,
    pending: Vec<XModule>,
    registrations: Vec<Registration>,
    /// The root module was registered by this install, not by the caller.
    owns_root: bool,
}

impl Default for PluginInner {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Uninstalled,
            store: None,
            adapter: None,
            adapter_listener: None,
            x_modules: HashMap::new(),
            private_x_modules: HashMap::new(),
            helpers: BTreeMap::new(),
            installed: Vec::new(),
            pending: Vec::new(),
            registrations: Vec::new(),
            owns_root: false,
        }
    }
}

/// What one registered module left attached to the bus and the store.
struct Registration {
    module_name: String,
    subscriptions: Vec<Subscription>,
    emitters: RegisteredEmitters,
}

impl Registration {
    fn cancel(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
        self.emitters.cancel();
    }
}

impl XPlugin {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            inner: Mutex::new(PluginInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PluginInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    pub fn is_installed(&self) -> bool {
        self.lifecycle() == Lifecycle::Installed
    }

    /// The bound store. Available from the moment installation binds it.
    pub fn store(&self) -> Result<Store, PluginError> {
        self.lock().store.clone().ok_or(PluginError::NotInstalled)
    }

    pub fn adapter(&self) -> Result<Arc<dyn SearchAdapter>, PluginError> {
        self.lock().adapter.clone().ok_or(PluginError::NotInstalled)
    }

    pub fn helper(&self, name: &str) -> Option<Helper> {
        self.lock().helpers.get(name).cloned()
    }

    /// Registered module names, in registration order.
    pub fn installed_modules(&self) -> Vec<String> {
        self.lock().installed.clone()
    }

    pub fn pending_modules(&self) -> Vec<String> {
        self.lock().pending.iter().map(|m| m.name.clone()).collect()
    }

    /// Remove and return every module still waiting for installation.
    pub fn take_pending(&self) -> Vec<XModule> {
        std::mem::take(&mut self.lock().pending)
    }

    /// Register `module`, or queue it if the plugin has no store yet.
    ///
    /// At most one module per name is ever registered; later calls with the
    /// same name are ignored. A queued module is replaced by a later one of
    /// the same name.
    pub fn register_module(&self, module: XModule) -> Result<(), PluginError> {
        let (store, options, private) = {
            let mut inner = self.lock();
            let Some(store) = inner.store.clone() else {
                tracing::debug!(module = %module.name, "Plugin not installed, module queued");
                match inner.pending.iter_mut().find(|m| m.name == module.name) {
                    Some(slot) => *slot = module,
                    None => inner.pending.push(module),
                }
                return Ok(());
            };
            if inner.installed.contains(&module.name) {
                tracing::debug!(module = %module.name, "Module already registered, skipping");
                return Ok(());
            }
            inner.installed.push(module.name.clone());
            (
                store,
                inner.x_modules.get(&module.name).cloned(),
                inner.private_x_modules.get(&module.name).cloned(),
            )
        };

        match self.register_now(&module, &store, options.as_ref(), private.as_ref()) {
            Ok(()) => {
                tracing::info!(module = %module.name, "Registered x-module");
                Ok(())
            }
            Err(e) => {
                self.lock().installed.retain(|name| name != &module.name);
                Err(e)
            }
        }
    }

    fn register_now(
        &self,
        module: &XModule,
        store: &Store,
        options: Option<&ModuleOptions>,
        private: Option<&PrivateModuleOptions>,
    ) -> Result<(), PluginError> {
        let customized = customize(module, options, private);
        let name = customized.name.as_str();
        let path = customized.path();

        store.register_module(path.clone(), customized.store_module.clone())?;

        let emitters = match register_store_emitters(
            name,
            &path,
            &customized.store_emitters,
            &self.bus,
            store,
        ) {
            Ok(emitters) => emitters,
            Err(e) => {
                unregister_store_module(store, &path);
                return Err(e);
            }
        };

        let ctx = WireContext {
            store: store.clone(),
            bus: self.bus.clone(),
        };
        let subscriptions = customized.wiring.register(&self.bus, &ctx);
        tracing::debug!(
            module = name,
            wires = subscriptions.len(),
            emitters = emitters.watch_count(),
            "Wired x-module"
        );

        let registration = Registration {
            module_name: name.to_string(),
            subscriptions,
            emitters,
        };
        if let Err(e) = registration.emitters.emit_immediate() {
            registration.cancel();
            unregister_store_module(store, &path);
            return Err(PluginError::Emission(e));
        }
        self.lock().registrations.push(registration);

        let announced = self
            .bus
            .emit_event::<ModuleRegistered>(&customized.name, WireMetadata::from_module(name));
        if let Err(e) = announced {
            let registration = {
                let mut inner = self.lock();
                inner
                    .registrations
                    .iter()
                    .position(|r| r.module_name == name)
                    .map(|index| inner.registrations.remove(index))
            };
            if let Some(registration) = registration {
                registration.cancel();
            }
            unregister_store_module(store, &path);
            return Err(PluginError::Emission(e));
        }
        Ok(())
    }

    /// Install the plugin. Can only succeed once per plugin.
    ///
    /// On failure the plugin is returned to [`Lifecycle::Uninstalled`] with
    /// its pending modules intact.
    pub fn install(&self, options: XPluginOptions) -> Result<(), PluginError> {
        {
            let mut inner = self.lock();
            if inner.lifecycle != Lifecycle::Uninstalled {
                return Err(PluginError::AlreadyInstalled);
            }
            inner.lifecycle = Lifecycle::Installing;
        }

        tracing::info!(?options, "Installing XPlugin");
        match self.run_install(options) {
            Ok(()) => {
                let mut inner = self.lock();
                inner.lifecycle = Lifecycle::Installed;
                tracing::info!(modules = ?inner.installed, "XPlugin installed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "XPlugin installation failed, rolling back");
                self.release(true);
                Err(e)
            }
        }
    }

    fn run_install(&self, options: XPluginOptions) -> Result<(), PluginError> {
        options.validate()?;
        let XPluginOptions {
            adapter,
            store,
            x_modules,
            private_x_modules,
            initial_x_modules,
            install_hooks,
            helpers,
        } = options;
        let adapter = adapter.ok_or_else(|| {
            PluginError::InvalidOptions("a search adapter is required".to_string())
        })?;

        let store = store.unwrap_or_default();
        let root = ModulePath::new([ROOT_MODULE]);
        let owns_root = !store.has_module(&root) && store.root_state().get(ROOT_MODULE).is_none();
        if owns_root {
            store.register_module(root, StoreModule::default())?;
        }
        {
            let mut inner = self.lock();
            inner.owns_root = owns_root;
            inner.store = Some(store);
            inner.adapter = Some(adapter.clone());
            inner.x_modules = x_modules;
            inner.private_x_modules = private_x_modules;
        }
        tracing::debug!("Store bound");

        let active = Arc::new(AtomicBool::new(true));
        let listener = {
            let bus = self.bus.clone();
            let active = active.clone();
            Box::new(move |config: serde_json::Value| {
                if !active.load(Ordering::Acquire) {
                    return;
                }
                if let Err(e) = bus.emit_event::<AdapterConfigChanged>(&config, WireMetadata::default())
                {
                    tracing::warn!(error = %e, "AdapterConfigChanged subscriber failed");
                }
            })
        };
        if adapter.add_config_changed_listener(listener) {
            self.lock().adapter_listener = Some(active);
            tracing::debug!("Listening for adapter config changes");
        }

        for hook in &install_hooks {
            hook(self).map_err(PluginError::Hook)?;
        }

        if !helpers.is_empty() {
            tracing::debug!(helpers = ?helpers.keys().collect::<Vec<_>>(), "Registered helpers");
        }
        self.lock().helpers = helpers;

        let pending = self.lock().pending.clone();
        for module in initial_x_modules.into_iter().chain(pending) {
            self.register_module(module)?;
        }
        self.lock().pending.clear();
        Ok(())
    }

    /// Detach every wire and store emitter this plugin attached and stop
    /// relaying adapter config changes. The plugin returns to
    /// [`Lifecycle::Uninstalled`]; store state is left in place.
    pub fn teardown(&self) {
        self.release(false);
        tracing::debug!("XPlugin torn down");
    }

    fn release(&self, unregister_modules: bool) {
        let (registrations, store, installed, listener, owns_root) = {
            let mut inner = self.lock();
            let pending = std::mem::take(&mut inner.pending);
            let previous = std::mem::take(&mut *inner);
            inner.pending = pending;
            (
                previous.registrations,
                previous.store,
                previous.installed,
                previous.adapter_listener,
                previous.owns_root,
            )
        };

        if let Some(active) = listener {
            active.store(false, Ordering::Release);
        }
        for registration in registrations {
            registration.cancel();
        }
        if let (true, Some(store)) = (unregister_modules, store) {
            for name in installed {
                unregister_store_module(&store, &module_path(&name));
            }
            if owns_root {
                unregister_store_module(&store, &ModulePath::new([ROOT_MODULE]));
            }
        }
    }
}

fn unregister_store_module(store: &Store, path: &ModulePath) {
    if let Err(e) = store.unregister_module(path) {
        tracing::warn!(module = %path, error = %e, "Failed to unregister store module");
    }
}

impl fmt::Debug for XPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("XPlugin")
            .field("lifecycle", &inner.lifecycle)
            .field("installed", &inner.installed)
            .field(
                "pending",
                &inner.pending.iter().map(|m| &m.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
