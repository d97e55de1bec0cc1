//! Process-wide plugin handle.
//!
//! A thin layer over [`XPlugin`] for hosts that want a single installation
//! reachable from anywhere. Modules registered before [`install`] are kept
//! in a process-wide pending table and handed to the plugin when it is
//! installed.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use xwire_state::Store;

use crate::adapter::SearchAdapter;
use crate::bus::Bus;
use crate::error::PluginError;
use crate::module::XModule;
use crate::options::XPluginOptions;
use crate::plugin::XPlugin;

static INSTANCE: RwLock<Option<Arc<XPlugin>>> = RwLock::new(None);
static PENDING: Mutex<Vec<XModule>> = Mutex::new(Vec::new());

fn instance() -> Option<Arc<XPlugin>> {
    INSTANCE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Register `module` with the installed plugin, or queue it until
/// [`install`] runs. A queued module replaces an earlier one of the same
/// name.
pub fn register_module(module: XModule) -> Result<(), PluginError> {
    if let Some(plugin) = instance() {
        return plugin.register_module(module);
    }
    let mut pending = PENDING.lock().unwrap_or_else(PoisonError::into_inner);
    tracing::debug!(module = %module.name, "No plugin installed yet, module queued");
    match pending.iter_mut().find(|m| m.name == module.name) {
        Some(slot) => *slot = module,
        None => pending.push(module),
    }
    Ok(())
}

/// Install the process-wide plugin on a fresh bus.
pub fn install(options: XPluginOptions) -> Result<Arc<XPlugin>, PluginError> {
    install_with_bus(Bus::new(), options)
}

pub fn install_with_bus(bus: Bus, options: XPluginOptions) -> Result<Arc<XPlugin>, PluginError> {
    let plugin = Arc::new(XPlugin::new(bus));
    {
        let mut slot = INSTANCE.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(PluginError::AlreadyInstalled);
        }
        // Published before installing so hooks and wires can reach it.
        *slot = Some(plugin.clone());
    }

    let pending = std::mem::take(&mut *PENDING.lock().unwrap_or_else(PoisonError::into_inner));
    for module in pending {
        plugin.register_module(module)?;
    }

    match plugin.install(options) {
        Ok(()) => Ok(plugin),
        Err(e) => {
            INSTANCE
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            // Queued modules survive a failed install.
            *PENDING.lock().unwrap_or_else(PoisonError::into_inner) = plugin.take_pending();
            Err(e)
        }
    }
}

pub fn plugin() -> Result<Arc<XPlugin>, PluginError> {
    instance().ok_or(PluginError::NotInstalled)
}

pub fn bus() -> Result<Bus, PluginError> {
    Ok(plugin()?.bus().clone())
}

pub fn store() -> Result<Store, PluginError> {
    plugin()?.store()
}

pub fn adapter() -> Result<Arc<dyn SearchAdapter>, PluginError> {
    plugin()?.adapter()
}

/// Tear down the installed plugin, if any, and forget every queued module.
/// Meant for test isolation.
pub fn reset_instance() {
    let previous = INSTANCE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(plugin) = previous {
        plugin.teardown();
    }
    PENDING.lock().unwrap_or_else(PoisonError::into_inner).clear();
}
