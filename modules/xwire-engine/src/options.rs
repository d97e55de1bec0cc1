//! Plugin installation options.
//!
//! Code-level options are assembled with the [`XPluginOptions`] builder.
//! Per-module `config` values can also come from a TOML file or a JSON
//! string (e.g. a URL parameter) through [`InstallConfig`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use xwire_state::{deep_merge, Store};

use crate::adapter::SearchAdapter;
use crate::customize::{ModuleOptions, PrivateModuleOptions};
use crate::error::PluginError;
use crate::module::XModule;
use crate::plugin::XPlugin;

/// Runs once during install, after the store is bound and before any
/// module registers.
pub type InstallHook = Arc<dyn Fn(&XPlugin) -> anyhow::Result<()> + Send + Sync>;

/// Named value transform made available to the host through the plugin.
pub type Helper = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Clone, Default)]
pub struct XPluginOptions {
    pub adapter: Option<Arc<dyn SearchAdapter>>,
    /// Externally owned store. A fresh one is created when absent.
    pub store: Option<Store>,
    pub x_modules: HashMap<String, ModuleOptions>,
    pub private_x_modules: HashMap<String, PrivateModuleOptions>,
    pub initial_x_modules: Vec<XModule>,
    pub install_hooks: Vec<InstallHook>,
    pub helpers: BTreeMap<String, Helper>,
}

impl XPluginOptions {
    pub fn new(adapter: Arc<dyn SearchAdapter>) -> Self {
        Self {
            adapter: Some(adapter),
            ..Self::default()
        }
    }

    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_module_options(mut self, module_name: &str, options: ModuleOptions) -> Self {
        self.x_modules.insert(module_name.to_string(), options);
        self
    }

    pub fn with_private_module_options(
        mut self,
        module_name: &str,
        options: PrivateModuleOptions,
    ) -> Self {
        self.private_x_modules.insert(module_name.to_string(), options);
        self
    }

    pub fn with_initial_module(mut self, module: XModule) -> Self {
        self.initial_x_modules.push(module);
        self
    }

    pub fn with_install_hook(
        mut self,
        hook: impl Fn(&XPlugin) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.install_hooks.push(Arc::new(hook));
        self
    }

    pub fn with_helper(
        mut self,
        name: &str,
        helper: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.helpers.insert(name.to_string(), Arc::new(helper));
        self
    }

    /// Fold declarative module config into the options. Config already set
    /// in code is merged underneath, so the file wins on collisions.
    pub fn with_install_config(mut self, config: InstallConfig) -> Self {
        for (name, module) in config.x_modules {
            let Some(incoming) = module.config else {
                continue;
            };
            let options = self.x_modules.entry(name).or_default();
            match options.config.as_mut() {
                Some(existing) => deep_merge(existing, &incoming),
                None => options.config = Some(incoming),
            }
        }
        self
    }

    /// Check the options before anything is installed.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.adapter.is_none() {
            return Err(PluginError::InvalidOptions(
                "a search adapter is required".to_string(),
            ));
        }

        for (name, options) in &self.x_modules {
            if name.is_empty() {
                return Err(PluginError::InvalidOptions(
                    "module options declared with an empty module name".to_string(),
                ));
            }
            if let Some(config) = &options.config {
                if !config.is_object() {
                    return Err(PluginError::InvalidOptions(format!(
                        "config for module `{name}` must be an object"
                    )));
                }
            }
        }

        if let Some(module) = self.initial_x_modules.iter().find(|m| m.name.is_empty()) {
            return Err(PluginError::InvalidOptions(format!(
                "initial module with wiring for {:?} has an empty name",
                module.wiring.events().collect::<Vec<_>>()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for XPluginOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XPluginOptions")
            .field("adapter", &self.adapter.is_some())
            .field("store", &self.store.is_some())
            .field("x_modules", &self.x_modules)
            .field("private_x_modules", &self.private_x_modules)
            .field(
                "initial_x_modules",
                &self.initial_x_modules.iter().map(|m| &m.name).collect::<Vec<_>>(),
            )
            .field("install_hooks", &self.install_hooks.len())
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Declarative config
// ---------------------------------------------------------------------------

/// Module config loaded from disk or a JSON string.
///
/// ```toml
/// [x_modules.identifierResults.config]
/// identifierDetectionRegexp = "^[a-zA-Z][0-9]+"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallConfig {
    #[serde(default, alias = "xModules")]
    pub x_modules: BTreeMap<String, ModuleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    pub config: Option<Value>,
}

impl InstallConfig {
    /// Parse the JSON form, e.g. `{"xModules": {"search": {"config": {...}}}}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse install config JSON")
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        toml::from_str(toml).context("Failed to parse install config TOML")
    }

    /// Layer `other` on top of this config; `other` wins on collisions.
    pub fn merged_with(mut self, other: InstallConfig) -> Self {
        for (name, module) in other.x_modules {
            let entry = self.x_modules.entry(name).or_default();
            match (entry.config.as_mut(), module.config) {
                (Some(existing), Some(incoming)) => deep_merge(existing, &incoming),
                (None, Some(incoming)) => entry.config = Some(incoming),
                (_, None) => {}
            }
        }
        self
    }
}

/// Load and parse a TOML install config file.
pub fn load_install_config(path: &Path) -> Result<InstallConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read install config: {}", path.display()))?;
    InstallConfig::from_toml_str(&content)
        .with_context(|| format!("Failed to load install config: {}", path.display()))
}
