//! Event wiring and module registration engine.
//!
//! Feature modules declare a state fragment, the events their state changes
//! produce (store emitters) and how they react to events (wiring). The
//! [`XPlugin`] registrar installs them onto a shared store and bus:
//! customize → register state → start emitters → subscribe wires.
//!
//! Emission is synchronous. Debounced emitters and wires defer through tokio.

pub mod adapter;
pub mod bus;
pub mod customize;
pub mod debounce;
pub mod emitters;
pub mod error;
pub mod event;
pub mod global;
pub mod module;
pub mod options;
pub mod plugin;
pub mod wire;
pub mod wiring;

pub use adapter::{MemoryAdapter, SearchAdapter};
pub use bus::{Bus, BusStream, EventStream, Subscription};
pub use customize::{customize, ModuleOptions, PrivateModuleOptions, StoreModuleOverride};
pub use debounce::Debouncer;
pub use emitters::{StoreEmitter, StoreEmitters};
pub use error::PluginError;
pub use event::{AdapterConfigChanged, BusEvent, ModuleRegistered, WireMetadata, XEvent};
pub use module::XModule;
pub use options::{load_install_config, InstallConfig, XPluginOptions};
pub use plugin::{Lifecycle, XPlugin};
pub use wire::{with_module, ModuleWires, Wire, WireContext};
pub use wiring::{create_wiring, Wiring};
