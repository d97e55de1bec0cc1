//! Shape-agnostic, namespaced state container.
//!
//! State is a single `serde_json::Value` tree. Feature modules register a
//! fragment of it under a [`ModulePath`] and change it only through their
//! own mutations. Watchers turn state changes into callbacks, which is
//! what the engine builds store emitters on.
//!
//! Also home to the structural [`merge`] used for per-installation
//! overrides and the dot-[`path`] lookup used to select values.

pub mod error;
pub mod merge;
pub mod module;
pub mod path;
pub mod store;

pub use error::{PathError, StoreError};
pub use merge::{deep_merge, merged};
pub use module::{mutations, Action, ActionContext, Getter, Mutation, StateFactory, StoreModule};
pub use path::{lookup, select_paths};
pub use store::{ModulePath, Selector, Store, WatchCallback, WatchHandle};
