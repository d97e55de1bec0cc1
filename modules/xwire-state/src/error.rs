use thiserror::Error;

use crate::store::ModulePath;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store module already registered at `{0}`")]
    ModuleAlreadyRegistered(ModulePath),

    #[error("No store module registered at `{0}`")]
    ModuleNotFound(ModulePath),

    #[error("Unknown mutation `{mutation}` in module `{module}`")]
    UnknownMutation { module: ModulePath, mutation: String },

    #[error("Unknown action `{action}` in module `{module}`")]
    UnknownAction { module: ModulePath, action: String },

    #[error("Unknown getter `{getter}` in module `{module}`")]
    UnknownGetter { module: ModulePath, getter: String },

    #[error("Cannot nest module state at `{0}`: a parent value is not an object")]
    InvalidStatePath(ModulePath),

    #[error("Action `{action}` in module `{module}` failed: {source}")]
    Action {
        module: ModulePath,
        action: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("State change subscriber failed: {0}")]
    Subscriber(#[source] anyhow::Error),
}

/// Raised when a declared state or event mapping path resolves to nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Tagging path not found: `{path}`")]
    TaggingPathNotFound { path: String },
}
