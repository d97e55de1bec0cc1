use std::time::Duration;

use thiserror::Error;
use xwire_state::StoreError;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("XPlugin has already been installed")]
    AlreadyInstalled,

    #[error("XPlugin must be installed before accessing its API")]
    NotInstalled,

    #[error("Invalid plugin options: {0}")]
    InvalidOptions(String),

    #[error("Invalid wiring: {0}")]
    InvalidWiring(String),

    #[error("Debouncing by {delay:?} requires a tokio runtime")]
    NoRuntime { delay: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Event emission failed: {0}")]
    Emission(#[source] anyhow::Error),

    #[error("Install hook failed: {0}")]
    Hook(#[source] anyhow::Error),
}
