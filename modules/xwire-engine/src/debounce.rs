//! Last-write-wins deferral on top of tokio timers.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::PluginError;

type DebouncedAction<T> = Arc<dyn Fn(T) -> anyhow::Result<()> + Send + Sync>;

/// Runs `action` with the last value pushed once `delay` passes without a
/// newer push. Each push cancels the pending timer and starts a new one.
///
/// Timers run on the tokio runtime that was current at construction, so
/// pushes may come from any thread afterwards.
pub struct Debouncer<T> {
    delay: Duration,
    runtime: Handle,
    action: DebouncedAction<T>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Fails with [`PluginError::NoRuntime`] outside a tokio runtime.
    pub fn new(
        delay: Duration,
        action: impl Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Result<Self, PluginError> {
        let runtime = Handle::try_current().map_err(|_| PluginError::NoRuntime { delay })?;
        Ok(Self {
            delay,
            runtime,
            action: Arc::new(action),
            pending: Mutex::new(None),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn push(&self, value: T) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let action = self.action.clone();
        let delay = self.delay;
        *pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = action(value) {
                tracing::error!(error = %e, "Debounced emission failed");
            }
        }));
    }

    /// Drop the pending value, if any, without running it.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
    }
}
