//! Events as they travel through the bus.
//!
//! At runtime an event is a name plus an opaque JSON payload and
//! [`WireMetadata`]. The closed registry of event names is expressed with the
//! [`XEvent`] trait: one zero-sized type per event, tying the name to its
//! payload type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named event with a known payload type.
pub trait XEvent {
    const NAME: &'static str;
    type Payload: Serialize + DeserializeOwned;
}

/// The search adapter configuration has changed. Payload: the new config.
pub struct AdapterConfigChanged;

impl XEvent for AdapterConfigChanged {
    const NAME: &'static str = "AdapterConfigChanged";
    type Payload = Value;
}

/// A module finished its registration. Payload: the module name.
pub struct ModuleRegistered;

impl XEvent for ModuleRegistered {
    const NAME: &'static str = "ModuleRegistered";
    type Payload = String;
}

/// Context travelling alongside an event payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMetadata {
    /// Module that caused the emission, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    /// Value handed back to whoever emitted, e.g. a component callback result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_return: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl WireMetadata {
    pub fn from_module(module_name: impl Into<String>) -> Self {
        Self {
            module_name: Some(module_name.into()),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: Value) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_callback_return(mut self, value: Value) -> Self {
        self.callback_return = Some(value);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// One emission, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub name: String,
    pub payload: Value,
    pub metadata: WireMetadata,
}

impl BusEvent {
    pub fn is<E: XEvent>(&self) -> bool {
        self.name == E::NAME
    }

    /// Decode the payload as `E`'s payload type.
    pub fn payload_as<E: XEvent>(&self) -> anyhow::Result<E::Payload> {
        anyhow::ensure!(
            self.is::<E>(),
            "expected `{}` payload, got `{}` event",
            E::NAME,
            self.name
        );
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
