//! Synchronous publish/subscribe hub keyed by event name.
//!
//! `emit` calls every current subscriber of the event, in subscription
//! order, before returning. The subscriber list is snapshotted first, so a
//! listener may emit further events or (un)subscribe without deadlocking,
//! and unsubscribing never affects an emission already in flight.
//!
//! There is no cycle detection: a listener that re-emits its own event
//! forever is a caller bug.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::event::{BusEvent, WireMetadata, XEvent};

pub type Listener = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

/// Cloneable handle to a shared bus.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

struct Subscriber {
    id: u64,
    listener: Listener,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscriber>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify every subscriber of `event`. The first listener error stops
    /// delivery and is returned as-is.
    pub fn emit(&self, event: &str, payload: Value, metadata: WireMetadata) -> anyhow::Result<()> {
        let listeners: Vec<Listener> = self
            .inner
            .lock()
            .get(event)
            .map(|subs| subs.iter().map(|s| s.listener.clone()).collect())
            .unwrap_or_default();

        tracing::trace!(event, subscribers = listeners.len(), "Emitting");
        if listeners.is_empty() {
            return Ok(());
        }

        let event = BusEvent {
            name: event.to_string(),
            payload,
            metadata,
        };
        for listener in listeners {
            listener(&event)?;
        }
        Ok(())
    }

    /// Emit a registered event with its typed payload.
    pub fn emit_event<E: XEvent>(
        &self,
        payload: &E::Payload,
        metadata: WireMetadata,
    ) -> anyhow::Result<()> {
        self.emit(E::NAME, serde_json::to_value(payload)?, metadata)
    }

    /// Stream of every future emission of `event`.
    pub fn on(&self, event: impl Into<String>) -> EventStream {
        EventStream {
            bus: self.clone(),
            event: event.into(),
        }
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.inner.lock().get(event).map_or(0, Vec::len)
    }

    fn subscribe(&self, event: &str, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Subscriber { id, listener });
        Subscription {
            bus: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        }
    }
}

// ---------------------------------------------------------------------------
// Streams and subscriptions
// ---------------------------------------------------------------------------

/// Multicast, restartable view of one event. Each `subscribe` call adds an
/// independent subscriber; the stream itself never completes.
#[derive(Clone)]
pub struct EventStream {
    bus: Bus,
    event: String,
}

impl EventStream {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(&self.event, Arc::new(listener))
    }

    /// Bridge into an async stream. Dropping the returned stream unsubscribes.
    pub fn into_stream(self) -> BusStream {
        let (tx, rx) = mpsc::unbounded();
        let subscription = self.subscribe(move |event| {
            // A closed receiver means the consumer went away; nothing to do.
            let _ = tx.unbounded_send(event.clone());
            Ok(())
        });
        BusStream {
            subscription: Some(subscription),
            rx,
        }
    }
}

/// Handle to one subscriber. Dropping it keeps the subscriber attached;
/// call [`Subscription::unsubscribe`] to detach.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    event: String,
    id: u64,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_active(&self) -> bool {
        self.bus.upgrade().is_some_and(|inner| {
            inner
                .lock()
                .get(&self.event)
                .is_some_and(|subs| subs.iter().any(|s| s.id == self.id))
        })
    }

    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut subscribers = inner.lock();
            if let Some(subs) = subscribers.get_mut(&self.event) {
                subs.retain(|s| s.id != self.id);
                if subs.is_empty() {
                    subscribers.remove(&self.event);
                }
            }
        }
    }
}

/// Async view over an event, see [`EventStream::into_stream`].
pub struct BusStream {
    subscription: Option<Subscription>,
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

impl Stream for BusStream {
    type Item = BusEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<BusEvent>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl Drop for BusStream {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ModuleRegistered;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Listener) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |tag: &str| -> Listener {
            let sink = sink.clone();
            let tag = tag.to_string();
            Arc::new(move |event: &BusEvent| {
                sink.lock()
                    .unwrap()
                    .push(format!("{tag}:{}:{}", event.name, event.payload));
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn emit_without_subscribers_is_a_no_op() {
        let bus = Bus::new();
        bus.emit("UserTyped", json!("a"), WireMetadata::default())
            .unwrap();
        assert_eq!(bus.subscriber_count("UserTyped"), 0);
    }

    #[test]
    fn subscribers_run_in_subscription_order() {
        let bus = Bus::new();
        let (log, make) = recorder();
        let stream = bus.on("UserTyped");
        let first = make("first");
        let second = make("second");
        stream.subscribe(move |e| first(e));
        stream.subscribe(move |e| second(e));

        bus.emit("UserTyped", json!("a"), WireMetadata::default())
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:UserTyped:\"a\"", "second:UserTyped:\"a\""]
        );
        assert_eq!(bus.subscriber_count("UserTyped"), 2);
    }

    #[test]
    fn unsubscribe_detaches_and_stream_can_restart() {
        let bus = Bus::new();
        let (log, make) = recorder();
        let stream = bus.on("UserTyped");
        let listener = make("l");
        let sub = stream.subscribe(move |e| listener(e));
        assert!(sub.is_active());
        sub.unsubscribe();

        bus.emit("UserTyped", json!(1), WireMetadata::default())
            .unwrap();
        assert!(log.lock().unwrap().is_empty());

        let listener = make("again");
        stream.subscribe(move |e| listener(e));
        bus.emit("UserTyped", json!(2), WireMetadata::default())
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["again:UserTyped:2"]);
    }

    #[test]
    fn listeners_can_cascade_emissions() {
        let bus = Bus::new();
        let (log, make) = recorder();
        let relay = bus.clone();
        bus.on("UserAcceptedAQuery").subscribe(move |event| {
            relay.emit("SearchRequestChanged", event.payload.clone(), WireMetadata::default())
        });
        let listener = make("search");
        bus.on("SearchRequestChanged").subscribe(move |e| listener(e));

        bus.emit("UserAcceptedAQuery", json!("lamp"), WireMetadata::default())
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["search:SearchRequestChanged:\"lamp\""]);
    }

    #[test]
    fn unsubscribing_mid_emission_does_not_cut_the_emission_short() {
        let bus = Bus::new();
        let (log, make) = recorder();
        let victim: Arc<StdMutex<Option<Subscription>>> = Arc::new(StdMutex::new(None));

        let slot = victim.clone();
        bus.on("E").subscribe(move |_| {
            if let Some(sub) = slot.lock().unwrap().take() {
                sub.unsubscribe();
            }
            Ok(())
        });
        let listener = make("second");
        *victim.lock().unwrap() = Some(bus.on("E").subscribe(move |e| listener(e)));

        bus.emit("E", json!(1), WireMetadata::default()).unwrap();
        bus.emit("E", json!(2), WireMetadata::default()).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["second:E:1"]);
    }

    #[test]
    fn listener_errors_propagate_and_stop_delivery() {
        let bus = Bus::new();
        let (log, make) = recorder();
        bus.on("E").subscribe(|_| anyhow::bail!("wire failed"));
        let listener = make("after");
        bus.on("E").subscribe(move |e| listener(e));

        let err = bus.emit("E", json!(1), WireMetadata::default()).unwrap_err();
        assert_eq!(err.to_string(), "wire failed");
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn typed_emission_serializes_the_payload() {
        let bus = Bus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        bus.on(ModuleRegistered::NAME).subscribe(move |event| {
            sink.lock()
                .unwrap()
                .push(event.payload_as::<ModuleRegistered>()?);
            Ok(())
        });

        bus.emit_event::<ModuleRegistered>(&"searchBox".to_string(), WireMetadata::default())
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["searchBox".to_string()]);
    }

    #[tokio::test]
    async fn async_stream_receives_emissions_and_unsubscribes_on_drop() {
        let bus = Bus::new();
        let mut stream = bus.on("UserTyped").into_stream();
        bus.emit("UserTyped", json!("a"), WireMetadata::from_module("searchBox"))
            .unwrap();

        let event = stream.next().await.unwrap();
        assert_eq!(event.payload, json!("a"));
        assert_eq!(event.metadata.module_name.as_deref(), Some("searchBox"));

        drop(stream);
        assert_eq!(bus.subscriber_count("UserTyped"), 0);
    }
}
