//! Trigger bus: the one shared, multi-writer, multi-reader message channel.
//!
//! Subscription is by exact [`TriggerName`]. Delivery is multicast and lossy
//! for late subscribers; [`TriggerBus::from_trigger_replay`] is the buffered
//! variant for startup state.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, error, trace, warn};
use whist_core::{Trigger, TriggerName};

use crate::channel::Channel;
use crate::errors::panic_message;

const BUS_CAPACITY: usize = 256;

tokio::task_local! {
    /// Trigger currently being handled by an [`TriggerBus::on`] handler.
    static HANDLING: TriggerName;
}

/// Application lifecycle as observed on the bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Lifecycle {
    /// `AppReady` has fired.
    pub ready: bool,
    pub suspended: bool,
}

impl Lifecycle {
    pub fn is_active(self) -> bool {
        self.ready && !self.suspended
    }
}

struct Inner {
    tx: broadcast::Sender<Trigger>,
    latest: Mutex<HashMap<TriggerName, Value>>,
    lifecycle: watch::Sender<Lifecycle>,
}

/// Cloneable handle to a trigger bus. Create one per application or test.
#[derive(Clone)]
pub struct TriggerBus {
    inner: Arc<Inner>,
}

impl Default for TriggerBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        let (lifecycle, _) = watch::channel(Lifecycle::default());
        Self {
            inner: Arc::new(Inner {
                tx,
                latest: Mutex::new(HashMap::new()),
                lifecycle,
            }),
        }
    }

    // ── Publishing ──────────────────────────────────────────────────

    /// Publish a trigger to every current subscriber. Never blocks.
    ///
    /// A handler republishing the trigger it is currently handling is dropped,
    /// so a handler cannot feed itself.
    pub fn publish(&self, trigger: Trigger) {
        let reentrant = HANDLING.try_with(|name| *name == trigger.name).unwrap_or(false);
        if reentrant {
            warn!(trigger = %trigger.name, "handler republished its own trigger, dropped");
            return;
        }

        self.track_lifecycle(trigger.name);

        // Held across send so replay subscribers never miss or double-see a value.
        let mut latest = self.inner.latest.lock();
        let _ = latest.insert(trigger.name, trigger.payload.clone());
        let name = trigger.name;
        let receivers = self.inner.tx.send(trigger).unwrap_or(0);
        trace!(trigger = %name, receivers, "published");
    }

    /// Encode `payload` and publish it under `name`.
    pub fn emit<T: Serialize>(&self, name: TriggerName, payload: &T) -> Result<(), serde_json::Error> {
        self.publish(Trigger::encode(name, payload)?);
        Ok(())
    }

    /// Publish a payload-less trigger.
    pub fn signal(&self, name: TriggerName) {
        self.publish(Trigger::signal(name));
    }

    /// Republish every value of `channel` as `name`, returning the channel unchanged.
    pub fn create_trigger<T>(&self, name: TriggerName, channel: Channel<T>) -> Channel<T>
    where
        T: Serialize + Clone + Send + 'static,
    {
        let mut values = channel.subscribe();
        let bus = self.clone();
        drop(tokio::spawn(async move {
            while let Some(value) = values.next().await {
                if let Err(err) = bus.emit(name, &value) {
                    error!(trigger = %name, error = %err, "failed to encode trigger payload");
                }
            }
        }));
        channel
    }

    fn track_lifecycle(&self, name: TriggerName) {
        let update: fn(&mut Lifecycle) = match name {
            TriggerName::AppReady => |l| {
                l.ready = true;
                l.suspended = false;
            },
            TriggerName::AppSuspended => |l| l.suspended = true,
            TriggerName::AppResumed => |l| l.suspended = false,
            _ => return,
        };
        self.inner.lifecycle.send_modify(update);
        debug!(trigger = %name, lifecycle = ?*self.inner.lifecycle.borrow(), "lifecycle changed");
    }

    // ── Subscribing ─────────────────────────────────────────────────

    /// Every trigger published from now on.
    pub fn subscribe_all(&self) -> BoxStream<'static, Trigger> {
        Self::live(self.inner.tx.subscribe())
    }

    fn live(rx: broadcast::Receiver<Trigger>) -> BoxStream<'static, Trigger> {
        BroadcastStream::new(rx)
            .filter_map(|item| {
                std::future::ready(match item {
                    Ok(trigger) => Some(trigger),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "bus subscriber lagged, triggers dropped");
                        None
                    }
                })
            })
            .boxed()
    }

    /// Payloads of every `name` trigger published from now on.
    pub fn from_trigger(&self, name: TriggerName) -> BoxStream<'static, Value> {
        self.subscribe_all()
            .filter_map(move |t| std::future::ready((t.name == name).then_some(t.payload)))
            .boxed()
    }

    /// Like [`from_trigger`](Self::from_trigger), decoding payloads as `T`.
    /// Payloads that fail to decode are logged and skipped.
    pub fn from_trigger_as<T>(&self, name: TriggerName) -> BoxStream<'static, T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.from_trigger(name)
            .filter_map(move |payload| {
                std::future::ready(match serde_json::from_value(payload) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(trigger = %name, error = %err, "undecodable trigger payload, skipped");
                        None
                    }
                })
            })
            .boxed()
    }

    /// The most recent `name` payload, if any, followed by live traffic.
    pub fn from_trigger_replay(&self, name: TriggerName) -> BoxStream<'static, Value> {
        let (last, rx) = {
            let latest = self.inner.latest.lock();
            (latest.get(&name).cloned(), self.inner.tx.subscribe())
        };
        let live = Self::live(rx)
            .filter_map(move |t| std::future::ready((t.name == name).then_some(t.payload)));
        stream::iter(last).chain(live).boxed()
    }

    /// The most recent `name` payload.
    pub fn latest(&self, name: TriggerName) -> Option<Value> {
        self.inner.latest.lock().get(&name).cloned()
    }

    /// Watch the application lifecycle.
    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.inner.lifecycle.subscribe()
    }

    /// Run `handler` for every `name` payload on a background task.
    ///
    /// A panicking handler is logged and keeps receiving; other subscribers
    /// are unaffected.
    pub fn on<F>(&self, name: TriggerName, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(Value) + Send + 'static,
    {
        let mut payloads = self.from_trigger(name);
        tokio::spawn(async move {
            while let Some(payload) = payloads.next().await {
                let outcome =
                    HANDLING.sync_scope(name, || catch_unwind(AssertUnwindSafe(|| handler(payload))));
                if let Err(panic) = outcome {
                    error!(trigger = %name, panic = %panic_message(&panic), "trigger handler panicked");
                }
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
