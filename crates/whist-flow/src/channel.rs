//! Shared flow outputs and the traced `flow` wrapper.
//!
//! A [`Channel`] has exactly one upstream pump no matter how many subscribers
//! it has. Subscribers see values sent after they subscribed; the channel
//! completes for everyone when its upstream ends.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, error, warn};

use crate::errors::{FlowError, panic_message};

/// Buffered values per subscriber before it starts lagging.
pub const CAPACITY: usize = 64;

struct Shared<T> {
    label: String,
    tx: Mutex<Option<broadcast::Sender<T>>>,
}

/// A shared, multicast stream of flow output values.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("label", &self.shared.label)
            .field("open", &self.shared.tx.lock().is_some())
            .finish()
    }
}

/// Write half of a [`Channel`]. Dropping it completes the channel.
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    /// Send to every current subscriber. Returns how many received it.
    pub fn send(&self, value: T) -> usize {
        self.shared
            .tx
            .lock()
            .as_ref()
            .map_or(0, |tx| tx.send(value).unwrap_or(0))
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        drop(self.shared.tx.lock().take());
    }
}

impl<T: Clone + Send + 'static> Channel<T> {
    /// A channel fed by hand through the returned [`Publisher`].
    pub fn pair(label: impl Into<String>) -> (Publisher<T>, Self) {
        let (tx, _) = broadcast::channel(CAPACITY);
        let shared = Arc::new(Shared {
            label: label.into(),
            tx: Mutex::new(Some(tx)),
        });
        (
            Publisher {
                shared: Arc::clone(&shared),
            },
            Self { shared },
        )
    }

    /// A channel pumped from `source` by one background task.
    pub fn from_stream<S>(label: impl Into<String>, source: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let (publisher, channel) = Self::pair(label);
        drop(tokio::spawn(async move {
            let mut source = std::pin::pin!(source);
            while let Some(value) = source.next().await {
                let _ = publisher.send(value);
            }
        }));
        channel
    }

    /// A channel that emits `value` once and completes.
    pub fn once(label: impl Into<String>, value: T) -> Self {
        Self::from_stream(label, stream::once(async move { value }))
    }

    /// A channel that is already complete.
    pub fn closed(label: impl Into<String>) -> Self {
        let (publisher, channel) = Self::pair(label);
        drop(publisher);
        channel
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Whether the upstream has ended.
    pub fn is_complete(&self) -> bool {
        self.shared.tx.lock().is_none()
    }

    /// Subscribe to values sent from now on.
    pub fn subscribe(&self) -> BoxStream<'static, T> {
        let Some(rx) = self.shared.tx.lock().as_ref().map(broadcast::Sender::subscribe) else {
            return stream::empty().boxed();
        };
        let label = self.shared.label.clone();
        BroadcastStream::new(rx)
            .filter_map(move |item| {
                let value = match item {
                    Ok(value) => Some(value),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(channel = %label, skipped, "subscriber lagged, values dropped");
                        None
                    }
                };
                std::future::ready(value)
            })
            .boxed()
    }

    /// A derived channel with `f` applied to every value.
    pub fn map<U, F>(&self, label: impl Into<String>, f: F) -> Channel<U>
    where
        U: Clone + Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        Channel::from_stream(label, self.subscribe().map(f))
    }

    /// Merge several channels into one, completing when all of them have.
    pub fn merge(label: impl Into<String>, channels: &[Self]) -> Self {
        let sources: Vec<_> = channels.iter().map(Self::subscribe).collect();
        Self::from_stream(label, stream::select_all(sources))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Flow
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing context for one named flow.
///
/// Every channel emission is logged as `name.channel` with the time elapsed
/// since the flow last received input.
#[derive(Clone)]
pub struct Flow {
    name: Arc<str>,
    triggered_at: Arc<Mutex<Option<Instant>>>,
}

impl Flow {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            triggered_at: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn elapsed_ms(&self) -> u64 {
        self.triggered_at.lock().map_or(0, |at| {
            u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)
        })
    }

    /// Restart the elapsed clock on every input value.
    pub fn trace_input<S, T>(&self, input: S) -> impl Stream<Item = T> + Send + 'static
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let ctx = self.clone();
        input.inspect(move |_| {
            *ctx.triggered_at.lock() = Some(Instant::now());
            debug!(flow = %ctx.name, "triggered");
        })
    }

    /// Publish `source` as the traced channel `name.channel`.
    pub fn channel<S, T>(&self, channel: &str, source: S) -> Channel<T>
    where
        S: Stream<Item = T> + Send + 'static,
        T: Clone + Send + 'static,
    {
        let ctx = self.clone();
        let label = format!("{}.{channel}", self.name);
        let traced_label = label.clone();
        Channel::from_stream(
            label,
            source.inspect(move |_| {
                debug!(flow = %traced_label, elapsed_ms = ctx.elapsed_ms(), "emit");
            }),
        )
    }

    /// Trace an existing channel as `name.channel`.
    pub fn trace<T: Clone + Send + 'static>(&self, channel: &str, source: &Channel<T>) -> Channel<T> {
        self.channel(channel, source.subscribe())
    }
}

/// The named output channels of a flow.
pub trait FlowOutputs: Sized {
    /// Outputs for a flow that could not be built: every channel completes
    /// and the failure channel carries `error`.
    fn faulted(flow: &Flow, error: FlowError) -> Self;
}

/// Run a flow body with tracing and fault isolation.
///
/// `body` wires its output channels from the traced input. If it returns an
/// error or panics, the failure surfaces through [`FlowOutputs::faulted`]
/// instead of unwinding into the caller.
pub fn flow<I, O, F>(name: &str, input: BoxStream<'static, I>, body: F) -> O
where
    I: Send + 'static,
    O: FlowOutputs,
    F: FnOnce(&Flow, BoxStream<'static, I>) -> Result<O, FlowError>,
{
    let ctx = Flow::new(name);
    let traced = ctx.trace_input(input).boxed();
    match catch_unwind(AssertUnwindSafe(|| body(&ctx, traced))) {
        Ok(Ok(outputs)) => outputs,
        Ok(Err(err)) => {
            error!(flow = name, error = %err, "flow failed to build");
            O::faulted(&ctx, err)
        }
        Err(panic) => {
            let message = panic_message(&panic);
            error!(flow = name, panic = %message, "flow panicked while building");
            O::faulted(
                &ctx,
                FlowError::Panicked {
                    flow: name.to_string(),
                    message,
                },
            )
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    struct Outputs {
        success: Channel<u32>,
        failure: Channel<FlowError>,
    }

    impl FlowOutputs for Outputs {
        fn faulted(flow: &Flow, error: FlowError) -> Self {
            Self {
                success: Channel::closed(format!("{}.success", flow.name())),
                failure: Channel::once(format!("{}.failure", flow.name()), error),
            }
        }
    }

    #[tokio::test]
    async fn single_upstream_for_many_subscribers() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulls);
        let channel = Channel::from_stream(
            "numbers",
            stream::iter(1..=3).inspect(move |_| {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let a = channel.subscribe();
        let b = channel.subscribe();

        let (a, b): (Vec<i32>, Vec<i32>) = futures::join!(a.collect(), b.collect());
        assert_eq!(a, vec![1, 2, 3]);
        assert_eq!(b, vec![1, 2, 3]);
        assert_eq!(pulls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dropping_publisher_completes_channel() {
        let (publisher, channel) = Channel::pair("manual");
        let sub = channel.subscribe();
        assert_eq!(publisher.send(7), 1);
        drop(publisher);
        assert!(channel.is_complete());
        assert_eq!(sub.collect::<Vec<_>>().await, vec![7]);
    }

    #[tokio::test]
    async fn subscribing_after_completion_is_empty() {
        let channel: Channel<u8> = Channel::closed("done");
        assert!(channel.subscribe().collect::<Vec<_>>().await.is_empty());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_dropped() {
        let (publisher, _channel) = Channel::<u8>::pair("nobody");
        assert_eq!(publisher.send(1), 0);
    }

    #[tokio::test]
    async fn map_and_merge() {
        let (left_tx, left) = Channel::pair("left");
        let (right_tx, right) = Channel::pair("right");
        let merged = Channel::merge("both", &[left.map("left.x10", |v: u32| v * 10), right]);
        let sub = merged.subscribe();

        tokio::task::yield_now().await;
        let _ = left_tx.send(1);
        let _ = right_tx.send(2);
        drop(left_tx);
        drop(right_tx);

        let mut values = sub.collect::<Vec<_>>().await;
        values.sort_unstable();
        assert_eq!(values, vec![2, 10]);
    }

    #[tokio::test]
    async fn flow_traces_channels() {
        let outputs: Outputs = flow("double", stream::iter(vec![1u32, 2]).boxed(), |ctx, input| {
            Ok(Outputs {
                success: ctx.channel("success", input.map(|v| v * 2)),
                failure: Channel::closed("double.failure"),
            })
        });
        assert_eq!(outputs.success.label(), "double.success");
        let values: Vec<u32> = outputs.success.subscribe().collect().await;
        assert_eq!(values, vec![2, 4]);
    }

    #[tokio::test]
    async fn flow_error_faults_every_channel() {
        let outputs: Outputs = flow("broken", stream::empty::<u32>().boxed(), |ctx, _| {
            Err(FlowError::build(ctx.name(), "missing dependency"))
        });
        let success = outputs.success.subscribe();
        let failure = outputs.failure.subscribe();

        assert!(success.collect::<Vec<_>>().await.is_empty());
        let faults: Vec<FlowError> = failure.collect().await;
        assert_eq!(faults, vec![FlowError::build("broken", "missing dependency")]);
    }

    #[tokio::test]
    async fn flow_panic_is_contained() {
        let outputs: Outputs = flow("panicky", stream::empty::<u32>().boxed(), |_, _| {
            panic!("wiring exploded")
        });
        let faults: Vec<FlowError> = outputs.failure.subscribe().collect().await;
        assert_eq!(faults.len(), 1);
        assert_matches!(
            &faults[0],
            FlowError::Panicked { flow, message } if flow == "panicky" && message == "wiring exploded"
        );
    }
}
