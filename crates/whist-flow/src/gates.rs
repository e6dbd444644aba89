//! Signal gates: hold a stream back until another stream has fired.

use std::collections::VecDeque;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::bus::TriggerBus;

enum Step<T> {
    Value(Option<T>),
    Signal(bool),
}

/// Re-emit `source` once `signal` has fired at least once.
///
/// Values that arrive before the signal are buffered in order and released
/// when it fires; afterwards values pass straight through. If `signal` ends
/// without firing, buffered values are dropped and the stream ends.
pub fn wait_for_signal<T, U, S, G>(source: S, signal: G) -> BoxStream<'static, T>
where
    T: Send + 'static,
    U: Send + 'static,
    S: Stream<Item = T> + Send + 'static,
    G: Stream<Item = U> + Send + 'static,
{
    async_stream::stream! {
        let mut source = Box::pin(source);
        let mut signal = Box::pin(signal);
        let mut buffered = VecDeque::new();
        let mut source_done = false;

        loop {
            let step = tokio::select! {
                biased;
                fired = signal.next() => Step::Signal(fired.is_some()),
                value = source.next(), if !source_done => Step::Value(value),
            };
            match step {
                Step::Signal(true) => break,
                Step::Signal(false) => return,
                Step::Value(Some(value)) => buffered.push_back(value),
                Step::Value(None) => source_done = true,
            }
        }

        for value in buffered {
            yield value;
        }
        if !source_done {
            while let Some(value) = source.next().await {
                yield value;
            }
        }
    }
    .boxed()
}

/// Emit the latest `source` value once per `signal` tick.
///
/// Ticks before any source value emit nothing. Ends when `signal` ends.
pub fn emit_on_signal<T, U, S, G>(source: S, signal: G) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
    S: Stream<Item = T> + Send + 'static,
    G: Stream<Item = U> + Send + 'static,
{
    async_stream::stream! {
        let mut source = Box::pin(source);
        let mut signal = Box::pin(signal);
        let mut latest: Option<T> = None;
        let mut source_done = false;

        loop {
            let step = tokio::select! {
                biased;
                value = source.next(), if !source_done => Step::Value(value),
                tick = signal.next() => Step::Signal(tick.is_some()),
            };
            match step {
                Step::Value(Some(value)) => latest = Some(value),
                Step::Value(None) => source_done = true,
                Step::Signal(true) => {
                    if let Some(value) = latest.clone() {
                        yield value;
                    }
                }
                Step::Signal(false) => break,
            }
        }
    }
    .boxed()
}

/// Hold every `source` value until the app is ready and not suspended.
pub fn with_app_ready<T, S>(bus: &TriggerBus, source: S) -> BoxStream<'static, T>
where
    T: Send + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    let mut lifecycle = bus.lifecycle();
    async_stream::stream! {
        let mut source = Box::pin(source);
        while let Some(value) = source.next().await {
            if lifecycle.wait_for(|l| l.is_active()).await.is_err() {
                break;
            }
            yield value;
        }
    }
    .boxed()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
