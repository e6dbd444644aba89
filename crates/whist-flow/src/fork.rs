//! Partition one source into labelled channels.

use futures::{Stream, StreamExt};
use tracing::{trace, warn};

use crate::channel::Channel;

/// Gate predicate for [`fork`].
pub type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Split `source` into one channel per gate.
///
/// Each value goes to the first gate whose predicate accepts it. Overlapping
/// gates are logged; values no gate accepts are dropped. A single dispatcher
/// task reads `source`, so per-gate order follows source order.
pub fn fork<T, S, const N: usize>(
    label: &str,
    source: S,
    gates: [(&'static str, Predicate<T>); N],
) -> [Channel<T>; N]
where
    T: Clone + Send + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    let mut publishers = Vec::with_capacity(N);
    let channels: [Channel<T>; N] = std::array::from_fn(|i| {
        let (publisher, channel) = Channel::pair(format!("{label}.{}", gates[i].0));
        publishers.push(publisher);
        channel
    });

    let label = label.to_string();
    drop(tokio::spawn(async move {
        let mut source = std::pin::pin!(source);
        while let Some(value) = source.next().await {
            let (first, second) = {
                let mut matches = gates
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, accepts))| accepts(&value))
                    .map(|(i, _)| i);
                (matches.next(), matches.next())
            };

            let Some(first) = first else {
                trace!(fork = %label, "no gate matched, value dropped");
                continue;
            };
            if let Some(second) = second {
                warn!(
                    fork = %label,
                    chosen = gates[first].0,
                    also = gates[second].0,
                    "overlapping fork gates, first match wins"
                );
            }
            let _ = publishers[first].send(value);
        }
    }));

    channels
}

/// Split a stream of results into `success` and `failure` channels.
///
/// Exclusive by construction: every item lands on exactly one side.
pub fn split_result<T, E, S>(label: &str, source: S) -> (Channel<T>, Channel<E>)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    S: Stream<Item = Result<T, E>> + Send + 'static,
{
    let (ok_tx, success) = Channel::pair(format!("{label}.success"));
    let (err_tx, failure) = Channel::pair(format!("{label}.failure"));
    drop(tokio::spawn(async move {
        let mut source = std::pin::pin!(source);
        while let Some(item) = source.next().await {
            let _ = match item {
                Ok(value) => ok_tx.send(value),
                Err(err) => err_tx.send(err),
            };
        }
    }));
    (success, failure)
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[tokio::test]
    async fn partitions_by_predicate() {
        let [even, odd] = fork(
            "parity",
            stream::iter(1..=6),
            [
                ("even", Box::new(|v: &i32| v % 2 == 0) as Predicate<i32>),
                ("odd", Box::new(|v: &i32| v % 2 != 0) as Predicate<i32>),
            ],
        );
        assert_eq!(even.label(), "parity.even");
        let (even, odd) = (even.subscribe(), odd.subscribe());
        let (even, odd): (Vec<i32>, Vec<i32>) = futures::join!(even.collect(), odd.collect());
        assert_eq!(even, vec![2, 4, 6]);
        assert_eq!(odd, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn overlapping_gates_first_match_wins() {
        let [small, any] = fork(
            "overlap",
            stream::iter(vec![1, 50]),
            [
                ("small", Box::new(|v: &i32| *v < 10) as Predicate<i32>),
                ("any", Box::new(|_: &i32| true) as Predicate<i32>),
            ],
        );
        let (small, any) = (small.subscribe(), any.subscribe());
        let (small, any): (Vec<i32>, Vec<i32>) = futures::join!(small.collect(), any.collect());
        assert_eq!(small, vec![1]);
        assert_eq!(any, vec![50]);
    }

    #[tokio::test]
    async fn unmatched_values_are_dropped() {
        let [big] = fork(
            "filter",
            stream::iter(vec![1, 200]),
            [("big", Box::new(|v: &i32| *v > 100) as Predicate<i32>)],
        );
        let values: Vec<i32> = big.subscribe().collect().await;
        assert_eq!(values, vec![200]);
    }

    #[tokio::test]
    async fn split_result_never_emits_both() {
        let items: Vec<Result<u8, String>> = vec![Ok(1), Err("bad".into()), Ok(2)];
        let (success, failure) = split_result("stage", stream::iter(items));
        assert_eq!(failure.label(), "stage.failure");
        let (ok, err) = (success.subscribe(), failure.subscribe());
        let (ok, err): (Vec<u8>, Vec<String>) = futures::join!(ok.collect(), err.collect());
        assert_eq!(ok, vec![1, 2]);
        assert_eq!(err, vec!["bad".to_string()]);
    }
}
