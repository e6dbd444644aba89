//! Keyed join of two streams.

use std::collections::VecDeque;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::debug;

/// Unmatched values kept per side before the oldest is evicted.
pub const MAX_PENDING: usize = 16;

enum Side<L, R> {
    Left(Option<L>),
    Right(Option<R>),
    Done,
}

fn take_match<K: PartialEq, V>(pending: &mut VecDeque<(K, V)>, key: &K) -> Option<V> {
    let pos = pending.iter().position(|(k, _)| k == key)?;
    pending.remove(pos).map(|(_, v)| v)
}

fn hold<K, V>(pending: &mut VecDeque<(K, V)>, key: K, value: V, side: &'static str) {
    if pending.len() == MAX_PENDING {
        let _ = pending.pop_front();
        debug!(side, "join buffer full, evicted oldest unmatched value");
    }
    pending.push_back((key, value));
}

/// Pair values from `left` and `right` that share a key.
///
/// Each key is matched at most once, in the order matches complete. The
/// stream ends when one side has finished and nothing it left behind can
/// still match.
pub fn join_by_key<L, R, K, SL, SR, FL, FR>(
    left: SL,
    right: SR,
    left_key: FL,
    right_key: FR,
) -> BoxStream<'static, (L, R)>
where
    L: Send + 'static,
    R: Send + 'static,
    K: PartialEq + Send + 'static,
    SL: Stream<Item = L> + Send + 'static,
    SR: Stream<Item = R> + Send + 'static,
    FL: Fn(&L) -> K + Send + 'static,
    FR: Fn(&R) -> K + Send + 'static,
{
    async_stream::stream! {
        let mut left = Box::pin(left);
        let mut right = Box::pin(right);
        let mut pending_left: VecDeque<(K, L)> = VecDeque::new();
        let mut pending_right: VecDeque<(K, R)> = VecDeque::new();
        let mut left_done = false;
        let mut right_done = false;

        loop {
            if (left_done && pending_left.is_empty()) || (right_done && pending_right.is_empty()) {
                break;
            }
            let side = tokio::select! {
                biased;
                l = left.next(), if !left_done => Side::Left(l),
                r = right.next(), if !right_done => Side::Right(r),
                else => Side::Done,
            };
            match side {
                Side::Left(Some(l)) => {
                    let key = left_key(&l);
                    match take_match(&mut pending_right, &key) {
                        Some(r) => yield (l, r),
                        None => hold(&mut pending_left, key, l, "left"),
                    }
                }
                Side::Right(Some(r)) => {
                    let key = right_key(&r);
                    match take_match(&mut pending_left, &key) {
                        Some(l) => yield (l, r),
                        None => hold(&mut pending_right, key, r, "right"),
                    }
                }
                Side::Left(None) => left_done = true,
                Side::Right(None) => right_done = true,
                Side::Done => break,
            }
        }
    }
    .boxed()
}
