//! Launch-attempt serialization.
//!
//! Only the most recent attempt is live. Starting a new one cancels the
//! previous attempt's token, which stops its retry loop and in-flight
//! requests; stages drop values whose attempt is no longer current.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use whist_core::AttemptId;

#[derive(Clone, Debug)]
struct Live {
    id: AttemptId,
    token: CancellationToken,
}

/// Tracks the single in-flight launch attempt.
#[derive(Clone, Debug)]
pub struct AttemptTracker {
    root: CancellationToken,
    current: Arc<Mutex<Option<Live>>>,
}

impl Default for AttemptTracker {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl AttemptTracker {
    /// Attempt tokens are children of `root`; cancelling it ends every attempt.
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Start a new attempt, superseding the previous one.
    pub fn begin(&self) -> (AttemptId, CancellationToken) {
        let live = Live {
            id: AttemptId::new(),
            token: self.root.child_token(),
        };
        let previous = self.current.lock().replace(live.clone());
        if let Some(previous) = previous {
            info!(superseded = %previous.id, attempt = %live.id, "launch attempt superseded");
            previous.token.cancel();
        }
        (live.id, live.token)
    }

    pub fn current(&self) -> Option<AttemptId> {
        self.current.lock().as_ref().map(|l| l.id.clone())
    }

    pub fn is_current(&self, id: &AttemptId) -> bool {
        self.current.lock().as_ref().is_some_and(|l| l.id == *id)
    }

    /// The cancellation token of `id`, if it is still the live attempt.
    pub fn token_for(&self, id: &AttemptId) -> Option<CancellationToken> {
        self.current
            .lock()
            .as_ref()
            .filter(|l| l.id == *id)
            .map(|l| l.token.clone())
    }

    /// Cancel the live attempt without starting another.
    pub fn cancel_current(&self) {
        if let Some(live) = self.current.lock().take() {
            live.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_supersedes_previous_attempt() {
        let tracker = AttemptTracker::default();
        let (first, first_token) = tracker.begin();
        assert!(tracker.is_current(&first));

        let (second, second_token) = tracker.begin();
        assert!(first_token.is_cancelled());
        assert!(!second_token.is_cancelled());
        assert!(!tracker.is_current(&first));
        assert!(tracker.is_current(&second));
        assert_eq!(tracker.current(), Some(second));
    }

    #[test]
    fn token_only_for_live_attempt() {
        let tracker = AttemptTracker::default();
        let (stale, _) = tracker.begin();
        let (live, _) = tracker.begin();
        assert!(tracker.token_for(&stale).is_none());
        assert!(tracker.token_for(&live).is_some());
    }

    #[test]
    fn root_cancellation_reaches_attempts() {
        let root = CancellationToken::new();
        let tracker = AttemptTracker::new(root.clone());
        let (_, token) = tracker.begin();
        root.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_current_clears_attempt() {
        let tracker = AttemptTracker::default();
        let (id, token) = tracker.begin();
        tracker.cancel_current();
        assert!(token.is_cancelled());
        assert!(!tracker.is_current(&id));
        assert!(tracker.current().is_none());
    }
}
