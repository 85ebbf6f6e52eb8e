use std::sync::Arc;

use feedsift_core::Policy;
use tokio::sync::watch;

/// Holds the current filtering policy and notifies subscribers of updates.
///
/// Readers take an `Arc<Policy>` snapshot; an update never mutates a
/// snapshot that an evaluation is already using.
pub struct PolicyStore {
    tx: watch::Sender<Arc<Policy>>,
}

impl PolicyStore {
    pub fn new(policy: Policy) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(policy));
        Self { tx }
    }

    /// Snapshot of the current policy.
    pub fn get_policy(&self) -> Arc<Policy> {
        self.tx.borrow().clone()
    }

    /// Replace the policy. Evaluations already running keep their snapshot.
    pub fn update(&self, policy: Policy) {
        let previous = self.tx.send_replace(Arc::new(policy));
        let current = self.get_policy();
        tracing::info!(
            include = ?current.include_beliefs,
            exclude = ?current.exclude_beliefs,
            min_sentiment = current.min_sentiment,
            criteria_changed = !previous.same_criteria(&current),
            "Policy updated"
        );
    }

    /// Receiver that observes every update.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Policy>> {
        self.tx.subscribe()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}
