use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use feedsift_core::{
    ClassificationError, ClassificationResult, ContentItem, Policy, Verdict, VerdictBasis, decide,
};
use lru::LruCache;
use tokio::sync::watch;

use crate::cache::{Reservation, ResultCache, Settlement};
use crate::classifier::Classifier;
use crate::metrics::PipelineMetrics;
use crate::policy_store::PolicyStore;

/// Attempts to settle who classifies a fingerprint before failing open.
/// Each round ends in a cache hit, a reservation, or a subscription unless
/// another evaluation finishes in between.
const MAX_CLAIM_ROUNDS: usize = 4;

/// Drives content items through cache → classifier → decision engine.
///
/// For each item the coordinator:
/// 1. Returns the remembered verdict if the item id was already processed
/// 2. Skips blank items without calling the classifier
/// 3. Decides from a cached classification when there is one
/// 4. Otherwise reserves the fingerprint and classifies, or waits for the
///    evaluation that already holds the reservation
/// 5. Fails open on any classification error
pub struct Coordinator {
    classifier: Arc<dyn Classifier>,
    cache: Arc<ResultCache>,
    policy: watch::Receiver<Arc<Policy>>,
    processed: Mutex<LruCache<String, Verdict>>,
    metrics: Arc<PipelineMetrics>,
}

impl Coordinator {
    pub fn new(classifier: Arc<dyn Classifier>, cache: Arc<ResultCache>, policies: &PolicyStore) -> Self {
        let capacity = NonZeroUsize::new(cache.capacity()).unwrap_or(NonZeroUsize::MIN);
        Self {
            classifier,
            cache,
            policy: policies.subscribe(),
            processed: Mutex::new(LruCache::new(capacity)),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Record into a shared metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// The policy future evaluations will use.
    pub fn current_policy(&self) -> Arc<Policy> {
        self.policy.borrow().clone()
    }

    /// Evaluate an item under the current policy snapshot.
    pub async fn evaluate(&self, item: &ContentItem) -> Verdict {
        let policy = self.current_policy();
        self.evaluate_with(item, &policy).await
    }

    /// Evaluate an item under an explicit policy snapshot.
    ///
    /// Never fails: classification errors come back as a shown verdict whose
    /// basis carries the error.
    pub async fn evaluate_with(&self, item: &ContentItem, policy: &Policy) -> Verdict {
        if let Some(previous) = self.processed_verdict(&item.id) {
            tracing::debug!(item = %item.id, "Already processed, returning previous verdict");
            return previous;
        }

        self.metrics.record_evaluation();
        let verdict = self.resolve(item, policy).await;
        self.finish(item, verdict)
    }

    /// Re-run the decision for an item from its cached classification under
    /// the current policy, bypassing the processed-item memory.
    ///
    /// Falls back to a full evaluation when nothing is cached.
    pub async fn reevaluate(&self, item: &ContentItem) -> Verdict {
        let policy = self.current_policy();
        if !item.is_blank()
            && let Some(result) = self.cache.get(&item.fingerprint(&policy))
        {
            self.metrics.record_evaluation();
            self.metrics.record_cache_hit();
            let verdict = decide(&result, &policy);
            return self.finish(item, verdict);
        }

        self.forget(&item.id);
        self.evaluate_with(item, &policy).await
    }

    /// Drop the remembered verdict for an item id.
    pub fn forget(&self, id: &str) {
        self.processed().pop(id);
    }

    /// Number of item ids with a remembered verdict.
    pub fn processed_count(&self) -> usize {
        self.processed().len()
    }

    fn processed(&self) -> MutexGuard<'_, LruCache<String, Verdict>> {
        self.processed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn processed_verdict(&self, id: &str) -> Option<Verdict> {
        self.processed().get(id).cloned()
    }

    async fn resolve(&self, item: &ContentItem, policy: &Policy) -> Verdict {
        if item.is_blank() {
            tracing::debug!(item = %item.id, "Nothing to classify");
            return Verdict::skipped();
        }

        let fingerprint = item.fingerprint(policy);

        for _ in 0..MAX_CLAIM_ROUNDS {
            if let Some(result) = self.cache.get(&fingerprint) {
                self.metrics.record_cache_hit();
                return decide(&result, policy);
            }

            if let Some(reservation) = self.cache.try_reserve(&fingerprint) {
                self.metrics.record_cache_miss();
                return self.classify_reserved(item, policy, reservation).await;
            }

            if let Some(rx) = self.cache.subscribe(&fingerprint) {
                self.metrics.record_dedup_join();
                tracing::debug!(
                    item = %item.id,
                    fingerprint = %fingerprint.short(),
                    "Classification already in flight, waiting"
                );
                return match self.cache.wait(rx).await {
                    Settlement::Ready(result) => decide(&result, policy),
                    Settlement::Failed(error) => Verdict::fail_open(error),
                    Settlement::Abandoned => Verdict::fail_open(ClassificationError::TransportError(
                        "in-flight classification was abandoned".into(),
                    )),
                };
            }
        }

        Verdict::fail_open(ClassificationError::TransportError(format!(
            "fingerprint {} kept changing hands",
            fingerprint.short()
        )))
    }

    async fn classify_reserved(
        &self,
        item: &ContentItem,
        policy: &Policy,
        reservation: Reservation,
    ) -> Verdict {
        let guard = ReservationGuard {
            cache: &self.cache,
            reservation: Some(reservation),
        };

        match self.classifier.classify(item, policy).await {
            Ok(result) => {
                self.metrics.record_classification_completed();
                let verdict = decide(&result, policy);
                guard.complete(result);
                verdict
            }
            Err(error) => {
                self.metrics.record_classification_failed();
                guard.fail(error.clone());
                Verdict::fail_open(error)
            }
        }
    }

    fn finish(&self, item: &ContentItem, verdict: Verdict) -> Verdict {
        match verdict.basis {
            VerdictBasis::Skipped => self.metrics.record_skipped(),
            _ => self.metrics.record_verdict(verdict.show),
        }

        match verdict.error() {
            Some(ClassificationError::AuthError(msg)) => {
                tracing::error!(
                    item = %item.id,
                    error = %msg,
                    "Classification credential missing, item shown unfiltered"
                );
            }
            Some(error) => {
                tracing::warn!(
                    item = %item.id,
                    kind = error.kind(),
                    error = %error,
                    "Classification failed, item shown unfiltered"
                );
            }
            None => {
                tracing::info!(
                    item = %item.id,
                    show = verdict.show,
                    basis = %verdict.basis,
                    reason = %verdict.reason,
                    "Verdict"
                );
                self.processed().put(item.id.clone(), verdict.clone());
            }
        }

        verdict
    }
}

/// Releases a reservation on every exit path, including cancellation.
struct ReservationGuard<'a> {
    cache: &'a ResultCache,
    reservation: Option<Reservation>,
}

impl ReservationGuard<'_> {
    fn complete(mut self, result: ClassificationResult) {
        if let Some(reservation) = self.reservation.take() {
            self.cache.put(reservation.fingerprint().clone(), result);
        }
    }

    fn fail(mut self, error: ClassificationError) {
        if let Some(reservation) = self.reservation.take() {
            self.cache.fail_reservation(&reservation, error);
        }
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            tracing::debug!(
                fingerprint = %reservation.fingerprint().short(),
                "Evaluation dropped mid-flight, releasing reservation"
            );
            self.cache.release_reservation(&reservation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::task::JoinSet;

    /// Classifier fake with a call counter and optional latency.
    struct FakeClassifier {
        calls: AtomicUsize,
        latency: Duration,
        outcome: Result<ClassificationResult, ClassificationError>,
    }

    impl FakeClassifier {
        fn scoring(score: f64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                latency: Duration::ZERO,
                outcome: Ok(ClassificationResult {
                    excludes_all_excluded: false,
                    includes_any_included: true,
                    sentiment_score: score,
                    reason: format!("scored {score}"),
                }),
            }
        }

        fn failing(error: ClassificationError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                latency: Duration::ZERO,
                outcome: Err(error),
            }
        }

        fn slow(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Classifier for FakeClassifier {
        fn classify<'a>(
            &'a self,
            _item: &'a ContentItem,
            _policy: &'a Policy,
        ) -> Pin<Box<dyn Future<Output = Result<ClassificationResult, ClassificationError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                self.outcome.clone()
            })
        }
    }

    fn setup(classifier: Arc<FakeClassifier>, policy: Policy) -> (Arc<Coordinator>, PolicyStore) {
        let store = PolicyStore::new(policy);
        let coordinator =
            Coordinator::new(classifier, Arc::new(ResultCache::new(64)), &store);
        (Arc::new(coordinator), store)
    }

    fn policy(min_sentiment: f64) -> Policy {
        Policy::from_lists("hindu", "secular", min_sentiment)
    }

    #[tokio::test]
    async fn evaluate_is_idempotent() {
        let classifier = Arc::new(FakeClassifier::scoring(4.0));
        let (coordinator, _store) = setup(classifier.clone(), policy(5.0));
        let item = ContentItem::new("post-1", "some post");

        let first = coordinator.evaluate(&item).await;
        let second = coordinator.evaluate(&item).await;

        assert_eq!(first, second);
        assert!(!first.show);
        assert_eq!(first.reason, "scored 4");
        assert_eq!(classifier.calls(), 1);
        assert_eq!(coordinator.processed_count(), 1);
    }

    #[tokio::test]
    async fn identical_text_hits_cache() {
        let classifier = Arc::new(FakeClassifier::scoring(8.0));
        let (coordinator, _store) = setup(classifier.clone(), policy(5.0));

        coordinator.evaluate(&ContentItem::new("a", "shared text")).await;
        let verdict = coordinator.evaluate(&ContentItem::new("b", "shared text")).await;

        assert!(verdict.show);
        assert_eq!(classifier.calls(), 1);
        let snap = coordinator.metrics().snapshot();
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_duplicates_make_one_call() {
        let classifier = Arc::new(FakeClassifier::scoring(2.0).slow(Duration::from_secs(3)));
        let (coordinator, _store) = setup(classifier.clone(), policy(5.0));

        let mut set = JoinSet::new();
        for i in 0..8 {
            let coordinator = coordinator.clone();
            set.spawn(async move {
                let item = ContentItem::new(format!("post-{i}"), "viral post");
                coordinator.evaluate(&item).await
            });
        }

        let verdicts: Vec<Verdict> = set.join_all().await;
        assert_eq!(verdicts.len(), 8);
        assert!(verdicts.iter().all(|v| !v.show && v.is_classified()));
        assert_eq!(classifier.calls(), 1);
        assert_eq!(coordinator.metrics().snapshot().dedup_joins, 7);
        assert_eq!(coordinator.cache().in_flight(), 0);
    }

    #[tokio::test]
    async fn failure_fails_open_and_allows_retry() {
        let classifier = Arc::new(FakeClassifier::failing(ClassificationError::TransportError(
            "unreachable".into(),
        )));
        let (coordinator, _store) = setup(classifier.clone(), policy(5.0));
        let item = ContentItem::new("post-1", "text");

        let verdict = coordinator.evaluate(&item).await;
        assert!(verdict.show);
        assert!(matches!(
            verdict.error(),
            Some(ClassificationError::TransportError(_))
        ));
        assert_eq!(coordinator.cache().in_flight(), 0);
        assert!(coordinator.cache().is_empty());

        coordinator.evaluate(&item).await;
        assert_eq!(classifier.calls(), 2);
        assert_eq!(coordinator.processed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_share_the_owner_failure() {
        let classifier = Arc::new(
            FakeClassifier::failing(ClassificationError::ParseError("garbage".into()))
                .slow(Duration::from_secs(1)),
        );
        let (coordinator, _store) = setup(classifier.clone(), policy(5.0));

        let mut set = JoinSet::new();
        for i in 0..3 {
            let coordinator = coordinator.clone();
            set.spawn(async move {
                coordinator
                    .evaluate(&ContentItem::new(format!("p{i}"), "same"))
                    .await
            });
        }

        let verdicts = set.join_all().await;
        assert!(verdicts.iter().all(|v| v.show
            && matches!(v.error(), Some(ClassificationError::ParseError(_)))));
        assert_eq!(classifier.calls(), 1);
    }

    #[tokio::test]
    async fn missing_credential_is_reported() {
        let classifier = Arc::new(FakeClassifier::failing(ClassificationError::AuthError(
            "no key".into(),
        )));
        let (coordinator, _store) = setup(classifier, policy(5.0));

        let verdict = coordinator.evaluate(&ContentItem::new("a", "text")).await;
        assert!(verdict.show);
        assert!(matches!(
            verdict.basis,
            VerdictBasis::Unclassified {
                error: ClassificationError::AuthError(_)
            }
        ));
    }

    #[tokio::test]
    async fn blank_items_are_skipped() {
        let classifier = Arc::new(FakeClassifier::scoring(0.0));
        let (coordinator, _store) = setup(classifier.clone(), policy(5.0));

        let verdict = coordinator.evaluate(&ContentItem::new("a", "   \n")).await;
        assert!(verdict.show);
        assert_eq!(verdict.basis, VerdictBasis::Skipped);
        assert_eq!(classifier.calls(), 0);
        assert_eq!(coordinator.metrics().snapshot().items_skipped, 1);
    }

    #[tokio::test]
    async fn policy_updates_apply_to_later_evaluations() {
        let classifier = Arc::new(FakeClassifier::scoring(4.0));
        let (coordinator, store) = setup(classifier.clone(), policy(5.0));
        let first = ContentItem::new("a", "borderline");

        assert!(!coordinator.evaluate(&first).await.show);

        store.update(policy(3.0));

        // Processed item keeps its verdict; a new item decides from cache.
        assert!(!coordinator.evaluate(&first).await.show);
        assert!(coordinator.evaluate(&ContentItem::new("b", "borderline")).await.show);
        assert!(coordinator.reevaluate(&first).await.show);
        assert!(coordinator.evaluate(&first).await.show);
        assert_eq!(classifier.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_evaluation_keeps_its_snapshot() {
        let classifier = Arc::new(FakeClassifier::scoring(4.0).slow(Duration::from_secs(2)));
        let (coordinator, store) = setup(classifier.clone(), policy(5.0));

        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.evaluate(&ContentItem::new("a", "post")).await })
        };
        while classifier.calls() == 0 {
            tokio::task::yield_now().await;
        }

        store.update(policy(1.0));

        let verdict = task.await.unwrap();
        assert!(!verdict.show);
        assert_eq!(coordinator.current_policy().min_sentiment, 1.0);
    }

    #[tokio::test]
    async fn belief_changes_reclassify() {
        let classifier = Arc::new(FakeClassifier::scoring(6.0));
        let (coordinator, store) = setup(classifier.clone(), policy(5.0));

        coordinator.evaluate(&ContentItem::new("a", "post")).await;
        store.update(Policy::from_lists("islam", "secular", 5.0));
        coordinator.evaluate(&ContentItem::new("b", "post")).await;

        assert_eq!(classifier.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_evaluation_releases_reservation() {
        let classifier = Arc::new(FakeClassifier::scoring(6.0).slow(Duration::from_secs(60)));
        let (coordinator, _store) = setup(classifier.clone(), policy(5.0));

        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.evaluate(&ContentItem::new("a", "post")).await })
        };
        while coordinator.cache().in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(coordinator.cache().in_flight(), 0);

        let verdict = coordinator.evaluate(&ContentItem::new("b", "post")).await;
        assert!(verdict.show && verdict.is_classified());
        assert_eq!(classifier.calls(), 2);
    }
}
