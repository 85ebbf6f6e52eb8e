use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use feedsift_core::{ClassificationError, ClassificationResult, Fingerprint};
use lru::LruCache;
use tokio::sync::watch;
use tokio::time::Instant;

/// Default number of classification results kept.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default age after which an in-flight marker is considered dangling.
///
/// Must outlast a classifier's full retry budget, or a live owner's
/// reservation gets taken over; the default budget is 190s.
pub const DEFAULT_RESERVATION_TIMEOUT: Duration = Duration::from_secs(240);

/// How an in-flight classification ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Ready(ClassificationResult),
    Failed(ClassificationError),
    /// The owner went away (cancelled, timed out, or superseded).
    Abandoned,
}

/// Proof of a successful [`ResultCache::try_reserve`].
///
/// Releasing through the reservation only clears the marker it created, so a
/// stale owner cannot clear a newer reservation for the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    fingerprint: Fingerprint,
    token: u64,
}

impl Reservation {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

struct InFlight {
    token: u64,
    reserved_at: Instant,
    tx: watch::Sender<Option<Settlement>>,
}

struct CacheInner {
    results: LruCache<Fingerprint, ClassificationResult>,
    in_flight: HashMap<Fingerprint, InFlight>,
}

/// Classification results keyed by fingerprint, plus in-flight markers.
///
/// Results are bounded by an LRU policy and never updated in place. The
/// in-flight map is the deduplication primitive: at most one reservation per
/// fingerprint, and anyone else can subscribe to its outcome.
///
/// The lock is a plain mutex held only for map operations, never across an
/// await, so reservations can be released from `Drop`.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    reservation_timeout: Duration,
    next_token: AtomicU64,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_reservation_timeout(capacity, DEFAULT_RESERVATION_TIMEOUT)
    }

    pub fn with_reservation_timeout(capacity: usize, reservation_timeout: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                results: LruCache::new(capacity),
                in_flight: HashMap::new(),
            }),
            reservation_timeout,
            next_token: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reservation_timeout(&self) -> Duration {
        self.reservation_timeout
    }

    /// Look up a result, marking it recently used.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ClassificationResult> {
        let mut inner = self.lock();
        let hit = inner.results.get(fingerprint).cloned();
        if hit.is_some() {
            tracing::debug!(fingerprint = %fingerprint.short(), "Cache hit");
        }
        hit
    }

    /// Store a result and settle any in-flight marker for it.
    ///
    /// An existing entry is kept as is.
    pub fn put(&self, fingerprint: Fingerprint, result: ClassificationResult) {
        let mut inner = self.lock();
        if let Some(flight) = inner.in_flight.remove(&fingerprint) {
            flight.tx.send_replace(Some(Settlement::Ready(result.clone())));
        }
        if inner.results.contains(&fingerprint) {
            return;
        }
        if let Some((evicted, _)) = inner.results.push(fingerprint.clone(), result) {
            if evicted != fingerprint {
                tracing::debug!(evicted = %evicted.short(), "Cache full, evicted least recently used");
            }
        }
    }

    /// Mark `fingerprint` as in flight.
    ///
    /// Returns false if it is already reserved or already has a result.
    pub fn reserve(&self, fingerprint: &Fingerprint) -> bool {
        self.try_reserve(fingerprint).is_some()
    }

    /// [`reserve`](Self::reserve), returning a handle that can release it.
    ///
    /// A marker older than the reservation timeout is dangling: it is
    /// abandoned and the new caller takes over.
    pub fn try_reserve(&self, fingerprint: &Fingerprint) -> Option<Reservation> {
        let mut inner = self.lock();
        if inner.results.contains(fingerprint) {
            return None;
        }

        if let Some(existing) = inner.in_flight.get(fingerprint) {
            if existing.reserved_at.elapsed() < self.reservation_timeout {
                return None;
            }
            tracing::warn!(
                fingerprint = %fingerprint.short(),
                age_secs = existing.reserved_at.elapsed().as_secs(),
                "Reservation went stale, taking over"
            );
            existing.tx.send_replace(Some(Settlement::Abandoned));
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, _rx) = watch::channel(None);
        inner.in_flight.insert(
            fingerprint.clone(),
            InFlight {
                token,
                reserved_at: Instant::now(),
                tx,
            },
        );
        Some(Reservation {
            fingerprint: fingerprint.clone(),
            token,
        })
    }

    /// Drop any reservation for `fingerprint` without a result.
    pub fn release(&self, fingerprint: &Fingerprint) {
        self.settle(fingerprint, None, Settlement::Abandoned);
    }

    /// Drop a reservation created by [`try_reserve`](Self::try_reserve).
    /// No effect if it has been superseded.
    pub fn release_reservation(&self, reservation: &Reservation) {
        self.settle(
            &reservation.fingerprint,
            Some(reservation.token),
            Settlement::Abandoned,
        );
    }

    /// Drop a reservation and tell waiters why the classification failed.
    pub fn fail_reservation(&self, reservation: &Reservation, error: ClassificationError) {
        self.settle(
            &reservation.fingerprint,
            Some(reservation.token),
            Settlement::Failed(error),
        );
    }

    fn settle(&self, fingerprint: &Fingerprint, token: Option<u64>, settlement: Settlement) {
        let mut inner = self.lock();
        let matches = inner
            .in_flight
            .get(fingerprint)
            .is_some_and(|flight| token.is_none_or(|t| t == flight.token));
        if matches && let Some(flight) = inner.in_flight.remove(fingerprint) {
            flight.tx.send_replace(Some(settlement));
        }
    }

    /// Receiver for the outcome of the in-flight classification, if any.
    pub fn subscribe(&self, fingerprint: &Fingerprint) -> Option<watch::Receiver<Option<Settlement>>> {
        let inner = self.lock();
        inner.in_flight.get(fingerprint).map(|flight| flight.tx.subscribe())
    }

    /// Wait for a subscribed classification to settle, bounded by the
    /// reservation timeout.
    pub async fn wait(&self, mut rx: watch::Receiver<Option<Settlement>>) -> Settlement {
        let settled = async {
            loop {
                if let Some(settlement) = rx.borrow_and_update().clone() {
                    return settlement;
                }
                if rx.changed().await.is_err() {
                    return Settlement::Abandoned;
                }
            }
        };

        match tokio::time::timeout(self.reservation_timeout, settled).await {
            Ok(settlement) => settlement,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.reservation_timeout.as_secs(),
                    "Gave up waiting for in-flight classification"
                );
                Settlement::Abandoned
            }
        }
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.lock().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().results.is_empty()
    }

    /// Number of fingerprints currently reserved.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn capacity(&self) -> usize {
        self.lock().results.cap().get()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
