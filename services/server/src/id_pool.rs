use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Target population kept on hand.
pub const POOL_TARGET: usize = 1000;
/// Population below which a background refill is scheduled.
pub const REFILL_THRESHOLD: usize = 200;
/// How many identifiers one refill generates.
pub const REFILL_BATCH: usize = 500;

const ID_LEN: usize = 16;

/// A pool of pre-generated entry identifiers.
///
/// `get` pops in O(1); when the population drops below the threshold and no
/// refill is already running, one background task tops the pool back up.
/// An empty pool falls back to generating a single id inline, so the hot
/// path never waits on the refill.
pub struct IdPool {
    ids: Mutex<Vec<String>>,
    refill_in_flight: AtomicBool,
    batch: usize,
    threshold: usize,
}

impl IdPool {
    pub fn new() -> Arc<Self> {
        Self::with_sizes(POOL_TARGET, REFILL_THRESHOLD, REFILL_BATCH)
    }

    pub fn with_sizes(target: usize, threshold: usize, batch: usize) -> Arc<Self> {
        let ids = (0..target).map(|_| generate_id()).collect();
        Arc::new(Self {
            ids: Mutex::new(ids),
            refill_in_flight: AtomicBool::new(false),
            batch,
            threshold,
        })
    }

    pub async fn get(self: &Arc<Self>) -> String {
        let (id, remaining) = {
            let mut ids = self.ids.lock().await;
            (ids.pop(), ids.len())
        };
        if remaining < self.threshold && !self.refill_in_flight.swap(true, Ordering::AcqRel) {
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                let fresh: Vec<String> = (0..pool.batch).map(|_| generate_id()).collect();
                let mut ids = pool.ids.lock().await;
                ids.extend(fresh);
                let population = ids.len();
                drop(ids);
                pool.refill_in_flight.store(false, Ordering::Release);
                debug!(population, "id pool refilled");
            });
        }
        id.unwrap_or_else(generate_id)
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }
}

/// A 16-character alphanumeric id: 62^16 is comfortably past 64 bits of
/// entropy, unique for any realistic process lifetime.
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}
