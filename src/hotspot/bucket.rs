//! Per-parameter-value accounting state.
//!
//! Every distinct [`ParamKey`] gets its own entry. Updates run under the map
//! entry's lock, so a single acquire is atomic even when many callers hit the
//! same value at once.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Instant;

use super::param::ParamKey;

/// Milliseconds elapsed since `anchor`.
fn elapsed_ms(anchor: Instant) -> i64 {
    anchor.elapsed().as_millis() as i64
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: i64,
    last_refill_ms: i64,
}

/// Token buckets keyed by parameter value.
///
/// A bucket starts full. Tokens are only added once more than a whole window
/// has passed since the last refill, in proportion to the elapsed time.
///
/// Entries are never evicted: the map grows by one entry per distinct value
/// seen. Call [`ParamTokenBuckets::clear`] to drop them.
#[derive(Debug)]
pub struct ParamTokenBuckets {
    buckets: DashMap<ParamKey, Bucket>,
    anchor: Instant,
}

impl ParamTokenBuckets {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            anchor: Instant::now(),
        }
    }

    /// Try to take `batch` tokens for `key` now.
    pub fn try_acquire(
        &self,
        key: &ParamKey,
        batch: i64,
        max_tokens: i64,
        refill_tokens: i64,
        window_ms: i64,
    ) -> bool {
        let now = elapsed_ms(self.anchor);
        self.try_acquire_at(key, batch, max_tokens, refill_tokens, window_ms, now)
    }

    /// Try to take `batch` tokens for `key` at time `now_ms`.
    ///
    /// `max_tokens` caps the bucket, `refill_tokens` is added per `window_ms`.
    pub fn try_acquire_at(
        &self,
        key: &ParamKey,
        batch: i64,
        max_tokens: i64,
        refill_tokens: i64,
        window_ms: i64,
        now_ms: i64,
    ) -> bool {
        match self.buckets.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                if batch > max_tokens {
                    return false;
                }
                vacant.insert(Bucket {
                    tokens: max_tokens - batch,
                    last_refill_ms: now_ms,
                });
                true
            }
            Entry::Occupied(mut occupied) => {
                let bucket = occupied.get_mut();
                let passed = now_ms - bucket.last_refill_ms;

                if passed > window_ms {
                    let to_add = passed.saturating_mul(refill_tokens) / window_ms.max(1);
                    let refilled = to_add.saturating_add(bucket.tokens).min(max_tokens);
                    let left = refilled - batch;
                    if left < 0 {
                        return false;
                    }
                    bucket.tokens = left;
                    bucket.last_refill_ms = now_ms;
                    return true;
                }

                if bucket.tokens - batch < 0 {
                    return false;
                }
                bucket.tokens -= batch;
                true
            }
        }
    }

    /// Tokens left for `key`, if it has been seen.
    pub fn remaining(&self, key: &ParamKey) -> Option<i64> {
        self.buckets.get(key).map(|b| b.tokens)
    }

    /// Number of tracked parameter values.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn clear(&self) {
        self.buckets.clear();
    }
}

impl Default for ParamTokenBuckets {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of asking a [`ParamPacer`] for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Go now
    Pass,
    /// Go after this many milliseconds
    Wait(u64),
    /// The queue for this value is too long
    Reject,
}

/// Spaces calls for each parameter value at a uniform rate.
///
/// Like [`ParamTokenBuckets`], one entry is kept per distinct value and never
/// evicted. Call [`ParamPacer::clear`] to drop them.
#[derive(Debug)]
pub struct ParamPacer {
    last_pass: DashMap<ParamKey, i64>,
    anchor: Instant,
}

impl ParamPacer {
    pub fn new() -> Self {
        Self {
            last_pass: DashMap::new(),
            anchor: Instant::now(),
        }
    }

    /// Milliseconds on this pacer's clock.
    pub fn now_ms(&self) -> i64 {
        elapsed_ms(self.anchor)
    }

    pub fn acquire(&self, key: &ParamKey, cost_ms: i64, max_queueing_ms: i64) -> Pacing {
        self.acquire_at(key, cost_ms, max_queueing_ms, self.now_ms())
    }

    /// Reserve the next slot for `key`, each slot costing `cost_ms`.
    ///
    /// A reservation less than `max_queueing_ms` in the future is granted as
    /// a wait; anything later is rejected without moving the schedule.
    pub fn acquire_at(
        &self,
        key: &ParamKey,
        cost_ms: i64,
        max_queueing_ms: i64,
        now_ms: i64,
    ) -> Pacing {
        match self.last_pass.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(now_ms);
                Pacing::Pass
            }
            Entry::Occupied(mut occupied) => {
                let last = occupied.get_mut();
                let expected = last.saturating_add(cost_ms);

                if expected <= now_ms {
                    *last = now_ms;
                    Pacing::Pass
                } else if expected - now_ms < max_queueing_ms {
                    *last = expected;
                    Pacing::Wait((expected - now_ms) as u64)
                } else {
                    Pacing::Reject
                }
            }
        }
    }

    /// Number of tracked parameter values.
    pub fn len(&self) -> usize {
        self.last_pass.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_pass.is_empty()
    }

    pub fn clear(&self) {
        self.last_pass.clear();
    }
}

impl Default for ParamPacer {
    fn default() -> Self {
        Self::new()
    }
}
