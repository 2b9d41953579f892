//! Token Bucket Implementation
//!
//! Integer token bucket with refill-then-consume semantics. All state for a
//! bucket lives behind a single lock, so every access is one linearizable
//! step for that key.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::clock::Clock;
use super::config::{LimitPolicy, RefillMode};

/// Outcome of a consume attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// Whether the tokens were taken
    pub consumed: bool,

    /// Tokens left after the attempt
    pub remaining: u32,

    /// The bucket was evicted from its registry; resolve the key again
    pub retired: bool,
}

#[derive(Debug)]
struct BucketState {
    available: u32,
    last_refill: Instant,
    last_access: Instant,
    retired: bool,
}

/// Token bucket for one (category, identifier) key
#[derive(Debug)]
pub struct TokenBucket {
    policy: LimitPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(policy: LimitPolicy, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            policy,
            clock,
            state: Mutex::new(BucketState {
                available: policy.capacity,
                last_refill: now,
                last_access: now,
                retired: false,
            }),
        }
    }

    /// Maximum tokens
    pub fn capacity(&self) -> u32 {
        self.policy.capacity
    }

    /// Parameters this bucket was created with
    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Try to consume tokens from the bucket
    ///
    /// Refills first, then takes `tokens` if that many are available.
    /// On failure the count is left untouched.
    pub fn try_consume(&self, tokens: u32) -> ConsumeOutcome {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if state.retired {
            return ConsumeOutcome {
                consumed: false,
                remaining: 0,
                retired: true,
            };
        }

        self.refill(&mut state, now);
        state.last_access = now;

        let consumed = state.available >= tokens;
        if consumed {
            state.available -= tokens;
        }
        ConsumeOutcome {
            consumed,
            remaining: state.available,
            retired: false,
        }
    }

    /// Current token count, after any refill that is due
    ///
    /// Never consumes and does not count as activity for idle eviction.
    pub fn available_tokens(&self) -> u32 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.available
    }

    /// Time since the last consume attempt
    pub fn idle_for(&self) -> Duration {
        let now = self.clock.now();
        let state = self.state.lock();
        now.saturating_duration_since(state.last_access)
    }

    /// Retire the bucket if it has been idle for `max_idle` and is full
    ///
    /// A retired bucket refuses every later consume, so a replacement created
    /// for the same key starts from exactly the state this one had.
    pub(crate) fn retire_if_idle(&self, max_idle: Duration) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.retired {
            return true;
        }

        self.refill(&mut state, now);
        let idle = now.saturating_duration_since(state.last_access) >= max_idle;
        if idle && state.available == self.policy.capacity {
            state.retired = true;
        }
        state.retired
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let capacity = self.policy.capacity;
        let interval = self.policy.refill_interval;

        match self.policy.refill_mode {
            RefillMode::Interval => {
                // However many intervals passed, this is a single refill event.
                if elapsed >= interval {
                    state.available = state
                        .available
                        .saturating_add(self.policy.refill_rate)
                        .min(capacity);
                    state.last_refill = now;
                }
            }
            RefillMode::Smooth => {
                let interval_nanos = interval.as_nanos();
                if interval_nanos == 0 {
                    state.available = capacity;
                    state.last_refill = now;
                    return;
                }

                let rate = u128::from(self.policy.refill_rate);
                let added = rate * elapsed.as_nanos() / interval_nanos;
                if added == 0 {
                    return;
                }

                let refilled = (u128::from(state.available) + added).min(u128::from(capacity));
                state.available = refilled as u32;

                if state.available == capacity {
                    state.last_refill = now;
                } else {
                    // Keep the fractional remainder for the next access.
                    let spent = added * interval_nanos / rate;
                    state.last_refill += Duration::from_nanos(spent as u64);
                }
            }
        }
    }
}
