//! Token governor behind [`LoadTestConfig::requests_per_second`](super::LoadTestConfig).
//!
//! The governor adds permits to a [`Semaphore`] every `tick`. At a rate `r`
//! in requests per second each tick is worth `r * tick_seconds` tokens; the
//! integer part is added and the remainder carries over to the next tick:
//!
//! ```text
//! add_f = r * tick_seconds
//! add_total = floor(add_f + fractional)
//! fractional = (add_f + fractional) - add_total
//! ```
//!
//! Stored permits saturate at `bucket_capacity`, which bounds the burst a
//! group of idle users can fire once they wake up. Users claim one permit per
//! iteration and forget it, so permits are never returned.

use std::{sync::Arc, time::Duration};

use tokio::{sync::Semaphore, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) const TICK: Duration = Duration::from_millis(100);

/// The semaphore reserves a few bits of its counter for flags.
const MAX_TOKENS: usize = Semaphore::MAX_PERMITS;

pub(crate) struct Governor {
    pub tokens: Arc<Semaphore>,
    pub handle: JoinHandle<()>,
}

impl Governor {
    /// Start refilling at `rate` tokens per second, keeping at most one
    /// second's worth in the bucket. Runs until `stop` fires.
    pub fn spawn(rate: u32, stop: CancellationToken) -> Self {
        let tokens = Arc::new(Semaphore::new(0));
        let capacity = (rate as usize).clamp(1, MAX_TOKENS);
        tracing::debug!(rate, capacity, "Spawning token governor task...");
        let handle = tokio::spawn(token_governor_task(
            tokens.clone(),
            f64::from(rate),
            TICK,
            capacity,
            stop,
        ));
        Self { tokens, handle }
    }
}

async fn token_governor_task(
    tokens: Arc<Semaphore>,
    rate: f64,
    tick: Duration,
    bucket_capacity: usize,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut fractional = 0.0;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let (add_total, f) = calc_token_limit(rate, tick, fractional);
                fractional = f;
                let avail = tokens.available_permits();
                if add_total > 0 && avail < bucket_capacity {
                    let add = (add_total as usize).min(bucket_capacity - avail);
                    tokens.add_permits(add);
                }
            }
        }
    }
    // wake anyone still waiting for a permit
    tokens.close();
}

/// Tokens to add this tick and the fractional remainder to carry.
pub(crate) fn calc_token_limit(rate: f64, tick: Duration, fractional: f64) -> (u64, f64) {
    let add_f = rate * tick.as_secs_f64() + fractional;
    let add_total = add_f.floor() as u64;
    (add_total, add_f - add_total as f64)
}
