use log::debug;
use rand::Rng;
use std::thread;
use std::time::Duration;

/// Linear backoff with up to 50% random jitter, capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let linear = base.saturating_mul(attempt.max(1));
    let capped = linear.min(max);
    if capped.is_zero() {
        return capped;
    }
    let jitter_ms = capped.as_millis() as u64 / 2;
    let mut rng = rand::thread_rng();
    let extra = if jitter_ms > 0 {
        Duration::from_millis(rng.gen_range(0..=jitter_ms))
    } else {
        Duration::ZERO
    };
    (capped + extra).min(max)
}

pub fn retry_pause(attempt: u32, base: Duration, max: Duration) {
    let delay = backoff_delay(attempt, base, max);
    if delay.is_zero() {
        return;
    }
    debug!("Waiting {} ms before retry #{}...", delay.as_millis(), attempt);
    thread::sleep(delay);
}
