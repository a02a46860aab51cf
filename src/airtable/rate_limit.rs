use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Steady-rate limiter with a small burst allowance, shared by every request
/// a client issues.
///
/// Implemented as a generic cell rate algorithm: `next_free` is the theoretical
/// arrival time of the next request, and a caller may go ahead as long as that
/// time is no more than `tolerance` in the future. Waiters queue on the mutex,
/// so slots are handed out in arrival order.
pub struct RateLimiter {
  next_free: Mutex<Instant>,
  interval: Duration,
  tolerance: Duration,
}

impl RateLimiter {
  pub fn new(requests_per_second: u32, burst: u32) -> Self {
    let interval = Duration::from_secs(1) / requests_per_second.max(1);
    let tolerance = interval * burst.max(1).saturating_sub(1);
    Self {
      next_free: Mutex::new(Instant::now()),
      interval,
      tolerance,
    }
  }

  pub fn from_config(config: &RateLimitConfig) -> Self {
    Self::new(config.requests_per_second, config.burst)
  }

  /// Wait until a request slot is available and claim it.
  pub async fn acquire(&self) {
    let mut next_free = self.next_free.lock().await;

    let now = Instant::now();
    if *next_free > now + self.tolerance {
      let ready_at = *next_free - self.tolerance;
      tracing::trace!(wait_ms = (ready_at - now).as_millis() as u64, "Rate limited");
      tokio::time::sleep_until(ready_at).await;
    }

    let start = Instant::now().max(*next_free);
    *next_free = start + self.interval;
  }
}
