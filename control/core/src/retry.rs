//! Exponential backoff shared by the advisory and actuator retry paths

use std::time::Duration;

/// Cap on the doubling so a large attempt number cannot overflow
const MAX_BACKOFF_SHIFT: u32 = 6;

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_SHIFT))
}

/// Wait out the backoff before retry number `attempt`
pub(crate) async fn backoff(base: Duration, attempt: u32) {
    let delay = backoff_delay(base, attempt);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
