//! Monotonic time source and bounded waits
//!
//! Every wait in the update cycle (menu polling, WiFi join, HTTP exchanges,
//! image stream reads) goes through a [`Clock`] so the deadline logic is
//! independent of the executor's timer driver.

use core::future::Future;

use embassy_futures::select::{Either, select};

/// Monotonic millisecond clock with an async delay
#[allow(async_fn_in_trait)]
pub trait Clock {
    /// Milliseconds since boot
    fn now_ms(&self) -> u64;

    /// Suspend the current task for `ms` milliseconds
    async fn delay_ms(&self, ms: u32);
}

impl<C: Clock> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    async fn delay_ms(&self, ms: u32) {
        (**self).delay_ms(ms).await
    }
}

/// A bounded wait ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

/// Run `fut` to completion unless `ms` milliseconds pass first
pub async fn with_timeout<C, F>(clock: &C, ms: u32, fut: F) -> Result<F::Output, TimedOut>
where
    C: Clock,
    F: Future,
{
    match select(fut, clock.delay_ms(ms)).await {
        Either::First(output) => Ok(output),
        Either::Second(()) => Err(TimedOut),
    }
}

/// Milliseconds left until `deadline_ms`, zero once it has passed
pub fn remaining_ms<C: Clock>(clock: &C, deadline_ms: u64) -> u32 {
    deadline_ms
        .saturating_sub(clock.now_ms())
        .min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClock;
    use embassy_futures::block_on;

    #[test]
    fn test_timeout_passes_ready_future() {
        let clock = FakeClock::new();
        let result = block_on(with_timeout(&clock, 1000, async { 7 }));
        assert_eq!(result, Ok(7));
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn test_timeout_fires_on_pending_future() {
        let clock = FakeClock::new();
        let result = block_on(with_timeout(&clock, 1500, core::future::pending::<()>()));
        assert_eq!(result, Err(TimedOut));
        assert_eq!(clock.now_ms(), 1500);
    }

    #[test]
    fn test_remaining_saturates() {
        let clock = FakeClock::new();
        clock.advance(500);
        assert_eq!(remaining_ms(&clock, 2000), 1500);
        assert_eq!(remaining_ms(&clock, 100), 0);
    }
}
