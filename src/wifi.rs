//! WiFi station join with a bounded wait

use thiserror::Error;

use crate::clock::{Clock, TimedOut, remaining_ms, with_timeout};

/// WiFi bring-up failures
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    #[error("invalid WiFi credentials")]
    InvalidCredentials,
    #[error("WiFi radio failed to start")]
    Radio,
    #[error("association rejected")]
    Rejected,
    #[error("timed out joining network")]
    Timeout,
}

/// Station-mode network interface
#[allow(async_fn_in_trait)]
pub trait Network {
    /// Configure credentials and start associating. May return before an
    /// address has been acquired.
    async fn begin_join(&mut self, ssid: &str, password: &str) -> Result<(), NetError>;

    /// Associated and holding an IPv4 address
    fn is_joined(&mut self) -> bool;

    /// Signal strength of the current association in dBm
    fn rssi(&mut self) -> Option<i8>;

    /// Station MAC address
    fn mac_address(&mut self) -> [u8; 6];
}

/// Join `ssid`, polling the link every `poll_ms` until `timeout_ms` has
/// passed since the call.
pub async fn join<N, C>(
    network: &mut N,
    clock: &C,
    ssid: &str,
    password: &str,
    timeout_ms: u32,
    poll_ms: u32,
) -> Result<(), NetError>
where
    N: Network + ?Sized,
    C: Clock,
{
    log::info!("Connecting to WiFi: {}", ssid);
    let deadline = clock.now_ms() + timeout_ms as u64;

    match with_timeout(clock, timeout_ms, network.begin_join(ssid, password)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            log::warn!("WiFi join failed: {}", e);
            return Err(e);
        }
        Err(TimedOut) => return Err(NetError::Timeout),
    }

    loop {
        if network.is_joined() {
            log::info!("WiFi connected (RSSI {:?})", network.rssi());
            return Ok(());
        }
        let left = remaining_ms(clock, deadline);
        if left == 0 {
            log::warn!("WiFi not connected after {}ms", timeout_ms);
            return Err(NetError::Timeout);
        }
        clock.delay_ms(poll_ms.min(left)).await;
    }
}
