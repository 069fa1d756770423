//! Terminal device actions: deep sleep, restart, firmware slot handoff
//!
//! The update cycle never powers down or reboots by itself. It returns a
//! [`DeviceAction`] and the caller hands it to [`execute`], which does not
//! return.

use thiserror::Error;

use crate::config::DEFAULT_REFRESH_INTERVAL;

/// What the device does once the cycle is over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    /// Deep sleep, waking on the timer or the power button
    Sleep { seconds: u32 },
    /// Reboot into the running slot
    Restart,
    /// Make the other firmware slot the boot slot, then reboot
    SwitchSlot,
}

impl DeviceAction {
    /// Sleep for `seconds`, with zero replaced by the default interval
    pub fn sleep(seconds: u32) -> Self {
        let seconds = if seconds == 0 {
            DEFAULT_REFRESH_INTERVAL
        } else {
            seconds
        };
        DeviceAction::Sleep { seconds }
    }
}

/// One bootable application slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub index: u8,
    /// Flash offset of the slot
    pub address: u32,
}

/// Firmware slot handoff failures
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("running slot unknown")]
    NoRunningSlot,
    #[error("no alternate firmware slot")]
    NoAlternateSlot,
    #[error("alternate slot is the running slot")]
    SameSlot,
    #[error("boot slot switch rejected")]
    SwitchRejected,
}

/// Two-slot firmware layout
pub trait FirmwareSlots {
    fn running(&mut self) -> Option<Slot>;
    fn alternate(&mut self) -> Option<Slot>;
    /// Select `slot` for the next boot
    fn set_boot(&mut self, slot: Slot) -> Result<(), SlotError>;
}

/// Irreversible power transitions
pub trait Power {
    fn deep_sleep(&mut self, seconds: u32) -> !;
    fn restart(&mut self) -> !;
}

/// Point the bootloader at the alternate slot after checking it is a real,
/// distinct slot.
pub fn prepare_handoff<S: FirmwareSlots + ?Sized>(slots: &mut S) -> Result<Slot, SlotError> {
    let running = slots.running().ok_or(SlotError::NoRunningSlot)?;
    let alternate = slots.alternate().ok_or(SlotError::NoAlternateSlot)?;
    if alternate.index == running.index || alternate.address == running.address {
        return Err(SlotError::SameSlot);
    }
    slots.set_boot(alternate)?;
    Ok(alternate)
}

/// Carry out `action`. A failed slot switch falls back to a plain restart.
pub fn execute<P, S>(action: DeviceAction, power: &mut P, slots: &mut S) -> !
where
    P: Power + ?Sized,
    S: FirmwareSlots + ?Sized,
{
    match action {
        DeviceAction::Sleep { seconds } => {
            log::info!("Entering deep sleep for {} seconds", seconds);
            power.deep_sleep(seconds)
        }
        DeviceAction::Restart => {
            log::info!("Restarting");
            power.restart()
        }
        DeviceAction::SwitchSlot => {
            match prepare_handoff(slots) {
                Ok(slot) => log::info!(
                    "Boot slot set to {} at {:#x}, restarting",
                    slot.index,
                    slot.address
                ),
                Err(e) => log::error!("Slot handoff failed ({}), restarting in place", e),
            }
            power.restart()
        }
    }
}
