//! Timekeeping, power states and firmware slot selection

use core::time::Duration as CoreDuration;

use embassy_time::{Instant, Timer};
use esp_bootloader_esp_idf::ota::OtaImageState;
use esp_bootloader_esp_idf::ota_updater::OtaUpdater;
use esp_bootloader_esp_idf::partitions::{
    self, AppPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionEntry, PartitionType,
};
use esp_hal::gpio::RtcPinWithResistors;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::{RtcioWakeupSource, TimerWakeupSource, WakeupLevel};
use esp_storage::FlashStorage;

use crate::clock::Clock;
use crate::power::{FirmwareSlots, Power, Slot, SlotError};

/// [`Clock`] backed by the embassy time driver
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }

    async fn delay_ms(&self, ms: u32) {
        Timer::after_millis(ms as u64).await
    }
}

/// Deep sleep with timer and power button wake, and software reset
pub struct EspPower<'d, P> {
    rtc: Rtc<'d>,
    wake_pin: P,
}

impl<'d, P: RtcPinWithResistors> EspPower<'d, P> {
    pub fn new(rtc: Rtc<'d>, wake_pin: P) -> Self {
        Self { rtc, wake_pin }
    }
}

impl<P: RtcPinWithResistors> Power for EspPower<'_, P> {
    fn deep_sleep(&mut self, seconds: u32) -> ! {
        let timer = TimerWakeupSource::new(CoreDuration::from_secs(seconds as u64));

        // Keep the button line from floating and waking us spuriously
        self.wake_pin.rtcio_pullup(true);
        self.wake_pin.rtcio_pulldown(false);

        let mut pins: [(&mut dyn RtcPinWithResistors, WakeupLevel); 1] =
            [(&mut self.wake_pin, WakeupLevel::Low)];
        let button = RtcioWakeupSource::new(&mut pins);

        log::info!("Entering deep sleep for {} seconds", seconds);
        self.rtc.sleep_deep(&[&timer, &button])
    }

    fn restart(&mut self) -> ! {
        log::info!("Restarting");
        esp_hal::system::software_reset()
    }
}

/// Two OTA app partitions read from the flash partition table
pub struct OtaSlots<'d> {
    flash: FlashStorage<'d>,
    buffer: [u8; PARTITION_TABLE_MAX_LEN],
}

impl<'d> OtaSlots<'d> {
    pub fn new(flash: FlashStorage<'d>) -> Self {
        Self {
            flash,
            buffer: [0; PARTITION_TABLE_MAX_LEN],
        }
    }
}

fn slot_of(entry: &PartitionEntry<'_>) -> Option<Slot> {
    let index = match entry.partition_type() {
        PartitionType::App(AppPartitionSubType::Ota0) => 0,
        PartitionType::App(AppPartitionSubType::Ota1) => 1,
        _ => return None,
    };
    Some(Slot {
        index,
        address: entry.offset(),
    })
}

impl FirmwareSlots for OtaSlots<'_> {
    fn running(&mut self) -> Option<Slot> {
        let table = partitions::read_partition_table(&mut self.flash, &mut self.buffer).ok()?;
        let booted = table.booted_partition().ok()??;
        slot_of(&booted)
    }

    fn alternate(&mut self) -> Option<Slot> {
        let running = self.running()?;
        let other = if running.index == 0 {
            AppPartitionSubType::Ota1
        } else {
            AppPartitionSubType::Ota0
        };
        let table = partitions::read_partition_table(&mut self.flash, &mut self.buffer).ok()?;
        let entry = table.find_partition(PartitionType::App(other)).ok()??;
        slot_of(&entry)
    }

    fn set_boot(&mut self, slot: Slot) -> Result<(), SlotError> {
        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.buffer).map_err(|e| {
            log::error!("OTA data unreadable: {:?}", e);
            SlotError::SwitchRejected
        })?;

        let wanted = match slot.index {
            0 => AppPartitionSubType::Ota0,
            _ => AppPartitionSubType::Ota1,
        };
        let (_, next) = ota.next_partition().map_err(|_| SlotError::SwitchRejected)?;
        if next != wanted {
            log::warn!("Next OTA partition is {:?}, wanted {:?}", next, wanted);
            return Err(SlotError::SwitchRejected);
        }

        ota.activate_next_partition().map_err(|e| {
            log::error!("Activating slot {} failed: {:?}", slot.index, e);
            SlotError::SwitchRejected
        })?;
        ota.set_current_ota_state(OtaImageState::New)
            .map_err(|_| SlotError::SwitchRejected)?;
        log::info!("Next boot from slot {} at {:#x}", slot.index, slot.address);
        Ok(())
    }
}
