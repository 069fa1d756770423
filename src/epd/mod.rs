//! Driver for the SSD1677 controller driving a 800x480 black/white e-paper panel.
//!
//! The controller's black/white RAM takes the framebuffer as-is (set bit is
//! white). The red RAM holds the previously shown frame so a fast update can
//! drive only the pixels that changed.

mod command;

use command::{Command, DEEP_SLEEP_MODE_1, SEQUENCE_FAST, SEQUENCE_FULL};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;

use crate::framebuffer::{BUFFER_SIZE, HEIGHT, WIDTH};

/// Longest a single update may hold BUSY before we give up waiting
const BUSY_TIMEOUT_MS: u32 = 30_000;
const BUSY_POLL_MS: u32 = 10;

/// Waveform used for a panel update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Full waveform, flashes the panel and clears ghosting
    #[default]
    Full,
    /// Differential waveform against the previous frame
    Fast,
}

/// Driver for the 800x480 SSD1677 panel
pub struct Ssd1677<SPI, BUSY, DC, RST> {
    spi: SPI,
    busy: BUSY,
    dc: DC,
    rst: RST,
    /// Red RAM holds a valid previous frame
    has_base: bool,
}

impl<SPI, BUSY, DC, RST> Ssd1677<SPI, BUSY, DC, RST>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
{
    /// Create a new display driver instance.
    ///
    /// Performs hardware reset and initialization.
    pub fn new<DELAY: DelayNs>(
        spi: SPI,
        busy: BUSY,
        dc: DC,
        rst: RST,
        delay: &mut DELAY,
    ) -> Result<Self, SPI::Error> {
        let mut epd = Self {
            spi,
            busy,
            dc,
            rst,
            has_base: false,
        };

        epd.hardware_reset(delay);
        epd.init(delay)?;

        Ok(epd)
    }

    fn hardware_reset<DELAY: DelayNs>(&mut self, delay: &mut DELAY) {
        let _ = self.rst.set_high();
        delay.delay_ms(10);
        let _ = self.rst.set_low();
        delay.delay_ms(10);
        let _ = self.rst.set_high();
        delay.delay_ms(10);
    }

    /// Wait for the controller to become idle (BUSY pin low)
    pub fn wait_until_idle<DELAY: DelayNs>(&mut self, delay: &mut DELAY) {
        let mut waited = 0;
        // BUSY is active high on SSD16xx controllers
        while self.busy.is_high().unwrap_or(false) {
            if waited >= BUSY_TIMEOUT_MS {
                log::warn!("EPD busy for {}ms, continuing", waited);
                return;
            }
            delay.delay_ms(BUSY_POLL_MS);
            waited += BUSY_POLL_MS;
        }
    }

    fn send_command(&mut self, command: Command) -> Result<(), SPI::Error> {
        let _ = self.dc.set_low();
        self.spi.write(&[command.addr()])
    }

    fn send_data(&mut self, data: &[u8]) -> Result<(), SPI::Error> {
        let _ = self.dc.set_high();
        self.spi.write(data)
    }

    fn cmd_with_data(&mut self, command: Command, data: &[u8]) -> Result<(), SPI::Error> {
        self.send_command(command)?;
        self.send_data(data)
    }

    fn init<DELAY: DelayNs>(&mut self, delay: &mut DELAY) -> Result<(), SPI::Error> {
        self.wait_until_idle(delay);
        self.send_command(Command::SoftReset)?;
        delay.delay_ms(10);
        self.wait_until_idle(delay);

        // Internal temperature sensor
        self.cmd_with_data(Command::TempSensor, &[0x80])?;

        self.cmd_with_data(Command::BoosterSoftStart, &[0xAE, 0xC7, 0xC3, 0xC0, 0x40])?;

        // 480 gates, scan from G0
        let gates = (HEIGHT - 1) as u16;
        self.cmd_with_data(
            Command::DriverOutput,
            &[gates as u8, (gates >> 8) as u8, 0x02],
        )?;

        self.cmd_with_data(Command::BorderWaveform, &[0x01])?;

        // X increment, Y increment, address counter follows X
        self.cmd_with_data(Command::DataEntryMode, &[0x03])?;

        // Normal BW RAM, inverse red RAM content off
        self.cmd_with_data(Command::UpdateControl1, &[0x00, 0x00])?;

        self.set_window()?;
        Ok(())
    }

    fn set_window(&mut self) -> Result<(), SPI::Error> {
        let x_end = (WIDTH - 1) as u16;
        let y_end = (HEIGHT - 1) as u16;
        self.cmd_with_data(
            Command::RamXRange,
            &[0x00, 0x00, x_end as u8, (x_end >> 8) as u8],
        )?;
        self.cmd_with_data(
            Command::RamYRange,
            &[0x00, 0x00, y_end as u8, (y_end >> 8) as u8],
        )?;
        self.reset_counters()
    }

    fn reset_counters(&mut self) -> Result<(), SPI::Error> {
        self.cmd_with_data(Command::RamXCounter, &[0x00, 0x00])?;
        self.cmd_with_data(Command::RamYCounter, &[0x00, 0x00])
    }

    fn write_ram(&mut self, ram: Command, buffer: &[u8]) -> Result<(), SPI::Error> {
        self.reset_counters()?;
        self.cmd_with_data(ram, buffer)
    }

    fn activate<DELAY: DelayNs>(&mut self, sequence: u8, delay: &mut DELAY) -> Result<(), SPI::Error> {
        self.cmd_with_data(Command::UpdateControl2, &[sequence])?;
        self.send_command(Command::MasterActivation)?;
        self.wait_until_idle(delay);
        Ok(())
    }

    /// Display a raw buffer (must be BUFFER_SIZE bytes, 1bpp packed).
    ///
    /// A fast update with no previous frame on the controller falls back to
    /// a full update.
    pub fn display<DELAY: DelayNs>(
        &mut self,
        buffer: &[u8],
        mode: RefreshMode,
        delay: &mut DELAY,
    ) -> Result<(), SPI::Error> {
        debug_assert_eq!(buffer.len(), BUFFER_SIZE);

        let mode = if self.has_base { mode } else { RefreshMode::Full };
        match mode {
            RefreshMode::Full => {
                self.write_ram(Command::WriteRamBw, buffer)?;
                self.write_ram(Command::WriteRamRed, buffer)?;
                self.activate(SEQUENCE_FULL, delay)?;
            }
            RefreshMode::Fast => {
                self.write_ram(Command::WriteRamBw, buffer)?;
                self.activate(SEQUENCE_FAST, delay)?;
                // New baseline for the next differential update
                self.write_ram(Command::WriteRamRed, buffer)?;
            }
        }
        self.has_base = true;
        Ok(())
    }

    /// Check if display is still busy refreshing.
    pub fn is_busy(&mut self) -> bool {
        self.busy.is_high().unwrap_or(false)
    }

    /// Put the display into deep sleep; RAM content is kept while powered
    pub fn sleep<DELAY: DelayNs>(&mut self, delay: &mut DELAY) -> Result<(), SPI::Error> {
        self.cmd_with_data(Command::DeepSleep, &[DEEP_SLEEP_MODE_1])?;
        delay.delay_ms(100);
        Ok(())
    }

    /// Wake the display from sleep (requires full re-init)
    pub fn wake_up<DELAY: DelayNs>(&mut self, delay: &mut DELAY) -> Result<(), SPI::Error> {
        self.hardware_reset(delay);
        self.init(delay)
    }
}
