//! Command definitions for the SSD1677 display controller

/// Display commands
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
pub enum Command {
    /// Driver Output Control (gate count and scan direction)
    DriverOutput = 0x01,
    /// Booster Soft Start Control
    BoosterSoftStart = 0x0C,
    /// Deep Sleep Mode
    DeepSleep = 0x10,
    /// Data Entry Mode (RAM address increment direction)
    DataEntryMode = 0x11,
    /// Software Reset
    SoftReset = 0x12,
    /// Temperature Sensor Selection
    TempSensor = 0x18,
    /// Master Activation (start the update sequence)
    MasterActivation = 0x20,
    /// Display Update Control 1
    UpdateControl1 = 0x21,
    /// Display Update Control 2 (update sequence selection)
    UpdateControl2 = 0x22,
    /// Write Black/White RAM
    WriteRamBw = 0x24,
    /// Write Red RAM (holds the previous frame for differential updates)
    WriteRamRed = 0x26,
    /// Border Waveform Control
    BorderWaveform = 0x3C,
    /// Set RAM X Address Start/End
    RamXRange = 0x44,
    /// Set RAM Y Address Start/End
    RamYRange = 0x45,
    /// Set RAM X Address Counter
    RamXCounter = 0x4E,
    /// Set RAM Y Address Counter
    RamYCounter = 0x4F,
}

impl Command {
    /// Get the command address byte
    #[inline]
    pub fn addr(self) -> u8 {
        self as u8
    }
}

/// Update sequence: clock, analog, temperature load, full waveform, power off
pub const SEQUENCE_FULL: u8 = 0xF7;
/// Update sequence: differential waveform against the red RAM, no temperature reload
pub const SEQUENCE_FAST: u8 = 0xFC;
/// Deep sleep mode 1 (RAM retained)
pub const DEEP_SLEEP_MODE_1: u8 = 0x01;
