//! ESP32-C3 board support for the terminal
//!
//! Pin map:
//! - Shared SPI bus: SCLK=GPIO8, MOSI=GPIO10, MISO=GPIO7
//! - E-paper: CS=GPIO21, DC=GPIO4, RST=GPIO5, BUSY=GPIO6
//! - SD card: CS=GPIO12
//! - Battery divider: GPIO0 (ADC1)
//! - Button ladder: GPIO1 (ADC1)
//! - Power button: GPIO3, active low, deep sleep wake source

pub mod analog;
pub mod net;
pub mod system;

pub use analog::{AdcBattery, AdcButtons, AnalogInputs};
pub use net::{TcpConnector, WifiNetwork};
pub use system::{EmbassyClock, EspPower, OtaSlots};
