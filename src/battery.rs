//! Battery voltage reporting and the boot-menu battery indicator
//!
//! The cell is sampled through a resistor divider on an ADC pin. The voltage
//! goes to the server in the `Battery-Voltage` header with one decimal, and
//! the boot menu draws it as a horizontal battery icon.

use core::fmt::Write as FmtWrite;

use heapless::String;

use crate::framebuffer::Framebuffer;

/// Battery icon dimensions
pub const BATTERY_WIDTH: u32 = 48;
pub const BATTERY_HEIGHT: u32 = 24;

/// Li-ion cell considered empty / full for the indicator
const CELL_EMPTY_V: f32 = 3.3;
const CELL_FULL_V: f32 = 4.2;

/// Source of battery voltage samples
pub trait Battery {
    /// Cell voltage in volts, `None` if it could not be sampled
    fn voltage(&mut self) -> Option<f32>;
}

/// Format a voltage for the request header: one decimal, "0.0" if unknown
pub fn format_voltage(volts: Option<f32>) -> String<8> {
    let mut out = String::new();
    let volts = volts.filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(0.0);
    let _ = write!(out, "{:.1}", volts);
    out
}

/// Convert an ADC reading in millivolts to cell volts through a divider
/// with ratio `divider` (cell voltage / pin voltage)
pub fn volts_from_adc_mv(pin_mv: u32, divider: f32) -> f32 {
    pin_mv as f32 * divider / 1000.0
}

/// Rough state of charge from cell voltage, linear between empty and full
pub fn percentage_from_volts(volts: f32) -> u8 {
    let fraction = (volts - CELL_EMPTY_V) / (CELL_FULL_V - CELL_EMPTY_V);
    (fraction.clamp(0.0, 1.0) * 100.0 + 0.5) as u8
}

/// Draw a battery icon with fill level at (x, y), tip on the right
pub fn draw_battery(fb: &mut Framebuffer, x: u32, y: u32, percentage: u8) {
    let body_width: u32 = 42;
    let body_height: u32 = BATTERY_HEIGHT;

    // Outline (2px border) and white interior
    for dx in 0..body_width {
        for dy in 0..body_height {
            let is_border = dy < 2 || dy >= body_height - 2 || dx < 2 || dx >= body_width - 2;
            fb.set_pixel(x + dx, y + dy, !is_border);
        }
    }

    // Tip (positive terminal)
    let tip_x = body_width;
    let tip_width: u32 = BATTERY_WIDTH - body_width;
    let tip_height: u32 = 12;
    let tip_y_start = (body_height - tip_height) / 2;
    for dx in tip_x..(tip_x + tip_width) {
        for dy in tip_y_start..(tip_y_start + tip_height) {
            let is_border =
                dy < tip_y_start + 2 || dy >= tip_y_start + tip_height - 2 || dx >= tip_x + tip_width - 2;
            fb.set_pixel(x + dx, y + dy, !is_border);
        }
    }

    // Fill from left to right
    let fill_max_width = body_width - 8;
    let fill_width = fill_max_width * percentage.min(100) as u32 / 100;
    fb.fill_rect(x + 4, y + 4, fill_width, body_height - 8, false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_voltage() {
        assert_eq!(format_voltage(Some(3.87)), "3.9");
        assert_eq!(format_voltage(Some(4.0)), "4.0");
        assert_eq!(format_voltage(None), "0.0");
        assert_eq!(format_voltage(Some(f32::NAN)), "0.0");
    }

    #[test]
    fn test_volts_from_adc() {
        let volts = volts_from_adc_mv(2000, 2.0);
        assert!((volts - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_percentage_from_volts() {
        assert_eq!(percentage_from_volts(3.0), 0);
        assert_eq!(percentage_from_volts(3.3), 0);
        assert_eq!(percentage_from_volts(3.75), 50);
        assert_eq!(percentage_from_volts(4.2), 100);
        assert_eq!(percentage_from_volts(4.35), 100);
    }

    #[test]
    fn test_draw_battery_fill() {
        let mut empty = Framebuffer::new();
        draw_battery(&mut empty, 10, 10, 0);
        let mut full = Framebuffer::new();
        draw_battery(&mut full, 10, 10, 100);

        // Interior is white when empty, black when full
        assert!(empty.is_white(10 + 20, 10 + 12));
        assert!(!full.is_white(10 + 20, 10 + 12));
        // Border is black either way
        assert!(!empty.is_white(10, 10));
        assert!(!full.is_white(10, 10));
    }
}
