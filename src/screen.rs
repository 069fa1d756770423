//! Full-screen status pages: boot menu and the error screens
//!
//! Each screen clears the framebuffer to white and draws centred text with
//! the built-in mono fonts. Layout is fixed for the 800x480 panel.

use alloc::format;
use alloc::string::String;

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::{FONT_6X13, FONT_10X20};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Alignment, Text};

use crate::battery::{self, BATTERY_WIDTH};
use crate::config::CONFIG_PATH;
use crate::framebuffer::{Framebuffer, HEIGHT, WIDTH};

const CENTER_X: i32 = WIDTH as i32 / 2;
const CENTER_Y: i32 = HEIGHT as i32 / 2;

/// Contents of the boot menu page
#[derive(Debug, Clone, PartialEq)]
pub struct MenuView {
    /// Label of the confirm action ("Start" or "Retry")
    pub confirm_label: &'static str,
    /// Seconds left before auto-start, if auto-start is armed
    pub countdown_s: Option<u32>,
    /// Why configuration failed to load
    pub config_error: Option<String>,
    /// Battery voltage, if it could be sampled
    pub battery_volts: Option<f32>,
    /// Firmware version string
    pub version: &'static str,
}

/// A page the orchestrator can put on the panel
#[derive(Debug, Clone, PartialEq)]
pub enum Screen<'a> {
    Menu(&'a MenuView),
    NoSdCard,
    ConfigMissing,
    WifiFailed { ssid: &'a str },
    ApiError { status: u16 },
    Error { message: &'a str },
}

impl Screen<'_> {
    /// Draw the page into `fb`, replacing whatever was there
    pub fn render(&self, fb: &mut Framebuffer) {
        fb.clear(true);
        match self {
            Screen::Menu(view) => draw_menu(fb, view),
            Screen::NoSdCard => {
                title(fb, CENTER_Y - 32);
                line(fb, "Insert SD Card", CENTER_Y + 8);
            }
            Screen::ConfigMissing => {
                title(fb, CENTER_Y - 48);
                line(fb, "Config file missing", CENTER_Y - 8);
                line(fb, &format!("Expected: {}", CONFIG_PATH), CENTER_Y + 24);
            }
            Screen::WifiFailed { ssid } => {
                title(fb, CENTER_Y - 24);
                line(fb, &format!("WiFi failed: {}", ssid), CENTER_Y + 16);
            }
            Screen::ApiError { status } => {
                title(fb, CENTER_Y - 24);
                line(fb, &format!("API Error: {}", status), CENTER_Y + 16);
            }
            Screen::Error { message } => {
                title(fb, CENTER_Y - 24);
                line(fb, message, CENTER_Y + 16);
            }
        }
    }
}

fn title(fb: &mut Framebuffer, y: i32) {
    line(fb, "ERROR", y);
}

fn line(fb: &mut Framebuffer, text: &str, y: i32) {
    let style = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
    Text::with_alignment(text, Point::new(CENTER_X, y), style, Alignment::Center)
        .draw(fb)
        .ok();
}

fn small(fb: &mut Framebuffer, text: &str, y: i32) {
    small_at(fb, text, CENTER_X, y);
}

fn small_at(fb: &mut Framebuffer, text: &str, x: i32, y: i32) {
    let style = MonoTextStyle::new(&FONT_6X13, BinaryColor::On);
    Text::with_alignment(text, Point::new(x, y), style, Alignment::Center)
        .draw(fb)
        .ok();
}

fn draw_menu(fb: &mut Framebuffer, view: &MenuView) {
    line(fb, "Dashboard Terminal", 80);
    Rectangle::new(Point::new(200, 96), Size::new(400, 2))
        .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
        .draw(fb)
        .ok();

    line(fb, &format!("[Confirm] {}", view.confirm_label), CENTER_Y - 40);
    line(fb, "[Back] Exit", CENTER_Y);

    if let Some(seconds) = view.countdown_s {
        small(fb, &format!("Starting in {}s", seconds), CENTER_Y + 48);
    }
    if let Some(err) = &view.config_error {
        small(fb, &format!("Config error: {}", err), CENTER_Y + 72);
    }

    if let Some(volts) = view.battery_volts {
        battery::draw_battery(fb, WIDTH - BATTERY_WIDTH - 16, 16, battery::percentage_from_volts(volts));
        small_at(fb, &format!("{:.1}V", volts), WIDTH as i32 - 40, 56);
    }
    small(fb, &format!("v{}", view.version), HEIGHT as i32 - 24);
}
