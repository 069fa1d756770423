//! Panel abstraction used by the update cycle
//!
//! The orchestrator only needs two things from the panel: a writable
//! framebuffer matching the panel geometry and a refresh trigger. Screens are
//! drawn through the same framebuffer.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;

pub use crate::epd::RefreshMode;
use crate::epd::Ssd1677;
use crate::framebuffer::Framebuffer;
use crate::screen::Screen;

/// Framebuffer owner plus refresh trigger
pub trait Display {
    /// Writable framebuffer, `None` if the panel could not provide one
    fn framebuffer(&mut self) -> Option<&mut Framebuffer>;

    /// Push the framebuffer to the panel
    fn refresh(&mut self, mode: RefreshMode);

    /// Draw a status page and push it with a full refresh
    fn show(&mut self, screen: &Screen<'_>) {
        draw_screen(self, screen);
    }

    /// Put the panel into its lowest power state before the MCU sleeps
    fn power_down(&mut self) {}
}

/// Render `screen` into the display's framebuffer and push it with a full refresh
pub fn draw_screen<D: Display + ?Sized>(display: &mut D, screen: &Screen<'_>) {
    if let Some(fb) = display.framebuffer() {
        screen.render(fb);
    }
    display.refresh(RefreshMode::Full);
}

/// [`Display`] backed by the SSD1677 driver
pub struct EpdDisplay<SPI, BUSY, DC, RST, DELAY> {
    epd: Ssd1677<SPI, BUSY, DC, RST>,
    framebuffer: Framebuffer,
    delay: DELAY,
}

impl<SPI, BUSY, DC, RST, DELAY> EpdDisplay<SPI, BUSY, DC, RST, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
    DELAY: DelayNs,
{
    pub fn new(epd: Ssd1677<SPI, BUSY, DC, RST>, delay: DELAY) -> Self {
        Self {
            epd,
            framebuffer: Framebuffer::new(),
            delay,
        }
    }
}

impl<SPI, BUSY, DC, RST, DELAY> Display for EpdDisplay<SPI, BUSY, DC, RST, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
    DELAY: DelayNs,
{
    fn framebuffer(&mut self) -> Option<&mut Framebuffer> {
        Some(&mut self.framebuffer)
    }

    fn refresh(&mut self, mode: RefreshMode) {
        log::debug!("EPD refresh ({:?})", mode);
        if let Err(e) = self
            .epd
            .display(self.framebuffer.as_slice(), mode, &mut self.delay)
        {
            log::error!("EPD refresh failed: {:?}", e);
        }
    }

    fn power_down(&mut self) {
        if let Err(e) = self.epd.sleep(&mut self.delay) {
            log::warn!("EPD sleep failed: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDisplay;

    #[test]
    fn test_show_renders_then_full_refresh() {
        let mut display = FakeDisplay::new();
        display.show(&Screen::ApiError { status: 500 });
        assert_eq!(display.refreshes, [RefreshMode::Full]);
        assert!(display.shown.iter().any(|s| s == "ApiError { status: 500 }"));
        assert!(
            display
                .framebuffer
                .as_ref()
                .is_some_and(|fb| fb.as_slice().iter().any(|&b| b != 0xFF))
        );
    }

    #[test]
    fn test_show_without_framebuffer_still_refreshes() {
        let mut display = FakeDisplay::without_framebuffer();
        display.show(&Screen::NoSdCard);
        assert_eq!(display.refreshes, [RefreshMode::Full]);
    }
}
