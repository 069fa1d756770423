//! Framebuffer management for the 800x480 monochrome e-paper panel
//!
//! One bit per pixel, eight pixels packed per byte with the leftmost pixel in
//! the most significant bit. Rows are stored top-down, 100 bytes each.
//! A set bit is white, a cleared bit is black (the controller's RAM polarity).
//!
//! The buffer is heap allocated so it does not eat into the stack of the
//! main task.

use alloc::boxed::Box;
use core::convert::Infallible;

use embedded_graphics_core::Pixel;
use embedded_graphics_core::draw_target::DrawTarget;
use embedded_graphics_core::geometry::{OriginDimensions, Size};
use embedded_graphics_core::pixelcolor::BinaryColor;

/// Display width in pixels
pub const WIDTH: u32 = 800;
/// Display height in pixels
pub const HEIGHT: u32 = 480;
/// Bytes per framebuffer row
pub const ROW_BYTES: usize = WIDTH as usize / 8;
/// Buffer size: 1 bit per pixel
pub const BUFFER_SIZE: usize = ROW_BYTES * HEIGHT as usize;

/// Packed byte value for eight white pixels
pub const WHITE_BYTE: u8 = 0xFF;
/// Packed byte value for eight black pixels
pub const BLACK_BYTE: u8 = 0x00;

/// Framebuffer for the 800x480 1-bit display
pub struct Framebuffer {
    buffer: Box<[u8; BUFFER_SIZE]>,
}

impl Framebuffer {
    /// Create a new framebuffer initialized to white
    pub fn new() -> Self {
        Self {
            buffer: Box::new([WHITE_BYTE; BUFFER_SIZE]),
        }
    }

    /// Clear the entire framebuffer to white or black
    pub fn clear(&mut self, white: bool) {
        self.buffer.fill(if white { WHITE_BYTE } else { BLACK_BYTE });
    }

    /// Get the raw buffer slice for sending to the display
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..]
    }

    /// Get mutable access to the raw buffer
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer[..]
    }

    /// Borrow one packed row
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * ROW_BYTES;
        &self.buffer[start..start + ROW_BYTES]
    }

    /// Borrow one packed row mutably
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * ROW_BYTES;
        &mut self.buffer[start..start + ROW_BYTES]
    }

    /// Read a pixel; `true` means white. Out of range reads as white.
    pub fn is_white(&self, x: u32, y: u32) -> bool {
        if x >= WIDTH || y >= HEIGHT {
            return true;
        }
        let byte = self.buffer[y as usize * ROW_BYTES + x as usize / 8];
        byte & (0x80 >> (x % 8)) != 0
    }

    /// Write a single pixel at (x, y)
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, white: bool) {
        if x >= WIDTH || y >= HEIGHT {
            return;
        }

        let idx = y as usize * ROW_BYTES + x as usize / 8;
        let mask = 0x80 >> (x % 8);
        if white {
            self.buffer[idx] |= mask;
        } else {
            self.buffer[idx] &= !mask;
        }
    }

    /// Fill a rectangular region
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, white: bool) {
        for row in y..(y + height).min(HEIGHT) {
            for col in x..(x + width).min(WIDTH) {
                self.set_pixel(col, row, white);
            }
        }
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Size::new(WIDTH, HEIGHT)
    }
}

/// `BinaryColor::On` draws ink (black), `Off` draws paper (white).
impl DrawTarget for Framebuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            self.set_pixel(point.x as u32, point.y as u32, color == BinaryColor::Off);
        }
        Ok(())
    }
}
