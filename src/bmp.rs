//! Decoder for 800x480 1-bit BMP files
//!
//! Accepts exactly one shape of bitmap: `BM` signature, 40-byte
//! BITMAPINFOHEADER, one plane, no compression, 1 bit per pixel, 800x480
//! stored bottom-up, and a two-entry palette. Rows are copied straight into
//! the framebuffer with at most a bitwise inversion, so whatever the palette
//! order a set bit always ends up meaning white.
//!
//! Validation finishes before the framebuffer is touched: a rejected file
//! leaves it exactly as it was.

use thiserror::Error;

use crate::display::{Display, RefreshMode};
use crate::framebuffer::{Framebuffer, HEIGHT, ROW_BYTES, WIDTH};

/// BITMAPFILEHEADER (14) + BITMAPINFOHEADER (40)
pub const HEADER_SIZE: usize = 54;
const INFO_HEADER_SIZE: u32 = 40;
const PALETTE_OFFSET: usize = HEADER_SIZE;
const PALETTE_SIZE: usize = 8;
/// Source row stride, padded to a multiple of 4 bytes
pub const SOURCE_ROW_BYTES: usize = (WIDTH as usize).div_ceil(32) * 4;

/// Why a bitmap was rejected
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BmpError {
    #[error("bad BMP signature")]
    InvalidSignature,
    #[error("BMP truncated or offsets out of range")]
    InvalidSize,
    #[error("unsupported BMP header, planes or compression")]
    InvalidFormat,
    #[error("BMP must be 1 bit per pixel")]
    InvalidBitDepth,
    #[error("BMP must be 800x480")]
    InvalidDimensions,
    #[error("top-down BMP not supported")]
    UnsupportedOrientation,
    #[error("BMP palette missing")]
    InvalidPalette,
    #[error("framebuffer unavailable")]
    FramebufferUnavailable,
}

fn le16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn le32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Palette entry counts as light when R+G+B is above the midpoint
fn is_light(bgr: &[u8]) -> bool {
    let sum = bgr[0] as u16 + bgr[1] as u16 + bgr[2] as u16;
    sum > 255 * 3 / 2
}

/// Layout facts gathered during validation
struct Layout {
    pixel_offset: usize,
    invert: bool,
}

fn validate(data: &[u8]) -> Result<Layout, BmpError> {
    if data.len() < HEADER_SIZE {
        return Err(BmpError::InvalidSize);
    }
    if &data[0..2] != b"BM" {
        return Err(BmpError::InvalidSignature);
    }
    let pixel_offset = le32(data, 10) as usize;
    if pixel_offset >= data.len() {
        return Err(BmpError::InvalidSize);
    }
    if le32(data, 14) != INFO_HEADER_SIZE {
        return Err(BmpError::InvalidFormat);
    }

    let width = le32(data, 18) as i32;
    let height = le32(data, 22) as i32;
    let planes = le16(data, 26);
    let bit_count = le16(data, 28);
    let compression = le32(data, 30);

    if planes != 1 || compression != 0 {
        return Err(BmpError::InvalidFormat);
    }
    if bit_count != 1 {
        return Err(BmpError::InvalidBitDepth);
    }
    if width != WIDTH as i32 || height != HEIGHT as i32 {
        if width == WIDTH as i32 && height == -(HEIGHT as i32) {
            return Err(BmpError::UnsupportedOrientation);
        }
        return Err(BmpError::InvalidDimensions);
    }

    if data.len() < PALETTE_OFFSET + PALETTE_SIZE {
        return Err(BmpError::InvalidPalette);
    }
    let palette = &data[PALETTE_OFFSET..PALETTE_OFFSET + PALETTE_SIZE];
    let invert = is_light(&palette[0..3]) && !is_light(&palette[4..7]);

    let pixel_bytes = SOURCE_ROW_BYTES * HEIGHT as usize;
    if pixel_offset + pixel_bytes > data.len() {
        return Err(BmpError::InvalidSize);
    }

    Ok(Layout {
        pixel_offset,
        invert,
    })
}

/// Validate `data` and copy its pixels into `framebuffer`.
///
/// Source rows are bottom-up; framebuffer row `r` comes from source row
/// `HEIGHT - 1 - r`.
pub fn decode_into(data: &[u8], framebuffer: Option<&mut Framebuffer>) -> Result<(), BmpError> {
    let layout = validate(data)?;
    let framebuffer = framebuffer.ok_or(BmpError::FramebufferUnavailable)?;

    let pixels = &data[layout.pixel_offset..];
    for src_row in 0..HEIGHT {
        let src_start = src_row as usize * SOURCE_ROW_BYTES;
        let src = &pixels[src_start..src_start + ROW_BYTES];
        let dst = framebuffer.row_mut(HEIGHT - 1 - src_row);
        if layout.invert {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = !s;
            }
        } else {
            dst.copy_from_slice(src);
        }
    }

    Ok(())
}

/// Decode `data` into the display's framebuffer and show it with a fast
/// refresh. Nothing is refreshed when decoding fails.
pub fn render_bmp<D: Display + ?Sized>(data: &[u8], display: &mut D) -> Result<(), BmpError> {
    decode_into(data, display.framebuffer())?;
    log::info!("Rendered {} byte bitmap", data.len());
    display.refresh(RefreshMode::Fast);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framebuffer::{BLACK_BYTE, WHITE_BYTE};
    use crate::testing::{BLACK, FakeDisplay, WHITE, bmp_image};

    /// Framebuffer pre-filled with a pattern so "untouched" is observable
    fn marked() -> Framebuffer {
        let mut fb = Framebuffer::new();
        for (i, b) in fb.as_mut_slice().iter_mut().enumerate() {
            *b = i as u8;
        }
        fb
    }

    fn assert_untouched(fb: &Framebuffer) {
        assert!(fb.as_slice().iter().enumerate().all(|(i, &b)| b == i as u8));
    }

    fn rejects(data: &[u8], expected: BmpError) {
        let mut fb = marked();
        assert_eq!(decode_into(data, Some(&mut fb)), Err(expected));
        assert_untouched(&fb);
    }

    #[test]
    fn test_valid_image_size() {
        let data = bmp_image([BLACK, WHITE], |_| 0);
        assert_eq!(data.len(), 62 + 48_000);
        assert_eq!(SOURCE_ROW_BYTES, ROW_BYTES);
    }

    #[test]
    fn test_each_violation_rejected_untouched() {
        let good = bmp_image([BLACK, WHITE], |_| 0xAA);

        rejects(&good[..53], BmpError::InvalidSize);

        let mut data = good.clone();
        data[0] = b'P';
        rejects(&data, BmpError::InvalidSignature);

        let mut data = good.clone();
        data[10..14].copy_from_slice(&(good.len() as u32).to_le_bytes());
        rejects(&data, BmpError::InvalidSize);

        let mut data = good.clone();
        data[14..18].copy_from_slice(&124u32.to_le_bytes());
        rejects(&data, BmpError::InvalidFormat);

        let mut data = good.clone();
        data[26..28].copy_from_slice(&2u16.to_le_bytes());
        rejects(&data, BmpError::InvalidFormat);

        let mut data = good.clone();
        data[30..34].copy_from_slice(&1u32.to_le_bytes());
        rejects(&data, BmpError::InvalidFormat);

        let mut data = good.clone();
        data[28..30].copy_from_slice(&8u16.to_le_bytes());
        rejects(&data, BmpError::InvalidBitDepth);

        let mut data = good.clone();
        data[18..22].copy_from_slice(&640i32.to_le_bytes());
        rejects(&data, BmpError::InvalidDimensions);

        let mut data = good.clone();
        data[22..26].copy_from_slice(&(-480i32).to_le_bytes());
        rejects(&data, BmpError::UnsupportedOrientation);

        let mut data = good.clone();
        data[22..26].copy_from_slice(&(-400i32).to_le_bytes());
        rejects(&data, BmpError::InvalidDimensions);

        rejects(&good[..good.len() - 1], BmpError::InvalidSize);
    }

    #[test]
    fn test_palette_must_fit() {
        // Headers only, with the pixel offset pointing inside the palette
        let mut data = bmp_image([BLACK, WHITE], |_| 0)[..58].to_vec();
        data[10..14].copy_from_slice(&54u32.to_le_bytes());
        rejects(&data, BmpError::InvalidPalette);
    }

    #[test]
    fn test_missing_framebuffer() {
        let data = bmp_image([BLACK, WHITE], |_| 0);
        assert_eq!(decode_into(&data, None), Err(BmpError::FramebufferUnavailable));
    }

    #[test]
    fn test_palette_swap_is_self_cancelling() {
        let pattern = |row: u32| (row as u8).wrapping_mul(37) ^ 0x5A;
        let light_first = bmp_image([WHITE, BLACK], |row| !pattern(row));
        let dark_first = bmp_image([BLACK, WHITE], pattern);

        let mut a = Framebuffer::new();
        let mut b = Framebuffer::new();
        decode_into(&light_first, Some(&mut a)).unwrap();
        decode_into(&dark_first, Some(&mut b)).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
        // Source row 0 is the bottom of the picture
        assert!(a.row(HEIGHT - 1).iter().all(|&v| v == pattern(0)));
    }

    #[test]
    fn test_light_first_palette_inverts() {
        let data = bmp_image([WHITE, BLACK], |_| BLACK_BYTE);
        let mut fb = Framebuffer::new();
        fb.clear(false);
        decode_into(&data, Some(&mut fb)).unwrap();
        // All-zero bits index the white palette entry
        assert!(fb.as_slice().iter().all(|&b| b == WHITE_BYTE));
    }

    #[test]
    fn test_rows_flipped() {
        let data = bmp_image([BLACK, WHITE], |row| match row {
            0 => 0x00,
            r if r == HEIGHT - 1 => 0xFF,
            _ => 0x0F,
        });
        let mut fb = Framebuffer::new();
        decode_into(&data, Some(&mut fb)).unwrap();
        assert!(fb.row(0).iter().all(|&b| b == 0xFF));
        assert!(fb.row(HEIGHT - 1).iter().all(|&b| b == 0x00));
        assert!(fb.row(1).iter().all(|&b| b == 0x0F));
    }

    #[test]
    fn test_padding_bytes_ignored() {
        let mut data = bmp_image([BLACK, WHITE], |_| 0xFF);
        // A non-zero pixel offset past the palette is honoured
        data.splice(62..62, [0xEE; 16]);
        data[10..14].copy_from_slice(&78u32.to_le_bytes());
        let mut fb = Framebuffer::new();
        fb.clear(false);
        decode_into(&data, Some(&mut fb)).unwrap();
        assert!(fb.as_slice().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_render_refreshes_fast_only_on_success() {
        let mut display = FakeDisplay::new();
        let data = bmp_image([BLACK, WHITE], |_| 0);
        render_bmp(&data, &mut display).unwrap();
        assert_eq!(display.refreshes, [RefreshMode::Fast]);

        let mut display = FakeDisplay::new();
        assert_eq!(render_bmp(&data[..100], &mut display), Err(BmpError::InvalidSize));
        assert!(display.refreshes.is_empty());

        let mut display = FakeDisplay::without_framebuffer();
        assert_eq!(
            render_bmp(&data, &mut display),
            Err(BmpError::FramebufferUnavailable)
        );
        assert!(display.refreshes.is_empty());
    }
}
