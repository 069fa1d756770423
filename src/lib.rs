#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod api;
pub mod battery;
pub mod bmp;
pub mod clock;
pub mod config;
pub mod display;
pub mod epd;
pub mod framebuffer;
pub mod http;
pub mod input;
pub mod lifecycle;
pub mod menu;
pub mod power;
pub mod screen;
pub mod storage;
pub mod wifi;

#[cfg(feature = "hardware")]
pub mod board;

#[cfg(test)]
mod testing;
