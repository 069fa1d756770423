//! Front button input
//!
//! The buttons sit on a resistor ladder read through one ADC channel; each
//! button pulls the pin to a distinct level. Only two are used here: Confirm
//! and Back.

/// Buttons the update cycle reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Confirm,
    Back,
}

/// Source of edge-triggered button presses
pub trait Input {
    /// Next press since the last poll, if any. Holding a button yields one
    /// press.
    fn poll(&mut self) -> Option<Button>;
}

/// Raw 12-bit ADC windows for the ladder positions
const LADDER_CONFIRM: (u16, u16) = (2300, 3000);
const LADDER_BACK: (u16, u16) = (3200, 3700);

/// Map a raw ladder reading to the button it represents
pub fn decode_ladder(raw: u16) -> Option<Button> {
    let within = |(lo, hi): (u16, u16)| (lo..=hi).contains(&raw);
    if within(LADDER_CONFIRM) {
        Some(Button::Confirm)
    } else if within(LADDER_BACK) {
        Some(Button::Back)
    } else {
        None
    }
}

/// Poll a non-blocking conversion at most `attempts` times
pub fn poll_conversion<T, E>(attempts: u32, mut read: impl FnMut() -> Result<T, E>) -> Option<T> {
    (0..attempts).find_map(|_| read().ok())
}

/// Turns sampled button levels into press events
#[derive(Debug, Default)]
pub struct EdgeDetector {
    previous: Option<Button>,
}

impl EdgeDetector {
    pub const fn new() -> Self {
        Self { previous: None }
    }

    /// Feed the currently held button; returns it only on the sample where
    /// it first appears
    pub fn update(&mut self, level: Option<Button>) -> Option<Button> {
        let pressed = match level {
            Some(button) if self.previous != Some(button) => Some(button),
            _ => None,
        };
        self.previous = level;
        pressed
    }
}
