//! Boot menu decision logic
//!
//! The menu offers two actions. Confirm starts an update cycle, or reboots
//! to retry when configuration failed to load. Back leaves for the other
//! firmware slot. With no input the menu starts on its own after a short
//! window, unless configuration failed or auto-start was switched off by a
//! failed cycle; then it gives up after a long window and the device sleeps.

use crate::clock::Clock;
use crate::input::{Button, Input};

/// Interval between input polls
pub const POLL_INTERVAL_MS: u32 = 50;

/// Outcome of the boot menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuDecision {
    /// Run an update cycle
    Start,
    /// Reboot into the same slot to reload configuration
    Retry,
    /// Leave this firmware
    Exit,
    /// Nobody answered and nothing can start automatically
    Unattended,
}

/// One showing of the boot menu
#[derive(Debug, Clone, Copy)]
pub struct BootMenu {
    pub config_ok: bool,
    pub auto_start: bool,
    pub auto_start_ms: u32,
    pub give_up_ms: u32,
}

impl BootMenu {
    /// Whether an idle menu will start a cycle by itself
    pub fn auto_start_armed(&self) -> bool {
        self.config_ok && self.auto_start
    }

    /// Seconds until auto-start, for display
    pub fn countdown_s(&self) -> Option<u32> {
        self.auto_start_armed()
            .then(|| self.auto_start_ms.div_ceil(1000))
    }

    /// Decide from one poll result `elapsed_ms` after the menu appeared
    pub fn on_event(&self, event: Option<Button>, elapsed_ms: u64) -> Option<MenuDecision> {
        match event {
            Some(Button::Back) => Some(MenuDecision::Exit),
            Some(Button::Confirm) if self.config_ok => Some(MenuDecision::Start),
            Some(Button::Confirm) => Some(MenuDecision::Retry),
            None if self.auto_start_armed() && elapsed_ms >= self.auto_start_ms as u64 => {
                Some(MenuDecision::Start)
            }
            None if elapsed_ms >= self.give_up_ms as u64 => Some(MenuDecision::Unattended),
            None => None,
        }
    }

    /// Poll input until a decision is reached
    pub async fn run<I, C>(&self, input: &mut I, clock: &C) -> MenuDecision
    where
        I: Input + ?Sized,
        C: Clock,
    {
        let shown_at = clock.now_ms();
        loop {
            let elapsed = clock.now_ms().saturating_sub(shown_at);
            if let Some(decision) = self.on_event(input.poll(), elapsed) {
                log::info!("Boot menu: {:?} after {}ms", decision, elapsed);
                return decision;
            }
            clock.delay_ms(POLL_INTERVAL_MS).await;
        }
    }
}
