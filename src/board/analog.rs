//! ADC-backed buttons and battery monitor
//!
//! Both sit on ADC1 and share one converter through a `RefCell`.

use core::cell::RefCell;

use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcConfig, AdcPin, Attenuation};
use esp_hal::peripherals::{ADC1, GPIO0, GPIO1};

use crate::battery::{Battery, volts_from_adc_mv};
use crate::input::{Button, EdgeDetector, Input, decode_ladder, poll_conversion};

/// Full-scale input at 11 dB attenuation
const ADC_FULL_SCALE_MV: u32 = 2500;
const ADC_MAX: u32 = 4095;
/// Battery sits behind a 1:2 resistor divider
const BATTERY_DIVIDER: f32 = 2.0;
/// Samples averaged per battery reading
const BATTERY_SAMPLES: u32 = 8;
/// Polls before a oneshot conversion counts as failed
const MAX_CONVERSION_POLLS: u32 = 1_000;

pub struct AnalogInputs<'d> {
    adc: Adc<'d, ADC1<'d>, Blocking>,
    ladder: AdcPin<GPIO1<'d>, ADC1<'d>>,
    battery: AdcPin<GPIO0<'d>, ADC1<'d>>,
}

impl<'d> AnalogInputs<'d> {
    pub fn new(adc1: ADC1<'d>, battery_pin: GPIO0<'d>, ladder_pin: GPIO1<'d>) -> Self {
        let mut config = AdcConfig::new();
        let battery = config.enable_pin(battery_pin, Attenuation::_11dB);
        let ladder = config.enable_pin(ladder_pin, Attenuation::_11dB);
        Self {
            adc: Adc::new(adc1, config),
            ladder,
            battery,
        }
    }

    fn read_ladder(&mut self) -> Option<u16> {
        let (adc, pin) = (&mut self.adc, &mut self.ladder);
        poll_conversion(MAX_CONVERSION_POLLS, || adc.read_oneshot(pin))
    }

    fn read_battery(&mut self) -> Option<u16> {
        let (adc, pin) = (&mut self.adc, &mut self.battery);
        poll_conversion(MAX_CONVERSION_POLLS, || adc.read_oneshot(pin))
    }
}

/// Confirm/Back buttons on the resistor ladder
pub struct AdcButtons<'a, 'd> {
    inputs: &'a RefCell<AnalogInputs<'d>>,
    edges: EdgeDetector,
}

impl<'a, 'd> AdcButtons<'a, 'd> {
    pub fn new(inputs: &'a RefCell<AnalogInputs<'d>>) -> Self {
        Self {
            inputs,
            edges: EdgeDetector::new(),
        }
    }
}

impl Input for AdcButtons<'_, '_> {
    fn poll(&mut self) -> Option<Button> {
        let level = self.inputs.borrow_mut().read_ladder().and_then(decode_ladder);
        self.edges.update(level)
    }
}

pub struct AdcBattery<'a, 'd> {
    inputs: &'a RefCell<AnalogInputs<'d>>,
}

impl<'a, 'd> AdcBattery<'a, 'd> {
    pub fn new(inputs: &'a RefCell<AnalogInputs<'d>>) -> Self {
        Self { inputs }
    }
}

impl Battery for AdcBattery<'_, '_> {
    fn voltage(&mut self) -> Option<f32> {
        let mut inputs = self.inputs.borrow_mut();
        let mut total = 0u32;
        for _ in 0..BATTERY_SAMPLES {
            total += inputs.read_battery()? as u32;
        }
        let raw = total / BATTERY_SAMPLES;
        if raw == 0 {
            // Nothing on the divider
            return None;
        }
        let pin_mv = raw * ADC_FULL_SCALE_MV / ADC_MAX;
        Some(volts_from_adc_mv(pin_mv, BATTERY_DIVIDER))
    }
}
