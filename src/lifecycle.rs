//! Update cycle orchestration
//!
//! ```text
//! boot -> BootMenu -> Start -> WifiConnect -> ApiFetch -> NoUpdate ---------> Sleep
//!            |  ^                  |             |     \-> Render -> ok ---> Sleep
//!            |  |                  |             |              \-> failed
//!            |  +---- (interactive) failures ----+--------------------+
//!            +-> Retry -> Restart
//!            +-> Exit  -> SwitchSlot (or Restart when standalone)
//!            +-> Unattended -> Sleep
//! ```
//!
//! Every path ends in a [`DeviceAction`]; the caller executes it. In headless
//! mode the menu is skipped and every failure ends in a sleep.

use alloc::string::{String, ToString};

use crate::api::{self, ApiError, Telemetry};
use crate::battery::Battery;
use crate::bmp::render_bmp;
use crate::clock::Clock;
use crate::config::{Config, ConfigError, DEFAULT_REFRESH_INTERVAL, FW_VERSION};
use crate::display::Display;
use crate::http::Connector;
use crate::input::Input;
use crate::menu::{BootMenu, MenuDecision};
use crate::power::DeviceAction;
use crate::screen::{MenuView, Screen};
use crate::wifi::{self, Network};

/// Whether a person is expected at the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Boot menu first; failures return to it
    Interactive,
    /// No menu; failures sleep and retry on the next wake
    Headless,
}

/// Timing and policy knobs for one wake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSettings {
    pub mode: Mode,
    /// Idle time after which the boot menu starts a cycle
    pub auto_start_ms: u32,
    /// Idle time after which a menu that cannot auto-start gives up
    pub menu_give_up_ms: u32,
    pub wifi_timeout_ms: u32,
    pub wifi_poll_ms: u32,
    /// Sleep after a failed WiFi join in headless mode
    pub wifi_retry_sleep_s: u32,
    /// Sleep after configuration failed to load
    pub config_error_sleep_s: u32,
    /// Time since boot before any sleep is allowed, leaving a window to
    /// attach a flasher
    pub min_awake_ms: u32,
    /// How long an error screen is held before moving on
    pub error_hold_ms: u32,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Interactive,
            auto_start_ms: 8_000,
            menu_give_up_ms: 300_000,
            wifi_timeout_ms: 15_000,
            wifi_poll_ms: 500,
            wifi_retry_sleep_s: 300,
            config_error_sleep_s: DEFAULT_REFRESH_INTERVAL,
            min_awake_ms: 5_000,
            error_hold_ms: 5_000,
        }
    }
}

/// Peripherals owned by the update cycle for the length of one wake
pub struct Device<D, I, B, N, K> {
    pub display: D,
    pub input: I,
    pub battery: B,
    pub network: N,
    pub connector: K,
}

/// How a single update cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    /// Image shown or nothing to show; sleep this long
    Done { sleep_s: u32 },
    WifiFailed,
    /// Fetch or render failed; the interval to use if the device sleeps now
    Failed { sleep_s: u32 },
}

/// Runs the boot menu and the update cycle for one wake
pub struct Orchestrator<'a, D, I, B, N, K, C> {
    device: &'a mut Device<D, I, B, N, K>,
    clock: &'a C,
    settings: CycleSettings,
    boot_ms: u64,
}

impl<'a, D, I, B, N, K, C> Orchestrator<'a, D, I, B, N, K, C>
where
    D: Display,
    I: Input,
    B: Battery,
    N: Network,
    K: Connector,
    C: Clock,
{
    /// `boot_ms` is the clock reading at power-on, for the minimum awake time
    pub fn new(
        device: &'a mut Device<D, I, B, N, K>,
        clock: &'a C,
        settings: CycleSettings,
        boot_ms: u64,
    ) -> Self {
        Self {
            device,
            clock,
            settings,
            boot_ms,
        }
    }

    /// Drive this wake to its terminal action
    pub async fn run(&mut self, config: Result<Config, ConfigError>) -> DeviceAction {
        match self.settings.mode {
            Mode::Headless => self.run_headless(config).await,
            Mode::Interactive => self.run_interactive(config).await,
        }
    }

    async fn run_headless(&mut self, config: Result<Config, ConfigError>) -> DeviceAction {
        let config = match config {
            Ok(config) => config,
            Err(e) => {
                log::error!("Config error: {}", e);
                self.show_config_error(&e).await;
                return self.sleep(self.settings.config_error_sleep_s).await;
            }
        };

        match self.cycle(&config).await {
            CycleOutcome::Done { sleep_s } | CycleOutcome::Failed { sleep_s } => {
                self.sleep(sleep_s).await
            }
            CycleOutcome::WifiFailed => self.sleep(self.settings.wifi_retry_sleep_s).await,
        }
    }

    async fn run_interactive(&mut self, config: Result<Config, ConfigError>) -> DeviceAction {
        let config_error = config.as_ref().err().map(ToString::to_string);
        let mut auto_start = true;

        loop {
            let menu = BootMenu {
                config_ok: config.is_ok(),
                auto_start,
                auto_start_ms: self.settings.auto_start_ms,
                give_up_ms: self.settings.menu_give_up_ms,
            };
            self.show_menu(&menu, config_error.clone());

            match menu.run(&mut self.device.input, self.clock).await {
                MenuDecision::Exit => return Self::exit_action(config.as_ref().ok()),
                MenuDecision::Retry => return DeviceAction::Restart,
                MenuDecision::Unattended => {
                    let seconds = match &config {
                        Ok(config) => config.refresh_interval,
                        Err(_) => self.settings.config_error_sleep_s,
                    };
                    return self.sleep(seconds).await;
                }
                MenuDecision::Start => {
                    let Ok(config) = &config else {
                        // Unreachable: Start is only offered with a config
                        return DeviceAction::Restart;
                    };
                    match self.cycle(config).await {
                        CycleOutcome::Done { sleep_s } => return self.sleep(sleep_s).await,
                        CycleOutcome::WifiFailed | CycleOutcome::Failed { .. } => {
                            log::info!("Cycle failed, back to boot menu");
                            auto_start = false;
                        }
                    }
                }
            }
        }
    }

    /// Leaving goes to the other slot unless this firmware runs standalone.
    /// Without a config the standalone flag is unknown, so the handoff is
    /// attempted.
    fn exit_action(config: Option<&Config>) -> DeviceAction {
        if config.is_some_and(|c| c.standalone_mode) {
            DeviceAction::Restart
        } else {
            DeviceAction::SwitchSlot
        }
    }

    /// WiFi, fetch, render
    async fn cycle(&mut self, config: &Config) -> CycleOutcome {
        let device = &mut *self.device;

        if wifi::join(
            &mut device.network,
            self.clock,
            &config.wifi_ssid,
            &config.wifi_password,
            self.settings.wifi_timeout_ms,
            self.settings.wifi_poll_ms,
        )
        .await
        .is_err()
        {
            device.display.show(&Screen::WifiFailed {
                ssid: &config.wifi_ssid,
            });
            self.hold_error().await;
            return CycleOutcome::WifiFailed;
        }

        let telemetry = Telemetry {
            battery_volts: device.battery.voltage(),
            rssi: device.network.rssi(),
            joined: device.network.is_joined(),
        };
        let fetched =
            api::fetch_display(&mut device.connector, self.clock, config, &telemetry).await;
        let sleep_s = fetched.refresh_rate_or(config.refresh_interval);

        if let Err(e) = &fetched.outcome {
            log::error!("API error: {}", fetched.message());
            let message;
            let screen = match e {
                ApiError::RequestFailed { .. } | ApiError::Timeout => Screen::Error {
                    message: "Connection Failed",
                },
                _ if fetched.http_status != 0 => Screen::ApiError {
                    status: fetched.http_status,
                },
                other => {
                    message = other.to_string();
                    Screen::Error { message: &message }
                }
            };
            device.display.show(&screen);
            self.hold_error().await;
            return CycleOutcome::Failed { sleep_s };
        }

        if !fetched.has_update() {
            log::info!("No update needed");
            return CycleOutcome::Done { sleep_s };
        }

        if let Err(e) = render_bmp(&fetched.image, &mut device.display) {
            log::error!("Render error: {}", e);
            device.display.show(&Screen::Error {
                message: "Image Render Failed",
            });
            self.hold_error().await;
            return CycleOutcome::Failed { sleep_s };
        }

        // A rendered image always sleeps for the fetched interval
        CycleOutcome::Done {
            sleep_s: fetched.refresh_rate(),
        }
    }

    fn show_menu(&mut self, menu: &BootMenu, config_error: Option<String>) {
        let view = MenuView {
            confirm_label: if menu.config_ok { "Start" } else { "Retry" },
            countdown_s: menu.countdown_s(),
            config_error,
            battery_volts: self.device.battery.voltage(),
            version: FW_VERSION,
        };
        self.device.display.show(&Screen::Menu(&view));
    }

    async fn show_config_error(&mut self, error: &ConfigError) {
        let message = error.to_string();
        let screen = match error {
            ConfigError::StorageNotReady => Screen::NoSdCard,
            ConfigError::FileNotFound(_) => Screen::ConfigMissing,
            _ => Screen::Error { message: &message },
        };
        self.device.display.show(&screen);
        self.hold_error().await;
    }

    async fn hold_error(&self) {
        self.clock.delay_ms(self.settings.error_hold_ms).await;
    }

    /// Sleep action, after the minimum awake time has passed
    async fn sleep(&self, seconds: u32) -> DeviceAction {
        let awake = self.clock.now_ms().saturating_sub(self.boot_ms);
        let min_awake = self.settings.min_awake_ms as u64;
        if awake < min_awake {
            self.clock.delay_ms((min_awake - awake) as u32).await;
        }
        let action = DeviceAction::sleep(seconds);
        log::info!("Cycle complete: {:?}", action);
        action
    }
}
