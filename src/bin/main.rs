//! Dashboard terminal firmware for the ESP32-C3 e-paper reader board
//!
//! Each wake loads `/TERMINAL.JSN` from the SD card, runs one update cycle
//! and leaves the chip in deep sleep, restarting, or booting the other
//! firmware slot. A timer wake runs headless; any other wake shows the boot
//! menu first.

#![no_std]
#![no_main]

extern crate alloc;

use core::cell::RefCell;

use dashboard_terminal_firmware::board::{
    AdcBattery, AdcButtons, AnalogInputs, EmbassyClock, EspPower, OtaSlots, TcpConnector,
    WifiNetwork,
};
use dashboard_terminal_firmware::clock::Clock;
use dashboard_terminal_firmware::config::{self, CONFIG_PATH, FW_VERSION};
use dashboard_terminal_firmware::display::{Display, EpdDisplay};
use dashboard_terminal_firmware::epd::Ssd1677;
use dashboard_terminal_firmware::lifecycle::{CycleSettings, Device, Mode, Orchestrator};
use dashboard_terminal_firmware::power;
use dashboard_terminal_firmware::storage::SdStorage;
use dashboard_terminal_firmware::wifi::Network;
use embassy_executor::Spawner;
use embassy_net::{Runner, StackResources};
use embassy_time::Delay;
use embedded_hal_bus::spi::RefCellDevice;
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{
    clock::CpuClock,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    interrupt::software::SoftwareInterruptControl,
    ram,
    rng::Rng,
    rtc_cntl::Rtc,
    spi::{
        Mode as SpiMode,
        master::{Config as SpiConfig, Spi},
    },
    system::SleepSource,
    time::Rate,
    timer::timg::TimerGroup,
};
use esp_radio::{
    Controller,
    wifi::{Config as WifiConfig, WifiDevice},
};
use esp_storage::FlashStorage;

esp_bootloader_esp_idf::esp_app_desc!();

// When you are okay with using a nightly compiler it's better to use https://docs.rs/static_cell/2.1.0/static_cell/macro.make_static.html
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    // Init logger first so we can see any early crashes
    esp_println::logger::init_logger_from_env();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    let wake_reason = esp_hal::rtc_cntl::wakeup_cause();
    let mode = if matches!(wake_reason, SleepSource::Timer) {
        Mode::Headless
    } else {
        Mode::Interactive
    };
    log::info!(
        "Dashboard terminal v{} (wake: {:?}, {:?})",
        FW_VERSION,
        wake_reason,
        mode
    );

    // Framebuffer, image and TLS records all live on the heap
    esp_alloc::heap_allocator!(#[ram(reclaimed)] size: 64 * 1024);
    esp_alloc::heap_allocator!(size: 160 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    let clock = EmbassyClock;
    let boot_ms = clock.now_ms();
    let mut delay = Delay;

    // ==================== Shared SPI bus (EPD + SD card) ====================
    let spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(10))
            .with_mode(SpiMode::_0),
    )
    .expect("SPI init failed")
    .with_sck(peripherals.GPIO8)
    .with_mosi(peripherals.GPIO10)
    .with_miso(peripherals.GPIO7);
    let spi_bus = RefCell::new(spi);

    let sd_cs = Output::new(peripherals.GPIO12, Level::High, OutputConfig::default());
    let sd_spi = RefCellDevice::new_no_delay(&spi_bus, sd_cs).expect("SD SPI device failed");
    let mut storage = SdStorage::new(sd_spi, Delay);

    // ==================== E-paper display ====================
    let epd_cs = Output::new(peripherals.GPIO21, Level::High, OutputConfig::default());
    let epd_spi = RefCellDevice::new_no_delay(&spi_bus, epd_cs).expect("EPD SPI device failed");
    let busy = Input::new(peripherals.GPIO6, InputConfig::default().with_pull(Pull::None));
    let dc = Output::new(peripherals.GPIO4, Level::Low, OutputConfig::default());
    let rst = Output::new(peripherals.GPIO5, Level::High, OutputConfig::default());
    let epd = Ssd1677::new(epd_spi, busy, dc, rst, &mut delay).expect("EPD init failed");
    let display = EpdDisplay::new(epd, Delay);

    // ==================== Buttons and battery ====================
    let analog = RefCell::new(AnalogInputs::new(
        peripherals.ADC1,
        peripherals.GPIO0,
        peripherals.GPIO1,
    ));

    // ==================== WiFi and network stack ====================
    let rng = Rng::new();
    let radio = mk_static!(
        Controller<'static>,
        esp_radio::init().expect("radio init failed")
    );
    let (controller, interfaces) =
        esp_radio::wifi::new(radio, peripherals.WIFI, WifiConfig::default())
            .expect("WiFi init failed");
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        mk_static!(StackResources<3>, StackResources::<3>::new()),
        (rng.random() as u64) << 32 | rng.random() as u64,
    );
    spawner.spawn(net_task(runner)).ok();

    let mut network = WifiNetwork::new(controller, stack);
    let config = config::load(&mut storage, CONFIG_PATH, || network.mac_address());
    if let Err(e) = &config {
        log::warn!("Config unavailable: {}", e);
    }

    let mut device = Device {
        display,
        input: AdcButtons::new(&analog),
        battery: AdcBattery::new(&analog),
        network,
        connector: TcpConnector::new(stack, rng),
    };
    let settings = CycleSettings {
        mode,
        ..CycleSettings::default()
    };
    let action = Orchestrator::new(&mut device, &clock, settings, boot_ms)
        .run(config)
        .await;

    device.display.power_down();

    let mut power = EspPower::new(Rtc::new(peripherals.LPWR), peripherals.GPIO3);
    let mut slots = OtaSlots::new(FlashStorage::new(peripherals.FLASH));
    power::execute(action, &mut power, &mut slots)
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
