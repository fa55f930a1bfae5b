//! boardhal-esp32: board bring-up and power lifecycle firmware
//!
//! Probes whichever ESP32 board the image was flashed onto, prints the
//! boot report as one NDJSON line on the console, then runs the main loop:
//! button and PMU events, battery checks and the shutdown sequence.
//!
//! `EspBoard` implements the library's port traits on top of `esp-hal`.
//! Pins are re-acquired by number because the probe decides at run time
//! which wiring table applies.

#![no_std]
#![no_main]

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_time::{Duration, Instant, Timer};
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiBus;
use esp_hal::analog::adc::{Adc, AdcChannel, AdcConfig, AnalogPin, Attenuation};
use esp_hal::delay::Delay;
use esp_hal::gpio::{
    AnyPin, DriveMode, Event, Flex, Input, InputConfig, Io, Level as EspLevel, OutputConfig, Pull,
};
use esp_hal::handler;
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::ledc::channel::{self, ChannelIFace};
use esp_hal::ledc::timer::{self, config::Duty, TimerIFace};
use esp_hal::ledc::{Ledc, LowSpeed};
use esp_hal::rng::Rng;
use esp_hal::rtc_cntl::sleep::{Ext0WakeupSource, WakeupLevel};
use esp_hal::rtc_cntl::{reset_reason, Rtc, RwdtStage};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::system::Cpu;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart};
use esp_hal::Blocking;
use static_cell::StaticCell;

use boardhal::board;
use boardhal::hal::{self, BaroProbe, Buzzer, Clock, Gpio, I2cBus, Links, Panel, SleepControl, Watchdog};
use boardhal::irq::IrqRelay;
use boardhal::pins::{addr, esp32 as pins, I2cPins, Level, Pin, PinMode, Polarity, SpiPins, UartPins};
use boardhal::platform::esp32::{Esp32, Esp32Family, Esp32Hal};
use boardhal::platform::BoardHal;
use boardhal::pmu::{Axp20x, ChargeLed, PekIrq, Pmu, PmuError, Rail};
use boardhal::power::{PowerConfig, WakeSource};
use boardhal::probe::ProbeError;
use boardhal::profile::{DisplayKind, FlashId, PmuKind, RadioIc, RadioInfo};
use boardhal::report::report_line;
use boardhal::system::System;

const LOOP_PERIOD_MS: u64 = 10;
const I2C_FREQ_KHZ: u32 = 100;
const SPI_FREQ_KHZ: u32 = 1000;
const BUZZER_DUTY_PCT: u8 = 50;

// BMP280 / BME280 share both addresses.
const BARO_ADDRS: [u8; 2] = [0x76, 0x77];

const SX1276_REG_VERSION: u8 = 0x42;
const SX1276_VERSION: u8 = 0x12;

#[cfg(feature = "esp32")]
const FAMILY: Esp32Family = Esp32Family::Esp32;
#[cfg(not(feature = "esp32"))]
const FAMILY: Esp32Family = Esp32Family::Esp32S2;

// ── Interrupt-shared state ───────────────────────────────────────────

static IRQ: IrqRelay = IrqRelay::new();

/// GNSS PPS input, owned by the GPIO handler once listening.
static PPS_INPUT: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));

/// AXP IRQ line, owned by the GPIO handler on PMU boards.
static PMU_INPUT: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));

static LEDC: StaticCell<Ledc<'static>> = StaticCell::new();

fn now_ms() -> u32 {
    Instant::now().as_millis() as u32
}

#[handler]
fn gpio_handler() {
    critical_section::with(|cs| {
        if let Some(pps) = PPS_INPUT.borrow_ref_mut(cs).as_mut() {
            if pps.is_interrupt_set() {
                IRQ.on_pps(now_ms());
                pps.clear_interrupt();
            }
        }
        if let Some(pmu) = PMU_INPUT.borrow_ref_mut(cs).as_mut() {
            if pmu.is_interrupt_set() {
                IRQ.on_pmu_alert();
                IRQ.on_wake_edge();
                pmu.clear_interrupt();
            }
        }
    });
}

/// Re-acquire a GPIO by number.
fn flex(pin: Pin) -> Flex<'static> {
    // SAFETY: the platform layer is the only owner of board GPIOs; every
    // driver below re-acquires its pins the same way and drops them when done.
    Flex::new(unsafe { AnyPin::steal(pin.0) })
}

fn any_pin(pin: Pin) -> AnyPin<'static> {
    // SAFETY: see `flex`.
    unsafe { AnyPin::steal(pin.0) }
}

fn esp_level(level: Level) -> EspLevel {
    match level {
        Level::Low => EspLevel::Low,
        Level::High => EspLevel::High,
    }
}

// ── ROM flash descriptor ─────────────────────────────────────────────

#[repr(C)]
struct RomFlashChip {
    device_id: u32,
    chip_size: u32,
    block_size: u32,
    sector_size: u32,
    page_size: u32,
    status_mask: u32,
}

// Filled in by the ROM loader before the application starts.
unsafe extern "C" {
    static g_rom_flashchip: RomFlashChip;
}

// ── Board adapter ────────────────────────────────────────────────────

struct EspBoard {
    delay: Delay,
    rtc: Rtc<'static>,
    rng: Rng,
    psram: bool,
    i2c: Option<I2c<'static, Blocking>>,
    spi: Option<Spi<'static, Blocking>>,
    gnss: Option<Uart<'static, Blocking>>,
    pmu: Option<Axp20x>,
    ledc: &'static Ledc<'static>,
    tone_hz: u32,
    wake: Option<WakeSource>,
    page: u8,
}

impl EspBoard {
    fn with_pmu<T>(
        &mut self,
        f: impl FnOnce(&Axp20x, &mut I2c<'static, Blocking>) -> Result<T, PmuError>,
    ) -> Result<T, PmuError> {
        let pmu = self.pmu.ok_or(PmuError::Absent)?;
        let bus = self.i2c.as_mut().ok_or(PmuError::Bus)?;
        f(&pmu, bus)
    }

    /// SSD1306 command write on the attached bus.
    fn oled_command(&mut self, cmds: &[u8]) -> bool {
        let Some(bus) = self.i2c.as_mut() else {
            return false;
        };
        cmds.iter()
            .all(|&c| embedded_hal::i2c::I2c::write(bus, addr::SSD1306, &[0x00, c]).is_ok())
    }

    /// Read the SX1276 version register over the default radio wiring.
    fn probe_sx1276(&mut self) -> bool {
        let spi_pins = pins::DEFAULT_SPI;
        self.spi_begin(spi_pins);
        let mut ss = flex(spi_pins.ss);
        ss.set_output_enable(true);
        ss.set_level(EspLevel::Low);
        let mut buf = [SX1276_REG_VERSION & 0x7F, 0];
        let ok = self
            .spi
            .as_mut()
            .is_some_and(|spi| SpiBus::transfer_in_place(spi, &mut buf).is_ok());
        ss.set_level(EspLevel::High);
        self.spi_end();
        ok && buf[1] == SX1276_VERSION
    }
}

fn read_adc<P: AdcChannel + AnalogPin>(pin: P) -> u16 {
    let mut config = AdcConfig::new();
    let mut adc_pin = config.enable_pin(pin, Attenuation::_11dB);
    // SAFETY: ADC1 is only used here, one conversion at a time.
    let mut adc = Adc::new(unsafe { esp_hal::peripherals::ADC1::steal() }, config);
    let raw: u16 = loop {
        if let Ok(v) = adc.read_oneshot(&mut adc_pin) {
            break v;
        }
    };
    // 11 dB attenuation spans roughly 0..3.1 V over 12 bits
    (raw as u32 * 3100 / 4095) as u16
}

impl I2cBus for EspBoard {
    fn attach(&mut self, pins: I2cPins) {
        self.i2c = None;
        let config = I2cConfig::default().with_frequency(Rate::from_khz(I2C_FREQ_KHZ));
        // SAFETY: I2C0 is re-routed between candidate pin pairs; the previous
        // driver instance was dropped above.
        let i2c0 = unsafe { esp_hal::peripherals::I2C0::steal() };
        match I2c::new(i2c0, config) {
            Ok(bus) => {
                self.i2c = Some(bus.with_sda(any_pin(pins.sda)).with_scl(any_pin(pins.scl)));
            }
            Err(e) => log::error!("I2C config rejected: {:?}", e),
        }
    }

    fn probe(&mut self, addr: u8) -> bool {
        self.i2c
            .as_mut()
            .is_some_and(|bus| hal::probe_address(bus, addr))
    }

    fn detach(&mut self, pins: I2cPins) {
        self.i2c = None;
        self.set_mode(pins.sda, PinMode::HighZ);
        self.set_mode(pins.scl, PinMode::HighZ);
    }
}

impl Gpio for EspBoard {
    fn set_mode(&mut self, pin: Pin, mode: PinMode) {
        let mut io = flex(pin);
        let pull = match mode {
            PinMode::InputPullUp => Pull::Up,
            PinMode::InputPullDown => Pull::Down,
            _ => Pull::None,
        };
        io.apply_input_config(&InputConfig::default().with_pull(pull));
        io.apply_output_config(&OutputConfig::default().with_drive_mode(DriveMode::PushPull));
        io.set_output_enable(mode == PinMode::Output);
        io.set_input_enable(mode != PinMode::Output && mode != PinMode::HighZ);
    }

    fn write(&mut self, pin: Pin, level: Level) {
        flex(pin).set_level(esp_level(level));
    }

    fn read(&mut self, pin: Pin) -> Level {
        if flex(pin).is_high() {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl Clock for EspBoard {
    fn millis(&self) -> u32 {
        now_ms()
    }
}

impl DelayNs for EspBoard {
    fn delay_ns(&mut self, ns: u32) {
        self.delay.delay_ns(ns);
    }
}

impl SleepControl for EspBoard {
    fn arm_wake(&mut self, wake: WakeSource) {
        self.wake = Some(wake);
    }

    fn deep_sleep(&mut self) {
        let level = match self.wake.map(|w| w.polarity) {
            Some(Polarity::ActiveHigh) => WakeupLevel::High,
            _ => WakeupLevel::Low,
        };
        // SAFETY: the wake pin is handed to the RTC for the rest of this boot.
        match self.wake.map(|w| w.pin.0) {
            Some(0) => {
                let src = Ext0WakeupSource::new(unsafe { esp_hal::peripherals::GPIO0::steal() }, level);
                self.rtc.sleep_deep(&[&src])
            }
            #[cfg(feature = "esp32")]
            Some(35) => {
                let src = Ext0WakeupSource::new(unsafe { esp_hal::peripherals::GPIO35::steal() }, level);
                self.rtc.sleep_deep(&[&src])
            }
            #[cfg(feature = "esp32")]
            Some(39) => {
                let src = Ext0WakeupSource::new(unsafe { esp_hal::peripherals::GPIO39::steal() }, level);
                self.rtc.sleep_deep(&[&src])
            }
            other => {
                if let Some(pin) = other {
                    log::warn!("GPIO {} cannot wake from deep sleep", pin);
                }
                self.rtc.sleep_deep(&[])
            }
        }
    }

    fn idle(&mut self) {
        self.delay.delay_millis(LOOP_PERIOD_MS as u32);
    }

    fn software_reset(&mut self) {
        esp_hal::system::software_reset()
    }
}

impl Panel for EspBoard {
    fn begin(&mut self, kind: DisplayKind) -> bool {
        if !kind.is_oled() {
            log::warn!("no {:?} driver in this image", kind);
            return false;
        }
        // charge pump on, display on
        self.oled_command(&[0x8D, 0x14, 0xAF])
    }

    fn show_message(&mut self, msg: &str) {
        log::info!("[display] {}", msg);
    }

    fn set_backlight(&mut self, level: u8) {
        // OLEDs take it as contrast
        self.oled_command(&[0x81, level]);
    }

    fn sleep(&mut self) {
        self.oled_command(&[0xAE, 0x8D, 0x10]);
    }

    fn refresh(&mut self) {
        log::trace!("[display] page {}", self.page);
    }

    fn next_page(&mut self) {
        self.page = self.page.wrapping_add(1);
    }
}

impl Buzzer for EspBoard {
    fn tone(&mut self, hz: u32) {
        self.tone_hz = hz;
        let mut t0 = self.ledc.timer::<LowSpeed>(timer::Number::Timer0);
        if let Err(e) = t0.configure(timer::config::Config {
            duty: Duty::Duty8Bit,
            clock_source: timer::LSClockSource::APBClk,
            frequency: Rate::from_hz(hz),
        }) {
            log::warn!("LEDC timer at {} Hz rejected: {:?}", hz, e);
            return;
        }
        let mut ch0 = self.ledc.channel(channel::Number::Channel0, any_pin(pins::BUZZER));
        if let Err(e) = ch0.configure(channel::config::Config {
            timer: &t0,
            duty_pct: BUZZER_DUTY_PCT,
            drive_mode: DriveMode::PushPull,
        }) {
            log::warn!("LEDC channel rejected: {:?}", e);
        }
    }

    fn no_tone(&mut self) {
        if self.tone_hz == 0 {
            return;
        }
        let mut t0 = self.ledc.timer::<LowSpeed>(timer::Number::Timer0);
        let configured = t0.configure(timer::config::Config {
            duty: Duty::Duty8Bit,
            clock_source: timer::LSClockSource::APBClk,
            frequency: Rate::from_hz(self.tone_hz),
        });
        if configured.is_ok() {
            let mut ch0 = self.ledc.channel(channel::Number::Channel0, any_pin(pins::BUZZER));
            let _ = ch0.configure(channel::config::Config {
                timer: &t0,
                duty_pct: 0,
                drive_mode: DriveMode::PushPull,
            });
        }
        self.tone_hz = 0;
    }
}

impl Links for EspBoard {
    fn spi_begin(&mut self, pins: SpiPins) {
        self.spi = None;
        let config = SpiConfig::default().with_frequency(Rate::from_khz(SPI_FREQ_KHZ));
        // SAFETY: SPI2 belongs to the radio link only.
        let spi2 = unsafe { esp_hal::peripherals::SPI2::steal() };
        match Spi::new(spi2, config) {
            Ok(spi) => {
                self.spi = Some(
                    spi.with_sck(any_pin(pins.sck))
                        .with_miso(any_pin(pins.miso))
                        .with_mosi(any_pin(pins.mosi)),
                );
            }
            Err(e) => log::error!("SPI config rejected: {:?}", e),
        }
    }

    fn spi_end(&mut self) {
        self.spi = None;
    }

    fn serial_begin(&mut self, pins: UartPins, baud: u32) {
        self.gnss = None;
        // SAFETY: UART1 belongs to the GNSS link only.
        let uart1 = unsafe { esp_hal::peripherals::UART1::steal() };
        match Uart::new(uart1, UartConfig::default().with_baudrate(baud)) {
            Ok(uart) => {
                self.gnss = Some(uart.with_rx(any_pin(pins.rx)).with_tx(any_pin(pins.tx)));
            }
            Err(e) => log::error!("GNSS UART config rejected: {:?}", e),
        }
    }

    fn serial_end(&mut self) {
        self.gnss = None;
    }

    fn radio_off(&mut self) {
        // No Wi-Fi / BLE stack is linked into this image.
        self.spi = None;
    }

    fn uart_ready(&mut self) -> bool {
        true
    }

    fn uart_put(&mut self, byte: u8) {
        esp_println::print!("{}", byte as char);
    }
}

impl Watchdog for EspBoard {
    fn enable(&mut self, timeout_ms: u32) {
        self.rtc.rwdt.set_timeout(
            RwdtStage::Stage0,
            esp_hal::time::Duration::from_millis(timeout_ms as u64),
        );
        self.rtc.rwdt.enable();
    }

    fn disable(&mut self) {
        self.rtc.rwdt.disable();
    }

    fn feed(&mut self) {
        self.rtc.rwdt.feed();
    }
}

impl BaroProbe for EspBoard {
    fn baro_present(&mut self) -> bool {
        BARO_ADDRS.iter().any(|&a| self.probe(a))
    }
}

impl Pmu for EspBoard {
    fn pmu_begin(&mut self, kind: PmuKind) -> Result<(), PmuError> {
        let axp = Axp20x::new(kind);
        let bus = self.i2c.as_mut().ok_or(PmuError::Bus)?;
        axp.setup(bus)?;
        self.pmu = Some(axp);
        Ok(())
    }

    fn pmu_set_rail(&mut self, rail: Rail, on: bool) -> Result<(), PmuError> {
        self.with_pmu(|axp, bus| axp.set_rail(bus, rail, on))
    }

    fn pmu_request_sleep(&mut self) -> Result<bool, PmuError> {
        self.with_pmu(|axp, bus| axp.request_sleep(bus))
    }

    fn pmu_power_off(&mut self) -> Result<(), PmuError> {
        self.with_pmu(|axp, bus| axp.power_off(bus))
    }

    fn pmu_charge_led(&mut self, mode: ChargeLed) -> Result<(), PmuError> {
        self.with_pmu(|axp, bus| axp.charge_led(bus, mode))
    }

    fn pmu_read_irq(&mut self) -> Result<PekIrq, PmuError> {
        self.with_pmu(|axp, bus| axp.read_irq(bus))
    }

    fn pmu_clear_irq(&mut self) -> Result<(), PmuError> {
        self.with_pmu(|axp, bus| axp.clear_irq(bus))
    }

    fn pmu_battery_mv(&mut self) -> Result<Option<u16>, PmuError> {
        self.with_pmu(|axp, bus| axp.battery_mv(bus))
    }
}

impl BoardHal for EspBoard {
    fn random_u32(&mut self) -> u32 {
        self.rng.random()
    }

    fn radio(&mut self) -> RadioInfo {
        if self.probe_sx1276() {
            RadioInfo {
                ic: RadioIc::Sx1276,
                reset_connected: true,
            }
        } else {
            RadioInfo {
                ic: RadioIc::None,
                reset_connected: false,
            }
        }
    }
}

impl Esp32Hal for EspBoard {
    fn family(&self) -> Esp32Family {
        FAMILY
    }

    fn psram_found(&mut self) -> bool {
        self.psram
    }

    fn flash_id(&mut self) -> FlashId {
        // SAFETY: written once by the ROM, read-only afterwards.
        FlashId(unsafe { g_rom_flashchip.device_id })
    }

    fn is_pico_d4(&mut self) -> bool {
        #[cfg(feature = "esp32")]
        {
            const PKG_PICO_D4: u8 = 5;
            esp_hal::efuse::Efuse::read_field_le::<u8>(esp_hal::efuse::CHIP_PACKAGE) == PKG_PICO_D4
        }
        #[cfg(not(feature = "esp32"))]
        {
            false
        }
    }

    fn custom_mac(&mut self) -> Result<[u8; 6], ProbeError> {
        // esp-hal exposes no accessor for the custom MAC block
        Err(ProbeError::Unreadable)
    }

    fn factory_mac(&mut self) -> [u8; 6] {
        esp_hal::efuse::Efuse::read_base_mac_address()
    }

    fn reset_code(&mut self) -> u32 {
        reset_reason(Cpu::ProCpu).map(|r| r as u32).unwrap_or(0)
    }

    fn battery_adc_mv(&mut self, pin: Pin) -> u16 {
        // SAFETY: battery sense pins are analog-only on every listed board.
        match pin.0 {
            #[cfg(feature = "esp32")]
            35 => read_adc(unsafe { esp_hal::peripherals::GPIO35::steal() }),
            #[cfg(feature = "esp32")]
            36 => read_adc(unsafe { esp_hal::peripherals::GPIO36::steal() }),
            #[cfg(not(feature = "esp32"))]
            9 => read_adc(unsafe { esp_hal::peripherals::GPIO9::steal() }),
            other => {
                log::warn!("GPIO {} has no ADC channel", other);
                0
            }
        }
    }

    fn set_wifi_tx_power(&mut self, level: i8) {
        log::info!("Wi-Fi TX power {} (no radio stack linked)", level);
    }

    fn eeprom_begin(&mut self, size: usize) -> bool {
        log::warn!("no NVS backend linked, {} byte settings area unavailable", size);
        false
    }
}

// ── Main ─────────────────────────────────────────────────────────────

/// Hand the PPS and PMU IRQ lines to the GPIO interrupt handler.
fn listen_irq_lines(system_has_pmu: bool) {
    let pps = Input::new(any_pin(pins::GNSS_PPS), InputConfig::default());
    let pmu = system_has_pmu.then(|| {
        Input::new(
            any_pin(pins::TBEAM_V08_PMU_IRQ),
            InputConfig::default().with_pull(Pull::Up),
        )
    });
    critical_section::with(|cs| {
        let mut slot = PPS_INPUT.borrow_ref_mut(cs);
        let pps = slot.insert(pps);
        pps.listen(Event::RisingEdge);
        if let Some(mut pmu) = pmu {
            pmu.listen(Event::FallingEdge);
            PMU_INPUT.borrow_ref_mut(cs).replace(pmu);
        }
    });
}

#[esp_rtos::main]
async fn main(_spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // esp-rtos needs a timer and a software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!(
        "boardhal v{} starting on {}",
        env!("CARGO_PKG_VERSION"),
        board::SOC_NAME
    );

    let psram = esp_hal::psram::Psram::new(peripherals.PSRAM, Default::default());
    let (_, psram_size) = psram.raw_parts();

    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(gpio_handler);

    let ledc = LEDC.init(Ledc::new(peripherals.LEDC));

    let hw = EspBoard {
        delay: Delay::new(),
        rtc: Rtc::new(peripherals.LPWR),
        rng: Rng::new(),
        psram: psram_size > 0,
        i2c: None,
        spi: None,
        gnss: None,
        pmu: None,
        ledc,
        tone_hz: 0,
        wake: None,
        page: 0,
    };

    let mut sys = System::boot(Esp32::new(hw), PowerConfig::new(), &IRQ);

    match report_line(&sys.boot_report()) {
        Some(line) => {
            if let Ok(s) = core::str::from_utf8(&line) {
                esp_println::print!("{}", s);
            }
        }
        None => log::warn!("boot report does not fit the line buffer"),
    }

    listen_irq_lines(sys.profile().pmu.is_some());

    loop {
        sys.tick(now_ms());
        Timer::after(Duration::from_millis(LOOP_PERIOD_MS)).await;
    }
}
