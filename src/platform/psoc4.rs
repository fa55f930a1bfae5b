/// PSoC4 (Heltec CubeCell-GPS) operations table.
///
/// There is no deep sleep worth the name here: shutdown parks every line,
/// arms one falling-edge wake source and drops into *monitoring*. The loop
/// then only idles until the edge comes in, and a confirmed edge restarts
/// the MCU.
use heapless::Deque;

use crate::battery::BatteryParams;
use crate::button::ButtonTracker;
use crate::display::{self, Refresher};
use crate::hal::{Panel, Watchdog};
use crate::irq::IrqRelay;
use crate::ops::{
    random_in, BaroOps, BatteryOps, ButtonOps, DisplayOps, IoDevOps, LoopEvent, SerialOps,
    SocOps, WatchdogOps,
};
use crate::pins::{addr, psoc4 as pins, Level, PinMode, SpiPins};
use crate::platform::{apply_board_step, enter_board, poll_button, wait_release, BoardHal};
use crate::power::{
    select_wake, PowerConfig, PowerDownPlan, PowerStep, ShutdownReason, StepStatus, Terminal,
    WakeKind, WakeSource,
};
use crate::probe;
use crate::profile::{BoardVariant, DisplayKind, FlashId, HardwareProfile, Model, RadioIc, Soc};
use crate::reset::{self, ResetReason};

pub trait Psoc4Hal: BoardHal {
    /// `CySysGetResetReason`.
    fn reset_cause(&mut self) -> u32;
    fn unique_id(&mut self) -> u32;
    /// Millivolts at the battery sense pin.
    fn battery_adc_mv(&mut self) -> u16;
}

const MAX_TRACKING_OBJECTS: usize = 8;
/// Room for one full report burst.
pub const UART_TX_FIFO_LEN: usize = MAX_TRACKING_OBJECTS * 65 + 75 + 75 + 42 + 20;
pub const ADC_DIVIDER: u16 = 2;
/// Inner WDT: two missed 1.4 s interrupts reset the chip.
pub const WDT_TIMEOUT_MS: u32 = 2800;

const OLED_SETTLE_MS: u32 = 200;
const GNSS_OFF_SETTLE_MS: u32 = 2000;
const WAKE_DEBOUNCE_MS: u32 = 10;
const WAKE_RELEASE_SETTLE_MS: u32 = 100;

pub struct Psoc4<H> {
    hw: H,
    board: HardwareProfile,
    button: ButtonTracker,
    refresher: Refresher,
    uart_fifo: Deque<u8, UART_TX_FIFO_LEN>,
    monitoring: bool,
}

impl<H: Psoc4Hal> Psoc4<H> {
    pub fn new(hw: H) -> Self {
        Self {
            hw,
            board: HardwareProfile::new(Model::Standalone, BoardVariant::CubeCellGps),
            button: ButtonTracker::new(),
            refresher: Refresher::new(),
            uart_fifo: Deque::new(),
            monitoring: false,
        }
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn uart_pending(&self) -> usize {
        self.uart_fifo.len()
    }

    // ── Optional ops ──

    fn display_setup(&mut self, p: &HardwareProfile) -> DisplayKind {
        display::setup(&mut self.hw, p.display)
    }

    fn display_tick(&mut self, p: &HardwareProfile) {
        let now = self.hw.millis();
        self.refresher.tick(&mut self.hw, p.display, now);
    }

    fn display_next_page(&mut self) {
        Panel::next_page(&mut self.hw);
    }

    fn display_fini(&mut self, p: &HardwareProfile, reason: ShutdownReason) {
        display::fini(&mut self.hw, p.display, reason);
    }

    fn battery_setup(&mut self, _p: &HardwareProfile) {
        self.hw.set_mode(pins::BATTERY, PinMode::HighZ);
    }

    /// GPIO7 is both USER_KEY and VBAT_ADC_CTL. The divider is only switched
    /// in while the key is up, and the line goes back to input afterwards.
    fn battery_mv(&mut self, p: &HardwareProfile) -> Option<u16> {
        if p.model != Model::Mini || self.monitoring {
            return None;
        }
        let key_up = self.hw.read(pins::BUTTON) == Level::High;
        if key_up {
            self.hw.set_mode(pins::VBAT_ADC_CTL, PinMode::Output);
            self.hw.write(pins::VBAT_ADC_CTL, Level::Low);
        }
        let mv = self.hw.battery_adc_mv().saturating_mul(ADC_DIVIDER);
        if key_up {
            self.hw.set_mode(pins::VBAT_ADC_CTL, PinMode::Input);
        }
        Some(mv)
    }

    fn battery_threshold(p: &HardwareProfile) -> u16 {
        BatteryParams::psoc4(p).threshold_mv
    }

    fn battery_cutoff(p: &HardwareProfile) -> u16 {
        BatteryParams::psoc4(p).cutoff_mv
    }

    fn baro_setup(&mut self, p: &HardwareProfile) -> bool {
        p.has_baro() && self.hw.baro_present()
    }

    fn button_setup(&mut self, p: &HardwareProfile) {
        if let Some(pin) = p.button {
            self.hw.set_mode(pin, PinMode::Input);
        }
    }

    fn button_tick(&mut self, p: &HardwareProfile) -> Option<LoopEvent> {
        let pin = p.button?;
        poll_button(&mut self.hw, &mut self.button, pin)
    }

    /// The release wait itself is a step of the shutdown plan.
    fn button_fini(&mut self, _p: &HardwareProfile) {
        self.button = ButtonTracker::new();
    }

    fn watchdog_setup(&mut self) {
        Watchdog::enable(&mut self.hw, WDT_TIMEOUT_MS);
    }

    fn watchdog_feed(&mut self) {
        Watchdog::feed(&mut self.hw);
    }

    fn watchdog_fini(&mut self) {
        Watchdog::disable(&mut self.hw);
    }

    fn serial_begin(&mut self, _p: &HardwareProfile, baud: u32) {
        self.hw.serial_begin(pins::GNSS, baud);
    }

    /// Drain the TX FIFO while the UART has room.
    fn uart_tick(&mut self) {
        while self.hw.uart_ready() {
            match self.uart_fifo.pop_front() {
                Some(byte) => self.hw.uart_put(byte),
                None => break,
            }
        }
    }

    /// Queue as much of `buf` as fits. Returns the number of bytes taken.
    fn uart_write(&mut self, buf: &[u8]) -> usize {
        let mut written = 0;
        for &byte in buf {
            if self.uart_fifo.push_back(byte).is_err() {
                break;
            }
            written += 1;
        }
        written
    }
}

impl<H: Psoc4Hal> SocOps for Psoc4<H> {
    const SOC: Soc = Soc::Psoc4;
    const NAME: &'static str = "PSoC4";
    const DEFAULT_MODEL: Model = Model::Standalone;

    fn setup(&mut self) -> HardwareProfile {
        let radio = self.hw.radio();
        let mut p = HardwareProfile::new(Self::DEFAULT_MODEL, BoardVariant::CubeCellGps);
        p.radio = radio.ic;
        p.rf_reset_connected = radio.reset_connected;

        // The OLED only answers with Vext on and reset released.
        probe::power_up(
            &mut self.hw,
            (pins::OLED_PWR, Level::Low),
            Some((pins::OLED_RST, Level::High)),
            OLED_SETTLE_MS,
        );
        let oled = probe::probe_device(&mut self.hw, pins::I2C, addr::SSD1306);
        self.hw.set_mode(pins::OLED_RST, PinMode::HighZ);
        self.hw.set_mode(pins::OLED_PWR, PinMode::HighZ);

        if oled {
            p.model = Model::Mini;
            p.display = DisplayKind::OledHeltec;
            p.display_bus = Some(pins::I2C);
            p.button = Some(pins::BUTTON);

            self.hw.set_mode(pins::OLED_PWR, PinMode::Output);
            self.hw.write(pins::OLED_PWR, Level::Low);
            self.hw.set_mode(pins::OLED_RST, PinMode::Output);
            self.hw.write(pins::OLED_RST, Level::High);
            self.hw.set_mode(pins::GNSS_PWR, PinMode::Output);
            self.hw.write(pins::GNSS_PWR, Level::Low);
        }

        let baro = if oled {
            self.hw.baro_present()
        } else {
            probe::probe_first(&mut self.hw, &[pins::I2C], |h| h.baro_present()).is_some()
        };
        if baro {
            p.baro = Some(pins::I2C);
        }

        log::info!("CubeCell {:?}, display {:?}", p.model, p.display);
        self.board = p;
        p
    }

    fn post_init(&mut self, profile: &HardwareProfile) {
        if profile.model != Model::Mini {
            return;
        }
        let verdict = |ok: bool| if ok { "PASS" } else { "FAIL" };
        log::info!("Power-on self test");
        log::info!("RADIO   : {}", verdict(profile.radio == RadioIc::Sx1262));
        log::info!("DISPLAY : {}", verdict(profile.display == DisplayKind::OledHeltec));
        log::info!("BMx280  : {}", if profile.has_baro() { "PASS" } else { "N/A" });
    }

    fn loop_tick(&mut self, _profile: &HardwareProfile, _irq: &IrqRelay) -> Option<LoopEvent> {
        None
    }

    fn shutdown_plan(
        &self,
        profile: &HardwareProfile,
        reason: ShutdownReason,
        config: &PowerConfig,
    ) -> PowerDownPlan {
        let mut plan = PowerDownPlan::new(Terminal::Halt);
        plan.push(PowerStep::WatchdogOff);
        if profile.display != DisplayKind::None {
            plan.push(PowerStep::DisplayFini(reason))
                .push(PowerStep::DisplaySleep);
        }
        if let Some(pin) = profile.button {
            plan.push(PowerStep::ButtonRelease {
                pin,
                timeout_ms: config.button_release_ms,
            });
        }
        if profile.model != Model::Mini {
            return plan;
        }

        plan.push(PowerStep::Drive(pins::GNSS_PWR, Level::High))
            .push(PowerStep::Float(pins::GNSS_PWR))
            .push(PowerStep::SerialEnd)
            .push(PowerStep::Settle(GNSS_OFF_SETTLE_MS))
            // reset asserted before Vext is cut
            .push(PowerStep::Drive(pins::OLED_RST, Level::Low))
            .push(PowerStep::Settle(OLED_SETTLE_MS))
            .push(PowerStep::Float(pins::OLED_RST))
            .push(PowerStep::Drive(pins::OLED_PWR, Level::High))
            .push(PowerStep::Float(pins::OLED_PWR))
            .push(PowerStep::Float(pins::SPI.ss))
            .push(PowerStep::Float(pins::RADIO_RST))
            .push(PowerStep::Float(pins::RADIO_BUSY))
            .push(PowerStep::Float(pins::BATTERY));

        let wake = select_wake(
            reason,
            profile.button.map(WakeSource::button),
            Some(WakeSource::serial(pins::CONSOLE_RX)),
        );
        plan.terminal = wake.map_or(Terminal::Halt, Terminal::Monitor);
        plan
    }

    fn apply(&mut self, step: &PowerStep) -> StepStatus {
        match apply_board_step(&mut self.hw, step, self.board.display) {
            Some(status) => status,
            None => {
                log::debug!("{:?} skipped, no PMU", step);
                StepStatus::Done
            }
        }
    }

    fn enter(&mut self, terminal: Terminal) {
        self.monitoring = matches!(terminal, Terminal::Monitor(_));
        if !enter_board(&mut self.hw, terminal) {
            log::warn!("no PMU to power off, halting");
            self.hw.deep_sleep();
        }
    }

    fn idle(&mut self) {
        self.hw.idle();
    }

    fn restart(&mut self) {
        self.hw.software_reset();
    }

    fn chip_id(&mut self) -> u32 {
        self.hw.unique_id()
    }

    fn reset_code(&mut self) -> u32 {
        self.hw.reset_cause()
    }

    fn decode_reset(code: u32, _flash_id: Option<FlashId>) -> ResetReason {
        reset::decode_psoc4(code)
    }

    fn reset_info(code: u32) -> &'static str {
        reset::describe_psoc4(code)
    }

    fn random(&mut self, low: i32, high: i32) -> i32 {
        random_in(self.hw.random_u32(), low, high)
    }

    fn spi_begin(&mut self, _profile: &HardwareProfile) -> SpiPins {
        self.hw.spi_begin(pins::SPI);
        pins::SPI
    }

    fn attach_interrupts(&mut self, _profile: &HardwareProfile) {
        self.hw.set_mode(pins::GNSS_PPS, PinMode::Input);
    }

    /// A button edge only counts if the key is still down after the
    /// debounce delay; the restart then waits for it to be let go.
    fn wake_confirmed(&mut self, wake: WakeSource) -> bool {
        if wake.kind != WakeKind::Button {
            return true;
        }
        self.hw.delay_ms(WAKE_DEBOUNCE_MS);
        if self.hw.read(wake.pin) != Level::Low {
            return false;
        }
        wait_release(&mut self.hw, wake.pin, PowerConfig::new().button_release_ms);
        self.hw.delay_ms(WAKE_RELEASE_SETTLE_MS);
        true
    }

    const DISPLAY: Option<DisplayOps<Self>> = Some(DisplayOps {
        setup: Self::display_setup,
        tick: Self::display_tick,
        next_page: Self::display_next_page,
        fini: Self::display_fini,
    });
    const BATTERY: Option<BatteryOps<Self>> = Some(BatteryOps {
        setup: Self::battery_setup,
        voltage_mv: Self::battery_mv,
        threshold_mv: Self::battery_threshold,
        cutoff_mv: Self::battery_cutoff,
    });
    const BARO: Option<BaroOps<Self>> = Some(BaroOps {
        setup: Self::baro_setup,
    });
    const BUTTON: Option<ButtonOps<Self>> = Some(ButtonOps {
        setup: Self::button_setup,
        tick: Self::button_tick,
        fini: Self::button_fini,
    });
    const WATCHDOG: Option<WatchdogOps<Self>> = Some(WatchdogOps {
        setup: Self::watchdog_setup,
        feed: Self::watchdog_feed,
        fini: Self::watchdog_fini,
    });
    const SERIAL: Option<SerialOps<Self>> = Some(SerialOps {
        begin: Self::serial_begin,
    });
    const UART: Option<IoDevOps<Self>> = Some(IoDevOps {
        name: "PSoC4 UART",
        setup: None,
        tick: Some(Self::uart_tick),
        fini: None,
        available: None,
        read: None,
        write: Some(Self::uart_write),
    });
}
