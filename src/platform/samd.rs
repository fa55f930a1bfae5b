/// SAMD21 (Arduino Zero / Seeed XIAO M0) operations table.
///
/// The variant is fixed by the build, so identification is just an OLED
/// and barometer probe on the board's one I2C bus. There is no button and
/// no sleep wiring; shutdown releases everything and halts.
use crate::battery::BatteryParams;
use crate::display::{self, Refresher};
use crate::hal::{Panel, Watchdog};
use crate::irq::IrqRelay;
use crate::ops::{
    random_in, BaroOps, BatteryOps, DisplayOps, LoopEvent, SerialOps, SocOps, WatchdogOps,
};
use crate::pins::{addr, samd as pins, I2cPins, Pin, PinMode, SpiPins, UartPins};
use crate::platform::{apply_board_step, enter_board, BoardHal, WDT_TIMEOUT_MS};
use crate::power::{PowerConfig, PowerDownPlan, PowerStep, ShutdownReason, StepStatus, Terminal};
use crate::probe;
use crate::profile::{BoardVariant, DisplayKind, FlashId, HardwareProfile, Model, Soc};
use crate::reset::{self, ResetReason};

pub trait SamdHal: BoardHal {
    /// Zero or XIAO; fixed per build.
    fn variant(&self) -> BoardVariant;
    /// `PM->RCAUSE`.
    fn rcause(&mut self) -> u8;
    /// The four 32-bit words of the 128-bit serial number.
    fn serial_number(&mut self) -> [u32; 4];
    fn battery_adc_mv(&mut self, pin: Pin) -> u16;
}

pub const ADC_DIVIDER: u16 = 2;

/// Pin assignment for one SAMD board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamdWiring {
    pub i2c: I2cPins,
    pub spi: SpiPins,
    pub gnss: UartPins,
    pub battery: Pin,
    pub radio_rst: Pin,
    pub pps: Pin,
}

impl SamdWiring {
    pub const ZERO: Self = Self {
        i2c: pins::ZERO_I2C,
        spi: pins::ZERO_SPI,
        gnss: pins::ZERO_GNSS,
        battery: pins::ZERO_BATTERY,
        radio_rst: pins::ZERO_RADIO_RST,
        pps: pins::ZERO_GNSS_PPS,
    };
    pub const XIAO: Self = Self {
        i2c: pins::XIAO_I2C,
        spi: pins::XIAO_SPI,
        gnss: pins::XIAO_GNSS,
        battery: pins::XIAO_BATTERY,
        radio_rst: pins::XIAO_RADIO_RST,
        pps: pins::XIAO_GNSS_PPS,
    };

    pub const fn of(variant: BoardVariant) -> Self {
        match variant {
            BoardVariant::XiaoM0 => Self::XIAO,
            _ => Self::ZERO,
        }
    }
}

/// Device id folded from the serial number words.
pub fn chip_id_from_serial(words: [u32; 4]) -> u32 {
    words.iter().fold(0, |id, w| id ^ w)
}

pub struct Samd<H> {
    hw: H,
    board: HardwareProfile,
    wiring: SamdWiring,
    refresher: Refresher,
}

impl<H: SamdHal> Samd<H> {
    pub fn new(hw: H) -> Self {
        let variant = hw.variant();
        Self {
            hw,
            board: HardwareProfile::new(Model::Academy, variant),
            wiring: SamdWiring::of(variant),
            refresher: Refresher::new(),
        }
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

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
        self.hw.set_mode(self.wiring.battery, PinMode::HighZ);
    }

    fn battery_mv(&mut self, _p: &HardwareProfile) -> Option<u16> {
        let mv = self.hw.battery_adc_mv(self.wiring.battery);
        Some(mv.saturating_mul(ADC_DIVIDER))
    }

    fn battery_threshold(_p: &HardwareProfile) -> u16 {
        BatteryParams::NIMHX2.threshold_mv
    }

    fn battery_cutoff(_p: &HardwareProfile) -> u16 {
        BatteryParams::NIMHX2.cutoff_mv
    }

    fn baro_setup(&mut self, p: &HardwareProfile) -> bool {
        p.has_baro() && self.hw.baro_present()
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
        self.hw.serial_begin(self.wiring.gnss, baud);
    }
}

impl<H: SamdHal> SocOps for Samd<H> {
    const SOC: Soc = Soc::Samd;
    const NAME: &'static str = "SAMD";
    const DEFAULT_MODEL: Model = Model::Academy;

    fn setup(&mut self) -> HardwareProfile {
        let radio = self.hw.radio();
        let mut p = HardwareProfile::new(Self::DEFAULT_MODEL, self.hw.variant());
        p.radio = radio.ic;
        p.rf_reset_connected = radio.reset_connected;

        let bus = self.wiring.i2c;
        let oled = probe::probe_device(&mut self.hw, bus, addr::SSD1306);
        if oled {
            p.display = DisplayKind::OledTtgo;
            p.display_bus = Some(bus);
        }
        let baro = if oled {
            self.hw.baro_present()
        } else {
            probe::probe_first(&mut self.hw, &[bus], |h| h.baro_present()).is_some()
        };
        if baro {
            p.baro = Some(bus);
        }

        log::info!("{:?}, display {:?}", p.variant, p.display);
        self.board = p;
        p
    }

    fn loop_tick(&mut self, _profile: &HardwareProfile, _irq: &IrqRelay) -> Option<LoopEvent> {
        None
    }

    fn shutdown_plan(
        &self,
        profile: &HardwareProfile,
        reason: ShutdownReason,
        _config: &PowerConfig,
    ) -> PowerDownPlan {
        let mut plan = PowerDownPlan::new(Terminal::Halt);
        plan.push(PowerStep::WatchdogOff);
        if profile.display != DisplayKind::None {
            plan.push(PowerStep::DisplayFini(reason))
                .push(PowerStep::DisplaySleep);
        }
        plan.push(PowerStep::SpiEnd)
            .push(PowerStep::RadioOff)
            .push(PowerStep::SerialEnd)
            .push(PowerStep::Float(self.wiring.radio_rst));
        if let Some(bus) = profile.display_bus.or(profile.baro) {
            plan.push(PowerStep::BusRelease(bus));
        }
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
        chip_id_from_serial(self.hw.serial_number())
    }

    fn reset_code(&mut self) -> u32 {
        self.hw.rcause() as u32
    }

    fn decode_reset(code: u32, _flash_id: Option<FlashId>) -> ResetReason {
        reset::decode_samd(code as u8)
    }

    fn reset_info(code: u32) -> &'static str {
        reset::describe_samd(code as u8)
    }

    fn random(&mut self, low: i32, high: i32) -> i32 {
        random_in(self.hw.random_u32(), low, high)
    }

    fn spi_begin(&mut self, _profile: &HardwareProfile) -> SpiPins {
        self.hw.spi_begin(self.wiring.spi);
        self.wiring.spi
    }

    fn attach_interrupts(&mut self, _profile: &HardwareProfile) {
        self.hw.set_mode(self.wiring.pps, PinMode::Input);
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
    const WATCHDOG: Option<WatchdogOps<Self>> = Some(WatchdogOps {
        setup: Self::watchdog_setup,
        feed: Self::watchdog_feed,
        fini: Self::watchdog_fini,
    });
    const SERIAL: Option<SerialOps<Self>> = Some(SerialOps {
        begin: Self::serial_begin,
    });
}
