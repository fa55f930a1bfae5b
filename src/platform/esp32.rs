/// ESP32 / ESP32-S2 operations table.
///
/// Identification runs in a fixed order, each step narrowing the previous
/// one: flash id (PSRAM modules only) or package → PMU probe (revision) →
/// barometer bus → OLED bus. A later probe never overrides what an earlier
/// one settled except where the board family demands it (the T3 revision
/// is only knowable once its OLED answers).
use crate::battery::BatteryParams;
use crate::button::ButtonTracker;
use crate::display::{self, Refresher};
use crate::hal::{Buzzer, Interval, Panel, Watchdog};
use crate::irq::IrqRelay;
use crate::ops::{
    boot_tones, chip_id_from_mac, random_in, wifi_power_level, BaroOps, BatteryOps, ButtonOps,
    DisplayOps, EepromOps, LoopEvent, SerialOps, SocOps, SoundOps, WatchdogOps, WifiOps,
};
use crate::pins::{addr, esp32 as pins, I2cPins, Pin, PinMode, SpiPins, UartPins};
use crate::platform::{apply_board_step, enter_board, poll_button, BoardHal, WDT_TIMEOUT_MS};
use crate::pmu::{ChargeLed, Pmu, Rail};
use crate::power::{
    select_wake, PmuSleepMode, PowerConfig, PowerDownPlan, PowerStep, ShutdownReason, StepStatus,
    Terminal, WakeSource,
};
use crate::probe::{self, ProbeError};
use crate::profile::{
    flash, BoardVariant, DisplayKind, FlashId, HardwareProfile, Model, PmuInfo, PmuKind, Soc,
    StorageKind,
};
use crate::reset::{self, ResetReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Esp32Family {
    Esp32,
    Esp32S2,
}

/// What the ESP32 firmware has to provide on top of the common ports.
pub trait Esp32Hal: BoardHal + Pmu + Buzzer {
    fn family(&self) -> Esp32Family;
    fn psram_found(&mut self) -> bool;
    /// JEDEC id of the boot flash, as seen by the ROM loader.
    fn flash_id(&mut self) -> FlashId;
    /// eFuse package field says ESP32-PICO-D4.
    fn is_pico_d4(&mut self) -> bool;
    /// Base MAC from the custom eFuse block.
    fn custom_mac(&mut self) -> Result<[u8; 6], ProbeError>;
    fn factory_mac(&mut self) -> [u8; 6];
    /// RTC reset cause of the PRO CPU.
    fn reset_code(&mut self) -> u32;
    /// Calibrated ADC1 reading on `pin`, in millivolts at the pin.
    fn battery_adc_mv(&mut self, pin: Pin) -> u16;
    /// `esp_wifi_set_max_tx_power` units (0.25 dBm).
    fn set_wifi_tx_power(&mut self, level: i8);
    /// Map `size` bytes of the NVS-backed EEPROM emulation.
    fn eeprom_begin(&mut self, size: usize) -> bool;
}

/// Model by flash id, consulted only on modules with PSRAM.
pub const FLASH_MODELS: &[(FlashId, Model)] = &[
    // WROVER on a NodeMCU adapter
    (flash::GD25LQ32, Model::Standalone),
    (flash::W25Q128_V, Model::SkyWatch),
];
/// Any other PSRAM module is a T-Beam.
pub const FLASH_FALLBACK: Model = Model::PrimeMk2;

const PMU_SETTLE_MS: u32 = 20;
const TONE_STEP_MS: u32 = 500;
const TONE_HOLD_MS: u32 = 600;

pub struct Esp32<H> {
    hw: H,
    mac: [u8; 6],
    board: HardwareProfile,
    button: ButtonTracker,
    refresher: Refresher,
    charge_led: Interval,
}

impl<H: Esp32Hal> Esp32<H> {
    pub fn new(hw: H) -> Self {
        Self {
            hw,
            mac: [0; 6],
            board: HardwareProfile::new(Model::Standalone, BoardVariant::Esp32DevKit),
            button: ButtonTracker::new(),
            refresher: Refresher::new(),
            charge_led: Interval::new(PowerConfig::new().battery_interval_ms),
        }
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    // ── Identification ──

    fn identify_model(&mut self, p: &mut HardwareProfile) {
        if self.hw.family() == Esp32Family::Esp32S2 {
            p.variant = BoardVariant::T8S2;
            return;
        }

        if self.hw.psram_found() {
            if let Some(id) = p.flash_id {
                p.model = probe::model_for_flash(FLASH_MODELS, id, FLASH_FALLBACK);
            }
        } else if self.hw.is_pico_d4() {
            p.variant = BoardVariant::TtgoV2Oled;
        }

        match p.model {
            Model::SkyWatch => p.variant = BoardVariant::TtgoTWatch,
            Model::PrimeMk2 => p.variant = BoardVariant::TtgoTBeam,
            _ => {}
        }
    }

    /// T-Watch: AXP202 on the sensor bus. T-Beam: an AXP192 on the OLED bus
    /// means rev 8, none means rev 2.
    fn probe_pmu(&mut self, p: &mut HardwareProfile) {
        let (kind, bus, irq) = match p.model {
            Model::SkyWatch => (PmuKind::Axp202, pins::TWATCH_SENSOR_I2C, pins::TWATCH_PMU_IRQ),
            Model::PrimeMk2 => (PmuKind::Axp192, pins::TTGO_OLED_I2C, pins::TBEAM_V08_PMU_IRQ),
            _ => return,
        };
        let address = match kind {
            PmuKind::Axp192 => addr::AXP192,
            PmuKind::Axp202 => addr::AXP202,
        };

        let found = probe::probe_device(&mut self.hw, bus, address);
        if p.model == Model::PrimeMk2 {
            p.revision = if found { 8 } else { 2 };
        }
        if !found {
            return;
        }

        p.pmu = Some(PmuInfo { kind, bus, irq });
        if let Err(e) = self.hw.pmu_begin(kind) {
            log::warn!("{:?} setup failed: {:?}", kind, e);
        }
    }

    /// Returns true when the barometer took the 21/22 lines.
    fn probe_baro(&mut self, p: &mut HardwareProfile) -> bool {
        let candidates: &[I2cPins] = match (p.model, p.variant) {
            (Model::SkyWatch, _) => &[],
            (_, BoardVariant::T8S2) => &[pins::T8_S2_I2C],
            (Model::PrimeMk2, _) => {
                if p.revision == 2 && p.rf_reset_connected {
                    p.revision = 5;
                }
                if p.revision == 2 {
                    &[pins::TBEAM_I2C]
                } else {
                    &[pins::TBEAM_I2C, pins::TTGO_OLED_I2C]
                }
            }
            // The baro header shares lines with the radio reset.
            _ if p.radio.is_sx12xx() && !p.rf_reset_connected => &[pins::DEFAULT_I2C],
            _ => &[],
        };

        p.baro = probe::probe_first(&mut self.hw, candidates, |h| h.baro_present());
        p.baro == Some(pins::TTGO_OLED_I2C)
    }

    fn probe_display(&mut self, p: &mut HardwareProfile, oled_lines_busy: bool) {
        match p.variant {
            BoardVariant::TtgoTWatch => {
                p.display = DisplayKind::TftTtgo240;
                return;
            }
            BoardVariant::T8S2 => {
                p.display = DisplayKind::TftTtgo135;
                return;
            }
            _ => {}
        }

        let candidates: &[I2cPins] = if oled_lines_busy {
            &[pins::HELTEC_OLED_I2C]
        } else if p.model == Model::PrimeMk2 && p.revision == 8 {
            &[pins::TTGO_OLED_I2C]
        } else {
            &[pins::TTGO_OLED_I2C, pins::HELTEC_OLED_I2C]
        };

        let Some(bus) = probe::probe_first(&mut self.hw, candidates, |h| h.probe(addr::SSD1306)) else {
            return;
        };
        p.display_bus = Some(bus);

        if bus == pins::TTGO_OLED_I2C {
            p.display = DisplayKind::OledTtgo;
            if p.model != Model::PrimeMk2 {
                p.variant = BoardVariant::TtgoV2Oled;
            }
            if p.model == Model::Standalone {
                p.revision = if p.rf_reset_connected { 16 } else { 11 };
                p.storage = StorageKind::Sd;
            }
        } else {
            p.display = DisplayKind::OledHeltec;
            if p.model != Model::PrimeMk2 {
                p.variant = BoardVariant::HeltecOled;
            }
        }
    }

    fn button_pin(p: &HardwareProfile) -> Option<Pin> {
        match (p.model, p.variant) {
            (_, BoardVariant::T8S2) => Some(pins::T8_S2_BUTTON),
            (Model::PrimeMk2, _) if p.revision == 2 || p.revision == 5 => Some(pins::TBEAM_V05_BUTTON),
            _ => None,
        }
    }

    /// ADC pin and whether it sits behind a 100k/100k divider.
    fn battery_adc(p: &HardwareProfile) -> (Pin, bool) {
        if p.variant == BoardVariant::T8S2 {
            return (pins::T8_S2_BATTERY_ADC, true);
        }
        let divided = p.model == Model::PrimeMk2
            || (p.variant == BoardVariant::TtgoV2Oled && p.revision == 16);
        if divided {
            (pins::BATTERY_ADC_GPIO35, true)
        } else {
            (pins::BATTERY_ADC_GPIO36, false)
        }
    }

    fn gnss_port(p: &HardwareProfile) -> UartPins {
        match (p.model, p.variant) {
            (Model::PrimeMk2, _) if p.revision == 8 => pins::TBEAM_V08_GNSS,
            (Model::PrimeMk2, _) => pins::TBEAM_V05_GNSS,
            (_, BoardVariant::TtgoTWatch) => pins::TWATCH_GNSS,
            (_, BoardVariant::TtgoV2Oled) => pins::TTGO_V2_GNSS,
            (_, BoardVariant::T8S2) => pins::T8_S2_GNSS,
            _ => pins::STANDALONE_GNSS,
        }
    }

    fn pmu_battery(&mut self) -> Option<u16> {
        match self.hw.pmu_battery_mv() {
            Ok(mv) => mv,
            Err(e) => {
                log::warn!("PMU battery read failed: {:?}", e);
                None
            }
        }
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

    fn battery_setup(&mut self, p: &HardwareProfile) {
        if !p.is_pmu_managed() {
            let (pin, _) = Self::battery_adc(p);
            self.hw.set_mode(pin, PinMode::HighZ);
        }
    }

    fn battery_mv(&mut self, p: &HardwareProfile) -> Option<u16> {
        if p.is_pmu_managed() {
            return self.pmu_battery();
        }
        let (pin, divided) = Self::battery_adc(p);
        let mv = self.hw.battery_adc_mv(pin);
        Some(if divided { mv.saturating_mul(2) } else { mv })
    }

    fn battery_threshold(p: &HardwareProfile) -> u16 {
        BatteryParams::esp32(p).threshold_mv
    }

    fn battery_cutoff(p: &HardwareProfile) -> u16 {
        BatteryParams::esp32(p).cutoff_mv
    }

    fn baro_setup(&mut self, p: &HardwareProfile) -> bool {
        match p.baro {
            Some(bus) => {
                self.hw.attach(bus);
                self.hw.baro_present()
            }
            None => false,
        }
    }

    fn button_setup(&mut self, p: &HardwareProfile) {
        // External pull-up on every supported board.
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

    fn sound_test(&mut self, reason: ResetReason) {
        let tones = boot_tones(reason);
        for (i, hz) in tones.iter().enumerate() {
            self.hw.tone(*hz);
            if i + 1 < tones.len() {
                self.hw.delay_ms(TONE_STEP_MS);
            }
        }
        self.hw.delay_ms(TONE_HOLD_MS);
        self.hw.no_tone();
    }

    fn sound_tone(&mut self, hz: u32) {
        if hz == 0 {
            self.hw.no_tone();
        } else {
            self.hw.tone(hz);
        }
    }

    fn wifi_tx_power(&mut self, dbm: i8) {
        self.hw.set_wifi_tx_power(wifi_power_level(dbm));
    }

    fn eeprom_begin(&mut self, size: usize) -> bool {
        let ok = self.hw.eeprom_begin(size);
        if !ok {
            log::error!("EEPROM emulation unavailable ({} bytes)", size);
        }
        ok
    }

    fn serial_begin(&mut self, p: &HardwareProfile, baud: u32) {
        let port = Self::gnss_port(p);
        log::info!("GNSS on RX {} / TX {} at {} baud", port.rx.0, port.tx.0, baud);
        self.hw.serial_begin(port, baud);
    }
}

impl<H: Esp32Hal> SocOps for Esp32<H> {
    const SOC: Soc = Soc::Esp32;
    const NAME: &'static str = "ESP32";
    const DEFAULT_MODEL: Model = Model::Standalone;

    fn setup(&mut self) -> HardwareProfile {
        self.mac = probe::base_mac(self.hw.custom_mac(), self.hw.factory_mac());

        let radio = self.hw.radio();
        let mut p = HardwareProfile::new(Self::DEFAULT_MODEL, BoardVariant::Esp32DevKit);
        p.radio = radio.ic;
        p.rf_reset_connected = radio.reset_connected;
        p.flash_id = Some(self.hw.flash_id());

        self.identify_model(&mut p);
        self.probe_pmu(&mut p);
        let oled_lines_busy = self.probe_baro(&mut p);
        self.probe_display(&mut p, oled_lines_busy);
        p.button = Self::button_pin(&p);

        if p.variant == BoardVariant::T8S2 {
            self.hw.set_mode(pins::T8_S2_PWR_EN, PinMode::InputPullUp);
        }

        log::info!(
            "{:?} rev {} ({:?}), display {:?}, flash {:06X}",
            p.model,
            p.revision,
            p.variant,
            p.display,
            p.flash_id.map_or(0, |f| f.0)
        );
        self.board = p;
        p
    }

    fn post_init(&mut self, profile: &HardwareProfile) {
        log::info!(
            "PMU {:?}, baro {:?}, button {:?}, storage {:?}",
            profile.pmu.map(|p| p.kind),
            profile.baro,
            profile.button,
            profile.storage
        );
    }

    fn loop_tick(&mut self, profile: &HardwareProfile, irq: &IrqRelay) -> Option<LoopEvent> {
        if !profile.is_pmu_managed() || profile.pmu.is_none() {
            return None;
        }

        let mut event = None;
        if irq.take_pmu_alert() {
            match self.hw.pmu_read_irq() {
                Ok(pek) => {
                    if pek.short_press {
                        event = Some(LoopEvent::NextPage);
                    }
                    if pek.long_press {
                        event = Some(LoopEvent::Shutdown(ShutdownReason::ButtonLongPress));
                    }
                    if let Err(e) = self.hw.pmu_clear_irq() {
                        log::warn!("PMU IRQ clear failed: {:?}", e);
                    }
                }
                Err(e) => log::warn!("PMU IRQ read failed: {:?}", e),
            }
        }

        if self.charge_led.due(self.hw.millis()) {
            let threshold = Self::battery_threshold(profile);
            let mode = if self.pmu_battery().is_some_and(|mv| mv > threshold) {
                ChargeLed::On
            } else {
                ChargeLed::Blink1Hz
            };
            if let Err(e) = self.hw.pmu_charge_led(mode) {
                log::warn!("charge LED: {:?}", e);
            }
        }

        event
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
        plan.push(PowerStep::SpiEnd).push(PowerStep::RadioOff);

        match (profile.model, profile.pmu) {
            (Model::SkyWatch, Some(pmu)) => {
                plan.push(PowerStep::ChargeLed(ChargeLed::Off))
                    .push(PowerStep::RailOff(Rail::Ldo2))
                    .push(PowerStep::RailOff(Rail::Ldo4))
                    .push(PowerStep::RailOff(Rail::Ldo3))
                    .push(PowerStep::Settle(PMU_SETTLE_MS));
                plan.terminal = Terminal::DeepSleep(WakeSource::pmu_irq(pmu.irq));
            }
            (Model::PrimeMk2, Some(pmu)) if profile.revision == 8 => {
                plan.push(PowerStep::ChargeLed(ChargeLed::Off));
                if config.pmu_sleep == PmuSleepMode::PmuSleep {
                    plan.push(PowerStep::PmuSleep);
                }
                plan.push(PowerStep::RailOff(Rail::Ldo2))
                    .push(PowerStep::RailOff(Rail::Ldo3))
                    .push(PowerStep::RailOff(Rail::Dcdc2));
                // A 'noname' OLED on DCDC1 blocks PMU access once unpowered.
                if profile.display == DisplayKind::None {
                    plan.push(PowerStep::RailOff(Rail::Dcdc1));
                }
                plan.push(PowerStep::RailOff(Rail::Exten))
                    .push(PowerStep::Settle(PMU_SETTLE_MS));

                plan.terminal = match config.pmu_sleep {
                    PmuSleepMode::DeepSleep => Terminal::DeepSleep(WakeSource::pmu_irq(pmu.irq)),
                    PmuSleepMode::PmuSleep => {
                        plan.push(PowerStep::RailOff(Rail::Dcdc3));
                        Terminal::Halt
                    }
                    PmuSleepMode::PowerOff => Terminal::PowerOff,
                };
            }
            _ if profile.variant == BoardVariant::T8S2 => {
                plan.push(PowerStep::Input(pins::T8_S2_PWR_EN));
                plan.terminal = Terminal::DeepSleep(WakeSource::button(pins::T8_S2_BUTTON));
            }
            _ => {
                let wake = select_wake(reason, profile.button.map(WakeSource::button), None);
                plan.terminal = wake.map_or(Terminal::Halt, Terminal::DeepSleep);
            }
        }
        plan
    }

    fn apply(&mut self, step: &PowerStep) -> StepStatus {
        if let Some(status) = apply_board_step(&mut self.hw, step, self.board.display) {
            return status;
        }

        let result = match *step {
            PowerStep::ChargeLed(mode) => self.hw.pmu_charge_led(mode),
            PowerStep::RailOff(rail) => self.hw.pmu_set_rail(rail, false),
            PowerStep::PmuSleep => {
                return match self.hw.pmu_request_sleep() {
                    Ok(true) => StepStatus::Done,
                    Ok(false) => StepStatus::Unconfirmed,
                    Err(e) => {
                        log::warn!("PMU sleep request: {:?}", e);
                        StepStatus::Unconfirmed
                    }
                };
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            log::warn!("{:?}: {:?}", step, e);
        }
        StepStatus::Done
    }

    fn enter(&mut self, terminal: Terminal) {
        if enter_board(&mut self.hw, terminal) {
            return;
        }
        if let Err(e) = self.hw.pmu_power_off() {
            log::error!("PMU power-off failed ({:?}), sleeping instead", e);
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
        chip_id_from_mac(&self.mac)
    }

    fn reset_code(&mut self) -> u32 {
        self.hw.reset_code()
    }

    fn decode_reset(code: u32, flash_id: Option<FlashId>) -> ResetReason {
        reset::decode_esp32(code, flash_id)
    }

    fn reset_info(code: u32) -> &'static str {
        reset::describe_esp32(code)
    }

    fn random(&mut self, low: i32, high: i32) -> i32 {
        random_in(self.hw.random_u32(), low, high)
    }

    fn spi_begin(&mut self, profile: &HardwareProfile) -> SpiPins {
        let bus = if profile.variant == BoardVariant::T8S2 {
            pins::T8_S2_SPI
        } else {
            pins::DEFAULT_SPI
        };
        self.hw.spi_begin(bus);
        bus
    }

    fn attach_interrupts(&mut self, profile: &HardwareProfile) {
        if let Some(pmu) = profile.pmu {
            let mode = if pmu.kind == PmuKind::Axp202 {
                PinMode::InputPullUp
            } else {
                PinMode::Input
            };
            self.hw.set_mode(pmu.irq, mode);
        }
        if profile.model == Model::PrimeMk2 && profile.revision == 8 {
            self.hw.set_mode(pins::GNSS_PPS, PinMode::Input);
        }
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
    const SOUND: Option<SoundOps<Self>> = Some(SoundOps {
        test: Self::sound_test,
        tone: Self::sound_tone,
    });
    const WIFI: Option<WifiOps<Self>> = Some(WifiOps {
        set_tx_power: Self::wifi_tx_power,
    });
    const SERIAL: Option<SerialOps<Self>> = Some(SerialOps {
        begin: Self::serial_begin,
    });
    const EEPROM: Option<EepromOps<Self>> = Some(EepromOps {
        begin: Self::eeprom_begin,
    });
}
