/// Host test doubles: a recording fake for every hardware port and a
/// scripted operations table for driving the power sequencer.
use std::cell::Cell;
use std::string::String;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::hal::{BaroProbe, Buzzer, Clock, Gpio, I2cBus, Links, Panel, SleepControl, Watchdog};
use crate::irq::IrqRelay;
use crate::ops::{random_in, LoopEvent, SocOps};
use crate::pins::{esp32, I2cPins, Level, Pin, PinMode, SpiPins, UartPins};
use crate::platform::esp32::{Esp32Family, Esp32Hal};
use crate::platform::psoc4::Psoc4Hal;
use crate::platform::samd::SamdHal;
use crate::platform::BoardHal;
use crate::pmu::{ChargeLed, PekIrq, Pmu, PmuError, Rail};
use crate::power::{PowerConfig, PowerDownPlan, PowerStep, ShutdownReason, StepStatus, Terminal, WakeSource};
use crate::probe::ProbeError;
use crate::profile::{BoardVariant, DisplayKind, FlashId, HardwareProfile, Model, PmuKind, RadioIc, RadioInfo, Soc};
use crate::reset::{decode_esp32, describe_esp32, ResetReason};

/// Everything the fakes record, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Attach(I2cPins),
    Detach(I2cPins),
    Probe(u8),
    Mode(Pin, PinMode),
    Write(Pin, Level),
    Delay(u32),
    PanelBegin(DisplayKind),
    Message(String),
    Backlight(u8),
    PanelSleep,
    Refresh,
    NextPage,
    ArmWake(WakeSource),
    DeepSleep,
    Idle,
    Reset,
    Tone(u32),
    NoTone,
    SpiBegin(SpiPins),
    SpiEnd,
    SerialBegin(UartPins, u32),
    SerialEnd,
    RadioOff,
    UartPut(u8),
    WdtEnable(u32),
    WdtDisable,
    WdtFeed,
    PmuBegin(PmuKind),
    Rail(Rail, bool),
    PmuSleep,
    PmuPowerOff,
    ChargeLed(ChargeLed),
    ClearIrq,
    WifiPower(i8),
    EepromBegin(usize),
    // ScriptedSoc
    Step(PowerStep),
    Enter(Terminal),
    Restart,
}

/// Recording fake for all hardware ports. Unset inputs read high, devices
/// answer only on the bus they were added to.
pub struct FakeHw {
    pub log: Vec<Action>,
    pub attached: Option<I2cPins>,
    pub panel_ok: bool,
    pub now: u32,
    devices: Vec<(I2cPins, u8)>,
    baros: Vec<I2cPins>,
    levels: Vec<(Pin, Level)>,
    releases: Vec<(Pin, u32)>,

    pub pmu: Option<PmuKind>,
    /// PMU sleep requests that go unconfirmed before one latches.
    pub pmu_sleep_nacks: u32,
    pub pek: PekIrq,
    pub pmu_battery_mv: Option<u16>,

    pub family: Esp32Family,
    pub psram: bool,
    pub flash_id: FlashId,
    pub pico_d4: bool,
    pub custom_mac: Result<[u8; 6], ProbeError>,
    pub factory_mac: [u8; 6],
    pub reset_code: u32,
    pub random: u32,
    pub radio: RadioInfo,
    pub adc_mv: u16,
    pub uid: u32,
    pub rcause: u8,
    pub serial_number: [u32; 4],
    pub samd_variant: BoardVariant,
    /// Bytes the UART accepts before reporting not ready.
    pub uart_room: usize,
}

impl FakeHw {
    pub fn new() -> Self {
        Self {
            log: Vec::new(),
            attached: None,
            panel_ok: true,
            now: 0,
            devices: Vec::new(),
            baros: Vec::new(),
            levels: Vec::new(),
            releases: Vec::new(),
            pmu: None,
            pmu_sleep_nacks: 0,
            pek: PekIrq::default(),
            pmu_battery_mv: None,
            family: Esp32Family::Esp32,
            psram: false,
            flash_id: FlashId(0),
            pico_d4: false,
            custom_mac: Err(ProbeError::Blank),
            factory_mac: [0x24, 0x0A, 0xC4, 0x12, 0x34, 0x56],
            reset_code: 1,
            random: 0,
            radio: RadioInfo {
                ic: RadioIc::None,
                reset_connected: false,
            },
            adc_mv: 0,
            uid: 0,
            rcause: 0x01,
            serial_number: [0; 4],
            samd_variant: BoardVariant::SamdZero,
            uart_room: usize::MAX,
        }
    }

    pub fn add_device(&mut self, pins: I2cPins, addr: u8) {
        self.devices.push((pins, addr));
    }

    pub fn add_baro(&mut self, pins: I2cPins) {
        self.baros.push(pins);
    }

    pub fn set_level(&mut self, pin: Pin, level: Level) {
        self.levels.retain(|(p, _)| *p != pin);
        self.levels.push((pin, level));
    }

    /// `pin` reads its current level `reads` more times, then goes high.
    pub fn release_after(&mut self, pin: Pin, reads: u32) {
        self.releases.push((pin, reads));
    }

    pub fn index_of(&self, action: &Action) -> Option<usize> {
        self.log.iter().position(|a| a == action)
    }

    pub fn count(&self, action: &Action) -> usize {
        self.log.iter().filter(|a| *a == action).count()
    }

    pub fn has_pmu_traffic(&self) -> bool {
        self.log.iter().any(|a| {
            matches!(
                a,
                Action::PmuBegin(_)
                    | Action::Rail(..)
                    | Action::PmuSleep
                    | Action::PmuPowerOff
                    | Action::ChargeLed(_)
                    | Action::ClearIrq
            )
        })
    }

    fn pmu_ready(&self) -> Result<(), PmuError> {
        self.pmu.map(|_| ()).ok_or(PmuError::Absent)
    }
}

impl Default for FakeHw {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cBus for FakeHw {
    fn attach(&mut self, pins: I2cPins) {
        self.attached = Some(pins);
        self.log.push(Action::Attach(pins));
    }

    fn probe(&mut self, addr: u8) -> bool {
        self.log.push(Action::Probe(addr));
        match self.attached {
            Some(bus) => self.devices.contains(&(bus, addr)),
            None => false,
        }
    }

    fn detach(&mut self, pins: I2cPins) {
        if self.attached == Some(pins) {
            self.attached = None;
        }
        self.log.push(Action::Detach(pins));
    }
}

impl Gpio for FakeHw {
    fn set_mode(&mut self, pin: Pin, mode: PinMode) {
        self.log.push(Action::Mode(pin, mode));
    }

    fn write(&mut self, pin: Pin, level: Level) {
        self.log.push(Action::Write(pin, level));
    }

    fn read(&mut self, pin: Pin) -> Level {
        if let Some(i) = self.releases.iter().position(|(p, _)| *p == pin) {
            if self.releases[i].1 == 0 {
                self.releases.remove(i);
                self.set_level(pin, Level::High);
            } else {
                self.releases[i].1 -= 1;
            }
        }
        self.levels
            .iter()
            .find(|(p, _)| *p == pin)
            .map(|&(_, l)| l)
            .unwrap_or(Level::High)
    }
}

impl Clock for FakeHw {
    fn millis(&self) -> u32 {
        self.now
    }
}

impl DelayNs for FakeHw {
    fn delay_ns(&mut self, ns: u32) {
        self.now = self.now.wrapping_add(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.log.push(Action::Delay(ms));
        self.now = self.now.wrapping_add(ms);
    }
}

impl SleepControl for FakeHw {
    fn arm_wake(&mut self, wake: WakeSource) {
        self.log.push(Action::ArmWake(wake));
    }

    fn deep_sleep(&mut self) {
        self.log.push(Action::DeepSleep);
    }

    fn idle(&mut self) {
        self.log.push(Action::Idle);
    }

    fn software_reset(&mut self) {
        self.log.push(Action::Reset);
    }
}

impl Panel for FakeHw {
    fn begin(&mut self, kind: DisplayKind) -> bool {
        self.log.push(Action::PanelBegin(kind));
        self.panel_ok
    }

    fn show_message(&mut self, msg: &str) {
        self.log.push(Action::Message(msg.into()));
    }

    fn set_backlight(&mut self, level: u8) {
        self.log.push(Action::Backlight(level));
    }

    fn sleep(&mut self) {
        self.log.push(Action::PanelSleep);
    }

    fn refresh(&mut self) {
        self.log.push(Action::Refresh);
    }

    fn next_page(&mut self) {
        self.log.push(Action::NextPage);
    }
}

impl Buzzer for FakeHw {
    fn tone(&mut self, hz: u32) {
        self.log.push(Action::Tone(hz));
    }

    fn no_tone(&mut self) {
        self.log.push(Action::NoTone);
    }
}

impl Links for FakeHw {
    fn spi_begin(&mut self, pins: SpiPins) {
        self.log.push(Action::SpiBegin(pins));
    }

    fn spi_end(&mut self) {
        self.log.push(Action::SpiEnd);
    }

    fn serial_begin(&mut self, pins: UartPins, baud: u32) {
        self.log.push(Action::SerialBegin(pins, baud));
    }

    fn serial_end(&mut self) {
        self.log.push(Action::SerialEnd);
    }

    fn radio_off(&mut self) {
        self.log.push(Action::RadioOff);
    }

    fn uart_ready(&mut self) -> bool {
        self.uart_room > 0
    }

    fn uart_put(&mut self, byte: u8) {
        self.uart_room = self.uart_room.saturating_sub(1);
        self.log.push(Action::UartPut(byte));
    }
}

impl Watchdog for FakeHw {
    fn enable(&mut self, timeout_ms: u32) {
        self.log.push(Action::WdtEnable(timeout_ms));
    }

    fn disable(&mut self) {
        self.log.push(Action::WdtDisable);
    }

    fn feed(&mut self) {
        self.log.push(Action::WdtFeed);
    }
}

impl BaroProbe for FakeHw {
    fn baro_present(&mut self) -> bool {
        matches!(self.attached, Some(bus) if self.baros.contains(&bus))
    }
}

impl Pmu for FakeHw {
    fn pmu_begin(&mut self, kind: PmuKind) -> Result<(), PmuError> {
        self.log.push(Action::PmuBegin(kind));
        self.pmu = Some(kind);
        Ok(())
    }

    fn pmu_set_rail(&mut self, rail: Rail, on: bool) -> Result<(), PmuError> {
        self.pmu_ready()?;
        self.log.push(Action::Rail(rail, on));
        Ok(())
    }

    fn pmu_request_sleep(&mut self) -> Result<bool, PmuError> {
        self.pmu_ready()?;
        self.log.push(Action::PmuSleep);
        if self.pmu_sleep_nacks > 0 {
            self.pmu_sleep_nacks -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn pmu_power_off(&mut self) -> Result<(), PmuError> {
        self.pmu_ready()?;
        self.log.push(Action::PmuPowerOff);
        Ok(())
    }

    fn pmu_charge_led(&mut self, mode: ChargeLed) -> Result<(), PmuError> {
        self.pmu_ready()?;
        self.log.push(Action::ChargeLed(mode));
        Ok(())
    }

    fn pmu_read_irq(&mut self) -> Result<PekIrq, PmuError> {
        self.pmu_ready()?;
        Ok(self.pek)
    }

    fn pmu_clear_irq(&mut self) -> Result<(), PmuError> {
        self.pmu_ready()?;
        self.pek = PekIrq::default();
        self.log.push(Action::ClearIrq);
        Ok(())
    }

    fn pmu_battery_mv(&mut self) -> Result<Option<u16>, PmuError> {
        self.pmu_ready()?;
        Ok(self.pmu_battery_mv)
    }
}

impl BoardHal for FakeHw {
    fn random_u32(&mut self) -> u32 {
        self.random
    }

    fn radio(&mut self) -> RadioInfo {
        self.radio
    }
}

impl Esp32Hal for FakeHw {
    fn family(&self) -> Esp32Family {
        self.family
    }

    fn psram_found(&mut self) -> bool {
        self.psram
    }

    fn flash_id(&mut self) -> FlashId {
        self.flash_id
    }

    fn is_pico_d4(&mut self) -> bool {
        self.pico_d4
    }

    fn custom_mac(&mut self) -> Result<[u8; 6], ProbeError> {
        self.custom_mac
    }

    fn factory_mac(&mut self) -> [u8; 6] {
        self.factory_mac
    }

    fn reset_code(&mut self) -> u32 {
        self.reset_code
    }

    fn battery_adc_mv(&mut self, _pin: Pin) -> u16 {
        self.adc_mv
    }

    fn set_wifi_tx_power(&mut self, level: i8) {
        self.log.push(Action::WifiPower(level));
    }

    fn eeprom_begin(&mut self, size: usize) -> bool {
        self.log.push(Action::EepromBegin(size));
        true
    }
}

impl Psoc4Hal for FakeHw {
    fn reset_cause(&mut self) -> u32 {
        self.reset_code
    }

    fn unique_id(&mut self) -> u32 {
        self.uid
    }

    fn battery_adc_mv(&mut self) -> u16 {
        self.adc_mv
    }
}

impl SamdHal for FakeHw {
    fn variant(&self) -> BoardVariant {
        self.samd_variant
    }

    fn rcause(&mut self) -> u8 {
        self.rcause
    }

    fn serial_number(&mut self) -> [u32; 4] {
        self.serial_number
    }

    fn battery_adc_mv(&mut self, _pin: Pin) -> u16 {
        self.adc_mv
    }
}

// ── Scripted operations table ─────────────────────────────────────────

/// Returns a fixed plan and records what the sequencer asks of it.
pub struct ScriptedSoc {
    pub steps: &'static [PowerStep],
    pub terminal: Terminal,
    /// `PmuSleep` stays unconfirmed for this many attempts.
    pub acks_needed: u32,
    acks: u32,
    pub confirm_wake: bool,
    pub log: Vec<Action>,
    pub plans_built: Cell<u32>,
}

impl ScriptedSoc {
    pub fn new(terminal: Terminal) -> Self {
        Self {
            steps: &[],
            terminal,
            acks_needed: 0,
            acks: 0,
            confirm_wake: true,
            log: Vec::new(),
            plans_built: Cell::new(0),
        }
    }

    pub fn profile(&self) -> HardwareProfile {
        HardwareProfile::new(Model::Standalone, BoardVariant::Esp32DevKit)
    }
}

impl SocOps for ScriptedSoc {
    const SOC: Soc = Soc::Esp32;
    const NAME: &'static str = "scripted";
    const DEFAULT_MODEL: Model = Model::Standalone;

    fn setup(&mut self) -> HardwareProfile {
        self.profile()
    }

    fn loop_tick(&mut self, _profile: &HardwareProfile, _irq: &IrqRelay) -> Option<LoopEvent> {
        None
    }

    fn shutdown_plan(
        &self,
        _profile: &HardwareProfile,
        _reason: ShutdownReason,
        _config: &PowerConfig,
    ) -> PowerDownPlan {
        self.plans_built.set(self.plans_built.get() + 1);
        let mut plan = PowerDownPlan::new(self.terminal);
        for step in self.steps {
            plan.push(*step);
        }
        plan
    }

    fn apply(&mut self, step: &PowerStep) -> StepStatus {
        self.log.push(Action::Step(*step));
        if *step == PowerStep::PmuSleep {
            self.acks += 1;
            if self.acks <= self.acks_needed {
                return StepStatus::Unconfirmed;
            }
        }
        StepStatus::Done
    }

    fn enter(&mut self, terminal: Terminal) {
        self.log.push(Action::Enter(terminal));
    }

    fn idle(&mut self) {
        self.log.push(Action::Idle);
    }

    fn restart(&mut self) {
        self.log.push(Action::Restart);
    }

    fn chip_id(&mut self) -> u32 {
        0
    }

    fn reset_code(&mut self) -> u32 {
        1
    }

    fn decode_reset(code: u32, flash_id: Option<FlashId>) -> ResetReason {
        decode_esp32(code, flash_id)
    }

    fn reset_info(code: u32) -> &'static str {
        describe_esp32(code)
    }

    fn random(&mut self, low: i32, high: i32) -> i32 {
        random_in(0, low, high)
    }

    fn spi_begin(&mut self, _profile: &HardwareProfile) -> SpiPins {
        esp32::DEFAULT_SPI
    }

    fn wake_confirmed(&mut self, _wake: WakeSource) -> bool {
        self.confirm_wake
    }
}
