/// The operations table each platform provides.
///
/// Mandatory operations are required trait methods, so a platform that lacks
/// one does not build. Optional capability groups are associated constants
/// that default to `None`; callers check for `Some` and otherwise do nothing.
/// Exactly one implementation is selected per image (see `board::Selected`).
use crate::irq::IrqRelay;
use crate::pins::SpiPins;
use crate::power::{
    PowerConfig, PowerDownPlan, PowerStep, ShutdownReason, StepStatus, Terminal, WakeSource,
};
use crate::profile::{DisplayKind, FlashId, HardwareProfile, Model, Soc};
use crate::reset::ResetReason;

/// Something the platform loop wants the system to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Shutdown(ShutdownReason),
    NextPage,
}

pub struct DisplayOps<P> {
    pub setup: fn(&mut P, &HardwareProfile) -> DisplayKind,
    pub tick: fn(&mut P, &HardwareProfile),
    pub next_page: fn(&mut P),
    pub fini: fn(&mut P, &HardwareProfile, ShutdownReason),
}

/// Battery voltages are in millivolts.
pub struct BatteryOps<P> {
    pub setup: fn(&mut P, &HardwareProfile),
    pub voltage_mv: fn(&mut P, &HardwareProfile) -> Option<u16>,
    pub threshold_mv: fn(&HardwareProfile) -> u16,
    pub cutoff_mv: fn(&HardwareProfile) -> u16,
}

pub struct ButtonOps<P> {
    pub setup: fn(&mut P, &HardwareProfile),
    pub tick: fn(&mut P, &HardwareProfile) -> Option<LoopEvent>,
    pub fini: fn(&mut P, &HardwareProfile),
}

pub struct WatchdogOps<P> {
    pub setup: fn(&mut P),
    /// Called once per loop pass while active.
    pub feed: fn(&mut P),
    pub fini: fn(&mut P),
}

pub struct BaroOps<P> {
    /// True if a barometer was found during identification and is usable.
    pub setup: fn(&mut P, &HardwareProfile) -> bool,
}

pub struct SoundOps<P> {
    pub test: fn(&mut P, ResetReason),
    pub tone: fn(&mut P, u32),
}

pub struct WifiOps<P> {
    /// Maximum transmit power in dBm.
    pub set_tx_power: fn(&mut P, i8),
}

/// Settings storage. The record layout belongs to the application.
pub struct EepromOps<P> {
    /// Open `size` bytes of emulated EEPROM. False if the backing store is
    /// unusable.
    pub begin: fn(&mut P, usize) -> bool,
}

pub struct SerialOps<P> {
    /// Open the GNSS port for the board's wiring.
    pub begin: fn(&mut P, &HardwareProfile, u32),
}

/// A byte-stream device (Bluetooth, USB CDC, UART helper). Every entry is
/// itself optional.
pub struct IoDevOps<P> {
    pub name: &'static str,
    pub setup: Option<fn(&mut P)>,
    pub tick: Option<fn(&mut P)>,
    pub fini: Option<fn(&mut P)>,
    pub available: Option<fn(&mut P) -> usize>,
    pub read: Option<fn(&mut P) -> Option<u8>>,
    pub write: Option<fn(&mut P, &[u8]) -> usize>,
}

pub trait SocOps: Sized {
    const SOC: Soc;
    const NAME: &'static str;
    /// Model reported when identification matches nothing.
    const DEFAULT_MODEL: Model;

    // ── Mandatory ──

    /// Identify the board and bring up its base peripherals. Runs once.
    fn setup(&mut self) -> HardwareProfile;
    fn post_init(&mut self, _profile: &HardwareProfile) {}
    /// Cooperative platform tick. Must return promptly.
    fn loop_tick(&mut self, profile: &HardwareProfile, irq: &IrqRelay) -> Option<LoopEvent>;
    /// Ordered power-down for `reason`.
    fn shutdown_plan(
        &self,
        profile: &HardwareProfile,
        reason: ShutdownReason,
        config: &PowerConfig,
    ) -> PowerDownPlan;
    fn apply(&mut self, step: &PowerStep) -> StepStatus;
    /// Arm the wake source (if any) and leave the active state.
    fn enter(&mut self, terminal: Terminal);
    fn idle(&mut self);
    fn restart(&mut self);
    fn chip_id(&mut self) -> u32;
    /// Raw vendor reset cause.
    fn reset_code(&mut self) -> u32;
    fn decode_reset(code: u32, flash_id: Option<FlashId>) -> ResetReason;
    fn reset_info(code: u32) -> &'static str;
    fn random(&mut self, low: i32, high: i32) -> i32;
    fn spi_begin(&mut self, profile: &HardwareProfile) -> SpiPins;

    /// Hook the PPS and PMU alert lines up to `irq`.
    fn attach_interrupts(&mut self, _profile: &HardwareProfile) {}
    /// Second look at a wake edge before restarting (debounce).
    fn wake_confirmed(&mut self, _wake: WakeSource) -> bool {
        true
    }

    // ── Optional ──

    const DISPLAY: Option<DisplayOps<Self>> = None;
    const BATTERY: Option<BatteryOps<Self>> = None;
    const BARO: Option<BaroOps<Self>> = None;
    const BUTTON: Option<ButtonOps<Self>> = None;
    const WATCHDOG: Option<WatchdogOps<Self>> = None;
    const SOUND: Option<SoundOps<Self>> = None;
    const WIFI: Option<WifiOps<Self>> = None;
    const SERIAL: Option<SerialOps<Self>> = None;
    const EEPROM: Option<EepromOps<Self>> = None;
    const BLUETOOTH: Option<IoDevOps<Self>> = None;
    const USB: Option<IoDevOps<Self>> = None;
    const UART: Option<IoDevOps<Self>> = None;
}

/// `random(low, high)` over a raw random word: `low` when the range is
/// empty, otherwise uniform-ish in `low..high`.
pub fn random_in(raw: u32, low: i32, high: i32) -> i32 {
    if low >= high {
        return low;
    }
    let span = (high as i64 - low as i64) as u64;
    (low as i64 + (raw as u64 % span) as i64) as i32
}

/// Device id from the lower four bytes of the base MAC.
pub const fn chip_id_from_mac(mac: &[u8; 6]) -> u32 {
    (mac[5] as u32) | ((mac[4] as u32) << 8) | ((mac[3] as u32) << 16) | ((mac[2] as u32) << 24)
}

/// Four-tone boot pattern: rising after power-on, an external reset or a
/// requested restart, alternating after a hardware watchdog bite, falling
/// otherwise.
pub fn boot_tones(reason: ResetReason) -> [u32; 4] {
    match reason {
        ResetReason::Default | ResetReason::ExtSys | ResetReason::SoftRestart => [440, 640, 840, 1040],
        ResetReason::Wdt => [440, 1040, 440, 1040],
        _ => [1040, 840, 640, 440],
    }
}

/// ESP32 `esp_wifi_set_max_tx_power` units (0.25 dBm) for 0..=20 dBm.
const WIFI_POWER_LEVELS: [i8; 21] = [
    8, 8, 8, 8, 8, 20, 20, 28, 28, 34, 34, 44, 44, 52, 52, 60, 60, 68, 74, 76, 78,
];

pub fn wifi_power_level(dbm: i8) -> i8 {
    WIFI_POWER_LEVELS[dbm.clamp(0, 20) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSoc;

    #[test]
    fn random_empty_range_returns_low() {
        assert_eq!(random_in(12345, 5, 5), 5);
        assert_eq!(random_in(12345, 9, 3), 9);
    }

    #[test]
    fn random_stays_in_range() {
        for raw in [0, 1, 7, 999, u32::MAX] {
            let v = random_in(raw, -10, 10);
            assert!((-10..10).contains(&v));
        }
        assert!(random_in(u32::MAX, i32::MIN, i32::MAX) < i32::MAX);
    }

    #[test]
    fn chip_id_uses_low_mac_bytes() {
        let mac = [0x24, 0x0A, 0xC4, 0x12, 0x34, 0x56];
        assert_eq!(chip_id_from_mac(&mac), 0xC4123456);
    }

    #[test]
    fn boot_tone_patterns() {
        assert_eq!(boot_tones(ResetReason::Default), [440, 640, 840, 1040]);
        assert_eq!(boot_tones(ResetReason::Wdt), [440, 1040, 440, 1040]);
        assert_eq!(boot_tones(ResetReason::SoftRestart), [440, 640, 840, 1040]);
        assert_eq!(boot_tones(ResetReason::SoftWdt), [1040, 840, 640, 440]);
        assert_eq!(boot_tones(ResetReason::Exception), [1040, 840, 640, 440]);
        assert_eq!(boot_tones(ResetReason::DeepSleepAwake), [1040, 840, 640, 440]);
    }

    #[test]
    fn wifi_levels_clamp() {
        assert_eq!(wifi_power_level(-5), 8);
        assert_eq!(wifi_power_level(0), 8);
        assert_eq!(wifi_power_level(10), 34);
        assert_eq!(wifi_power_level(20), 78);
        assert_eq!(wifi_power_level(100), 78);
    }

    #[test]
    fn optional_ops_default_to_absent() {
        assert!(ScriptedSoc::DISPLAY.is_none());
        assert!(ScriptedSoc::BLUETOOTH.is_none());
        assert!(ScriptedSoc::UART.is_none());
        assert!(ScriptedSoc::EEPROM.is_none());
    }
}
