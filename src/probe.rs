/// Capability probe building blocks.
///
/// Each platform's `setup` composes these into its identification chain:
/// table lookups on persistent identifiers and short-circuiting bus probes
/// over candidate pin assignments. Nothing here fails; a miss is `None`.
use embedded_hal::delay::DelayNs;

use crate::hal::{Gpio, I2cBus};
use crate::pins::{I2cPins, Level, Pin, PinMode};
use crate::profile::{FlashId, Model};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    /// The identifier storage could not be read.
    Unreadable,
    /// The identifier storage was read but holds nothing.
    Blank,
}

/// Model by flash id. First matching row wins; no match gives `fallback`.
pub fn model_for_flash(table: &[(FlashId, Model)], id: FlashId, fallback: Model) -> Model {
    table
        .iter()
        .find(|(fid, _)| *fid == id)
        .map(|&(_, model)| model)
        .unwrap_or(fallback)
}

/// Attach `pins`, probe `addr`. On a miss the bus is detached again.
pub fn probe_device<H: I2cBus>(hw: &mut H, pins: I2cPins, addr: u8) -> bool {
    hw.attach(pins);
    let found = hw.probe(addr);
    if found {
        log::debug!("0x{:02X} found on SDA {} / SCL {}", addr, pins.sda.0, pins.scl.0);
    } else {
        log::debug!("0x{:02X} not on SDA {} / SCL {}", addr, pins.sda.0, pins.scl.0);
        hw.detach(pins);
    }
    found
}

/// Try each candidate wiring in priority order and stop at the first one
/// where `check` succeeds. That bus is left attached; every candidate that
/// failed is detached (lines floating); later candidates are never touched.
pub fn probe_first<H: I2cBus>(
    hw: &mut H,
    candidates: &[I2cPins],
    mut check: impl FnMut(&mut H) -> bool,
) -> Option<I2cPins> {
    for &pins in candidates {
        hw.attach(pins);
        if check(hw) {
            return Some(pins);
        }
        hw.detach(pins);
    }
    None
}

/// Drive a peripheral's supply switch on and release its reset before
/// probing it.
pub fn power_up<H: Gpio + DelayNs>(
    hw: &mut H,
    supply: (Pin, Level),
    reset: Option<(Pin, Level)>,
    settle_ms: u32,
) {
    hw.set_mode(supply.0, PinMode::Output);
    hw.write(supply.0, supply.1);
    if let Some((pin, level)) = reset {
        hw.set_mode(pin, PinMode::Output);
        hw.write(pin, level);
    }
    hw.delay_ms(settle_ms);
}

/// Base MAC: the custom eFuse block if it holds one, else the factory MAC.
pub fn base_mac(custom: Result<[u8; 6], ProbeError>, factory: [u8; 6]) -> [u8; 6] {
    match custom {
        Ok(mac) if mac != [0; 6] => mac,
        Ok(_) => {
            log::info!("Custom MAC blank, using factory MAC");
            factory
        }
        Err(e) => {
            log::warn!("Custom MAC unreadable ({:?}), using factory MAC", e);
            factory
        }
    }
}
