//! boardhal: board identification and power lifecycle for multi-platform
//! traffic-awareness devices.
//!
//! One firmware image has to run on whatever PCB it lands on: the library
//! probes the hardware once at boot into a [`profile::HardwareProfile`],
//! exposes the platform's capabilities through one operations table
//! ([`ops::SocOps`]), shuts peripherals down in a safe order
//! ([`power::PowerSequencer`]), decodes the vendor reset cause
//! ([`reset`]) and relays PPS / PMU interrupts to the main loop
//! ([`irq::IrqRelay`]).
//!
//! Everything here is `no_std`, allocation-free and testable on the host
//! with `cargo test`. Hardware is reached only through the port traits in
//! [`hal`] and [`pmu`]; the ESP32 firmware binary implements them on top of
//! `esp-hal`.
//!
//! - Contract: `profile`, `ops`, `hal`, `pins`, `board`
//! - Core: `probe`, `power`, `reset`, `irq`, `system`
//! - Subsystems: `pmu`, `battery`, `button`, `display`, `report`
//! - Platforms: `platform::{esp32, psoc4, samd}`

#![cfg_attr(not(test), no_std)]

pub mod battery;
pub mod board;
pub mod button;
pub mod display;
pub mod hal;
pub mod irq;
pub mod ops;
pub mod pins;
pub mod platform;
pub mod pmu;
pub mod power;
pub mod probe;
pub mod profile;
pub mod report;
pub mod reset;
pub mod system;

#[cfg(test)]
pub mod testing;
