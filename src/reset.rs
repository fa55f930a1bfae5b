/// Reset-reason decoding.
///
/// Every platform reports why it came out of reset in its own encoding. The
/// decoders here fold those codes into one canonical `ResetReason`. All of
/// them are pure functions of their inputs.
use serde::Serialize;

use crate::profile::{flash, FlashId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResetReason {
    /// Power-on or an otherwise unremarkable start.
    Default,
    Wdt,
    Exception,
    SoftWdt,
    SoftRestart,
    DeepSleepAwake,
    ExtSys,
}

impl ResetReason {
    pub const fn name(self) -> &'static str {
        match self {
            ResetReason::Default => "DEFAULT",
            ResetReason::Wdt => "WDT",
            ResetReason::Exception => "EXCEPTION",
            ResetReason::SoftWdt => "SOFT_WDT",
            ResetReason::SoftRestart => "SOFT_RESTART",
            ResetReason::DeepSleepAwake => "DEEP_SLEEP_AWAKE",
            ResetReason::ExtSys => "EXT_SYS",
        }
    }

    /// Whether this start followed a watchdog bite.
    pub const fn is_watchdog(self) -> bool {
        matches!(self, ResetReason::Wdt | ResetReason::SoftWdt)
    }
}

// ── ESP32 ─────────────────────────────────────────────────────────────

/// RTC reset cause codes as reported for the PRO CPU.
pub mod esp32_code {
    pub const POWERON: u32 = 1;
    pub const SW: u32 = 3;
    pub const OWDT: u32 = 4;
    pub const DEEPSLEEP: u32 = 5;
    pub const SDIO: u32 = 6;
    pub const TG0WDT_SYS: u32 = 7;
    pub const TG1WDT_SYS: u32 = 8;
    pub const RTCWDT_SYS: u32 = 9;
    pub const INTRUSION: u32 = 10;
    pub const TGWDT_CPU: u32 = 11;
    pub const SW_CPU: u32 = 12;
    pub const RTCWDT_CPU: u32 = 13;
    pub const EXT_CPU: u32 = 14;
    pub const RTCWDT_BROWN_OUT: u32 = 15;
    pub const RTCWDT_RTC: u32 = 16;
}

/// Decode an ESP32 RTC reset cause.
///
/// `RTCWDT_RTC` is also what the chip reports when a slow GD25LQ32 flash
/// makes the ROM loader time out during a normal power-on. Only that code,
/// and only with that flash, is narrowed to `Default`.
pub fn decode_esp32(code: u32, flash_id: Option<FlashId>) -> ResetReason {
    use esp32_code::*;

    match code {
        POWERON => ResetReason::Default,
        SW => ResetReason::SoftRestart,
        OWDT => ResetReason::Wdt,
        DEEPSLEEP => ResetReason::DeepSleepAwake,
        SDIO => ResetReason::Exception,
        TG0WDT_SYS | TG1WDT_SYS | RTCWDT_SYS | TGWDT_CPU | RTCWDT_CPU => ResetReason::Wdt,
        INTRUSION => ResetReason::Exception,
        SW_CPU => ResetReason::SoftRestart,
        EXT_CPU => ResetReason::ExtSys,
        RTCWDT_BROWN_OUT => ResetReason::ExtSys,
        RTCWDT_RTC if flash_id == Some(flash::GD25LQ32) => ResetReason::Default,
        RTCWDT_RTC => ResetReason::Wdt,
        _ => ResetReason::Default,
    }
}

pub fn describe_esp32(code: u32) -> &'static str {
    use esp32_code::*;

    match code {
        POWERON => "Vbat power on reset",
        SW => "Software reset digital core",
        OWDT => "Legacy watch dog reset digital core",
        DEEPSLEEP => "Deep Sleep reset digital core",
        SDIO => "Reset by SLC module, reset digital core",
        TG0WDT_SYS => "Timer Group0 Watch dog reset digital core",
        TG1WDT_SYS => "Timer Group1 Watch dog reset digital core",
        RTCWDT_SYS => "RTC Watch dog Reset digital core",
        INTRUSION => "Instrusion tested to reset CPU",
        TGWDT_CPU => "Time Group reset CPU",
        SW_CPU => "Software reset CPU",
        RTCWDT_CPU => "RTC Watch dog Reset CPU",
        EXT_CPU => "for APP CPU, reseted by PRO CPU",
        RTCWDT_BROWN_OUT => "Reset when the vdd voltage is not stable",
        RTCWDT_RTC => "RTC Watch dog reset digital core and rtc module",
        _ => "No meaning",
    }
}

// ── PSoC4 ─────────────────────────────────────────────────────────────

pub mod psoc4_cause {
    pub const WDT: u32 = 0x01;
    pub const PROTFAULT: u32 = 0x08;
    pub const SW: u32 = 0x10;
}

/// Decode `CySysGetResetReason`. Software resets are how this platform
/// leaves low-power monitoring, so they read as a clean start.
pub fn decode_psoc4(cause: u32) -> ResetReason {
    match cause {
        psoc4_cause::WDT => ResetReason::Wdt,
        psoc4_cause::PROTFAULT => ResetReason::Exception,
        _ => ResetReason::Default,
    }
}

pub fn describe_psoc4(_cause: u32) -> &'static str {
    "No reset information available"
}

// ── SAMD ──────────────────────────────────────────────────────────────

/// PM->RCAUSE bits.
pub mod samd_rcause {
    pub const POR: u8 = 0x01;
    pub const BOD12: u8 = 0x02;
    pub const BOD33: u8 = 0x04;
    pub const EXT: u8 = 0x10;
    pub const WDT: u8 = 0x20;
    pub const SYST: u8 = 0x40;
}

/// Decode SAMD `RCAUSE`. When several bits are set the most specific cause
/// wins: watchdog, then system reset request, then external pin.
pub fn decode_samd(rcause: u8) -> ResetReason {
    use samd_rcause::*;

    if rcause & WDT != 0 {
        ResetReason::Wdt
    } else if rcause & SYST != 0 {
        ResetReason::SoftRestart
    } else if rcause & EXT != 0 {
        ResetReason::ExtSys
    } else {
        // POR / BOD12 / BOD33 / nothing
        ResetReason::Default
    }
}

pub fn describe_samd(rcause: u8) -> &'static str {
    use samd_rcause::*;

    if rcause & WDT != 0 {
        "Watchdog reset"
    } else if rcause & SYST != 0 {
        "System reset request"
    } else if rcause & EXT != 0 {
        "External reset"
    } else if rcause & (BOD12 | BOD33) != 0 {
        "Brown out reset"
    } else if rcause & POR != 0 {
        "Power on reset"
    } else {
        "No reset information available"
    }
}
