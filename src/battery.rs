/// Battery thresholds, charge estimate and the periodic monitor.
///
/// All voltages are millivolts.
use crate::hal::Interval;
use crate::profile::{HardwareProfile, Model};

pub const LIPO_THRESHOLD_MV: u16 = 3500;
pub const LIPO_CUTOFF_MV: u16 = 3200;
pub const NIMHX2_THRESHOLD_MV: u16 = 2300;
pub const NIMHX2_CUTOFF_MV: u16 = 2100;
/// Readings below this mean "no cell", not "empty cell".
pub const INVALID_MV: u16 = 500;

/// Chemistry-dependent thresholds for one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryParams {
    pub threshold_mv: u16,
    pub cutoff_mv: u16,
}

impl BatteryParams {
    pub const LIPO: Self = Self {
        threshold_mv: LIPO_THRESHOLD_MV,
        cutoff_mv: LIPO_CUTOFF_MV,
    };
    pub const NIMHX2: Self = Self {
        threshold_mv: NIMHX2_THRESHOLD_MV,
        cutoff_mv: NIMHX2_CUTOFF_MV,
    };
    /// T-Beam rev 8, measured through the PMU.
    pub const TBEAM_V08: Self = Self {
        threshold_mv: LIPO_THRESHOLD_MV + 100,
        cutoff_mv: LIPO_CUTOFF_MV + 200,
    };

    /// ESP32 boards: LiPo on T-Beam and T3 rev 16, NiMH x2 otherwise.
    pub fn esp32(profile: &HardwareProfile) -> Self {
        match (profile.model, profile.revision) {
            (Model::PrimeMk2, 8) => Self::TBEAM_V08,
            (Model::PrimeMk2, _) | (Model::Standalone, 16) => Self::LIPO,
            _ => Self::NIMHX2,
        }
    }

    /// CubeCell: LiPo on the Mini, NiMH x2 otherwise.
    pub fn psoc4(profile: &HardwareProfile) -> Self {
        if profile.model == Model::Mini {
            Self::LIPO
        } else {
            Self::NIMHX2
        }
    }
}

/// Rough LiPo state of charge, 0..=100.
pub fn charge_percent(mv: u16, cutoff_mv: u16) -> u8 {
    if mv < cutoff_mv {
        return 0;
    }
    if mv > 4200 {
        return 100;
    }
    let mv = mv as i32;
    let pct = if mv < 3600 {
        (mv - 3300) / 30
    } else {
        10 + (mv - 3600) * 150 / 1000
    };
    pct.clamp(0, 100) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Absent,
    Normal,
    /// Below threshold: warn the user.
    Low,
    /// Below cutoff: shut down.
    Critical,
}

pub fn classify(mv: Option<u16>, params: BatteryParams) -> BatteryStatus {
    match mv {
        None => BatteryStatus::Absent,
        Some(v) if v < INVALID_MV => BatteryStatus::Absent,
        Some(v) if v < params.cutoff_mv => BatteryStatus::Critical,
        Some(v) if v <= params.threshold_mv => BatteryStatus::Low,
        Some(_) => BatteryStatus::Normal,
    }
}

/// Checks the battery once per interval.
#[derive(Debug, Clone, Copy)]
pub struct BatteryMonitor {
    interval: Interval,
}

impl BatteryMonitor {
    pub const fn new(interval_ms: u32) -> Self {
        Self {
            interval: Interval::new(interval_ms),
        }
    }

    /// `read` is only called when a check is due.
    pub fn poll(
        &mut self,
        now: u32,
        params: BatteryParams,
        read: impl FnOnce() -> Option<u16>,
    ) -> Option<BatteryStatus> {
        if !self.interval.due(now) {
            return None;
        }
        let mv = read();
        let status = classify(mv, params);
        if let Some(v) = mv {
            let pct = charge_percent(v, params.cutoff_mv);
            match status {
                BatteryStatus::Critical | BatteryStatus::Low => {
                    log::warn!("Battery {:?}: {} mV ({}%)", status, v, pct)
                }
                _ => log::debug!("Battery {} mV ({}%)", v, pct),
            }
        }
        Some(status)
    }
}
