/// Boot report: one NDJSON line describing the resolved board.
///
/// Emitted once on the console after `System::boot` so a host tool (or a
/// human) can see what the probe decided without a debugger.
use serde::Serialize;

use crate::profile::{HardwareProfile, Soc};
use crate::reset::ResetReason;

pub const MAX_REPORT_LEN: usize = 512;

pub type ReportBuffer = heapless::Vec<u8, MAX_REPORT_LEN>;

#[derive(Debug, Serialize)]
pub struct BootReport<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub soc: Soc,
    pub platform: &'static str,
    pub version: &'static str,
    pub chip_id: u32,
    pub reset: ResetReason,
    pub reset_info: &'static str,
    pub profile: &'a HardwareProfile,
}

impl<'a> BootReport<'a> {
    pub fn new(
        soc: Soc,
        platform: &'static str,
        chip_id: u32,
        reset: ResetReason,
        reset_info: &'static str,
        profile: &'a HardwareProfile,
    ) -> Self {
        Self {
            msg_type: "boot",
            soc,
            platform,
            version: env!("CARGO_PKG_VERSION"),
            chip_id,
            reset,
            reset_info,
            profile,
        }
    }
}

/// Serialize to JSON and append the NDJSON newline. `None` if it does not
/// fit in `buf`.
pub fn serialize_report(report: &BootReport<'_>, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(report, buf) {
        Ok(len) if len < buf.len() => {
            buf[len] = b'\n';
            Some(len + 1)
        }
        _ => None,
    }
}

/// Serialize into an owned fixed-capacity buffer.
pub fn report_line(report: &BootReport<'_>) -> Option<ReportBuffer> {
    let mut buf = [0u8; MAX_REPORT_LEN];
    let len = serialize_report(report, &mut buf)?;
    ReportBuffer::from_slice(&buf[..len]).ok()
}
