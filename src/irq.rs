/// Interrupt relay: the only state written from interrupt context.
///
/// Handlers call one `on_*` method, which copies a value into the shared
/// cell under a critical section and returns. No bus access, no logging.
/// The main loop snapshots (and for flags, clears) under the same critical
/// section and does all interpretation afterwards.
use core::cell::Cell;

use critical_section::Mutex;

/// Last GNSS PPS edge seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PpsSample {
    /// `millis()` at the edge.
    pub millis: u32,
    /// Number of edges since boot. Zero means none yet.
    pub seq: u32,
}

#[derive(Clone, Copy, Default)]
struct Shared {
    pps: PpsSample,
    pmu_alert: bool,
    wake_edge: bool,
}

pub struct IrqRelay {
    shared: Mutex<Cell<Shared>>,
}

impl IrqRelay {
    pub const fn new() -> Self {
        Self {
            shared: Mutex::new(Cell::new(Shared {
                pps: PpsSample { millis: 0, seq: 0 },
                pmu_alert: false,
                wake_edge: false,
            })),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Shared)) {
        critical_section::with(|cs| {
            let cell = self.shared.borrow(cs);
            let mut s = cell.get();
            f(&mut s);
            cell.set(s);
        });
    }

    // ── Interrupt side ──

    /// GNSS PPS rising edge. `now_ms` is read by the handler.
    pub fn on_pps(&self, now_ms: u32) {
        self.update(|s| {
            s.pps = PpsSample {
                millis: now_ms,
                seq: s.pps.seq.wrapping_add(1),
            };
        });
    }

    /// PMU IRQ line went low.
    pub fn on_pmu_alert(&self) {
        self.update(|s| s.pmu_alert = true);
    }

    /// Armed wake line fired while monitoring.
    pub fn on_wake_edge(&self) {
        self.update(|s| s.wake_edge = true);
    }

    // ── Main-loop side ──

    pub fn pps_time_marker(&self) -> PpsSample {
        critical_section::with(|cs| self.shared.borrow(cs).get().pps)
    }

    /// Read and clear the PMU alert flag.
    pub fn take_pmu_alert(&self) -> bool {
        let mut hit = false;
        self.update(|s| {
            hit = s.pmu_alert;
            s.pmu_alert = false;
        });
        hit
    }

    /// Read and clear the wake-edge flag.
    pub fn take_wake_edge(&self) -> bool {
        let mut hit = false;
        self.update(|s| {
            hit = s.wake_edge;
            s.wake_edge = false;
        });
        hit
    }
}

impl Default for IrqRelay {
    fn default() -> Self {
        Self::new()
    }
}
