/// Display lifecycle shared by all platforms: splash, cooperative refresh,
/// and the shutdown banner with backlight ramp.
///
/// Rendering itself is the panel driver's business; this module only
/// sequences it.
use embedded_hal::delay::DelayNs;

use crate::hal::{Interval, Panel};
use crate::power::ShutdownReason;
use crate::profile::DisplayKind;

pub const BACKLIGHT_MAX: u8 = 250;
pub const BACKLIGHT_STEP: u8 = 25;
pub const BACKLIGHT_STEP_MS: u32 = 100;
pub const OLED_BANNER_HOLD_MS: u32 = 3000;
pub const TFT_BANNER_HOLD_MS: u32 = 2000;
pub const REFRESH_MS: u32 = 1000;

/// Start the panel found by the probe. Returns what actually came up.
pub fn setup<H: Panel + DelayNs>(hw: &mut H, kind: DisplayKind) -> DisplayKind {
    if kind == DisplayKind::None {
        return DisplayKind::None;
    }
    if !hw.begin(kind) {
        log::warn!("{:?} did not start", kind);
        return DisplayKind::None;
    }
    if kind.is_tft() {
        ramp_up(hw);
    }
    log::info!("Display: {:?}", kind);
    kind
}

pub fn ramp_up<H: Panel + DelayNs>(hw: &mut H) {
    let mut level = 0u8;
    loop {
        hw.set_backlight(level);
        hw.delay_ms(BACKLIGHT_STEP_MS);
        if level >= BACKLIGHT_MAX {
            break;
        }
        level += BACKLIGHT_STEP;
    }
}

pub fn ramp_down<H: Panel + DelayNs>(hw: &mut H) {
    let mut level = BACKLIGHT_MAX;
    loop {
        hw.set_backlight(level);
        hw.delay_ms(BACKLIGHT_STEP_MS);
        if level == 0 {
            break;
        }
        level -= BACKLIGHT_STEP;
    }
}

/// Shutdown banner: reason message, hold, then fade out.
pub fn fini<H: Panel + DelayNs>(hw: &mut H, kind: DisplayKind, reason: ShutdownReason) {
    if kind == DisplayKind::None {
        return;
    }
    hw.show_message(reason.banner());
    hw.delay_ms(if kind.is_tft() {
        TFT_BANNER_HOLD_MS
    } else {
        OLED_BANNER_HOLD_MS
    });
    ramp_down(hw);
}

/// Cooperative refresh, paced to `REFRESH_MS`.
pub struct Refresher {
    pace: Interval,
}

impl Refresher {
    pub const fn new() -> Self {
        Self {
            pace: Interval::new(REFRESH_MS),
        }
    }

    pub fn tick<H: Panel>(&mut self, hw: &mut H, kind: DisplayKind, now: u32) {
        if kind != DisplayKind::None && self.pace.due(now) {
            hw.refresh();
        }
    }
}

impl Default for Refresher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Action, FakeHw};

    fn backlight_levels(hw: &FakeHw) -> std::vec::Vec<u8> {
        hw.log
            .iter()
            .filter_map(|a| match a {
                Action::Backlight(l) => Some(*l),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn no_display_is_noop() {
        let mut hw = FakeHw::new();
        assert_eq!(setup(&mut hw, DisplayKind::None), DisplayKind::None);
        fini(&mut hw, DisplayKind::None, ShutdownReason::LowBattery);
        assert!(hw.log.is_empty());
    }

    #[test]
    fn tft_setup_ramps_up() {
        let mut hw = FakeHw::new();
        assert_eq!(setup(&mut hw, DisplayKind::TftTtgo240), DisplayKind::TftTtgo240);
        let levels = backlight_levels(&hw);
        assert_eq!(levels.first(), Some(&0));
        assert_eq!(levels.last(), Some(&250));
        assert_eq!(levels.len(), 11);
    }

    #[test]
    fn failed_panel_reports_none() {
        let mut hw = FakeHw::new();
        hw.panel_ok = false;
        assert_eq!(setup(&mut hw, DisplayKind::OledTtgo), DisplayKind::None);
    }

    #[test]
    fn fini_shows_reason_then_fades() {
        let mut hw = FakeHw::new();
        fini(&mut hw, DisplayKind::OledTtgo, ShutdownReason::LowBattery);
        assert_eq!(hw.log[0], Action::Message("LOW BAT".into()));
        assert_eq!(hw.log[1], Action::Delay(OLED_BANNER_HOLD_MS));
        let levels = backlight_levels(&hw);
        assert_eq!(levels, [250, 225, 200, 175, 150, 125, 100, 75, 50, 25, 0]);
    }

    #[test]
    fn generic_banner_for_other_reasons() {
        let mut hw = FakeHw::new();
        fini(&mut hw, DisplayKind::TftTtgo135, ShutdownReason::ButtonLongPress);
        assert_eq!(hw.log[0], Action::Message("  OFF  ".into()));
        assert_eq!(hw.log[1], Action::Delay(TFT_BANNER_HOLD_MS));
    }

    #[test]
    fn refresh_is_paced() {
        let mut hw = FakeHw::new();
        let mut r = Refresher::new();
        r.tick(&mut hw, DisplayKind::OledTtgo, 0);
        r.tick(&mut hw, DisplayKind::OledTtgo, 500);
        r.tick(&mut hw, DisplayKind::OledTtgo, 1000);
        r.tick(&mut hw, DisplayKind::None, 5000);
        let refreshes = hw.log.iter().filter(|a| **a == Action::Refresh).count();
        assert_eq!(refreshes, 2);
    }
}
