//! Single push-button click / long-press tracker.
//!
//! Fed the raw pressed state once per loop iteration. A release within the
//! click delay is a click; a longer release before the long-press delay is a
//! plain release; holding past the long-press delay fires once and swallows
//! the eventual release.

pub const DEBOUNCE_MS: u32 = 20;
pub const CLICK_DELAY_MS: u32 = 600;
pub const LONG_PRESS_MS: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Click,
    Released,
    LongPress,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonTracker {
    pressed_at: Option<u32>,
    long_fired: bool,
}

impl ButtonTracker {
    pub const fn new() -> Self {
        Self {
            pressed_at: None,
            long_fired: false,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed_at.is_some()
    }

    pub fn update(&mut self, pressed: bool, now: u32) -> Option<ButtonEvent> {
        match (self.pressed_at, pressed) {
            (None, true) => {
                self.pressed_at = Some(now);
                self.long_fired = false;
                None
            }
            (Some(t), true) => {
                if !self.long_fired && now.wrapping_sub(t) >= LONG_PRESS_MS {
                    self.long_fired = true;
                    Some(ButtonEvent::LongPress)
                } else {
                    None
                }
            }
            (Some(t), false) => {
                self.pressed_at = None;
                let held = now.wrapping_sub(t);
                if self.long_fired || held < DEBOUNCE_MS {
                    None
                } else if held <= CLICK_DELAY_MS {
                    Some(ButtonEvent::Click)
                } else {
                    Some(ButtonEvent::Released)
                }
            }
            (None, false) => None,
        }
    }
}
