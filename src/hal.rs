/// Hardware port traits.
///
/// Platform code in `platform::*` is written against these traits only. The
/// firmware binary implements them on top of the vendor HAL; host tests
/// implement them with a recording fake. Delays come from
/// `embedded_hal::delay::DelayNs`.
use crate::pins::{I2cPins, Level, Pin, PinMode, SpiPins, UartPins};
use crate::power::WakeSource;
use crate::profile::DisplayKind;

/// The probe-side view of an I2C controller that can be re-routed to
/// different pin pairs.
pub trait I2cBus {
    /// Route the controller to `pins` and enable it.
    fn attach(&mut self, pins: I2cPins);
    /// Zero-length write to `addr`. True if the address acknowledged.
    fn probe(&mut self, addr: u8) -> bool;
    /// Disable the controller and leave both lines floating.
    fn detach(&mut self, pins: I2cPins);
}

pub trait Gpio {
    fn set_mode(&mut self, pin: Pin, mode: PinMode);
    fn write(&mut self, pin: Pin, level: Level);
    fn read(&mut self, pin: Pin) -> Level;
}

/// Monotonic millisecond counter (wraps).
pub trait Clock {
    fn millis(&self) -> u32;
}

/// Fires once per `period` of `Clock::millis`. Wrap-safe.
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    period_ms: u32,
    last: Option<u32>,
}

impl Interval {
    pub const fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            last: None,
        }
    }

    /// True on the first call and then whenever a full period has elapsed.
    pub fn due(&mut self, now: u32) -> bool {
        match self.last {
            Some(t) if now.wrapping_sub(t) < self.period_ms => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

pub trait SleepControl {
    /// Arm `wake` as the only wake source.
    fn arm_wake(&mut self, wake: WakeSource);
    /// Enter deep sleep. Does not return on hardware.
    fn deep_sleep(&mut self);
    /// Low-power wait for the next interrupt.
    fn idle(&mut self);
    /// Full software reset. Does not return on hardware.
    fn software_reset(&mut self);
}

/// A display panel, as far as the power lifecycle is concerned.
pub trait Panel {
    /// Initialise the controller and draw the splash screen.
    fn begin(&mut self, kind: DisplayKind) -> bool;
    /// Clear the screen and show a short centred message.
    fn show_message(&mut self, msg: &str);
    /// Backlight PWM level, 0..=255. No-op on OLEDs.
    fn set_backlight(&mut self, level: u8);
    /// Put the controller into its display-off / sleep state.
    fn sleep(&mut self);
    /// Redraw the current page.
    fn refresh(&mut self);
    fn next_page(&mut self);
}

pub trait Buzzer {
    fn tone(&mut self, hz: u32);
    fn no_tone(&mut self);
}

/// SPI, GNSS UART and radio transport start/stop.
pub trait Links {
    fn spi_begin(&mut self, pins: SpiPins);
    fn spi_end(&mut self);
    fn serial_begin(&mut self, pins: UartPins, baud: u32);
    fn serial_end(&mut self);
    /// Stop Wi-Fi / Bluetooth / sub-GHz radio activity.
    fn radio_off(&mut self);
    /// Whether the output UART can take another byte right now.
    fn uart_ready(&mut self) -> bool;
    fn uart_put(&mut self, byte: u8);
}

pub trait Watchdog {
    fn enable(&mut self, timeout_ms: u32);
    fn disable(&mut self);
    fn feed(&mut self);
}

/// Barometer detection on the currently attached I2C bus.
pub trait BaroProbe {
    fn baro_present(&mut self) -> bool;
}

/// Zero-length write probe on any `embedded-hal` I2C bus.
pub fn probe_address<I: embedded_hal::i2c::I2c>(i2c: &mut I, addr: u8) -> bool {
    i2c.write(addr, &[]).is_ok()
}
