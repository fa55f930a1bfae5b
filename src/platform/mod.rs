/// Platform operation tables.
///
/// One `SocOps` implementation per MCU family, each generic over a port
/// trait the firmware implements on real hardware. Only the family selected
/// by the `soc-*` feature is wired up in `board.rs`; all three are compiled
/// on the host so they can be tested side by side.
use embedded_hal::delay::DelayNs;

use crate::button::{ButtonEvent, ButtonTracker};
use crate::display;
use crate::hal::{BaroProbe, Clock, Gpio, I2cBus, Links, Panel, SleepControl, Watchdog};
use crate::ops::LoopEvent;
use crate::pins::{Level, Pin, PinMode};
use crate::power::{PowerStep, ShutdownReason, StepStatus, Terminal};
use crate::profile::{DisplayKind, RadioInfo};

pub mod esp32;
pub mod psoc4;
pub mod samd;

/// Ports every platform needs.
pub trait BoardHal:
    I2cBus + Gpio + Clock + SleepControl + Panel + Links + Watchdog + BaroProbe + DelayNs
{
    fn random_u32(&mut self) -> u32;
    /// Result of the (external) radio transceiver probe.
    fn radio(&mut self) -> RadioInfo;
}

/// Watchdog timeout armed by the `WATCHDOG` ops.
pub const WDT_TIMEOUT_MS: u32 = 5000;
pub const GNSS_BAUD: u32 = 9600;
const RELEASE_POLL_MS: u32 = 10;

/// Wait for an active-low button to be let go, at most `timeout_ms`.
/// Returns false if it was still held when the bound ran out.
pub fn wait_release<H: Gpio + DelayNs>(hw: &mut H, pin: Pin, timeout_ms: u32) -> bool {
    let mut waited = 0;
    while hw.read(pin) == Level::Low {
        if waited >= timeout_ms {
            log::warn!("button on GPIO {} still held after {} ms", pin.0, timeout_ms);
            return false;
        }
        hw.delay_ms(RELEASE_POLL_MS);
        waited += RELEASE_POLL_MS;
    }
    true
}

/// Sample an active-low button and map its gestures: click or release
/// turns the page, a long press shuts down.
pub(crate) fn poll_button<H: Gpio + Clock>(
    hw: &mut H,
    tracker: &mut ButtonTracker,
    pin: Pin,
) -> Option<LoopEvent> {
    let pressed = hw.read(pin) == Level::Low;
    match tracker.update(pressed, hw.millis())? {
        ButtonEvent::Click | ButtonEvent::Released => Some(LoopEvent::NextPage),
        ButtonEvent::LongPress => Some(LoopEvent::Shutdown(ShutdownReason::ButtonLongPress)),
    }
}

/// Steps every board understands. PMU steps are left to the platform
/// (`None`).
pub(crate) fn apply_board_step<H: BoardHal>(
    hw: &mut H,
    step: &PowerStep,
    kind: DisplayKind,
) -> Option<StepStatus> {
    match *step {
        PowerStep::WatchdogOff => Watchdog::disable(hw),
        PowerStep::DisplayFini(reason) => display::fini(hw, kind, reason),
        PowerStep::DisplaySleep => Panel::sleep(hw),
        PowerStep::ButtonRelease { pin, timeout_ms } => {
            wait_release(hw, pin, timeout_ms);
        }
        PowerStep::SpiEnd => hw.spi_end(),
        PowerStep::RadioOff => hw.radio_off(),
        PowerStep::SerialEnd => hw.serial_end(),
        PowerStep::BusRelease(pins) => hw.detach(pins),
        PowerStep::Settle(ms) => hw.delay_ms(ms),
        PowerStep::Float(pin) => hw.set_mode(pin, PinMode::HighZ),
        PowerStep::Drive(pin, level) => {
            hw.set_mode(pin, PinMode::Output);
            hw.write(pin, level);
        }
        PowerStep::Input(pin) => hw.set_mode(pin, PinMode::Input),
        PowerStep::ChargeLed(_) | PowerStep::PmuSleep | PowerStep::RailOff(_) => return None,
    }
    Some(StepStatus::Done)
}

/// Terminal states every board understands. `PowerOff` needs a PMU and is
/// left to the platform (`false`).
pub(crate) fn enter_board<H: BoardHal>(hw: &mut H, terminal: Terminal) -> bool {
    match terminal {
        Terminal::DeepSleep(wake) => {
            hw.set_mode(wake.pin, PinMode::Input);
            hw.arm_wake(wake);
            hw.deep_sleep();
        }
        Terminal::Monitor(wake) => {
            hw.set_mode(wake.pin, PinMode::Input);
            hw.arm_wake(wake);
        }
        Terminal::Restart => hw.software_reset(),
        Terminal::Halt => hw.deep_sleep(),
        Terminal::PowerOff => return false,
    }
    true
}
