/// Power sequencer.
///
/// Lifecycle for one run of the firmware:
///
/// ```text
/// Active ──request_shutdown(reason)──▶ ShuttingDown(reason)
///                                        │ ordered power-down plan
///                                        ▼
///        Restarting | DeepSleep(wake) | Monitoring(wake) | Halted | PoweredOff
/// ```
///
/// Nothing leads back to `Active` except a device reset. The platform
/// decides *what* is switched off and in which order (`SocOps::shutdown_plan`);
/// the sequencer decides *that* it happens exactly once, retries steps that
/// need an acknowledgement, and arms the single wake source.
use heapless::Vec;
use serde::Serialize;

use crate::irq::IrqRelay;
use crate::ops::SocOps;
use crate::pins::{I2cPins, Level, Pin, Polarity};
use crate::pmu::{ChargeLed, Rail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShutdownReason {
    ButtonLongPress,
    LowBattery,
    SerialIdle,
    Other,
}

impl ShutdownReason {
    /// Text shown on the display while powering down.
    pub const fn banner(self) -> &'static str {
        match self {
            ShutdownReason::LowBattery => "LOW BAT",
            _ => "  OFF  ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WakeKind {
    Button,
    Serial,
    /// Power key routed through the PMU's IRQ line.
    PmuIrq,
}

/// The one GPIO edge that may end deep sleep or monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WakeSource {
    pub pin: Pin,
    pub polarity: Polarity,
    pub kind: WakeKind,
}

impl WakeSource {
    pub const fn button(pin: Pin) -> Self {
        Self {
            pin,
            polarity: Polarity::ActiveLow,
            kind: WakeKind::Button,
        }
    }

    pub const fn serial(rx: Pin) -> Self {
        Self {
            pin: rx,
            polarity: Polarity::ActiveLow,
            kind: WakeKind::Serial,
        }
    }

    pub const fn pmu_irq(pin: Pin) -> Self {
        Self {
            pin,
            polarity: Polarity::ActiveLow,
            kind: WakeKind::PmuIrq,
        }
    }
}

/// Pick the wake source for `reason` from what the variant offers.
///
/// Button-class reasons prefer the button, an idle serial line prefers the
/// serial RX edge. Either falls back to the other. `None` means halt.
pub fn select_wake(
    reason: ShutdownReason,
    button: Option<WakeSource>,
    serial: Option<WakeSource>,
) -> Option<WakeSource> {
    match reason {
        ShutdownReason::SerialIdle => serial.or(button),
        ShutdownReason::ButtonLongPress | ShutdownReason::LowBattery | ShutdownReason::Other => {
            button.or(serial)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PowerState {
    Active,
    ShuttingDown(ShutdownReason),
    /// Low-power wait on a wake edge; the edge causes a software reset.
    Monitoring(WakeSource),
    DeepSleep(WakeSource),
    Restarting,
    /// No wake source: stopped until a physical power cycle.
    Halted,
    /// PMU cut all rails.
    PoweredOff,
}

impl PowerState {
    pub const fn is_active(self) -> bool {
        matches!(self, PowerState::Active)
    }
}

/// One power-down action. Platforms interpret these in `SocOps::apply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStep {
    WatchdogOff,
    /// Reason banner, hold, backlight ramp-down.
    DisplayFini(ShutdownReason),
    /// Put the display controller into sleep so it lets go of its bus.
    DisplaySleep,
    /// Wait (bounded) for the button to be released.
    ButtonRelease { pin: Pin, timeout_ms: u32 },
    SpiEnd,
    RadioOff,
    SerialEnd,
    ChargeLed(ChargeLed),
    /// PMU sleep request; needs the PMU to confirm.
    PmuSleep,
    RailOff(Rail),
    /// Disable the I2C controller and float its lines.
    BusRelease(I2cPins),
    Settle(u32),
    Float(Pin),
    Drive(Pin, Level),
    /// Release a pin as a high-impedance input (wake lines).
    Input(Pin),
}

impl PowerStep {
    pub const fn needs_ack(&self) -> bool {
        matches!(self, PowerStep::PmuSleep)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    /// The hardware did not confirm the step.
    Unconfirmed,
}

/// How the run ends once the plan has executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    DeepSleep(WakeSource),
    Monitor(WakeSource),
    Restart,
    Halt,
    PowerOff,
}

impl Terminal {
    const fn state(self) -> PowerState {
        match self {
            Terminal::DeepSleep(w) => PowerState::DeepSleep(w),
            Terminal::Monitor(w) => PowerState::Monitoring(w),
            Terminal::Restart => PowerState::Restarting,
            Terminal::Halt => PowerState::Halted,
            Terminal::PowerOff => PowerState::PoweredOff,
        }
    }
}

pub const MAX_POWER_STEPS: usize = 24;

/// Ordered power-down actions plus the terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerDownPlan {
    pub steps: Vec<PowerStep, MAX_POWER_STEPS>,
    pub terminal: Terminal,
}

impl PowerDownPlan {
    pub const fn new(terminal: Terminal) -> Self {
        Self {
            steps: Vec::new(),
            terminal,
        }
    }

    /// Append a step. Plans are built from fixed tables well under
    /// capacity; an overflowing step is dropped and logged.
    pub fn push(&mut self, step: PowerStep) -> &mut Self {
        if self.steps.push(step).is_err() {
            log::error!("power-down plan full, dropping {:?}", step);
        }
        self
    }
}

/// What the PMU does once the MCU-side shutdown is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmuSleepMode {
    /// MCU deep sleep, woken by the power key through the PMU IRQ line.
    DeepSleep,
    /// PMU sleep: cut the MCU rail, the PMU restores rails on a key press.
    PmuSleep,
    /// Full PMU shutdown; a long key press powers back on.
    PowerOff,
}

/// Runtime power configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerConfig {
    pub pmu_sleep: PmuSleepMode,
    /// Attempts at a step that needs acknowledgement before moving on.
    pub ack_attempts: u8,
    pub ack_retry_ms: u32,
    /// Upper bound on waiting for the button to be released.
    pub button_release_ms: u32,
    pub battery_interval_ms: u32,
}

impl PowerConfig {
    pub const fn new() -> Self {
        Self {
            pmu_sleep: PmuSleepMode::DeepSleep,
            ack_attempts: 10,
            ack_retry_ms: 500,
            button_release_ms: 5000,
            battery_interval_ms: 60_000,
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PowerSequencer {
    state: PowerState,
    config: PowerConfig,
}

impl PowerSequencer {
    pub const fn new(config: PowerConfig) -> Self {
        Self {
            state: PowerState::Active,
            config,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    /// Run the platform's power-down plan for `reason` and enter its
    /// terminal state. Only the first request has any effect; later ones
    /// return the state already reached.
    pub fn request_shutdown<P: SocOps>(
        &mut self,
        soc: &mut P,
        profile: &crate::profile::HardwareProfile,
        reason: ShutdownReason,
    ) -> PowerState {
        if !self.state.is_active() {
            log::debug!("shutdown({:?}) ignored in {:?}", reason, self.state);
            return self.state;
        }

        self.state = PowerState::ShuttingDown(reason);
        log::info!("Shutting down: {:?}", reason);

        let plan = soc.shutdown_plan(profile, reason, &self.config);
        for step in plan.steps.iter() {
            self.run_step(soc, step);
        }

        self.state = plan.terminal.state();
        log::info!("Power state: {:?}", self.state);
        soc.enter(plan.terminal);
        self.state
    }

    fn run_step<P: SocOps>(&self, soc: &mut P, step: &PowerStep) {
        let attempts = if step.needs_ack() {
            self.config.ack_attempts.max(1)
        } else {
            1
        };

        for attempt in 1..=attempts {
            if soc.apply(step) == StepStatus::Done {
                return;
            }
            if attempt < attempts {
                soc.apply(&PowerStep::Settle(self.config.ack_retry_ms));
            }
        }

        log::warn!("{:?} not confirmed after {} attempts, continuing", step, attempts);
    }

    /// While monitoring, consume a relayed wake edge. If the platform
    /// confirms it, restart. Returns true when a restart was issued.
    pub fn poll_monitoring<P: SocOps>(&mut self, soc: &mut P, irq: &IrqRelay) -> bool {
        let PowerState::Monitoring(wake) = self.state else {
            return false;
        };
        if !irq.take_wake_edge() {
            soc.idle();
            return false;
        }
        if !soc.wake_confirmed(wake) {
            log::debug!("spurious wake on {:?}", wake.pin);
            return false;
        }
        log::info!("Wake on {:?}, restarting", wake.kind);
        self.state = PowerState::Restarting;
        soc.restart();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Action, ScriptedSoc};

    const BUTTON: Pin = Pin(7);
    const RX: Pin = Pin(16);

    #[test]
    fn banner_text() {
        assert_eq!(ShutdownReason::LowBattery.banner(), "LOW BAT");
        assert_eq!(ShutdownReason::ButtonLongPress.banner(), "  OFF  ");
        assert_eq!(ShutdownReason::SerialIdle.banner(), "  OFF  ");
    }

    #[test]
    fn wake_selection_by_reason() {
        let b = Some(WakeSource::button(BUTTON));
        let s = Some(WakeSource::serial(RX));

        assert_eq!(select_wake(ShutdownReason::ButtonLongPress, b, s), b);
        assert_eq!(select_wake(ShutdownReason::LowBattery, b, s), b);
        assert_eq!(select_wake(ShutdownReason::SerialIdle, b, s), s);
        assert_eq!(select_wake(ShutdownReason::SerialIdle, b, None), b);
        assert_eq!(select_wake(ShutdownReason::LowBattery, None, s), s);
        assert_eq!(select_wake(ShutdownReason::Other, None, None), None);
    }

    #[test]
    fn default_config() {
        let c = PowerConfig::default();
        assert_eq!(c.pmu_sleep, PmuSleepMode::DeepSleep);
        assert_eq!(c.ack_attempts, 10);
        assert_eq!(c.ack_retry_ms, 500);
    }

    #[test]
    fn shutdown_runs_plan_then_terminal() {
        let mut soc = ScriptedSoc::new(Terminal::DeepSleep(WakeSource::button(BUTTON)));
        soc.steps = &[PowerStep::SpiEnd, PowerStep::RadioOff];
        let mut seq = PowerSequencer::new(PowerConfig::new());
        let profile = soc.profile();

        let st = seq.request_shutdown(&mut soc, &profile, ShutdownReason::ButtonLongPress);
        assert_eq!(st, PowerState::DeepSleep(WakeSource::button(BUTTON)));
        assert_eq!(
            soc.log,
            [
                Action::Step(PowerStep::SpiEnd),
                Action::Step(PowerStep::RadioOff),
                Action::Enter(Terminal::DeepSleep(WakeSource::button(BUTTON))),
            ]
        );
    }

    #[test]
    fn duplicate_request_arms_once() {
        let mut soc = ScriptedSoc::new(Terminal::DeepSleep(WakeSource::button(BUTTON)));
        let mut seq = PowerSequencer::new(PowerConfig::new());
        let profile = soc.profile();

        seq.request_shutdown(&mut soc, &profile, ShutdownReason::LowBattery);
        let st = seq.request_shutdown(&mut soc, &profile, ShutdownReason::ButtonLongPress);

        assert_eq!(st, PowerState::DeepSleep(WakeSource::button(BUTTON)));
        let enters = soc.log.iter().filter(|a| matches!(a, Action::Enter(_))).count();
        assert_eq!(enters, 1);
        assert_eq!(soc.plans_built.get(), 1);
    }

    #[test]
    fn unconfirmed_ack_retries_then_proceeds() {
        let mut soc = ScriptedSoc::new(Terminal::Halt);
        soc.steps = &[PowerStep::PmuSleep, PowerStep::RailOff(Rail::Ldo2)];
        soc.acks_needed = u32::MAX;
        let mut config = PowerConfig::new();
        config.ack_attempts = 3;
        let mut seq = PowerSequencer::new(config);
        let profile = soc.profile();

        let st = seq.request_shutdown(&mut soc, &profile, ShutdownReason::Other);
        assert_eq!(st, PowerState::Halted);

        let sleeps = soc
            .log
            .iter()
            .filter(|a| **a == Action::Step(PowerStep::PmuSleep))
            .count();
        let settles = soc
            .log
            .iter()
            .filter(|a| **a == Action::Step(PowerStep::Settle(500)))
            .count();
        assert_eq!(sleeps, 3);
        assert_eq!(settles, 2);
        assert!(soc.log.contains(&Action::Step(PowerStep::RailOff(Rail::Ldo2))));
    }

    #[test]
    fn ack_stops_retrying_once_confirmed() {
        let mut soc = ScriptedSoc::new(Terminal::Halt);
        soc.steps = &[PowerStep::PmuSleep];
        soc.acks_needed = 2;
        let mut seq = PowerSequencer::new(PowerConfig::new());
        let profile = soc.profile();

        seq.request_shutdown(&mut soc, &profile, ShutdownReason::Other);
        let sleeps = soc
            .log
            .iter()
            .filter(|a| **a == Action::Step(PowerStep::PmuSleep))
            .count();
        assert_eq!(sleeps, 3);
    }

    #[test]
    fn monitoring_restarts_on_confirmed_edge() {
        let wake = WakeSource::serial(RX);
        let mut soc = ScriptedSoc::new(Terminal::Monitor(wake));
        let mut seq = PowerSequencer::new(PowerConfig::new());
        let profile = soc.profile();
        let irq = IrqRelay::new();

        assert!(!seq.poll_monitoring(&mut soc, &irq));
        seq.request_shutdown(&mut soc, &profile, ShutdownReason::SerialIdle);
        assert_eq!(seq.state(), PowerState::Monitoring(wake));

        assert!(!seq.poll_monitoring(&mut soc, &irq));
        assert!(soc.log.contains(&Action::Idle));

        irq.on_wake_edge();
        assert!(seq.poll_monitoring(&mut soc, &irq));
        assert_eq!(seq.state(), PowerState::Restarting);
        assert_eq!(soc.log.last(), Some(&Action::Restart));
    }

    #[test]
    fn spurious_wake_keeps_monitoring() {
        let wake = WakeSource::button(BUTTON);
        let mut soc = ScriptedSoc::new(Terminal::Monitor(wake));
        soc.confirm_wake = false;
        let mut seq = PowerSequencer::new(PowerConfig::new());
        let profile = soc.profile();
        let irq = IrqRelay::new();

        seq.request_shutdown(&mut soc, &profile, ShutdownReason::ButtonLongPress);
        irq.on_wake_edge();
        assert!(!seq.poll_monitoring(&mut soc, &irq));
        assert_eq!(seq.state(), PowerState::Monitoring(wake));
        assert!(!soc.log.contains(&Action::Restart));
    }

    #[test]
    fn plan_push_past_capacity_is_dropped() {
        let mut plan = PowerDownPlan::new(Terminal::Halt);
        for _ in 0..MAX_POWER_STEPS + 3 {
            plan.push(PowerStep::Settle(1));
        }
        assert_eq!(plan.steps.len(), MAX_POWER_STEPS);
    }
}
