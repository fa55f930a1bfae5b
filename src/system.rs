/// Board context.
///
/// Owns the selected operations table, the resolved profile and the power
/// sequencer. `boot` fixes the start-up order in one place:
///
/// 1. raw reset cause, before anything can clobber it
/// 2. identification (`SocOps::setup`)
/// 3. reset decode, with the flash id identification found
/// 4. optional subsystems: watchdog, display, battery, baro, button, boot
///    sound, SPI, GNSS serial, byte-stream devices
/// 5. power sequencer
/// 6. interrupt lines
///
/// The interrupt relay is borrowed because it lives in a `static` shared
/// with the handlers.
use crate::battery::{BatteryMonitor, BatteryParams, BatteryStatus};
use crate::irq::{IrqRelay, PpsSample};
use crate::ops::{IoDevOps, LoopEvent, SocOps};
use crate::platform::GNSS_BAUD;
use crate::power::{PowerConfig, PowerSequencer, PowerState, ShutdownReason};
use crate::profile::{DisplayKind, HardwareProfile};
use crate::report::BootReport;
use crate::reset::ResetReason;

pub struct System<'a, P: SocOps> {
    soc: P,
    profile: HardwareProfile,
    reset_code: u32,
    reset: ResetReason,
    chip_id: u32,
    power: PowerSequencer,
    battery: BatteryMonitor,
    irq: &'a IrqRelay,
}

impl<'a, P: SocOps> System<'a, P> {
    pub fn boot(mut soc: P, config: PowerConfig, irq: &'a IrqRelay) -> Self {
        let reset_code = soc.reset_code();
        let mut profile = soc.setup();
        let reset = P::decode_reset(reset_code, profile.flash_id);
        let chip_id = soc.chip_id();
        log::info!(
            "{} {:08X}: reset {} ({})",
            P::NAME,
            chip_id,
            reset.name(),
            P::reset_info(reset_code)
        );

        if let Some(ops) = P::WATCHDOG {
            (ops.setup)(&mut soc);
        }
        if let Some(ops) = P::DISPLAY {
            profile.display = (ops.setup)(&mut soc, &profile);
        }
        if let Some(ops) = P::BATTERY {
            (ops.setup)(&mut soc, &profile);
        }
        if let Some(ops) = P::BARO {
            if !(ops.setup)(&mut soc, &profile) {
                profile.baro = None;
            }
        }
        if let Some(ops) = P::BUTTON {
            (ops.setup)(&mut soc, &profile);
        }
        if let Some(ops) = P::SOUND {
            (ops.test)(&mut soc, reset);
        }
        soc.spi_begin(&profile);
        if let Some(ops) = P::SERIAL {
            (ops.begin)(&mut soc, &profile, GNSS_BAUD);
        }
        for dev in Self::io_devices().iter().flatten() {
            if let Some(setup) = dev.setup {
                setup(&mut soc);
                log::debug!("{} up", dev.name);
            }
        }
        soc.post_init(&profile);

        let power = PowerSequencer::new(config);
        soc.attach_interrupts(&profile);

        Self {
            soc,
            profile,
            reset_code,
            reset,
            chip_id,
            power,
            battery: BatteryMonitor::new(config.battery_interval_ms),
            irq,
        }
    }

    fn io_devices() -> [Option<IoDevOps<P>>; 3] {
        [P::BLUETOOTH, P::USB, P::UART]
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    pub fn reset_reason(&self) -> ResetReason {
        self.reset
    }

    pub fn chip_id(&self) -> u32 {
        self.chip_id
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn soc(&self) -> &P {
        &self.soc
    }

    pub fn soc_mut(&mut self) -> &mut P {
        &mut self.soc
    }

    /// Last PPS edge relayed from the interrupt handler.
    pub fn pps_time_marker(&self) -> PpsSample {
        self.irq.pps_time_marker()
    }

    pub fn boot_report(&self) -> BootReport<'_> {
        BootReport::new(
            P::SOC,
            P::NAME,
            self.chip_id,
            self.reset,
            P::reset_info(self.reset_code),
            &self.profile,
        )
    }

    pub fn random(&mut self, low: i32, high: i32) -> i32 {
        self.soc.random(low, high)
    }

    /// Map the settings record. False when the platform has no storage.
    pub fn eeprom_begin(&mut self, size: usize) -> bool {
        P::EEPROM.is_some_and(|ops| (ops.begin)(&mut self.soc, size))
    }

    pub fn set_wifi_tx_power(&mut self, dbm: i8) {
        if let Some(ops) = P::WIFI {
            (ops.set_tx_power)(&mut self.soc, dbm);
        }
    }

    pub fn tone(&mut self, hz: u32) {
        if let Some(ops) = P::SOUND {
            (ops.tone)(&mut self.soc, hz);
        }
    }

    /// Queue output on the UART helper. Returns the bytes accepted; zero
    /// when the platform has none.
    pub fn uart_write(&mut self, buf: &[u8]) -> usize {
        match P::UART.and_then(|ops| ops.write) {
            Some(write) => write(&mut self.soc, buf),
            None => 0,
        }
    }

    fn is_active(&self) -> bool {
        self.power.state().is_active()
    }

    /// One pass of the cooperative loop. Stops early once a shutdown has
    /// been requested; while monitoring, only watches for the wake edge.
    pub fn tick(&mut self, now_ms: u32) -> PowerState {
        match self.power.state() {
            PowerState::Active => {}
            PowerState::Monitoring(_) => {
                self.power.poll_monitoring(&mut self.soc, self.irq);
                return self.power.state();
            }
            other => return other,
        }

        if let Some(ops) = P::WATCHDOG {
            (ops.feed)(&mut self.soc);
        }

        if let Some(event) = self.soc.loop_tick(&self.profile, self.irq) {
            self.handle(event);
        }
        if !self.is_active() {
            return self.power.state();
        }

        if let Some(ops) = P::BUTTON {
            if let Some(event) = (ops.tick)(&mut self.soc, &self.profile) {
                self.handle(event);
            }
        }
        if !self.is_active() {
            return self.power.state();
        }

        if self.profile.display != DisplayKind::None {
            if let Some(ops) = P::DISPLAY {
                (ops.tick)(&mut self.soc, &self.profile);
            }
        }

        self.check_battery(now_ms);
        if !self.is_active() {
            return self.power.state();
        }

        for dev in Self::io_devices().iter().flatten() {
            if let Some(tick) = dev.tick {
                tick(&mut self.soc);
            }
        }
        self.power.state()
    }

    fn handle(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::NextPage => {
                if self.profile.display == DisplayKind::None {
                    return;
                }
                if let Some(ops) = P::DISPLAY {
                    (ops.next_page)(&mut self.soc);
                }
            }
            LoopEvent::Shutdown(reason) => {
                self.shutdown(reason);
            }
        }
    }

    fn check_battery(&mut self, now_ms: u32) {
        let Some(ops) = P::BATTERY else {
            return;
        };
        let params = BatteryParams {
            threshold_mv: (ops.threshold_mv)(&self.profile),
            cutoff_mv: (ops.cutoff_mv)(&self.profile),
        };
        let soc = &mut self.soc;
        let profile = &self.profile;
        let status = self
            .battery
            .poll(now_ms, params, || (ops.voltage_mv)(soc, profile));
        if status == Some(BatteryStatus::Critical) {
            self.shutdown(ShutdownReason::LowBattery);
        }
    }

    /// Close the byte-stream devices and the button, then hand over to the
    /// power sequencer. Only the first request does anything.
    pub fn shutdown(&mut self, reason: ShutdownReason) -> PowerState {
        if self.is_active() {
            for dev in Self::io_devices().iter().flatten() {
                if let Some(fini) = dev.fini {
                    fini(&mut self.soc);
                }
            }
            if let Some(ops) = P::BUTTON {
                (ops.fini)(&mut self.soc, &self.profile);
            }
        }
        self.power
            .request_shutdown(&mut self.soc, &self.profile, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::{addr, esp32, psoc4, Level, PinMode};
    use crate::platform::esp32::Esp32;
    use crate::platform::psoc4::{Psoc4, WDT_TIMEOUT_MS};
    use crate::pmu::PekIrq;
    use crate::power::WakeSource;
    use crate::profile::{flash, Model};
    use crate::report::report_line;
    use crate::testing::{Action, FakeHw};

    fn cubecell_mini() -> FakeHw {
        let mut hw = FakeHw::new();
        hw.add_device(psoc4::I2C, addr::SSD1306);
        hw.adc_mv = 2000;
        hw
    }

    fn tbeam_v08() -> FakeHw {
        let mut hw = FakeHw::new();
        hw.psram = true;
        hw.flash_id = flash::W25Q32_V;
        hw.add_device(esp32::TTGO_OLED_I2C, addr::AXP192);
        hw.add_device(esp32::TTGO_OLED_I2C, addr::SSD1306);
        hw
    }

    #[test]
    fn boot_order() {
        let irq = IrqRelay::new();
        let sys = System::boot(Psoc4::new(cubecell_mini()), PowerConfig::new(), &irq);
        assert_eq!(sys.profile().model, Model::Mini);
        assert_eq!(sys.power_state(), PowerState::Active);

        let hw = sys.soc().hw();
        let probe = hw.index_of(&Action::Probe(addr::SSD1306)).unwrap();
        let wdt = hw.index_of(&Action::WdtEnable(WDT_TIMEOUT_MS)).unwrap();
        let panel = hw
            .index_of(&Action::PanelBegin(sys.profile().display))
            .unwrap();
        let spi = hw.index_of(&Action::SpiBegin(psoc4::SPI)).unwrap();
        let serial = hw
            .index_of(&Action::SerialBegin(psoc4::GNSS, GNSS_BAUD))
            .unwrap();
        assert!(probe < wdt && wdt < panel && panel < spi && spi < serial);
        assert_eq!(hw.log.last(), Some(&Action::Mode(psoc4::GNSS_PPS, PinMode::Input)));
    }

    #[test]
    fn reset_decoded_once_at_boot() {
        let irq = IrqRelay::new();
        let mut hw = cubecell_mini();
        hw.reset_code = 0x01;
        hw.uid = 0xDEAD_BEEF;
        let sys = System::boot(Psoc4::new(hw), PowerConfig::new(), &irq);
        assert_eq!(sys.reset_reason(), ResetReason::Wdt);
        assert_eq!(sys.chip_id(), 0xDEAD_BEEF);

        let line = report_line(&sys.boot_report()).unwrap();
        let text = core::str::from_utf8(&line).unwrap();
        assert!(text.contains("\"soc\":\"Psoc4\""));
        assert!(text.contains("\"reset\":\"Wdt\""));
        assert!(text.contains("\"model\":\"Mini\""));
    }

    #[test]
    fn failed_panel_is_dropped_from_profile() {
        let irq = IrqRelay::new();
        let mut hw = cubecell_mini();
        hw.panel_ok = false;
        let sys = System::boot(Psoc4::new(hw), PowerConfig::new(), &irq);
        assert_eq!(sys.profile().display, DisplayKind::None);
    }

    #[test]
    fn long_press_monitors_then_restarts_on_edge() {
        let irq = IrqRelay::new();
        let mut sys = System::boot(Psoc4::new(cubecell_mini()), PowerConfig::new(), &irq);

        sys.soc_mut().hw_mut().set_level(psoc4::BUTTON, Level::Low);
        assert_eq!(sys.tick(0), PowerState::Active);

        sys.soc_mut().hw_mut().now += 2500;
        sys.soc_mut().hw_mut().release_after(psoc4::BUTTON, 1);
        let wake = WakeSource::button(psoc4::BUTTON);
        assert_eq!(sys.tick(2500), PowerState::Monitoring(wake));

        let hw = sys.soc().hw();
        assert!(!hw.has_pmu_traffic());
        assert_eq!(hw.log.last(), Some(&Action::ArmWake(wake)));

        // later requests change nothing
        assert_eq!(
            sys.shutdown(ShutdownReason::LowBattery),
            PowerState::Monitoring(wake)
        );
        assert_eq!(sys.soc().hw().count(&Action::ArmWake(wake)), 1);

        assert_eq!(sys.tick(3000), PowerState::Monitoring(wake));
        assert_eq!(sys.soc().hw().log.last(), Some(&Action::Idle));

        sys.soc_mut().hw_mut().set_level(psoc4::BUTTON, Level::Low);
        sys.soc_mut().hw_mut().release_after(psoc4::BUTTON, 1);
        irq.on_wake_edge();
        assert_eq!(sys.tick(3100), PowerState::Restarting);
        assert_eq!(sys.soc().hw().log.last(), Some(&Action::Reset));
    }

    #[test]
    fn watchdog_fed_once_per_active_tick() {
        let irq = IrqRelay::new();
        let mut sys = System::boot(Esp32::new(FakeHw::new()), PowerConfig::new(), &irq);
        for t in 0..100 {
            sys.tick(t * 100);
        }
        assert_eq!(sys.soc().hw().count(&Action::WdtFeed), 100);

        let mut sys = System::boot(Psoc4::new(cubecell_mini()), PowerConfig::new(), &irq);
        for t in 0..100 {
            sys.tick(t * 100);
        }
        assert_eq!(sys.soc().hw().count(&Action::WdtFeed), 100);
    }

    #[test]
    fn watchdog_not_fed_after_shutdown() {
        let irq = IrqRelay::new();
        let mut sys = System::boot(Psoc4::new(cubecell_mini()), PowerConfig::new(), &irq);
        sys.shutdown(ShutdownReason::Other);
        sys.tick(0);
        sys.tick(100);
        let hw = sys.soc().hw();
        assert_eq!(hw.count(&Action::WdtFeed), 0);
        assert!(hw.log.contains(&Action::WdtDisable));
    }

    #[test]
    fn held_button_waited_out_once() {
        let irq = IrqRelay::new();
        let mut sys = System::boot(Psoc4::new(cubecell_mini()), PowerConfig::new(), &irq);
        sys.soc_mut().hw_mut().set_level(psoc4::BUTTON, Level::Low);
        sys.tick(0);
        sys.soc_mut().hw_mut().now += 2500;

        let polls_before = sys.soc().hw().count(&Action::Delay(10));
        let wake = WakeSource::button(psoc4::BUTTON);
        assert_eq!(sys.tick(2500), PowerState::Monitoring(wake));

        // the button never comes up: one bounded wait, 5000 ms in 10 ms polls
        let polls = sys.soc().hw().count(&Action::Delay(10)) - polls_before;
        assert_eq!(polls, 500);
    }

    #[test]
    fn critical_battery_shuts_down() {
        let irq = IrqRelay::new();
        let mut hw = cubecell_mini();
        hw.adc_mv = 1500;
        let mut sys = System::boot(Psoc4::new(hw), PowerConfig::new(), &irq);

        let st = sys.tick(0);
        assert_eq!(st, PowerState::Monitoring(WakeSource::button(psoc4::BUTTON)));
        assert!(sys
            .soc()
            .hw()
            .log
            .contains(&Action::Message("LOW BAT".into())));
    }

    #[test]
    fn battery_checked_once_per_interval() {
        let irq = IrqRelay::new();
        let mut sys = System::boot(Psoc4::new(cubecell_mini()), PowerConfig::new(), &irq);
        let dance = Action::Write(psoc4::VBAT_ADC_CTL, Level::Low);

        sys.tick(0);
        sys.tick(1000);
        assert_eq!(sys.soc().hw().count(&dance), 1);
        sys.tick(60_000);
        assert_eq!(sys.soc().hw().count(&dance), 2);
        assert_eq!(sys.power_state(), PowerState::Active);
    }

    #[test]
    fn uart_helper_is_drained_by_tick() {
        let irq = IrqRelay::new();
        let mut sys = System::boot(Psoc4::new(cubecell_mini()), PowerConfig::new(), &irq);
        assert_eq!(sys.uart_write(b"$PFLAU\r\n"), 8);
        sys.tick(0);
        assert_eq!(sys.soc().uart_pending(), 0);
        assert_eq!(sys.soc().hw().count(&Action::UartPut(b'$')), 1);
        assert!(!sys.eeprom_begin(64));
    }

    #[test]
    fn pmu_long_press_ends_in_deep_sleep() {
        let irq = IrqRelay::new();
        let mut sys = System::boot(Esp32::new(tbeam_v08()), PowerConfig::new(), &irq);
        assert_eq!(sys.reset_reason(), ResetReason::Default);
        // rising boot tones
        assert!(sys.soc().hw().index_of(&Action::Tone(440)).unwrap()
            < sys.soc().hw().index_of(&Action::Tone(1040)).unwrap());

        sys.soc_mut().hw_mut().pek = PekIrq {
            short_press: false,
            long_press: true,
        };
        irq.on_pmu_alert();
        let wake = WakeSource::pmu_irq(esp32::TBEAM_V08_PMU_IRQ);
        assert_eq!(sys.tick(0), PowerState::DeepSleep(wake));
        assert_eq!(sys.tick(10), PowerState::DeepSleep(wake));
        assert_eq!(sys.soc().hw().count(&Action::DeepSleep), 1);
    }

    #[test]
    fn pmu_short_press_turns_page() {
        let irq = IrqRelay::new();
        let mut sys = System::boot(Esp32::new(tbeam_v08()), PowerConfig::new(), &irq);
        sys.soc_mut().hw_mut().pek = PekIrq {
            short_press: true,
            long_press: false,
        };
        irq.on_pmu_alert();
        assert_eq!(sys.tick(0), PowerState::Active);
        assert!(sys.soc().hw().log.contains(&Action::NextPage));
    }

    #[test]
    fn pps_marker_passes_through() {
        let irq = IrqRelay::new();
        let sys = System::boot(Esp32::new(tbeam_v08()), PowerConfig::new(), &irq);
        assert_eq!(sys.pps_time_marker().seq, 0);
        irq.on_pps(1234);
        let pps = sys.pps_time_marker();
        assert_eq!((pps.millis, pps.seq), (1234, 1));
    }

    #[test]
    fn esp32_optional_ops_reachable() {
        let irq = IrqRelay::new();
        let mut sys = System::boot(Esp32::new(FakeHw::new()), PowerConfig::new(), &irq);
        assert!(sys.eeprom_begin(128));
        sys.set_wifi_tx_power(20);
        sys.tone(440);
        assert_eq!(sys.uart_write(b"x"), 0);
        let hw = sys.soc().hw();
        assert!(hw.log.contains(&Action::EepromBegin(128)));
        assert!(hw.log.contains(&Action::WifiPower(78)));
        assert_eq!(hw.log.last(), Some(&Action::Tone(440)));
        assert_eq!(sys.random(3, 3), 3);
    }
}
