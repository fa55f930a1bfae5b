/// X-Powers AXP192 / AXP202 power-management unit.
///
/// `Pmu` is the port the platform code drives; `Axp20x` is the register-level
/// driver the firmware uses to implement it over any `embedded-hal` I2C bus.
use embedded_hal::i2c::I2c;

use crate::pins::addr;
use crate::profile::PmuKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmuError {
    /// I2C transfer failed.
    Bus,
    /// The requested rail does not exist on this PMU.
    Unsupported,
    /// No PMU has been attached.
    Absent,
}

/// Switchable output rails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rail {
    Dcdc1,
    Dcdc2,
    Dcdc3,
    Ldo2,
    Ldo3,
    Ldo4,
    Exten,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeLed {
    Off = 0,
    Blink1Hz = 1,
    Blink4Hz = 2,
    On = 3,
}

/// Decoded power-key interrupt flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PekIrq {
    pub short_press: bool,
    pub long_press: bool,
}

pub trait Pmu {
    /// Bind to the PMU found by the probe and apply the board's rail setup.
    fn pmu_begin(&mut self, kind: PmuKind) -> Result<(), PmuError>;
    fn pmu_set_rail(&mut self, rail: Rail, on: bool) -> Result<(), PmuError>;
    /// Request PMU sleep. `Ok(true)` once the PMU reports the request latched.
    fn pmu_request_sleep(&mut self) -> Result<bool, PmuError>;
    fn pmu_power_off(&mut self) -> Result<(), PmuError>;
    fn pmu_charge_led(&mut self, mode: ChargeLed) -> Result<(), PmuError>;
    fn pmu_read_irq(&mut self) -> Result<PekIrq, PmuError>;
    fn pmu_clear_irq(&mut self) -> Result<(), PmuError>;
    /// Battery voltage in millivolts, `None` if no cell is connected.
    fn pmu_battery_mv(&mut self) -> Result<Option<u16>, PmuError>;
}

// ── Register map ──────────────────────────────────────────────────────

const REG_POWER_STATUS: u8 = 0x01;
const REG_OUTPUT_CTL: u8 = 0x12;
const REG_LDO4_VOLTAGE: u8 = 0x29;
const REG_SLEEP_CTL: u8 = 0x31;
const REG_OFF_CTL: u8 = 0x32;
const REG_IRQ_EN3: u8 = 0x42;
const REG_BAT_VOLT_H: u8 = 0x78;
const REG_BAT_VOLT_L: u8 = 0x79;
const REG_ADC_EN1: u8 = 0x82;

const BATTERY_PRESENT: u8 = 1 << 5;
const SLEEP_REQUEST: u8 = 1 << 3;
const POWER_OFF: u8 = 1 << 7;
const CHGLED_CTL_BY_REG: u8 = 1 << 3;
const CHGLED_MASK: u8 = 0b0011_1000;
const PEK_LONG: u8 = 1 << 0;
const PEK_SHORT: u8 = 1 << 1;
const ADC_BATT_VOLTAGE: u8 = 1 << 7;
const IRQ_STATUS_REGS: u8 = 5;

/// AXP192 / AXP202 register driver. Stateless apart from the chip flavour;
/// the bus is borrowed per call so the probe can keep using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Axp20x {
    kind: PmuKind,
}

impl Axp20x {
    pub const fn new(kind: PmuKind) -> Self {
        Self { kind }
    }

    pub const fn kind(&self) -> PmuKind {
        self.kind
    }

    pub const fn address(&self) -> u8 {
        match self.kind {
            PmuKind::Axp192 => addr::AXP192,
            PmuKind::Axp202 => addr::AXP202,
        }
    }

    /// Bit in the output-control register for `rail`.
    pub const fn rail_bit(kind: PmuKind, rail: Rail) -> Option<u8> {
        match (kind, rail) {
            (PmuKind::Axp192, Rail::Dcdc1) => Some(0),
            (PmuKind::Axp192, Rail::Dcdc3) => Some(1),
            (PmuKind::Axp192, Rail::Ldo2) => Some(2),
            (PmuKind::Axp192, Rail::Ldo3) => Some(3),
            (PmuKind::Axp192, Rail::Dcdc2) => Some(4),
            (PmuKind::Axp192, Rail::Exten) => Some(6),
            (PmuKind::Axp192, Rail::Ldo4) => None,
            (PmuKind::Axp202, Rail::Exten) => Some(0),
            (PmuKind::Axp202, Rail::Dcdc3) => Some(1),
            (PmuKind::Axp202, Rail::Ldo2) => Some(2),
            (PmuKind::Axp202, Rail::Ldo4) => Some(3),
            (PmuKind::Axp202, Rail::Dcdc2) => Some(4),
            (PmuKind::Axp202, Rail::Ldo3) => Some(6),
            (PmuKind::Axp202, Rail::Dcdc1) => None,
        }
    }

    const fn irq_base(&self) -> u8 {
        match self.kind {
            PmuKind::Axp192 => 0x44,
            PmuKind::Axp202 => 0x48,
        }
    }

    fn read<I: I2c>(&self, i2c: &mut I, reg: u8) -> Result<u8, PmuError> {
        let mut buf = [0u8];
        i2c.write_read(self.address(), &[reg], &mut buf)
            .map_err(|_| PmuError::Bus)?;
        Ok(buf[0])
    }

    fn write<I: I2c>(&self, i2c: &mut I, reg: u8, val: u8) -> Result<(), PmuError> {
        i2c.write(self.address(), &[reg, val])
            .map_err(|_| PmuError::Bus)
    }

    fn update<I: I2c>(&self, i2c: &mut I, reg: u8, f: impl FnOnce(u8) -> u8) -> Result<(), PmuError> {
        let val = self.read(i2c, reg)?;
        self.write(i2c, reg, f(val))
    }

    pub fn set_rail<I: I2c>(&self, i2c: &mut I, rail: Rail, on: bool) -> Result<(), PmuError> {
        let bit = Self::rail_bit(self.kind, rail).ok_or(PmuError::Unsupported)?;
        self.update(i2c, REG_OUTPUT_CTL, |v| {
            if on {
                v | (1 << bit)
            } else {
                v & !(1 << bit)
            }
        })
    }

    /// Board bring-up: rails on, battery ADC on, power-key IRQs unmasked
    /// and cleared.
    pub fn setup<I: I2c>(&self, i2c: &mut I) -> Result<(), PmuError> {
        self.charge_led(i2c, ChargeLed::On)?;
        match self.kind {
            PmuKind::Axp192 => {
                // LoRa, GNSS, OLED/3V3 header, NC, EXTEN
                for rail in [Rail::Ldo2, Rail::Ldo3, Rail::Dcdc1, Rail::Dcdc2, Rail::Exten] {
                    self.set_rail(i2c, rail, true)?;
                }
            }
            PmuKind::Axp202 => {
                // Backlight, S76G MCU + LoRa, S76G GNSS at 1.8 V
                self.set_rail(i2c, Rail::Ldo2, true)?;
                self.set_rail(i2c, Rail::Ldo3, true)?;
                self.update(i2c, REG_LDO4_VOLTAGE, |v| (v & 0xF0) | 0x01)?;
                self.set_rail(i2c, Rail::Ldo4, true)?;
            }
        }
        self.update(i2c, REG_ADC_EN1, |v| v | ADC_BATT_VOLTAGE)?;
        self.update(i2c, REG_IRQ_EN3, |v| v | PEK_LONG | PEK_SHORT)?;
        self.clear_irq(i2c)
    }

    /// Latch the sleep request and read it back.
    pub fn request_sleep<I: I2c>(&self, i2c: &mut I) -> Result<bool, PmuError> {
        self.update(i2c, REG_SLEEP_CTL, |v| v | SLEEP_REQUEST)?;
        Ok(self.read(i2c, REG_SLEEP_CTL)? & SLEEP_REQUEST != 0)
    }

    pub fn power_off<I: I2c>(&self, i2c: &mut I) -> Result<(), PmuError> {
        self.update(i2c, REG_OFF_CTL, |v| v | POWER_OFF)
    }

    pub fn charge_led<I: I2c>(&self, i2c: &mut I, mode: ChargeLed) -> Result<(), PmuError> {
        self.update(i2c, REG_OFF_CTL, |v| {
            (v & !CHGLED_MASK) | ((mode as u8) << 4) | CHGLED_CTL_BY_REG
        })
    }

    pub fn read_irq<I: I2c>(&self, i2c: &mut I) -> Result<PekIrq, PmuError> {
        let status = self.read(i2c, self.irq_base() + 2)?;
        Ok(PekIrq {
            short_press: status & PEK_SHORT != 0,
            long_press: status & PEK_LONG != 0,
        })
    }

    pub fn clear_irq<I: I2c>(&self, i2c: &mut I) -> Result<(), PmuError> {
        for i in 0..IRQ_STATUS_REGS {
            self.write(i2c, self.irq_base() + i, 0xFF)?;
        }
        Ok(())
    }

    pub fn battery_connected<I: I2c>(&self, i2c: &mut I) -> Result<bool, PmuError> {
        Ok(self.read(i2c, REG_POWER_STATUS)? & BATTERY_PRESENT != 0)
    }

    /// 12-bit ADC reading at 1.1 mV per LSB.
    pub fn battery_mv<I: I2c>(&self, i2c: &mut I) -> Result<Option<u16>, PmuError> {
        if !self.battery_connected(i2c)? {
            return Ok(None);
        }
        let hi = self.read(i2c, REG_BAT_VOLT_H)? as u32;
        let lo = self.read(i2c, REG_BAT_VOLT_L)? as u32;
        let raw = (hi << 4) | (lo & 0x0F);
        Ok(Some((raw * 11 / 10) as u16))
    }
}
