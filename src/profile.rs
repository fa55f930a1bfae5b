/// Hardware profile resolved once at boot by the capability probe.
///
/// The profile is the single description of "what board is this" that every
/// later component reads. It is produced by value from `SocOps::setup` and
/// only ever handed out by shared reference afterwards.
use serde::Serialize;

use crate::pins::{I2cPins, Pin};

/// MCU family of the running image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Soc {
    Esp32,
    Psoc4,
    Samd,
}

/// Device model as sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Model {
    Standalone,
    PrimeMk2,
    SkyWatch,
    Mini,
    Academy,
}

/// Concrete PCB the probe settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BoardVariant {
    Esp32DevKit,
    TtgoV2Oled,
    HeltecOled,
    TtgoTBeam,
    TtgoTWatch,
    T8S2,
    CubeCellGps,
    SamdZero,
    XiaoM0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisplayKind {
    None,
    /// SSD1306 on the TTGO wiring.
    OledTtgo,
    /// SSD1306 on the Heltec wiring (separate reset line).
    OledHeltec,
    TftTtgo240,
    TftTtgo135,
}

impl DisplayKind {
    pub const fn is_oled(self) -> bool {
        matches!(self, DisplayKind::OledTtgo | DisplayKind::OledHeltec)
    }

    pub const fn is_tft(self) -> bool {
        matches!(self, DisplayKind::TftTtgo240 | DisplayKind::TftTtgo135)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorageKind {
    None,
    Sd,
}

/// Radio transceiver fitted to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RadioIc {
    None,
    Sx1276,
    Sx1262,
    Nrf905,
}

impl RadioIc {
    pub const fn is_sx12xx(self) -> bool {
        matches!(self, RadioIc::Sx1276 | RadioIc::Sx1262)
    }
}

/// Result of the external radio probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioInfo {
    pub ic: RadioIc,
    /// Whether the transceiver's reset line is wired to the MCU.
    pub reset_connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PmuKind {
    Axp192,
    Axp202,
}

/// A power-management unit found on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PmuInfo {
    pub kind: PmuKind,
    pub bus: I2cPins,
    /// Open-drain alert line from the PMU, pulled low on an IRQ.
    pub irq: Pin,
}

/// JEDEC flash identifier: manufacturer byte followed by the 16-bit device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlashId(pub u32);

impl FlashId {
    pub const fn make(vendor: u8, device: u16) -> Self {
        Self(((vendor as u32) << 16) | device as u32)
    }

    pub const fn vendor(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn device(self) -> u16 {
        self.0 as u16
    }
}

pub mod flash {
    use super::FlashId;

    pub const GIGADEVICE: u8 = 0xC8;
    pub const WINBOND_NEX: u8 = 0xEF;
    pub const BOYA: u8 = 0x68;

    pub const GD25Q32: FlashId = FlashId::make(GIGADEVICE, 0x4016);
    /// Slow-starting part; the ROM bootloader can time out on it at power-on.
    pub const GD25LQ32: FlashId = FlashId::make(GIGADEVICE, 0x6016);
    pub const W25Q32_V: FlashId = FlashId::make(WINBOND_NEX, 0x4016);
    pub const W25Q128_V: FlashId = FlashId::make(WINBOND_NEX, 0x4018);
    pub const BY25Q32AL: FlashId = FlashId::make(BOYA, 0x4016);
}

/// Everything the rest of the firmware needs to know about the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HardwareProfile {
    pub model: Model,
    /// Board revision. Meaning is model-specific (T-Beam 2/5/8, T3 11/16).
    pub revision: u8,
    pub variant: BoardVariant,
    pub display: DisplayKind,
    /// Bus the display answered on.
    pub display_bus: Option<I2cPins>,
    /// Bus the barometer answered on.
    pub baro: Option<I2cPins>,
    pub storage: StorageKind,
    pub radio: RadioIc,
    pub rf_reset_connected: bool,
    pub pmu: Option<PmuInfo>,
    /// User button, active low.
    pub button: Option<Pin>,
    pub flash_id: Option<FlashId>,
}

impl HardwareProfile {
    /// A bare profile for `model`: no optional peripherals.
    pub const fn new(model: Model, variant: BoardVariant) -> Self {
        Self {
            model,
            revision: 0,
            variant,
            display: DisplayKind::None,
            display_bus: None,
            baro: None,
            storage: StorageKind::None,
            radio: RadioIc::None,
            rf_reset_connected: false,
            pmu: None,
            button: None,
            flash_id: None,
        }
    }

    pub const fn has_pmu(&self) -> bool {
        self.pmu.is_some()
    }

    pub const fn has_baro(&self) -> bool {
        self.baro.is_some()
    }

    /// True when the display sits on the same I2C lines as the PMU.
    pub fn display_shares_pmu_bus(&self) -> bool {
        match (self.display_bus, self.pmu) {
            (Some(bus), Some(pmu)) => bus == pmu.bus,
            _ => false,
        }
    }

    /// T-Beam rev 8 and T-Watch: boards whose rails are owned by a PMU.
    pub fn is_pmu_managed(&self) -> bool {
        (self.model == Model::PrimeMk2 && self.revision == 8) || self.model == Model::SkyWatch
    }
}
