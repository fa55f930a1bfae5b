/// Pin types and per-board wiring tables.
///
/// Pin numbers are the MCU's native GPIO numbering. Every board that shares
/// the firmware image is listed here; the probe decides which set applies.
use serde::Serialize;

/// A GPIO identified by its native number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pin(pub u8);

/// Logic level on a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Electrical configuration of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Output,
    Input,
    InputPullUp,
    InputPullDown,
    /// Input buffer and driver disabled (analog / high impedance).
    HighZ,
}

/// Active level of a wake or interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Polarity {
    ActiveLow,
    ActiveHigh,
}

/// A pair of I2C lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct I2cPins {
    pub sda: Pin,
    pub scl: Pin,
}

impl I2cPins {
    pub const fn new(sda: u8, scl: u8) -> Self {
        Self {
            sda: Pin(sda),
            scl: Pin(scl),
        }
    }
}

/// SPI bus wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiPins {
    pub sck: Pin,
    pub miso: Pin,
    pub mosi: Pin,
    pub ss: Pin,
}

/// UART wiring (from the MCU's point of view).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartPins {
    pub rx: Pin,
    pub tx: Pin,
}

/// Fixed I2C addresses of probed peripherals.
pub mod addr {
    /// SSD1306 128x64 OLED controller.
    pub const SSD1306: u8 = 0x3C;
    /// AXP192 PMU (T-Beam rev 8+).
    pub const AXP192: u8 = 0x34;
    /// AXP202 PMU (T-Watch).
    pub const AXP202: u8 = 0x35;
}

pub mod esp32 {
    use super::{I2cPins, Pin, SpiPins, UartPins};

    // I2C candidates
    /// Standalone baro header.
    pub const DEFAULT_I2C: I2cPins = I2cPins::new(14, 15);
    /// TTGO T3 OLED. Also carries the AXP192 on T-Beam rev 8.
    pub const TTGO_OLED_I2C: I2cPins = I2cPins::new(21, 22);
    pub const HELTEC_OLED_I2C: I2cPins = I2cPins::new(4, 15);
    pub const TBEAM_I2C: I2cPins = I2cPins::new(13, 2);
    pub const TWATCH_SENSOR_I2C: I2cPins = I2cPins::new(21, 22);
    pub const T8_S2_I2C: I2cPins = I2cPins::new(8, 9);

    pub const HELTEC_OLED_RST: Pin = Pin(16);

    // Buttons and PMU alert lines
    pub const TBEAM_V05_BUTTON: Pin = Pin(39);
    pub const TBEAM_V08_PMU_IRQ: Pin = Pin(35);
    pub const TWATCH_PMU_IRQ: Pin = Pin(35);
    pub const T8_S2_BUTTON: Pin = Pin(0);
    pub const T8_S2_PWR_EN: Pin = Pin(14);

    pub const BUZZER: Pin = Pin(13);
    pub const GNSS_PPS: Pin = Pin(37);

    // Backlights
    pub const TWATCH_TFT_BL: Pin = Pin(12);
    pub const T8_S2_TFT_BL: Pin = Pin(33);

    // Battery sense
    pub const BATTERY_ADC_GPIO35: Pin = Pin(35);
    pub const BATTERY_ADC_GPIO36: Pin = Pin(36);
    pub const T8_S2_BATTERY_ADC: Pin = Pin(9);

    pub const DEFAULT_SPI: SpiPins = SpiPins {
        sck: Pin(5),
        miso: Pin(19),
        mosi: Pin(27),
        ss: Pin(18),
    };
    pub const T8_S2_SPI: SpiPins = SpiPins {
        sck: Pin(36),
        miso: Pin(37),
        mosi: Pin(35),
        ss: Pin(34),
    };

    // GNSS ports
    pub const STANDALONE_GNSS: UartPins = UartPins { rx: Pin(23), tx: Pin(12) };
    pub const TBEAM_V05_GNSS: UartPins = UartPins { rx: Pin(12), tx: Pin(15) };
    pub const TBEAM_V08_GNSS: UartPins = UartPins { rx: Pin(34), tx: Pin(12) };
    pub const TWATCH_GNSS: UartPins = UartPins { rx: Pin(34), tx: Pin(33) };
    pub const TTGO_V2_GNSS: UartPins = UartPins { rx: Pin(34), tx: Pin(39) };
    pub const T8_S2_GNSS: UartPins = UartPins { rx: Pin(1), tx: Pin(2) };
}

/// Heltec CubeCell-GPS (ASR6502).
pub mod psoc4 {
    use super::{I2cPins, Pin, SpiPins, UartPins};

    pub const I2C: I2cPins = I2cPins::new(29, 28);
    /// Vext switch feeding the OLED, active low.
    pub const OLED_PWR: Pin = Pin(6);
    pub const OLED_RST: Pin = Pin(5);
    /// GNSS supply switch, active low.
    pub const GNSS_PWR: Pin = Pin(14);
    /// USER_KEY. Shared with VBAT_ADC_CTL.
    pub const BUTTON: Pin = Pin(7);
    pub const VBAT_ADC_CTL: Pin = Pin(7);
    pub const CONSOLE_RX: Pin = Pin(16);
    pub const BATTERY: Pin = Pin(1);
    pub const GNSS_PPS: Pin = Pin(18);

    pub const SPI: SpiPins = SpiPins {
        sck: Pin(21),
        miso: Pin(22),
        mosi: Pin(23),
        ss: Pin(20),
    };
    pub const RADIO_RST: Pin = Pin(13);
    pub const RADIO_BUSY: Pin = Pin(9);

    pub const GNSS: UartPins = UartPins { rx: Pin(26), tx: Pin(27) };
}

pub mod samd {
    use super::{I2cPins, Pin, SpiPins, UartPins};

    pub const ZERO_I2C: I2cPins = I2cPins::new(20, 21);
    pub const XIAO_I2C: I2cPins = I2cPins::new(4, 5);

    pub const ZERO_SPI: SpiPins = SpiPins {
        sck: Pin(24),
        miso: Pin(22),
        mosi: Pin(23),
        ss: Pin(10),
    };
    pub const XIAO_SPI: SpiPins = SpiPins {
        sck: Pin(8),
        miso: Pin(9),
        mosi: Pin(10),
        ss: Pin(1),
    };

    pub const ZERO_GNSS: UartPins = UartPins { rx: Pin(0), tx: Pin(1) };
    pub const XIAO_GNSS: UartPins = UartPins { rx: Pin(7), tx: Pin(6) };

    pub const ZERO_BATTERY: Pin = Pin(14);
    pub const XIAO_BATTERY: Pin = Pin(0);
    pub const ZERO_RADIO_RST: Pin = Pin(9);
    pub const XIAO_RADIO_RST: Pin = Pin(3);
    pub const ZERO_GNSS_PPS: Pin = Pin(17);
    pub const XIAO_GNSS_PPS: Pin = Pin(2);
}
