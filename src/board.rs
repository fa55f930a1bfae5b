/// Compile-time platform selection.
///
/// Exactly one `soc-*` feature picks the operations table an image is built
/// around. Host builds with none of them still get every platform (for
/// tests) but no `Selected` alias.

#[cfg(any(
    all(feature = "soc-esp32", feature = "soc-psoc4"),
    all(feature = "soc-esp32", feature = "soc-samd"),
    all(feature = "soc-psoc4", feature = "soc-samd"),
))]
compile_error!("enable exactly one of `soc-esp32`, `soc-psoc4`, `soc-samd`");

#[cfg(feature = "soc-esp32")]
mod hw {
    use crate::profile::Model;

    pub type Selected<H> = crate::platform::esp32::Esp32<H>;
    pub const SOC_NAME: &str = "ESP32";
    pub const DEFAULT_MODEL: Model = Model::Standalone;
}

#[cfg(feature = "soc-psoc4")]
mod hw {
    use crate::profile::Model;

    pub type Selected<H> = crate::platform::psoc4::Psoc4<H>;
    pub const SOC_NAME: &str = "PSoC4";
    pub const DEFAULT_MODEL: Model = Model::Standalone;
}

#[cfg(feature = "soc-samd")]
mod hw {
    use crate::profile::Model;

    pub type Selected<H> = crate::platform::samd::Samd<H>;
    pub const SOC_NAME: &str = "SAMD";
    pub const DEFAULT_MODEL: Model = Model::Academy;
}

#[cfg(not(any(feature = "soc-esp32", feature = "soc-psoc4", feature = "soc-samd")))]
mod hw {
    pub const SOC_NAME: &str = "unknown";
}

pub use hw::*;
