//! Application model messages (generic, lighting, sensor, health, vendor).
//!
//! These are secured with an application key.

use crate::opcodes::model as op;

/// Optional transition for set messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transition {
    /// Transition time in milliseconds.
    pub duration_ms: u32,
    /// Delay before the transition starts, in milliseconds.
    pub delay_ms: u16,
}

/// A request to an application model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRequest {
    OnOffGet,
    OnOffSet {
        on: bool,
        tid: u8,
        transition: Option<Transition>,
    },
    LevelGet,
    LevelSet {
        level: i16,
        tid: u8,
        transition: Option<Transition>,
    },
    LightnessGet,
    LightnessSet {
        lightness: u16,
        tid: u8,
        transition: Option<Transition>,
    },
    HslGet,
    HslSet {
        lightness: u16,
        hue: u16,
        saturation: u16,
        tid: u8,
        transition: Option<Transition>,
    },
    CtlGet,
    CtlSet {
        lightness: u16,
        temperature: u16,
        delta_uv: i16,
        tid: u8,
        transition: Option<Transition>,
    },
    /// Sensor data for one property, or all when `None`.
    SensorGet { property: Option<u16> },
    SensorDescriptorGet { property: Option<u16> },
    SensorSettingsGet { property: u16 },
    SensorCadenceGet { property: u16 },
    /// Health attention timer in seconds (0 stops identification).
    AttentionSet { seconds: u8 },
    /// Raw vendor message.
    Vendor {
        company: u16,
        opcode: u8,
        payload: Vec<u8>,
    },
}

impl ModelRequest {
    /// On-air opcode. Vendor opcodes are three octets with the company id.
    pub fn opcode(&self) -> u32 {
        match self {
            ModelRequest::OnOffGet => op::GENERIC_ONOFF_GET,
            ModelRequest::OnOffSet { .. } => op::GENERIC_ONOFF_SET,
            ModelRequest::LevelGet => op::GENERIC_LEVEL_GET,
            ModelRequest::LevelSet { .. } => op::GENERIC_LEVEL_SET,
            ModelRequest::LightnessGet => op::LIGHT_LIGHTNESS_GET,
            ModelRequest::LightnessSet { .. } => op::LIGHT_LIGHTNESS_SET,
            ModelRequest::HslGet => op::LIGHT_HSL_GET,
            ModelRequest::HslSet { .. } => op::LIGHT_HSL_SET,
            ModelRequest::CtlGet => op::LIGHT_CTL_GET,
            ModelRequest::CtlSet { .. } => op::LIGHT_CTL_SET,
            ModelRequest::SensorGet { .. } => op::SENSOR_GET,
            ModelRequest::SensorDescriptorGet { .. } => op::SENSOR_DESCRIPTOR_GET,
            ModelRequest::SensorSettingsGet { .. } => op::SENSOR_SETTINGS_GET,
            ModelRequest::SensorCadenceGet { .. } => op::SENSOR_CADENCE_GET,
            ModelRequest::AttentionSet { .. } => op::HEALTH_ATTENTION_SET,
            ModelRequest::Vendor {
                company, opcode, ..
            } => 0x00C0_0000 | ((*opcode as u32 & 0x3F) << 16) | (*company as u32).swap_bytes() >> 16,
        }
    }

    /// Human-readable name for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ModelRequest::OnOffGet => "OnOffGet",
            ModelRequest::OnOffSet { .. } => "OnOffSet",
            ModelRequest::LevelGet => "LevelGet",
            ModelRequest::LevelSet { .. } => "LevelSet",
            ModelRequest::LightnessGet => "LightnessGet",
            ModelRequest::LightnessSet { .. } => "LightnessSet",
            ModelRequest::HslGet => "HslGet",
            ModelRequest::HslSet { .. } => "HslSet",
            ModelRequest::CtlGet => "CtlGet",
            ModelRequest::CtlSet { .. } => "CtlSet",
            ModelRequest::SensorGet { .. } => "SensorGet",
            ModelRequest::SensorDescriptorGet { .. } => "SensorDescriptorGet",
            ModelRequest::SensorSettingsGet { .. } => "SensorSettingsGet",
            ModelRequest::SensorCadenceGet { .. } => "SensorCadenceGet",
            ModelRequest::AttentionSet { .. } => "AttentionSet",
            ModelRequest::Vendor { .. } => "Vendor",
        }
    }
}

/// A status from an application model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    OnOff {
        present: bool,
        target: Option<bool>,
        remaining_ms: u32,
    },
    Level {
        present: i16,
        target: Option<i16>,
        remaining_ms: u32,
    },
    Lightness {
        present: u16,
        target: Option<u16>,
        remaining_ms: u32,
    },
    Hsl {
        lightness: u16,
        hue: u16,
        saturation: u16,
        remaining_ms: u32,
    },
    Ctl {
        present_lightness: u16,
        present_temperature: u16,
        target: Option<(u16, u16)>,
        remaining_ms: u32,
    },
    /// Raw (property id, value) pairs.
    Sensor { values: Vec<(u16, Vec<u8>)> },
    /// Property ids of the sensor descriptors.
    SensorDescriptor { properties: Vec<u16> },
    SensorSettings { property: u16, settings: Vec<u16> },
    SensorCadence { property: u16, cadence: Vec<u8> },
    Attention { seconds: u8 },
    Vendor {
        company: u16,
        opcode: u8,
        payload: Vec<u8>,
    },
}

impl ModelStatus {
    /// Human-readable name for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ModelStatus::OnOff { .. } => "OnOffStatus",
            ModelStatus::Level { .. } => "LevelStatus",
            ModelStatus::Lightness { .. } => "LightnessStatus",
            ModelStatus::Hsl { .. } => "HslStatus",
            ModelStatus::Ctl { .. } => "CtlStatus",
            ModelStatus::Sensor { .. } => "SensorStatus",
            ModelStatus::SensorDescriptor { .. } => "SensorDescriptorStatus",
            ModelStatus::SensorSettings { .. } => "SensorSettingsStatus",
            ModelStatus::SensorCadence { .. } => "SensorCadenceStatus",
            ModelStatus::Attention { .. } => "AttentionStatus",
            ModelStatus::Vendor { .. } => "VendorStatus",
        }
    }

    /// Whether this status answers a sensor discovery request.
    pub fn is_sensor_discovery(&self) -> bool {
        matches!(
            self,
            ModelStatus::SensorDescriptor { .. }
                | ModelStatus::SensorSettings { .. }
                | ModelStatus::SensorCadence { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_opcode() {
        let req = ModelRequest::Vendor {
            company: 0x0059,
            opcode: 0x01,
            payload: vec![],
        };
        // 0xC1 | company little-endian
        assert_eq!(req.opcode(), 0x00C1_5900);
        assert_eq!(ModelRequest::OnOffGet.opcode(), 0x8201);
    }
}
