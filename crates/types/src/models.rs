//! Model classification tables.
//!
//! Decides, per Bluetooth SIG model id, how the configuration engine treats a
//! model after provisioning: whether it is a core (device-key) model excluded
//! from user configuration, whether it receives a default subscription to the
//! node's group, whether it gets a default publication, and which setup-variant
//! model accompanies it on the same element.

use crate::ModelId;

/// Configuration Server.
pub const CONFIG_SERVER: u16 = 0x0000;
/// Configuration Client.
pub const CONFIG_CLIENT: u16 = 0x0001;
/// Health Server.
pub const HEALTH_SERVER: u16 = 0x0002;
/// Health Client.
pub const HEALTH_CLIENT: u16 = 0x0003;
/// Remote Provisioning Server.
pub const REMOTE_PROVISIONING_SERVER: u16 = 0x0004;
/// Remote Provisioning Client.
pub const REMOTE_PROVISIONING_CLIENT: u16 = 0x0005;
/// SAR Configuration Server.
pub const SAR_CONFIG_SERVER: u16 = 0x000E;
/// SAR Configuration Client.
pub const SAR_CONFIG_CLIENT: u16 = 0x000F;

/// Generic OnOff Server.
pub const GENERIC_ONOFF_SERVER: u16 = 0x1000;
/// Generic OnOff Client.
pub const GENERIC_ONOFF_CLIENT: u16 = 0x1001;
/// Generic Level Server.
pub const GENERIC_LEVEL_SERVER: u16 = 0x1002;
/// Generic Level Client.
pub const GENERIC_LEVEL_CLIENT: u16 = 0x1003;
/// Generic Default Transition Time Server.
pub const GENERIC_DEFTT_SERVER: u16 = 0x1004;
/// Generic Default Transition Time Client.
pub const GENERIC_DEFTT_CLIENT: u16 = 0x1005;
/// Generic Power OnOff Server.
pub const GENERIC_POWER_ONOFF_SERVER: u16 = 0x1006;
/// Generic Power OnOff Setup Server.
pub const GENERIC_POWER_ONOFF_SETUP_SERVER: u16 = 0x1007;
/// Generic Power OnOff Client.
pub const GENERIC_POWER_ONOFF_CLIENT: u16 = 0x1008;
/// Generic Power Level Server.
pub const GENERIC_POWER_LEVEL_SERVER: u16 = 0x1009;
/// Generic Power Level Setup Server.
pub const GENERIC_POWER_LEVEL_SETUP_SERVER: u16 = 0x100A;
/// Generic Power Level Client.
pub const GENERIC_POWER_LEVEL_CLIENT: u16 = 0x100B;
/// Generic Battery Server.
pub const GENERIC_BATTERY_SERVER: u16 = 0x100C;
/// Generic Battery Client.
pub const GENERIC_BATTERY_CLIENT: u16 = 0x100D;
/// Generic Location Server.
pub const GENERIC_LOCATION_SERVER: u16 = 0x100E;
/// Generic Location Setup Server.
pub const GENERIC_LOCATION_SETUP_SERVER: u16 = 0x100F;
/// Generic Location Client.
pub const GENERIC_LOCATION_CLIENT: u16 = 0x1010;

/// Sensor Server.
pub const SENSOR_SERVER: u16 = 0x1100;
/// Sensor Setup Server.
pub const SENSOR_SETUP_SERVER: u16 = 0x1101;
/// Sensor Client.
pub const SENSOR_CLIENT: u16 = 0x1102;

/// Time Server.
pub const TIME_SERVER: u16 = 0x1200;
/// Time Setup Server.
pub const TIME_SETUP_SERVER: u16 = 0x1201;
/// Scene Server.
pub const SCENE_SERVER: u16 = 0x1203;
/// Scene Setup Server.
pub const SCENE_SETUP_SERVER: u16 = 0x1204;
/// Scheduler Server.
pub const SCHEDULER_SERVER: u16 = 0x1206;
/// Scheduler Setup Server.
pub const SCHEDULER_SETUP_SERVER: u16 = 0x1207;

/// Light Lightness Server.
pub const LIGHT_LIGHTNESS_SERVER: u16 = 0x1300;
/// Light Lightness Setup Server.
pub const LIGHT_LIGHTNESS_SETUP_SERVER: u16 = 0x1301;
/// Light Lightness Client.
pub const LIGHT_LIGHTNESS_CLIENT: u16 = 0x1302;
/// Light CTL Server.
pub const LIGHT_CTL_SERVER: u16 = 0x1303;
/// Light CTL Setup Server.
pub const LIGHT_CTL_SETUP_SERVER: u16 = 0x1304;
/// Light CTL Client.
pub const LIGHT_CTL_CLIENT: u16 = 0x1305;
/// Light CTL Temperature Server.
pub const LIGHT_CTL_TEMPERATURE_SERVER: u16 = 0x1306;
/// Light HSL Server.
pub const LIGHT_HSL_SERVER: u16 = 0x1307;
/// Light HSL Setup Server.
pub const LIGHT_HSL_SETUP_SERVER: u16 = 0x1308;
/// Light HSL Client.
pub const LIGHT_HSL_CLIENT: u16 = 0x1309;
/// Light HSL Hue Server.
pub const LIGHT_HSL_HUE_SERVER: u16 = 0x130A;
/// Light HSL Saturation Server.
pub const LIGHT_HSL_SATURATION_SERVER: u16 = 0x130B;
/// Light LC Server.
pub const LIGHT_LC_SERVER: u16 = 0x130F;
/// Light LC Setup Server.
pub const LIGHT_LC_SETUP_SERVER: u16 = 0x1310;
/// Light LC Client.
pub const LIGHT_LC_CLIENT: u16 = 0x1311;

/// Role a model plays from the configuration engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    /// Foundation model secured with the device key; never bound or exposed.
    Core,
    /// Server model (including setup servers).
    Server,
    /// Client model.
    Client,
}

/// Classification of a single model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelClass {
    /// Model role.
    pub role: ModelRole,
    /// Subscribe to the node's group (and ancestors) after provisioning.
    pub default_subscription: bool,
    /// Publish to the node's group (or all-nodes) after provisioning.
    pub default_publication: bool,
    /// Setup-variant model that mirrors this model's subscriptions.
    pub setup_variant: Option<u16>,
}

impl ModelClass {
    const fn new(role: ModelRole, sub: bool, publ: bool, setup: Option<u16>) -> Self {
        Self {
            role,
            default_subscription: sub,
            default_publication: publ,
            setup_variant: setup,
        }
    }

    /// Whether the model needs an application key binding.
    pub fn needs_app_binding(&self) -> bool {
        self.role != ModelRole::Core
    }

    /// Whether the model is excluded from user configuration.
    pub fn is_core(&self) -> bool {
        self.role == ModelRole::Core
    }
}

use ModelRole::{Client, Core, Server};

/// (model id, classification), sorted by model id.
static SIG_MODEL_TABLE: &[(u16, ModelClass)] = &[
    (CONFIG_SERVER, ModelClass::new(Core, false, false, None)),
    (CONFIG_CLIENT, ModelClass::new(Core, false, false, None)),
    (HEALTH_SERVER, ModelClass::new(Server, false, false, None)),
    (HEALTH_CLIENT, ModelClass::new(Client, false, false, None)),
    (REMOTE_PROVISIONING_SERVER, ModelClass::new(Core, false, false, None)),
    (REMOTE_PROVISIONING_CLIENT, ModelClass::new(Core, false, false, None)),
    (SAR_CONFIG_SERVER, ModelClass::new(Core, false, false, None)),
    (SAR_CONFIG_CLIENT, ModelClass::new(Core, false, false, None)),
    (GENERIC_ONOFF_SERVER, ModelClass::new(Server, true, true, None)),
    (GENERIC_ONOFF_CLIENT, ModelClass::new(Client, false, true, None)),
    (GENERIC_LEVEL_SERVER, ModelClass::new(Server, true, true, None)),
    (GENERIC_LEVEL_CLIENT, ModelClass::new(Client, false, true, None)),
    (GENERIC_DEFTT_SERVER, ModelClass::new(Server, true, false, None)),
    (GENERIC_DEFTT_CLIENT, ModelClass::new(Client, false, false, None)),
    (
        GENERIC_POWER_ONOFF_SERVER,
        ModelClass::new(Server, true, true, Some(GENERIC_POWER_ONOFF_SETUP_SERVER)),
    ),
    (GENERIC_POWER_ONOFF_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (GENERIC_POWER_ONOFF_CLIENT, ModelClass::new(Client, false, true, None)),
    (
        GENERIC_POWER_LEVEL_SERVER,
        ModelClass::new(Server, true, true, Some(GENERIC_POWER_LEVEL_SETUP_SERVER)),
    ),
    (GENERIC_POWER_LEVEL_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (GENERIC_POWER_LEVEL_CLIENT, ModelClass::new(Client, false, true, None)),
    (GENERIC_BATTERY_SERVER, ModelClass::new(Server, false, true, None)),
    (GENERIC_BATTERY_CLIENT, ModelClass::new(Client, false, false, None)),
    (
        GENERIC_LOCATION_SERVER,
        ModelClass::new(Server, true, true, Some(GENERIC_LOCATION_SETUP_SERVER)),
    ),
    (GENERIC_LOCATION_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (GENERIC_LOCATION_CLIENT, ModelClass::new(Client, false, false, None)),
    (
        SENSOR_SERVER,
        ModelClass::new(Server, false, true, Some(SENSOR_SETUP_SERVER)),
    ),
    (SENSOR_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (SENSOR_CLIENT, ModelClass::new(Client, true, false, None)),
    (TIME_SERVER, ModelClass::new(Server, true, false, Some(TIME_SETUP_SERVER))),
    (TIME_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (SCENE_SERVER, ModelClass::new(Server, true, false, Some(SCENE_SETUP_SERVER))),
    (SCENE_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (
        SCHEDULER_SERVER,
        ModelClass::new(Server, true, false, Some(SCHEDULER_SETUP_SERVER)),
    ),
    (SCHEDULER_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (
        LIGHT_LIGHTNESS_SERVER,
        ModelClass::new(Server, true, true, Some(LIGHT_LIGHTNESS_SETUP_SERVER)),
    ),
    (LIGHT_LIGHTNESS_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (LIGHT_LIGHTNESS_CLIENT, ModelClass::new(Client, false, true, None)),
    (
        LIGHT_CTL_SERVER,
        ModelClass::new(Server, true, true, Some(LIGHT_CTL_SETUP_SERVER)),
    ),
    (LIGHT_CTL_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (LIGHT_CTL_CLIENT, ModelClass::new(Client, false, true, None)),
    (LIGHT_CTL_TEMPERATURE_SERVER, ModelClass::new(Server, true, false, None)),
    (
        LIGHT_HSL_SERVER,
        ModelClass::new(Server, true, true, Some(LIGHT_HSL_SETUP_SERVER)),
    ),
    (LIGHT_HSL_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (LIGHT_HSL_CLIENT, ModelClass::new(Client, false, true, None)),
    (LIGHT_HSL_HUE_SERVER, ModelClass::new(Server, true, false, None)),
    (LIGHT_HSL_SATURATION_SERVER, ModelClass::new(Server, true, false, None)),
    (
        LIGHT_LC_SERVER,
        ModelClass::new(Server, true, true, Some(LIGHT_LC_SETUP_SERVER)),
    ),
    (LIGHT_LC_SETUP_SERVER, ModelClass::new(Server, false, false, None)),
    (LIGHT_LC_CLIENT, ModelClass::new(Client, false, true, None)),
];

/// Classification for SIG models missing from the table.
const UNKNOWN_SIG: ModelClass = ModelClass::new(Server, false, false, None);

/// Classification for vendor models.
const VENDOR: ModelClass = ModelClass::new(Server, true, true, None);

/// Look up the classification of a model.
pub fn classify(model: ModelId) -> ModelClass {
    match model {
        ModelId::Sig(id) => SIG_MODEL_TABLE
            .binary_search_by_key(&id, |(k, _)| *k)
            .map(|idx| SIG_MODEL_TABLE[idx].1)
            .unwrap_or(UNKNOWN_SIG),
        ModelId::Vendor { .. } => VENDOR,
    }
}

/// Whether a model is a foundation model excluded from user configuration.
pub fn is_core_model(model: ModelId) -> bool {
    classify(model).is_core()
}

/// Human-readable device type derived from the primary element's models.
///
/// Used when generating default element names.
pub fn device_type_name(models: &[ModelId]) -> &'static str {
    let has = |id: u16| models.contains(&ModelId::Sig(id));
    if has(LIGHT_HSL_SERVER) {
        "Light HSL"
    } else if has(LIGHT_CTL_SERVER) {
        "Light CTL"
    } else if has(LIGHT_LIGHTNESS_SERVER) {
        "Dimmable Light"
    } else if has(SENSOR_SERVER) {
        "Sensor"
    } else if has(GENERIC_LEVEL_SERVER) {
        "Level Device"
    } else if has(GENERIC_ONOFF_SERVER) {
        "Switchable Device"
    } else if has(GENERIC_ONOFF_CLIENT) || has(GENERIC_LEVEL_CLIENT) {
        "Switch"
    } else if models.iter().any(|m| m.is_vendor()) {
        "Vendor Device"
    } else {
        "Device"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted() {
        let ids: Vec<u16> = SIG_MODEL_TABLE.iter().map(|(id, _)| *id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_core_models_not_bound() {
        assert!(is_core_model(ModelId::Sig(CONFIG_SERVER)));
        assert!(!classify(ModelId::Sig(CONFIG_SERVER)).needs_app_binding());
        assert!(classify(ModelId::Sig(HEALTH_SERVER)).needs_app_binding());
    }

    #[test]
    fn test_lightness_server_has_setup_variant() {
        let class = classify(ModelId::Sig(LIGHT_LIGHTNESS_SERVER));
        assert!(class.default_subscription);
        assert!(class.default_publication);
        assert_eq!(class.setup_variant, Some(LIGHT_LIGHTNESS_SETUP_SERVER));
    }

    #[test]
    fn test_vendor_models_default_pub_sub() {
        let class = classify(ModelId::Vendor {
            company: 0x0131,
            model: 0x0001,
        });
        assert!(class.default_subscription && class.default_publication);
    }

    #[test]
    fn test_device_type_name() {
        let models = [ModelId::Sig(GENERIC_ONOFF_SERVER), ModelId::Sig(LIGHT_LIGHTNESS_SERVER)];
        assert_eq!(device_type_name(&models), "Dimmable Light");
        assert_eq!(device_type_name(&[]), "Device");
    }
}
