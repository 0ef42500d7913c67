//! Composition data fixtures.

use meshctl_types::models::*;
use meshctl_types::{CompositionData, ElementComposition, Features, ModelId};

fn sig(ids: &[u16]) -> Vec<ModelId> {
    ids.iter().map(|id| ModelId::Sig(*id)).collect()
}

fn device(features: Features, elements: Vec<Vec<ModelId>>) -> CompositionData {
    CompositionData {
        company_id: 0x05F1,
        product_id: 0x0001,
        version_id: 0x0001,
        replay_cache: 32,
        features,
        elements: elements
            .into_iter()
            .map(|models| ElementComposition {
                location: 0x0100,
                models,
            })
            .collect(),
    }
}

/// The local provisioner: configuration and generic clients.
pub fn provisioner_composition() -> CompositionData {
    device(
        Features::default(),
        vec![sig(&[
            CONFIG_SERVER,
            CONFIG_CLIENT,
            HEALTH_SERVER,
            GENERIC_ONOFF_CLIENT,
            LIGHT_LIGHTNESS_CLIENT,
        ])],
    )
}

/// Dimmable lamp with proxy support and a setup server.
pub fn lamp_composition() -> CompositionData {
    device(
        Features::from_bits(0x0002),
        vec![sig(&[
            CONFIG_SERVER,
            HEALTH_SERVER,
            GENERIC_ONOFF_SERVER,
            LIGHT_LIGHTNESS_SERVER,
            LIGHT_LIGHTNESS_SETUP_SERVER,
        ])],
    )
}

/// Two-element lamp that also relays.
pub fn relay_lamp_composition() -> CompositionData {
    device(
        Features::from_bits(0x0003),
        vec![
            sig(&[CONFIG_SERVER, HEALTH_SERVER, GENERIC_ONOFF_SERVER]),
            sig(&[GENERIC_ONOFF_SERVER, GENERIC_LEVEL_SERVER]),
        ],
    )
}

/// Sensor with a setup server and remote provisioning.
pub fn sensor_composition() -> CompositionData {
    device(
        Features::default(),
        vec![sig(&[
            CONFIG_SERVER,
            HEALTH_SERVER,
            REMOTE_PROVISIONING_SERVER,
            SENSOR_SERVER,
            SENSOR_SETUP_SERVER,
        ])],
    )
}

/// Battery switch: clients only.
pub fn switch_composition() -> CompositionData {
    device(
        Features::from_bits(0x0008),
        vec![sig(&[CONFIG_SERVER, GENERIC_ONOFF_CLIENT, GENERIC_LEVEL_CLIENT])],
    )
}

/// Device with a single vendor model next to the foundation models.
pub fn vendor_composition() -> CompositionData {
    let mut models = sig(&[CONFIG_SERVER, HEALTH_SERVER]);
    models.push(ModelId::Vendor {
        company: 0x0059,
        model: 0x0001,
    });
    device(Features::default(), vec![models])
}
