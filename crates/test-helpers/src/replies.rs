//! Canned Configuration Server replies.

use meshctl_messages::{encode_composition, ConfigRequest, ConfigStatus, FeatureState, StatusCode};
use meshctl_types::{CompositionData, KeyRefreshPhase};

/// Reply of a node that accepts `request`.
///
/// Composition reads need the node's composition; use [`composition_reply`].
pub fn success_reply(request: &ConfigRequest) -> ConfigStatus {
    let ok = StatusCode::SUCCESS;
    match request {
        ConfigRequest::CompositionDataGet { page } => ConfigStatus::CompositionData {
            page: *page,
            data: Vec::new(),
        },
        ConfigRequest::NetKeyAdd { index, .. } | ConfigRequest::NetKeyUpdate { index, .. } => {
            ConfigStatus::NetKey {
                status: ok,
                index: *index,
            }
        }
        ConfigRequest::AppKeyAdd {
            net_index,
            app_index,
            ..
        }
        | ConfigRequest::AppKeyUpdate {
            net_index,
            app_index,
            ..
        } => ConfigStatus::AppKey {
            status: ok,
            net_index: *net_index,
            app_index: *app_index,
        },
        ConfigRequest::ModelAppBind {
            element,
            app_index,
            model,
        } => ConfigStatus::ModelApp {
            status: ok,
            element: *element,
            app_index: *app_index,
            model: *model,
        },
        ConfigRequest::ModelSubscriptionAdd {
            element,
            address,
            model,
        }
        | ConfigRequest::ModelSubscriptionDelete {
            element,
            address,
            model,
        } => ConfigStatus::ModelSubscription {
            status: ok,
            element: *element,
            address: *address,
            model: *model,
        },
        ConfigRequest::ModelSubscriptionDeleteAll { element, model } => {
            ConfigStatus::ModelSubscription {
                status: ok,
                element: *element,
                address: meshctl_types::Address::UNASSIGNED,
                model: *model,
            }
        }
        ConfigRequest::ModelPublicationSet {
            element,
            model,
            publication,
        } => ConfigStatus::ModelPublication {
            status: ok,
            element: *element,
            model: *model,
            publication: Some(*publication),
        },
        ConfigRequest::NetworkTransmitSet(retransmit) => ConfigStatus::NetworkTransmit(*retransmit),
        ConfigRequest::DefaultTtlSet(ttl) => ConfigStatus::DefaultTtl(*ttl),
        ConfigRequest::RelaySet {
            enabled,
            retransmit,
        } => ConfigStatus::Relay {
            state: feature(*enabled),
            retransmit: *retransmit,
        },
        ConfigRequest::GattProxySet(on) => ConfigStatus::GattProxy(feature(*on)),
        ConfigRequest::FriendSet(on) => ConfigStatus::Friend(feature(*on)),
        ConfigRequest::BeaconSet(on) => ConfigStatus::Beacon(*on),
        ConfigRequest::KeyRefreshPhaseSet {
            net_index,
            transition,
        } => ConfigStatus::KeyRefreshPhase {
            status: ok,
            net_index: *net_index,
            phase: if *transition == 2 {
                KeyRefreshPhase::Second
            } else {
                KeyRefreshPhase::Normal
            },
        },
        ConfigRequest::NodeReset => ConfigStatus::NodeReset,
    }
}

/// Composition data page 0 reply.
pub fn composition_reply(composition: &CompositionData) -> ConfigStatus {
    ConfigStatus::CompositionData {
        page: 0,
        data: encode_composition(composition),
    }
}

fn feature(enabled: bool) -> FeatureState {
    if enabled {
        FeatureState::Enabled
    } else {
        FeatureState::Disabled
    }
}
