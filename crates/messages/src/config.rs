//! Configuration client requests.
//!
//! Every request here is secured with the destination node's device key.

use crate::opcodes::config as op;
use meshctl_types::{
    Address, AppKeyIndex, Key128, ModelId, NetKeyIndex, Publication, Retransmit,
};

/// A request to a node's Configuration Server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRequest {
    /// Read a page of composition data.
    CompositionDataGet { page: u8 },

    /// Add a network key.
    NetKeyAdd { index: NetKeyIndex, key: Key128 },

    /// Distribute new key material for a network key (key refresh phase 1).
    NetKeyUpdate { index: NetKeyIndex, key: Key128 },

    /// Add an application key.
    AppKeyAdd {
        net_index: NetKeyIndex,
        app_index: AppKeyIndex,
        key: Key128,
    },

    /// Distribute new key material for an application key.
    AppKeyUpdate {
        net_index: NetKeyIndex,
        app_index: AppKeyIndex,
        key: Key128,
    },

    /// Bind an application key to a model.
    ModelAppBind {
        element: Address,
        app_index: AppKeyIndex,
        model: ModelId,
    },

    /// Add a subscription address to a model.
    ModelSubscriptionAdd {
        element: Address,
        address: Address,
        model: ModelId,
    },

    /// Remove a subscription address from a model.
    ModelSubscriptionDelete {
        element: Address,
        address: Address,
        model: ModelId,
    },

    /// Clear a model's subscription list.
    ModelSubscriptionDeleteAll { element: Address, model: ModelId },

    /// Set a model's publication.
    ModelPublicationSet {
        element: Address,
        model: ModelId,
        publication: Publication,
    },

    /// Set network transmit parameters.
    NetworkTransmitSet(Retransmit),

    /// Set the default TTL.
    DefaultTtlSet(u8),

    /// Set the relay state.
    RelaySet { enabled: bool, retransmit: Retransmit },

    /// Set the GATT proxy state.
    GattProxySet(bool),

    /// Set the friend state.
    FriendSet(bool),

    /// Set the secure network beacon state.
    BeaconSet(bool),

    /// Drive a network key to a key refresh phase.
    KeyRefreshPhaseSet { net_index: NetKeyIndex, transition: u8 },

    /// Factory-reset the node.
    NodeReset,
}

impl ConfigRequest {
    /// On-air opcode.
    pub fn opcode(&self) -> u32 {
        match self {
            ConfigRequest::CompositionDataGet { .. } => op::COMPOSITION_DATA_GET,
            ConfigRequest::NetKeyAdd { .. } => op::NETKEY_ADD,
            ConfigRequest::NetKeyUpdate { .. } => op::NETKEY_UPDATE,
            ConfigRequest::AppKeyAdd { .. } => op::APPKEY_ADD,
            ConfigRequest::AppKeyUpdate { .. } => op::APPKEY_UPDATE,
            ConfigRequest::ModelAppBind { .. } => op::MODEL_APP_BIND,
            ConfigRequest::ModelSubscriptionAdd { .. } => op::MODEL_SUBSCRIPTION_ADD,
            ConfigRequest::ModelSubscriptionDelete { .. } => op::MODEL_SUBSCRIPTION_DELETE,
            ConfigRequest::ModelSubscriptionDeleteAll { .. } => op::MODEL_SUBSCRIPTION_DELETE_ALL,
            ConfigRequest::ModelPublicationSet { .. } => op::MODEL_PUBLICATION_SET,
            ConfigRequest::NetworkTransmitSet(_) => op::NETWORK_TRANSMIT_SET,
            ConfigRequest::DefaultTtlSet(_) => op::DEFAULT_TTL_SET,
            ConfigRequest::RelaySet { .. } => op::RELAY_SET,
            ConfigRequest::GattProxySet(_) => op::GATT_PROXY_SET,
            ConfigRequest::FriendSet(_) => op::FRIEND_SET,
            ConfigRequest::BeaconSet(_) => op::BEACON_SET,
            ConfigRequest::KeyRefreshPhaseSet { .. } => op::KEY_REFRESH_PHASE_SET,
            ConfigRequest::NodeReset => op::NODE_RESET,
        }
    }

    /// Human-readable name for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigRequest::CompositionDataGet { .. } => "CompositionDataGet",
            ConfigRequest::NetKeyAdd { .. } => "NetKeyAdd",
            ConfigRequest::NetKeyUpdate { .. } => "NetKeyUpdate",
            ConfigRequest::AppKeyAdd { .. } => "AppKeyAdd",
            ConfigRequest::AppKeyUpdate { .. } => "AppKeyUpdate",
            ConfigRequest::ModelAppBind { .. } => "ModelAppBind",
            ConfigRequest::ModelSubscriptionAdd { .. } => "ModelSubscriptionAdd",
            ConfigRequest::ModelSubscriptionDelete { .. } => "ModelSubscriptionDelete",
            ConfigRequest::ModelSubscriptionDeleteAll { .. } => "ModelSubscriptionDeleteAll",
            ConfigRequest::ModelPublicationSet { .. } => "ModelPublicationSet",
            ConfigRequest::NetworkTransmitSet(_) => "NetworkTransmitSet",
            ConfigRequest::DefaultTtlSet(_) => "DefaultTtlSet",
            ConfigRequest::RelaySet { .. } => "RelaySet",
            ConfigRequest::GattProxySet(_) => "GattProxySet",
            ConfigRequest::FriendSet(_) => "FriendSet",
            ConfigRequest::BeaconSet(_) => "BeaconSet",
            ConfigRequest::KeyRefreshPhaseSet { .. } => "KeyRefreshPhaseSet",
            ConfigRequest::NodeReset => "NodeReset",
        }
    }
}

/// Proxy filter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Forward only listed destinations.
    Accept,
    /// Forward everything except listed destinations.
    Reject,
}

/// A proxy configuration message to the connected GATT proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyFilterRequest {
    /// Select the filter type; clears the list.
    SetFilterType(FilterType),
    /// Add destination addresses to the filter.
    AddAddresses(Vec<Address>),
    /// Remove destination addresses from the filter.
    RemoveAddresses(Vec<Address>),
}

impl ProxyFilterRequest {
    /// On-air opcode.
    pub fn opcode(&self) -> u8 {
        use crate::opcodes::proxy;
        match self {
            ProxyFilterRequest::SetFilterType(_) => proxy::SET_FILTER_TYPE,
            ProxyFilterRequest::AddAddresses(_) => proxy::ADD_ADDRESSES,
            ProxyFilterRequest::RemoveAddresses(_) => proxy::REMOVE_ADDRESSES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcodes() {
        assert_eq!(ConfigRequest::NodeReset.opcode(), 0x8049);
        let req = ConfigRequest::AppKeyAdd {
            net_index: NetKeyIndex::PRIMARY,
            app_index: AppKeyIndex(0),
            key: Key128::from_bytes([0; 16]),
        };
        assert_eq!(req.opcode(), 0x00);
        assert_eq!(req.type_name(), "AppKeyAdd");
        assert_eq!(
            ProxyFilterRequest::AddAddresses(vec![Address(0xC000)]).opcode(),
            0x01
        );
    }
}
