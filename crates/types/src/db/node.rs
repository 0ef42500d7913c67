//! Node, element and model records.

use super::keys::{NodeAppKey, NodeNetKey};
use crate::{
    Address, AppKeyIndex, CompositionData, DeviceUuid, Key128, KeyRefreshPhase, ModelId,
    NetKeyIndex,
};
use serde::{Deserialize, Serialize};

/// Transmit repetition parameters (network transmit, relay retransmit,
/// publication retransmit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Retransmit {
    /// Number of additional transmissions.
    pub count: u8,
    /// Interval between transmissions in milliseconds.
    pub interval_ms: u16,
}

impl Retransmit {
    /// Create retransmit parameters.
    pub fn new(count: u8, interval_ms: u16) -> Self {
        Self { count, interval_ms }
    }
}

/// Publication record of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    /// Destination address.
    pub address: Address,
    /// Application key used for publishing.
    pub app_key: AppKeyIndex,
    /// Publish TTL.
    pub ttl: u8,
    /// Publish period in milliseconds (0 = event driven only).
    pub period_ms: u32,
    /// Publish retransmission.
    pub retransmit: Retransmit,
    /// Publish with friendship credentials.
    pub friendship_credentials: bool,
}

/// A sensor property discovered on a Sensor Server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorProperty {
    /// Sensor property id.
    pub property_id: u16,
    /// Setting property ids reported by Sensor Settings Status.
    pub settings: Vec<u16>,
    /// Raw cadence state, once reported.
    pub cadence: Option<Vec<u8>>,
}

impl SensorProperty {
    /// A property with no settings or cadence known yet.
    pub fn new(property_id: u16) -> Self {
        Self {
            property_id,
            settings: Vec::new(),
            cadence: None,
        }
    }
}

/// A model instance on an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier.
    pub id: ModelId,
    /// Bound application keys.
    pub bound_app_keys: Vec<AppKeyIndex>,
    /// Subscription list.
    pub subscriptions: Vec<Address>,
    /// Publication, if configured.
    pub publication: Option<Publication>,
    /// Sensor properties (Sensor Server only).
    #[serde(default)]
    pub sensors: Vec<SensorProperty>,
}

impl Model {
    /// A freshly discovered, unconfigured model.
    pub fn new(id: ModelId) -> Self {
        Self {
            id,
            bound_app_keys: Vec::new(),
            subscriptions: Vec::new(),
            publication: None,
            sensors: Vec::new(),
        }
    }

    /// Whether the model is subscribed to an address.
    pub fn is_subscribed(&self, address: Address) -> bool {
        self.subscriptions.contains(&address)
    }

    /// Add a subscription if not already present.
    pub fn subscribe(&mut self, address: Address) {
        if !self.is_subscribed(address) {
            self.subscriptions.push(address);
        }
    }

    /// Remove a subscription.
    pub fn unsubscribe(&mut self, address: Address) {
        self.subscriptions.retain(|a| *a != address);
    }

    /// Record an application key binding.
    pub fn bind(&mut self, app_key: AppKeyIndex) {
        if !self.bound_app_keys.contains(&app_key) {
            self.bound_app_keys.push(app_key);
        }
    }
}

/// An element of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Index within the node (0 = primary).
    pub index: u8,
    /// Unicast address.
    pub address: Address,
    /// Display name, unique across the network.
    pub name: String,
    /// Location descriptor.
    pub location: u16,
    /// Models on this element.
    pub models: Vec<Model>,
}

impl Element {
    /// Find a model.
    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Find a model, mutably.
    pub fn model_mut(&mut self, id: ModelId) -> Option<&mut Model> {
        self.models.iter_mut().find(|m| m.id == id)
    }

    /// Whether the element carries a model.
    pub fn has_model(&self, id: ModelId) -> bool {
        self.model(id).is_some()
    }
}

/// Relay state and retransmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay enabled.
    pub enabled: bool,
    /// Relay retransmission.
    pub retransmit: Retransmit,
}

/// Foundation configuration state last confirmed by a node.
///
/// `None` means the value was never configured through this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeConfigState {
    /// Default TTL.
    pub default_ttl: Option<u8>,
    /// Network transmit parameters.
    pub net_transmit: Option<Retransmit>,
    /// Relay state.
    pub relay: Option<RelayConfig>,
    /// GATT proxy state.
    pub gatt_proxy: Option<bool>,
    /// Friend state.
    pub friend: Option<bool>,
    /// Secure network beacon state.
    pub beacon: Option<bool>,
}

/// A provisioned node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Device UUID.
    pub uuid: DeviceUuid,
    /// Display name.
    pub name: String,
    /// Primary element address.
    pub unicast: Address,
    /// Number of elements (and addresses) allocated to the node.
    pub element_count: u8,
    /// Device key.
    pub device_key: Key128,
    /// Elements with their models.
    pub elements: Vec<Element>,
    /// Network keys held by the node.
    pub net_keys: Vec<NodeNetKey>,
    /// Application keys held by the node.
    pub app_keys: Vec<NodeAppKey>,
    /// Group chosen at provisioning time.
    pub group: Option<Address>,
    /// Node is being evicted; excluded from key distribution.
    pub blocked: bool,
    /// Post-provisioning configuration finished.
    pub config_complete: bool,
    /// Foundation configuration state.
    pub config: NodeConfigState,
    /// Composition snapshot.
    pub composition: Option<CompositionData>,
}

impl Node {
    /// Create a node record right after provisioning.
    ///
    /// Elements get addresses but no models until composition data arrives.
    pub fn new(
        uuid: DeviceUuid,
        name: impl Into<String>,
        unicast: Address,
        element_count: u8,
        device_key: Key128,
        net_key: NodeNetKey,
    ) -> Self {
        let name = name.into();
        let elements = (0..element_count)
            .map(|i| Element {
                index: i,
                address: Address(unicast.0 + i as u16),
                name: if i == 0 {
                    name.clone()
                } else {
                    format!("{} #{}", name, i + 1)
                },
                location: 0,
                models: Vec::new(),
            })
            .collect();
        Self {
            uuid,
            name,
            unicast,
            element_count,
            device_key,
            elements,
            net_keys: vec![net_key],
            app_keys: Vec::new(),
            group: None,
            blocked: false,
            config_complete: false,
            config: NodeConfigState::default(),
            composition: None,
        }
    }

    /// Last address allocated to the node.
    pub fn last_address(&self) -> Address {
        Address(self.unicast.0 + (self.element_count.max(1) as u16) - 1)
    }

    /// Whether an address belongs to one of the node's elements.
    pub fn owns(&self, address: Address) -> bool {
        address >= self.unicast && address <= self.last_address()
    }

    /// Element at an address.
    pub fn element(&self, address: Address) -> Option<&Element> {
        self.elements.iter().find(|e| e.address == address)
    }

    /// Element at an address, mutably.
    pub fn element_mut(&mut self, address: Address) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.address == address)
    }

    /// This node's copy of a network key.
    pub fn net_key(&self, index: NetKeyIndex) -> Option<&NodeNetKey> {
        self.net_keys.iter().find(|k| k.index == index)
    }

    /// This node's copy of a network key, mutably.
    pub fn net_key_mut(&mut self, index: NetKeyIndex) -> Option<&mut NodeNetKey> {
        self.net_keys.iter_mut().find(|k| k.index == index)
    }

    /// This node's copy of an application key.
    pub fn app_key(&self, index: AppKeyIndex) -> Option<&NodeAppKey> {
        self.app_keys.iter().find(|k| k.index == index)
    }

    /// This node's copy of an application key, mutably.
    pub fn app_key_mut(&mut self, index: AppKeyIndex) -> Option<&mut NodeAppKey> {
        self.app_keys.iter_mut().find(|k| k.index == index)
    }

    /// Whether the node holds a network key.
    pub fn has_net_key(&self, index: NetKeyIndex) -> bool {
        self.net_key(index).is_some()
    }

    /// Record an application key as held, in the given phase.
    pub fn add_app_key(&mut self, index: AppKeyIndex, phase: KeyRefreshPhase) {
        match self.app_key_mut(index) {
            Some(existing) => existing.phase = phase,
            None => self.app_keys.push(NodeAppKey { index, phase }),
        }
    }

    /// Record a network key as held, in the given phase.
    pub fn add_net_key(&mut self, index: NetKeyIndex, phase: KeyRefreshPhase) {
        match self.net_key_mut(index) {
            Some(existing) => existing.phase = phase,
            None => self.net_keys.push(NodeNetKey { index, phase }),
        }
    }

    /// Iterate over every model with its element address.
    pub fn models(&self) -> impl Iterator<Item = (Address, &Model)> {
        self.elements
            .iter()
            .flat_map(|e| e.models.iter().map(move |m| (e.address, m)))
    }

    /// Whether the node supports a feature according to its composition.
    pub fn supports_proxy(&self) -> bool {
        self.composition
            .as_ref()
            .map(|c| c.features.proxy)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new(
            DeviceUuid::from_bytes([1; 16]),
            "lamp",
            Address(0x0010),
            3,
            Key128::from_bytes([9; 16]),
            NodeNetKey {
                index: NetKeyIndex::PRIMARY,
                phase: KeyRefreshPhase::Normal,
            },
        )
    }

    #[test]
    fn test_address_ownership() {
        let node = node();
        assert_eq!(node.last_address(), Address(0x0012));
        assert!(node.owns(Address(0x0010)));
        assert!(node.owns(Address(0x0012)));
        assert!(!node.owns(Address(0x0013)));
        assert!(!node.owns(Address(0x000F)));
    }

    #[test]
    fn test_element_names() {
        let node = node();
        assert_eq!(node.elements[0].name, "lamp");
        assert_eq!(node.elements[1].name, "lamp #2");
        assert_eq!(node.elements[2].address, Address(0x0012));
    }

    #[test]
    fn test_add_app_key_updates_phase() {
        let mut node = node();
        node.add_app_key(AppKeyIndex(0), KeyRefreshPhase::Normal);
        node.add_app_key(AppKeyIndex(0), KeyRefreshPhase::First);
        assert_eq!(node.app_keys.len(), 1);
        assert_eq!(node.app_keys[0].phase, KeyRefreshPhase::First);
    }
}
