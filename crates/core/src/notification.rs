//! Notifications delivered to the application.

use meshctl_messages::ModelStatus;
use meshctl_types::{Address, DeviceUuid, KeyRefreshPhase, ModelId, NetKeyIndex};

/// Progress of a provisioning attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionState {
    /// Opening the provisioning link.
    Connecting,
    /// Handshake in progress.
    Provisioning,
    /// Provisioned; configuring the node.
    Configuring { unicast: Address },
    /// Provisioned and configured.
    Success { unicast: Address },
    /// Attempt failed or was aborted.
    Failed { reason: String },
}

/// Reachability of a specific node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeConnectState {
    /// Proxy connection to the node established.
    Connected,
    /// Node did not answer; its pending operations were dropped.
    UnreachableWarning,
    /// Node could not be reached at all.
    UnreachableError,
}

/// Element summary in component info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    pub name: String,
    pub address: Address,
    pub models: Vec<ModelId>,
}

/// Stored composition of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub name: String,
    pub uuid: DeviceUuid,
    pub company_id: u16,
    pub product_id: u16,
    pub version_id: u16,
    pub elements: Vec<ElementInfo>,
}

/// A notification for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Provisioning progress.
    ProvisionStatus {
        uuid: DeviceUuid,
        state: ProvisionState,
    },

    /// Network proxy connection changed.
    ConnectStatus {
        connected: bool,
        proxy: Option<Address>,
    },

    /// Reachability of a specific node.
    NodeConnectStatus {
        name: String,
        address: Address,
        state: NodeConnectState,
    },

    /// The network database was modified and persisted.
    DatabaseChanged,

    /// Network open finished.
    NetworkOpened { success: bool },

    /// An unprovisioned device was heard (or heard with a better signal).
    UnprovisionedDevice {
        uuid: DeviceUuid,
        rssi: i8,
        scanner: Address,
    },

    /// Reconfiguration of a node (or of every node for a network-wide change)
    /// finished.
    ConfigComplete {
        target: Option<Address>,
        success: bool,
    },

    /// Key refresh halted because nodes did not take the new key.
    KeyRefreshStalled {
        net_key: NetKeyIndex,
        phase: KeyRefreshPhase,
        lagging: Vec<Address>,
    },

    /// Key refresh cycle finished; old key material revoked.
    KeyRefreshComplete { net_key: NetKeyIndex },

    /// Application model state reported by an element.
    ModelState { src: Address, status: ModelStatus },

    /// Stored composition of a node.
    ComponentInfo(ComponentInfo),
}

impl Notification {
    /// Get a human-readable name for this notification.
    pub fn type_name(&self) -> &'static str {
        match self {
            Notification::ProvisionStatus { .. } => "ProvisionStatus",
            Notification::ConnectStatus { .. } => "ConnectStatus",
            Notification::NodeConnectStatus { .. } => "NodeConnectStatus",
            Notification::DatabaseChanged => "DatabaseChanged",
            Notification::NetworkOpened { .. } => "NetworkOpened",
            Notification::UnprovisionedDevice { .. } => "UnprovisionedDevice",
            Notification::ConfigComplete { .. } => "ConfigComplete",
            Notification::KeyRefreshStalled { .. } => "KeyRefreshStalled",
            Notification::KeyRefreshComplete { .. } => "KeyRefreshComplete",
            Notification::ModelState { .. } => "ModelState",
            Notification::ComponentInfo(_) => "ComponentInfo",
        }
    }
}
