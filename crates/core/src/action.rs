//! Outbound actions.

use crate::{Notification, OutboundMessage, RequestId, SecurityKey, TimerId};
use meshctl_messages::{AuthMethod, ProvisionBearer, ProvisioningData};
use meshctl_types::{Address, DeviceUuid, Key128, MeshDb, NetKeyIndex};
use std::time::Duration;

/// What to connect to over GATT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget {
    /// Any proxy advertising the network id of this key.
    NetworkId(NetKeyIndex),
    /// The proxy advertising node identity for this node.
    NodeIdentity(Address),
}

/// Work for the runner. The client never performs I/O itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Messages
    // ═══════════════════════════════════════════════════════════════════════
    /// Send a mesh message.
    Send {
        request_id: RequestId,
        dst: Address,
        key: SecurityKey,
        /// A status reply is expected.
        reply: bool,
        message: OutboundMessage,
    },

    /// Install a node's device key in the local core.
    SetDevKey {
        request_id: RequestId,
        unicast: Address,
        element_count: u8,
        key: Key128,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Proxy link
    // ═══════════════════════════════════════════════════════════════════════
    /// Open a proxy connection.
    Connect(ConnectTarget),

    /// Close the proxy connection.
    Disconnect,

    // ═══════════════════════════════════════════════════════════════════════
    // Provisioning
    // ═══════════════════════════════════════════════════════════════════════
    /// Open a provisioning link to an unprovisioned device.
    ProvisionConnect {
        uuid: DeviceUuid,
        bearer: ProvisionBearer,
        /// Provisioner that heard the device (local or remote).
        scanner: Address,
        /// Attention duration in seconds for the invite.
        identify_duration: u8,
    },

    /// Start the handshake.
    ProvisionStart {
        auth: AuthMethod,
        data: ProvisioningData,
    },

    /// Answer a static OOB request.
    ProvisionSetOob(Vec<u8>),

    /// Close the provisioning link.
    ProvisionClose,

    /// Start scanning for unprovisioned devices on a scanner.
    ScanStart { scanner: Address },

    /// Stop scanning on a scanner.
    ScanStop { scanner: Address },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Arm (or re-arm) a timer.
    SetTimer { id: TimerId, duration: Duration },

    /// Disarm a timer.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Persistence and application
    // ═══════════════════════════════════════════════════════════════════════
    /// Store the network database.
    PersistDatabase(Box<MeshDb>),

    /// Store the replay-protection list (encoded records).
    PersistReplayList(Vec<u8>),

    /// Deliver a notification to the application.
    Notify(Notification),
}

impl Action {
    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Send { .. } => "Send",
            Action::SetDevKey { .. } => "SetDevKey",
            Action::Connect(_) => "Connect",
            Action::Disconnect => "Disconnect",
            Action::ProvisionConnect { .. } => "ProvisionConnect",
            Action::ProvisionStart { .. } => "ProvisionStart",
            Action::ProvisionSetOob(_) => "ProvisionSetOob",
            Action::ProvisionClose => "ProvisionClose",
            Action::ScanStart { .. } => "ScanStart",
            Action::ScanStop { .. } => "ScanStop",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::PersistDatabase(_) => "PersistDatabase",
            Action::PersistReplayList(_) => "PersistReplayList",
            Action::Notify(_) => "Notify",
        }
    }
}
