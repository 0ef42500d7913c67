//! Configuration Server status replies.

use crate::config::FilterType;
use meshctl_types::{
    Address, AppKeyIndex, KeyRefreshPhase, ModelId, NetKeyIndex, Publication, Retransmit,
};
use std::fmt;

/// Status code carried by configuration replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(pub u8);

impl StatusCode {
    pub const SUCCESS: Self = StatusCode(0x00);
    pub const INVALID_ADDRESS: Self = StatusCode(0x01);
    pub const INVALID_MODEL: Self = StatusCode(0x02);
    pub const INVALID_APPKEY_INDEX: Self = StatusCode(0x03);
    pub const INVALID_NETKEY_INDEX: Self = StatusCode(0x04);
    pub const INSUFFICIENT_RESOURCES: Self = StatusCode(0x05);
    pub const KEY_INDEX_ALREADY_STORED: Self = StatusCode(0x06);
    pub const INVALID_PUBLISH_PARAMETERS: Self = StatusCode(0x07);
    pub const NOT_A_SUBSCRIBE_MODEL: Self = StatusCode(0x08);
    pub const STORAGE_FAILURE: Self = StatusCode(0x09);
    pub const FEATURE_NOT_SUPPORTED: Self = StatusCode(0x0A);
    pub const CANNOT_UPDATE: Self = StatusCode(0x0B);
    pub const CANNOT_REMOVE: Self = StatusCode(0x0C);
    pub const CANNOT_BIND: Self = StatusCode(0x0D);
    pub const TEMPORARILY_UNABLE: Self = StatusCode(0x0E);
    pub const CANNOT_SET: Self = StatusCode(0x0F);
    pub const UNSPECIFIED_ERROR: Self = StatusCode(0x10);
    pub const INVALID_BINDING: Self = StatusCode(0x11);

    /// Whether the request was applied.
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Name of the status code.
    pub fn name(self) -> &'static str {
        match self.0 {
            0x00 => "Success",
            0x01 => "InvalidAddress",
            0x02 => "InvalidModel",
            0x03 => "InvalidAppKeyIndex",
            0x04 => "InvalidNetKeyIndex",
            0x05 => "InsufficientResources",
            0x06 => "KeyIndexAlreadyStored",
            0x07 => "InvalidPublishParameters",
            0x08 => "NotASubscribeModel",
            0x09 => "StorageFailure",
            0x0A => "FeatureNotSupported",
            0x0B => "CannotUpdate",
            0x0C => "CannotRemove",
            0x0D => "CannotBind",
            0x0E => "TemporarilyUnable",
            0x0F => "CannotSet",
            0x10 => "UnspecifiedError",
            0x11 => "InvalidBinding",
            _ => "Reserved",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02x})", self.name(), self.0)
    }
}

/// Tri-state feature value reported by relay/proxy/friend status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureState {
    Disabled,
    Enabled,
    NotSupported,
}

impl FeatureState {
    /// Decode the on-air value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => FeatureState::Disabled,
            1 => FeatureState::Enabled,
            _ => FeatureState::NotSupported,
        }
    }

    /// Whether the feature is on.
    pub fn is_enabled(self) -> bool {
        self == FeatureState::Enabled
    }
}

/// A reply from a node's Configuration Server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigStatus {
    /// Composition data page, raw. Parse with [`crate::parse_composition`].
    CompositionData { page: u8, data: Vec<u8> },

    NetKey {
        status: StatusCode,
        index: NetKeyIndex,
    },

    AppKey {
        status: StatusCode,
        net_index: NetKeyIndex,
        app_index: AppKeyIndex,
    },

    ModelApp {
        status: StatusCode,
        element: Address,
        app_index: AppKeyIndex,
        model: ModelId,
    },

    ModelSubscription {
        status: StatusCode,
        element: Address,
        address: Address,
        model: ModelId,
    },

    ModelPublication {
        status: StatusCode,
        element: Address,
        model: ModelId,
        publication: Option<Publication>,
    },

    NetworkTransmit(Retransmit),

    DefaultTtl(u8),

    Relay {
        state: FeatureState,
        retransmit: Retransmit,
    },

    GattProxy(FeatureState),

    Friend(FeatureState),

    Beacon(bool),

    KeyRefreshPhase {
        status: StatusCode,
        net_index: NetKeyIndex,
        phase: KeyRefreshPhase,
    },

    NodeReset,
}

impl ConfigStatus {
    /// Status code of the reply. Replies without one are always successful.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ConfigStatus::NetKey { status, .. }
            | ConfigStatus::AppKey { status, .. }
            | ConfigStatus::ModelApp { status, .. }
            | ConfigStatus::ModelSubscription { status, .. }
            | ConfigStatus::ModelPublication { status, .. }
            | ConfigStatus::KeyRefreshPhase { status, .. } => *status,
            _ => StatusCode::SUCCESS,
        }
    }

    /// Human-readable name for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigStatus::CompositionData { .. } => "CompositionDataStatus",
            ConfigStatus::NetKey { .. } => "NetKeyStatus",
            ConfigStatus::AppKey { .. } => "AppKeyStatus",
            ConfigStatus::ModelApp { .. } => "ModelAppStatus",
            ConfigStatus::ModelSubscription { .. } => "ModelSubscriptionStatus",
            ConfigStatus::ModelPublication { .. } => "ModelPublicationStatus",
            ConfigStatus::NetworkTransmit(_) => "NetworkTransmitStatus",
            ConfigStatus::DefaultTtl(_) => "DefaultTtlStatus",
            ConfigStatus::Relay { .. } => "RelayStatus",
            ConfigStatus::GattProxy(_) => "GattProxyStatus",
            ConfigStatus::Friend(_) => "FriendStatus",
            ConfigStatus::Beacon(_) => "BeaconStatus",
            ConfigStatus::KeyRefreshPhase { .. } => "KeyRefreshPhaseStatus",
            ConfigStatus::NodeReset => "NodeResetStatus",
        }
    }
}

/// Proxy filter status from the connected proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStatus {
    pub filter_type: FilterType,
    pub list_size: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_display() {
        assert!(StatusCode(0).is_success());
        assert!(!StatusCode::CANNOT_BIND.is_success());
        assert_eq!(StatusCode(0x06).to_string(), "KeyIndexAlreadyStored(0x06)");
        assert_eq!(StatusCode(0x42).name(), "Reserved");
    }

    #[test]
    fn test_statusless_replies_succeed() {
        assert!(ConfigStatus::DefaultTtl(5).status_code().is_success());
        let reply = ConfigStatus::NetKey {
            status: StatusCode::INVALID_NETKEY_INDEX,
            index: NetKeyIndex(3),
        };
        assert_eq!(reply.status_code(), StatusCode::INVALID_NETKEY_INDEX);
    }
}
