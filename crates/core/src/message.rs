//! Outbound message types.

use meshctl_messages::{ConfigRequest, ModelRequest, ProxyFilterRequest};
use meshctl_types::AppKeyIndex;

/// Key a message is secured with at the access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityKey {
    /// Destination node's device key.
    Device,
    /// An application key.
    App(AppKeyIndex),
    /// Network layer only (proxy configuration).
    Network,
}

/// Outbound mesh messages.
///
/// The runner hands these to the transport, which encodes and encrypts them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    // ═══════════════════════════════════════════════════════════════════════
    // Configuration
    // ═══════════════════════════════════════════════════════════════════════
    /// Configuration Server request.
    Config(ConfigRequest),

    /// Proxy filter configuration for the connected proxy.
    ProxyFilter(ProxyFilterRequest),

    // ═══════════════════════════════════════════════════════════════════════
    // Application models
    // ═══════════════════════════════════════════════════════════════════════
    /// Application model request.
    Model(ModelRequest),
}

impl OutboundMessage {
    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Config(req) => req.type_name(),
            OutboundMessage::ProxyFilter(ProxyFilterRequest::SetFilterType(_)) => {
                "ProxyFilterSetType"
            }
            OutboundMessage::ProxyFilter(ProxyFilterRequest::AddAddresses(_)) => "ProxyFilterAdd",
            OutboundMessage::ProxyFilter(ProxyFilterRequest::RemoveAddresses(_)) => {
                "ProxyFilterRemove"
            }
            OutboundMessage::Model(req) => req.type_name(),
        }
    }

    /// Check if this is a configuration message.
    pub fn is_config(&self) -> bool {
        matches!(self, OutboundMessage::Config(_))
    }

    /// Check if this is a proxy configuration message.
    pub fn is_proxy(&self) -> bool {
        matches!(self, OutboundMessage::ProxyFilter(_))
    }

    /// Check if this is an application model message.
    pub fn is_model(&self) -> bool {
        matches!(self, OutboundMessage::Model(_))
    }
}
