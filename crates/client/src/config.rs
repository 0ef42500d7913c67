//! Client configuration.

use meshctl_types::{AppKeyIndex, NodeConfigState, RelayConfig, Retransmit};
use std::time::Duration;

/// Foundation settings applied to nodes.
///
/// `None` leaves the corresponding node state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Default TTL.
    pub default_ttl: Option<u8>,
    /// Network transmit parameters.
    pub net_transmit: Option<Retransmit>,
    /// Relay state (only applied to relay-capable nodes).
    pub relay: Option<RelayConfig>,
    /// GATT proxy state (only applied to proxy-capable nodes).
    pub gatt_proxy: Option<bool>,
    /// Friend state (only applied to friend-capable nodes).
    pub friend: Option<bool>,
    /// Secure network beacon state.
    pub beacon: Option<bool>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(7),
            net_transmit: Some(Retransmit::new(2, 20)),
            relay: Some(RelayConfig {
                enabled: true,
                retransmit: Retransmit::new(2, 20),
            }),
            gatt_proxy: Some(true),
            friend: Some(false),
            beacon: Some(true),
        }
    }
}

impl DeviceConfig {
    /// A config that changes nothing.
    pub fn unchanged() -> Self {
        Self {
            default_ttl: None,
            net_transmit: None,
            relay: None,
            gatt_proxy: None,
            friend: None,
            beacon: None,
        }
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: u8) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set network transmit parameters.
    pub fn with_net_transmit(mut self, count: u8, interval_ms: u16) -> Self {
        self.net_transmit = Some(Retransmit::new(count, interval_ms));
        self
    }

    /// Set the relay state.
    pub fn with_relay(mut self, enabled: bool, retransmit: Retransmit) -> Self {
        self.relay = Some(RelayConfig {
            enabled,
            retransmit,
        });
        self
    }

    /// Set the GATT proxy state.
    pub fn with_gatt_proxy(mut self, enabled: bool) -> Self {
        self.gatt_proxy = Some(enabled);
        self
    }

    /// Set the friend state.
    pub fn with_friend(mut self, enabled: bool) -> Self {
        self.friend = Some(enabled);
        self
    }

    /// Set the beacon state.
    pub fn with_beacon(mut self, enabled: bool) -> Self {
        self.beacon = Some(enabled);
        self
    }

    /// Whether applying this config to a node in `state` changes nothing.
    pub fn is_satisfied_by(&self, state: &NodeConfigState) -> bool {
        fn same<T: PartialEq>(wanted: Option<T>, have: Option<T>) -> bool {
            wanted.is_none() || wanted == have
        }
        same(self.default_ttl, state.default_ttl)
            && same(self.net_transmit, state.net_transmit)
            && same(self.relay, state.relay)
            && same(self.gatt_proxy, state.gatt_proxy)
            && same(self.friend, state.friend)
            && same(self.beacon, state.beacon)
    }
}

/// Publication parameters for publishing models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicationConfig {
    /// Application key used for publishing.
    pub app_key: AppKeyIndex,
    /// Publish TTL.
    pub ttl: u8,
    /// Publish period in milliseconds (0 = no periodic publishing).
    pub period_ms: u32,
    /// Publish retransmission.
    pub retransmit: Retransmit,
    /// Publish with friendship credentials.
    pub friendship_credentials: bool,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            app_key: AppKeyIndex(0),
            ttl: 7,
            period_ms: 0,
            retransmit: Retransmit::default(),
            friendship_credentials: false,
        }
    }
}

impl PublicationConfig {
    /// Set the publish period.
    pub fn with_period_ms(mut self, period_ms: u32) -> Self {
        self.period_ms = period_ms;
        self
    }

    /// Set the publish TTL.
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set publish retransmission.
    pub fn with_retransmit(mut self, count: u8, interval_ms: u16) -> Self {
        self.retransmit = Retransmit::new(count, interval_ms);
        self
    }
}

/// Configuration for the provisioning client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Time to wait for a status reply before retransmitting.
    pub request_timeout: Duration,

    /// Transmissions of one request before its node counts as unreachable.
    pub max_send_attempts: u32,

    /// Time to wait for a proxy connection.
    pub connect_timeout: Duration,

    /// Reconnect attempts before an operation needing the link fails.
    pub max_connect_retries: u32,

    /// Time to wait for a provisioning link to open.
    pub provision_link_timeout: Duration,

    /// Provisioning link attempts before provisioning fails.
    pub max_provision_retries: u32,

    /// Foundation settings applied during bring-up.
    pub device: DeviceConfig,

    /// Publication settings applied during bring-up.
    pub publication: PublicationConfig,

    /// Static OOB authentication data.
    pub static_oob: Option<Vec<u8>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_send_attempts: 3,
            connect_timeout: Duration::from_secs(10),
            max_connect_retries: 3,
            provision_link_timeout: Duration::from_secs(10),
            max_provision_retries: 3,
            device: DeviceConfig::default(),
            publication: PublicationConfig::default(),
            static_oob: None,
        }
    }
}

impl ClientConfig {
    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the number of transmissions per request.
    pub fn with_max_send_attempts(mut self, attempts: u32) -> Self {
        self.max_send_attempts = attempts.max(1);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reconnect budget.
    pub fn with_max_connect_retries(mut self, retries: u32) -> Self {
        self.max_connect_retries = retries;
        self
    }

    /// Set the provisioning link budget.
    pub fn with_max_provision_retries(mut self, retries: u32) -> Self {
        self.max_provision_retries = retries;
        self
    }

    /// Set the foundation settings applied during bring-up.
    pub fn with_device_config(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    /// Set the publication settings applied during bring-up.
    pub fn with_publication_config(mut self, publication: PublicationConfig) -> Self {
        self.publication = publication;
        self
    }

    /// Provide static OOB data.
    pub fn with_static_oob(mut self, oob: Vec<u8>) -> Self {
        self.static_oob = Some(oob);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchanged_is_always_satisfied() {
        assert!(DeviceConfig::unchanged().is_satisfied_by(&NodeConfigState::default()));
        assert!(!DeviceConfig::default().is_satisfied_by(&NodeConfigState::default()));
    }

    #[test]
    fn test_satisfied_by_matching_state() {
        let cfg = DeviceConfig::unchanged().with_default_ttl(5).with_beacon(false);
        let state = NodeConfigState {
            default_ttl: Some(5),
            beacon: Some(false),
            ..Default::default()
        };
        assert!(cfg.is_satisfied_by(&state));
        assert!(!cfg.with_default_ttl(6).is_satisfied_by(&state));
    }
}
