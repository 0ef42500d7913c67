//! TOML configuration for the production runner.
//!
//! ```toml
//! [network]
//! name = "home"
//! provisioner = "gateway"
//! provisioner_uuid = "a1b2c3d4e5f60718293a4b5c6d7e8f90"
//!
//! [client]
//! request_timeout_ms = 5000
//! static_oob = "00112233445566778899aabbccddeeff"
//!
//! [device]
//! default_ttl = 5
//! gatt_proxy = false
//!
//! [storage]
//! path = "/var/lib/meshctl"
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Every section is optional; omitted values fall back to the client
//! defaults.

use meshctl_client::{ClientConfig, DeviceConfig, PublicationConfig};
use meshctl_types::{AppKeyIndex, DeviceUuid, RelayConfig, Retransmit};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeshctlConfig {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub publication: PublicationSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl MeshctlConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Build the client configuration.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let c = &self.client;
        let mut config = ClientConfig::default()
            .with_max_send_attempts(c.max_send_attempts)
            .with_max_connect_retries(c.max_connect_retries)
            .with_max_provision_retries(c.max_provision_retries)
            .with_device_config(self.device.to_device_config())
            .with_publication_config(self.publication.to_publication_config());
        config.request_timeout = Duration::from_millis(c.request_timeout_ms);
        config.connect_timeout = Duration::from_millis(c.connect_timeout_ms);
        config.provision_link_timeout = Duration::from_millis(c.provision_link_timeout_ms);
        if let Some(oob) = &c.static_oob {
            let bytes = hex::decode(oob).map_err(|e| ConfigError::Invalid {
                field: "client.static_oob",
                reason: e.to_string(),
            })?;
            if bytes.len() != 16 {
                return Err(ConfigError::Invalid {
                    field: "client.static_oob",
                    reason: format!("expected 16 bytes, got {}", bytes.len()),
                });
            }
            config = config.with_static_oob(bytes);
        }
        Ok(config)
    }

    /// UUID of the local provisioner device.
    pub fn provisioner_uuid(&self) -> Result<DeviceUuid, ConfigError> {
        DeviceUuid::from_hex(&self.network.provisioner_uuid).ok_or_else(|| ConfigError::Invalid {
            field: "network.provisioner_uuid",
            reason: "expected 32 hex digits".into(),
        })
    }
}

/// The `[network]` section: what to create when no network is stored.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSection {
    pub name: String,
    pub provisioner: String,
    pub provisioner_uuid: String,
    pub element_count: u8,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            name: "mesh".into(),
            provisioner: "meshctl".into(),
            provisioner_uuid: "00000000000000000000000000000000".into(),
            element_count: 1,
        }
    }
}

/// The `[client]` section: timeouts and retry budgets.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSection {
    pub request_timeout_ms: u64,
    pub max_send_attempts: u32,
    pub connect_timeout_ms: u64,
    pub max_connect_retries: u32,
    pub provision_link_timeout_ms: u64,
    pub max_provision_retries: u32,
    /// 16 bytes as hex.
    pub static_oob: Option<String>,
}

impl Default for ClientSection {
    fn default() -> Self {
        let defaults = ClientConfig::default();
        Self {
            request_timeout_ms: defaults.request_timeout.as_millis() as u64,
            max_send_attempts: defaults.max_send_attempts,
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            max_connect_retries: defaults.max_connect_retries,
            provision_link_timeout_ms: defaults.provision_link_timeout.as_millis() as u64,
            max_provision_retries: defaults.max_provision_retries,
            static_oob: None,
        }
    }
}

/// The `[device]` section: foundation state applied during bring-up.
///
/// Unset keys keep the client defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSection {
    pub default_ttl: Option<u8>,
    pub net_transmit_count: Option<u8>,
    pub net_transmit_interval_ms: Option<u16>,
    pub relay: Option<bool>,
    pub gatt_proxy: Option<bool>,
    pub friend: Option<bool>,
    pub beacon: Option<bool>,
}

impl DeviceSection {
    fn to_device_config(&self) -> DeviceConfig {
        let defaults = DeviceConfig::default();
        let net_transmit = match (self.net_transmit_count, self.net_transmit_interval_ms) {
            (None, None) => defaults.net_transmit,
            (count, interval) => {
                let base = defaults.net_transmit.unwrap_or_default();
                Some(Retransmit::new(
                    count.unwrap_or(base.count),
                    interval.unwrap_or(base.interval_ms),
                ))
            }
        };
        let relay = match self.relay {
            Some(enabled) => Some(RelayConfig {
                enabled,
                retransmit: defaults
                    .relay
                    .map(|r| r.retransmit)
                    .unwrap_or_default(),
            }),
            None => defaults.relay,
        };
        DeviceConfig {
            default_ttl: self.default_ttl.or(defaults.default_ttl),
            net_transmit,
            relay,
            gatt_proxy: self.gatt_proxy.or(defaults.gatt_proxy),
            friend: self.friend.or(defaults.friend),
            beacon: self.beacon.or(defaults.beacon),
        }
    }
}

/// The `[publication]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublicationSection {
    pub app_key: Option<u16>,
    pub ttl: Option<u8>,
    pub period_ms: Option<u32>,
}

impl PublicationSection {
    fn to_publication_config(&self) -> PublicationConfig {
        let mut config = PublicationConfig::default();
        if let Some(index) = self.app_key {
            config.app_key = AppKeyIndex(index);
        }
        if let Some(ttl) = self.ttl {
            config = config.with_ttl(ttl);
        }
        if let Some(period) = self.period_ms {
            config = config.with_period_ms(period);
        }
        config
    }
}

/// The `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("meshctl-data"),
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of text.
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_client_defaults() {
        let config = MeshctlConfig::parse("").unwrap();
        let client = config.client_config().unwrap();
        let defaults = ClientConfig::default();

        assert_eq!(client.request_timeout, defaults.request_timeout);
        assert_eq!(client.max_send_attempts, defaults.max_send_attempts);
        assert_eq!(client.device, defaults.device);
        assert_eq!(client.publication, defaults.publication);
        assert_eq!(client.static_oob, None);
        assert_eq!(config.network.element_count, 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = MeshctlConfig::parse(
            r#"
            [network]
            name = "home"
            provisioner_uuid = "a1b2c3d4e5f60718293a4b5c6d7e8f90"

            [client]
            request_timeout_ms = 250
            max_send_attempts = 5
            static_oob = "00112233445566778899aabbccddeeff"

            [device]
            default_ttl = 5
            gatt_proxy = false
            net_transmit_count = 4

            [publication]
            ttl = 3
            period_ms = 10000
            "#,
        )
        .unwrap();
        let client = config.client_config().unwrap();

        assert_eq!(client.request_timeout, Duration::from_millis(250));
        assert_eq!(client.max_send_attempts, 5);
        assert_eq!(client.static_oob.as_ref().map(Vec::len), Some(16));
        assert_eq!(client.device.default_ttl, Some(5));
        assert_eq!(client.device.gatt_proxy, Some(false));
        assert_eq!(client.device.net_transmit, Some(Retransmit::new(4, 20)));
        assert_eq!(client.device.beacon, DeviceConfig::default().beacon);
        assert_eq!(client.publication.ttl, 3);
        assert_eq!(client.publication.period_ms, 10_000);
        assert_eq!(config.network.name, "home");
        assert_eq!(config.network.provisioner, "meshctl");
        assert!(config.provisioner_uuid().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let short_oob = MeshctlConfig::parse("[client]\nstatic_oob = \"0011\"").unwrap();
        assert!(matches!(
            short_oob.client_config(),
            Err(ConfigError::Invalid {
                field: "client.static_oob",
                ..
            })
        ));

        let bad_uuid = MeshctlConfig::parse("[network]\nprovisioner_uuid = \"xyz\"").unwrap();
        assert!(bad_uuid.provisioner_uuid().is_err());

        assert!(matches!(
            MeshctlConfig::parse("[client]\nretries = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
