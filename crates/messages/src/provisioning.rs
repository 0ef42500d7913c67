//! Provisioning and scanning payloads.

use meshctl_types::{Address, DeviceUuid, Key128, NetKeyIndex};

/// Bearer used for a provisioning link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionBearer {
    /// Advertising bearer (also used through remote provisioners).
    Adv,
    /// GATT connection to the device.
    Gatt,
}

/// An unprovisioned device heard by a scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnprovisionedReport {
    pub uuid: DeviceUuid,
    /// Signal strength in dBm.
    pub rssi: i8,
    /// OOB information bitmap from the beacon.
    pub oob_info: u16,
    /// Bearer the device was heard on.
    pub bearer: ProvisionBearer,
    /// Address of the scanning provisioner.
    pub scanner: Address,
}

/// Outcome reported for a provisioning link attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkReportStatus {
    /// Link opened.
    Opened,
    /// Link could not be opened.
    OpenFailed,
    /// Link closed by the peer or the bearer.
    Closed,
}

/// Static OOB type bit in the capabilities PDU.
pub const STATIC_OOB_AVAILABLE: u8 = 0x01;

/// Device capabilities received during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCapabilities {
    pub element_count: u8,
    pub algorithms: u16,
    pub public_key_type: u8,
    pub static_oob_type: u8,
    pub output_oob_size: u8,
    pub output_oob_action: u16,
    pub input_oob_size: u8,
    pub input_oob_action: u16,
}

impl DeviceCapabilities {
    /// Whether the device can authenticate with static OOB data.
    pub fn supports_static_oob(&self) -> bool {
        self.static_oob_type & STATIC_OOB_AVAILABLE != 0
    }
}

/// Authentication method chosen for the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoOob,
    StaticOob,
}

/// Provisioning data handed to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningData {
    pub net_key: Key128,
    pub net_key_index: NetKeyIndex,
    pub key_refresh: bool,
    pub iv_update: bool,
    pub iv_index: u32,
    pub unicast: Address,
}

/// Provisioning failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionFailure {
    /// Protocol error code reported by the device.
    Protocol(u8),
    /// Link lost during the handshake.
    LinkLost,
    /// No progress within the protocol timeout.
    Timeout,
    /// Authentication failed.
    Confirmation,
}

/// End of the provisioning handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionResult {
    /// Device provisioned; the device key was derived by the transport.
    Success { device_key: Key128 },
    /// Handshake failed.
    Failed(ProvisionFailure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_oob_bit() {
        let mut caps = DeviceCapabilities {
            element_count: 1,
            ..Default::default()
        };
        assert!(!caps.supports_static_oob());
        caps.static_oob_type = 0x01;
        assert!(caps.supports_static_oob());
    }
}
