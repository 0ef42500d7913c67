//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A mesh network address.
///
/// The 16-bit address space is partitioned into unicast, virtual and group
/// ranges. Only unicast addresses identify a single element.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(pub u16);

impl Address {
    /// The unassigned address.
    pub const UNASSIGNED: Self = Address(0x0000);

    /// Lowest unicast address.
    pub const UNICAST_MIN: Self = Address(0x0001);

    /// Highest unicast address.
    pub const UNICAST_MAX: Self = Address(0x7FFF);

    /// First dynamically allocated group address.
    pub const GROUP_MIN: Self = Address(0xC000);

    /// Last dynamically allocated group address.
    pub const GROUP_MAX: Self = Address(0xFEFF);

    /// The all-nodes broadcast group.
    pub const ALL_NODES: Self = Address(0xFFFF);

    /// Whether this is a unicast address.
    pub fn is_unicast(self) -> bool {
        (Self::UNICAST_MIN.0..=Self::UNICAST_MAX.0).contains(&self.0)
    }

    /// Whether this is a group address (including fixed groups).
    pub fn is_group(self) -> bool {
        self.0 >= Self::GROUP_MIN.0
    }

    /// Whether this is a virtual address.
    pub fn is_virtual(self) -> bool {
        (0x8000..0xC000).contains(&self.0)
    }

    /// Whether this is the unassigned address.
    pub fn is_unassigned(self) -> bool {
        self == Self::UNASSIGNED
    }

    /// Offset this address by `n` elements.
    ///
    /// Returns None if the result leaves the 16-bit space.
    pub fn offset(self, n: u16) -> Option<Self> {
        self.0.checked_add(n).map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Global index of a network key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NetKeyIndex(pub u16);

impl NetKeyIndex {
    /// The primary network key.
    pub const PRIMARY: Self = NetKeyIndex(0);

    /// Largest valid key index (12 bits).
    pub const MAX: u16 = 0x0FFF;
}

impl fmt::Display for NetKeyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetKey({})", self.0)
    }
}

/// Global index of an application key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AppKeyIndex(pub u16);

impl AppKeyIndex {
    /// Largest valid key index (12 bits).
    pub const MAX: u16 = 0x0FFF;
}

impl fmt::Display for AppKeyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppKey({})", self.0)
    }
}

/// 128-bit device UUID advertised by unprovisioned devices.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DeviceUuid(pub [u8; 16]);

impl DeviceUuid {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Parse from a 32-character hex string (dashes are ignored).
    pub fn from_hex(s: &str) -> Option<Self> {
        let compact: String = s.chars().filter(|c| *c != '-').collect();
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(compact, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Hex encoding without separators.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceUuid({})", self.to_hex())
    }
}

impl fmt::Display for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Model identifier.
///
/// SIG models are identified by a 16-bit id; vendor models additionally carry
/// the company identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelId {
    /// Bluetooth SIG defined model.
    Sig(u16),
    /// Vendor model.
    Vendor {
        /// Company identifier.
        company: u16,
        /// Vendor-assigned model id.
        model: u16,
    },
}

impl ModelId {
    /// SIG model id, if this is a SIG model.
    pub fn sig_id(self) -> Option<u16> {
        match self {
            ModelId::Sig(id) => Some(id),
            ModelId::Vendor { .. } => None,
        }
    }

    /// Whether this is a vendor model.
    pub fn is_vendor(self) -> bool {
        matches!(self, ModelId::Vendor { .. })
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelId::Sig(id) => write!(f, "Model({:04x})", id),
            ModelId::Vendor { company, model } => write!(f, "Model({:04x}:{:04x})", company, model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_ranges() {
        assert!(Address(0x0001).is_unicast());
        assert!(Address(0x7FFF).is_unicast());
        assert!(!Address::UNASSIGNED.is_unicast());
        assert!(!Address(0x8000).is_unicast());
        assert!(Address(0x8000).is_virtual());
        assert!(Address(0xC000).is_group());
        assert!(Address::ALL_NODES.is_group());
        assert!(!Address(0xBFFF).is_group());
    }

    #[test]
    fn test_address_offset() {
        assert_eq!(Address(0x0010).offset(3), Some(Address(0x0013)));
        assert_eq!(Address(0xFFFF).offset(1), None);
    }

    #[test]
    fn test_uuid_hex() {
        let uuid = DeviceUuid::from_hex("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        assert_eq!(uuid.as_bytes()[0], 0x00);
        assert_eq!(uuid.as_bytes()[15], 0xff);
        assert_eq!(uuid.to_hex(), "00112233445566778899aabbccddeeff");
        assert!(DeviceUuid::from_hex("0011").is_none());
    }
}
