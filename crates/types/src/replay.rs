//! Replay-protection list.
//!
//! One entry per known unicast source address holding the last sequence
//! number seen from it, plus the IV index state. Entries are removed when a
//! node is evicted and cleared when freshly allocated addresses are reused, so
//! a new device at an old address is not rejected as a replay.
//!
//! # Record format
//!
//! ```text
//! entry:  [addr: u16 LE][seq: u24 LE][flags: u8]   flags bit0 = previous IV
//! iv:     [iv_index: u32 LE][flags: u8]            flags bit0 = update in progress
//! ```

use crate::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Largest 24-bit sequence number.
pub const SEQ_MAX: u32 = 0x00FF_FFFF;

/// Size of an encoded entry record.
pub const ENTRY_RECORD_LEN: usize = 6;

/// Size of an encoded IV record.
pub const IV_RECORD_LEN: usize = 5;

/// Errors decoding persisted replay records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayCodecError {
    /// Record has the wrong length.
    #[error("Invalid record length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Record carries a non-unicast address.
    #[error("Not a unicast address: {0}")]
    NotUnicast(Address),
}

/// Last sequence number seen from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEntry {
    /// Source unicast address.
    pub address: Address,
    /// Last 24-bit sequence number.
    pub seq: u32,
    /// Sequence number belongs to the previous IV index.
    pub previous_iv: bool,
}

impl ReplayEntry {
    /// Encode into a fixed-size record.
    pub fn encode(&self) -> [u8; ENTRY_RECORD_LEN] {
        let addr = self.address.0.to_le_bytes();
        let seq = (self.seq & SEQ_MAX).to_le_bytes();
        [
            addr[0],
            addr[1],
            seq[0],
            seq[1],
            seq[2],
            self.previous_iv as u8,
        ]
    }

    /// Decode a fixed-size record.
    pub fn decode(bytes: &[u8]) -> Result<Self, ReplayCodecError> {
        if bytes.len() != ENTRY_RECORD_LEN {
            return Err(ReplayCodecError::InvalidLength {
                expected: ENTRY_RECORD_LEN,
                actual: bytes.len(),
            });
        }
        let address = Address(u16::from_le_bytes([bytes[0], bytes[1]]));
        if !address.is_unicast() {
            return Err(ReplayCodecError::NotUnicast(address));
        }
        Ok(Self {
            address,
            seq: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], 0]),
            previous_iv: bytes[5] & 0x01 != 0,
        })
    }
}

/// IV index state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IvState {
    /// Current IV index.
    pub iv_index: u32,
    /// IV update in progress.
    pub update_in_progress: bool,
}

impl IvState {
    /// Encode into a fixed-size record.
    pub fn encode(&self) -> [u8; IV_RECORD_LEN] {
        let iv = self.iv_index.to_le_bytes();
        [iv[0], iv[1], iv[2], iv[3], self.update_in_progress as u8]
    }

    /// Decode a fixed-size record.
    pub fn decode(bytes: &[u8]) -> Result<Self, ReplayCodecError> {
        if bytes.len() != IV_RECORD_LEN {
            return Err(ReplayCodecError::InvalidLength {
                expected: IV_RECORD_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            iv_index: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            update_in_progress: bytes[4] & 0x01 != 0,
        })
    }
}

/// The replay-protection list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplayList {
    entries: BTreeMap<Address, ReplayEntry>,
    iv: IvState,
}

impl ReplayList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current IV state.
    pub fn iv(&self) -> IvState {
        self.iv
    }

    /// Entry for an address.
    pub fn get(&self, address: Address) -> Option<&ReplayEntry> {
        self.entries.get(&address)
    }

    /// Record a sequence number from a source.
    ///
    /// Returns false for non-unicast sources, which are not tracked.
    pub fn update(&mut self, address: Address, seq: u32, previous_iv: bool) -> bool {
        if !address.is_unicast() {
            return false;
        }
        self.entries.insert(
            address,
            ReplayEntry {
                address,
                seq: seq & SEQ_MAX,
                previous_iv,
            },
        );
        true
    }

    /// Apply an IV index change.
    ///
    /// When the index advances, every stored sequence number now belongs to
    /// the previous IV index.
    pub fn set_iv(&mut self, iv_index: u32, update_in_progress: bool) {
        if iv_index > self.iv.iv_index {
            for entry in self.entries.values_mut() {
                entry.previous_iv = true;
            }
        }
        self.iv = IvState {
            iv_index,
            update_in_progress,
        };
    }

    /// Remove the entry for an address.
    pub fn remove(&mut self, address: Address) -> Option<ReplayEntry> {
        self.entries.remove(&address)
    }

    /// Remove every entry in `[first, first + count)`.
    ///
    /// Returns the number of removed entries.
    pub fn remove_range(&mut self, first: Address, count: u16) -> usize {
        let before = self.entries.len();
        let last = first.0.saturating_add(count.saturating_sub(1));
        self.entries
            .retain(|addr, _| addr.0 < first.0 || addr.0 > last);
        before - self.entries.len()
    }

    /// Whether any entry falls inside `[first, first + count)`.
    pub fn has_entries_in(&self, first: Address, count: u16) -> bool {
        let last = Address(first.0.saturating_add(count.saturating_sub(1)));
        self.entries.range(first..=last).next().is_some()
    }

    /// Number of tracked addresses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no address is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in address order.
    pub fn entries(&self) -> impl Iterator<Item = &ReplayEntry> {
        self.entries.values()
    }

    /// Encode the whole list: IV record followed by entry records.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_RECORD_LEN + self.entries.len() * ENTRY_RECORD_LEN);
        out.extend_from_slice(&self.iv.encode());
        for entry in self.entries.values() {
            out.extend_from_slice(&entry.encode());
        }
        out
    }

    /// Decode a list produced by [`ReplayList::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ReplayCodecError> {
        if bytes.len() < IV_RECORD_LEN || (bytes.len() - IV_RECORD_LEN) % ENTRY_RECORD_LEN != 0 {
            return Err(ReplayCodecError::InvalidLength {
                expected: IV_RECORD_LEN,
                actual: bytes.len(),
            });
        }
        let iv = IvState::decode(&bytes[..IV_RECORD_LEN])?;
        let mut entries = BTreeMap::new();
        for chunk in bytes[IV_RECORD_LEN..].chunks_exact(ENTRY_RECORD_LEN) {
            let entry = ReplayEntry::decode(chunk)?;
            entries.insert(entry.address, entry);
        }
        Ok(Self { entries, iv })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_24_bit() {
        let entry = ReplayEntry {
            address: Address(0x0102),
            seq: 0x12AB_CDEF,
            previous_iv: true,
        };
        let bytes = entry.encode();
        assert_eq!(bytes, [0x02, 0x01, 0xEF, 0xCD, 0xAB, 0x01]);
        let decoded = ReplayEntry::decode(&bytes).unwrap();
        assert_eq!(decoded.seq, 0x00AB_CDEF);
        assert!(decoded.previous_iv);
    }

    #[test]
    fn test_reject_group_source() {
        let mut list = ReplayList::new();
        assert!(!list.update(Address(0xC000), 5, false));
        assert!(list.is_empty());
        let bytes = [0x00, 0xC0, 0, 0, 0, 0];
        assert_eq!(
            ReplayEntry::decode(&bytes),
            Err(ReplayCodecError::NotUnicast(Address(0xC000)))
        );
    }

    #[test]
    fn test_iv_advance_marks_previous() {
        let mut list = ReplayList::new();
        list.update(Address(0x0005), 100, false);
        list.set_iv(1, true);
        assert!(list.get(Address(0x0005)).unwrap().previous_iv);
        assert_eq!(list.iv().iv_index, 1);

        // Same IV index again does not touch entries recorded after it.
        list.update(Address(0x0006), 1, false);
        list.set_iv(1, false);
        assert!(!list.get(Address(0x0006)).unwrap().previous_iv);
    }

    #[test]
    fn test_remove_range() {
        let mut list = ReplayList::new();
        for a in 0x0010..0x0016 {
            list.update(Address(a), 1, false);
        }
        assert_eq!(list.remove_range(Address(0x0011), 3), 3);
        assert!(list.get(Address(0x0010)).is_some());
        assert!(list.get(Address(0x0012)).is_none());
        assert!(list.get(Address(0x0014)).is_some());
        assert!(!list.has_entries_in(Address(0x0011), 3));
        assert!(list.has_entries_in(Address(0x0013), 2));
    }

    #[test]
    fn test_list_encoding() {
        let mut list = ReplayList::new();
        list.set_iv(7, false);
        list.update(Address(0x0003), 42, false);
        list.update(Address(0x0001), 9, true);
        let bytes = list.encode();
        assert_eq!(bytes.len(), IV_RECORD_LEN + 2 * ENTRY_RECORD_LEN);
        assert_eq!(ReplayList::decode(&bytes).unwrap(), list);
        assert!(ReplayList::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
