//! Network and application key records.

use crate::{AppKeyIndex, Key128, KeyRefreshPhase, NetKeyIndex};
use serde::{Deserialize, Serialize};

/// A network key known to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetKey {
    /// Global key index.
    pub index: NetKeyIndex,
    /// Display name.
    pub name: String,
    /// Current key. During a refresh cycle this is the new key.
    pub key: Key128,
    /// Key being replaced while a refresh cycle is in progress.
    pub old_key: Option<Key128>,
    /// Network-wide refresh phase.
    pub phase: KeyRefreshPhase,
    /// A new refresh cycle must start once the current one completes.
    #[serde(default)]
    pub rotation_pending: bool,
}

impl NetKey {
    /// Create a key in phase Normal.
    pub fn new(index: NetKeyIndex, name: impl Into<String>, key: Key128) -> Self {
        Self {
            index,
            name: name.into(),
            key,
            old_key: None,
            phase: KeyRefreshPhase::Normal,
            rotation_pending: false,
        }
    }

    /// Key the network transmits with in the current phase.
    pub fn transmit_key(&self) -> Key128 {
        match (self.phase, self.old_key) {
            (KeyRefreshPhase::First, Some(old)) => old,
            _ => self.key,
        }
    }

    /// Begin a refresh cycle with fresh key material.
    pub fn begin_refresh(&mut self, new_key: Key128) {
        self.old_key = Some(self.key);
        self.key = new_key;
        self.phase = KeyRefreshPhase::First;
        self.rotation_pending = false;
    }

    /// Finish a refresh cycle, revoking the old key.
    pub fn finish_refresh(&mut self) {
        self.old_key = None;
        self.phase = KeyRefreshPhase::Normal;
    }
}

/// An application key bound to a network key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppKey {
    /// Global key index.
    pub index: AppKeyIndex,
    /// Display name.
    pub name: String,
    /// Network key this application key is bound to.
    pub bound_net_key: NetKeyIndex,
    /// Current key. During a refresh cycle this is the new key.
    pub key: Key128,
    /// Key being replaced while a refresh cycle is in progress.
    pub old_key: Option<Key128>,
}

impl AppKey {
    /// Create an application key.
    pub fn new(
        index: AppKeyIndex,
        name: impl Into<String>,
        bound_net_key: NetKeyIndex,
        key: Key128,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            bound_net_key,
            key,
            old_key: None,
        }
    }

    /// Key to hand to a node joining in the given network phase.
    pub fn transmit_key(&self, phase: KeyRefreshPhase) -> Key128 {
        match (phase, self.old_key) {
            (KeyRefreshPhase::First, Some(old)) => old,
            _ => self.key,
        }
    }
}

/// A node's copy of a network key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeNetKey {
    /// Key index.
    pub index: NetKeyIndex,
    /// Refresh phase of this node's copy.
    pub phase: KeyRefreshPhase,
}

/// A node's copy of an application key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAppKey {
    /// Key index.
    pub index: AppKeyIndex,
    /// Refresh phase of this node's copy.
    pub phase: KeyRefreshPhase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_cycle_keys() {
        let old = Key128::from_bytes([1; 16]);
        let new = Key128::from_bytes([2; 16]);
        let mut key = NetKey::new(NetKeyIndex::PRIMARY, "primary", old);

        key.begin_refresh(new);
        assert_eq!(key.phase, KeyRefreshPhase::First);
        assert_eq!(key.transmit_key(), old);

        key.phase = KeyRefreshPhase::Second;
        assert_eq!(key.transmit_key(), new);

        key.finish_refresh();
        assert_eq!(key.phase, KeyRefreshPhase::Normal);
        assert!(key.old_key.is_none());
        assert_eq!(key.key, new);
    }
}
