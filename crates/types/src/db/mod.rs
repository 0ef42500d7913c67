//! Network database.
//!
//! The database is owned by the application and handed to the client when the
//! network is opened. The client reads and mutates it; how it is stored is up
//! to the storage layer (the records derive serde traits).

mod group;
mod keys;
mod node;

pub use group::Group;
pub use keys::{AppKey, NetKey, NodeAppKey, NodeNetKey};
pub use node::{
    Element, Model, Node, NodeConfigState, Publication, RelayConfig, Retransmit, SensorProperty,
};

use crate::{Address, AppKeyIndex, DeviceUuid, Key128, KeyRefreshPhase, NetKeyIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from database queries and mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// No free address range of the requested size.
    #[error("Address space exhausted")]
    AddressSpaceExhausted,

    /// Name already used by a node, element or group.
    #[error("Name already in use: {0}")]
    DuplicateName(String),

    /// Referenced group does not exist.
    #[error("Group not found: {0}")]
    GroupNotFound(Address),

    /// Referenced node does not exist.
    #[error("Node not found: {0}")]
    NodeNotFound(Address),

    /// Referenced network key does not exist.
    #[error("Unknown network key: {0}")]
    UnknownNetKey(NetKeyIndex),

    /// Invalid element count.
    #[error("Invalid element count: {0}")]
    InvalidElementCount(usize),
}

/// A provisioner allowed to allocate unicast addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioner {
    /// Display name.
    pub name: String,
    /// UUID of the provisioner's own device.
    pub uuid: DeviceUuid,
    /// Lowest unicast address this provisioner may allocate.
    pub range_low: Address,
    /// Highest unicast address this provisioner may allocate.
    pub range_high: Address,
}

/// The network database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshDb {
    /// Network name.
    pub name: String,
    /// Current IV index.
    pub iv_index: u32,
    /// IV update procedure in progress.
    pub iv_update: bool,
    /// Provisioners; the first is the local one.
    pub provisioners: Vec<Provisioner>,
    /// Network keys.
    pub net_keys: Vec<NetKey>,
    /// Application keys.
    pub app_keys: Vec<AppKey>,
    /// Provisioned nodes, including the local device.
    pub nodes: Vec<Node>,
    /// Groups.
    pub groups: Vec<Group>,
}

impl MeshDb {
    /// Create a new network with a primary network key, one application key
    /// and a node record for the local provisioner device.
    pub fn new(
        name: &str,
        provisioner_name: &str,
        provisioner_uuid: DeviceUuid,
        local_element_count: u8,
        net_key: Key128,
        app_key: Key128,
        local_device_key: Key128,
    ) -> Self {
        let mut db = Self {
            name: name.to_string(),
            iv_index: 0,
            iv_update: false,
            provisioners: vec![Provisioner {
                name: provisioner_name.to_string(),
                uuid: provisioner_uuid,
                range_low: Address::UNICAST_MIN,
                range_high: Address::UNICAST_MAX,
            }],
            net_keys: vec![NetKey::new(NetKeyIndex::PRIMARY, "primary", net_key)],
            app_keys: vec![AppKey::new(
                AppKeyIndex(0),
                "default",
                NetKeyIndex::PRIMARY,
                app_key,
            )],
            nodes: Vec::new(),
            groups: Vec::new(),
        };
        let mut local = Node::new(
            provisioner_uuid,
            provisioner_name,
            Address::UNICAST_MIN,
            local_element_count.max(1),
            local_device_key,
            NodeNetKey {
                index: NetKeyIndex::PRIMARY,
                phase: KeyRefreshPhase::Normal,
            },
        );
        local.add_app_key(AppKeyIndex(0), KeyRefreshPhase::Normal);
        db.nodes.push(local);
        db
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Provisioners
    // ═══════════════════════════════════════════════════════════════════════

    /// The local provisioner.
    pub fn local_provisioner(&self) -> Option<&Provisioner> {
        self.provisioners.first()
    }

    /// The node record of the local provisioner device.
    pub fn local_node(&self) -> Option<&Node> {
        let uuid = self.local_provisioner()?.uuid;
        self.node_by_uuid(&uuid)
    }

    /// The node record of the local provisioner device, mutably.
    pub fn local_node_mut(&mut self) -> Option<&mut Node> {
        let uuid = self.local_provisioner()?.uuid;
        self.nodes.iter_mut().find(|n| n.uuid == uuid)
    }

    /// Whether a node belongs to a provisioner other than the local one.
    ///
    /// Other provisioners manage their own keys and are left out of key
    /// distribution.
    pub fn is_foreign_provisioner(&self, node: &Node) -> bool {
        self.provisioners
            .iter()
            .skip(1)
            .any(|p| p.uuid == node.uuid)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Nodes and elements
    // ═══════════════════════════════════════════════════════════════════════

    /// Node owning an address (any of its element addresses).
    pub fn node(&self, address: Address) -> Option<&Node> {
        self.nodes.iter().find(|n| n.owns(address))
    }

    /// Node owning an address, mutably.
    pub fn node_mut(&mut self, address: Address) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.owns(address))
    }

    /// Node by device UUID.
    pub fn node_by_uuid(&self, uuid: &DeviceUuid) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.uuid == uuid)
    }

    /// Node by exact name.
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Element at an address.
    pub fn element(&self, address: Address) -> Option<&Element> {
        self.node(address)?.element(address)
    }

    /// Element at an address, mutably.
    pub fn element_mut(&mut self, address: Address) -> Option<&mut Element> {
        self.node_mut(address)?.element_mut(address)
    }

    /// Element by exact name.
    pub fn element_by_name(&self, name: &str) -> Option<&Element> {
        self.nodes
            .iter()
            .flat_map(|n| n.elements.iter())
            .find(|e| e.name == name)
    }

    /// Whether a name is used by any node, element or group.
    pub fn name_in_use(&self, name: &str) -> bool {
        self.node_by_name(name).is_some()
            || self.element_by_name(name).is_some()
            || self.group_by_name(name).is_some()
    }

    /// Add a node record, replacing any record with the same UUID.
    ///
    /// Returns the replaced record.
    pub fn add_node(&mut self, node: Node) -> Option<Node> {
        let replaced = self
            .nodes
            .iter()
            .position(|n| n.uuid == node.uuid)
            .map(|idx| self.nodes.remove(idx));
        self.nodes.push(node);
        replaced
    }

    /// Remove the node owning an address.
    pub fn remove_node(&mut self, address: Address) -> Option<Node> {
        let idx = self.nodes.iter().position(|n| n.owns(address))?;
        Some(self.nodes.remove(idx))
    }

    /// Allocate the lowest contiguous unicast range of `count` addresses in
    /// the local provisioner's range that overlaps no existing node.
    pub fn allocate_unicast_range(&self, count: usize) -> Result<Address, DbError> {
        if count == 0 || count > u8::MAX as usize {
            return Err(DbError::InvalidElementCount(count));
        }
        let provisioner = self
            .local_provisioner()
            .ok_or(DbError::AddressSpaceExhausted)?;
        let low = provisioner.range_low.0 as u32;
        let high = provisioner.range_high.0 as u32;

        let mut taken: Vec<(u32, u32)> = self
            .nodes
            .iter()
            .map(|n| (n.unicast.0 as u32, n.last_address().0 as u32))
            .collect();
        taken.sort_unstable();

        let mut candidate = low;
        for (start, end) in taken {
            if end < candidate {
                continue;
            }
            if start >= candidate + count as u32 {
                break;
            }
            candidate = end + 1;
        }
        if candidate + count as u32 - 1 > high {
            return Err(DbError::AddressSpaceExhausted);
        }
        Ok(Address(candidate as u16))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Keys
    // ═══════════════════════════════════════════════════════════════════════

    /// Network key by index.
    pub fn net_key(&self, index: NetKeyIndex) -> Option<&NetKey> {
        self.net_keys.iter().find(|k| k.index == index)
    }

    /// Network key by index, mutably.
    pub fn net_key_mut(&mut self, index: NetKeyIndex) -> Option<&mut NetKey> {
        self.net_keys.iter_mut().find(|k| k.index == index)
    }

    /// Application key by index.
    pub fn app_key(&self, index: AppKeyIndex) -> Option<&AppKey> {
        self.app_keys.iter().find(|k| k.index == index)
    }

    /// Application keys bound to a network key.
    pub fn app_keys_bound_to(&self, net_key: NetKeyIndex) -> Vec<AppKeyIndex> {
        self.app_keys
            .iter()
            .filter(|k| k.bound_net_key == net_key)
            .map(|k| k.index)
            .collect()
    }

    /// Network key currently in a refresh cycle, if any.
    pub fn refreshing_net_key(&self) -> Option<NetKeyIndex> {
        self.net_keys
            .iter()
            .find(|k| k.phase.is_refreshing())
            .map(|k| k.index)
    }

    /// Whether a node holds a network key or any application key bound to it.
    pub fn node_holds_key_family(&self, node: &Node, net_key: NetKeyIndex) -> bool {
        node.has_net_key(net_key)
            || node.app_keys.iter().any(|k| {
                self.app_key(k.index)
                    .map(|a| a.bound_net_key == net_key)
                    .unwrap_or(false)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> MeshDb {
        MeshDb::new(
            "home",
            "phone",
            DeviceUuid::from_bytes([0xAA; 16]),
            2,
            Key128::from_bytes([1; 16]),
            Key128::from_bytes([2; 16]),
            Key128::from_bytes([3; 16]),
        )
    }

    fn node_at(uuid: u8, unicast: u16, elements: u8) -> Node {
        Node::new(
            DeviceUuid::from_bytes([uuid; 16]),
            format!("node-{}", uuid),
            Address(unicast),
            elements,
            Key128::from_bytes([uuid; 16]),
            NodeNetKey {
                index: NetKeyIndex::PRIMARY,
                phase: KeyRefreshPhase::Normal,
            },
        )
    }

    #[test]
    fn test_new_db_has_local_node() {
        let db = db();
        let local = db.local_node().unwrap();
        assert_eq!(local.unicast, Address(0x0001));
        assert_eq!(local.element_count, 2);
        assert!(local.has_net_key(NetKeyIndex::PRIMARY));
    }

    #[test]
    fn test_allocate_after_local() {
        let db = db();
        assert_eq!(db.allocate_unicast_range(3).unwrap(), Address(0x0003));
    }

    #[test]
    fn test_allocate_fills_gaps() {
        let mut db = db();
        db.add_node(node_at(1, 0x0003, 2)); // 3..4
        db.add_node(node_at(2, 0x0008, 1)); // 8
        // 5..7 is free for three elements
        assert_eq!(db.allocate_unicast_range(3).unwrap(), Address(0x0005));
        // four elements do not fit before 8
        assert_eq!(db.allocate_unicast_range(4).unwrap(), Address(0x0009));
    }

    #[test]
    fn test_allocate_exhausted() {
        let mut db = db();
        db.provisioners[0].range_high = Address(0x0004);
        assert_eq!(db.allocate_unicast_range(2).unwrap(), Address(0x0003));
        assert_eq!(
            db.allocate_unicast_range(3),
            Err(DbError::AddressSpaceExhausted)
        );
        assert_eq!(
            db.allocate_unicast_range(0),
            Err(DbError::InvalidElementCount(0))
        );
    }

    #[test]
    fn test_add_node_replaces_same_uuid() {
        let mut db = db();
        db.add_node(node_at(5, 0x0010, 1));
        let replaced = db.add_node(node_at(5, 0x0020, 1)).unwrap();
        assert_eq!(replaced.unicast, Address(0x0010));
        assert!(db.node(Address(0x0010)).is_none());
        assert!(db.node(Address(0x0020)).is_some());
    }

    #[test]
    fn test_name_lookup() {
        let mut db = db();
        db.add_node(node_at(5, 0x0010, 2));
        assert!(db.name_in_use("node-5"));
        assert!(db.name_in_use("node-5 #2"));
        assert!(!db.name_in_use("Node-5"));
        assert_eq!(
            db.element_by_name("node-5 #2").unwrap().address,
            Address(0x0011)
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let db = db();
        let json = serde_json::to_string(&db).unwrap();
        let back: MeshDb = serde_json::from_str(&json).unwrap();
        assert_eq!(db, back);
    }
}
