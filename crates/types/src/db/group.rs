//! Groups and the group tree.

use super::{DbError, MeshDb};
use crate::Address;
use serde::{Deserialize, Serialize};

/// A named group address.
///
/// Groups form a tree: a model subscribed to a group is also subscribed to
/// every ancestor, so messages sent to a parent reach the children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Display name.
    pub name: String,
    /// Group address.
    pub address: Address,
    /// Parent group; `None` for top-level groups.
    pub parent: Option<Address>,
}

impl MeshDb {
    /// Find a group by address.
    pub fn group(&self, address: Address) -> Option<&Group> {
        self.groups.iter().find(|g| g.address == address)
    }

    /// Find a group by exact name.
    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Ancestors of a group, nearest first. The group itself is excluded.
    pub fn group_ancestors(&self, address: Address) -> Vec<Address> {
        let mut ancestors = Vec::new();
        let mut current = self.group(address).and_then(|g| g.parent);
        while let Some(parent) = current {
            // A malformed database could contain a cycle.
            if ancestors.contains(&parent) || parent == address {
                break;
            }
            ancestors.push(parent);
            current = self.group(parent).and_then(|g| g.parent);
        }
        ancestors
    }

    /// Direct children of a group.
    pub fn group_children(&self, address: Address) -> Vec<Address> {
        self.groups
            .iter()
            .filter(|g| g.parent == Some(address))
            .map(|g| g.address)
            .collect()
    }

    /// Lowest unused group address.
    pub fn allocate_group_address(&self) -> Result<Address, DbError> {
        (Address::GROUP_MIN.0..=Address::GROUP_MAX.0)
            .map(Address)
            .find(|a| self.group(*a).is_none())
            .ok_or(DbError::AddressSpaceExhausted)
    }

    /// Create a group under an optional parent.
    pub fn create_group(
        &mut self,
        name: &str,
        parent: Option<Address>,
    ) -> Result<Address, DbError> {
        if self.name_in_use(name) {
            return Err(DbError::DuplicateName(name.to_string()));
        }
        if let Some(parent) = parent {
            if self.group(parent).is_none() {
                return Err(DbError::GroupNotFound(parent));
            }
        }
        let address = self.allocate_group_address()?;
        self.groups.push(Group {
            name: name.to_string(),
            address,
            parent,
        });
        Ok(address)
    }

    /// Remove a group record. Children are re-parented to its parent.
    pub fn remove_group(&mut self, address: Address) -> Option<Group> {
        let idx = self.groups.iter().position(|g| g.address == address)?;
        let group = self.groups.remove(idx);
        for child in self.groups.iter_mut() {
            if child.parent == Some(address) {
                child.parent = group.parent;
            }
        }
        for node in self.nodes.iter_mut() {
            if node.group == Some(address) {
                node.group = group.parent;
            }
        }
        Some(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceUuid, Key128};

    fn db() -> MeshDb {
        MeshDb::new(
            "home",
            "phone",
            DeviceUuid::from_bytes([0xAA; 16]),
            1,
            Key128::from_bytes([1; 16]),
            Key128::from_bytes([2; 16]),
            Key128::from_bytes([3; 16]),
        )
    }

    #[test]
    fn test_group_tree() {
        let mut db = db();
        let house = db.create_group("house", None).unwrap();
        let floor = db.create_group("floor", Some(house)).unwrap();
        let room = db.create_group("room", Some(floor)).unwrap();

        assert_eq!(house, Address(0xC000));
        assert_eq!(db.group_ancestors(room), vec![floor, house]);
        assert_eq!(db.group_children(house), vec![floor]);
        assert!(db.group_ancestors(house).is_empty());
    }

    #[test]
    fn test_duplicate_group_name() {
        let mut db = db();
        db.create_group("kitchen", None).unwrap();
        assert_eq!(
            db.create_group("kitchen", None),
            Err(DbError::DuplicateName("kitchen".into()))
        );
    }

    #[test]
    fn test_remove_group_reparents_children() {
        let mut db = db();
        let house = db.create_group("house", None).unwrap();
        let floor = db.create_group("floor", Some(house)).unwrap();
        let room = db.create_group("room", Some(floor)).unwrap();

        db.remove_group(floor).unwrap();
        assert_eq!(db.group(room).unwrap().parent, Some(house));
        // Freed address is reused.
        assert_eq!(db.allocate_group_address().unwrap(), floor);
    }
}
