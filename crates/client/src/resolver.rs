//! Name resolution over the network database.
//!
//! Applications address nodes, elements and groups by name. Node names and
//! primary element names usually coincide; groups win over both.

use meshctl_types::{Address, Element, MeshDb, ModelId, Node};

/// What a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Group(Address),
    Node(Address),
    Element(Address),
}

impl Target {
    pub fn address(self) -> Address {
        match self {
            Target::Group(a) | Target::Node(a) | Target::Element(a) => a,
        }
    }
}

/// Resolve a name to a group, node or element.
pub fn resolve(db: &MeshDb, name: &str) -> Option<Target> {
    if let Some(group) = db.group_by_name(name) {
        return Some(Target::Group(group.address));
    }
    if let Some(node) = db.node_by_name(name) {
        return Some(Target::Node(node.unicast));
    }
    db.element_by_name(name).map(|e| Target::Element(e.address))
}

/// Node named `name`, or owning the element named `name`.
pub fn node_for_name<'a>(db: &'a MeshDb, name: &str) -> Option<&'a Node> {
    db.node_by_name(name)
        .or_else(|| db.node(db.element_by_name(name)?.address))
}

/// Elements of non-blocked nodes with any model subscribed to `group`.
///
/// For the all-nodes address every element of every non-blocked node counts.
pub fn group_members(db: &MeshDb, group: Address) -> Vec<Address> {
    db.nodes
        .iter()
        .filter(|n| !n.blocked)
        .flat_map(|n| n.elements.iter())
        .filter(|e| group == Address::ALL_NODES || e.models.iter().any(|m| m.is_subscribed(group)))
        .map(|e| e.address)
        .collect()
}

/// First element of a node carrying `model`.
pub fn element_with_model(node: &Node, model: ModelId) -> Option<&Element> {
    node.elements.iter().find(|e| e.has_model(model))
}

/// Destination for a message to a model named by `name`.
///
/// A group with exactly one member resolves to that member so the message can
/// be acknowledged.
pub fn model_destination(db: &MeshDb, name: &str, model: ModelId) -> Option<Address> {
    match resolve(db, name)? {
        Target::Group(group) => {
            let members: Vec<Address> = group_members(db, group)
                .into_iter()
                .filter(|a| db.element(*a).map(|e| e.has_model(model)).unwrap_or(false))
                .collect();
            match members.as_slice() {
                [only] => Some(*only),
                _ => Some(group),
            }
        }
        Target::Node(unicast) => {
            let node = db.node(unicast)?;
            element_with_model(node, model).map(|e| e.address)
        }
        Target::Element(address) => db
            .element(address)
            .filter(|e| e.has_model(model))
            .map(|e| e.address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_test_helpers::{test_db, test_node};
    use meshctl_types::models::{GENERIC_LEVEL_SERVER, GENERIC_ONOFF_SERVER};

    fn db() -> MeshDb {
        let mut db = test_db();
        let kitchen = db.create_group("kitchen", None).unwrap();
        let mut lamp = test_node(
            5,
            0x0010,
            &[
                &[ModelId::Sig(GENERIC_ONOFF_SERVER)],
                &[ModelId::Sig(GENERIC_LEVEL_SERVER)],
            ],
        );
        lamp.elements[0].models[0].subscribe(kitchen);
        db.add_node(lamp);
        db.add_node(test_node(6, 0x0020, &[&[ModelId::Sig(GENERIC_ONOFF_SERVER)]]));
        db
    }

    #[test]
    fn test_resolve_order() {
        let db = db();
        assert_eq!(resolve(&db, "kitchen"), Some(Target::Group(Address(0xC000))));
        assert_eq!(resolve(&db, "node-5"), Some(Target::Node(Address(0x0010))));
        assert_eq!(resolve(&db, "node-5 #2"), Some(Target::Element(Address(0x0011))));
        assert_eq!(resolve(&db, "garage"), None);
    }

    #[test]
    fn test_node_for_element_name() {
        let db = db();
        assert_eq!(node_for_name(&db, "node-5 #2").unwrap().unicast, Address(0x0010));
    }

    #[test]
    fn test_single_member_group_redirects() {
        let db = db();
        let onoff = ModelId::Sig(GENERIC_ONOFF_SERVER);
        assert_eq!(model_destination(&db, "kitchen", onoff), Some(Address(0x0010)));
        assert_eq!(
            model_destination(&db, "node-5", ModelId::Sig(GENERIC_LEVEL_SERVER)),
            Some(Address(0x0011))
        );
        assert_eq!(model_destination(&db, "node-5 #2", onoff), None);
    }

    #[test]
    fn test_all_nodes_members() {
        let db = db();
        // Local device, two lamp elements, one more lamp.
        assert_eq!(group_members(&db, Address::ALL_NODES).len(), 4);
    }
}
