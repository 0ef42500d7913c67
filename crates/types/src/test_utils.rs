//! Fixtures for tests.

use crate::{
    Address, AppKeyIndex, DeviceUuid, Element, Key128, KeyRefreshPhase, MeshDb, Model, ModelId,
    NetKeyIndex, Node, NodeNetKey,
};

/// Name of the local provisioner in [`test_db`].
pub const TEST_PROVISIONER: &str = "phone";

/// Deterministic key whose bytes are all `seed`.
pub fn test_key(seed: u8) -> Key128 {
    Key128::from_bytes([seed; 16])
}

/// Deterministic UUID whose bytes are all `seed`.
pub fn test_uuid(seed: u8) -> DeviceUuid {
    DeviceUuid::from_bytes([seed; 16])
}

/// Network "home" with one local element at 0x0001.
pub fn test_db() -> MeshDb {
    MeshDb::new(
        "home",
        TEST_PROVISIONER,
        test_uuid(0xAA),
        1,
        test_key(1),
        test_key(2),
        test_key(3),
    )
}

/// A configured node holding the primary network key and application key 0,
/// with one model per element.
pub fn test_node(seed: u8, unicast: u16, models: &[&[ModelId]]) -> Node {
    let mut node = Node::new(
        test_uuid(seed),
        format!("node-{}", seed),
        Address(unicast),
        models.len().max(1) as u8,
        test_key(seed),
        NodeNetKey {
            index: NetKeyIndex::PRIMARY,
            phase: KeyRefreshPhase::Normal,
        },
    );
    node.add_app_key(AppKeyIndex(0), KeyRefreshPhase::Normal);
    for (element, ids) in node.elements.iter_mut().zip(models.iter()) {
        element.models = ids.iter().map(|id| Model::new(*id)).collect();
    }
    node.config_complete = true;
    node
}

/// Element lookup that panics with a readable message.
pub fn element<'a>(db: &'a MeshDb, name: &str) -> &'a Element {
    db.element_by_name(name)
        .unwrap_or_else(|| panic!("no element named {}", name))
}
