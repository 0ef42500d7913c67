//! Core types for the mesh provisioning client.
//!
//! This crate provides the foundational types used throughout the client:
//!
//! - **Identifiers**: addresses, key indexes, device UUIDs, model ids
//! - **Keys**: 128-bit key material and key-refresh phases
//! - **Composition**: device composition data as reported by nodes
//! - **Models**: SIG model ids and their configuration classification
//! - **Database**: nodes, elements, models, keys, groups and their queries
//! - **Replay protection**: per-source sequence tracking and its record codec

mod composition;
pub mod db;
mod identifiers;
mod keys;
pub mod models;
pub mod replay;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use composition::{CompositionData, ElementComposition, Features};
pub use db::{
    AppKey, DbError, Element, Group, MeshDb, Model, NetKey, Node, NodeAppKey, NodeConfigState,
    NodeNetKey, Provisioner, Publication, RelayConfig, Retransmit, SensorProperty,
};
pub use identifiers::{Address, AppKeyIndex, DeviceUuid, ModelId, NetKeyIndex};
pub use keys::{Key128, KeyRefreshPhase};
pub use models::{classify, is_core_model, ModelClass, ModelRole};
pub use replay::{IvState, ReplayCodecError, ReplayEntry, ReplayList};
