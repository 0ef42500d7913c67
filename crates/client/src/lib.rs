//! Mesh provisioning client state machine.
//!
//! This crate provides a synchronous orchestrator for a mesh network that
//! can be driven by both the simulation and the production runner.
//!
//! # Architecture
//!
//! The client processes events synchronously:
//!
//! - `Event::UnprovisionedReport` → Record the best report per device
//! - `Event::ProvisionCapabilities` → Allocate addresses, start the handshake
//! - `Event::ProvisionEnd` → Create the node, queue composition retrieval
//! - `Event::ConfigStatus` → Match the queue head, record the change, send the next
//! - `Event::Timer(RequestTimeout)` → Retransmit, or treat the node as unreachable
//! - `Event::LinkStatus` → Resume or fail work that needs the proxy link
//!
//! Configuration requests go through a FIFO queue with exactly one request in
//! flight. Application operations (`provision`, `set_device_config`,
//! `reset_node`, ...) validate their arguments, fill the queue and return the
//! first actions. All I/O is performed by the runner via returned `Action`s.

mod client;
mod config;
mod configuration;
mod device_config;
mod error;
mod groups;
mod key_refresh;
mod model_ops;
mod network;
mod pending;
mod provisioning;
pub mod resolver;
mod state;

#[cfg(test)]
mod test_support;

pub use client::MeshClient;
pub use config::{ClientConfig, DeviceConfig, PublicationConfig};
pub use error::MeshClientError;
pub use pending::{OpId, PendingKind, PendingOperation, PendingQueue};
pub use resolver::Target;
pub use state::ClientState;
