//! Deterministic simulation runner.
//!
//! This crate drives the provisioning client against an in-process mesh of
//! simulated devices. Given the same seed, it produces identical results
//! every run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationRunner                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Event Queue (BTreeMap<EventKey, Event>)        │ │
//! │  │     Ordered by: time, priority, sequence           │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     client: MeshClient                             │ │
//! │  │     Processes events sequentially                  │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Actions → SimulatedNetwork → schedule events   │ │
//! │  │     (devices, proxy link, provisioning bearer)     │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod device;
mod event_queue;
mod network;
mod runner;
mod storage;

pub use device::{DeviceModelState, SimulatedDevice};
pub use event_queue::{EventKey, EventPriority};
pub use network::{provisioner_composition, NetworkConfig, SimulatedNetwork};
pub use runner::{SimulationError, SimulationRunner, SimulationStats};
pub use storage::{SimStorage, StorageError};
