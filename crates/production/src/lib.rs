//! Production runner for the mesh provisioning client.
//!
//! - [`runner`]: tokio event loop executing client actions
//! - [`transport`]: the [`Transport`] trait a mesh stack implements
//! - [`storage`]: [`MeshStorage`] and the JSON [`FileStorage`]
//! - [`config`]: TOML configuration
//! - [`telemetry`]: tracing subscriber setup

pub mod config;
pub mod runner;
pub mod storage;
pub mod telemetry;
pub mod transport;

pub use config::{ConfigError, MeshctlConfig};
pub use runner::{ProductionRunner, RunnerError, RunnerHandle, RunnerStats};
pub use storage::{FileStorage, MeshStorage, StorageError};
pub use transport::{EventSender, Transport, TransportError};
