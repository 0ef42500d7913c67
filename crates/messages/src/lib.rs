//! Mesh messages exchanged by the provisioning client.
//!
//! The transport layer handles encryption and segmentation; these types are
//! the decoded payloads passed across the `Action`/`Event` boundary.

mod composition;
pub mod config;
pub mod model;
pub mod opcodes;
pub mod provisioning;
pub mod status;

// Re-export commonly used types
pub use composition::{encode_composition, parse_composition, CompositionError, MAX_ELEMENTS};
pub use config::{ConfigRequest, FilterType, ProxyFilterRequest};
pub use model::{ModelRequest, ModelStatus, Transition};
pub use provisioning::{
    AuthMethod, DeviceCapabilities, LinkReportStatus, ProvisionBearer, ProvisionFailure,
    ProvisionResult, ProvisioningData, UnprovisionedReport,
};
pub use status::{ConfigStatus, FeatureState, FilterStatus, StatusCode};
