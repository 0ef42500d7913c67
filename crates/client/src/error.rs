//! Error types for client operations.

use meshctl_types::DbError;
use thiserror::Error;

/// Errors returned by application operations.
///
/// Operations validate their arguments and the client state before emitting
/// any message, so an error means nothing was sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeshClientError {
    /// No network is open.
    #[error("Network is not open")]
    NetworkClosed,

    /// The operation needs a proxy connection.
    #[error("Not connected to the network")]
    NotConnected,

    /// Named node, element, group, key or device does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Arguments are malformed or refer to something that cannot be used.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// The client is busy with another procedure.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Name is already used by a node, element or group.
    #[error("Name already in use: {0}")]
    DuplicateName(String),

    /// No address range available.
    #[error("Out of addresses")]
    NoMemory,

    /// Requested authentication method is not available.
    #[error("Method not available")]
    MethodNotAvailable,

    /// The network database is inconsistent.
    #[error("Network database error: {0}")]
    NetworkDbError(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<DbError> for MeshClientError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::AddressSpaceExhausted => MeshClientError::NoMemory,
            DbError::DuplicateName(name) => MeshClientError::DuplicateName(name),
            DbError::GroupNotFound(addr) => MeshClientError::NotFound(format!("group {}", addr)),
            DbError::NodeNotFound(addr) => MeshClientError::NotFound(format!("node {}", addr)),
            DbError::UnknownNetKey(index) => MeshClientError::NotFound(index.to_string()),
            DbError::InvalidElementCount(n) => {
                MeshClientError::InvalidArgs(format!("element count {}", n))
            }
        }
    }
}
