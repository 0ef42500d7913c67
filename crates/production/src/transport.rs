//! The boundary to the mesh stack that encrypts, sends and receives.

use async_trait::async_trait;
use meshctl_core::{ConnectTarget, Event, OutboundMessage, SecurityKey};
use meshctl_messages::{AuthMethod, ProvisionBearer, ProvisioningData};
use meshctl_types::{Address, DeviceUuid, Key128};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Bearer busy")]
    Busy,

    #[error("Transport error: {0}")]
    Other(String),
}

/// Outbound half of the mesh stack.
///
/// Calls return once the request has left the local device (or failed to).
/// Everything the stack receives afterwards (status replies, link reports,
/// scan reports, sequence changes) is pushed through the [`EventSender`]
/// handed out by the runner.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Encrypt and send a message.
    async fn send(
        &self,
        dst: Address,
        key: SecurityKey,
        message: &OutboundMessage,
    ) -> Result<(), TransportError>;

    /// Install a node's device key.
    async fn set_dev_key(
        &self,
        unicast: Address,
        element_count: u8,
        key: Key128,
    ) -> Result<(), TransportError>;

    /// Start connecting to a proxy. The outcome arrives as
    /// `Event::LinkStatus`.
    async fn connect(&self, target: ConnectTarget) -> Result<(), TransportError>;

    /// Drop the proxy connection.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Start opening a provisioning link. The outcome arrives as
    /// `Event::ProvisionLinkReport`.
    async fn provision_connect(
        &self,
        uuid: DeviceUuid,
        bearer: ProvisionBearer,
        scanner: Address,
        identify_duration: u8,
    ) -> Result<(), TransportError>;

    /// Start the provisioning handshake on the open link.
    async fn provision_start(
        &self,
        auth: AuthMethod,
        data: &ProvisioningData,
    ) -> Result<(), TransportError>;

    /// Answer a static OOB request.
    async fn provision_set_oob(&self, oob: &[u8]) -> Result<(), TransportError>;

    /// Close the provisioning link.
    async fn provision_close(&self) -> Result<(), TransportError>;

    /// Start scanning on `scanner`.
    async fn scan_start(&self, scanner: Address) -> Result<(), TransportError>;

    /// Stop scanning on `scanner`.
    async fn scan_stop(&self, scanner: Address) -> Result<(), TransportError>;
}

/// Channel for inbound events from the transport.
#[derive(Debug, Clone)]
pub struct EventSender {
    pub(crate) tx: mpsc::UnboundedSender<crate::runner::Input>,
}

impl EventSender {
    /// Hand an event to the runner. Returns `false` once the runner stopped.
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(crate::runner::Input::Event(event)).is_ok()
    }
}
