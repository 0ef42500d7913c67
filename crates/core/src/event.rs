//! Inbound events.

use crate::{RequestId, TimerId};
use meshctl_messages::{
    ConfigStatus, DeviceCapabilities, FilterStatus, LinkReportStatus, ModelStatus,
    ProvisionResult, UnprovisionedReport,
};
use meshctl_types::Address;

/// Everything the transport, the local core and the timers report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// A timer set through `Action::SetTimer` fired.
    Timer(TimerId),

    // ═══════════════════════════════════════════════════════════════════════
    // Proxy link and messages
    // ═══════════════════════════════════════════════════════════════════════
    /// Proxy connection state changed.
    LinkStatus {
        connected: bool,
        /// Unicast address of the proxy node, when known.
        proxy: Option<Address>,
    },

    /// A message (or a local device-key set) left the device, or failed to.
    TxComplete { request_id: RequestId, success: bool },

    /// Configuration Server reply.
    ConfigStatus { src: Address, status: ConfigStatus },

    /// Application model status.
    ModelStatus { src: Address, status: ModelStatus },

    /// Proxy filter status from the connected proxy.
    ProxyFilterStatus { src: Address, status: FilterStatus },

    // ═══════════════════════════════════════════════════════════════════════
    // Provisioning
    // ═══════════════════════════════════════════════════════════════════════
    /// Provisioning link state.
    ProvisionLinkReport(LinkReportStatus),

    /// Device capabilities received.
    ProvisionCapabilities(DeviceCapabilities),

    /// The handshake asks for static OOB data.
    ProvisionGetOob,

    /// Handshake finished.
    ProvisionEnd(ProvisionResult),

    // ═══════════════════════════════════════════════════════════════════════
    // Scanning
    // ═══════════════════════════════════════════════════════════════════════
    /// A scanner reported its capabilities.
    ScanCapabilities { src: Address, max_items: u8 },

    /// A scanner started or stopped scanning.
    ScanStatus {
        src: Address,
        status: u8,
        scanning: bool,
    },

    /// An unprovisioned device was heard.
    UnprovisionedReport(UnprovisionedReport),

    // ═══════════════════════════════════════════════════════════════════════
    // Local core
    // ═══════════════════════════════════════════════════════════════════════
    /// A message from `src` was accepted with sequence number `seq`.
    SeqChanged {
        src: Address,
        seq: u32,
        previous_iv: bool,
    },

    /// The IV index changed.
    IvIndexChanged {
        iv_index: u32,
        update_in_progress: bool,
    },
}

impl Event {
    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::Timer(_) => "Timer",
            Event::LinkStatus { .. } => "LinkStatus",
            Event::TxComplete { .. } => "TxComplete",
            Event::ConfigStatus { .. } => "ConfigStatus",
            Event::ModelStatus { .. } => "ModelStatus",
            Event::ProxyFilterStatus { .. } => "ProxyFilterStatus",
            Event::ProvisionLinkReport(_) => "ProvisionLinkReport",
            Event::ProvisionCapabilities(_) => "ProvisionCapabilities",
            Event::ProvisionGetOob => "ProvisionGetOob",
            Event::ProvisionEnd(_) => "ProvisionEnd",
            Event::ScanCapabilities { .. } => "ScanCapabilities",
            Event::ScanStatus { .. } => "ScanStatus",
            Event::UnprovisionedReport(_) => "UnprovisionedReport",
            Event::SeqChanged { .. } => "SeqChanged",
            Event::IvIndexChanged { .. } => "IvIndexChanged",
        }
    }
}
