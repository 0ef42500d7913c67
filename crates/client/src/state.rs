//! Client states.

use meshctl_types::KeyRefreshPhase;

/// State of the provisioning client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Opening a provisioning link.
    Connecting,
    /// Provisioning handshake.
    Provisioning,
    /// Waiting for a PB-GATT provisioning link to close.
    ProvisionDisconnecting,
    /// Connecting to a freshly provisioned node by node identity.
    NodeConnecting,
    /// Reading a new node's composition.
    GetRemoteCompositionData,
    /// Initial configuration of a node (or of the local device at open).
    Configuration,
    /// Changing configuration of provisioned nodes.
    Reconfiguration,
    /// Dropping the proxy connection to a node that failed configuration.
    ConfigureDisconnecting,
    /// Connecting to any proxy of the network.
    NetworkConnect,
    /// Dropping the current proxy before connecting to a specific node.
    NodeIdentityDisconnecting,
    /// Connecting to a specific node by node identity.
    NodeIdentityConnecting,
    /// Falling back to any proxy after a node could not be reached.
    NodeIdentityReconnecting,
    /// Key refresh: distributing new keys.
    KeyRefresh1,
    /// Key refresh: switching nodes to the new keys.
    KeyRefresh2,
    /// Key refresh: revoking old keys.
    KeyRefresh3,
}

impl ClientState {
    /// Name of the state.
    pub fn name(self) -> &'static str {
        match self {
            ClientState::Idle => "Idle",
            ClientState::Connecting => "Connecting",
            ClientState::Provisioning => "Provisioning",
            ClientState::ProvisionDisconnecting => "ProvisionDisconnecting",
            ClientState::NodeConnecting => "NodeConnecting",
            ClientState::GetRemoteCompositionData => "GetRemoteCompositionData",
            ClientState::Configuration => "Configuration",
            ClientState::Reconfiguration => "Reconfiguration",
            ClientState::ConfigureDisconnecting => "ConfigureDisconnecting",
            ClientState::NetworkConnect => "NetworkConnect",
            ClientState::NodeIdentityDisconnecting => "NodeIdentityDisconnecting",
            ClientState::NodeIdentityConnecting => "NodeIdentityConnecting",
            ClientState::NodeIdentityReconnecting => "NodeIdentityReconnecting",
            ClientState::KeyRefresh1 => "KeyRefresh1",
            ClientState::KeyRefresh2 => "KeyRefresh2",
            ClientState::KeyRefresh3 => "KeyRefresh3",
        }
    }

    /// States owned by a provisioning attempt.
    pub fn is_provisioning(self) -> bool {
        matches!(
            self,
            ClientState::Connecting
                | ClientState::Provisioning
                | ClientState::ProvisionDisconnecting
                | ClientState::NodeConnecting
                | ClientState::GetRemoteCompositionData
        )
    }

    /// Key refresh states.
    pub fn is_key_refresh(self) -> bool {
        matches!(
            self,
            ClientState::KeyRefresh1 | ClientState::KeyRefresh2 | ClientState::KeyRefresh3
        )
    }

    /// States waiting for a proxy connection to open.
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ClientState::NetworkConnect
                | ClientState::NodeConnecting
                | ClientState::NodeIdentityConnecting
                | ClientState::NodeIdentityReconnecting
        )
    }

    /// Key refresh state driving a network key towards `phase`.
    pub fn for_key_refresh_phase(phase: KeyRefreshPhase) -> Self {
        match phase {
            KeyRefreshPhase::Normal | KeyRefreshPhase::First => ClientState::KeyRefresh1,
            KeyRefreshPhase::Second => ClientState::KeyRefresh2,
            KeyRefreshPhase::Third => ClientState::KeyRefresh3,
        }
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
