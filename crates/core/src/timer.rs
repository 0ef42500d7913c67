//! Timer identifiers.

/// Timers the client arms through `Action::SetTimer`.
///
/// Setting a timer that is already armed replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    /// Send the head of the pending queue. Armed with zero delay so a batch
    /// of queued operations is sent after the current event completes.
    ExecutePending,

    /// No reply to the in-flight operation; retransmit or give up.
    RequestTimeout,

    /// Provisioning link did not open in time.
    ProvisionLink,

    /// Proxy connection (network or node identity) did not open in time.
    Connect,
}
