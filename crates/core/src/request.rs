//! Request correlation.

/// Opaque identifier correlating a sent message with its TX-complete report.
///
/// The client stamps every `Action::Send` and `Action::SetDevKey` with a fresh
/// id; the transport echoes it back in `Event::TxComplete` once the message
/// has left the local device (or failed to).
///
/// # Example
///
/// ```ignore
/// // In the runner:
/// let result = transport.send(dst, key, &message).await;
/// client.handle(Event::TxComplete { request_id, success: result.is_ok() });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Create a new request ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}
