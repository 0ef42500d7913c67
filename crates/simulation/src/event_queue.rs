//! Event ordering for the simulation queue.

use meshctl_core::Event;
use std::time::Duration;

/// Processing order of events scheduled for the same instant.
///
/// Reports from the local core come before over-the-air traffic, timers
/// fire last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventPriority {
    /// TX-complete, sequence and IV reports from the local core.
    Internal = 0,
    /// Replies, link changes and provisioning reports.
    Network = 1,
    /// Client timers.
    Timer = 2,
}

impl EventPriority {
    /// Priority of an event.
    pub fn of(event: &Event) -> Self {
        match event {
            Event::TxComplete { .. } | Event::SeqChanged { .. } | Event::IvIndexChanged { .. } => {
                EventPriority::Internal
            }
            Event::Timer(_) => EventPriority::Timer,
            _ => EventPriority::Network,
        }
    }
}

/// Key of a queued event. Ordered by time, then priority, then insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub sequence: u64,
}

impl EventKey {
    pub fn new(time: Duration, event: &Event, sequence: u64) -> Self {
        Self {
            time,
            priority: EventPriority::of(event),
            sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_core::{RequestId, TimerId};
    use std::collections::BTreeMap;

    #[test]
    fn test_same_instant_ordering() {
        let at = Duration::from_millis(10);
        let timer = Event::Timer(TimerId::RequestTimeout);
        let tx = Event::TxComplete {
            request_id: RequestId(1),
            success: true,
        };
        let link = Event::LinkStatus {
            connected: true,
            proxy: None,
        };

        let mut queue = BTreeMap::new();
        queue.insert(EventKey::new(at, &timer, 0), "timer");
        queue.insert(EventKey::new(at, &link, 1), "link");
        queue.insert(EventKey::new(at, &tx, 2), "tx");
        queue.insert(EventKey::new(Duration::from_millis(5), &timer, 3), "early");

        let order: Vec<_> = queue.values().copied().collect();
        assert_eq!(order, vec!["early", "tx", "link", "timer"]);
    }
}
