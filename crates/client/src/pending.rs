//! Pending-operation queue.
//!
//! Configuration requests are executed strictly one at a time. The head of
//! the queue is the only operation that may be in flight; a reply is accepted
//! only when it comes from the head's destination and carries the head's
//! discriminator (key index, element and model, property id, ...).

use meshctl_core::{OutboundMessage, RequestId, SecurityKey};
use meshctl_messages::{ConfigRequest, ConfigStatus, ModelRequest, ModelStatus, ProxyFilterRequest};
use meshctl_types::{
    Address, AppKeyIndex, Key128, ModelId, NetKeyIndex, Publication, RelayConfig, Retransmit,
};
use std::collections::VecDeque;

/// Identifier of a queued operation, unique for the client's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u64);

/// What a pending operation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    /// Install a device key in the local core.
    DevKeySet {
        unicast: Address,
        element_count: u8,
        key: Key128,
    },
    CompositionGet {
        page: u8,
    },
    NetKeyAdd {
        index: NetKeyIndex,
        key: Key128,
    },
    NetKeyUpdate {
        index: NetKeyIndex,
        key: Key128,
    },
    AppKeyAdd {
        net_index: NetKeyIndex,
        app_index: AppKeyIndex,
        key: Key128,
    },
    AppKeyUpdate {
        net_index: NetKeyIndex,
        app_index: AppKeyIndex,
        key: Key128,
    },
    ModelAppBind {
        element: Address,
        app_index: AppKeyIndex,
        model: ModelId,
    },
    SubscriptionAdd {
        element: Address,
        address: Address,
        model: ModelId,
    },
    SubscriptionDelete {
        element: Address,
        address: Address,
        model: ModelId,
    },
    SubscriptionDeleteAll {
        element: Address,
        model: ModelId,
    },
    PublicationSet {
        element: Address,
        model: ModelId,
        publication: Publication,
    },
    NetworkTransmitSet(Retransmit),
    DefaultTtlSet(u8),
    RelaySet(RelayConfig),
    GattProxySet(bool),
    FriendSet(bool),
    BeaconSet(bool),
    NodeReset,
    KeyRefreshPhaseSet {
        net_index: NetKeyIndex,
        transition: u8,
    },
    ProxyFilterAdd(Vec<Address>),
    ProxyFilterDelete(Vec<Address>),
    SensorDescriptorGet {
        app_key: AppKeyIndex,
    },
    SensorSettingsGet {
        app_key: AppKeyIndex,
        property: u16,
    },
    SensorCadenceGet {
        app_key: AppKeyIndex,
        property: u16,
    },
}

impl PendingKind {
    /// Name for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            PendingKind::DevKeySet { .. } => "DevKeySet",
            PendingKind::CompositionGet { .. } => "CompositionGet",
            PendingKind::NetKeyAdd { .. } => "NetKeyAdd",
            PendingKind::NetKeyUpdate { .. } => "NetKeyUpdate",
            PendingKind::AppKeyAdd { .. } => "AppKeyAdd",
            PendingKind::AppKeyUpdate { .. } => "AppKeyUpdate",
            PendingKind::ModelAppBind { .. } => "ModelAppBind",
            PendingKind::SubscriptionAdd { .. } => "SubscriptionAdd",
            PendingKind::SubscriptionDelete { .. } => "SubscriptionDelete",
            PendingKind::SubscriptionDeleteAll { .. } => "SubscriptionDeleteAll",
            PendingKind::PublicationSet { .. } => "PublicationSet",
            PendingKind::NetworkTransmitSet(_) => "NetworkTransmitSet",
            PendingKind::DefaultTtlSet(_) => "DefaultTtlSet",
            PendingKind::RelaySet(_) => "RelaySet",
            PendingKind::GattProxySet(_) => "GattProxySet",
            PendingKind::FriendSet(_) => "FriendSet",
            PendingKind::BeaconSet(_) => "BeaconSet",
            PendingKind::NodeReset => "NodeReset",
            PendingKind::KeyRefreshPhaseSet { .. } => "KeyRefreshPhaseSet",
            PendingKind::ProxyFilterAdd(_) => "ProxyFilterAdd",
            PendingKind::ProxyFilterDelete(_) => "ProxyFilterDelete",
            PendingKind::SensorDescriptorGet { .. } => "SensorDescriptorGet",
            PendingKind::SensorSettingsGet { .. } => "SensorSettingsGet",
            PendingKind::SensorCadenceGet { .. } => "SensorCadenceGet",
        }
    }

    /// Whether the operation is finished by its TX-complete report rather
    /// than a status reply.
    ///
    /// Commands to the local device are processed by the local core as they
    /// are sent; only reads that return data wait for a reply.
    pub fn completes_on_tx(&self, local_dst: bool) -> bool {
        match self {
            PendingKind::DevKeySet { .. } => true,
            PendingKind::CompositionGet { .. }
            | PendingKind::SensorDescriptorGet { .. }
            | PendingKind::SensorSettingsGet { .. }
            | PendingKind::SensorCadenceGet { .. } => false,
            _ => local_dst,
        }
    }

    /// Whether confirming the operation changes the network database.
    pub fn records_state(&self) -> bool {
        !matches!(
            self,
            PendingKind::DevKeySet { .. }
                | PendingKind::CompositionGet { .. }
                | PendingKind::ProxyFilterAdd(_)
                | PendingKind::ProxyFilterDelete(_)
                | PendingKind::NodeReset
        )
    }

    /// The message to send, with its security key. `None` for local-only
    /// operations.
    pub fn to_message(&self) -> Option<(SecurityKey, OutboundMessage)> {
        let config = |req| Some((SecurityKey::Device, OutboundMessage::Config(req)));
        let model = |key, req| Some((SecurityKey::App(key), OutboundMessage::Model(req)));
        match self {
            PendingKind::DevKeySet { .. } => None,
            PendingKind::CompositionGet { page } => {
                config(ConfigRequest::CompositionDataGet { page: *page })
            }
            PendingKind::NetKeyAdd { index, key } => config(ConfigRequest::NetKeyAdd {
                index: *index,
                key: *key,
            }),
            PendingKind::NetKeyUpdate { index, key } => config(ConfigRequest::NetKeyUpdate {
                index: *index,
                key: *key,
            }),
            PendingKind::AppKeyAdd {
                net_index,
                app_index,
                key,
            } => config(ConfigRequest::AppKeyAdd {
                net_index: *net_index,
                app_index: *app_index,
                key: *key,
            }),
            PendingKind::AppKeyUpdate {
                net_index,
                app_index,
                key,
            } => config(ConfigRequest::AppKeyUpdate {
                net_index: *net_index,
                app_index: *app_index,
                key: *key,
            }),
            PendingKind::ModelAppBind {
                element,
                app_index,
                model,
            } => config(ConfigRequest::ModelAppBind {
                element: *element,
                app_index: *app_index,
                model: *model,
            }),
            PendingKind::SubscriptionAdd {
                element,
                address,
                model,
            } => config(ConfigRequest::ModelSubscriptionAdd {
                element: *element,
                address: *address,
                model: *model,
            }),
            PendingKind::SubscriptionDelete {
                element,
                address,
                model,
            } => config(ConfigRequest::ModelSubscriptionDelete {
                element: *element,
                address: *address,
                model: *model,
            }),
            PendingKind::SubscriptionDeleteAll { element, model } => {
                config(ConfigRequest::ModelSubscriptionDeleteAll {
                    element: *element,
                    model: *model,
                })
            }
            PendingKind::PublicationSet {
                element,
                model,
                publication,
            } => config(ConfigRequest::ModelPublicationSet {
                element: *element,
                model: *model,
                publication: *publication,
            }),
            PendingKind::NetworkTransmitSet(rt) => config(ConfigRequest::NetworkTransmitSet(*rt)),
            PendingKind::DefaultTtlSet(ttl) => config(ConfigRequest::DefaultTtlSet(*ttl)),
            PendingKind::RelaySet(relay) => config(ConfigRequest::RelaySet {
                enabled: relay.enabled,
                retransmit: relay.retransmit,
            }),
            PendingKind::GattProxySet(on) => config(ConfigRequest::GattProxySet(*on)),
            PendingKind::FriendSet(on) => config(ConfigRequest::FriendSet(*on)),
            PendingKind::BeaconSet(on) => config(ConfigRequest::BeaconSet(*on)),
            PendingKind::NodeReset => config(ConfigRequest::NodeReset),
            PendingKind::KeyRefreshPhaseSet {
                net_index,
                transition,
            } => config(ConfigRequest::KeyRefreshPhaseSet {
                net_index: *net_index,
                transition: *transition,
            }),
            PendingKind::ProxyFilterAdd(addrs) => Some((
                SecurityKey::Network,
                OutboundMessage::ProxyFilter(ProxyFilterRequest::AddAddresses(addrs.clone())),
            )),
            PendingKind::ProxyFilterDelete(addrs) => Some((
                SecurityKey::Network,
                OutboundMessage::ProxyFilter(ProxyFilterRequest::RemoveAddresses(addrs.clone())),
            )),
            PendingKind::SensorDescriptorGet { app_key } => {
                model(*app_key, ModelRequest::SensorDescriptorGet { property: None })
            }
            PendingKind::SensorSettingsGet { app_key, property } => model(
                *app_key,
                ModelRequest::SensorSettingsGet {
                    property: *property,
                },
            ),
            PendingKind::SensorCadenceGet { app_key, property } => model(
                *app_key,
                ModelRequest::SensorCadenceGet {
                    property: *property,
                },
            ),
        }
    }

    /// Whether a configuration reply answers this operation.
    pub fn matches_config(&self, status: &ConfigStatus) -> bool {
        match (self, status) {
            (PendingKind::CompositionGet { page }, ConfigStatus::CompositionData { page: p, .. }) => {
                page == p
            }
            (
                PendingKind::NetKeyAdd { index, .. } | PendingKind::NetKeyUpdate { index, .. },
                ConfigStatus::NetKey { index: i, .. },
            ) => index == i,
            (
                PendingKind::AppKeyAdd { app_index, .. }
                | PendingKind::AppKeyUpdate { app_index, .. },
                ConfigStatus::AppKey { app_index: a, .. },
            ) => app_index == a,
            (
                PendingKind::ModelAppBind {
                    element,
                    app_index,
                    model,
                },
                ConfigStatus::ModelApp {
                    element: e,
                    app_index: a,
                    model: m,
                    ..
                },
            ) => element == e && app_index == a && model == m,
            (
                PendingKind::SubscriptionAdd {
                    element,
                    address,
                    model,
                }
                | PendingKind::SubscriptionDelete {
                    element,
                    address,
                    model,
                },
                ConfigStatus::ModelSubscription {
                    element: e,
                    address: a,
                    model: m,
                    ..
                },
            ) => element == e && address == a && model == m,
            (
                PendingKind::SubscriptionDeleteAll { element, model },
                ConfigStatus::ModelSubscription {
                    element: e,
                    model: m,
                    ..
                },
            ) => element == e && model == m,
            (
                PendingKind::PublicationSet { element, model, .. },
                ConfigStatus::ModelPublication {
                    element: e,
                    model: m,
                    ..
                },
            ) => element == e && model == m,
            (
                PendingKind::KeyRefreshPhaseSet { net_index, .. },
                ConfigStatus::KeyRefreshPhase { net_index: n, .. },
            ) => net_index == n,
            (PendingKind::NetworkTransmitSet(_), ConfigStatus::NetworkTransmit(_))
            | (PendingKind::DefaultTtlSet(_), ConfigStatus::DefaultTtl(_))
            | (PendingKind::RelaySet(_), ConfigStatus::Relay { .. })
            | (PendingKind::GattProxySet(_), ConfigStatus::GattProxy(_))
            | (PendingKind::FriendSet(_), ConfigStatus::Friend(_))
            | (PendingKind::BeaconSet(_), ConfigStatus::Beacon(_))
            | (PendingKind::NodeReset, ConfigStatus::NodeReset) => true,
            _ => false,
        }
    }

    /// Whether a model status answers this operation.
    pub fn matches_model(&self, status: &ModelStatus) -> bool {
        match (self, status) {
            (PendingKind::SensorDescriptorGet { .. }, ModelStatus::SensorDescriptor { .. }) => true,
            (
                PendingKind::SensorSettingsGet { property, .. },
                ModelStatus::SensorSettings { property: p, .. },
            )
            | (
                PendingKind::SensorCadenceGet { property, .. },
                ModelStatus::SensorCadence { property: p, .. },
            ) => property == p,
            _ => false,
        }
    }

    /// Whether this is a proxy filter operation.
    pub fn is_proxy_filter(&self) -> bool {
        matches!(
            self,
            PendingKind::ProxyFilterAdd(_) | PendingKind::ProxyFilterDelete(_)
        )
    }
}

/// A queued configuration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub id: OpId,
    pub kind: PendingKind,
    /// Destination: a node's primary address, an element address for sensor
    /// reads, or the local address for local commands.
    pub dst: Address,
    /// Set while the operation is in flight.
    pub request: Option<RequestId>,
    /// Transmissions so far.
    pub attempts: u32,
}

/// FIFO of pending operations.
#[derive(Debug, Default)]
pub struct PendingQueue {
    ops: VecDeque<PendingOperation>,
    next_id: u64,
}

impl PendingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation.
    pub fn push(&mut self, dst: Address, kind: PendingKind) -> OpId {
        let id = OpId(self.next_id);
        self.next_id += 1;
        self.ops.push_back(PendingOperation {
            id,
            kind,
            dst,
            request: None,
            attempts: 0,
        });
        id
    }

    pub fn front(&self) -> Option<&PendingOperation> {
        self.ops.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut PendingOperation> {
        self.ops.front_mut()
    }

    pub fn pop_front(&mut self) -> Option<PendingOperation> {
        self.ops.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOperation> {
        self.ops.iter()
    }

    /// Drop every operation.
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Request id of the in-flight head, if any.
    pub fn in_flight(&self) -> Option<RequestId> {
        self.ops.front().and_then(|op| op.request)
    }

    /// Whether the in-flight head was sent with `request_id`.
    pub fn head_is(&self, request_id: RequestId) -> bool {
        self.in_flight() == Some(request_id)
    }

    /// Mark the head as not sent, so it is transmitted again.
    pub fn reset_head(&mut self) {
        if let Some(head) = self.ops.front_mut() {
            head.request = None;
        }
    }

    /// Whether a configuration reply from `src` answers the in-flight head.
    pub fn head_matches_config(&self, src: Address, status: &ConfigStatus) -> bool {
        self.ops
            .front()
            .map(|op| op.request.is_some() && op.dst == src && op.kind.matches_config(status))
            .unwrap_or(false)
    }

    /// Whether a model status from `src` answers the in-flight head.
    pub fn head_matches_model(&self, src: Address, status: &ModelStatus) -> bool {
        self.ops
            .front()
            .map(|op| op.request.is_some() && op.dst == src && op.kind.matches_model(status))
            .unwrap_or(false)
    }

    /// Whether a proxy filter status from `src` answers the in-flight head.
    pub fn head_matches_filter(&self, src: Address) -> bool {
        self.ops
            .front()
            .map(|op| op.request.is_some() && op.dst == src && op.kind.is_proxy_filter())
            .unwrap_or(false)
    }

    /// Remove every operation addressed to `[first, last]`.
    ///
    /// Returns the number of removed operations.
    pub fn purge_range(&mut self, first: Address, last: Address) -> usize {
        let before = self.ops.len();
        self.ops.retain(|op| op.dst < first || op.dst > last);
        before - self.ops.len()
    }

    /// Whether any operation is addressed to `[first, last]`.
    pub fn has_ops_for(&self, first: Address, last: Address) -> bool {
        self.ops.iter().any(|op| op.dst >= first && op.dst <= last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_messages::StatusCode;

    fn bind(element: u16, model: u16) -> PendingKind {
        PendingKind::ModelAppBind {
            element: Address(element),
            app_index: AppKeyIndex(0),
            model: ModelId::Sig(model),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut q = PendingQueue::new();
        let a = q.push(Address(2), PendingKind::DefaultTtlSet(5));
        let b = q.push(Address(2), PendingKind::BeaconSet(true));
        assert!(a < b);
        assert_eq!(q.pop_front().unwrap().id, a);
        assert_eq!(q.pop_front().unwrap().id, b);
        assert!(q.is_empty());
    }

    #[test]
    fn test_reply_matches_only_in_flight_head() {
        let mut q = PendingQueue::new();
        q.push(Address(2), bind(2, 0x1000));
        let reply = ConfigStatus::ModelApp {
            status: StatusCode::SUCCESS,
            element: Address(2),
            app_index: AppKeyIndex(0),
            model: ModelId::Sig(0x1000),
        };
        // Not sent yet.
        assert!(!q.head_matches_config(Address(2), &reply));

        q.front_mut().unwrap().request = Some(RequestId(1));
        assert!(q.head_matches_config(Address(2), &reply));
        // Wrong source.
        assert!(!q.head_matches_config(Address(3), &reply));
    }

    #[test]
    fn test_stale_reply_does_not_match() {
        let mut q = PendingQueue::new();
        q.push(Address(2), bind(2, 0x1002));
        q.front_mut().unwrap().request = Some(RequestId(7));
        // Reply for a bind that was already answered.
        let stale = ConfigStatus::ModelApp {
            status: StatusCode::SUCCESS,
            element: Address(2),
            app_index: AppKeyIndex(0),
            model: ModelId::Sig(0x1000),
        };
        assert!(!q.head_matches_config(Address(2), &stale));
        assert!(!q.head_matches_config(Address(2), &ConfigStatus::DefaultTtl(5)));
    }

    #[test]
    fn test_purge_range_keeps_other_nodes() {
        let mut q = PendingQueue::new();
        q.push(Address(2), PendingKind::NodeReset);
        q.push(Address(3), PendingKind::DefaultTtlSet(5));
        q.push(Address(5), PendingKind::DefaultTtlSet(5));
        q.push(Address(4), PendingKind::DefaultTtlSet(5));
        assert_eq!(q.purge_range(Address(3), Address(4)), 2);
        let left: Vec<Address> = q.iter().map(|op| op.dst).collect();
        assert_eq!(left, vec![Address(2), Address(5)]);
        assert!(!q.has_ops_for(Address(3), Address(4)));
    }

    #[test]
    fn test_local_commands_complete_on_tx() {
        let ttl = PendingKind::DefaultTtlSet(5);
        assert!(ttl.completes_on_tx(true));
        assert!(!ttl.completes_on_tx(false));
        assert!(!PendingKind::CompositionGet { page: 0 }.completes_on_tx(true));
        let devkey = PendingKind::DevKeySet {
            unicast: Address(2),
            element_count: 1,
            key: Key128::from_bytes([0; 16]),
        };
        assert!(devkey.completes_on_tx(false));
        assert!(devkey.to_message().is_none());
    }

    #[test]
    fn test_sensor_reply_matches_property() {
        let kind = PendingKind::SensorCadenceGet {
            app_key: AppKeyIndex(0),
            property: 0x004D,
        };
        assert!(kind.matches_model(&ModelStatus::SensorCadence {
            property: 0x004D,
            cadence: vec![]
        }));
        assert!(!kind.matches_model(&ModelStatus::SensorCadence {
            property: 0x0042,
            cadence: vec![]
        }));
    }
}
