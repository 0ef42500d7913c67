//! Changing foundation and publication settings of provisioned nodes.

use crate::client::MeshClient;
use crate::config::{DeviceConfig, PublicationConfig};
use crate::error::MeshClientError;
use crate::pending::PendingKind;
use crate::resolver::node_for_name;
use meshctl_core::{Action, Notification};
use meshctl_types::{classify, Address, ModelId, Node, Publication};
use tracing::info;

impl MeshClient {
    /// Apply foundation settings to a node, or set the defaults used for
    /// new nodes when `name` is `None`.
    ///
    /// Only settings that differ from the node's recorded state, and that the
    /// node supports, are sent.
    pub fn set_device_config(
        &mut self,
        name: Option<&str>,
        config: DeviceConfig,
    ) -> Result<Vec<Action>, MeshClientError> {
        let Some(name) = name else {
            self.config.device = config;
            return Ok(vec![]);
        };
        let unicast = self.reconfigurable_node(name)?;
        let Some(node) = self.db.as_ref().and_then(|db| db.node(unicast)) else {
            return Err(MeshClientError::NotFound(name.to_string()));
        };
        let ops = if config.is_satisfied_by(&node.config) {
            vec![]
        } else {
            device_config_ops(node, &config)
        };
        if ops.is_empty() {
            return Ok(vec![Action::Notify(Notification::ConfigComplete {
                target: Some(unicast),
                success: true,
            })]);
        }
        info!(node = %unicast, ops = ops.len(), "Reconfiguring node");
        Ok(self.start_reconfiguration(
            Some(unicast),
            ops.into_iter().map(|kind| (unicast, kind)).collect(),
        ))
    }

    /// Apply publication settings to an element's publishing models (or just
    /// `model`), or set the defaults used for new nodes when `element` is
    /// `None`.
    pub fn set_publication_config(
        &mut self,
        element: Option<&str>,
        model: Option<ModelId>,
        config: PublicationConfig,
    ) -> Result<Vec<Action>, MeshClientError> {
        let Some(element_name) = element else {
            self.config.publication = config;
            return Ok(vec![]);
        };
        let db = self.db_ref()?;
        if db.app_key(config.app_key).is_none() {
            return Err(MeshClientError::NotFound(format!("app key {}", config.app_key.0)));
        }
        let element = db
            .element_by_name(element_name)
            .ok_or_else(|| MeshClientError::NotFound(element_name.to_string()))?;
        let element_address = element.address;
        let unicast = self.reconfigurable_node(element_name)?;
        let Some(db) = self.db.as_ref() else {
            return Err(MeshClientError::NetworkClosed);
        };
        let (Some(node), Some(element)) = (db.node(unicast), db.element(element_address)) else {
            return Err(MeshClientError::NotFound(element_name.to_string()));
        };
        if let Some(id) = model {
            if !element.has_model(id) {
                return Err(MeshClientError::NotFound(format!("model {} on {}", id, element_name)));
            }
        }
        let fallback = node.group.unwrap_or(Address::ALL_NODES);

        let ops: Vec<(Address, PendingKind)> = element
            .models
            .iter()
            .filter(|m| model.map(|id| id == m.id).unwrap_or(true))
            .filter(|m| {
                let class = classify(m.id);
                !class.is_core() && (class.default_publication || m.publication.is_some())
            })
            .filter_map(|m| {
                let publication = Publication {
                    address: m.publication.map(|p| p.address).unwrap_or(fallback),
                    app_key: config.app_key,
                    ttl: config.ttl,
                    period_ms: config.period_ms,
                    retransmit: config.retransmit,
                    friendship_credentials: config.friendship_credentials,
                };
                (m.publication != Some(publication)).then_some((
                    unicast,
                    PendingKind::PublicationSet {
                        element: element_address,
                        model: m.id,
                        publication,
                    },
                ))
            })
            .collect();
        if ops.is_empty() {
            return Ok(vec![Action::Notify(Notification::ConfigComplete {
                target: Some(unicast),
                success: true,
            })]);
        }
        Ok(self.start_reconfiguration(Some(unicast), ops))
    }

    /// Node that may be reconfigured now, by node or element name.
    pub(crate) fn reconfigurable_node(&self, name: &str) -> Result<Address, MeshClientError> {
        let db = self.db_ref()?;
        let node = node_for_name(db, name).ok_or_else(|| MeshClientError::NotFound(name.to_string()))?;
        self.require_idle()?;
        if node.blocked {
            return Err(MeshClientError::InvalidState("node is being removed"));
        }
        if !self.is_local(node.unicast) && !self.connected {
            return Err(MeshClientError::NotConnected);
        }
        Ok(node.unicast)
    }
}

/// Operations moving a node's foundation state to `config`.
fn device_config_ops(node: &Node, config: &DeviceConfig) -> Vec<PendingKind> {
    fn differs<T: PartialEq + Copy>(wanted: Option<T>, have: Option<T>) -> Option<T> {
        wanted.filter(|w| have != Some(*w))
    }
    let features = node
        .composition
        .as_ref()
        .map(|c| c.features)
        .unwrap_or_default();
    let state = &node.config;
    let mut ops = Vec::new();

    if let Some(ttl) = differs(config.default_ttl, state.default_ttl) {
        ops.push(PendingKind::DefaultTtlSet(ttl));
    }
    if let Some(retransmit) = differs(config.net_transmit, state.net_transmit) {
        ops.push(PendingKind::NetworkTransmitSet(retransmit));
    }
    if features.relay {
        if let Some(relay) = differs(config.relay, state.relay) {
            ops.push(PendingKind::RelaySet(relay));
        }
    }
    if features.proxy {
        if let Some(proxy) = differs(config.gatt_proxy, state.gatt_proxy) {
            ops.push(PendingKind::GattProxySet(proxy));
        }
    }
    if features.friend {
        if let Some(friend) = differs(config.friend, state.friend) {
            ops.push(PendingKind::FriendSet(friend));
        }
    }
    if let Some(beacon) = differs(config.beacon, state.beacon) {
        ops.push(PendingKind::BeaconSet(beacon));
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_test_helpers::{switch_composition, test_node};
    use meshctl_types::NodeConfigState;

    #[test]
    fn test_unsupported_features_skipped() {
        let mut node = test_node(5, 0x0010, &[&[]]);
        node.composition = Some(switch_composition());
        let ops = device_config_ops(&node, &DeviceConfig::default());
        assert!(ops.iter().all(|op| !matches!(
            op,
            PendingKind::RelaySet(_) | PendingKind::GattProxySet(_) | PendingKind::FriendSet(_)
        )));
        assert!(ops.contains(&PendingKind::BeaconSet(true)));
    }

    #[test]
    fn test_only_differences_sent() {
        let mut node = test_node(5, 0x0010, &[&[]]);
        node.config = NodeConfigState {
            default_ttl: Some(7),
            beacon: Some(true),
            ..Default::default()
        };
        let config = DeviceConfig::unchanged().with_default_ttl(7).with_beacon(false);
        assert_eq!(
            device_config_ops(&node, &config),
            vec![PendingKind::BeaconSet(false)]
        );
    }
}
