//! Initial configuration of nodes and bookkeeping of confirmed operations.

use crate::client::MeshClient;
use crate::pending::{PendingKind, PendingOperation};
use crate::state::ClientState;
use meshctl_core::{Action, Notification, ProvisionState};
use meshctl_messages::{parse_composition, ConfigStatus, FeatureState, ModelStatus};
use meshctl_types::models::{device_type_name, SENSOR_SERVER, SENSOR_SETUP_SERVER};
use meshctl_types::{
    classify, Address, CompositionData, KeyRefreshPhase, MeshDb, Model, ModelId, NetKeyIndex,
    Node, Publication, SensorProperty,
};
use tracing::{debug, info, warn};

impl MeshClient {
    // ═══════════════════════════════════════════════════════════════════════
    // Composition
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn on_composition_data(&mut self, src: Address, page: u8, data: &[u8]) -> Vec<Action> {
        let composition = match parse_composition(page, data) {
            Ok(composition) => composition,
            Err(err) => {
                warn!(src = %src, error = %err, "Malformed composition data");
                return self.fail_configuration(&format!("malformed composition data: {}", err));
            }
        };
        if self.is_local(src) {
            return self.configure_local(composition);
        }
        match self.state {
            ClientState::GetRemoteCompositionData if self.target == Some(src) => {
                self.configure_remote(src, composition)
            }
            state => {
                debug!(src = %src, state = %state, "Unsolicited composition data");
                vec![Self::prime()]
            }
        }
    }

    /// Fail whichever initial configuration is running.
    pub(crate) fn fail_configuration(&mut self, reason: &str) -> Vec<Action> {
        if self.attempt.is_some() {
            return self.fail_provisioning(reason);
        }
        let mut actions = self.cancel_timers();
        self.pending.clear();
        self.go_idle();
        self.db = None;
        actions.push(Action::Notify(Notification::NetworkOpened { success: false }));
        actions
    }

    /// Load the network's keys and bindings into the local device.
    fn configure_local(&mut self, composition: CompositionData) -> Vec<Action> {
        let Some(db) = self.db.as_mut() else {
            return vec![];
        };
        let Some(local) = db.local_node_mut() else {
            return self.fail_configuration("no local node");
        };
        apply_composition(local, &composition);
        let unicast = local.unicast;

        let db = &*db;
        let mut ops = Vec::new();
        for net_key in &db.net_keys {
            ops.push(PendingKind::NetKeyAdd {
                index: net_key.index,
                key: net_key.transmit_key(),
            });
            if net_key.phase.is_refreshing() {
                ops.push(PendingKind::NetKeyUpdate {
                    index: net_key.index,
                    key: net_key.key,
                });
            }
        }
        for app_key in &db.app_keys {
            let phase = db
                .net_key(app_key.bound_net_key)
                .map(|k| k.phase)
                .unwrap_or(KeyRefreshPhase::Normal);
            ops.push(PendingKind::AppKeyAdd {
                net_index: app_key.bound_net_key,
                app_index: app_key.index,
                key: app_key.transmit_key(phase),
            });
        }
        if let Some(local) = db.local_node() {
            for (element, model) in local.models() {
                if !classify(model.id).needs_app_binding() {
                    continue;
                }
                for app_key in &db.app_keys {
                    ops.push(PendingKind::ModelAppBind {
                        element,
                        app_index: app_key.index,
                        model: model.id,
                    });
                }
            }
        }
        ops.push(PendingKind::DefaultTtlSet(
            self.config.device.default_ttl.unwrap_or(7),
        ));

        debug!(ops = ops.len(), "Configuring local device");
        for kind in ops {
            self.queue(unicast, kind);
        }
        let mut actions = vec![];
        self.persist(&mut actions);
        actions.push(Self::prime());
        actions
    }

    /// Record a new node's composition and queue its bring-up.
    fn configure_remote(&mut self, unicast: Address, composition: CompositionData) -> Vec<Action> {
        let Some(db) = self.db.as_mut() else {
            return vec![];
        };
        let names = default_element_names(db, unicast, &composition);
        let Some(node) = db.node_mut(unicast) else {
            return self.fail_provisioning("node record missing");
        };
        if composition.element_count() != node.element_count as usize {
            warn!(
                reported = composition.element_count(),
                provisioned = node.element_count,
                "Element count mismatch"
            );
            return self.fail_provisioning("element count mismatch");
        }
        apply_composition(node, &composition);
        for (element, name) in node.elements.iter_mut().zip(names) {
            if let Some(name) = name {
                element.name = name;
            }
        }
        let mut actions = vec![];
        self.persist(&mut actions);

        let ops = self.bring_up_ops(unicast);
        info!(node = %unicast, ops = ops.len(), "Configuring node");
        for (dst, kind) in ops {
            self.queue(dst, kind);
        }
        self.set_state(ClientState::Configuration);
        actions.push(Self::prime());
        actions
    }

    /// Operations bringing a freshly provisioned node into the network.
    pub(crate) fn bring_up_ops(&self, unicast: Address) -> Vec<(Address, PendingKind)> {
        let Some(db) = self.db.as_ref() else {
            return vec![];
        };
        let Some(node) = db.node(unicast) else {
            return vec![];
        };
        let Some(primary) = db.net_key(NetKeyIndex::PRIMARY) else {
            return vec![];
        };
        let device = &self.config.device;
        let publication = &self.config.publication;
        let mut ops = Vec::new();
        let mut op = |kind| ops.push((unicast, kind));

        if let Some(retransmit) = device.net_transmit {
            op(PendingKind::NetworkTransmitSet(retransmit));
        }
        if let Some(ttl) = device.default_ttl {
            op(PendingKind::DefaultTtlSet(ttl));
        }
        match primary.phase {
            KeyRefreshPhase::First => op(PendingKind::NetKeyUpdate {
                index: primary.index,
                key: primary.key,
            }),
            KeyRefreshPhase::Third => op(PendingKind::KeyRefreshPhaseSet {
                net_index: primary.index,
                transition: 3,
            }),
            _ => {}
        }

        let app_keys: Vec<_> = db
            .app_keys
            .iter()
            .filter(|k| k.bound_net_key == primary.index)
            .collect();
        for app_key in &app_keys {
            op(PendingKind::AppKeyAdd {
                net_index: primary.index,
                app_index: app_key.index,
                key: app_key.transmit_key(primary.phase),
            });
            if primary.phase == KeyRefreshPhase::First && app_key.old_key.is_some() {
                op(PendingKind::AppKeyUpdate {
                    net_index: primary.index,
                    app_index: app_key.index,
                    key: app_key.key,
                });
            }
        }

        for (element, model) in node.models() {
            if !classify(model.id).needs_app_binding() {
                continue;
            }
            for app_key in &app_keys {
                op(PendingKind::ModelAppBind {
                    element,
                    app_index: app_key.index,
                    model: model.id,
                });
            }
        }

        if let Some(group) = node.group {
            let mut groups = vec![group];
            groups.extend(db.group_ancestors(group));
            for kind in subscription_ops(node, &groups, true) {
                op(kind);
            }
        }

        let target = node.group.unwrap_or(Address::ALL_NODES);
        for (element, model) in node.models() {
            let class = classify(model.id);
            if class.is_core() || !class.default_publication {
                continue;
            }
            op(PendingKind::PublicationSet {
                element,
                model: model.id,
                publication: Publication {
                    address: target,
                    app_key: publication.app_key,
                    ttl: publication.ttl,
                    period_ms: publication.period_ms,
                    retransmit: publication.retransmit,
                    friendship_credentials: publication.friendship_credentials,
                },
            });
        }

        let features = node
            .composition
            .as_ref()
            .map(|c| c.features)
            .unwrap_or_default();
        if features.relay {
            if let Some(relay) = device.relay {
                op(PendingKind::RelaySet(relay));
            }
        }
        if features.proxy {
            if let Some(proxy) = device.gatt_proxy {
                op(PendingKind::GattProxySet(proxy));
            }
        }
        if features.friend {
            if let Some(friend) = device.friend {
                op(PendingKind::FriendSet(friend));
            }
        }
        if let Some(beacon) = device.beacon {
            op(PendingKind::BeaconSet(beacon));
        }

        if self.connected && self.proxy == Some(unicast) && !db.groups.is_empty() {
            op(PendingKind::ProxyFilterAdd(
                db.groups.iter().map(|g| g.address).collect(),
            ));
        }

        // Sensor discovery targets the element, not the node.
        for element in &node.elements {
            if element.has_model(ModelId::Sig(SENSOR_SERVER)) {
                ops.push((
                    element.address,
                    PendingKind::SensorDescriptorGet {
                        app_key: publication.app_key,
                    },
                ));
            }
        }
        ops
    }

    /// Initial configuration drained successfully.
    pub(crate) fn finish_configuration(&mut self) -> Vec<Action> {
        let mut actions = vec![];
        let Some(target) = self.target else {
            self.go_idle();
            return actions;
        };
        if let Some(node) = self.db.as_mut().and_then(|db| db.node_mut(target)) {
            node.config_complete = true;
        }
        self.persist(&mut actions);

        if self.is_local(target) {
            info!("Network open");
            self.go_idle();
            Self::notify(&mut actions, Notification::NetworkOpened { success: true });
            return actions;
        }

        info!(node = %target, "Node configured");
        if let Some(attempt) = self.attempt.take() {
            Self::notify(
                &mut actions,
                Notification::ProvisionStatus {
                    uuid: attempt.uuid,
                    state: ProvisionState::Success { unicast: target },
                },
            );
        }
        self.go_idle();
        actions.extend(self.maybe_start_key_refresh());
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Confirmed operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Record the effect of a confirmed operation in the database.
    pub(crate) fn apply_operation(&mut self, op: &PendingOperation, status: Option<&ConfigStatus>) {
        let Some(db) = self.db.as_mut() else {
            return;
        };
        let dst = op.dst;
        match &op.kind {
            PendingKind::DevKeySet { .. }
            | PendingKind::CompositionGet { .. }
            | PendingKind::ProxyFilterAdd(_)
            | PendingKind::ProxyFilterDelete(_)
            | PendingKind::SensorDescriptorGet { .. }
            | PendingKind::SensorSettingsGet { .. }
            | PendingKind::SensorCadenceGet { .. } => {}
            PendingKind::NetKeyAdd { index, .. } => {
                if let Some(node) = db.node_mut(dst) {
                    if !node.has_net_key(*index) {
                        node.add_net_key(*index, KeyRefreshPhase::Normal);
                    }
                }
            }
            PendingKind::NetKeyUpdate { index, .. } => {
                if let Some(node) = db.node_mut(dst) {
                    node.add_net_key(*index, KeyRefreshPhase::First);
                }
            }
            PendingKind::AppKeyAdd { app_index, .. } => {
                if let Some(node) = db.node_mut(dst) {
                    if node.app_key(*app_index).is_none() {
                        node.add_app_key(*app_index, KeyRefreshPhase::Normal);
                    }
                }
            }
            PendingKind::AppKeyUpdate { app_index, .. } => {
                if let Some(node) = db.node_mut(dst) {
                    node.add_app_key(*app_index, KeyRefreshPhase::First);
                }
            }
            PendingKind::ModelAppBind {
                element,
                app_index,
                model,
            } => {
                if let Some(m) = model_mut(db, *element, *model) {
                    m.bind(*app_index);
                }
            }
            PendingKind::SubscriptionAdd {
                element,
                address,
                model,
            } => {
                if let Some(m) = model_mut(db, *element, *model) {
                    m.subscribe(*address);
                }
            }
            PendingKind::SubscriptionDelete {
                element,
                address,
                model,
            } => {
                if let Some(m) = model_mut(db, *element, *model) {
                    m.unsubscribe(*address);
                }
            }
            PendingKind::SubscriptionDeleteAll { element, model } => {
                if let Some(m) = model_mut(db, *element, *model) {
                    m.subscriptions.clear();
                }
            }
            PendingKind::PublicationSet {
                element,
                model,
                publication,
            } => {
                if let Some(m) = model_mut(db, *element, *model) {
                    m.publication = if publication.address.is_unassigned() {
                        None
                    } else {
                        Some(*publication)
                    };
                }
            }
            PendingKind::NetworkTransmitSet(retransmit) => {
                if let Some(node) = db.node_mut(dst) {
                    node.config.net_transmit = Some(*retransmit);
                }
            }
            PendingKind::DefaultTtlSet(ttl) => {
                if let Some(node) = db.node_mut(dst) {
                    node.config.default_ttl = Some(*ttl);
                }
            }
            PendingKind::RelaySet(relay) => {
                let supported = !matches!(
                    status,
                    Some(ConfigStatus::Relay {
                        state: FeatureState::NotSupported,
                        ..
                    })
                );
                if let Some(node) = db.node_mut(dst) {
                    node.config.relay = supported.then_some(*relay);
                }
            }
            PendingKind::GattProxySet(on) => {
                if let Some(node) = db.node_mut(dst) {
                    node.config.gatt_proxy = feature_result(*on, status);
                }
            }
            PendingKind::FriendSet(on) => {
                if let Some(node) = db.node_mut(dst) {
                    node.config.friend = feature_result(*on, status);
                }
            }
            PendingKind::BeaconSet(on) => {
                if let Some(node) = db.node_mut(dst) {
                    node.config.beacon = Some(*on);
                }
            }
            PendingKind::NodeReset => {
                info!(node = %dst, "Node reset confirmed");
            }
            PendingKind::KeyRefreshPhaseSet {
                net_index,
                transition,
            } => {
                let phase = if *transition == 2 {
                    KeyRefreshPhase::Second
                } else {
                    KeyRefreshPhase::Third
                };
                let app_indexes = db.app_keys_bound_to(*net_index);
                if let Some(node) = db.node_mut(dst) {
                    set_family_phase(node, *net_index, &app_indexes, phase);
                }
            }
        }
    }

    /// Store sensor discovery results, queueing the follow-up reads.
    pub(crate) fn on_sensor_discovery(&mut self, op: &PendingOperation, status: &ModelStatus) {
        let app_key = match op.kind {
            PendingKind::SensorDescriptorGet { app_key }
            | PendingKind::SensorSettingsGet { app_key, .. }
            | PendingKind::SensorCadenceGet { app_key, .. } => app_key,
            _ => return,
        };
        let Some(element) = self.db.as_mut().and_then(|db| db.element_mut(op.dst)) else {
            return;
        };
        let has_setup = element.has_model(ModelId::Sig(SENSOR_SETUP_SERVER));
        let Some(sensor) = element.model_mut(ModelId::Sig(SENSOR_SERVER)) else {
            return;
        };
        match status {
            ModelStatus::SensorDescriptor { properties } => {
                sensor.sensors = properties.iter().map(|p| SensorProperty::new(*p)).collect();
                debug!(element = %op.dst, properties = properties.len(), "Sensor properties");
                if has_setup {
                    for property in properties.clone() {
                        self.queue(op.dst, PendingKind::SensorSettingsGet { app_key, property });
                        self.queue(op.dst, PendingKind::SensorCadenceGet { app_key, property });
                    }
                }
            }
            ModelStatus::SensorSettings { property, settings } => {
                if let Some(entry) = sensor.sensors.iter_mut().find(|s| s.property_id == *property) {
                    entry.settings = settings.clone();
                }
            }
            ModelStatus::SensorCadence { property, cadence } => {
                if let Some(entry) = sensor.sensors.iter_mut().find(|s| s.property_id == *property) {
                    entry.cadence = Some(cadence.clone());
                }
            }
            _ => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

fn model_mut(db: &mut MeshDb, element: Address, model: ModelId) -> Option<&mut Model> {
    db.element_mut(element)?.model_mut(model)
}

/// Node's feature state after a set; `None` when the node lacks the feature.
fn feature_result(requested: bool, status: Option<&ConfigStatus>) -> Option<bool> {
    match status {
        Some(ConfigStatus::GattProxy(state)) | Some(ConfigStatus::Friend(state)) => match state {
            FeatureState::NotSupported => None,
            state => Some(state.is_enabled()),
        },
        _ => Some(requested),
    }
}

/// Set a node's copies of a network key and its application keys to `phase`.
pub(crate) fn set_family_phase(
    node: &mut Node,
    net_index: NetKeyIndex,
    app_indexes: &[meshctl_types::AppKeyIndex],
    phase: KeyRefreshPhase,
) {
    if let Some(copy) = node.net_key_mut(net_index) {
        copy.phase = phase;
    }
    for app_index in app_indexes {
        if let Some(copy) = node.app_key_mut(*app_index) {
            copy.phase = phase;
        }
    }
}

/// Replace a node's element models with its reported composition.
pub(crate) fn apply_composition(node: &mut Node, composition: &CompositionData) {
    for (element, reported) in node.elements.iter_mut().zip(&composition.elements) {
        element.location = reported.location;
        element.models = reported
            .models
            .iter()
            .map(|id| {
                element
                    .model(*id)
                    .cloned()
                    .unwrap_or_else(|| Model::new(*id))
            })
            .collect();
    }
    node.composition = Some(composition.clone());
}

/// Generated names for secondary elements: "<device type> (<address>)".
///
/// `None` keeps the current name, either for the primary element or when the
/// generated name is taken.
fn default_element_names(
    db: &MeshDb,
    unicast: Address,
    composition: &CompositionData,
) -> Vec<Option<String>> {
    composition
        .elements
        .iter()
        .enumerate()
        .map(|(i, element)| {
            if i == 0 {
                return None;
            }
            let address = Address(unicast.0 + i as u16);
            let name = format!("{} ({})", device_type_name(&element.models), address);
            (!db.name_in_use(&name)).then_some(name)
        })
        .collect()
}

/// Subscriptions adding every default-subscribing model to `groups`,
/// mirrored to setup variants present on the same element.
pub(crate) fn subscription_ops(node: &Node, groups: &[Address], add: bool) -> Vec<PendingKind> {
    let mut ops = Vec::new();
    for element in &node.elements {
        for model in &element.models {
            let class = classify(model.id);
            if class.is_core() || !class.default_subscription {
                continue;
            }
            let mut targets = vec![model.id];
            if let Some(setup) = class.setup_variant {
                if element.has_model(ModelId::Sig(setup)) {
                    targets.push(ModelId::Sig(setup));
                }
            }
            for target in targets {
                for group in groups {
                    let subscribed = element
                        .model(target)
                        .map(|m| m.is_subscribed(*group))
                        .unwrap_or(false);
                    if add && !subscribed {
                        ops.push(PendingKind::SubscriptionAdd {
                            element: element.address,
                            address: *group,
                            model: target,
                        });
                    } else if !add && subscribed {
                        ops.push(PendingKind::SubscriptionDelete {
                            element: element.address,
                            address: *group,
                            model: target,
                        });
                    }
                }
            }
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_test_helpers::{lamp_composition, relay_lamp_composition, test_db, test_node};
    use meshctl_types::models::*;

    #[test]
    fn test_apply_composition_keeps_model_state() {
        let mut node = test_node(5, 0x0010, &[&[ModelId::Sig(GENERIC_ONOFF_SERVER)]]);
        node.elements[0].models[0].subscribe(Address(0xC000));
        apply_composition(&mut node, &lamp_composition());
        let onoff = node.elements[0]
            .model(ModelId::Sig(GENERIC_ONOFF_SERVER))
            .unwrap();
        assert!(onoff.is_subscribed(Address(0xC000)));
        assert!(node.elements[0].has_model(ModelId::Sig(LIGHT_LIGHTNESS_SETUP_SERVER)));
    }

    #[test]
    fn test_subscription_ops_mirror_setup_variant() {
        let mut node = test_node(5, 0x0010, &[&[]]);
        apply_composition(&mut node, &lamp_composition());
        let ops = subscription_ops(&node, &[Address(0xC000)], true);
        let models: Vec<ModelId> = ops
            .iter()
            .filter_map(|op| match op {
                PendingKind::SubscriptionAdd { model, .. } => Some(*model),
                _ => None,
            })
            .collect();
        assert!(models.contains(&ModelId::Sig(LIGHT_LIGHTNESS_SERVER)));
        assert!(models.contains(&ModelId::Sig(LIGHT_LIGHTNESS_SETUP_SERVER)));
        assert!(!models.contains(&ModelId::Sig(CONFIG_SERVER)));
    }

    #[test]
    fn test_default_names_for_secondary_elements() {
        let db = test_db();
        let names = default_element_names(&db, Address(0x0010), &relay_lamp_composition());
        assert_eq!(names[0], None);
        assert_eq!(names[1].as_deref(), Some("Level Device (0011)"));
    }

    #[test]
    fn test_feature_not_supported_clears_state() {
        assert_eq!(
            feature_result(true, Some(&ConfigStatus::GattProxy(FeatureState::NotSupported))),
            None
        );
        assert_eq!(
            feature_result(true, Some(&ConfigStatus::Friend(FeatureState::Disabled))),
            Some(false)
        );
        assert_eq!(feature_result(true, None), Some(true));
    }
}
