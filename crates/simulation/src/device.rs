//! Simulated mesh devices.
//!
//! A device beacons as unprovisioned until it is provisioned. It then runs a
//! Configuration Server over its own key, binding and subscription state, and
//! a handful of application servers (generic, lighting, sensor, health and
//! vendor) over a shared [`DeviceModelState`].

use meshctl_messages::{
    encode_composition, AuthMethod, ConfigRequest, ConfigStatus, DeviceCapabilities,
    FeatureState, ModelRequest, ModelStatus, ProvisionBearer, ProvisioningData, StatusCode,
};
use meshctl_messages::provisioning::STATIC_OOB_AVAILABLE;
use meshctl_types::models::{
    CONFIG_SERVER, GENERIC_LEVEL_SERVER, GENERIC_ONOFF_SERVER, HEALTH_SERVER, LIGHT_CTL_SERVER,
    LIGHT_HSL_SERVER, LIGHT_LIGHTNESS_SERVER, SENSOR_SERVER, SENSOR_SETUP_SERVER,
};
use meshctl_types::{
    Address, AppKeyIndex, CompositionData, DeviceUuid, Key128, KeyRefreshPhase, ModelId,
    NetKeyIndex, Publication, Retransmit,
};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Application state shared by the device's servers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceModelState {
    pub on: bool,
    pub level: i16,
    pub lightness: u16,
    pub hue: u16,
    pub saturation: u16,
    pub temperature: u16,
    pub delta_uv: i16,
    pub attention: u8,
}

#[derive(Debug, Clone)]
struct NetKeySlot {
    index: NetKeyIndex,
    key: Key128,
    old_key: Option<Key128>,
    phase: KeyRefreshPhase,
}

#[derive(Debug, Clone)]
struct AppKeySlot {
    index: AppKeyIndex,
    net_index: NetKeyIndex,
    key: Key128,
    old_key: Option<Key128>,
}

#[derive(Debug, Clone, Default)]
struct ModelSlot {
    bindings: Vec<AppKeyIndex>,
    subscriptions: Vec<Address>,
    publication: Option<Publication>,
}

/// State a device gains when provisioned and loses on reset.
#[derive(Debug, Clone)]
struct ProvisionedState {
    unicast: Address,
    device_key: Key128,
    net_keys: Vec<NetKeySlot>,
    app_keys: Vec<AppKeySlot>,
    models: BTreeMap<(Address, ModelId), ModelSlot>,
    default_ttl: u8,
    net_transmit: Retransmit,
    relay: bool,
    relay_retransmit: Retransmit,
    gatt_proxy: bool,
    friend: bool,
    beacon: bool,
}

impl ProvisionedState {
    fn net_key_mut(&mut self, index: NetKeyIndex) -> Option<&mut NetKeySlot> {
        self.net_keys.iter_mut().find(|k| k.index == index)
    }

    fn app_key_mut(&mut self, index: AppKeyIndex) -> Option<&mut AppKeySlot> {
        self.app_keys.iter_mut().find(|k| k.index == index)
    }

    fn has_app_key(&self, index: AppKeyIndex) -> bool {
        self.app_keys.iter().any(|k| k.index == index)
    }
}

/// A device in the simulated mesh.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    uuid: DeviceUuid,
    composition: CompositionData,
    rssi: i8,
    bearer: ProvisionBearer,
    static_oob: Option<Vec<u8>>,
    reachable: bool,
    seq: u32,
    node: Option<ProvisionedState>,
    state: DeviceModelState,
    sensors: Vec<(u16, Vec<u8>)>,
}

impl SimulatedDevice {
    /// An unprovisioned device heard over the advertising bearer.
    pub fn new(uuid: DeviceUuid, composition: CompositionData) -> Self {
        Self {
            uuid,
            composition,
            rssi: -50,
            bearer: ProvisionBearer::Adv,
            static_oob: None,
            reachable: true,
            seq: 0,
            node: None,
            state: DeviceModelState::default(),
            sensors: Vec::new(),
        }
    }

    /// Set the signal strength scanners report.
    pub fn with_rssi(mut self, rssi: i8) -> Self {
        self.rssi = rssi;
        self
    }

    /// Set the bearer the device beacons on.
    pub fn with_bearer(mut self, bearer: ProvisionBearer) -> Self {
        self.bearer = bearer;
        self
    }

    /// Require static OOB authentication.
    pub fn with_static_oob(mut self, oob: Vec<u8>) -> Self {
        self.static_oob = Some(oob);
        self
    }

    /// Add a sensor property with its current raw value.
    pub fn with_sensor(mut self, property: u16, value: Vec<u8>) -> Self {
        self.sensors.push((property, value));
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn uuid(&self) -> DeviceUuid {
        self.uuid
    }

    pub fn composition(&self) -> &CompositionData {
        &self.composition
    }

    pub fn rssi(&self) -> i8 {
        self.rssi
    }

    pub fn bearer(&self) -> ProvisionBearer {
        self.bearer
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn set_reachable(&mut self, reachable: bool) {
        self.reachable = reachable;
    }

    pub fn is_provisioned(&self) -> bool {
        self.node.is_some()
    }

    /// Primary element address once provisioned.
    pub fn unicast(&self) -> Option<Address> {
        self.node.as_ref().map(|n| n.unicast)
    }

    pub fn device_key(&self) -> Option<Key128> {
        self.node.as_ref().map(|n| n.device_key)
    }

    pub fn element_count(&self) -> usize {
        self.composition.element_count()
    }

    /// Whether `address` is one of the device's element addresses.
    pub fn owns(&self, address: Address) -> bool {
        self.element_index(address).is_some()
    }

    /// Whether the device accepts proxy connections.
    pub fn is_proxy(&self) -> bool {
        self.composition.features.proxy && self.node.as_ref().map(|n| n.gatt_proxy).unwrap_or(false)
    }

    /// Current key and phase of a network key.
    pub fn net_key(&self, index: NetKeyIndex) -> Option<(Key128, KeyRefreshPhase)> {
        self.node
            .as_ref()?
            .net_keys
            .iter()
            .find(|k| k.index == index)
            .map(|k| (k.key, k.phase))
    }

    pub fn app_key(&self, index: AppKeyIndex) -> Option<Key128> {
        self.node
            .as_ref()?
            .app_keys
            .iter()
            .find(|k| k.index == index)
            .map(|k| k.key)
    }

    pub fn bindings(&self, element: Address, model: ModelId) -> Vec<AppKeyIndex> {
        self.slot(element, model)
            .map(|s| s.bindings.clone())
            .unwrap_or_default()
    }

    pub fn subscriptions(&self, element: Address, model: ModelId) -> Vec<Address> {
        self.slot(element, model)
            .map(|s| s.subscriptions.clone())
            .unwrap_or_default()
    }

    pub fn publication(&self, element: Address, model: ModelId) -> Option<Publication> {
        self.slot(element, model).and_then(|s| s.publication)
    }

    pub fn default_ttl(&self) -> Option<u8> {
        self.node.as_ref().map(|n| n.default_ttl)
    }

    pub fn relay_enabled(&self) -> bool {
        self.node.as_ref().map(|n| n.relay).unwrap_or(false)
    }

    pub fn beacon_enabled(&self) -> bool {
        self.node.as_ref().map(|n| n.beacon).unwrap_or(false)
    }

    pub fn model_state(&self) -> &DeviceModelState {
        &self.state
    }

    fn slot(&self, element: Address, model: ModelId) -> Option<&ModelSlot> {
        self.node.as_ref()?.models.get(&(element, model))
    }

    fn element_index(&self, address: Address) -> Option<usize> {
        let unicast = self.node.as_ref()?.unicast;
        let offset = address.0.checked_sub(unicast.0)? as usize;
        (offset < self.element_count()).then_some(offset)
    }

    fn element_has_model(&self, address: Address, model: ModelId) -> bool {
        self.element_index(address)
            .and_then(|i| self.composition.elements.get(i))
            .map(|e| e.has_model(model))
            .unwrap_or(false)
    }

    /// Sequence number for the next message the device sends.
    pub fn next_seq(&mut self) -> u32 {
        self.seq += 1;
        self.seq
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Provisioning
    // ═══════════════════════════════════════════════════════════════════════

    pub fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            element_count: self.element_count() as u8,
            algorithms: 0x0001,
            static_oob_type: if self.static_oob.is_some() {
                STATIC_OOB_AVAILABLE
            } else {
                0
            },
            ..Default::default()
        }
    }

    /// Whether the handshake authenticates with the given method and data.
    pub fn authenticate(&self, auth: AuthMethod, oob: Option<&[u8]>) -> bool {
        match (&self.static_oob, auth) {
            (None, AuthMethod::NoOob) => true,
            (Some(expected), AuthMethod::StaticOob) => oob == Some(expected.as_slice()),
            _ => false,
        }
    }

    /// Accept provisioning data and become a node.
    pub fn provision(&mut self, data: &ProvisioningData, device_key: Key128) {
        let phase = if data.key_refresh {
            KeyRefreshPhase::Second
        } else {
            KeyRefreshPhase::Normal
        };
        let features = self.composition.features;
        debug!(uuid = %self.uuid, unicast = %data.unicast, "Device provisioned");
        self.seq = 0;
        self.node = Some(ProvisionedState {
            unicast: data.unicast,
            device_key,
            net_keys: vec![NetKeySlot {
                index: data.net_key_index,
                key: data.net_key,
                old_key: None,
                phase,
            }],
            app_keys: Vec::new(),
            models: BTreeMap::new(),
            default_ttl: 5,
            net_transmit: Retransmit::new(1, 10),
            relay: features.relay,
            relay_retransmit: Retransmit::new(1, 10),
            gatt_proxy: features.proxy,
            friend: false,
            beacon: true,
        });
    }

    /// Forget all network state.
    pub fn reset(&mut self) {
        debug!(uuid = %self.uuid, "Device reset");
        self.node = None;
        self.seq = 0;
        self.state = DeviceModelState::default();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Configuration Server
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply a configuration request and build the status reply.
    ///
    /// Unprovisioned devices ignore configuration.
    pub fn handle_config(&mut self, request: &ConfigRequest) -> Option<ConfigStatus> {
        self.node.as_ref()?;
        trace!(uuid = %self.uuid, request = request.type_name(), "Configuration request");
        let status = match request {
            ConfigRequest::CompositionDataGet { .. } => ConfigStatus::CompositionData {
                page: 0,
                data: encode_composition(&self.composition),
            },
            ConfigRequest::NetKeyAdd { index, key } => ConfigStatus::NetKey {
                status: self.net_key_add(*index, *key),
                index: *index,
            },
            ConfigRequest::NetKeyUpdate { index, key } => ConfigStatus::NetKey {
                status: self.net_key_update(*index, *key),
                index: *index,
            },
            ConfigRequest::AppKeyAdd {
                net_index,
                app_index,
                key,
            } => ConfigStatus::AppKey {
                status: self.app_key_add(*net_index, *app_index, *key),
                net_index: *net_index,
                app_index: *app_index,
            },
            ConfigRequest::AppKeyUpdate {
                net_index,
                app_index,
                key,
            } => ConfigStatus::AppKey {
                status: self.app_key_update(*net_index, *app_index, *key),
                net_index: *net_index,
                app_index: *app_index,
            },
            ConfigRequest::ModelAppBind {
                element,
                app_index,
                model,
            } => ConfigStatus::ModelApp {
                status: self.model_app_bind(*element, *app_index, *model),
                element: *element,
                app_index: *app_index,
                model: *model,
            },
            ConfigRequest::ModelSubscriptionAdd {
                element,
                address,
                model,
            } => ConfigStatus::ModelSubscription {
                status: self.subscription_change(*element, *model, Some(*address), true),
                element: *element,
                address: *address,
                model: *model,
            },
            ConfigRequest::ModelSubscriptionDelete {
                element,
                address,
                model,
            } => ConfigStatus::ModelSubscription {
                status: self.subscription_change(*element, *model, Some(*address), false),
                element: *element,
                address: *address,
                model: *model,
            },
            ConfigRequest::ModelSubscriptionDeleteAll { element, model } => {
                ConfigStatus::ModelSubscription {
                    status: self.subscription_change(*element, *model, None, false),
                    element: *element,
                    address: Address::UNASSIGNED,
                    model: *model,
                }
            }
            ConfigRequest::ModelPublicationSet {
                element,
                model,
                publication,
            } => {
                let status = self.publication_set(*element, *model, publication);
                ConfigStatus::ModelPublication {
                    status,
                    element: *element,
                    model: *model,
                    publication: Some(*publication),
                }
            }
            ConfigRequest::NetworkTransmitSet(retransmit) => {
                let node = self.node.as_mut()?;
                node.net_transmit = *retransmit;
                ConfigStatus::NetworkTransmit(*retransmit)
            }
            ConfigRequest::DefaultTtlSet(ttl) => {
                let node = self.node.as_mut()?;
                node.default_ttl = *ttl;
                ConfigStatus::DefaultTtl(*ttl)
            }
            ConfigRequest::RelaySet {
                enabled,
                retransmit,
            } => {
                let supported = self.composition.features.relay;
                let node = self.node.as_mut()?;
                if supported {
                    node.relay = *enabled;
                    node.relay_retransmit = *retransmit;
                }
                ConfigStatus::Relay {
                    state: feature_state(supported, node.relay),
                    retransmit: node.relay_retransmit,
                }
            }
            ConfigRequest::GattProxySet(on) => {
                let supported = self.composition.features.proxy;
                let node = self.node.as_mut()?;
                if supported {
                    node.gatt_proxy = *on;
                }
                ConfigStatus::GattProxy(feature_state(supported, node.gatt_proxy))
            }
            ConfigRequest::FriendSet(on) => {
                let supported = self.composition.features.friend;
                let node = self.node.as_mut()?;
                if supported {
                    node.friend = *on;
                }
                ConfigStatus::Friend(feature_state(supported, node.friend))
            }
            ConfigRequest::BeaconSet(on) => {
                let node = self.node.as_mut()?;
                node.beacon = *on;
                ConfigStatus::Beacon(*on)
            }
            ConfigRequest::KeyRefreshPhaseSet {
                net_index,
                transition,
            } => self.key_refresh_phase_set(*net_index, *transition),
            ConfigRequest::NodeReset => {
                self.reset();
                ConfigStatus::NodeReset
            }
        };
        Some(status)
    }

    fn net_key_add(&mut self, index: NetKeyIndex, key: Key128) -> StatusCode {
        let Some(node) = self.node.as_mut() else {
            return StatusCode::UNSPECIFIED_ERROR;
        };
        match node.net_key_mut(index) {
            Some(slot) if slot.key == key => StatusCode::SUCCESS,
            Some(_) => StatusCode::KEY_INDEX_ALREADY_STORED,
            None => {
                node.net_keys.push(NetKeySlot {
                    index,
                    key,
                    old_key: None,
                    phase: KeyRefreshPhase::Normal,
                });
                StatusCode::SUCCESS
            }
        }
    }

    fn net_key_update(&mut self, index: NetKeyIndex, key: Key128) -> StatusCode {
        let Some(slot) = self.node.as_mut().and_then(|n| n.net_key_mut(index)) else {
            return StatusCode::INVALID_NETKEY_INDEX;
        };
        match slot.phase {
            KeyRefreshPhase::Normal => {
                slot.old_key = Some(slot.key);
                slot.key = key;
                slot.phase = KeyRefreshPhase::First;
                StatusCode::SUCCESS
            }
            KeyRefreshPhase::First if slot.key == key => StatusCode::SUCCESS,
            _ => StatusCode::CANNOT_UPDATE,
        }
    }

    fn app_key_add(&mut self, net_index: NetKeyIndex, index: AppKeyIndex, key: Key128) -> StatusCode {
        let Some(node) = self.node.as_mut() else {
            return StatusCode::UNSPECIFIED_ERROR;
        };
        if node.net_key_mut(net_index).is_none() {
            return StatusCode::INVALID_NETKEY_INDEX;
        }
        match node.app_key_mut(index) {
            Some(slot) if slot.key == key && slot.net_index == net_index => StatusCode::SUCCESS,
            Some(_) => StatusCode::KEY_INDEX_ALREADY_STORED,
            None => {
                node.app_keys.push(AppKeySlot {
                    index,
                    net_index,
                    key,
                    old_key: None,
                });
                StatusCode::SUCCESS
            }
        }
    }

    fn app_key_update(
        &mut self,
        net_index: NetKeyIndex,
        index: AppKeyIndex,
        key: Key128,
    ) -> StatusCode {
        let Some(node) = self.node.as_mut() else {
            return StatusCode::UNSPECIFIED_ERROR;
        };
        let net_phase = match node.net_key_mut(net_index) {
            Some(slot) => slot.phase,
            None => return StatusCode::INVALID_NETKEY_INDEX,
        };
        let Some(slot) = node.app_key_mut(index) else {
            return StatusCode::INVALID_APPKEY_INDEX;
        };
        if slot.net_index != net_index {
            return StatusCode::INVALID_BINDING;
        }
        if net_phase != KeyRefreshPhase::First {
            return StatusCode::CANNOT_UPDATE;
        }
        match slot.old_key {
            None => {
                slot.old_key = Some(slot.key);
                slot.key = key;
                StatusCode::SUCCESS
            }
            Some(_) if slot.key == key => StatusCode::SUCCESS,
            Some(_) => StatusCode::CANNOT_UPDATE,
        }
    }

    /// Check that `model` lives on `element`.
    fn model_status(&self, element: Address, model: ModelId) -> StatusCode {
        if !self.owns(element) {
            StatusCode::INVALID_ADDRESS
        } else if !self.element_has_model(element, model) {
            StatusCode::INVALID_MODEL
        } else {
            StatusCode::SUCCESS
        }
    }

    fn model_app_bind(&mut self, element: Address, app_index: AppKeyIndex, model: ModelId) -> StatusCode {
        let status = self.model_status(element, model);
        if !status.is_success() {
            return status;
        }
        if model == ModelId::Sig(CONFIG_SERVER) {
            return StatusCode::CANNOT_BIND;
        }
        let Some(node) = self.node.as_mut() else {
            return StatusCode::UNSPECIFIED_ERROR;
        };
        if !node.has_app_key(app_index) {
            return StatusCode::INVALID_APPKEY_INDEX;
        }
        let slot = node.models.entry((element, model)).or_default();
        if !slot.bindings.contains(&app_index) {
            slot.bindings.push(app_index);
        }
        StatusCode::SUCCESS
    }

    fn subscription_change(
        &mut self,
        element: Address,
        model: ModelId,
        address: Option<Address>,
        add: bool,
    ) -> StatusCode {
        let status = self.model_status(element, model);
        if !status.is_success() {
            return status;
        }
        if model == ModelId::Sig(CONFIG_SERVER) {
            return StatusCode::NOT_A_SUBSCRIBE_MODEL;
        }
        if let Some(address) = address {
            if address.is_unicast() || address.is_unassigned() {
                return StatusCode::INVALID_ADDRESS;
            }
        }
        let Some(node) = self.node.as_mut() else {
            return StatusCode::UNSPECIFIED_ERROR;
        };
        let slot = node.models.entry((element, model)).or_default();
        match (address, add) {
            (Some(address), true) => {
                if !slot.subscriptions.contains(&address) {
                    slot.subscriptions.push(address);
                }
            }
            (Some(address), false) => slot.subscriptions.retain(|a| *a != address),
            (None, _) => slot.subscriptions.clear(),
        }
        StatusCode::SUCCESS
    }

    fn publication_set(&mut self, element: Address, model: ModelId, publication: &Publication) -> StatusCode {
        let status = self.model_status(element, model);
        if !status.is_success() {
            return status;
        }
        let Some(node) = self.node.as_mut() else {
            return StatusCode::UNSPECIFIED_ERROR;
        };
        let clear = publication.address.is_unassigned();
        if !clear && !node.has_app_key(publication.app_key) {
            return StatusCode::INVALID_APPKEY_INDEX;
        }
        let slot = node.models.entry((element, model)).or_default();
        slot.publication = (!clear).then_some(*publication);
        StatusCode::SUCCESS
    }

    fn key_refresh_phase_set(&mut self, net_index: NetKeyIndex, transition: u8) -> ConfigStatus {
        let reply = |status, phase| ConfigStatus::KeyRefreshPhase {
            status,
            net_index,
            phase,
        };
        let Some(node) = self.node.as_mut() else {
            return reply(StatusCode::UNSPECIFIED_ERROR, KeyRefreshPhase::Normal);
        };
        let Some(slot) = node.net_key_mut(net_index) else {
            return reply(StatusCode::INVALID_NETKEY_INDEX, KeyRefreshPhase::Normal);
        };
        match (transition, slot.phase) {
            (2, KeyRefreshPhase::First | KeyRefreshPhase::Second) => {
                slot.phase = KeyRefreshPhase::Second;
            }
            (3, KeyRefreshPhase::First | KeyRefreshPhase::Second) => {
                slot.phase = KeyRefreshPhase::Normal;
                slot.old_key = None;
                for app in node.app_keys.iter_mut().filter(|k| k.net_index == net_index) {
                    app.old_key = None;
                }
                return reply(StatusCode::SUCCESS, KeyRefreshPhase::Normal);
            }
            (2 | 3, _) => {}
            _ => return reply(StatusCode::CANNOT_SET, slot.phase),
        }
        let phase = slot.phase;
        reply(StatusCode::SUCCESS, phase)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Application servers
    // ═══════════════════════════════════════════════════════════════════════

    /// Elements that process `request` sent to `dst` with `app_key`.
    ///
    /// A unicast destination selects one element, a group every element
    /// with a matching model subscribed to it, all-nodes every matching
    /// element. The model must be bound to the key.
    pub fn model_targets(
        &self,
        dst: Address,
        request: &ModelRequest,
        app_key: AppKeyIndex,
    ) -> Vec<Address> {
        let Some(node) = self.node.as_ref() else {
            return vec![];
        };
        let serving = accepting_models(request);
        let mut out = Vec::new();
        for (i, element) in self.composition.elements.iter().enumerate() {
            let address = Address(node.unicast.0 + i as u16);
            let hit = element
                .models
                .iter()
                .filter(|m| serving(**m))
                .filter_map(|m| node.models.get(&(address, *m)))
                .any(|slot| {
                    slot.bindings.contains(&app_key)
                        && (dst == address
                            || dst == Address::ALL_NODES
                            || slot.subscriptions.contains(&dst))
                });
            if hit {
                out.push(address);
            }
        }
        out
    }

    /// Process an application message on `element`.
    ///
    /// Get requests are always answered; sets only when acknowledged.
    pub fn handle_model(&mut self, request: &ModelRequest, acknowledged: bool) -> Option<ModelStatus> {
        self.node.as_ref()?;
        let state = &mut self.state;
        let status = match request {
            ModelRequest::OnOffGet => onoff(state),
            ModelRequest::OnOffSet { on, .. } => {
                state.on = *on;
                acked(acknowledged, onoff(state))?
            }
            ModelRequest::LevelGet => level(state),
            ModelRequest::LevelSet { level: value, .. } => {
                state.level = *value;
                acked(acknowledged, level(state))?
            }
            ModelRequest::LightnessGet => lightness(state),
            ModelRequest::LightnessSet {
                lightness: value, ..
            } => {
                state.lightness = *value;
                state.on = *value > 0;
                acked(acknowledged, lightness(state))?
            }
            ModelRequest::HslGet => hsl(state),
            ModelRequest::HslSet {
                lightness,
                hue,
                saturation,
                ..
            } => {
                state.lightness = *lightness;
                state.hue = *hue;
                state.saturation = *saturation;
                acked(acknowledged, hsl(state))?
            }
            ModelRequest::CtlGet => ctl(state),
            ModelRequest::CtlSet {
                lightness,
                temperature,
                delta_uv,
                ..
            } => {
                state.lightness = *lightness;
                state.temperature = *temperature;
                state.delta_uv = *delta_uv;
                acked(acknowledged, ctl(state))?
            }
            ModelRequest::SensorGet { property } => ModelStatus::Sensor {
                values: self
                    .sensors
                    .iter()
                    .filter(|(id, _)| property.map(|p| p == *id).unwrap_or(true))
                    .cloned()
                    .collect(),
            },
            ModelRequest::SensorDescriptorGet { property } => ModelStatus::SensorDescriptor {
                properties: self
                    .sensors
                    .iter()
                    .map(|(id, _)| *id)
                    .filter(|id| property.map(|p| p == *id).unwrap_or(true))
                    .collect(),
            },
            ModelRequest::SensorSettingsGet { property } => ModelStatus::SensorSettings {
                property: *property,
                settings: vec![],
            },
            ModelRequest::SensorCadenceGet { property } => ModelStatus::SensorCadence {
                property: *property,
                cadence: vec![],
            },
            ModelRequest::AttentionSet { seconds } => {
                state.attention = *seconds;
                acked(acknowledged, ModelStatus::Attention { seconds: *seconds })?
            }
            ModelRequest::Vendor {
                company,
                opcode,
                payload,
            } => acked(
                acknowledged,
                ModelStatus::Vendor {
                    company: *company,
                    opcode: *opcode,
                    payload: payload.clone(),
                },
            )?,
        };
        Some(status)
    }
}

/// Models on an element that process `request`.
fn accepting_models(request: &ModelRequest) -> impl Fn(ModelId) -> bool {
    let sig: &'static [u16] = match request {
        ModelRequest::OnOffGet | ModelRequest::OnOffSet { .. } => &[GENERIC_ONOFF_SERVER],
        ModelRequest::LevelGet | ModelRequest::LevelSet { .. } => &[GENERIC_LEVEL_SERVER],
        ModelRequest::LightnessGet | ModelRequest::LightnessSet { .. } => {
            &[LIGHT_LIGHTNESS_SERVER]
        }
        ModelRequest::HslGet | ModelRequest::HslSet { .. } => &[LIGHT_HSL_SERVER],
        ModelRequest::CtlGet | ModelRequest::CtlSet { .. } => &[LIGHT_CTL_SERVER],
        ModelRequest::SensorGet { .. } | ModelRequest::SensorDescriptorGet { .. } => {
            &[SENSOR_SERVER]
        }
        ModelRequest::SensorSettingsGet { .. } | ModelRequest::SensorCadenceGet { .. } => {
            &[SENSOR_SERVER, SENSOR_SETUP_SERVER]
        }
        ModelRequest::AttentionSet { .. } => &[HEALTH_SERVER],
        ModelRequest::Vendor { .. } => &[],
    };
    let vendor = match request {
        ModelRequest::Vendor { company, .. } => Some(*company),
        _ => None,
    };
    move |model: ModelId| match model {
        ModelId::Sig(id) => sig.contains(&id),
        ModelId::Vendor { company, .. } => vendor == Some(company),
    }
}

fn feature_state(supported: bool, enabled: bool) -> FeatureState {
    match (supported, enabled) {
        (false, _) => FeatureState::NotSupported,
        (true, true) => FeatureState::Enabled,
        (true, false) => FeatureState::Disabled,
    }
}

fn acked(acknowledged: bool, status: ModelStatus) -> Option<ModelStatus> {
    acknowledged.then_some(status)
}

fn onoff(state: &DeviceModelState) -> ModelStatus {
    ModelStatus::OnOff {
        present: state.on,
        target: None,
        remaining_ms: 0,
    }
}

fn level(state: &DeviceModelState) -> ModelStatus {
    ModelStatus::Level {
        present: state.level,
        target: None,
        remaining_ms: 0,
    }
}

fn lightness(state: &DeviceModelState) -> ModelStatus {
    ModelStatus::Lightness {
        present: state.lightness,
        target: None,
        remaining_ms: 0,
    }
}

fn hsl(state: &DeviceModelState) -> ModelStatus {
    ModelStatus::Hsl {
        lightness: state.lightness,
        hue: state.hue,
        saturation: state.saturation,
        remaining_ms: 0,
    }
}

fn ctl(state: &DeviceModelState) -> ModelStatus {
    ModelStatus::Ctl {
        present_lightness: state.lightness,
        present_temperature: state.temperature,
        target: None,
        remaining_ms: 0,
    }
}
