//! Simulation runner.

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::storage::{SimStorage, StorageError};
use crate::SimulatedDevice;
use meshctl_client::{ClientConfig, MeshClient, MeshClientError};
use meshctl_core::{
    Action, ConnectTarget, Event, Notification, OutboundMessage, RequestId, SecurityKey,
    StateMachine, TimerId,
};
use meshctl_messages::{
    AuthMethod, ConfigRequest, DeviceCapabilities, FilterStatus, FilterType, LinkReportStatus,
    ProvisionBearer, ProvisionFailure, ProvisionResult, ProvisioningData, ProxyFilterRequest,
    UnprovisionedReport,
};
use meshctl_types::{Address, DeviceUuid, NetKeyIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Events processed by `run_until_idle` before it gives up.
const MAX_EVENTS: u64 = 1_000_000;

/// Signal loss seen through a remote scanner.
const REMOTE_RSSI_PENALTY: i8 = 10;

/// Errors driving the simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Client error: {0}")]
    Client(#[from] MeshClientError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Statistics collected during a simulation run.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    /// Events handed to the client.
    pub events_processed: u64,
    /// Actions returned by the client.
    pub actions_generated: u64,
    /// Mesh messages put on the air or handed to the local device.
    pub messages_sent: u64,
    /// Sends that failed for lack of a proxy connection.
    pub messages_unroutable: u64,
    /// Status replies delivered to the client.
    pub replies_delivered: u64,
    /// Replies dropped by replay protection.
    pub replay_rejected: u64,
    /// Timers that fired.
    pub timers_fired: u64,
    /// Timers armed.
    pub timers_set: u64,
    /// Timers disarmed before firing.
    pub timers_cancelled: u64,
    /// Provisioning handshakes that completed.
    pub devices_provisioned: u64,
}

/// An open provisioning link.
#[derive(Debug)]
struct ProvisioningLink {
    uuid: DeviceUuid,
    opened: bool,
    pending: Option<(AuthMethod, ProvisioningData)>,
}

/// Deterministic runner driving a [`MeshClient`] against a [`SimulatedNetwork`].
///
/// Every action the client returns is executed here: messages are delivered
/// to simulated devices, links and timers become scheduled events, and
/// persistence goes to an in-memory [`SimStorage`].
pub struct SimulationRunner {
    client: MeshClient,
    client_config: ClientConfig,
    network: SimulatedNetwork,

    /// Pending events ordered by time, priority and insertion.
    queue: BTreeMap<EventKey, Event>,
    /// Queue key of each armed timer.
    timers: HashMap<TimerId, EventKey>,
    sequence: u64,
    now: Duration,

    /// Proxy node of the open GATT connection.
    link: Option<Address>,
    filter_type: FilterType,
    filter: Vec<Address>,
    prov_link: Option<ProvisioningLink>,
    scanners: HashSet<Address>,
    /// Sources whose next status is dropped by replay protection.
    rejected: HashSet<Address>,

    storage: SimStorage,
    notifications: Vec<Notification>,
    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create a runner with an empty mesh and no network open.
    pub fn new(network_config: NetworkConfig, client_config: ClientConfig) -> Self {
        let seed = network_config.seed;
        info!(seed, "Creating simulation runner");
        Self {
            client: MeshClient::new(
                client_config.clone(),
                Box::new(ChaCha8Rng::seed_from_u64(seed)),
            ),
            client_config,
            network: SimulatedNetwork::new(network_config),
            queue: BTreeMap::new(),
            timers: HashMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            link: None,
            filter_type: FilterType::Accept,
            filter: Vec::new(),
            prov_link: None,
            scanners: HashSet::new(),
            rejected: HashSet::new(),
            storage: SimStorage::new(),
            notifications: Vec::new(),
            stats: SimulationStats::default(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn client(&self) -> &MeshClient {
        &self.client
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn storage(&self) -> &SimStorage {
        &self.storage
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Proxy node the runner holds a connection to.
    pub fn link(&self) -> Option<Address> {
        self.link
    }

    /// Addresses in the proxy filter of the open connection.
    pub fn proxy_filter(&self) -> &[Address] {
        &self.filter
    }

    /// Notifications delivered so far.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Drain the notifications delivered so far.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Whether nothing is scheduled.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Setup
    // ═══════════════════════════════════════════════════════════════════════

    /// Place a device in range.
    pub fn add_device(&mut self, device: SimulatedDevice) {
        debug!(uuid = %device.uuid(), "Adding device");
        self.network.add_device(device);
    }

    /// Take a device out of range or bring it back.
    ///
    /// Links through the device break when it goes away.
    pub fn set_reachable(&mut self, uuid: DeviceUuid, reachable: bool) {
        let Some(device) = self.network.device_mut(uuid) else {
            return;
        };
        device.set_reachable(reachable);
        let unicast = device.unicast();
        debug!(uuid = %uuid, reachable, "Device reachability changed");
        if reachable {
            return;
        }
        if unicast.is_some() && self.link == unicast {
            self.drop_link(self.network.config().latency);
        }
        let opened = self
            .prov_link
            .as_ref()
            .map(|l| l.uuid == uuid && l.opened)
            .unwrap_or(false);
        if opened {
            self.prov_link = None;
            let delay = self.network.config().latency;
            self.schedule(delay, Event::ProvisionLinkReport(LinkReportStatus::Closed));
        }
    }

    /// Invoke an application operation on the client and execute its actions.
    pub fn call<F>(&mut self, op: F) -> Result<(), MeshClientError>
    where
        F: FnOnce(&mut MeshClient) -> Result<Vec<Action>, MeshClientError>,
    {
        self.client.set_time(self.now);
        let actions = op(&mut self.client)?;
        self.process_actions(actions);
        Ok(())
    }

    /// Simulate a restart of the application: a fresh client opens the
    /// network from storage. Scheduled events and the proxy link are lost.
    pub fn restart(&mut self) -> Result<(), SimulationError> {
        let (db, replay) = self.storage.load()?;
        info!(network = %db.name, "Restarting from storage");
        self.queue.clear();
        self.timers.clear();
        self.link = None;
        self.filter.clear();
        self.prov_link = None;
        self.scanners.clear();
        self.rejected.clear();
        let seed = self.network.config().seed.wrapping_add(self.now.as_millis() as u64);
        self.client = MeshClient::new(
            self.client_config.clone(),
            Box::new(ChaCha8Rng::seed_from_u64(seed)),
        );
        self.call(|c| c.network_open(db, replay))?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event loop
    // ═══════════════════════════════════════════════════════════════════════

    /// Process events until nothing is scheduled.
    ///
    /// Returns the number of events processed.
    pub fn run_until_idle(&mut self) -> u64 {
        let mut processed = 0;
        while processed < MAX_EVENTS && self.step() {
            processed += 1;
        }
        if processed == MAX_EVENTS {
            warn!(events = processed, "Simulation did not settle");
        }
        processed
    }

    /// Process events scheduled within `duration` from now, then advance the
    /// clock by `duration`.
    pub fn run_for(&mut self, duration: Duration) -> u64 {
        let end = self.now + duration;
        let mut processed = 0;
        while let Some(key) = self.queue.keys().next().copied() {
            if key.time > end {
                break;
            }
            self.step();
            processed += 1;
        }
        self.now = end;
        processed
    }

    /// Process the next event. Returns false when the queue is empty.
    fn step(&mut self) -> bool {
        let Some((key, event)) = self.queue.pop_first() else {
            return false;
        };
        self.now = key.time;

        match &event {
            Event::Timer(id) => {
                if self.timers.get(id) != Some(&key) {
                    return true;
                }
                self.timers.remove(id);
                self.stats.timers_fired += 1;
            }
            Event::SeqChanged {
                src,
                seq,
                previous_iv,
            } => {
                if self.is_replay(*src, *seq, *previous_iv) {
                    debug!(src = %src, seq, "Replayed message dropped");
                    self.stats.replay_rejected += 1;
                    self.rejected.insert(*src);
                    return true;
                }
            }
            Event::ConfigStatus { src, .. } | Event::ModelStatus { src, .. } => {
                if self.rejected.remove(src) {
                    return true;
                }
                self.stats.replies_delivered += 1;
            }
            _ => {}
        }

        trace!(time = ?self.now, event = event.type_name(), "Processing event");
        self.client.set_time(self.now);
        let actions = self.client.handle(event);
        self.stats.events_processed += 1;
        self.process_actions(actions);
        true
    }

    fn is_replay(&self, src: Address, seq: u32, previous_iv: bool) -> bool {
        match self.client.replay_list().get(src) {
            Some(entry) if entry.previous_iv == previous_iv => seq <= entry.seq,
            Some(entry) => previous_iv && !entry.previous_iv,
            None => false,
        }
    }

    fn schedule(&mut self, delay: Duration, event: Event) {
        let key = EventKey::new(self.now + delay, &event, self.sequence);
        self.sequence += 1;
        self.queue.insert(key, event);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Actions
    // ═══════════════════════════════════════════════════════════════════════

    fn process_actions(&mut self, actions: Vec<Action>) {
        for action in actions {
            self.stats.actions_generated += 1;
            self.process_action(action);
        }
    }

    fn process_action(&mut self, action: Action) {
        trace!(action = action.type_name(), "Executing action");
        match action {
            Action::Send {
                request_id,
                dst,
                key,
                reply,
                message,
            } => self.send(request_id, dst, key, reply, message),

            Action::SetDevKey {
                request_id,
                unicast,
                ..
            } => {
                trace!(node = %unicast, "Device key installed");
                let delay = self.network.config().local_latency;
                self.schedule(
                    delay,
                    Event::TxComplete {
                        request_id,
                        success: true,
                    },
                );
            }

            Action::Connect(target) => self.connect(target),

            Action::Disconnect => {
                let delay = self.network.config().local_latency;
                self.drop_link(delay);
            }

            Action::ProvisionConnect { uuid, scanner, .. } => self.provision_connect(uuid, scanner),

            Action::ProvisionStart { auth, data } => {
                let Some(link) = self.prov_link.as_mut() else {
                    return;
                };
                link.pending = Some((auth, data));
                if auth == AuthMethod::StaticOob {
                    let delay = self.network.hop(false);
                    self.schedule(delay, Event::ProvisionGetOob);
                } else {
                    self.finish_provisioning(None);
                }
            }

            Action::ProvisionSetOob(oob) => self.finish_provisioning(Some(&oob)),

            Action::ProvisionClose => {
                if let Some(link) = self.prov_link.take() {
                    if link.opened {
                        let delay = self.network.hop(false);
                        self.schedule(delay, Event::ProvisionLinkReport(LinkReportStatus::Closed));
                    }
                }
            }

            Action::ScanStart { scanner } => self.scan_start(scanner),

            Action::ScanStop { scanner } => {
                self.scanners.remove(&scanner);
            }

            Action::SetTimer { id, duration } => {
                if let Some(old) = self.timers.remove(&id) {
                    self.queue.remove(&old);
                }
                let key = EventKey::new(self.now + duration, &Event::Timer(id), self.sequence);
                self.sequence += 1;
                self.queue.insert(key, Event::Timer(id));
                self.timers.insert(id, key);
                self.stats.timers_set += 1;
            }

            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&id) {
                    self.queue.remove(&key);
                    self.stats.timers_cancelled += 1;
                }
            }

            Action::PersistDatabase(db) => self.storage.store_database(*db),

            Action::PersistReplayList(records) => self.storage.store_replay(records),

            Action::Notify(notification) => {
                debug!(notification = notification.type_name(), "Notification");
                self.notifications.push(notification);
            }
        }
    }

    fn is_local(&self, address: Address) -> bool {
        self.client
            .db()
            .and_then(|db| db.local_node())
            .map(|n| n.owns(address))
            .unwrap_or(false)
    }

    /// Give the local device the identity of the open network's local node.
    fn attach_local(&mut self) {
        let Some(db) = self.client.db() else {
            return;
        };
        let (Some(node), Some(key)) = (db.local_node(), db.net_key(NetKeyIndex::PRIMARY)) else {
            return;
        };
        let (unicast, net_key, device_key) = (node.unicast, key.transmit_key(), node.device_key);
        self.network.attach_local(unicast, net_key, device_key);
    }

    fn send(
        &mut self,
        request_id: RequestId,
        dst: Address,
        key: SecurityKey,
        reply: bool,
        message: OutboundMessage,
    ) {
        let local = self.is_local(dst);
        let tx_delay = self.network.config().local_latency;
        if !local && self.link.is_none() {
            trace!(dst = %dst, message = message.type_name(), "No proxy connection");
            self.stats.messages_unroutable += 1;
            self.schedule(
                tx_delay,
                Event::TxComplete {
                    request_id,
                    success: false,
                },
            );
            return;
        }
        self.stats.messages_sent += 1;
        self.schedule(
            tx_delay,
            Event::TxComplete {
                request_id,
                success: true,
            },
        );

        let resets_proxy = matches!(message, OutboundMessage::Config(ConfigRequest::NodeReset))
            && Some(dst) == self.link;
        let events = match message {
            OutboundMessage::Config(request) => {
                if local {
                    self.attach_local();
                }
                self.network.deliver_config(dst, &request, local)
            }
            OutboundMessage::ProxyFilter(request) => self.apply_proxy_filter(dst, request),
            OutboundMessage::Model(request) => match key {
                SecurityKey::App(app_key) => {
                    self.network
                        .deliver_model(dst, &request, app_key, reply, local)
                }
                _ => {
                    warn!(dst = %dst, "Model message without application key");
                    vec![]
                }
            },
        };

        let last = events.iter().map(|(delay, _)| *delay).max().unwrap_or_default();
        for (delay, event) in events {
            self.schedule(delay, event);
        }
        if resets_proxy {
            // The reset node drops the connection after answering.
            let delay = last + self.network.config().latency;
            self.drop_link(delay);
        }
    }

    fn apply_proxy_filter(
        &mut self,
        dst: Address,
        request: ProxyFilterRequest,
    ) -> Vec<(Duration, Event)> {
        if self.link != Some(dst) {
            return vec![];
        }
        match request {
            ProxyFilterRequest::SetFilterType(filter_type) => {
                self.filter_type = filter_type;
                self.filter.clear();
            }
            ProxyFilterRequest::AddAddresses(addresses) => {
                for address in addresses {
                    if !self.filter.contains(&address) {
                        self.filter.push(address);
                    }
                }
            }
            ProxyFilterRequest::RemoveAddresses(addresses) => {
                self.filter.retain(|a| !addresses.contains(a));
            }
        }
        let rtt = self.network.hop(false) + self.network.hop(false);
        vec![(
            rtt,
            Event::ProxyFilterStatus {
                src: dst,
                status: FilterStatus {
                    filter_type: self.filter_type,
                    list_size: self.filter.len() as u16,
                },
            },
        )]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proxy link
    // ═══════════════════════════════════════════════════════════════════════

    fn connect(&mut self, target: ConnectTarget) {
        if let Some(proxy) = self.link {
            let delay = self.network.config().local_latency;
            self.schedule(
                delay,
                Event::LinkStatus {
                    connected: true,
                    proxy: Some(proxy),
                },
            );
            return;
        }
        let proxy = match target {
            ConnectTarget::NetworkId(net_key) => self.network.proxy_for(net_key),
            ConnectTarget::NodeIdentity(unicast) => {
                self.network.accepts_identity(unicast).then_some(unicast)
            }
        };
        let Some(proxy) = proxy else {
            debug!(?target, "No proxy advertising");
            return;
        };
        debug!(proxy = %proxy, "Proxy connection opening");
        self.link = Some(proxy);
        self.filter_type = FilterType::Accept;
        self.filter.clear();
        let delay = self.network.hop(false) * 3;
        self.schedule(
            delay,
            Event::LinkStatus {
                connected: true,
                proxy: Some(proxy),
            },
        );
    }

    fn drop_link(&mut self, delay: Duration) {
        if self.link.take().is_none() {
            return;
        }
        self.filter.clear();
        let local = self.client.db().and_then(|db| db.local_node()).map(|n| n.unicast);
        self.scanners.retain(|s| Some(*s) == local);
        self.schedule(
            delay,
            Event::LinkStatus {
                connected: false,
                proxy: None,
            },
        );
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Scanning and provisioning
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether a scanner can hear beacons and relay provisioning.
    fn scanner_available(&self, scanner: Address) -> bool {
        if self.is_local(scanner) {
            return true;
        }
        self.link.is_some()
            && self
                .network
                .device_at(scanner)
                .map(|d| d.is_reachable())
                .unwrap_or(false)
    }

    fn scan_start(&mut self, scanner: Address) {
        if !self.scanner_available(scanner) {
            debug!(scanner = %scanner, "Scanner not reachable");
            return;
        }
        let local = self.is_local(scanner);
        self.scanners.insert(scanner);
        if !local {
            let delay = self.network.hop(false) * 2;
            self.schedule(
                delay,
                Event::ScanStatus {
                    src: scanner,
                    status: 0,
                    scanning: true,
                },
            );
        }
        let reports: Vec<UnprovisionedReport> = self
            .network
            .beacons()
            .filter(|d| d.unicast() != Some(scanner))
            .map(|d| UnprovisionedReport {
                uuid: d.uuid(),
                rssi: if local {
                    d.rssi()
                } else {
                    d.rssi().saturating_sub(REMOTE_RSSI_PENALTY)
                },
                oob_info: 0,
                bearer: if local {
                    d.bearer()
                } else {
                    ProvisionBearer::Adv
                },
                scanner,
            })
            .collect();
        for report in reports {
            let delay = self.network.hop(local) * 4;
            self.schedule(delay, Event::UnprovisionedReport(report));
        }
    }

    fn provision_connect(&mut self, uuid: DeviceUuid, scanner: Address) {
        if !self.scanner_available(scanner) {
            debug!(scanner = %scanner, "Provisioning scanner not reachable");
            return;
        }
        let delay = self.network.hop(false);
        let capabilities: Option<DeviceCapabilities> = match self.network.device(uuid) {
            None => None,
            Some(device) if device.is_provisioned() => None,
            Some(device) if !device.is_reachable() => {
                // Link open times out.
                self.prov_link = Some(ProvisioningLink {
                    uuid,
                    opened: false,
                    pending: None,
                });
                return;
            }
            Some(device) => Some(device.capabilities()),
        };
        let Some(capabilities) = capabilities else {
            self.prov_link = None;
            self.schedule(delay, Event::ProvisionLinkReport(LinkReportStatus::OpenFailed));
            return;
        };
        debug!(uuid = %uuid, scanner = %scanner, "Provisioning link opening");
        self.prov_link = Some(ProvisioningLink {
            uuid,
            opened: true,
            pending: None,
        });
        self.schedule(delay, Event::ProvisionLinkReport(LinkReportStatus::Opened));
        self.schedule(delay * 2, Event::ProvisionCapabilities(capabilities));
    }

    fn finish_provisioning(&mut self, oob: Option<&[u8]>) {
        let Some(link) = self.prov_link.as_mut() else {
            return;
        };
        let Some((auth, data)) = link.pending.take() else {
            return;
        };
        let uuid = link.uuid;
        let device_key = self.network.random_key();
        let delay = self.network.hop(false) * 4;
        let result = match self.network.device_mut(uuid) {
            Some(device) if device.authenticate(auth, oob) => {
                device.provision(&data, device_key);
                self.stats.devices_provisioned += 1;
                ProvisionResult::Success { device_key }
            }
            _ => ProvisionResult::Failed(ProvisionFailure::Confirmation),
        };
        self.schedule(delay, Event::ProvisionEnd(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshctl_client::ClientState;
    use meshctl_test_helpers::{lamp_composition, test_uuid};
    use tracing_test::traced_test;

    fn runner() -> SimulationRunner {
        SimulationRunner::new(NetworkConfig::default(), ClientConfig::default())
    }

    fn open(runner: &mut SimulationRunner) {
        runner
            .call(|c| c.network_create("home", "phone", DeviceUuid::from_bytes([0xAA; 16]), 1))
            .unwrap();
        runner.run_until_idle();
    }

    #[traced_test]
    #[test]
    fn test_network_create_configures_local_device() {
        let mut runner = runner();
        open(&mut runner);

        assert!(runner
            .notifications()
            .contains(&Notification::NetworkOpened { success: true }));
        assert_eq!(runner.client().state(), ClientState::Idle);
        assert_eq!(runner.network().local().unicast(), Some(Address(0x0001)));
        assert!(runner.network().local().app_key(meshctl_types::AppKeyIndex(0)).is_some());
        assert!(runner.storage().database_writes() > 0);
        assert!(runner.is_idle());
    }

    #[traced_test]
    #[test]
    fn test_connect_without_proxy_gives_up() {
        let mut runner = runner();
        open(&mut runner);
        runner.take_notifications();

        runner.call(|c| c.connect()).unwrap();
        runner.run_until_idle();

        assert!(!runner.client().is_connected());
        assert!(runner
            .notifications()
            .contains(&Notification::ConnectStatus {
                connected: false,
                proxy: None
            }));
        assert!(runner.stats().timers_fired > 0);
    }

    #[traced_test]
    #[test]
    fn test_timer_replacement() {
        let mut runner = runner();
        runner.process_action(Action::SetTimer {
            id: TimerId::Connect,
            duration: Duration::from_secs(1),
        });
        runner.process_action(Action::SetTimer {
            id: TimerId::Connect,
            duration: Duration::from_secs(2),
        });
        assert_eq!(runner.queue.len(), 1);
        runner.process_action(Action::CancelTimer {
            id: TimerId::Connect,
        });
        assert!(runner.is_idle());
        assert_eq!(runner.stats().timers_cancelled, 1);
    }

    #[traced_test]
    #[test]
    fn test_scan_reports_local_devices() {
        let mut runner = runner();
        runner.add_device(SimulatedDevice::new(test_uuid(1), lamp_composition()).with_rssi(-40));
        open(&mut runner);

        runner.call(|c| c.scan_unprovisioned(true)).unwrap();
        runner.run_until_idle();

        let results: Vec<_> = runner.client().scan_results().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rssi, -40);
        assert_eq!(results[0].scanner, Address(0x0001));
    }
}
