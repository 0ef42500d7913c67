//! The provisioning client state machine.

use crate::config::ClientConfig;
use crate::error::MeshClientError;
use crate::pending::{PendingKind, PendingOperation, PendingQueue};
use crate::provisioning::ProvisionAttempt;
use crate::state::ClientState;
use indexmap::IndexMap;
use meshctl_core::{Action, Event, Notification, RequestId, StateMachine, TimerId};
use meshctl_messages::{ConfigStatus, FilterStatus, ModelStatus, StatusCode, UnprovisionedReport};
use meshctl_types::{Address, DeviceUuid, MeshDb, NetKeyIndex, ReplayList};
use rand::RngCore;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Mesh provisioning client.
///
/// Owns the open network database and drives provisioning, configuration
/// and key refresh. Application operations are methods returning the actions
/// to perform; transport reports enter through [`StateMachine::handle`].
pub struct MeshClient {
    pub(crate) config: ClientConfig,

    /// Source of fresh key material.
    pub(crate) rng: Box<dyn RngCore + Send>,

    pub(crate) now: Duration,

    pub(crate) state: ClientState,

    /// Open network; `None` while closed.
    pub(crate) db: Option<MeshDb>,

    pub(crate) replay: ReplayList,

    /// Proxy connection is up.
    pub(crate) connected: bool,

    /// Node acting as our proxy.
    pub(crate) proxy: Option<Address>,

    pub(crate) connect_retries: u32,

    /// State to return to once a lost link is re-established.
    pub(crate) resume: Option<ClientState>,

    /// Node connected to by node identity.
    pub(crate) identity_target: Option<Address>,

    /// Node being configured (the local address during network open).
    pub(crate) target: Option<Address>,

    pub(crate) attempt: Option<ProvisionAttempt>,

    /// Best report per unprovisioned device, in order of discovery.
    pub(crate) scan_results: IndexMap<DeviceUuid, UnprovisionedReport>,

    /// Provisioners currently scanning.
    pub(crate) scanners: Vec<Address>,

    pub(crate) pending: PendingQueue,

    pub(crate) next_request_id: RequestId,

    /// A reply changed the database since the last persist.
    pub(crate) db_dirty: bool,

    /// An operation of the current reconfiguration failed.
    pub(crate) op_failed: bool,

    /// Network key whose refresh cycle is being driven.
    pub(crate) key_refresh: Option<NetKeyIndex>,

    /// Network key whose refresh halted on unreachable nodes.
    pub(crate) stalled: Option<NetKeyIndex>,

    /// Group record to delete once its members are reconfigured.
    pub(crate) group_deletion: Option<Address>,

    /// Transaction identifier for model set messages.
    pub(crate) tid: u8,
}

impl std::fmt::Debug for MeshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshClient")
            .field("state", &self.state)
            .field("open", &self.db.is_some())
            .field("connected", &self.connected)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl MeshClient {
    /// Create a client with no network open.
    pub fn new(config: ClientConfig, rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            config,
            rng,
            now: Duration::ZERO,
            state: ClientState::Idle,
            db: None,
            replay: ReplayList::new(),
            connected: false,
            proxy: None,
            connect_retries: 0,
            resume: None,
            identity_target: None,
            target: None,
            attempt: None,
            scan_results: IndexMap::new(),
            scanners: Vec::new(),
            pending: PendingQueue::new(),
            next_request_id: RequestId(1),
            db_dirty: false,
            op_failed: false,
            key_refresh: None,
            stalled: None,
            group_deletion: None,
            tid: 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Open network database.
    pub fn db(&self) -> Option<&MeshDb> {
        self.db.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.db.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn proxy(&self) -> Option<Address> {
        self.proxy
    }

    pub fn replay_list(&self) -> &ReplayList {
        &self.replay
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Queued configuration operations, head first.
    pub fn pending(&self) -> impl Iterator<Item = &PendingOperation> {
        self.pending.iter()
    }

    /// Unprovisioned devices heard since the scan started.
    pub fn scan_results(&self) -> impl Iterator<Item = &UnprovisionedReport> {
        self.scan_results.values()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn db_ref(&self) -> Result<&MeshDb, MeshClientError> {
        self.db.as_ref().ok_or(MeshClientError::NetworkClosed)
    }

    pub(crate) fn db_mut(&mut self) -> Result<&mut MeshDb, MeshClientError> {
        self.db.as_mut().ok_or(MeshClientError::NetworkClosed)
    }

    pub(crate) fn require_idle(&self) -> Result<(), MeshClientError> {
        if self.state == ClientState::Idle {
            Ok(())
        } else {
            Err(MeshClientError::InvalidState(self.state.name()))
        }
    }

    /// Primary address of the local device.
    pub(crate) fn local_address(&self) -> Option<Address> {
        self.db.as_ref()?.local_node().map(|n| n.unicast)
    }

    /// Whether an address belongs to the local device.
    pub(crate) fn is_local(&self, address: Address) -> bool {
        self.db
            .as_ref()
            .and_then(|db| db.local_node())
            .map(|n| n.owns(address))
            .unwrap_or(false)
    }

    /// Address range of the node owning `address`.
    pub(crate) fn node_range(&self, address: Address) -> (Address, Address) {
        self.db
            .as_ref()
            .and_then(|db| db.node(address))
            .map(|n| (n.unicast, n.last_address()))
            .unwrap_or((address, address))
    }

    pub(crate) fn next_request(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id = id.next();
        id
    }

    pub(crate) fn set_state(&mut self, state: ClientState) {
        if state != self.state {
            debug!(from = %self.state, to = %state, "State transition");
            self.state = state;
        }
    }

    /// Return to Idle, forgetting the finished procedure.
    pub(crate) fn go_idle(&mut self) {
        self.set_state(ClientState::Idle);
        self.target = None;
        self.resume = None;
        self.identity_target = None;
        self.op_failed = false;
    }

    pub(crate) fn notify(actions: &mut Vec<Action>, notification: Notification) {
        actions.push(Action::Notify(notification));
    }

    /// Store the database and tell the application.
    pub(crate) fn persist(&mut self, actions: &mut Vec<Action>) {
        if let Some(db) = &self.db {
            actions.push(Action::PersistDatabase(Box::new(db.clone())));
            actions.push(Action::Notify(Notification::DatabaseChanged));
        }
        self.db_dirty = false;
    }

    pub(crate) fn persist_if_dirty(&mut self, actions: &mut Vec<Action>) {
        if self.db_dirty {
            self.persist(actions);
        }
    }

    pub(crate) fn persist_replay(&self, actions: &mut Vec<Action>) {
        actions.push(Action::PersistReplayList(self.replay.encode()));
    }

    /// Schedule sending of the queue head after the current event.
    pub(crate) fn prime() -> Action {
        Action::SetTimer {
            id: TimerId::ExecutePending,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn queue(&mut self, dst: Address, kind: PendingKind) {
        trace!(op = kind.type_name(), dst = %dst, "Queueing operation");
        self.pending.push(dst, kind);
    }

    /// Queue a batch and enter Reconfiguration.
    pub(crate) fn start_reconfiguration(
        &mut self,
        target: Option<Address>,
        ops: Vec<(Address, PendingKind)>,
    ) -> Vec<Action> {
        for (dst, kind) in ops {
            self.queue(dst, kind);
        }
        self.target = target;
        self.op_failed = false;
        self.set_state(ClientState::Reconfiguration);
        vec![Self::prime()]
    }

    pub(crate) fn op_is_local(&self, op: &PendingOperation) -> bool {
        matches!(op.kind, PendingKind::DevKeySet { .. }) || self.is_local(op.dst)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queue execution
    // ═══════════════════════════════════════════════════════════════════════

    /// Send the queue head, or finish the procedure when the queue is empty.
    pub(crate) fn execute_pending_operation(&mut self) -> Vec<Action> {
        let (local, in_flight) = match self.pending.front() {
            Some(head) => (self.op_is_local(head), head.request.is_some()),
            None => return self.on_queue_drained(),
        };
        if in_flight {
            return vec![];
        }
        if !local && !self.connected {
            if self.state.is_connecting()
                || matches!(
                    self.state,
                    ClientState::ProvisionDisconnecting
                        | ClientState::ConfigureDisconnecting
                        | ClientState::NodeIdentityDisconnecting
                )
            {
                // Link is on its way; the head goes out once it is up.
                return vec![];
            }
            return self.begin_reconnect();
        }

        let request_id = self.next_request();
        let (dst, kind, attempt) = match self.pending.front_mut() {
            Some(head) => {
                head.request = Some(request_id);
                head.attempts += 1;
                (head.dst, head.kind.clone(), head.attempts)
            }
            None => return vec![],
        };
        let completes_on_tx = kind.completes_on_tx(local);

        debug!(
            op = kind.type_name(),
            dst = %dst,
            request_id = %request_id,
            attempt,
            "Sending pending operation"
        );

        let mut actions = Vec::with_capacity(2);
        match (&kind, kind.to_message()) {
            (
                PendingKind::DevKeySet {
                    unicast,
                    element_count,
                    key,
                },
                _,
            ) => actions.push(Action::SetDevKey {
                request_id,
                unicast: *unicast,
                element_count: *element_count,
                key: *key,
            }),
            (_, Some((key, message))) => actions.push(Action::Send {
                request_id,
                dst,
                key,
                reply: !completes_on_tx,
                message,
            }),
            (_, None) => {
                warn!(op = kind.type_name(), "Operation has no message, dropping");
                self.pending.pop_front();
                actions.push(Self::prime());
                return actions;
            }
        }
        if !completes_on_tx {
            actions.push(Action::SetTimer {
                id: TimerId::RequestTimeout,
                duration: self.config.request_timeout,
            });
        }
        actions
    }

    /// Pop the head after success and move on.
    fn complete_head(&mut self, status: Option<&ConfigStatus>) -> Vec<Action> {
        let mut actions = vec![Action::CancelTimer {
            id: TimerId::RequestTimeout,
        }];
        if let Some(op) = self.pending.pop_front() {
            self.apply_operation(&op, status);
            if op.kind.records_state() {
                self.persist(&mut actions);
            }
        }
        actions.push(Self::prime());
        actions
    }

    fn on_tx_complete(&mut self, request_id: RequestId, success: bool) -> Vec<Action> {
        if !self.pending.head_is(request_id) {
            trace!(request_id = %request_id, "TX complete for untracked request");
            return vec![];
        }
        let (dst, completes) = match self.pending.front() {
            Some(head) => (head.dst, head.kind.completes_on_tx(self.op_is_local(head))),
            None => return vec![],
        };
        if !success {
            warn!(dst = %dst, request_id = %request_id, "Transmission failed");
            return self.on_op_unreachable(dst);
        }
        if completes {
            self.complete_head(None)
        } else {
            vec![]
        }
    }

    fn on_request_timeout(&mut self) -> Vec<Action> {
        let (dst, attempts) = match self.pending.front() {
            Some(head) if head.request.is_some() => (head.dst, head.attempts),
            _ => return vec![],
        };
        if attempts < self.config.max_send_attempts {
            debug!(dst = %dst, attempts, "No reply, retransmitting");
            self.pending.reset_head();
            return self.execute_pending_operation();
        }
        warn!(dst = %dst, attempts, "No reply after all attempts");
        self.on_op_unreachable(dst)
    }

    /// The in-flight head's node could not be reached.
    pub(crate) fn on_op_unreachable(&mut self, dst: Address) -> Vec<Action> {
        let mut actions = vec![Action::CancelTimer {
            id: TimerId::RequestTimeout,
        }];
        let (first, last) = self.node_range(dst);
        let target_hit = self.target.map(|t| t >= first && t <= last).unwrap_or(false);

        match self.state {
            ClientState::Configuration | ClientState::GetRemoteCompositionData
                if target_hit =>
            {
                actions.extend(self.fail_configuration("node unreachable"));
            }
            _ => {
                let purged = self.pending.purge_range(first, last);
                warn!(node = %first, purged, state = %self.state, "Dropping operations for unreachable node");
                self.op_failed = true;
                if let Some(node) = self.db.as_ref().and_then(|db| db.node(first)) {
                    Self::notify(
                        &mut actions,
                        Notification::NodeConnectStatus {
                            name: node.name.clone(),
                            address: node.unicast,
                            state: meshctl_core::NodeConnectState::UnreachableWarning,
                        },
                    );
                }
                actions.push(Self::prime());
            }
        }
        actions
    }

    fn on_config_status(&mut self, src: Address, status: ConfigStatus) -> Vec<Action> {
        if !self.pending.head_matches_config(src, &status) {
            debug!(src = %src, status = status.type_name(), "Ignoring unmatched reply");
            return vec![];
        }

        if let ConfigStatus::CompositionData { page, data } = status {
            let mut actions = vec![Action::CancelTimer {
                id: TimerId::RequestTimeout,
            }];
            if let Some(op) = self.pending.pop_front() {
                actions.extend(self.on_composition_data(op.dst, page, &data));
            }
            return actions;
        }

        // The local device keeps its keys across restarts; any other node
        // answering ALREADY_STORED holds a different key at that index.
        let code = status.status_code();
        let reloaded = code == StatusCode::KEY_INDEX_ALREADY_STORED
            && self.pending.front().is_some_and(|op| {
                matches!(
                    op.kind,
                    PendingKind::NetKeyAdd { .. } | PendingKind::AppKeyAdd { .. }
                ) && self.is_local(op.dst)
            });
        if code.is_success() || reloaded {
            return self.complete_head(Some(&status));
        }

        let mut actions = vec![Action::CancelTimer {
            id: TimerId::RequestTimeout,
        }];
        let op = match self.pending.pop_front() {
            Some(op) => op,
            None => return actions,
        };
        let (first, last) = self.node_range(op.dst);
        let initial = self.state == ClientState::Configuration
            && self.attempt.is_some()
            && self.target.is_some_and(|t| t >= first && t <= last);
        if initial {
            warn!(op = op.kind.type_name(), dst = %src, status = %code, "Configuration rejected");
            actions.extend(self.fail_provisioning(&format!(
                "{} rejected: {}",
                op.kind.type_name(),
                code
            )));
        } else {
            warn!(op = op.kind.type_name(), dst = %src, status = %code, "Request rejected, continuing");
            self.op_failed = true;
            actions.push(Self::prime());
        }
        actions
    }

    fn on_model_status(&mut self, src: Address, status: ModelStatus) -> Vec<Action> {
        if self.pending.head_matches_model(src, &status) {
            let mut actions = vec![Action::CancelTimer {
                id: TimerId::RequestTimeout,
            }];
            if let Some(op) = self.pending.pop_front() {
                self.on_sensor_discovery(&op, &status);
                self.persist(&mut actions);
            }
            actions.push(Self::prime());
            return actions;
        }
        trace!(src = %src, status = status.type_name(), "Model status");
        vec![Action::Notify(Notification::ModelState { src, status })]
    }

    fn on_filter_status(&mut self, src: Address, status: FilterStatus) -> Vec<Action> {
        if !self.pending.head_matches_filter(src) {
            return vec![];
        }
        debug!(src = %src, list_size = status.list_size, "Proxy filter updated");
        let mut actions = vec![Action::CancelTimer {
            id: TimerId::RequestTimeout,
        }];
        self.pending.pop_front();
        actions.push(Self::prime());
        actions
    }

    /// The queue ran empty: finish whatever procedure filled it.
    fn on_queue_drained(&mut self) -> Vec<Action> {
        match self.state {
            ClientState::Configuration => self.finish_configuration(),
            ClientState::Reconfiguration => self.finish_reconfiguration(),
            ClientState::KeyRefresh1 | ClientState::KeyRefresh2 | ClientState::KeyRefresh3 => {
                self.on_key_refresh_drained()
            }
            ClientState::GetRemoteCompositionData => {
                self.fail_provisioning("composition data not received")
            }
            ClientState::Idle => {
                let mut actions = vec![];
                self.persist_if_dirty(&mut actions);
                actions
            }
            _ => vec![],
        }
    }

    /// Finish a Reconfiguration batch.
    pub(crate) fn finish_reconfiguration(&mut self) -> Vec<Action> {
        let mut actions = vec![];
        if let Some(group) = self.group_deletion.take() {
            if let Some(db) = self.db.as_mut() {
                db.remove_group(group);
            }
            self.db_dirty = true;
        }
        self.persist_if_dirty(&mut actions);
        let success = !self.op_failed;
        Self::notify(
            &mut actions,
            Notification::ConfigComplete {
                target: self.target,
                success,
            },
        );
        self.go_idle();
        actions.extend(self.maybe_start_key_refresh());
        actions
    }
}

impl StateMachine for MeshClient {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        trace!(event = event.type_name(), state = %self.state, "Handling event");

        if self.db.is_none() {
            if let Event::LinkStatus { connected, proxy } = event {
                self.connected = connected;
                self.proxy = if connected { proxy } else { None };
            }
            return vec![];
        }
        if ignored(self.state, &event) {
            trace!(event = event.type_name(), state = %self.state, "Event ignored in state");
            return vec![];
        }

        match event {
            Event::Timer(TimerId::ExecutePending) => self.execute_pending_operation(),
            Event::Timer(TimerId::RequestTimeout) => self.on_request_timeout(),
            Event::Timer(TimerId::ProvisionLink) => self.on_provision_link_timeout(),
            Event::Timer(TimerId::Connect) => self.on_connect_timeout(),
            Event::LinkStatus { connected, proxy } => self.on_link_status(connected, proxy),
            Event::TxComplete {
                request_id,
                success,
            } => self.on_tx_complete(request_id, success),
            Event::ConfigStatus { src, status } => self.on_config_status(src, status),
            Event::ModelStatus { src, status } => self.on_model_status(src, status),
            Event::ProxyFilterStatus { src, status } => self.on_filter_status(src, status),
            Event::ProvisionLinkReport(status) => self.on_provision_link_report(status),
            Event::ProvisionCapabilities(caps) => self.on_capabilities(caps),
            Event::ProvisionGetOob => self.on_get_oob(),
            Event::ProvisionEnd(result) => self.on_provision_end(result),
            Event::ScanCapabilities { src, max_items } => {
                self.on_scan_capabilities(src, max_items)
            }
            Event::ScanStatus {
                src,
                status,
                scanning,
            } => self.on_scan_status(src, status, scanning),
            Event::UnprovisionedReport(report) => self.on_unprovisioned_report(report),
            Event::SeqChanged {
                src,
                seq,
                previous_iv,
            } => self.on_seq_changed(src, seq, previous_iv),
            Event::IvIndexChanged {
                iv_index,
                update_in_progress,
            } => self.on_iv_index_changed(iv_index, update_in_progress),
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}

/// (state, event) pairs the client drops without looking further.
fn ignored(state: ClientState, event: &Event) -> bool {
    match (state, event) {
        (
            ClientState::Provisioning,
            Event::ProvisionCapabilities(_) | Event::ProvisionGetOob | Event::ProvisionEnd(_),
        ) => false,
        (_, Event::ProvisionCapabilities(_) | Event::ProvisionGetOob | Event::ProvisionEnd(_)) => {
            true
        }
        (
            ClientState::Connecting | ClientState::ProvisionDisconnecting,
            Event::Timer(TimerId::ProvisionLink),
        ) => false,
        (_, Event::Timer(TimerId::ProvisionLink)) => true,
        (state, Event::Timer(TimerId::Connect)) => !state.is_connecting(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{answer, connect, new_client, open_client, pump_with};
    use crate::DeviceConfig;
    use meshctl_core::OutboundMessage;
    use meshctl_messages::{ProvisionFailure, ProvisionResult};
    use meshctl_test_helpers::{test_db, test_node};
    use meshctl_types::models::GENERIC_ONOFF_SERVER;
    use meshctl_types::ModelId;
    use std::collections::HashMap;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_stray_provisioning_events_leave_reconfiguration_alone() {
        let mut client = open_client();
        let lamp = Address(0x0010);
        client
            .db
            .as_mut()
            .unwrap()
            .add_node(test_node(5, 0x0010, &[&[ModelId::Sig(GENERIC_ONOFF_SERVER)]]));
        connect(&mut client);

        let config = DeviceConfig::unchanged().with_default_ttl(9);
        let actions = client.set_device_config(Some("node-5"), config).unwrap();
        pump_with(&mut client, actions, |c, dst, message: &OutboundMessage| {
            if dst == lamp {
                None
            } else {
                answer(c, dst, message, &HashMap::new())
            }
        });
        assert_eq!(client.state(), ClientState::Reconfiguration);
        assert_eq!(client.pending().count(), 1);

        for event in [
            Event::ProvisionEnd(ProvisionResult::Failed(ProvisionFailure::LinkLost)),
            Event::ProvisionGetOob,
            Event::Timer(TimerId::ProvisionLink),
            Event::Timer(TimerId::Connect),
        ] {
            assert!(client.handle(event).is_empty());
        }
        assert_eq!(client.state(), ClientState::Reconfiguration);
        assert_eq!(client.pending().count(), 1);
        assert!(client.pending().next().unwrap().request.is_some());
    }

    #[traced_test]
    #[test]
    fn test_failed_open_cancels_timers() {
        let mut client = new_client();
        client.network_open(test_db(), ReplayList::new()).unwrap();
        let actions = client.handle(Event::Timer(TimerId::ExecutePending));
        assert!(actions.contains(&Action::SetTimer {
            id: TimerId::RequestTimeout,
            duration: client.config().request_timeout,
        }));

        let actions = client.handle(Event::ConfigStatus {
            src: Address(0x0001),
            status: ConfigStatus::CompositionData {
                page: 0,
                data: vec![0x01],
            },
        });

        for id in [
            TimerId::RequestTimeout,
            TimerId::ExecutePending,
            TimerId::Connect,
        ] {
            assert!(actions.contains(&Action::CancelTimer { id }));
        }
        assert!(actions.contains(&Action::Notify(Notification::NetworkOpened { success: false })));
        assert!(!client.is_open());
        assert_eq!(client.state(), ClientState::Idle);
    }
}
