//! Network lifecycle, proxy connections and replay protection.

use crate::client::MeshClient;
use crate::error::MeshClientError;
use crate::pending::PendingKind;
use crate::resolver::node_for_name;
use crate::state::ClientState;
use meshctl_core::{
    Action, ComponentInfo, ConnectTarget, ElementInfo, NodeConnectState, Notification, TimerId,
};
use meshctl_types::{
    is_core_model, Address, DeviceUuid, Key128, MeshDb, NetKeyIndex, ReplayList,
};
use tracing::{debug, info, warn};

impl MeshClient {
    // ═══════════════════════════════════════════════════════════════════════
    // Open and close
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a network with fresh keys and open it.
    pub fn network_create(
        &mut self,
        name: &str,
        provisioner_name: &str,
        provisioner_uuid: DeviceUuid,
        element_count: u8,
    ) -> Result<Vec<Action>, MeshClientError> {
        if self.db.is_some() {
            return Err(MeshClientError::InvalidState("network already open"));
        }
        if name.is_empty() || provisioner_name.is_empty() {
            return Err(MeshClientError::InvalidArgs("empty name".into()));
        }
        if element_count == 0 {
            return Err(MeshClientError::InvalidArgs("element count 0".into()));
        }
        let net_key = Key128::random(&mut *self.rng);
        let app_key = Key128::random(&mut *self.rng);
        let dev_key = Key128::random(&mut *self.rng);
        let db = MeshDb::new(
            name,
            provisioner_name,
            provisioner_uuid,
            element_count,
            net_key,
            app_key,
            dev_key,
        );
        info!(network = name, "Creating network");
        let mut actions = vec![Action::PersistDatabase(Box::new(db.clone()))];
        actions.extend(self.network_open(db, ReplayList::new())?);
        Ok(actions)
    }

    /// Open a stored network and configure the local device from it.
    ///
    /// Completion is reported with [`Notification::NetworkOpened`].
    pub fn network_open(
        &mut self,
        db: MeshDb,
        replay: ReplayList,
    ) -> Result<Vec<Action>, MeshClientError> {
        if self.db.is_some() {
            return Err(MeshClientError::InvalidState("network already open"));
        }
        let local = db
            .local_node()
            .map(|n| n.unicast)
            .ok_or_else(|| MeshClientError::NetworkDbError("no local node".into()))?;
        info!(network = %db.name, nodes = db.nodes.len(), local = %local, "Opening network");

        self.db = Some(db);
        self.replay = replay;
        self.pending.clear();
        self.scan_results.clear();
        self.scanners.clear();
        self.stalled = None;
        self.key_refresh = None;
        self.db_dirty = false;
        self.target = Some(local);
        self.set_state(ClientState::Configuration);
        self.queue(local, PendingKind::CompositionGet { page: 0 });
        Ok(vec![Self::prime()])
    }

    /// Close the network, abandoning any procedure in progress.
    pub fn network_close(&mut self) -> Result<Vec<Action>, MeshClientError> {
        self.db_ref()?;
        let mut actions = self.cancel_timers();
        if self.attempt.take().is_some() {
            actions.push(Action::ProvisionClose);
        }
        actions.extend(self.stop_scanning());
        if self.connected {
            actions.push(Action::Disconnect);
        }
        self.persist_if_dirty(&mut actions);
        info!("Closing network");

        self.pending.clear();
        self.go_idle();
        self.db = None;
        self.connected = false;
        self.proxy = None;
        self.key_refresh = None;
        self.stalled = None;
        self.group_deletion = None;
        self.scan_results.clear();
        Ok(actions)
    }

    pub(crate) fn cancel_timers(&self) -> Vec<Action> {
        [
            TimerId::ExecutePending,
            TimerId::RequestTimeout,
            TimerId::ProvisionLink,
            TimerId::Connect,
        ]
        .into_iter()
        .map(|id| Action::CancelTimer { id })
        .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Connections
    // ═══════════════════════════════════════════════════════════════════════

    /// Connect to any proxy of the network.
    pub fn connect(&mut self) -> Result<Vec<Action>, MeshClientError> {
        self.db_ref()?;
        if self.connected {
            return Ok(vec![Action::Notify(Notification::ConnectStatus {
                connected: true,
                proxy: self.proxy,
            })]);
        }
        self.require_idle()?;
        self.resume = None;
        self.connect_retries = 0;
        self.set_state(ClientState::NetworkConnect);
        Ok(self.connect_actions(ConnectTarget::NetworkId(NetKeyIndex::PRIMARY)))
    }

    /// Connect to a specific node as proxy by node identity.
    pub fn connect_node(&mut self, name: &str) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        let node = node_for_name(db, name)
            .ok_or_else(|| MeshClientError::NotFound(name.to_string()))?;
        let (unicast, node_name, blocked) = (node.unicast, node.name.clone(), node.blocked);
        if self.is_local(unicast) {
            return Err(MeshClientError::InvalidArgs("cannot connect to the local device".into()));
        }
        if blocked {
            return Err(MeshClientError::InvalidState("node is being removed"));
        }
        self.require_idle()?;

        if self.connected && self.proxy == Some(unicast) {
            return Ok(vec![Action::Notify(Notification::NodeConnectStatus {
                name: node_name,
                address: unicast,
                state: NodeConnectState::Connected,
            })]);
        }
        info!(node = %unicast, "Connecting to node");
        self.identity_target = Some(unicast);
        self.connect_retries = 0;
        if self.connected {
            self.set_state(ClientState::NodeIdentityDisconnecting);
            return Ok(vec![Action::Disconnect]);
        }
        self.set_state(ClientState::NodeIdentityConnecting);
        Ok(self.connect_actions(ConnectTarget::NodeIdentity(unicast)))
    }

    /// Drop the proxy connection, abandoning queued operations.
    pub fn disconnect(&mut self) -> Result<Vec<Action>, MeshClientError> {
        self.db_ref()?;
        let mut actions = self.abort_all();
        if self.connected {
            actions.push(Action::Disconnect);
        }
        Ok(actions)
    }

    /// Abandon queued operations: all of them, or those for one node.
    pub fn abort(&mut self, target: Option<Address>) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        let Some(address) = target else {
            return Ok(self.abort_all());
        };
        let node = db
            .node(address)
            .ok_or_else(|| MeshClientError::NotFound(format!("node {}", address)))?;
        let (first, last) = (node.unicast, node.last_address());
        let provisioning = self.attempt.as_ref().and_then(|a| a.unicast) == Some(first);
        if provisioning {
            return Ok(self.fail_provisioning("aborted"));
        }
        let head_hit = self
            .pending
            .front()
            .map(|op| op.dst >= first && op.dst <= last)
            .unwrap_or(false);
        let purged = self.pending.purge_range(first, last);
        info!(node = %first, purged, "Aborted operations for node");
        let mut actions = vec![];
        if head_hit {
            actions.push(Action::CancelTimer {
                id: TimerId::RequestTimeout,
            });
            self.op_failed = true;
        }
        if purged > 0 {
            actions.push(Self::prime());
        }
        Ok(actions)
    }

    fn abort_all(&mut self) -> Vec<Action> {
        if self.attempt.is_some() {
            return self.fail_provisioning("aborted");
        }
        let mut actions = self.cancel_timers();
        let purged = self.pending.len();
        self.pending.clear();
        match self.state {
            ClientState::Reconfiguration => {
                self.group_deletion = None;
                Self::notify(
                    &mut actions,
                    Notification::ConfigComplete {
                        target: self.target,
                        success: false,
                    },
                );
            }
            state if state.is_key_refresh() => {
                // The cycle keeps its phase and waits for an explicit resume.
                self.stalled = self.key_refresh.take();
            }
            _ => {}
        }
        self.persist_if_dirty(&mut actions);
        if purged > 0 || self.state != ClientState::Idle {
            info!(purged, state = %self.state, "Aborted");
        }
        self.go_idle();
        actions
    }

    fn connect_actions(&self, target: ConnectTarget) -> Vec<Action> {
        vec![
            Action::Connect(target),
            Action::SetTimer {
                id: TimerId::Connect,
                duration: self.config.connect_timeout,
            },
        ]
    }

    /// The queue head needs the link and it is down: reconnect, then resume.
    pub(crate) fn begin_reconnect(&mut self) -> Vec<Action> {
        if self.state.is_connecting() {
            return vec![];
        }
        self.resume = Some(self.state);
        self.connect_retries = 0;
        self.pending.reset_head();
        match self.identity_target {
            Some(unicast) => {
                debug!(node = %unicast, resume = %self.state, "Reconnecting to node");
                self.set_state(ClientState::NodeConnecting);
                self.connect_actions(ConnectTarget::NodeIdentity(unicast))
            }
            None => {
                debug!(resume = %self.state, "Reconnecting to network");
                self.set_state(ClientState::NetworkConnect);
                self.connect_actions(ConnectTarget::NetworkId(NetKeyIndex::PRIMARY))
            }
        }
    }

    pub(crate) fn on_link_status(&mut self, connected: bool, proxy: Option<Address>) -> Vec<Action> {
        self.connected = connected;
        self.proxy = if connected { proxy } else { None };
        if connected {
            self.on_link_up()
        } else {
            self.on_link_down()
        }
    }

    fn on_link_up(&mut self) -> Vec<Action> {
        let mut actions = vec![];
        let status = Notification::ConnectStatus {
            connected: true,
            proxy: self.proxy,
        };
        if self.state.is_connecting() {
            actions.push(Action::CancelTimer {
                id: TimerId::Connect,
            });
        }
        info!(proxy = ?self.proxy, state = %self.state, "Connected");
        Self::notify(&mut actions, status);

        match self.state {
            ClientState::NetworkConnect => match self.resume.take() {
                Some(resume) => {
                    self.set_state(resume);
                    actions.push(Self::prime());
                }
                None => {
                    self.go_idle();
                    self.stalled = None;
                    actions.extend(self.maybe_start_key_refresh());
                }
            },
            ClientState::NodeConnecting => {
                let resume = self
                    .resume
                    .take()
                    .unwrap_or(ClientState::GetRemoteCompositionData);
                self.set_state(resume);
                actions.push(Self::prime());
            }
            ClientState::NodeIdentityConnecting | ClientState::NodeIdentityReconnecting => {
                let reached = self.state == ClientState::NodeIdentityConnecting;
                if let Some((name, address)) = self.identity_node() {
                    let state = if reached {
                        NodeConnectState::Connected
                    } else {
                        NodeConnectState::UnreachableError
                    };
                    Self::notify(
                        &mut actions,
                        Notification::NodeConnectStatus {
                            name,
                            address,
                            state,
                        },
                    );
                }
                self.go_idle();
            }
            _ => {}
        }
        actions
    }

    fn on_link_down(&mut self) -> Vec<Action> {
        let mut actions = vec![];
        if self.pending.in_flight().is_some() {
            actions.push(Action::CancelTimer {
                id: TimerId::RequestTimeout,
            });
            self.pending.reset_head();
        }
        match self.state {
            ClientState::NetworkConnect
            | ClientState::NodeConnecting
            | ClientState::NodeIdentityConnecting
            | ClientState::NodeIdentityReconnecting => {
                actions.push(Action::CancelTimer {
                    id: TimerId::Connect,
                });
                actions.extend(self.on_connect_failed());
                return actions;
            }
            _ => {}
        }

        info!(state = %self.state, "Disconnected");
        Self::notify(
            &mut actions,
            Notification::ConnectStatus {
                connected: false,
                proxy: None,
            },
        );
        match self.state {
            ClientState::NodeIdentityDisconnecting => {
                if let Some(unicast) = self.identity_target {
                    self.connect_retries = 0;
                    self.set_state(ClientState::NodeIdentityConnecting);
                    actions.extend(self.connect_actions(ConnectTarget::NodeIdentity(unicast)));
                } else {
                    self.go_idle();
                }
            }
            ClientState::ConfigureDisconnecting => {
                self.go_idle();
                actions.extend(self.maybe_start_key_refresh());
            }
            ClientState::Configuration
            | ClientState::GetRemoteCompositionData
            | ClientState::Reconfiguration
            | ClientState::KeyRefresh1
            | ClientState::KeyRefresh2
            | ClientState::KeyRefresh3 => {
                let needs_link = self
                    .pending
                    .front()
                    .map(|op| !self.op_is_local(op))
                    .unwrap_or(false);
                if needs_link {
                    actions.extend(self.begin_reconnect());
                }
            }
            _ => {}
        }
        actions
    }

    pub(crate) fn on_connect_timeout(&mut self) -> Vec<Action> {
        if !self.state.is_connecting() {
            return vec![];
        }
        debug!(state = %self.state, "Connect timed out");
        self.on_connect_failed()
    }

    fn on_connect_failed(&mut self) -> Vec<Action> {
        self.connect_retries += 1;
        if self.connect_retries <= self.config.max_connect_retries {
            let target = match self.state {
                ClientState::NodeConnecting | ClientState::NodeIdentityConnecting => self
                    .identity_target
                    .map(ConnectTarget::NodeIdentity),
                _ => Some(ConnectTarget::NetworkId(NetKeyIndex::PRIMARY)),
            };
            if let Some(target) = target {
                debug!(attempt = self.connect_retries, ?target, "Retrying connection");
                return self.connect_actions(target);
            }
        }

        warn!(state = %self.state, attempts = self.connect_retries, "Connection failed");
        let mut actions = vec![];
        match self.state {
            ClientState::NetworkConnect | ClientState::NodeConnecting => match self.resume.take() {
                Some(resume) => actions.extend(self.fail_resumed(resume)),
                None if self.state == ClientState::NodeConnecting => {
                    actions.extend(self.fail_provisioning("node unreachable"));
                }
                None => {
                    Self::notify(
                        &mut actions,
                        Notification::ConnectStatus {
                            connected: false,
                            proxy: None,
                        },
                    );
                    self.go_idle();
                }
            },
            ClientState::NodeIdentityConnecting => {
                // Fall back to any proxy, then report the node unreachable.
                self.connect_retries = 0;
                self.set_state(ClientState::NodeIdentityReconnecting);
                actions.extend(self.connect_actions(ConnectTarget::NetworkId(NetKeyIndex::PRIMARY)));
            }
            ClientState::NodeIdentityReconnecting => {
                if let Some((name, address)) = self.identity_node() {
                    Self::notify(
                        &mut actions,
                        Notification::NodeConnectStatus {
                            name,
                            address,
                            state: NodeConnectState::UnreachableError,
                        },
                    );
                }
                Self::notify(
                    &mut actions,
                    Notification::ConnectStatus {
                        connected: false,
                        proxy: None,
                    },
                );
                self.go_idle();
            }
            _ => {}
        }
        actions
    }

    /// The link needed by an interrupted procedure could not be restored.
    fn fail_resumed(&mut self, resume: ClientState) -> Vec<Action> {
        self.set_state(resume);
        match resume {
            ClientState::Configuration | ClientState::GetRemoteCompositionData => {
                self.fail_configuration("network unreachable")
            }
            ClientState::Reconfiguration => {
                self.pending.clear();
                self.op_failed = true;
                self.finish_reconfiguration()
            }
            state if state.is_key_refresh() => {
                // Whoever did not get the keys is reported as lagging.
                self.pending.clear();
                self.on_key_refresh_drained()
            }
            _ => {
                self.pending.clear();
                self.go_idle();
                vec![]
            }
        }
    }

    fn identity_node(&self) -> Option<(String, Address)> {
        let unicast = self.identity_target?;
        let node = self.db.as_ref()?.node(unicast)?;
        Some((node.name.clone(), node.unicast))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Names and information
    // ═══════════════════════════════════════════════════════════════════════

    /// Rename a group, node or element.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_mut()?;
        if new.is_empty() {
            return Err(MeshClientError::InvalidArgs("empty name".into()));
        }
        if db.name_in_use(new) {
            return Err(MeshClientError::DuplicateName(new.to_string()));
        }
        let new_name = new.to_string();
        if let Some(group) = db.groups.iter().position(|g| g.name == old) {
            db.groups[group].name = new_name;
        } else if let Some(node) = db.nodes.iter().position(|n| n.name == old) {
            let node = &mut db.nodes[node];
            if node.elements.first().map(|e| e.name == old).unwrap_or(false) {
                node.elements[0].name = new_name.clone();
            }
            node.name = new_name;
        } else {
            let element = db
                .nodes
                .iter_mut()
                .flat_map(|n| n.elements.iter_mut())
                .find(|e| e.name == old)
                .ok_or_else(|| MeshClientError::NotFound(old.to_string()))?;
            element.name = new_name;
        }
        debug!(old, new, "Renamed");
        let mut actions = vec![];
        self.persist(&mut actions);
        Ok(actions)
    }

    /// Describe a node's product and elements.
    pub fn component_info(&self, name: &str) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        let node = node_for_name(db, name)
            .ok_or_else(|| MeshClientError::NotFound(name.to_string()))?;
        let composition = node
            .composition
            .as_ref()
            .ok_or_else(|| MeshClientError::NotFound(format!("composition of {}", name)))?;
        let info = ComponentInfo {
            name: node.name.clone(),
            uuid: node.uuid,
            company_id: composition.company_id,
            product_id: composition.product_id,
            version_id: composition.version_id,
            elements: node
                .elements
                .iter()
                .map(|e| ElementInfo {
                    name: e.name.clone(),
                    address: e.address,
                    models: e
                        .models
                        .iter()
                        .map(|m| m.id)
                        .filter(|id| !is_core_model(*id))
                        .collect(),
                })
                .collect(),
        };
        Ok(vec![Action::Notify(Notification::ComponentInfo(info))])
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Replay protection
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn on_seq_changed(&mut self, src: Address, seq: u32, previous_iv: bool) -> Vec<Action> {
        if !self.replay.update(src, seq, previous_iv) {
            return vec![];
        }
        let mut actions = vec![];
        self.persist_replay(&mut actions);
        actions
    }

    pub(crate) fn on_iv_index_changed(&mut self, iv_index: u32, update_in_progress: bool) -> Vec<Action> {
        info!(iv_index, update_in_progress, "IV index changed");
        self.replay.set_iv(iv_index, update_in_progress);
        let mut actions = vec![];
        if let Some(db) = self.db.as_mut() {
            db.iv_index = iv_index;
            db.iv_update = update_in_progress;
        }
        self.persist(&mut actions);
        self.persist_replay(&mut actions);
        actions
    }
}
