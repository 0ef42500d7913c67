//! Scanning and provisioning of new devices.

use crate::client::MeshClient;
use crate::error::MeshClientError;
use crate::pending::PendingKind;
use crate::state::ClientState;
use meshctl_core::{Action, ConnectTarget, Notification, ProvisionState, TimerId};
use meshctl_messages::{
    AuthMethod, DeviceCapabilities, LinkReportStatus, ProvisionBearer, ProvisionResult,
    ProvisioningData, UnprovisionedReport,
};
use meshctl_types::{
    models::REMOTE_PROVISIONING_SERVER, Address, DeviceUuid, KeyRefreshPhase, ModelId,
    NetKeyIndex, Node, NodeNetKey,
};
use tracing::{debug, info, warn};

/// A provisioning attempt in progress.
#[derive(Debug, Clone)]
pub(crate) struct ProvisionAttempt {
    pub uuid: DeviceUuid,
    pub name: String,
    pub group: Option<Address>,
    pub bearer: ProvisionBearer,
    pub scanner: Address,
    pub identify_duration: u8,
    /// Link attempts so far.
    pub link_attempts: u32,
    /// Allocated once capabilities arrive.
    pub unicast: Option<Address>,
    pub element_count: u8,
}

impl MeshClient {
    // ═══════════════════════════════════════════════════════════════════════
    // Scanning
    // ═══════════════════════════════════════════════════════════════════════

    /// Start or stop scanning for unprovisioned devices.
    ///
    /// The local device always scans. While connected, every node with a
    /// Remote Provisioning Server scans too.
    pub fn scan_unprovisioned(&mut self, start: bool) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        let local = self
            .local_address()
            .ok_or_else(|| MeshClientError::NetworkDbError("no local node".into()))?;

        if !start {
            return Ok(self.stop_scanning());
        }

        let mut scanners = vec![local];
        if self.connected {
            let rpr = ModelId::Sig(REMOTE_PROVISIONING_SERVER);
            scanners.extend(
                db.nodes
                    .iter()
                    .filter(|n| !n.blocked && n.unicast != local)
                    .filter(|n| n.models().any(|(_, m)| m.id == rpr))
                    .map(|n| n.unicast),
            );
        }
        info!(scanners = scanners.len(), "Scanning for unprovisioned devices");

        let mut actions = self.stop_scanning();
        self.scan_results.clear();
        actions.extend(
            scanners
                .iter()
                .map(|scanner| Action::ScanStart { scanner: *scanner }),
        );
        self.scanners = scanners;
        Ok(actions)
    }

    pub(crate) fn stop_scanning(&mut self) -> Vec<Action> {
        self.scanners
            .drain(..)
            .map(|scanner| Action::ScanStop { scanner })
            .collect()
    }

    pub(crate) fn on_unprovisioned_report(&mut self, report: UnprovisionedReport) -> Vec<Action> {
        if !self.scanners.contains(&report.scanner) {
            return vec![];
        }
        let better = self
            .scan_results
            .get(&report.uuid)
            .map(|seen| report.rssi > seen.rssi)
            .unwrap_or(true);
        if !better {
            return vec![];
        }
        debug!(uuid = %report.uuid, rssi = report.rssi, scanner = %report.scanner, "Unprovisioned device");
        let notification = Notification::UnprovisionedDevice {
            uuid: report.uuid,
            rssi: report.rssi,
            scanner: report.scanner,
        };
        self.scan_results.insert(report.uuid, report);
        vec![Action::Notify(notification)]
    }

    pub(crate) fn on_scan_capabilities(&mut self, src: Address, max_items: u8) -> Vec<Action> {
        debug!(scanner = %src, max_items, "Remote scanner capabilities");
        vec![]
    }

    pub(crate) fn on_scan_status(&mut self, src: Address, status: u8, scanning: bool) -> Vec<Action> {
        if status != 0 {
            warn!(scanner = %src, status, "Remote scan rejected");
        }
        if status != 0 || !scanning {
            self.scanners.retain(|s| *s != src);
        }
        vec![]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Provisioning
    // ═══════════════════════════════════════════════════════════════════════

    /// Provision a scanned device under `name`, optionally into a group.
    pub fn provision(
        &mut self,
        name: &str,
        group: Option<&str>,
        uuid: DeviceUuid,
        identify_duration: u8,
    ) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        self.require_idle()?;
        if name.is_empty() {
            return Err(MeshClientError::InvalidArgs("empty name".into()));
        }
        // A device being re-provisioned may keep its old names.
        let owned_by_device = db
            .node_by_uuid(&uuid)
            .map(|n| n.name == name || n.elements.iter().any(|e| e.name == name))
            .unwrap_or(false);
        if db.name_in_use(name) && !owned_by_device {
            return Err(MeshClientError::DuplicateName(name.to_string()));
        }
        let group = match group {
            Some(g) => Some(
                db.group_by_name(g)
                    .ok_or_else(|| MeshClientError::NotFound(format!("group {}", g)))?
                    .address,
            ),
            None => None,
        };
        let report = self
            .scan_results
            .get(&uuid)
            .cloned()
            .ok_or_else(|| MeshClientError::NotFound(format!("device {}", uuid)))?;
        let local = self
            .local_address()
            .ok_or_else(|| MeshClientError::NetworkDbError("no local node".into()))?;
        if report.scanner != local && !self.connected {
            return Err(MeshClientError::NotConnected);
        }

        info!(uuid = %uuid, name, bearer = ?report.bearer, scanner = %report.scanner, "Provisioning device");

        let mut actions = self.stop_scanning();
        if report.bearer == ProvisionBearer::Gatt && report.scanner == local && self.connected {
            // The GATT link to the device replaces the proxy connection.
            actions.push(Action::Disconnect);
        }
        self.attempt = Some(ProvisionAttempt {
            uuid,
            name: name.to_string(),
            group,
            bearer: report.bearer,
            scanner: report.scanner,
            identify_duration,
            link_attempts: 1,
            unicast: None,
            element_count: 0,
        });
        self.set_state(ClientState::Connecting);
        actions.push(Action::ProvisionConnect {
            uuid,
            bearer: report.bearer,
            scanner: report.scanner,
            identify_duration,
        });
        actions.push(Action::SetTimer {
            id: TimerId::ProvisionLink,
            duration: self.config.provision_link_timeout,
        });
        Self::notify(
            &mut actions,
            Notification::ProvisionStatus {
                uuid,
                state: ProvisionState::Connecting,
            },
        );
        Ok(actions)
    }

    /// Abort the provisioning attempt in progress.
    pub fn provision_stop(&mut self) -> Result<Vec<Action>, MeshClientError> {
        self.db_ref()?;
        if self.attempt.is_none() {
            return Err(MeshClientError::InvalidState(self.state.name()));
        }
        Ok(self.fail_provisioning("aborted"))
    }

    fn retry_provision_link(&mut self) -> Vec<Action> {
        let max = self.config.max_provision_retries;
        let Some(attempt) = self.attempt.as_mut() else {
            return vec![];
        };
        if attempt.link_attempts > max {
            return self.fail_provisioning("provisioning link could not be opened");
        }
        attempt.link_attempts += 1;
        debug!(uuid = %attempt.uuid, attempt = attempt.link_attempts, "Retrying provisioning link");
        vec![
            Action::ProvisionClose,
            Action::ProvisionConnect {
                uuid: attempt.uuid,
                bearer: attempt.bearer,
                scanner: attempt.scanner,
                identify_duration: attempt.identify_duration,
            },
            Action::SetTimer {
                id: TimerId::ProvisionLink,
                duration: self.config.provision_link_timeout,
            },
        ]
    }

    pub(crate) fn on_provision_link_timeout(&mut self) -> Vec<Action> {
        match self.state {
            ClientState::Connecting => self.retry_provision_link(),
            // The close report never came; go on as if it had.
            ClientState::ProvisionDisconnecting => self.connect_to_new_node(),
            _ => vec![],
        }
    }

    pub(crate) fn on_provision_link_report(&mut self, status: LinkReportStatus) -> Vec<Action> {
        match (self.state, status) {
            (ClientState::Connecting, LinkReportStatus::Opened) => {
                let mut actions = vec![Action::CancelTimer {
                    id: TimerId::ProvisionLink,
                }];
                self.set_state(ClientState::Provisioning);
                if let Some(attempt) = &self.attempt {
                    Self::notify(
                        &mut actions,
                        Notification::ProvisionStatus {
                            uuid: attempt.uuid,
                            state: ProvisionState::Provisioning,
                        },
                    );
                }
                actions
            }
            (ClientState::Connecting, _) => {
                let mut actions = vec![Action::CancelTimer {
                    id: TimerId::ProvisionLink,
                }];
                actions.extend(self.retry_provision_link());
                actions
            }
            (ClientState::Provisioning, _) => self.fail_provisioning("provisioning link lost"),
            (ClientState::ProvisionDisconnecting, LinkReportStatus::Closed) => {
                let mut actions = vec![Action::CancelTimer {
                    id: TimerId::ProvisionLink,
                }];
                actions.extend(self.connect_to_new_node());
                actions
            }
            (state, status) => {
                debug!(state = %state, ?status, "Ignoring provisioning link report");
                vec![]
            }
        }
    }

    /// After PB-GATT, connect to the new node as proxy by node identity.
    fn connect_to_new_node(&mut self) -> Vec<Action> {
        let Some(unicast) = self.target else {
            return self.fail_provisioning("no node to connect to");
        };
        self.identity_target = Some(unicast);
        self.connect_retries = 0;
        self.set_state(ClientState::NodeConnecting);
        vec![
            Action::Connect(ConnectTarget::NodeIdentity(unicast)),
            Action::SetTimer {
                id: TimerId::Connect,
                duration: self.config.connect_timeout,
            },
        ]
    }

    pub(crate) fn on_capabilities(&mut self, caps: DeviceCapabilities) -> Vec<Action> {
        if self.state != ClientState::Provisioning {
            return vec![];
        }
        if caps.element_count == 0 {
            return self.fail_provisioning("device reports no elements");
        }
        let Some(db) = self.db.as_ref() else {
            return vec![];
        };
        let unicast = match db.allocate_unicast_range(caps.element_count as usize) {
            Ok(unicast) => unicast,
            Err(err) => {
                warn!(error = %err, elements = caps.element_count, "Address allocation failed");
                return self.fail_provisioning(&MeshClientError::from(err).to_string());
            }
        };
        let Some(net_key) = db.net_key(NetKeyIndex::PRIMARY) else {
            return self.fail_provisioning("primary network key missing");
        };
        let (key, key_refresh) = match net_key.phase {
            KeyRefreshPhase::Normal | KeyRefreshPhase::First => (net_key.transmit_key(), false),
            KeyRefreshPhase::Second | KeyRefreshPhase::Third => (net_key.key, true),
        };
        let data = ProvisioningData {
            net_key: key,
            net_key_index: NetKeyIndex::PRIMARY,
            key_refresh,
            iv_update: db.iv_update,
            iv_index: db.iv_index,
            unicast,
        };

        let mut actions = vec![];
        // Leftover replay entries would reject the new node's fresh sequence numbers.
        if self.replay.remove_range(unicast, caps.element_count as u16) > 0 {
            self.persist_replay(&mut actions);
        }

        let auth = if self.config.static_oob.is_some() && caps.supports_static_oob() {
            AuthMethod::StaticOob
        } else {
            AuthMethod::NoOob
        };
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.unicast = Some(unicast);
            attempt.element_count = caps.element_count;
        }
        info!(unicast = %unicast, elements = caps.element_count, ?auth, "Assigning address");
        actions.push(Action::ProvisionStart { auth, data });
        actions
    }

    pub(crate) fn on_get_oob(&mut self) -> Vec<Action> {
        match &self.config.static_oob {
            Some(oob) => vec![Action::ProvisionSetOob(oob.clone())],
            None => self.fail_provisioning(&MeshClientError::MethodNotAvailable.to_string()),
        }
    }

    pub(crate) fn on_provision_end(&mut self, result: ProvisionResult) -> Vec<Action> {
        let device_key = match result {
            ProvisionResult::Success { device_key } => device_key,
            ProvisionResult::Failed(reason) => {
                return self.fail_provisioning(&format!("{:?}", reason));
            }
        };
        let Some(attempt) = self.attempt.clone() else {
            return vec![];
        };
        let Some(unicast) = attempt.unicast else {
            return self.fail_provisioning("no address assigned");
        };
        let local = self.local_address();
        let Some(db) = self.db.as_mut() else {
            return vec![];
        };

        let copy_phase = match db.net_key(NetKeyIndex::PRIMARY).map(|k| k.phase) {
            Some(KeyRefreshPhase::Second) | Some(KeyRefreshPhase::Third) => KeyRefreshPhase::Second,
            _ => KeyRefreshPhase::Normal,
        };
        let mut node = Node::new(
            attempt.uuid,
            attempt.name.clone(),
            unicast,
            attempt.element_count,
            device_key,
            NodeNetKey {
                index: NetKeyIndex::PRIMARY,
                phase: copy_phase,
            },
        );
        node.group = attempt.group;

        let mut actions = vec![];
        if let Some(old) = db.add_node(node) {
            info!(old = %old.unicast, new = %unicast, "Replacing previous record of device");
            self.pending.purge_range(old.unicast, old.last_address());
            if self.replay.remove_range(old.unicast, old.element_count as u16) > 0 {
                self.persist_replay(&mut actions);
            }
        }
        self.persist(&mut actions);

        info!(uuid = %attempt.uuid, unicast = %unicast, "Device provisioned");
        self.target = Some(unicast);
        if let Some(local) = local {
            self.queue(
                local,
                PendingKind::DevKeySet {
                    unicast,
                    element_count: attempt.element_count,
                    key: device_key,
                },
            );
        }
        self.queue(unicast, PendingKind::CompositionGet { page: 0 });

        actions.push(Action::ProvisionClose);
        Self::notify(
            &mut actions,
            Notification::ProvisionStatus {
                uuid: attempt.uuid,
                state: ProvisionState::Configuring { unicast },
            },
        );

        if attempt.bearer == ProvisionBearer::Gatt && Some(attempt.scanner) == local {
            self.set_state(ClientState::ProvisionDisconnecting);
            actions.push(Action::SetTimer {
                id: TimerId::ProvisionLink,
                duration: self.config.provision_link_timeout,
            });
        } else {
            self.set_state(ClientState::GetRemoteCompositionData);
        }
        actions.push(Self::prime());
        actions
    }

    /// Give up on the current provisioning attempt.
    ///
    /// A node record created for the attempt is evicted, so its keys are
    /// rotated out by the next key refresh.
    pub(crate) fn fail_provisioning(&mut self, reason: &str) -> Vec<Action> {
        let mut actions = vec![
            Action::CancelTimer {
                id: TimerId::ProvisionLink,
            },
            Action::CancelTimer {
                id: TimerId::RequestTimeout,
            },
            Action::CancelTimer {
                id: TimerId::Connect,
            },
        ];
        if matches!(
            self.state,
            ClientState::Connecting | ClientState::Provisioning | ClientState::ProvisionDisconnecting
        ) {
            actions.push(Action::ProvisionClose);
        }
        self.pending.clear();
        self.resume = None;

        let attempt = self.attempt.take();
        warn!(reason, state = %self.state, "Provisioning failed");
        if let Some(attempt) = &attempt {
            Self::notify(
                &mut actions,
                Notification::ProvisionStatus {
                    uuid: attempt.uuid,
                    state: ProvisionState::Failed {
                        reason: reason.to_string(),
                    },
                },
            );
        }

        let created = attempt
            .and_then(|a| a.unicast)
            .filter(|u| self.db.as_ref().and_then(|db| db.node(*u)).is_some());
        let via_identity = self.connected && created.is_some() && self.identity_target == created;

        match created {
            Some(unicast) if via_identity => {
                actions.extend(self.evict_node(unicast));
                self.target = None;
                self.set_state(ClientState::ConfigureDisconnecting);
                actions.push(Action::Disconnect);
            }
            Some(unicast) => {
                self.go_idle();
                actions.extend(self.evict_node(unicast));
                actions.extend(self.maybe_start_key_refresh());
            }
            None => self.go_idle(),
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use crate::{ClientState, MeshClient};
    use meshctl_core::{
        Action, Event, Notification, OutboundMessage, ProvisionState, StateMachine,
    };
    use meshctl_messages::{
        AuthMethod, ConfigRequest, ConfigStatus, DeviceCapabilities, LinkReportStatus,
        ProvisionBearer, ProvisionResult, StatusCode,
    };
    use meshctl_test_helpers::lamp_composition;
    use meshctl_types::{Address, AppKeyIndex, DeviceUuid, Key128, NetKeyIndex};
    use std::collections::HashMap;
    use tracing_test::traced_test;

    const NEW_NODE: Address = Address(0x0002);

    /// Provision a one-element lamp over the advertising bearer up to the
    /// end of the handshake. Returns the actions of the provisioning end.
    fn handshake(client: &mut MeshClient, uuid: DeviceUuid) -> Vec<Action> {
        heard(client, uuid, -50, ProvisionBearer::Adv);
        client.provision("lamp", None, uuid, 0).unwrap();
        client.handle(Event::ProvisionLinkReport(LinkReportStatus::Opened));
        client.handle(Event::ProvisionCapabilities(DeviceCapabilities {
            element_count: 1,
            ..Default::default()
        }));
        client.handle(Event::ProvisionEnd(ProvisionResult::Success {
            device_key: Key128::from_bytes([7; 16]),
        }))
    }

    fn lamp_answers(client: &MeshClient, dst: Address, message: &OutboundMessage) -> Option<Event> {
        let compositions = HashMap::from([(NEW_NODE, lamp_composition())]);
        answer(client, dst, message, &compositions)
    }

    fn provision_status(actions: &[Action]) -> Vec<&ProvisionState> {
        notifications(actions)
            .into_iter()
            .filter_map(|n| match n {
                Notification::ProvisionStatus { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    #[traced_test]
    #[test]
    fn test_provision_requires_scan_report() {
        let mut client = open_client();
        let err = client
            .provision("lamp", None, DeviceUuid::from_bytes([9; 16]), 0)
            .unwrap_err();
        assert!(matches!(err, crate::MeshClientError::NotFound(_)));
    }

    #[traced_test]
    #[test]
    fn test_provision_rejects_duplicate_name() {
        let mut client = open_client();
        let uuid = DeviceUuid::from_bytes([9; 16]);
        heard(&mut client, uuid, -50, ProvisionBearer::Adv);
        let err = client.provision(PROVISIONER, None, uuid, 0).unwrap_err();
        assert_eq!(err, crate::MeshClientError::DuplicateName(PROVISIONER.into()));
    }

    #[traced_test]
    #[test]
    fn test_scan_keeps_best_rssi() {
        let mut client = open_client();
        let uuid = DeviceUuid::from_bytes([9; 16]);
        client.scan_unprovisioned(true).unwrap();
        assert_eq!(report(&mut client, uuid, -70).len(), 1);
        assert!(report(&mut client, uuid, -80).is_empty());
        assert_eq!(report(&mut client, uuid, -40).len(), 1);
        assert_eq!(client.scan_results().next().unwrap().rssi, -40);
    }

    #[traced_test]
    #[test]
    fn test_handshake_allocates_next_range() {
        let mut client = open_client();
        let uuid = DeviceUuid::from_bytes([9; 16]);
        heard(&mut client, uuid, -50, ProvisionBearer::Adv);
        let actions = client.provision("lamp", None, uuid, 0).unwrap();
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ProvisionConnect { uuid: u, .. } if *u == uuid)));
        assert_eq!(client.state(), ClientState::Connecting);

        client.handle(Event::ProvisionLinkReport(LinkReportStatus::Opened));
        assert_eq!(client.state(), ClientState::Provisioning);

        let actions = client.handle(Event::ProvisionCapabilities(DeviceCapabilities {
            element_count: 2,
            ..Default::default()
        }));
        let start = actions
            .iter()
            .find_map(|a| match a {
                Action::ProvisionStart { auth, data } => Some((*auth, data.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(start.0, AuthMethod::NoOob);
        // The local device holds 0x0001.
        assert_eq!(start.1.unicast, Address(0x0002));
        assert!(!start.1.key_refresh);

        let actions = client.handle(Event::ProvisionEnd(ProvisionResult::Success {
            device_key: Key128::from_bytes([7; 16]),
        }));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Notify(Notification::ProvisionStatus {
                state: ProvisionState::Configuring { .. },
                ..
            })
        )));
        assert_eq!(client.state(), ClientState::GetRemoteCompositionData);
        let node = client.db().unwrap().node(Address(0x0002)).unwrap();
        assert_eq!(node.name, "lamp");
        assert_eq!(node.element_count, 2);
    }

    #[traced_test]
    #[test]
    fn test_link_retries_then_fails() {
        let mut client = open_client();
        let uuid = DeviceUuid::from_bytes([9; 16]);
        heard(&mut client, uuid, -50, ProvisionBearer::Adv);
        client.provision("lamp", None, uuid, 0).unwrap();

        let retries = client.config().max_provision_retries;
        for _ in 0..retries {
            let actions = client.handle(Event::ProvisionLinkReport(LinkReportStatus::OpenFailed));
            assert!(actions
                .iter()
                .any(|a| matches!(a, Action::ProvisionConnect { .. })));
        }
        let actions = client.handle(Event::ProvisionLinkReport(LinkReportStatus::OpenFailed));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Notify(Notification::ProvisionStatus {
                state: ProvisionState::Failed { .. },
                ..
            })
        )));
        assert_eq!(client.state(), ClientState::Idle);
        assert_eq!(client.db().unwrap().nodes.len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_missing_oob_fails_provisioning() {
        let mut client = open_client();
        let uuid = DeviceUuid::from_bytes([9; 16]);
        heard(&mut client, uuid, -50, ProvisionBearer::Adv);
        client.provision("lamp", None, uuid, 0).unwrap();
        client.handle(Event::ProvisionLinkReport(LinkReportStatus::Opened));
        let actions = client.handle(Event::ProvisionGetOob);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Notify(Notification::ProvisionStatus {
                state: ProvisionState::Failed { .. },
                ..
            })
        )));
    }

    #[traced_test]
    #[test]
    fn test_each_accepted_reply_is_persisted() {
        let mut client = open_client();
        let actions = handshake(&mut client, DeviceUuid::from_bytes([9; 16]));
        let seen = pump_with(&mut client, actions, lamp_answers);

        assert!(provision_status(&seen)
            .contains(&&ProvisionState::Success { unicast: NEW_NODE }));
        let app_key_sent = seen
            .iter()
            .position(|a| {
                matches!(
                    a,
                    Action::Send {
                        dst: NEW_NODE,
                        message: OutboundMessage::Config(ConfigRequest::AppKeyAdd { .. }),
                        ..
                    }
                )
            })
            .unwrap();
        let stored = persisted(&seen[app_key_sent..])[0];
        let node = stored.node(NEW_NODE).unwrap();
        assert!(node.app_key(AppKeyIndex(0)).is_some());
        assert!(!node.config_complete);
    }

    #[traced_test]
    #[test]
    fn test_rejected_key_during_bring_up_resets_node() {
        let mut client = open_client();
        let mut actions = handshake(&mut client, DeviceUuid::from_bytes([9; 16]));
        actions.extend(client.handle(Event::SeqChanged {
            src: NEW_NODE,
            seq: 12,
            previous_iv: false,
        }));
        assert!(client.replay_list().get(NEW_NODE).is_some());

        let seen = pump_with(&mut client, actions, |c, dst, message| match message {
            OutboundMessage::Config(ConfigRequest::AppKeyAdd {
                net_index,
                app_index,
                ..
            }) if dst == NEW_NODE => Some(Event::ConfigStatus {
                src: dst,
                status: ConfigStatus::AppKey {
                    status: StatusCode::KEY_INDEX_ALREADY_STORED,
                    net_index: *net_index,
                    app_index: *app_index,
                },
            }),
            _ => lamp_answers(c, dst, message),
        });

        let states = provision_status(&seen);
        assert!(states
            .iter()
            .any(|s| matches!(s, ProvisionState::Failed { .. })));
        assert!(!states
            .iter()
            .any(|s| matches!(s, ProvisionState::Success { .. })));

        // The record, and with it the address range and replay entries, is
        // kept until the keys the node learned are rotated.
        let refreshed = seen
            .iter()
            .position(|a| {
                matches!(
                    a,
                    Action::Notify(Notification::KeyRefreshComplete {
                        net_key: NetKeyIndex::PRIMARY
                    })
                )
            })
            .unwrap();
        for db in persisted(&seen[..refreshed]) {
            if let Some(node) = db.node(NEW_NODE) {
                assert!(!node.config_complete);
            }
        }
        assert!(persisted(&seen[..refreshed])
            .iter()
            .any(|db| db.node(NEW_NODE).is_some_and(|n| n.blocked)));
        assert!(seen[refreshed..]
            .iter()
            .any(|a| matches!(a, Action::PersistReplayList(_))));

        assert_eq!(client.state(), ClientState::Idle);
        assert!(client.db().unwrap().node(NEW_NODE).is_none());
        assert!(client.replay_list().get(NEW_NODE).is_none());
    }
}
