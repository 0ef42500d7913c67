//! Key refresh: replacing a network key (and its application keys) on every
//! node still trusted, which also revokes evicted nodes.
//!
//! Only one network key is refreshed at a time. Other keys needing a new
//! cycle are flagged `rotation_pending` and picked up afterwards.

use crate::client::MeshClient;
use crate::configuration::set_family_phase;
use crate::error::MeshClientError;
use crate::pending::PendingKind;
use crate::state::ClientState;
use meshctl_core::{Action, NodeConnectState, Notification, TimerId};
use meshctl_types::{Address, Key128, KeyRefreshPhase, MeshDb, NetKeyIndex, Node};
use tracing::{debug, info, warn};

impl MeshClient {
    // ═══════════════════════════════════════════════════════════════════════
    // Application operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Replace a network key and the application keys bound to it.
    ///
    /// If another procedure is running the rotation is only recorded and
    /// starts once the client is idle.
    pub fn rotate_net_key(&mut self, index: NetKeyIndex) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_mut()?;
        let key = db
            .net_key_mut(index)
            .ok_or_else(|| MeshClientError::NotFound(index.to_string()))?;
        key.rotation_pending = true;
        info!(net_key = %index, "Key rotation requested");

        let mut actions = vec![];
        self.persist(&mut actions);
        if self.state == ClientState::Idle {
            self.stalled = None;
            actions.extend(self.maybe_start_key_refresh());
        }
        Ok(actions)
    }

    /// Resume a stalled refresh cycle, or start a pending rotation.
    pub fn resume_key_refresh(&mut self) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        self.require_idle()?;
        let resumable = db.refreshing_net_key().is_some()
            || db.net_keys.iter().any(|k| k.rotation_pending);
        if !resumable {
            return Err(MeshClientError::InvalidState("no key refresh to resume"));
        }
        self.stalled = None;
        Ok(self.maybe_start_key_refresh())
    }

    /// Remove a node from the network.
    ///
    /// The node is reset if reachable and excluded from every later key
    /// distribution; its record is dropped once the keys it knew are rotated.
    pub fn reset_node(&mut self, name: &str) -> Result<Vec<Action>, MeshClientError> {
        let db = self.db_ref()?;
        let node = crate::resolver::node_for_name(db, name)
            .ok_or_else(|| MeshClientError::NotFound(name.to_string()))?;
        let unicast = node.unicast;
        let blocked = node.blocked;
        if self.is_local(unicast) {
            return Err(MeshClientError::InvalidArgs(
                "cannot reset the local device".into(),
            ));
        }
        if self.state != ClientState::Idle && !self.state.is_key_refresh() {
            return Err(MeshClientError::InvalidState(self.state.name()));
        }
        if blocked {
            return Ok(vec![]);
        }

        info!(node = %unicast, name, "Removing node");
        let mut actions = self.evict_node(unicast);
        if self.state == ClientState::Idle {
            self.stalled = None;
            let started = self.maybe_start_key_refresh();
            if started.is_empty() {
                actions.push(Self::prime());
            }
            actions.extend(started);
        } else {
            actions.push(Self::prime());
        }
        Ok(actions)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Eviction
    // ═══════════════════════════════════════════════════════════════════════

    /// Block a node and schedule rotation of every key it holds.
    pub(crate) fn evict_node(&mut self, unicast: Address) -> Vec<Action> {
        let connected = self.connected;
        let Some(db) = self.db.as_mut() else {
            return vec![];
        };
        let Some(node) = db.node_mut(unicast) else {
            return vec![];
        };
        if node.blocked {
            return vec![];
        }
        node.blocked = true;
        let (first, last) = (node.unicast, node.last_address());
        let held: Vec<(NetKeyIndex, KeyRefreshPhase)> =
            node.net_keys.iter().map(|k| (k.index, k.phase)).collect();

        for (index, copy_phase) in held {
            let Some(key) = db.net_key_mut(index) else {
                continue;
            };
            // A node still on the old key loses it when the running cycle
            // finishes; one that already has the new key needs another cycle.
            if !key.phase.is_refreshing() || copy_phase != KeyRefreshPhase::Normal {
                key.rotation_pending = true;
            }
        }
        let head_hit = self
            .pending
            .front()
            .map(|op| op.request.is_some() && op.dst >= first && op.dst <= last)
            .unwrap_or(false);
        let purged = self.pending.purge_range(first, last);
        debug!(node = %unicast, purged, "Evicted node");

        let mut actions = vec![];
        if head_hit {
            actions.push(Action::CancelTimer {
                id: TimerId::RequestTimeout,
            });
            actions.push(Self::prime());
        }
        if connected {
            self.queue(unicast, PendingKind::NodeReset);
        }
        self.persist(&mut actions);
        actions
    }

    /// Drop blocked nodes whose keys have all been rotated.
    fn purge_evicted_nodes(&mut self) -> Vec<Action> {
        let Some(db) = self.db.as_mut() else {
            return vec![];
        };
        let view: &MeshDb = db;
        let evicted: Vec<Address> = view
            .nodes
            .iter()
            .filter(|n| n.blocked && keys_retired(view, n))
            .map(|n| n.unicast)
            .collect();
        if evicted.is_empty() {
            return vec![];
        }
        for unicast in &evicted {
            if let Some(node) = db.remove_node(*unicast) {
                info!(node = %node.unicast, name = %node.name, "Node removed");
                self.pending.purge_range(node.unicast, node.last_address());
                self.replay
                    .remove_range(node.unicast, node.element_count as u16);
            }
        }
        let mut actions = vec![];
        self.persist(&mut actions);
        self.persist_replay(&mut actions);
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Refresh cycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Start the next refresh cycle if the client is idle.
    ///
    /// A key already mid-refresh goes first, unless its cycle stalled.
    pub(crate) fn maybe_start_key_refresh(&mut self) -> Vec<Action> {
        if self.state != ClientState::Idle {
            return vec![];
        }
        let Some(db) = self.db.as_ref() else {
            return vec![];
        };
        let refreshing = db.refreshing_net_key();
        let next = match refreshing {
            Some(index) if self.stalled == Some(index) => None,
            Some(index) => Some(index),
            None => db
                .net_keys
                .iter()
                .find(|k| k.rotation_pending)
                .map(|k| k.index),
        };
        match next {
            Some(index) => self.start_key_refresh(index),
            None if refreshing.is_none() => self.purge_evicted_nodes(),
            None => vec![],
        }
    }

    fn start_key_refresh(&mut self, index: NetKeyIndex) -> Vec<Action> {
        let mut actions = vec![];
        let phase = match self.db.as_ref().and_then(|db| db.net_key(index)) {
            Some(key) => key.phase,
            None => return actions,
        };
        if phase == KeyRefreshPhase::Normal {
            let app_indexes = self
                .db
                .as_ref()
                .map(|db| db.app_keys_bound_to(index))
                .unwrap_or_default();
            let net_key = Key128::random(&mut *self.rng);
            let app_keys: Vec<Key128> = app_indexes
                .iter()
                .map(|_| Key128::random(&mut *self.rng))
                .collect();
            let Some(db) = self.db.as_mut() else {
                return actions;
            };
            if let Some(key) = db.net_key_mut(index) {
                key.begin_refresh(net_key);
                key.rotation_pending = false;
            }
            for (app_index, new_key) in app_indexes.iter().zip(app_keys) {
                if let Some(app) = db.app_keys.iter_mut().find(|k| k.index == *app_index) {
                    app.old_key = Some(app.key);
                    app.key = new_key;
                }
            }
            info!(net_key = %index, app_keys = app_indexes.len(), "Starting key refresh");
            self.persist(&mut actions);
        } else {
            info!(net_key = %index, ?phase, "Resuming key refresh");
        }

        self.key_refresh = Some(index);
        self.stalled = None;
        let phase = self
            .db
            .as_ref()
            .and_then(|db| db.net_key(index))
            .map(|k| k.phase)
            .unwrap_or(KeyRefreshPhase::First);
        actions.extend(self.run_key_refresh_phase(index, phase));
        actions
    }

    /// Queue the messages moving every participant to `phase`.
    fn run_key_refresh_phase(&mut self, index: NetKeyIndex, phase: KeyRefreshPhase) -> Vec<Action> {
        self.set_state(ClientState::for_key_refresh_phase(phase));
        let Some(db) = self.db.as_ref() else {
            return vec![];
        };
        let Some(net_key) = db.net_key(index) else {
            return vec![];
        };
        let app_indexes = db.app_keys_bound_to(index);
        let mut ops = Vec::new();
        for unicast in participants(db, index) {
            let Some(node) = db.node(unicast) else {
                continue;
            };
            let net_phase = node.net_key(index).map(|k| k.phase);
            match phase {
                KeyRefreshPhase::Normal | KeyRefreshPhase::First => {
                    if net_phase == Some(KeyRefreshPhase::Normal) {
                        ops.push((
                            unicast,
                            PendingKind::NetKeyUpdate {
                                index,
                                key: net_key.key,
                            },
                        ));
                    }
                    for app_index in &app_indexes {
                        let copy = node.app_key(*app_index).map(|k| k.phase);
                        let Some(app) = db.app_key(*app_index) else {
                            continue;
                        };
                        if copy == Some(KeyRefreshPhase::Normal) {
                            ops.push((
                                unicast,
                                PendingKind::AppKeyUpdate {
                                    net_index: index,
                                    app_index: *app_index,
                                    key: app.key,
                                },
                            ));
                        }
                    }
                }
                KeyRefreshPhase::Second => {
                    if net_phase == Some(KeyRefreshPhase::First) {
                        ops.push((
                            unicast,
                            PendingKind::KeyRefreshPhaseSet {
                                net_index: index,
                                transition: 2,
                            },
                        ));
                    }
                }
                KeyRefreshPhase::Third => {
                    if net_phase == Some(KeyRefreshPhase::Second) {
                        ops.push((
                            unicast,
                            PendingKind::KeyRefreshPhaseSet {
                                net_index: index,
                                transition: 3,
                            },
                        ));
                    }
                }
            }
        }
        debug!(net_key = %index, ?phase, ops = ops.len(), "Key refresh phase");
        for (dst, kind) in ops {
            self.queue(dst, kind);
        }
        vec![Self::prime()]
    }

    /// The phase's queue drained: advance, finish or stall.
    pub(crate) fn on_key_refresh_drained(&mut self) -> Vec<Action> {
        let mut actions = vec![];
        let Some(index) = self.key_refresh else {
            self.go_idle();
            return actions;
        };
        let state = self.state;
        let Some(db) = self.db.as_ref() else {
            return actions;
        };
        let Some(net_phase) = db.net_key(index).map(|k| k.phase) else {
            return actions;
        };
        let wanted = match state {
            ClientState::KeyRefresh1 => KeyRefreshPhase::First,
            ClientState::KeyRefresh2 => KeyRefreshPhase::Second,
            _ => KeyRefreshPhase::Third,
        };
        let app_indexes = db.app_keys_bound_to(index);
        let lagging: Vec<(String, Address)> = participants(db, index)
            .into_iter()
            .filter_map(|u| db.node(u))
            .filter(|node| lags(node, index, &app_indexes, wanted))
            .map(|node| (node.name.clone(), node.unicast))
            .collect();

        if !lagging.is_empty() {
            warn!(net_key = %index, phase = ?net_phase, lagging = lagging.len(), "Key refresh stalled");
            for (name, address) in &lagging {
                Self::notify(
                    &mut actions,
                    Notification::NodeConnectStatus {
                        name: name.clone(),
                        address: *address,
                        state: NodeConnectState::UnreachableWarning,
                    },
                );
            }
            let lagging = lagging.into_iter().map(|(_, address)| address).collect();
            Self::notify(
                &mut actions,
                Notification::KeyRefreshStalled {
                    net_key: index,
                    phase: net_phase,
                    lagging,
                },
            );
            self.persist_if_dirty(&mut actions);
            self.stalled = Some(index);
            self.key_refresh = None;
            self.go_idle();
            return actions;
        }

        let next = match state {
            ClientState::KeyRefresh1 => KeyRefreshPhase::Second,
            ClientState::KeyRefresh2 => KeyRefreshPhase::Third,
            _ => return self.finish_key_refresh(index),
        };
        if let Some(key) = self.db.as_mut().and_then(|db| db.net_key_mut(index)) {
            key.phase = next;
        }
        info!(net_key = %index, phase = ?next, "Key refresh phase complete");
        self.persist(&mut actions);
        actions.extend(self.run_key_refresh_phase(index, next));
        actions
    }

    fn finish_key_refresh(&mut self, index: NetKeyIndex) -> Vec<Action> {
        let mut actions = vec![];
        if let Some(db) = self.db.as_mut() {
            let app_indexes = db.app_keys_bound_to(index);
            if let Some(key) = db.net_key_mut(index) {
                key.finish_refresh();
            }
            for app in db.app_keys.iter_mut().filter(|k| k.bound_net_key == index) {
                app.old_key = None;
            }
            // Blocked nodes keep only keys nobody uses any more.
            for node in db.nodes.iter_mut() {
                set_family_phase(node, index, &app_indexes, KeyRefreshPhase::Normal);
            }
        }
        info!(net_key = %index, "Key refresh complete");
        self.persist(&mut actions);
        Self::notify(&mut actions, Notification::KeyRefreshComplete { net_key: index });
        self.key_refresh = None;
        self.go_idle();
        actions.extend(self.maybe_start_key_refresh());
        actions
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Nodes taking part in a refresh of `index`, local device first.
///
/// Blocked nodes and other provisioners are left out.
pub(crate) fn participants(db: &MeshDb, index: NetKeyIndex) -> Vec<Address> {
    let local = db.local_node();
    let mut out: Vec<Address> = local
        .filter(|n| db.node_holds_key_family(n, index))
        .map(|n| n.unicast)
        .into_iter()
        .collect();
    out.extend(
        db.nodes
            .iter()
            .filter(|n| Some(n.unicast) != local.map(|l| l.unicast))
            .filter(|n| !n.blocked && !db.is_foreign_provisioner(n))
            .filter(|n| db.node_holds_key_family(n, index))
            .map(|n| n.unicast),
    );
    out
}

/// Whether a node's copies have not reached `wanted`.
fn lags(
    node: &Node,
    index: NetKeyIndex,
    app_indexes: &[meshctl_types::AppKeyIndex],
    wanted: KeyRefreshPhase,
) -> bool {
    let behind = |phase: KeyRefreshPhase| phase_rank(phase) < phase_rank(wanted);
    if node.net_key(index).map(|k| behind(k.phase)).unwrap_or(false) {
        return true;
    }
    wanted == KeyRefreshPhase::First
        && app_indexes
            .iter()
            .filter_map(|i| node.app_key(*i))
            .any(|k| behind(k.phase))
}

fn phase_rank(phase: KeyRefreshPhase) -> u8 {
    match phase {
        KeyRefreshPhase::Normal => 0,
        KeyRefreshPhase::First => 1,
        KeyRefreshPhase::Second => 2,
        KeyRefreshPhase::Third => 3,
    }
}

/// Whether none of a blocked node's keys still await rotation.
fn keys_retired(db: &MeshDb, node: &Node) -> bool {
    node.net_keys.iter().all(|copy| {
        db.net_key(copy.index)
            .map(|k| !k.phase.is_refreshing() && !k.rotation_pending)
            .unwrap_or(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{answer, connect, notifications, open_client, persisted, pump_with};
    use meshctl_core::{Event, OutboundMessage, StateMachine};
    use meshctl_messages::ConfigRequest;
    use meshctl_test_helpers::{test_db, test_node};
    use meshctl_types::models::GENERIC_ONOFF_SERVER;
    use meshctl_types::{AppKeyIndex, ModelId};
    use std::collections::HashMap;
    use tracing_test::traced_test;

    fn lamp(seed: u8, unicast: u16) -> Node {
        test_node(seed, unicast, &[&[ModelId::Sig(GENERIC_ONOFF_SERVER)]])
    }

    /// Open client, connected, with lamps `node-5` at 0x0010 and `node-6`
    /// at 0x0020.
    fn two_lamps() -> MeshClient {
        let mut client = open_client();
        let db = client.db.as_mut().unwrap();
        db.add_node(lamp(5, 0x0010));
        db.add_node(lamp(6, 0x0020));
        connect(&mut client);
        client
    }

    fn everyone(client: &MeshClient, dst: Address, message: &OutboundMessage) -> Option<Event> {
        answer(client, dst, message, &HashMap::new())
    }

    #[traced_test]
    #[test]
    fn test_reset_node_during_refresh_moves_queue_on() {
        let mut client = two_lamps();
        let held = Address(0x0010);
        let actions = client.rotate_net_key(NetKeyIndex::PRIMARY).unwrap();
        pump_with(&mut client, actions, |c, dst, message| {
            if dst == held {
                None
            } else {
                everyone(c, dst, message)
            }
        });
        assert_eq!(client.state(), ClientState::KeyRefresh1);
        let head = client.pending().next().unwrap();
        assert_eq!(head.dst, held);
        assert!(head.request.is_some());

        let actions = client.reset_node("node-5").unwrap();
        assert!(actions.contains(&Action::CancelTimer {
            id: TimerId::RequestTimeout
        }));
        let seen = pump_with(&mut client, actions, everyone);

        assert!(notifications(&seen).contains(&&Notification::KeyRefreshComplete {
            net_key: NetKeyIndex::PRIMARY
        }));
        assert_eq!(client.state(), ClientState::Idle);
        assert_eq!(client.pending().count(), 0);
        let db = client.db().unwrap();
        assert!(db.node(held).is_none());
        assert_eq!(db.net_key(NetKeyIndex::PRIMARY).unwrap().phase, KeyRefreshPhase::Normal);
        assert_eq!(
            db.node(Address(0x0020)).unwrap().net_key(NetKeyIndex::PRIMARY).unwrap().phase,
            KeyRefreshPhase::Normal
        );
    }

    #[traced_test]
    #[test]
    fn test_phase_two_stall_keeps_key_out_of_third_phase() {
        let mut client = two_lamps();
        let lagging = Address(0x0020);
        let reply = |c: &MeshClient, dst: Address, message: &OutboundMessage| {
            let phase_set = matches!(
                message,
                OutboundMessage::Config(ConfigRequest::KeyRefreshPhaseSet { .. })
            );
            if dst == lagging && phase_set {
                None
            } else {
                everyone(c, dst, message)
            }
        };

        let actions = client.rotate_net_key(NetKeyIndex::PRIMARY).unwrap();
        let mut seen = pump_with(&mut client, actions, reply);
        assert_eq!(client.state(), ClientState::KeyRefresh2);
        for _ in 0..client.config().max_send_attempts {
            let actions = client.handle(Event::Timer(TimerId::RequestTimeout));
            seen.extend(pump_with(&mut client, actions, reply));
        }

        assert_eq!(client.state(), ClientState::Idle);
        let stalled = notifications(&seen).into_iter().find_map(|n| match n {
            Notification::KeyRefreshStalled { phase, lagging, .. } => Some((*phase, lagging.clone())),
            _ => None,
        });
        assert_eq!(stalled, Some((KeyRefreshPhase::Second, vec![lagging])));

        let db = client.db().unwrap();
        assert_eq!(db.net_key(NetKeyIndex::PRIMARY).unwrap().phase, KeyRefreshPhase::Second);
        assert_eq!(
            db.node(lagging).unwrap().net_key(NetKeyIndex::PRIMARY).unwrap().phase,
            KeyRefreshPhase::First
        );
        for db in persisted(&seen) {
            if db.net_key(NetKeyIndex::PRIMARY).unwrap().phase != KeyRefreshPhase::Third {
                continue;
            }
            assert!(db
                .nodes
                .iter()
                .filter_map(|n| n.net_key(NetKeyIndex::PRIMARY))
                .all(|k| k.phase != KeyRefreshPhase::First));
        }
    }

    #[test]
    fn test_participants_skip_blocked_and_foreign() {
        let mut db = test_db();
        db.add_node(lamp(5, 0x0010));
        let mut blocked = lamp(6, 0x0020);
        blocked.blocked = true;
        db.add_node(blocked);
        let foreign = lamp(7, 0x0030);
        db.provisioners.push(meshctl_types::Provisioner {
            name: "tablet".into(),
            uuid: foreign.uuid,
            range_low: Address(0x0030),
            range_high: Address(0x003F),
        });
        db.add_node(foreign);

        assert_eq!(
            participants(&db, NetKeyIndex::PRIMARY),
            vec![Address(0x0001), Address(0x0010)]
        );
    }

    #[test]
    fn test_lagging_checks_app_copies_in_first_phase() {
        let mut node = lamp(5, 0x0010);
        node.add_net_key(NetKeyIndex::PRIMARY, KeyRefreshPhase::First);
        let apps = [AppKeyIndex(0)];
        assert!(lags(&node, NetKeyIndex::PRIMARY, &apps, KeyRefreshPhase::First));
        node.add_app_key(AppKeyIndex(0), KeyRefreshPhase::First);
        assert!(!lags(&node, NetKeyIndex::PRIMARY, &apps, KeyRefreshPhase::First));
        assert!(lags(&node, NetKeyIndex::PRIMARY, &apps, KeyRefreshPhase::Second));
    }

    #[test]
    fn test_keys_retired_waits_for_rotation() {
        let mut db = test_db();
        let node = lamp(5, 0x0010);
        db.add_node(node.clone());
        assert!(keys_retired(&db, &node));
        db.net_key_mut(NetKeyIndex::PRIMARY).unwrap().rotation_pending = true;
        assert!(!keys_retired(&db, &node));
    }
}
