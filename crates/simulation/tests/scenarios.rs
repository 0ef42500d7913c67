//! End-to-end scenarios: the client against a simulated mesh.

use meshctl_client::{ClientConfig, ClientState, DeviceConfig};
use meshctl_core::{NodeConnectState, Notification, ProvisionState};
use meshctl_messages::ProvisionBearer;
use meshctl_simulation::{NetworkConfig, SimulatedDevice, SimulationRunner};
use meshctl_test_helpers::{lamp_composition, test_uuid};
use meshctl_types::models::GENERIC_ONOFF_SERVER;
use meshctl_types::{Address, AppKeyIndex, DeviceUuid, KeyRefreshPhase, ModelId, NetKeyIndex};
use std::time::Duration;
use tracing_test::traced_test;

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

fn lamp(seed: u8) -> SimulatedDevice {
    SimulatedDevice::new(test_uuid(seed), lamp_composition())
}

fn open_network(devices: Vec<SimulatedDevice>) -> SimulationRunner {
    let mut runner = SimulationRunner::new(NetworkConfig::default(), ClientConfig::default());
    for device in devices {
        runner.add_device(device);
    }
    runner
        .call(|c| c.network_create("home", "phone", DeviceUuid::from_bytes([0xAA; 16]), 1))
        .unwrap();
    runner.run_until_idle();
    assert_eq!(runner.client().state(), ClientState::Idle);
    runner
}

fn provision(runner: &mut SimulationRunner, name: &str, group: Option<&str>, uuid: DeviceUuid) {
    runner.call(|c| c.scan_unprovisioned(true)).unwrap();
    runner.run_for(Duration::from_secs(1));
    runner.call(|c| c.provision(name, group, uuid, 0)).unwrap();
    runner.run_until_idle();
}

fn provisioned(runner: &SimulationRunner, uuid: DeviceUuid) -> Option<Address> {
    runner.notifications().iter().find_map(|n| match n {
        Notification::ProvisionStatus {
            uuid: u,
            state: ProvisionState::Success { unicast },
        } if *u == uuid => Some(*unicast),
        _ => None,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Network
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_network_reopens_from_storage() {
    let mut runner = open_network(vec![lamp(1)]);
    provision(&mut runner, "kitchen", None, test_uuid(1));
    runner.take_notifications();

    runner.restart().unwrap();
    runner.run_until_idle();

    assert!(runner
        .notifications()
        .contains(&Notification::NetworkOpened { success: true }));
    let db = runner.client().db().unwrap();
    assert_eq!(db.name, "home");
    assert!(db.node_by_name("kitchen").is_some());
}

// ═══════════════════════════════════════════════════════════════════════════
// Provisioning
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_provision_over_advertising_bearer() {
    let mut runner = open_network(vec![lamp(1)]);
    provision(&mut runner, "kitchen", None, test_uuid(1));

    let unicast = provisioned(&runner, test_uuid(1)).expect("provisioned");
    assert_eq!(unicast, Address(0x0002));
    assert_eq!(runner.client().state(), ClientState::Idle);
    assert!(runner.client().is_connected());

    let node = runner.client().db().unwrap().node(unicast).unwrap();
    assert!(node.config_complete);
    assert_eq!(node.name, "kitchen");

    let device = runner.network().device(test_uuid(1)).unwrap();
    assert_eq!(device.unicast(), Some(unicast));
    assert!(device.app_key(AppKeyIndex(0)).is_some());
    assert_eq!(
        device.bindings(unicast, ModelId::Sig(GENERIC_ONOFF_SERVER)),
        vec![AppKeyIndex(0)]
    );
    assert_eq!(device.default_ttl(), Some(7));
}

#[traced_test]
#[test]
fn test_provision_over_gatt_reconnects_by_identity() {
    let mut runner = open_network(vec![lamp(1).with_bearer(ProvisionBearer::Gatt)]);
    provision(&mut runner, "hall", None, test_uuid(1));

    let unicast = provisioned(&runner, test_uuid(1)).expect("provisioned");
    assert_eq!(runner.link(), Some(unicast));
    assert_eq!(runner.client().proxy(), Some(unicast));
}

#[traced_test]
#[test]
fn test_provision_into_group_subscribes() {
    let mut runner = open_network(vec![lamp(1), lamp(2)]);
    runner.call(|c| c.create_group("lights", None)).unwrap();
    runner.run_until_idle();

    provision(&mut runner, "left", Some("lights"), test_uuid(1));
    provision(&mut runner, "right", Some("lights"), test_uuid(2));

    let group = runner.client().db().unwrap().group_by_name("lights").unwrap().address;
    for seed in [1, 2] {
        let device = runner.network().device(test_uuid(seed)).unwrap();
        let unicast = device.unicast().unwrap();
        assert!(device
            .subscriptions(unicast, ModelId::Sig(GENERIC_ONOFF_SERVER))
            .contains(&group));
    }

    runner
        .call(|c| c.onoff_set("lights", true, None, false))
        .unwrap();
    runner.run_until_idle();
    for seed in [1, 2] {
        assert!(runner.network().device(test_uuid(seed)).unwrap().model_state().on);
    }
}

#[traced_test]
#[test]
fn test_unreachable_device_fails_provisioning() {
    let mut runner = open_network(vec![lamp(1)]);
    runner.call(|c| c.scan_unprovisioned(true)).unwrap();
    runner.run_for(Duration::from_secs(1));
    runner.set_reachable(test_uuid(1), false);

    runner.call(|c| c.provision("kitchen", None, test_uuid(1), 0)).unwrap();
    runner.run_until_idle();

    assert!(provisioned(&runner, test_uuid(1)).is_none());
    assert!(runner.notifications().iter().any(|n| matches!(
        n,
        Notification::ProvisionStatus {
            state: ProvisionState::Failed { .. },
            ..
        }
    )));
    assert_eq!(runner.client().state(), ClientState::Idle);
    assert_eq!(runner.client().db().unwrap().nodes.len(), 1);
}

#[traced_test]
#[test]
fn test_static_oob_mismatch_fails() {
    let client = ClientConfig::default().with_static_oob(vec![0x11; 16]);
    let mut runner = SimulationRunner::new(NetworkConfig::default(), client);
    runner.add_device(lamp(1).with_static_oob(vec![0x22; 16]));
    runner
        .call(|c| c.network_create("home", "phone", DeviceUuid::from_bytes([0xAA; 16]), 1))
        .unwrap();
    runner.run_until_idle();

    provision(&mut runner, "kitchen", None, test_uuid(1));

    assert!(provisioned(&runner, test_uuid(1)).is_none());
    assert!(!runner.network().device(test_uuid(1)).unwrap().is_provisioned());
}

// ═══════════════════════════════════════════════════════════════════════════
// Node removal and re-provisioning
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_reset_node_rotates_keys_and_forgets_record() {
    let mut runner = open_network(vec![lamp(1), lamp(2)]);
    provision(&mut runner, "left", None, test_uuid(1));
    provision(&mut runner, "right", None, test_uuid(2));

    // Remove the node that is not carrying the proxy connection.
    let proxy = runner.link().unwrap();
    let (victim, victim_uuid, keeper_uuid) =
        if runner.network().device(test_uuid(1)).unwrap().unicast() == Some(proxy) {
            ("right", test_uuid(2), test_uuid(1))
        } else {
            ("left", test_uuid(1), test_uuid(2))
        };
    let old_key = runner.client().db().unwrap().net_key(NetKeyIndex::PRIMARY).unwrap().key;

    runner.call(|c| c.reset_node(victim)).unwrap();
    runner.run_until_idle();

    assert!(!runner.network().device(victim_uuid).unwrap().is_provisioned());
    let db = runner.client().db().unwrap();
    assert!(db.node_by_name(victim).is_none());
    let new_key = db.net_key(NetKeyIndex::PRIMARY).unwrap();
    assert_ne!(new_key.key, old_key);
    assert_eq!(new_key.phase, KeyRefreshPhase::Normal);
    assert_eq!(
        runner.network().device(keeper_uuid).unwrap().net_key(NetKeyIndex::PRIMARY),
        Some((new_key.key, KeyRefreshPhase::Normal))
    );
}

#[traced_test]
#[test]
fn test_reprovisioned_device_is_not_replay_rejected() {
    let mut runner = open_network(vec![lamp(1), lamp(2)]);
    provision(&mut runner, "left", None, test_uuid(1));
    provision(&mut runner, "right", None, test_uuid(2));
    let proxy = runner.link().unwrap();
    let (name, uuid) = if runner.network().device(test_uuid(1)).unwrap().unicast() == Some(proxy) {
        ("right", test_uuid(2))
    } else {
        ("left", test_uuid(1))
    };

    runner.call(|c| c.reset_node(name)).unwrap();
    runner.run_until_idle();
    runner.take_notifications();

    provision(&mut runner, name, None, uuid);

    assert!(provisioned(&runner, uuid).is_some());
    assert_eq!(runner.stats().replay_rejected, 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// Key refresh
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_key_refresh_reaches_every_node() {
    let mut runner = open_network(vec![lamp(1), lamp(2)]);
    provision(&mut runner, "left", None, test_uuid(1));
    provision(&mut runner, "right", None, test_uuid(2));
    runner.take_notifications();

    runner.call(|c| c.rotate_net_key(NetKeyIndex::PRIMARY)).unwrap();
    runner.run_until_idle();

    assert!(runner.notifications().contains(&Notification::KeyRefreshComplete {
        net_key: NetKeyIndex::PRIMARY
    }));
    let db = runner.client().db().unwrap();
    let net_key = db.net_key(NetKeyIndex::PRIMARY).unwrap();
    let app_key = db.app_key(AppKeyIndex(0)).unwrap().key;
    for seed in [1, 2] {
        let device = runner.network().device(test_uuid(seed)).unwrap();
        assert_eq!(
            device.net_key(NetKeyIndex::PRIMARY),
            Some((net_key.key, KeyRefreshPhase::Normal))
        );
        assert_eq!(device.app_key(AppKeyIndex(0)), Some(app_key));
    }
    assert_eq!(
        runner.network().local().net_key(NetKeyIndex::PRIMARY),
        Some((net_key.key, KeyRefreshPhase::Normal))
    );
}

#[traced_test]
#[test]
fn test_key_refresh_stalls_on_unreachable_node_and_resumes() {
    let mut runner = open_network(vec![lamp(1), lamp(2)]);
    provision(&mut runner, "left", None, test_uuid(1));
    provision(&mut runner, "right", None, test_uuid(2));
    let proxy = runner.link().unwrap();
    let absent = if runner.network().device(test_uuid(1)).unwrap().unicast() == Some(proxy) {
        test_uuid(2)
    } else {
        test_uuid(1)
    };
    let absent_unicast = runner.network().device(absent).unwrap().unicast().unwrap();
    runner.set_reachable(absent, false);
    runner.take_notifications();

    runner.call(|c| c.rotate_net_key(NetKeyIndex::PRIMARY)).unwrap();
    runner.run_until_idle();

    let stalled = runner.notifications().iter().find_map(|n| match n {
        Notification::KeyRefreshStalled { lagging, .. } => Some(lagging.clone()),
        _ => None,
    });
    assert_eq!(stalled, Some(vec![absent_unicast]));
    assert_eq!(runner.client().state(), ClientState::Idle);
    assert_eq!(
        runner.client().db().unwrap().refreshing_net_key(),
        Some(NetKeyIndex::PRIMARY)
    );

    runner.set_reachable(absent, true);
    runner.take_notifications();
    runner.call(|c| c.resume_key_refresh()).unwrap();
    runner.run_until_idle();

    assert!(runner.notifications().contains(&Notification::KeyRefreshComplete {
        net_key: NetKeyIndex::PRIMARY
    }));
    let key = runner.client().db().unwrap().net_key(NetKeyIndex::PRIMARY).unwrap().key;
    assert_eq!(
        runner.network().device(absent).unwrap().net_key(NetKeyIndex::PRIMARY),
        Some((key, KeyRefreshPhase::Normal))
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Reconfiguration
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_device_config_sends_only_changes() {
    let mut runner = open_network(vec![lamp(1)]);
    provision(&mut runner, "kitchen", None, test_uuid(1));
    runner.take_notifications();
    let config = DeviceConfig::unchanged().with_default_ttl(9);

    runner
        .call(|c| c.set_device_config(Some("kitchen"), config))
        .unwrap();
    runner.run_until_idle();
    assert_eq!(runner.network().device(test_uuid(1)).unwrap().default_ttl(), Some(9));
    let sent = runner.stats().messages_sent;

    runner
        .call(|c| c.set_device_config(Some("kitchen"), config))
        .unwrap();
    runner.run_until_idle();
    assert_eq!(runner.stats().messages_sent, sent);
    let completions = runner
        .notifications()
        .iter()
        .filter(|n| matches!(n, Notification::ConfigComplete { success: true, .. }))
        .count();
    assert_eq!(completions, 2);
}

#[traced_test]
#[test]
fn test_delete_group_unsubscribes_members() {
    let mut runner = open_network(vec![lamp(1)]);
    runner.call(|c| c.create_group("lights", None)).unwrap();
    runner.run_until_idle();
    provision(&mut runner, "kitchen", Some("lights"), test_uuid(1));
    let group = runner.client().db().unwrap().group_by_name("lights").unwrap().address;
    assert!(runner.proxy_filter().contains(&group));

    runner.call(|c| c.delete_group("lights")).unwrap();
    runner.run_until_idle();

    assert!(runner.client().db().unwrap().group_by_name("lights").is_none());
    let device = runner.network().device(test_uuid(1)).unwrap();
    let unicast = device.unicast().unwrap();
    let onoff = ModelId::Sig(GENERIC_ONOFF_SERVER);
    assert!(device.subscriptions(unicast, onoff).is_empty());
    assert_eq!(
        device.publication(unicast, onoff).map(|p| p.address),
        Some(Address::ALL_NODES)
    );
    assert!(!runner.proxy_filter().contains(&group));
}

#[traced_test]
#[test]
fn test_unreachable_member_only_loses_its_own_operations() {
    let mut runner = open_network(vec![lamp(1), lamp(2)]);
    runner.call(|c| c.create_group("lights", None)).unwrap();
    runner.run_until_idle();
    provision(&mut runner, "left", Some("lights"), test_uuid(1));
    provision(&mut runner, "right", Some("lights"), test_uuid(2));
    let proxy = runner.link().unwrap();
    let (absent, present) =
        if runner.network().device(test_uuid(1)).unwrap().unicast() == Some(proxy) {
            (test_uuid(2), test_uuid(1))
        } else {
            (test_uuid(1), test_uuid(2))
        };
    let absent_unicast = runner.network().device(absent).unwrap().unicast().unwrap();
    let group = runner.client().db().unwrap().group_by_name("lights").unwrap().address;
    runner.set_reachable(absent, false);
    runner.take_notifications();

    runner.call(|c| c.delete_group("lights")).unwrap();
    runner.run_until_idle();

    let onoff = ModelId::Sig(GENERIC_ONOFF_SERVER);
    let device = runner.network().device(present).unwrap();
    let present_unicast = device.unicast().unwrap();
    assert!(device.subscriptions(present_unicast, onoff).is_empty());
    assert!(runner
        .network()
        .device(absent)
        .unwrap()
        .subscriptions(absent_unicast, onoff)
        .contains(&group));

    let db = runner.client().db().unwrap();
    let subscribed = |unicast: Address| {
        db.node(unicast).unwrap().elements[0]
            .model(onoff)
            .unwrap()
            .subscriptions
            .contains(&group)
    };
    assert!(!subscribed(present_unicast));
    assert!(subscribed(absent_unicast));

    let notifications = runner.notifications();
    assert!(notifications.iter().any(|n| matches!(
        n,
        Notification::NodeConnectStatus {
            address,
            state: NodeConnectState::UnreachableWarning,
            ..
        } if *address == absent_unicast
    )));
    assert!(notifications
        .iter()
        .any(|n| matches!(n, Notification::ConfigComplete { success: false, .. })));
    assert_eq!(runner.client().state(), ClientState::Idle);
    assert!(runner.client().pending().next().is_none());
}
