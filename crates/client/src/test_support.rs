//! In-crate test harness: a client on the fixture network and a pump that
//! answers its actions like a cooperative local core and set of nodes.

use crate::{ClientConfig, ClientState, MeshClient};
use meshctl_core::{Action, ConnectTarget, Event, OutboundMessage, StateMachine, TimerId};
use meshctl_messages::{
    ConfigRequest, FilterStatus, FilterType, ModelRequest, ModelStatus, ProvisionBearer,
    UnprovisionedReport,
};
use meshctl_test_helpers::{composition_reply, provisioner_composition, success_reply, test_db};
use meshctl_types::{Address, CompositionData, DeviceUuid, ReplayList};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, VecDeque};

pub(crate) use meshctl_test_helpers::TEST_PROVISIONER as PROVISIONER;

const MAX_STEPS: usize = 10_000;

pub(crate) fn new_client() -> MeshClient {
    MeshClient::new(ClientConfig::default(), Box::new(ChaCha8Rng::seed_from_u64(7)))
}

/// Client with the fixture network open and the local device configured.
pub(crate) fn open_client() -> MeshClient {
    let mut client = new_client();
    let actions = client
        .network_open(test_db(), ReplayList::new())
        .expect("open fixture network");
    settle(&mut client, actions);
    assert_eq!(client.state(), ClientState::Idle);
    client
}

/// Bring the proxy link up.
pub(crate) fn connect(client: &mut MeshClient) -> Vec<Action> {
    let actions = client.handle(Event::LinkStatus {
        connected: true,
        proxy: None,
    });
    settle(client, actions)
}

/// Start scanning and report `uuid` from the local scanner.
pub(crate) fn heard(client: &mut MeshClient, uuid: DeviceUuid, rssi: i8, bearer: ProvisionBearer) {
    client.scan_unprovisioned(true).expect("scan");
    let scanner = client.local_address().expect("local address");
    client.handle(Event::UnprovisionedReport(UnprovisionedReport {
        uuid,
        rssi,
        oob_info: 0,
        bearer,
        scanner,
    }));
}

/// Report `uuid` over the advertising bearer from the local scanner.
pub(crate) fn report(client: &mut MeshClient, uuid: DeviceUuid, rssi: i8) -> Vec<Action> {
    let scanner = client.local_address().expect("local address");
    client.handle(Event::UnprovisionedReport(UnprovisionedReport {
        uuid,
        rssi,
        oob_info: 0,
        bearer: ProvisionBearer::Adv,
        scanner,
    }))
}

/// Run `actions` to quiescence with every node answering.
///
/// Returns every action emitted along the way.
pub(crate) fn settle(client: &mut MeshClient, actions: Vec<Action>) -> Vec<Action> {
    pump(client, actions, &HashMap::new(), &[])
}

/// Run `actions` to quiescence.
///
/// Nodes answer composition reads from `compositions` and every other request
/// with success; nodes owning an address in `silent` never answer and their
/// transmissions fail. Armed timers other than the zero-delay queue timer are
/// left for the test to fire.
pub(crate) fn pump(
    client: &mut MeshClient,
    actions: Vec<Action>,
    compositions: &HashMap<Address, CompositionData>,
    silent: &[Address],
) -> Vec<Action> {
    run(client, actions, silent, &|c, dst, message| {
        answer(c, dst, message, compositions)
    })
}

/// Run `actions` to quiescence with `reply` choosing each node's answer.
///
/// Every transmission succeeds; a `None` reply leaves the request in flight
/// until the test fires the request timer.
pub(crate) fn pump_with<F>(client: &mut MeshClient, actions: Vec<Action>, reply: F) -> Vec<Action>
where
    F: Fn(&MeshClient, Address, &OutboundMessage) -> Option<Event>,
{
    run(client, actions, &[], &reply)
}

type Reply<'a> = dyn Fn(&MeshClient, Address, &OutboundMessage) -> Option<Event> + 'a;

fn run(client: &mut MeshClient, actions: Vec<Action>, silent: &[Address], reply: &Reply<'_>) -> Vec<Action> {
    let mut work: VecDeque<Action> = actions.into();
    let mut seen = Vec::new();
    let mut steps = 0;

    while let Some(action) = work.pop_front() {
        steps += 1;
        assert!(steps < MAX_STEPS, "client did not settle");
        let events = respond(client, &action, silent, reply);
        seen.push(action);
        for event in events {
            work.extend(client.handle(event));
        }
    }
    seen
}

fn respond(client: &MeshClient, action: &Action, silent: &[Address], reply: &Reply<'_>) -> Vec<Event> {
    match action {
        Action::SetTimer {
            id: TimerId::ExecutePending,
            ..
        } => vec![Event::Timer(TimerId::ExecutePending)],
        Action::SetDevKey { request_id, .. } => vec![Event::TxComplete {
            request_id: *request_id,
            success: true,
        }],
        Action::Send {
            request_id,
            dst,
            reply: expects_reply,
            message,
            ..
        } => {
            let quiet = silent.iter().any(|s| {
                client
                    .db()
                    .and_then(|db| db.node(*s))
                    .map(|n| n.owns(*dst))
                    .unwrap_or(*s == *dst)
            });
            let mut events = vec![Event::TxComplete {
                request_id: *request_id,
                success: !quiet,
            }];
            if *expects_reply && !quiet {
                events.extend(reply(client, *dst, message));
            }
            events
        }
        Action::Connect(target) => {
            let proxy = match target {
                ConnectTarget::NodeIdentity(node) => Some(*node),
                ConnectTarget::NetworkId(_) => None,
            };
            vec![Event::LinkStatus {
                connected: true,
                proxy,
            }]
        }
        Action::Disconnect => vec![Event::LinkStatus {
            connected: false,
            proxy: None,
        }],
        _ => vec![],
    }
}

/// Reply of a cooperative node: composition from `compositions`, success
/// for everything else.
pub(crate) fn answer(
    client: &MeshClient,
    dst: Address,
    message: &OutboundMessage,
    compositions: &HashMap<Address, CompositionData>,
) -> Option<Event> {
    match message {
        OutboundMessage::Config(ConfigRequest::CompositionDataGet { .. }) => {
            let composition = if client.is_local(dst) {
                provisioner_composition()
            } else {
                compositions.get(&dst)?.clone()
            };
            Some(Event::ConfigStatus {
                src: dst,
                status: composition_reply(&composition),
            })
        }
        OutboundMessage::Config(request) => Some(Event::ConfigStatus {
            src: dst,
            status: success_reply(request),
        }),
        OutboundMessage::Model(ModelRequest::SensorDescriptorGet { .. }) => {
            Some(Event::ModelStatus {
                src: dst,
                status: ModelStatus::SensorDescriptor { properties: vec![] },
            })
        }
        OutboundMessage::Model(_) => None,
        OutboundMessage::ProxyFilter(_) => Some(Event::ProxyFilterStatus {
            src: dst,
            status: FilterStatus {
                filter_type: FilterType::Accept,
                list_size: 0,
            },
        }),
    }
}

/// Persisted databases among `actions`, in order.
pub(crate) fn persisted(actions: &[Action]) -> Vec<&meshctl_types::MeshDb> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::PersistDatabase(db) => Some(&**db),
            _ => None,
        })
        .collect()
}

/// Notifications among `actions`.
pub(crate) fn notifications(actions: &[Action]) -> Vec<&meshctl_core::Notification> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Notify(n) => Some(n),
            _ => None,
        })
        .collect()
}
