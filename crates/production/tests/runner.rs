//! Runner tests against a transport that loops local configuration back.

use async_trait::async_trait;
use meshctl_core::{ConnectTarget, Event, Notification, OutboundMessage, SecurityKey};
use meshctl_messages::{AuthMethod, ConfigRequest, ProvisionBearer, ProvisioningData};
use meshctl_production::config::NetworkSection;
use meshctl_production::{
    EventSender, FileStorage, MeshStorage, ProductionRunner, RunnerHandle, Transport,
    TransportError,
};
use meshctl_test_helpers::{composition_reply, provisioner_composition};
use meshctl_types::{Address, DeviceUuid, Key128};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Answers composition reads with the provisioner's composition. Everything
/// else leaves without a reply.
#[derive(Default)]
struct LoopbackTransport {
    events: Mutex<Option<EventSender>>,
    sent: Mutex<Vec<(Address, &'static str)>>,
    dev_keys: Mutex<Vec<Address>>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(
        &self,
        dst: Address,
        _key: SecurityKey,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        self.sent.lock().push((dst, message.type_name()));
        if let OutboundMessage::Config(ConfigRequest::CompositionDataGet { .. }) = message {
            let events = self.events.lock().clone().ok_or(TransportError::NotConnected)?;
            events.send(Event::ConfigStatus {
                src: dst,
                status: composition_reply(&provisioner_composition()),
            });
        }
        Ok(())
    }

    async fn set_dev_key(&self, unicast: Address, _: u8, _: Key128) -> Result<(), TransportError> {
        self.dev_keys.lock().push(unicast);
        Ok(())
    }

    async fn connect(&self, _: ConnectTarget) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn provision_connect(
        &self,
        _: DeviceUuid,
        _: ProvisionBearer,
        _: Address,
        _: u8,
    ) -> Result<(), TransportError> {
        Err(TransportError::Busy)
    }

    async fn provision_start(&self, _: AuthMethod, _: &ProvisioningData) -> Result<(), TransportError> {
        Ok(())
    }

    async fn provision_set_oob(&self, _: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn provision_close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn scan_start(&self, _: Address) -> Result<(), TransportError> {
        Ok(())
    }

    async fn scan_stop(&self, _: Address) -> Result<(), TransportError> {
        Ok(())
    }
}

struct Running {
    handle: RunnerHandle,
    notifications: mpsc::UnboundedReceiver<Notification>,
    task: JoinHandle<Result<meshctl_production::RunnerStats, meshctl_production::RunnerError>>,
}

async fn start(dir: &Path) -> Running {
    let storage = FileStorage::new(dir).unwrap();
    let (mut runner, notifications) = ProductionRunner::new(
        Default::default(),
        LoopbackTransport::default(),
        storage,
    );
    *runner.transport().events.lock() = Some(runner.event_sender());
    let network = NetworkSection {
        name: "home".into(),
        ..Default::default()
    };
    runner
        .open_or_create(&network, DeviceUuid::from_bytes([0xAA; 16]))
        .await
        .unwrap();
    let handle = runner.handle();
    Running {
        handle,
        notifications,
        task: tokio::spawn(runner.run()),
    }
}

async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<Notification>, mut pred: F) -> Notification
where
    F: FnMut(&Notification) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let notification = rx.recv().await.expect("runner stopped");
            if pred(&notification) {
                return notification;
            }
        }
    })
    .await
    .expect("notification not received")
}

#[tokio::test]
async fn test_create_network_configures_local_device() {
    let dir = tempfile::tempdir().unwrap();
    let mut running = start(dir.path()).await;

    let opened = wait_for(&mut running.notifications, |n| {
        matches!(n, Notification::NetworkOpened { .. })
    })
    .await;
    assert_eq!(opened, Notification::NetworkOpened { success: true });
    assert!(running.handle.read(|c| c.is_open()));

    running.handle.shutdown();
    let stats = running.task.await.unwrap().unwrap();
    assert!(stats.messages_sent >= 1);
    assert!(stats.database_writes >= 2);

    let db = FileStorage::new(dir.path())
        .unwrap()
        .load_database()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(db.name, "home");
    assert!(db.local_node().is_some_and(|n| n.config_complete));
}

#[tokio::test]
async fn test_network_reopens_with_groups() {
    let dir = tempfile::tempdir().unwrap();

    let mut first = start(dir.path()).await;
    wait_for(&mut first.notifications, |n| {
        matches!(n, Notification::NetworkOpened { success: true })
    })
    .await;
    first.handle.call(|c| c.create_group("lights", None)).unwrap();
    wait_for(&mut first.notifications, |n| {
        matches!(n, Notification::DatabaseChanged)
    })
    .await;
    first.handle.shutdown();
    first.task.await.unwrap().unwrap();

    let mut second = start(dir.path()).await;
    wait_for(&mut second.notifications, |n| {
        matches!(n, Notification::NetworkOpened { success: true })
    })
    .await;
    let groups = second
        .handle
        .read(|c| c.db().map(|db| db.groups.len()).unwrap_or(0));
    assert_eq!(groups, 1);
    second.handle.shutdown();
    second.task.await.unwrap().unwrap();
}
