//! Production runner.
//!
//! Owns the client behind a `parking_lot::Mutex`, feeds it inbound events
//! one at a time and executes the returned actions against a [`Transport`]
//! and a [`MeshStorage`]. Timers are tokio tasks; re-arming a timer replaces
//! the previous one, and a firing that lost the race against a re-arm or a
//! cancel is discarded by generation.

use crate::config::NetworkSection;
use crate::storage::{MeshStorage, StorageError};
use crate::transport::{EventSender, Transport};
use meshctl_client::{ClientConfig, MeshClient, MeshClientError};
use meshctl_core::{Action, Event, Notification, StateMachine, TimerId};
use meshctl_messages::{LinkReportStatus, ProvisionFailure, ProvisionResult};
use meshctl_types::DeviceUuid;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Errors that stop the runner or reject a call.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Client error: {0}")]
    Client(#[from] MeshClientError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Runner stopped")]
    Stopped,
}

/// Runner inputs, in arrival order.
#[derive(Debug)]
pub(crate) enum Input {
    Event(Event),
    Timer { id: TimerId, generation: u64 },
    Actions(Vec<Action>),
    Shutdown,
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default)]
pub struct RunnerStats {
    pub events_processed: u64,
    pub actions_executed: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub timers_set: u64,
    pub timers_fired: u64,
    pub timers_cancelled: u64,
    pub database_writes: u64,
    pub replay_writes: u64,
}

struct ArmedTimer {
    generation: u64,
    task: JoinHandle<()>,
}

/// Handle for the application: call client operations and stop the runner.
#[derive(Clone)]
pub struct RunnerHandle {
    client: Arc<Mutex<MeshClient>>,
    inputs: mpsc::UnboundedSender<Input>,
    start: Instant,
}

impl RunnerHandle {
    /// Run a client operation. Its actions are executed by the runner after
    /// everything queued before them.
    pub fn call<F>(&self, op: F) -> Result<(), RunnerError>
    where
        F: FnOnce(&mut MeshClient) -> Result<Vec<Action>, MeshClientError>,
    {
        let actions = {
            let mut client = self.client.lock();
            client.set_time(self.start.elapsed());
            op(&mut client)?
        };
        self.inputs
            .send(Input::Actions(actions))
            .map_err(|_| RunnerError::Stopped)
    }

    /// Read client state.
    pub fn read<R>(&self, f: impl FnOnce(&MeshClient) -> R) -> R {
        f(&self.client.lock())
    }

    /// Ask the runner to stop after the inputs already queued.
    pub fn shutdown(&self) {
        let _ = self.inputs.send(Input::Shutdown);
    }
}

/// Drives a [`MeshClient`] with real time and real I/O.
pub struct ProductionRunner<T, S> {
    client: Arc<Mutex<MeshClient>>,
    transport: T,
    storage: S,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    notifications: mpsc::UnboundedSender<Notification>,
    timers: HashMap<TimerId, ArmedTimer>,
    next_generation: u64,
    start: Instant,
    stats: RunnerStats,
}

impl<T: Transport, S: MeshStorage> ProductionRunner<T, S> {
    /// Create a runner. Notifications for the application arrive on the
    /// returned receiver.
    pub fn new(
        config: ClientConfig,
        transport: T,
        storage: S,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (notifications, notifications_rx) = mpsc::unbounded_channel();
        let client = MeshClient::new(config, Box::new(StdRng::from_entropy()));
        let runner = Self {
            client: Arc::new(Mutex::new(client)),
            transport,
            storage,
            inputs_tx,
            inputs_rx,
            notifications,
            timers: HashMap::new(),
            next_generation: 0,
            start: Instant::now(),
            stats: RunnerStats::default(),
        };
        (runner, notifications_rx)
    }

    /// Handle for application calls.
    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            client: self.client.clone(),
            inputs: self.inputs_tx.clone(),
            start: self.start,
        }
    }

    /// Sender the transport reports inbound traffic through.
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            tx: self.inputs_tx.clone(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }

    /// Open the stored network, or create one from `network` if storage is
    /// empty. Completion is reported with `Notification::NetworkOpened`
    /// once the runner runs.
    pub async fn open_or_create(
        &mut self,
        network: &NetworkSection,
        provisioner_uuid: DeviceUuid,
    ) -> Result<(), RunnerError> {
        let actions = match self.storage.load_database().await? {
            Some(db) => {
                let replay = self.storage.load_replay().await?;
                info!(network = %db.name, replay_entries = replay.len(), "Opening stored network");
                self.with_client(|c| c.network_open(db, replay))?
            }
            None => {
                info!(network = %network.name, "No stored network, creating one");
                self.with_client(|c| {
                    c.network_create(
                        &network.name,
                        &network.provisioner,
                        provisioner_uuid,
                        network.element_count,
                    )
                })?
            }
        };
        self.execute(actions).await
    }

    /// Process inputs until [`RunnerHandle::shutdown`].
    pub async fn run(mut self) -> Result<RunnerStats, RunnerError> {
        info!("Runner started");
        let result = loop {
            let Some(input) = self.inputs_rx.recv().await else {
                break Ok(());
            };
            let step = match input {
                Input::Event(event) => self.dispatch(event).await,
                Input::Timer { id, generation } => self.fire_timer(id, generation).await,
                Input::Actions(actions) => self.execute(actions).await,
                Input::Shutdown => break Ok(()),
            };
            if let Err(e) = step {
                error!(error = %e, "Runner stopping");
                break Err(e);
            }
        };
        for (_, timer) in self.timers.drain() {
            timer.task.abort();
        }
        info!(
            events = self.stats.events_processed,
            sent = self.stats.messages_sent,
            "Runner stopped"
        );
        result.map(|()| self.stats)
    }

    fn with_client<F>(&mut self, op: F) -> Result<Vec<Action>, MeshClientError>
    where
        F: FnOnce(&mut MeshClient) -> Result<Vec<Action>, MeshClientError>,
    {
        let mut client = self.client.lock();
        client.set_time(self.start.elapsed());
        op(&mut client)
    }

    /// Hand one event to the client. The lock is released before any I/O.
    fn feed(&mut self, event: Event) -> Vec<Action> {
        self.stats.events_processed += 1;
        trace!(event = event.type_name(), "Handling");
        let mut client = self.client.lock();
        client.set_time(self.start.elapsed());
        client.handle(event)
    }

    async fn dispatch(&mut self, event: Event) -> Result<(), RunnerError> {
        let actions = self.feed(event);
        self.execute(actions).await
    }

    async fn fire_timer(&mut self, id: TimerId, generation: u64) -> Result<(), RunnerError> {
        if self.timers.get(&id).map(|t| t.generation) != Some(generation) {
            trace!(timer = ?id, "Discarding stale timer");
            return Ok(());
        }
        self.timers.remove(&id);
        self.stats.timers_fired += 1;
        self.dispatch(Event::Timer(id)).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Action execution
    // ═══════════════════════════════════════════════════════════════════════

    /// Execute actions in order. Outcomes the transport reports synchronously
    /// (TX complete, failed link opens) are fed back before the next action.
    async fn execute(&mut self, actions: Vec<Action>) -> Result<(), RunnerError> {
        let mut work: VecDeque<Action> = actions.into();
        while let Some(action) = work.pop_front() {
            self.stats.actions_executed += 1;
            trace!(action = action.type_name(), "Executing");
            match action {
                Action::Send {
                    request_id,
                    dst,
                    key,
                    reply,
                    message,
                } => {
                    debug!(
                        request_id = %request_id,
                        dst = %dst,
                        message = message.type_name(),
                        reply,
                        "Sending"
                    );
                    let success = match self.transport.send(dst, key, &message).await {
                        Ok(()) => {
                            self.stats.messages_sent += 1;
                            true
                        }
                        Err(e) => {
                            warn!(dst = %dst, error = %e, "Send failed");
                            self.stats.send_failures += 1;
                            false
                        }
                    };
                    work.extend(self.feed(Event::TxComplete {
                        request_id,
                        success,
                    }));
                }

                Action::SetDevKey {
                    request_id,
                    unicast,
                    element_count,
                    key,
                } => {
                    let success = match self
                        .transport
                        .set_dev_key(unicast, element_count, key)
                        .await
                    {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(unicast = %unicast, error = %e, "Device key install failed");
                            false
                        }
                    };
                    work.extend(self.feed(Event::TxComplete {
                        request_id,
                        success,
                    }));
                }

                Action::Connect(target) => {
                    // A failed start is reported by the connect timer.
                    if let Err(e) = self.transport.connect(target).await {
                        warn!(connect_target = ?target, error = %e, "Connect failed");
                    }
                }

                Action::Disconnect => {
                    if let Err(e) = self.transport.disconnect().await {
                        warn!(error = %e, "Disconnect failed");
                    }
                }

                Action::ProvisionConnect {
                    uuid,
                    bearer,
                    scanner,
                    identify_duration,
                } => {
                    if let Err(e) = self
                        .transport
                        .provision_connect(uuid, bearer, scanner, identify_duration)
                        .await
                    {
                        warn!(uuid = %uuid, error = %e, "Provisioning link open failed");
                        work.extend(
                            self.feed(Event::ProvisionLinkReport(LinkReportStatus::OpenFailed)),
                        );
                    }
                }

                Action::ProvisionStart { auth, data } => {
                    if let Err(e) = self.transport.provision_start(auth, &data).await {
                        warn!(error = %e, "Provisioning start failed");
                        work.extend(self.feed(Event::ProvisionEnd(ProvisionResult::Failed(
                            ProvisionFailure::LinkLost,
                        ))));
                    }
                }

                Action::ProvisionSetOob(oob) => {
                    if let Err(e) = self.transport.provision_set_oob(&oob).await {
                        warn!(error = %e, "Static OOB answer failed");
                        work.extend(self.feed(Event::ProvisionEnd(ProvisionResult::Failed(
                            ProvisionFailure::LinkLost,
                        ))));
                    }
                }

                Action::ProvisionClose => {
                    if let Err(e) = self.transport.provision_close().await {
                        warn!(error = %e, "Provisioning close failed");
                    }
                }

                Action::ScanStart { scanner } => {
                    if let Err(e) = self.transport.scan_start(scanner).await {
                        warn!(scanner = %scanner, error = %e, "Scan start failed");
                    }
                }

                Action::ScanStop { scanner } => {
                    if let Err(e) = self.transport.scan_stop(scanner).await {
                        warn!(scanner = %scanner, error = %e, "Scan stop failed");
                    }
                }

                Action::SetTimer { id, duration } => self.set_timer(id, duration),

                Action::CancelTimer { id } => {
                    if let Some(timer) = self.timers.remove(&id) {
                        timer.task.abort();
                        self.stats.timers_cancelled += 1;
                    }
                }

                Action::PersistDatabase(db) => {
                    self.storage.save_database(&db).await?;
                    self.stats.database_writes += 1;
                }

                Action::PersistReplayList(records) => {
                    self.storage.save_replay(&records).await?;
                    self.stats.replay_writes += 1;
                }

                Action::Notify(notification) => {
                    debug!(notification = notification.type_name(), "Notifying");
                    let _ = self.notifications.send(notification);
                }
            }
        }
        Ok(())
    }

    fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.inputs_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(Input::Timer { id, generation });
        });
        if let Some(old) = self.timers.insert(id, ArmedTimer { generation, task }) {
            old.task.abort();
        }
        self.stats.timers_set += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileStorage;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use meshctl_core::{ConnectTarget, OutboundMessage, SecurityKey};
    use meshctl_messages::{AuthMethod, ProvisionBearer, ProvisioningData};
    use meshctl_types::{Address, Key128};
    use tracing_test::traced_test;

    /// Transport that accepts everything and answers nothing.
    #[derive(Default)]
    struct SilentTransport {
        sent: Mutex<Vec<Address>>,
    }

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send(
            &self,
            dst: Address,
            _key: SecurityKey,
            _message: &OutboundMessage,
        ) -> Result<(), TransportError> {
            self.sent.lock().push(dst);
            Ok(())
        }
        async fn set_dev_key(&self, _: Address, _: u8, _: Key128) -> Result<(), TransportError> {
            Ok(())
        }
        async fn connect(&self, _: ConnectTarget) -> Result<(), TransportError> {
            Err(TransportError::Busy)
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
            Err(TransportError::NotConnected)
        }
        async fn provision_start(
            &self,
            _: AuthMethod,
            _: &ProvisioningData,
        ) -> Result<(), TransportError> {
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

    fn runner(
        dir: &std::path::Path,
    ) -> (
        ProductionRunner<SilentTransport, FileStorage>,
        mpsc::UnboundedReceiver<Notification>,
    ) {
        let config = ClientConfig::default()
            .with_request_timeout(Duration::from_millis(10))
            .with_max_send_attempts(2);
        ProductionRunner::new(
            config,
            SilentTransport::default(),
            FileStorage::new(dir).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_timer_replacement_discards_stale_firing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut runner, _notifications) = runner(dir.path());

        runner.set_timer(TimerId::Connect, Duration::ZERO);
        let first = runner.timers[&TimerId::Connect].generation;
        runner.set_timer(TimerId::Connect, Duration::from_secs(60));

        runner.fire_timer(TimerId::Connect, first).await.unwrap();
        assert_eq!(runner.stats().timers_fired, 0);
        assert!(runner.timers.contains_key(&TimerId::Connect));
        assert_eq!(runner.stats().timers_set, 2);
    }

    #[tokio::test]
    async fn test_silent_local_device_fails_network_open() {
        let dir = tempfile::tempdir().unwrap();
        let (mut runner, mut notifications) = runner(dir.path());
        let handle = runner.handle();

        runner
            .open_or_create(&NetworkSection::default(), DeviceUuid::from_bytes([7; 16]))
            .await
            .unwrap();
        let task = tokio::spawn(runner.run());

        let opened = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match notifications.recv().await {
                    Some(Notification::NetworkOpened { success }) => break Some(success),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(opened, Some(false));
        assert!(!handle.read(|c| c.is_open()));

        handle.shutdown();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.messages_sent, 2);
        assert!(stats.database_writes >= 1);
        assert!(stats.timers_fired >= 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_call_after_shutdown_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _notifications) = runner(dir.path());
        let handle = runner.handle();

        handle.shutdown();
        runner.run().await.unwrap();

        assert!(matches!(
            handle.call(|c| c.network_create("late", "p", DeviceUuid::default(), 1)),
            Err(RunnerError::Stopped)
        ));
        assert!(logs_contain("Runner stopped"));
    }
}
