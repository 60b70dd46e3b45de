use crate::config::{ClientConfig, ConfigError, TransportKind};
use crate::poll::PollTransport;
use crate::push::PushTransport;
use crate::session::{SessionEvent, Transport, SESSION_EVENT_CAPACITY};
use gpuwatch_core::{
    build_device_views, claim_conflicts, decode_frame, ConnectionStatus, DeviceView,
    FleetSummary, Frame, ReconnectPolicy, ReconnectState, Snapshot,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What consumers observe: the last accepted snapshot, its device views and
/// the connection status. The snapshot survives disconnects and restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveState {
    pub snapshot: Option<Arc<Snapshot>>,
    pub device_views: Arc<[DeviceView]>,
    pub status: ConnectionStatus,
}

impl Default for LiveState {
    fn default() -> Self {
        Self {
            snapshot: None,
            device_views: Arc::from(Vec::new()),
            status: ConnectionStatus::Connecting,
        }
    }
}

impl LiveState {
    pub fn summary(&self) -> FleetSummary {
        FleetSummary::from_views(&self.device_views)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub sessions_opened: u64,
    pub snapshots_accepted: u64,
    pub frames_ignored: u64,
    pub decode_failures: u64,
    pub claim_conflicts: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Shared {
    epoch: u64,
    stats: MonitorStats,
}

#[derive(Debug)]
struct Publisher {
    state_tx: watch::Sender<LiveState>,
    shared: Mutex<Shared>,
}

impl Publisher {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(LiveState::default());
        Self {
            state_tx,
            shared: Mutex::new(Shared::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a new activation and returns its epoch.
    fn begin(&self, status: ConnectionStatus) -> u64 {
        let mut shared = self.lock();
        shared.epoch += 1;
        self.state_tx.send_if_modified(|state| {
            let changed = state.status != status;
            state.status = status;
            changed
        });
        shared.epoch
    }

    /// Invalidates the current activation; later updates from it are dropped.
    fn end(&self) {
        self.lock().epoch += 1;
    }

    /// Runs `update` only while `epoch` is current. `update` returns whether
    /// the live state changed; subscribers are notified only then.
    fn apply<F>(&self, epoch: u64, update: F) -> bool
    where
        F: FnOnce(&mut LiveState, &mut MonitorStats) -> bool,
    {
        let mut shared = self.lock();
        if shared.epoch != epoch {
            return false;
        }
        let stats = &mut shared.stats;
        self.state_tx.send_if_modified(|state| update(state, stats));
        true
    }

    fn record_error(&self, message: String) {
        self.lock().stats.last_error = Some(message);
    }
}

/// Connection state machine for one status endpoint.
///
/// `start` spawns a driver task that opens transport sessions, decodes their
/// frames and reconnects with backoff. `stop` invalidates the activation
/// before aborting the driver, so nothing is published after it returns.
pub struct Monitor {
    transport: Option<Arc<dyn Transport>>,
    config_error: Option<ConfigError>,
    policy: ReconnectPolicy,
    publisher: Arc<Publisher>,
    driver: Option<JoinHandle<()>>,
    active: bool,
}

impl Monitor {
    pub fn new(transport: impl Transport, policy: ReconnectPolicy) -> Self {
        Self::assemble(Some(Arc::new(transport)), None, policy)
    }

    /// Builds the transport named by `config`. A config that cannot produce a
    /// transport yields a monitor that reports `disconnected` and never retries.
    pub fn from_config(config: &ClientConfig) -> Self {
        match transport_for(config) {
            Ok(transport) => Self::assemble(Some(transport), None, config.backoff),
            Err(err) => {
                error!(
                    event = "monitor_misconfigured",
                    endpoint = %config.endpoint,
                    transport = %config.transport,
                    error = %err
                );
                let monitor = Self::assemble(None, Some(err.clone()), config.backoff);
                monitor.publisher.record_error(err.to_string());
                monitor
            }
        }
    }

    fn assemble(
        transport: Option<Arc<dyn Transport>>,
        config_error: Option<ConfigError>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            config_error,
            policy,
            publisher: Arc::new(Publisher::new()),
            driver: None,
            active: false,
        }
    }

    /// Starts an activation. Must be called inside a Tokio runtime. A no-op
    /// while already active.
    pub fn start(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        let Some(transport) = self.transport.clone() else {
            self.publisher.begin(ConnectionStatus::Disconnected);
            return;
        };
        let epoch = self.publisher.begin(ConnectionStatus::Connecting);
        info!(event = "monitor_started", transport = transport.name(), epoch);
        let driver = Driver {
            transport,
            policy: self.policy,
            publisher: self.publisher.clone(),
            epoch,
        };
        self.driver = Some(tokio::spawn(driver.run()));
    }

    /// Ends the activation: cancels any reconnect wait and closes the live
    /// session. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.publisher.end();
        if let Some(driver) = self.driver.take() {
            driver.abort();
            info!(event = "monitor_stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn transport_name(&self) -> Option<&'static str> {
        self.transport.as_ref().map(|transport| transport.name())
    }

    pub fn config_error(&self) -> Option<&ConfigError> {
        self.config_error.as_ref()
    }

    pub fn state(&self) -> LiveState {
        self.publisher.state_tx.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.publisher.state_tx.borrow().status
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.publisher.state_tx.borrow().snapshot.clone()
    }

    pub fn device_views(&self) -> Arc<[DeviceView]> {
        self.publisher.state_tx.borrow().device_views.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.publisher.state_tx.subscribe()
    }

    pub fn stats(&self) -> MonitorStats {
        self.publisher.lock().stats.clone()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn transport_for(config: &ClientConfig) -> Result<Arc<dyn Transport>, ConfigError> {
    config.validate()?;
    let url = config.resolve_endpoint()?;
    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Push => Arc::new(PushTransport::new(url)),
        TransportKind::Poll => Arc::new(PollTransport::http(
            url,
            config.poll_interval,
            config.request_timeout(),
        )?),
    };
    Ok(transport)
}

struct Driver {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    publisher: Arc<Publisher>,
    epoch: u64,
}

impl Driver {
    async fn run(self) {
        let mut reconnect = ReconnectState::default();
        let mut has_connected = false;

        loop {
            let (events_tx, mut events_rx) = mpsc::channel(SESSION_EVENT_CAPACITY);
            let mut session = self.transport.open(events_tx);
            let reason = loop {
                match events_rx.recv().await {
                    Some(SessionEvent::Opened) => {
                        reconnect.reset();
                        has_connected = true;
                        self.on_opened();
                    }
                    Some(SessionEvent::Payload(raw)) => self.on_payload(&raw),
                    Some(SessionEvent::Interrupted { reason }) => {
                        warn!(
                            event = "session_interrupted",
                            transport = self.transport.name(),
                            reason = %reason
                        );
                        self.on_lost(has_connected, reason);
                    }
                    Some(SessionEvent::Closed { reason }) => break reason,
                    None => break "session ended".to_string(),
                }
            };
            session.close();
            drop(session);

            info!(
                event = "session_closed",
                transport = self.transport.name(),
                reason = %reason
            );
            if !self.on_lost(has_connected, reason) {
                return;
            }
            let delay = reconnect.next_delay(&self.policy);
            info!(
                event = "reconnect_scheduled",
                transport = self.transport.name(),
                attempt = reconnect.attempts(),
                delay_ms = delay.as_millis() as u64
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn on_opened(&self) {
        info!(event = "session_opened", transport = self.transport.name());
        self.publisher.apply(self.epoch, |state, stats| {
            stats.sessions_opened += 1;
            let changed = state.status != ConnectionStatus::Connected;
            state.status = ConnectionStatus::Connected;
            changed
        });
    }

    /// Returns false once the activation has ended.
    fn on_lost(&self, has_connected: bool, reason: String) -> bool {
        self.publisher.apply(self.epoch, |state, stats| {
            stats.last_error = Some(reason);
            if !has_connected || state.status == ConnectionStatus::Disconnected {
                return false;
            }
            state.status = ConnectionStatus::Disconnected;
            true
        })
    }

    fn on_payload(&self, raw: &[u8]) {
        match decode_frame(raw) {
            Ok(Frame::Status(snapshot)) => {
                let conflicts = claim_conflicts(&snapshot);
                for conflict in &conflicts {
                    debug!(
                        event = "claim_conflict",
                        device = conflict.device_index,
                        kept_port = conflict.kept_port,
                        ignored_port = conflict.ignored_port
                    );
                }
                let device_views: Arc<[DeviceView]> = build_device_views(&snapshot).into();
                let snapshot = Arc::new(snapshot);
                self.publisher.apply(self.epoch, |state, stats| {
                    stats.snapshots_accepted += 1;
                    stats.claim_conflicts += conflicts.len() as u64;
                    state.snapshot = Some(snapshot);
                    state.device_views = device_views;
                    true
                });
            }
            Ok(Frame::Control(kind)) => {
                debug!(event = "control_frame", kind = %kind);
                self.publisher.apply(self.epoch, |_, stats| {
                    stats.frames_ignored += 1;
                    false
                });
            }
            Err(err) => {
                warn!(
                    event = "frame_decode_failed",
                    transport = self.transport.name(),
                    bytes = raw.len(),
                    error = %err
                );
                self.publisher.apply(self.epoch, |_, stats| {
                    stats.decode_failures += 1;
                    stats.last_error = Some(err.to_string());
                    false
                });
            }
        }
    }
}
