//! Bridge session lifecycle.
//!
//! ```text
//!            start()                      setup ok
//! Stopped ───────────▶ Starting ───────────────────▶ Running
//!    ▲                    │ setup failed                │ stop() / device lost /
//!    │                    ▼                             │ hub ended
//!    └──────────────── Stopped ◀──── Stopping ◀─────────┘
//! ```
//!
//! A running session owns three tasks:
//!
//! - the serial read loop ([`SerialTransport::run`]),
//! - the hub accept loop ([`ClientHub::serve`]),
//! - a supervisor that waits for the first of: serial loop ended, hub loop
//!   ended, stop requested.  It then tears the session down exactly once:
//!   hub first, then the serial port.
//!
//! The state lives in a `std::sync::Mutex` that is never held across an
//! `.await`, so [`BridgeOrchestrator::is_running`] is a plain synchronous
//! call.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serialws_core::{BridgeConfig, ConfigError, DeviceCandidate, DeviceStatus};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::discovery::DeviceDiscovery;
use crate::application::ports::{FrameBroadcaster, SerialWriter, SetupError};
use crate::infrastructure::client_hub::{ClientHub, HubSettings};
use crate::infrastructure::serial_transport::{SerialExit, SerialTransport};

/// How long teardown waits for a worker task before aborting it.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Why [`BridgeOrchestrator::start`] did not start a session.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("bridge is already {0}")]
    AlreadyRunning(BridgeState),

    #[error("no supported USB serial device is attached")]
    NoDevice,

    #[error("no permission to open the USB serial device")]
    NoPermission,

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Setup(#[from] SetupError),
}

impl StartError {
    /// `true` for conditions that may clear without a config change
    /// (device plugged in, permission granted).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoDevice | Self::NoPermission)
    }
}

/// Why a running session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// [`BridgeOrchestrator::stop`] was called.
    Requested,
    /// The serial read loop ended on its own.
    SerialEnded(SerialExit),
    /// The hub accept loop ended on its own.
    HubEnded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("stop requested"),
            Self::SerialEnded(exit) => write!(f, "serial {exit}"),
            Self::HubEnded => f.write_str("WebSocket server ended"),
        }
    }
}

/// Receives session lifecycle notifications.
///
/// Called from the orchestrator's tasks; implementations must not block.
pub trait BridgeListener: Send + Sync {
    /// The session reached `Running`.
    fn started(&self);
    /// The session reached `Stopped` after having been `Running`.
    fn stopped(&self);
}

/// Handles of a running session.
struct Session {
    local_addr: SocketAddr,
    stop_tx: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
}

struct Shared {
    state: BridgeState,
    session: Option<Session>,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts, supervises and stops bridge sessions.
pub struct BridgeOrchestrator {
    discovery: DeviceDiscovery,
    listener: Arc<dyn BridgeListener>,
    shared: SharedState,
}

impl BridgeOrchestrator {
    pub fn new(discovery: DeviceDiscovery, listener: Arc<dyn BridgeListener>) -> Self {
        Self {
            discovery,
            listener,
            shared: Arc::new(Mutex::new(Shared {
                state: BridgeState::Stopped,
                session: None,
            })),
        }
    }

    pub fn state(&self) -> BridgeState {
        lock(&self.shared).state
    }

    pub fn is_running(&self) -> bool {
        self.state() == BridgeState::Running
    }

    /// Discovery status; what `start` would report before opening anything.
    pub fn status(&self) -> DeviceStatus {
        self.discovery.status()
    }

    /// Address of the running session's WebSocket server.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared).session.as_ref().map(|s| s.local_addr)
    }

    pub fn discovery(&self) -> &DeviceDiscovery {
        &self.discovery
    }

    /// Starts a session on the first discovered candidate.
    ///
    /// On success the bridge is `Running` and `started` has been emitted.
    /// On failure the bridge is `Stopped` and no notification is emitted.
    ///
    /// # Errors
    ///
    /// See [`StartError`].
    pub async fn start(&self, config: BridgeConfig) -> Result<(), StartError> {
        let current = self.state();
        if current != BridgeState::Stopped {
            return Err(StartError::AlreadyRunning(current));
        }

        config.validate()?;

        let candidates = self.discovery.list_candidates();
        match DeviceStatus::from_candidates(&candidates) {
            DeviceStatus::NoDevice => {
                info!("start: no supported USB serial device attached");
                return Err(StartError::NoDevice);
            }
            DeviceStatus::NoPermission => {
                warn!("start: no permission for {}", candidates[0]);
                return Err(StartError::NoPermission);
            }
            DeviceStatus::Ok => {}
        }

        {
            let mut shared = lock(&self.shared);
            if shared.state != BridgeState::Stopped {
                return Err(StartError::AlreadyRunning(shared.state));
            }
            shared.state = BridgeState::Starting;
        }

        match self.launch(&candidates[0], &config).await {
            Ok(launched) => {
                let local_addr = launched.local_addr;
                {
                    let mut shared = lock(&self.shared);
                    shared.state = BridgeState::Running;
                    shared.session = Some(Session {
                        local_addr,
                        stop_tx: Some(launched.stop_tx),
                        supervisor: Some(launched.supervisor),
                    });
                }

                info!("bridge running: {} ↔ ws://{local_addr}", candidates[0]);
                self.listener.started();

                // The supervisor holds teardown until `started` is out.
                let _ = launched.ready_tx.send(());
                Ok(())
            }
            Err(e) => {
                lock(&self.shared).state = BridgeState::Stopped;
                error!("start failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Stops the running session and waits for teardown to finish.
    ///
    /// A no-op unless the bridge is `Running`.
    pub async fn stop(&self) {
        let (stop_tx, supervisor) = {
            let mut shared = lock(&self.shared);
            if shared.state != BridgeState::Running {
                debug!("stop ignored: bridge is {}", shared.state);
                return;
            }
            shared.state = BridgeState::Stopping;
            match shared.session.as_mut() {
                Some(session) => (session.stop_tx.take(), session.supervisor.take()),
                None => (None, None),
            }
        };

        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }

        if let Some(supervisor) = supervisor {
            if let Err(e) = supervisor.await {
                error!("session supervisor failed: {e}");
            }
        }
    }

    /// Opens the device, binds the hub and spawns the session tasks.
    async fn launch(
        &self,
        candidate: &DeviceCandidate,
        config: &BridgeConfig,
    ) -> Result<Launched, SetupError> {
        let transport = Arc::new(SerialTransport::open(
            self.discovery.source(),
            candidate,
            config,
        )?);

        let hub = match ClientHub::bind(
            config.bind_addr(),
            HubSettings::from_config(config),
            Arc::clone(&transport) as Arc<dyn SerialWriter>,
        )
        .await
        {
            Ok(hub) => hub,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        let local_addr = hub.local_addr();

        let serial_task = {
            let transport = Arc::clone(&transport);
            let broadcaster = Arc::clone(&hub) as Arc<dyn FrameBroadcaster>;
            tokio::spawn(async move { transport.run(broadcaster.as_ref()).await })
        };
        let hub_task = tokio::spawn(Arc::clone(&hub).serve());

        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let supervisor = tokio::spawn(supervise(Supervised {
            shared: Arc::clone(&self.shared),
            listener: Arc::clone(&self.listener),
            transport,
            hub,
            serial_task,
            hub_task,
            stop_rx,
            ready_rx,
        }));

        Ok(Launched {
            local_addr,
            stop_tx,
            ready_tx,
            supervisor,
        })
    }
}

struct Launched {
    local_addr: SocketAddr,
    stop_tx: oneshot::Sender<()>,
    ready_tx: oneshot::Sender<()>,
    supervisor: JoinHandle<()>,
}

// ── Supervisor ────────────────────────────────────────────────────────────────

struct Supervised {
    shared: SharedState,
    listener: Arc<dyn BridgeListener>,
    transport: Arc<SerialTransport>,
    hub: Arc<ClientHub>,
    serial_task: JoinHandle<SerialExit>,
    hub_task: JoinHandle<()>,
    stop_rx: oneshot::Receiver<()>,
    ready_rx: oneshot::Receiver<()>,
}

async fn supervise(mut s: Supervised) {
    // Either `started` went out or `start` was dropped mid-way; both are fine.
    let _ = (&mut s.ready_rx).await;

    let reason = tokio::select! {
        exit = &mut s.serial_task => StopReason::SerialEnded(
            exit.unwrap_or_else(|e| SerialExit::Failed(format!("serial task failed: {e}"))),
        ),
        _ = &mut s.hub_task => StopReason::HubEnded,
        _ = &mut s.stop_rx => StopReason::Requested,
    };

    {
        let mut shared = lock(&s.shared);
        shared.state = BridgeState::Stopping;
        // A concurrent `stop` finds nothing left to signal.
        if let Some(session) = shared.session.as_mut() {
            session.stop_tx.take();
        }
    }

    info!("stopping bridge: {reason}");

    s.hub.close().await;
    s.transport.close().await;

    match &reason {
        StopReason::SerialEnded(_) => join_worker("WebSocket server", s.hub_task).await,
        StopReason::HubEnded => join_worker("serial read loop", s.serial_task).await,
        StopReason::Requested => {
            join_worker("WebSocket server", s.hub_task).await;
            join_worker("serial read loop", s.serial_task).await;
        }
    }

    {
        let mut shared = lock(&s.shared);
        shared.state = BridgeState::Stopped;
        shared.session = None;
    }

    info!("bridge stopped");
    s.listener.stopped();
}

async fn join_worker<T>(name: &str, mut handle: JoinHandle<T>) {
    match tokio::time::timeout(WORKER_JOIN_TIMEOUT, &mut handle).await {
        Ok(Ok(_)) => debug!("{name} task finished"),
        Ok(Err(e)) => error!("{name} task failed: {e}"),
        Err(_) => {
            warn!("{name} task did not finish within {WORKER_JOIN_TIMEOUT:?}; aborting");
            handle.abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
