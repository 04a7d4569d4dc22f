//! The session engine: role state machine and operation front door.
//!
//! [`SessionEngine`] owns everything a node knows about local wireless
//! sessions: its current role state, the authoritative [`NetworkInfo`] while
//! hosting or joined, and the background tasks that keep either side of a
//! session alive. External callers invoke the operations below and poll
//! state through the query methods; the [`EventNotifier`] tells them when a
//! query is worth repeating.
//!
//! # State machine
//!
//! ```text
//!          openAccessPoint            createNetwork
//!  Idle ──────────────────► ApOpened ──────────────► ApCreated
//!   ▲                          ▲                         │
//!   │     closeAccessPoint     └───── destroyNetwork ────┘
//!   │
//!   │     openStation              connect
//!   └◄─────────────────► StationOpened ─────► StationConnected
//!         closeStation         ▲                    │
//!                              └──── disconnect ────┘
//! ```
//!
//! # Concurrency
//!
//! Mutating operations serialize on an operation mutex; concurrent callers
//! queue rather than fail. All shared state lives behind a single inner
//! mutex that both foreground operations and background tasks hold only for
//! short, await-free critical sections. Network round trips (the connect
//! handshake, the scan window) run outside the inner mutex so hosting and
//! liveness traffic continue underneath them. `finalize` trips a cancel
//! flag that every in-flight operation observes at its next await point.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use lanlink_core::domain::descriptor::{
    AcceptPolicy, DisconnectReason, NetworkConfigSnapshot, NetworkInfo, NodeInfo,
    NodeLatestUpdate, SecurityParameter, ADVERTISE_DATA_MAX, NODE_TABLE_CAPACITY,
};
use lanlink_core::domain::session::{
    ConnectRequest, CreateNetworkConfig, ScanFilter, ValidationError,
};
use lanlink_core::protocol::SequenceCounter;
use uuid::Uuid;

use crate::application::notifier::{CancelFlag, EventNotifier};
use crate::infrastructure::network::host::{self, HostRuntime};
use crate::infrastructure::network::scanner;
use crate::infrastructure::network::station::{self, StationRuntime};
use crate::infrastructure::network::{derive_mac, detect_local_ipv4};

/// Role state of the engine. Values are stable and exposed as integers at
/// the query boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum SessionState {
    #[default]
    Idle = 0,
    /// Access-point role enabled, no session yet.
    AccessPointOpened = 1,
    /// Hosting an active session.
    AccessPointCreated = 2,
    /// Station role enabled, not joined.
    StationOpened = 3,
    /// Joined a session as a station.
    StationConnected = 4,
}

impl SessionState {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation is not legal in the current state. Carries the state
    /// that was observed; state is left unchanged.
    #[error("operation not valid in state {0:?}")]
    InvalidState(SessionState),
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),
    /// The request's application protocol version differs from the
    /// target's recorded version (exact-match policy).
    #[error("application protocol version does not match the target network")]
    VersionMismatch,
    /// The target network's node table is full.
    #[error("the target network is full")]
    CapacityExceeded,
    /// The target host did not answer at its advertised address.
    #[error("target network not found or unreachable")]
    NotFound,
    /// The scan window or connect handshake deadline expired.
    #[error("operation timed out")]
    Timeout,
    /// The host answered and refused the join.
    #[error("connection refused by the host")]
    ConnectionRefused,
    /// `finalize` ran while this operation was in flight.
    #[error("engine teardown in progress")]
    Cancelled,
    /// Underlying I/O failure not otherwise classified.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] std::io::Error),
}

/// Tuning and addressing knobs for the engine.
///
/// The timing values are deliberate policy constants rather than protocol
/// facts; the defaults below are what a node uses unless its configuration
/// file overrides them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address all sockets bind to.
    pub bind_addr: Ipv4Addr,
    /// UDP port hosts answer discovery probes on. 0 picks an ephemeral port.
    pub discovery_port: u16,
    /// TCP port hosts accept session connections on. 0 picks an ephemeral port.
    pub session_port: u16,
    /// Destination for discovery probes and advertisement broadcasts.
    pub broadcast_addr: Ipv4Addr,
    /// Overrides local IPv4 autodetection when set.
    pub local_ipv4: Option<Ipv4Addr>,
    /// Netmask reported by the address query.
    pub netmask: Ipv4Addr,
    /// Delay between advertisement broadcasts while hosting. Default 500 ms.
    pub advertise_interval: Duration,
    /// How long a scan collects probe responses. Default 1 s.
    pub scan_window: Duration,
    /// Overall deadline for the connect handshake. Default 5 s.
    pub connect_timeout: Duration,
    /// Host-side deadline for a station to send its join request. Default 2 s.
    pub join_timeout: Duration,
    /// Delay between host liveness pings. Default 2 s.
    pub ping_interval: Duration,
    /// Silence after which a member is presumed gone. Default 6 s.
    pub liveness_timeout: Duration,
    /// Consecutive advertisement send failures that force-destroy the
    /// hosted session. Default 8.
    pub advertise_failure_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            discovery_port: 11452,
            session_port: 11453,
            broadcast_addr: Ipv4Addr::BROADCAST,
            local_ipv4: None,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            advertise_interval: Duration::from_millis(500),
            scan_window: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(2),
            ping_interval: Duration::from_secs(2),
            liveness_timeout: Duration::from_secs(6),
            advertise_failure_threshold: 8,
        }
    }
}

/// State shared between the engine facade and its background tasks.
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) inner: Mutex<EngineInner>,
    pub(crate) notifier: EventNotifier,
    pub(crate) teardown: CancelFlag,
    pub(crate) sequence: SequenceCounter,
}

/// Everything behind the serialization point.
#[derive(Default)]
pub(crate) struct EngineInner {
    pub(crate) state: SessionState,
    /// Valid while hosting or joined; zeroed otherwise.
    pub(crate) network: NetworkInfo,
    pub(crate) disconnect_reason: DisconnectReason,
    pub(crate) accept_policy: AcceptPolicy,
    /// Membership change flags accumulated since the last latest-update query.
    pub(crate) node_updates: [NodeLatestUpdate; NODE_TABLE_CAPACITY],
    pub(crate) host: Option<HostRuntime>,
    pub(crate) station: Option<StationRuntime>,
}

/// The discovery and session engine. One per node.
///
/// All methods take `&self`; the engine is internally synchronized and is
/// usually held behind an `Arc`.
pub struct SessionEngine {
    shared: Arc<EngineShared>,
    /// Serializes mutating operations. Deliberately separate from the inner
    /// mutex so queries and background tasks never wait on a slow operation.
    op_lock: Mutex<()>,
}

impl SessionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                config,
                inner: Mutex::new(EngineInner::default()),
                notifier: EventNotifier::new(),
                teardown: CancelFlag::new(),
                sequence: SequenceCounter::new(),
            }),
            op_lock: Mutex::new(()),
        }
    }

    /// The change signal. Callers wait on it, then query and clear it.
    pub fn notifier(&self) -> &EventNotifier {
        &self.shared.notifier
    }

    // ── Role transitions ──────────────────────────────────────────────────────

    /// Enables the access-point role. Valid only when idle.
    pub async fn open_access_point(&self) -> Result<(), EngineError> {
        self.transition(SessionState::Idle, SessionState::AccessPointOpened)
            .await
    }

    /// Disables the access-point role. Valid only when no session is hosted.
    pub async fn close_access_point(&self) -> Result<(), EngineError> {
        self.transition(SessionState::AccessPointOpened, SessionState::Idle)
            .await
    }

    /// Enables the station role. Valid only when idle.
    pub async fn open_station(&self) -> Result<(), EngineError> {
        self.transition(SessionState::Idle, SessionState::StationOpened)
            .await
    }

    /// Disables the station role. Valid only when not joined.
    pub async fn close_station(&self) -> Result<(), EngineError> {
        self.transition(SessionState::StationOpened, SessionState::Idle)
            .await
    }

    async fn transition(
        &self,
        from: SessionState,
        to: SessionState,
    ) -> Result<(), EngineError> {
        let _op = self.op_lock.lock().await;
        if self.shared.teardown.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != from {
                return Err(EngineError::InvalidState(inner.state));
            }
            inner.state = to;
        }
        debug!(?from, ?to, "state transition");
        self.shared.notifier.signal();
        Ok(())
    }

    // ── Hosting ───────────────────────────────────────────────────────────────

    /// Builds the session descriptor, binds the discovery and session
    /// sockets, starts advertising, and begins accepting stations.
    ///
    /// The local node becomes member 0 of the new network.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the access-point role is open without an
    /// active session; `InvalidArgument` for a malformed configuration;
    /// `TransportFailure` when the sockets cannot be bound.
    pub async fn create_network(&self, cfg: CreateNetworkConfig) -> Result<(), EngineError> {
        let _op = self.op_lock.lock().await;
        if self.shared.teardown.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        cfg.validate()?;
        {
            let inner = self.shared.inner.lock().await;
            if inner.state != SessionState::AccessPointOpened {
                return Err(EngineError::InvalidState(inner.state));
            }
        }

        let sockets = host::bind_sockets(&self.shared.config).await?;
        let local_ip = self.local_ipv4();

        let mut network = NetworkInfo {
            local_communication_id: cfg.local_communication_id,
            scene_id: cfg.scene_id,
            session_id: Uuid::new_v4(),
            local_communication_version: cfg.local_communication_version,
            security_mode: cfg.security_mode,
            network_name: cfg.network_name,
            host_port: sockets.session_port,
            security_key: cfg.security_key,
            node_count_max: cfg.node_count_max,
            advertise_data: cfg.advertise_data,
            ..NetworkInfo::default()
        };
        // Infallible: the table is empty and node_count_max was validated.
        let _ = network.add_node(NodeInfo {
            ipv4: local_ip,
            mac: derive_mac(local_ip, sockets.session_port),
            nickname: cfg.host_nickname,
            local_communication_version: cfg.local_communication_version,
            ..NodeInfo::default()
        });

        let session_id = network.session_id;
        let runtime = host::spawn(Arc::clone(&self.shared), sockets);

        {
            let mut inner = self.shared.inner.lock().await;
            if self.shared.teardown.is_cancelled() {
                drop(inner);
                host::teardown(runtime, false, &self.shared.sequence).await;
                return Err(EngineError::Cancelled);
            }
            network.accept_policy = inner.accept_policy;
            inner.network = network;
            inner.node_updates = Default::default();
            inner.node_updates[0].state_change = NodeLatestUpdate::FLAG_JOIN;
            inner.disconnect_reason = DisconnectReason::None;
            inner.host = Some(runtime);
            inner.state = SessionState::AccessPointCreated;
        }
        info!(%session_id, "network created, advertising");
        self.shared.notifier.signal();
        Ok(())
    }

    /// Stops advertising, disconnects every member, and returns to the
    /// opened access-point state.
    pub async fn destroy_network(&self) -> Result<(), EngineError> {
        let _op = self.op_lock.lock().await;
        let runtime = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != SessionState::AccessPointCreated {
                return Err(EngineError::InvalidState(inner.state));
            }
            inner.state = SessionState::AccessPointOpened;
            inner.disconnect_reason = DisconnectReason::DisconnectedByUser;
            inner.network = NetworkInfo::default();
            inner.node_updates = Default::default();
            inner.host.take()
        };
        self.shared.notifier.signal();
        if let Some(runtime) = runtime {
            host::teardown(runtime, true, &self.shared.sequence).await;
        }
        info!("network destroyed");
        Ok(())
    }

    /// Replaces the opaque advertise payload. The next advertisement tick
    /// broadcasts it, and current members receive it as a descriptor update.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless hosting; `InvalidArgument` when `data` exceeds
    /// the payload maximum.
    pub async fn set_advertise_data(&self, data: &[u8]) -> Result<(), EngineError> {
        let _op = self.op_lock.lock().await;
        if self.shared.teardown.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if data.len() > ADVERTISE_DATA_MAX {
            return Err(ValidationError::AdvertiseDataTooLong(data.len()).into());
        }
        let sync = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != SessionState::AccessPointCreated {
                return Err(EngineError::InvalidState(inner.state));
            }
            inner.network.advertise_data = data.to_vec();
            host::collect_sync_targets(&inner)
        };
        host::push_sync(&self.shared, sync).await;
        Ok(())
    }

    /// Sets whether new stations are admitted. Takes effect immediately for
    /// an active session and is remembered for later ones.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the access-point role is open or hosting.
    pub async fn set_station_accept_policy(
        &self,
        policy: AcceptPolicy,
    ) -> Result<(), EngineError> {
        let _op = self.op_lock.lock().await;
        let mut inner = self.shared.inner.lock().await;
        match inner.state {
            SessionState::AccessPointOpened | SessionState::AccessPointCreated => {
                inner.accept_policy = policy;
                inner.network.accept_policy = policy;
                Ok(())
            }
            state => Err(EngineError::InvalidState(state)),
        }
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Broadcasts a discovery probe and collects answers for the configured
    /// scan window. Results are deduplicated by session identifier (the
    /// most recent answer wins), filtered, and truncated to `capacity`.
    ///
    /// Never changes engine state and may be repeated freely.
    ///
    /// # Errors
    ///
    /// `InvalidState` while hosting or joined; `TransportFailure` when the
    /// probe socket fails; `Cancelled` when teardown interrupts the window.
    pub async fn scan(
        &self,
        filter: &ScanFilter,
        capacity: usize,
    ) -> Result<Vec<NetworkInfo>, EngineError> {
        // Scanning mutates nothing, but it still queues behind mutating
        // operations so a concurrent finalize reliably cancels it before
        // re-arming the engine.
        let _op = self.op_lock.lock().await;
        if self.shared.teardown.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        {
            let inner = self.shared.inner.lock().await;
            match inner.state {
                SessionState::Idle
                | SessionState::AccessPointOpened
                | SessionState::StationOpened => {}
                state => return Err(EngineError::InvalidState(state)),
            }
        }
        scanner::scan(&self.shared, filter, capacity).await
    }

    // ── Joining ───────────────────────────────────────────────────────────────

    /// Joins the session described by `target`.
    ///
    /// Validates the requested application protocol version against the
    /// target's recorded version (exact match), performs the join
    /// handshake, and on acceptance installs the host's authoritative
    /// descriptor and begins receiving membership updates.
    ///
    /// On any failure the engine remains in the station-opened state.
    ///
    /// # Errors
    ///
    /// `VersionMismatch`, `CapacityExceeded`, `ConnectionRefused`,
    /// `NotFound`, `Timeout`, `Cancelled`, or `InvalidState` as described
    /// above.
    pub async fn connect(
        &self,
        target: &NetworkInfo,
        request: &ConnectRequest,
    ) -> Result<(), EngineError> {
        let _op = self.op_lock.lock().await;
        if self.shared.teardown.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        request.validate()?;
        {
            let inner = self.shared.inner.lock().await;
            if inner.state != SessionState::StationOpened {
                return Err(EngineError::InvalidState(inner.state));
            }
        }
        if request.local_communication_version != target.local_communication_version {
            return Err(EngineError::VersionMismatch);
        }
        let host_node = target
            .active_nodes()
            .first()
            .filter(|n| n.is_connected && target.host_port != 0)
            .ok_or(EngineError::NotFound)?;
        let addr = SocketAddr::from((host_node.ipv4, target.host_port));

        let handshake = station::connect_handshake(&self.shared, addr, request);
        let (accepted, writer, read_half) = tokio::select! {
            _ = self.shared.teardown.cancelled() => return Err(EngineError::Cancelled),
            outcome = handshake => outcome?,
        };

        {
            let mut inner = self.shared.inner.lock().await;
            if self.shared.teardown.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if inner.state != SessionState::StationOpened {
                return Err(EngineError::InvalidState(inner.state));
            }
            let reader =
                station::spawn_reader(Arc::clone(&self.shared), read_half, Arc::clone(&writer));
            inner.network = accepted;
            inner.node_updates = Default::default();
            inner.disconnect_reason = DisconnectReason::None;
            inner.station = Some(StationRuntime { writer, reader });
            inner.state = SessionState::StationConnected;
        }
        info!(host = %addr, "joined network");
        self.shared.notifier.signal();
        Ok(())
    }

    /// Leaves the joined session and returns to the station-opened state.
    ///
    /// Idempotent: a second call while already in the station-opened state
    /// is a successful no-op, so callers racing a connection loss never see
    /// a spurious error. The departure notice to the host is best effort;
    /// the local transition happens even when the transport is already gone.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        let _op = self.op_lock.lock().await;
        let runtime = {
            let mut inner = self.shared.inner.lock().await;
            match inner.state {
                SessionState::StationConnected => {
                    inner.state = SessionState::StationOpened;
                    inner.disconnect_reason = DisconnectReason::DisconnectedByUser;
                    inner.network = NetworkInfo::default();
                    inner.node_updates = Default::default();
                    inner.station.take()
                }
                SessionState::StationOpened => return Ok(()),
                state => return Err(EngineError::InvalidState(state)),
            }
        };
        self.shared.notifier.signal();
        if let Some(runtime) = runtime {
            station::teardown(runtime, true, &self.shared.sequence).await;
        }
        Ok(())
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Forcibly stops all activity and returns the engine to a state
    /// equivalent to freshly constructed. Safe to call from any state; any
    /// in-flight operation fails with `Cancelled` rather than completing.
    pub async fn finalize(&self) {
        self.shared.teardown.cancel();
        // Waits for an in-flight mutating operation to observe the flag
        // and bail out, so the reset below cannot race a commit.
        let _op = self.op_lock.lock().await;
        let (host_runtime, station_runtime, changed) = {
            let mut inner = self.shared.inner.lock().await;
            let changed = inner.state != SessionState::Idle;
            let host_runtime = inner.host.take();
            let station_runtime = inner.station.take();
            *inner = EngineInner::default();
            (host_runtime, station_runtime, changed)
        };
        if let Some(runtime) = host_runtime {
            host::teardown(runtime, false, &self.shared.sequence).await;
        }
        if let Some(runtime) = station_runtime {
            station::teardown(runtime, false, &self.shared.sequence).await;
        }
        self.shared.teardown.reset();
        if changed {
            self.shared.notifier.signal();
        }
        info!("engine finalized");
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Current role state. Valid in any state.
    pub async fn get_state(&self) -> SessionState {
        self.shared.inner.lock().await.state
    }

    /// Snapshot of the current session descriptor, or a zeroed descriptor
    /// when not hosting or joined.
    pub async fn get_network_info(&self) -> NetworkInfo {
        let inner = self.shared.inner.lock().await;
        match inner.state {
            SessionState::AccessPointCreated | SessionState::StationConnected => {
                inner.network.clone()
            }
            _ => NetworkInfo::default(),
        }
    }

    /// Like [`get_network_info`](Self::get_network_info), but also returns
    /// the per-slot membership change flags accumulated since the previous
    /// call, clearing them.
    pub async fn get_network_info_latest_update(
        &self,
    ) -> (NetworkInfo, [NodeLatestUpdate; NODE_TABLE_CAPACITY]) {
        let mut inner = self.shared.inner.lock().await;
        let updates = std::mem::take(&mut inner.node_updates);
        let info = match inner.state {
            SessionState::AccessPointCreated | SessionState::StationConnected => {
                inner.network.clone()
            }
            _ => NetworkInfo::default(),
        };
        (info, updates)
    }

    /// Security snapshot of the current session; zeroed when idle.
    pub async fn get_security_parameter(&self) -> SecurityParameter {
        self.get_network_info().await.security_parameter()
    }

    /// Configuration snapshot of the current session; zeroed when idle.
    pub async fn get_network_config(&self) -> NetworkConfigSnapshot {
        self.get_network_info().await.network_config()
    }

    /// Why the previous session ended. Reset when a new one starts.
    pub async fn get_disconnect_reason(&self) -> DisconnectReason {
        self.shared.inner.lock().await.disconnect_reason
    }

    /// Local IPv4 address and netmask. Valid in any state.
    ///
    /// # Errors
    ///
    /// `TransportFailure` when no configured override exists and
    /// autodetection fails.
    pub fn get_ipv4_address(&self) -> Result<(Ipv4Addr, Ipv4Addr), EngineError> {
        let addr = match self.shared.config.local_ipv4 {
            Some(addr) => addr,
            None => detect_local_ipv4()?,
        };
        Ok((addr, self.shared.config.netmask))
    }

    /// Actual UDP discovery port while hosting (useful with an ephemeral
    /// port configuration).
    pub async fn discovery_port(&self) -> Option<u16> {
        let inner = self.shared.inner.lock().await;
        inner.host.as_ref().map(|h| h.discovery_port)
    }

    /// Actual TCP session port while hosting.
    pub async fn session_port(&self) -> Option<u16> {
        let inner = self.shared.inner.lock().await;
        inner.host.as_ref().map(|h| h.session_port)
    }

    fn local_ipv4(&self) -> Ipv4Addr {
        if let Some(addr) = self.shared.config.local_ipv4 {
            return addr;
        }
        detect_local_ipv4().unwrap_or_else(|e| {
            tracing::warn!("local IPv4 autodetection failed, using loopback: {e}");
            Ipv4Addr::LOCALHOST
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
