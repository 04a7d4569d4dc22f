//! Station-role networking: the join handshake and the connected-session
//! reader.
//!
//! A station opens one TCP connection to the host for the lifetime of its
//! membership. The handshake is a single Join/JoinAccept exchange; after
//! it, the reader task passively applies descriptor updates the host
//! pushes, answers liveness pings, and turns a dead stream into a local
//! state transition the caller observes through the event signal.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lanlink_core::domain::descriptor::{
    DisconnectReason, NetworkInfo, NodeLatestUpdate, NODE_TABLE_CAPACITY,
};
use lanlink_core::domain::session::ConnectRequest;
use lanlink_core::protocol::messages::{JoinRejectReason, LanMessage, LeaveReason};
use lanlink_core::protocol::SequenceCounter;

use crate::application::engine::{EngineError, EngineShared, SessionState};
use crate::infrastructure::network::{read_frame, write_frame};

/// Live state of one joined session; owned by the engine inner state.
pub(crate) struct StationRuntime {
    pub(crate) writer: Arc<Mutex<OwnedWriteHalf>>,
    pub(crate) reader: JoinHandle<()>,
}

/// Performs the join handshake against the host at `addr`.
///
/// On acceptance, returns the authoritative descriptor (which already
/// includes the local node) together with the connection halves; the caller
/// commits them into engine state.
///
/// # Errors
///
/// `NotFound` when the host does not answer at all, `Timeout` when the
/// overall connect deadline expires, the mapped rejection error when the
/// host refuses, and `TransportFailure` for anything else.
pub(crate) async fn connect_handshake(
    shared: &Arc<EngineShared>,
    addr: SocketAddr,
    request: &ConnectRequest,
) -> Result<(NetworkInfo, Arc<Mutex<OwnedWriteHalf>>, OwnedReadHalf), EngineError> {
    let attempt = async {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            if matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::AddrNotAvailable
                    | io::ErrorKind::TimedOut
            ) {
                EngineError::NotFound
            } else {
                EngineError::TransportFailure(e)
            }
        })?;
        let _ = stream.set_nodelay(true);
        let (mut read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));

        write_frame(
            &writer,
            &LanMessage::Join(request.clone()),
            shared.sequence.next(),
        )
        .await
        .map_err(EngineError::TransportFailure)?;

        let reply = read_frame(&mut read_half).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                // The host dropped us without an answer.
                EngineError::ConnectionRefused
            } else {
                EngineError::TransportFailure(e)
            }
        })?;

        match reply {
            LanMessage::JoinAccept(info) => {
                info!(host = %addr, "join accepted");
                Ok((info, writer, read_half))
            }
            LanMessage::JoinReject(reason) => {
                info!(host = %addr, ?reason, "join rejected");
                Err(match reason {
                    JoinRejectReason::VersionMismatch => EngineError::VersionMismatch,
                    JoinRejectReason::TableFull => EngineError::CapacityExceeded,
                    JoinRejectReason::SecurityMismatch | JoinRejectReason::NotAccepting => {
                        EngineError::ConnectionRefused
                    }
                })
            }
            other => Err(EngineError::TransportFailure(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected handshake reply: {:?}", other.message_type()),
            ))),
        }
    };

    match tokio::time::timeout(shared.config.connect_timeout, attempt).await {
        Ok(outcome) => outcome,
        Err(_) => Err(EngineError::Timeout),
    }
}

/// Starts the connected-session reader.
pub(crate) fn spawn_reader(
    shared: Arc<EngineShared>,
    mut read_half: OwnedReadHalf,
    writer: Arc<Mutex<OwnedWriteHalf>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            // The host pings well inside the liveness window; a silent
            // stream past it means the host is gone.
            let frame =
                tokio::time::timeout(shared.config.liveness_timeout, read_frame(&mut read_half));
            let msg = match frame.await {
                Ok(Ok(msg)) => msg,
                Ok(Err(e)) => {
                    debug!("session stream ended: {e}");
                    passive_close(&shared, DisconnectReason::ConnectionLost).await;
                    return;
                }
                Err(_) => {
                    warn!("no traffic from host inside the liveness window");
                    passive_close(&shared, DisconnectReason::ConnectionLost).await;
                    return;
                }
            };
            match msg {
                LanMessage::SyncNetwork(info) => apply_sync(&shared, info).await,
                LanMessage::Ping(token) => {
                    let msg = LanMessage::Pong(token);
                    let pong = write_frame(&writer, &msg, shared.sequence.next());
                    if let Err(e) = pong.await {
                        debug!("pong failed: {e}");
                    }
                }
                LanMessage::Leave(LeaveReason::NetworkDestroyed) => {
                    info!("host destroyed the network");
                    passive_close(&shared, DisconnectReason::DestroyedByHost).await;
                    return;
                }
                LanMessage::Leave(_) => {}
                other => debug!("unexpected {:?} from host", other.message_type()),
            }
        }
    })
}

/// Leaves the session from the station side. The departure notice is best
/// effort; the caller has already committed the local state change.
pub(crate) async fn teardown(runtime: StationRuntime, notify: bool, sequence: &SequenceCounter) {
    if notify {
        let goodbye = LanMessage::Leave(LeaveReason::StationDeparting);
        let send = write_frame(&runtime.writer, &goodbye, sequence.next());
        let _ = tokio::time::timeout(std::time::Duration::from_millis(250), send).await;
    }
    runtime.reader.abort();
}

/// Installs a pushed descriptor, accumulating per-slot membership change
/// flags for the latest-update query.
async fn apply_sync(shared: &Arc<EngineShared>, info: NetworkInfo) {
    {
        let mut inner = shared.inner.lock().await;
        if inner.state != SessionState::StationConnected {
            return;
        }
        for slot in 0..NODE_TABLE_CAPACITY {
            let was = inner.network.nodes[slot].is_connected;
            let now = info.nodes[slot].is_connected;
            if !was && now {
                inner.node_updates[slot].state_change |= NodeLatestUpdate::FLAG_JOIN;
            }
            if was && !now {
                inner.node_updates[slot].state_change |= NodeLatestUpdate::FLAG_LEAVE;
            }
        }
        inner.network = info;
    }
    debug!("descriptor update applied");
    shared.notifier.signal();
}

/// Transitions out of the connected state when the session ends without a
/// local `disconnect` call. Surfaces only through the event signal and
/// subsequent queries, never as a call error.
async fn passive_close(shared: &Arc<EngineShared>, reason: DisconnectReason) {
    let runtime = {
        let mut inner = shared.inner.lock().await;
        if inner.state != SessionState::StationConnected {
            return;
        }
        inner.state = SessionState::StationOpened;
        inner.disconnect_reason = reason;
        inner.network = NetworkInfo::default();
        inner.node_updates = Default::default();
        inner.station.take()
    };
    shared.notifier.signal();
    if let Some(runtime) = runtime {
        // Usually our own task; abort is a no-op once we return.
        runtime.reader.abort();
    }
}
