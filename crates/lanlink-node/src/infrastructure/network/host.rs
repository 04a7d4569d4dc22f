//! Host-role networking: advertisement, discovery answers, join handling,
//! and member liveness.
//!
//! While a session is hosted, four background tasks run against the shared
//! engine state:
//!
//! 1. The advertise tick broadcasts the current descriptor on the discovery
//!    channel at a fixed interval.
//! 2. The probe responder answers scanner probes with a unicast copy of the
//!    descriptor.
//! 3. The join listener accepts TCP session connections and runs the join
//!    handshake.
//! 4. The liveness sweep pings members and evicts ones that have gone
//!    silent.
//!
//! Every mutation of the descriptor happens under the engine's inner mutex;
//! descriptor pushes to members are collected under the lock and sent after
//! it is released.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use lanlink_core::domain::descriptor::{
    AcceptPolicy, DisconnectReason, NetworkInfo, NodeInfo, NodeLatestUpdate, SecurityMode,
};
use lanlink_core::protocol::codec::encode_message_now;
use lanlink_core::protocol::messages::{JoinRejectReason, LanMessage, LeaveReason};
use lanlink_core::protocol::SequenceCounter;

use crate::application::engine::{EngineConfig, EngineInner, EngineShared, SessionState};
use crate::application::notifier::CancelFlag;
use crate::infrastructure::network::{derive_mac, now_millis, read_frame, write_frame};

/// Deadline for any single best-effort frame push to a member.
const PUSH_TIMEOUT: Duration = Duration::from_millis(250);

/// Sockets bound for one hosting session.
pub(crate) struct BoundSockets {
    pub(crate) udp: Arc<UdpSocket>,
    pub(crate) listener: TcpListener,
    pub(crate) discovery_port: u16,
    pub(crate) session_port: u16,
}

/// One connected member, tracked alongside its node-table entry. The
/// synthetic MAC is the join key: node-table slots move on compaction, MACs
/// do not.
pub(crate) struct StationLink {
    pub(crate) mac: [u8; 6],
    pub(crate) addr: SocketAddr,
    pub(crate) writer: Arc<Mutex<OwnedWriteHalf>>,
    /// Wall-clock millis of the member's last inbound frame.
    pub(crate) last_seen: Arc<AtomicU64>,
    pub(crate) reader: JoinHandle<()>,
}

/// Live state of one hosting session; owned by the engine inner state.
pub(crate) struct HostRuntime {
    pub(crate) stop: Arc<CancelFlag>,
    pub(crate) tasks: Vec<JoinHandle<()>>,
    pub(crate) stations: Vec<StationLink>,
    pub(crate) discovery_port: u16,
    pub(crate) session_port: u16,
}

/// A descriptor push assembled under the inner lock and sent after it is
/// released.
pub(crate) struct SyncPush {
    writers: Vec<Arc<Mutex<OwnedWriteHalf>>>,
    info: NetworkInfo,
}

/// Binds the discovery and session sockets for a new hosting session.
///
/// # Errors
///
/// Propagates socket bind failures.
pub(crate) async fn bind_sockets(config: &EngineConfig) -> std::io::Result<BoundSockets> {
    let udp = UdpSocket::bind((config.bind_addr, config.discovery_port)).await?;
    udp.set_broadcast(true)?;
    let listener = TcpListener::bind((config.bind_addr, config.session_port)).await?;
    let discovery_port = udp.local_addr()?.port();
    let session_port = listener.local_addr()?.port();
    Ok(BoundSockets {
        udp: Arc::new(udp),
        listener,
        discovery_port,
        session_port,
    })
}

/// Starts the four host background tasks.
pub(crate) fn spawn(shared: Arc<EngineShared>, sockets: BoundSockets) -> HostRuntime {
    let stop = Arc::new(CancelFlag::new());
    let tasks = vec![
        tokio::spawn(advertise_task(
            Arc::clone(&shared),
            Arc::clone(&stop),
            Arc::clone(&sockets.udp),
        )),
        tokio::spawn(probe_responder_task(
            Arc::clone(&shared),
            Arc::clone(&stop),
            Arc::clone(&sockets.udp),
        )),
        tokio::spawn(join_listener_task(
            Arc::clone(&shared),
            Arc::clone(&stop),
            sockets.listener,
        )),
        tokio::spawn(liveness_task(Arc::clone(&shared), Arc::clone(&stop))),
    ];
    HostRuntime {
        stop,
        tasks,
        stations: Vec::new(),
        discovery_port: sockets.discovery_port,
        session_port: sockets.session_port,
    }
}

/// Stops a hosting session: optionally notifies members the network is
/// gone, then aborts every task and member reader.
pub(crate) async fn teardown(runtime: HostRuntime, notify: bool, sequence: &SequenceCounter) {
    runtime.stop.cancel();
    if notify {
        let goodbye = LanMessage::Leave(LeaveReason::NetworkDestroyed);
        for link in &runtime.stations {
            let push = write_frame(&link.writer, &goodbye, sequence.next());
            let _ = tokio::time::timeout(PUSH_TIMEOUT, push).await;
        }
    }
    for link in runtime.stations {
        link.reader.abort();
    }
    for task in runtime.tasks {
        task.abort();
    }
}

/// Collects the writers for a descriptor push to every member.
pub(crate) fn collect_sync_targets(inner: &EngineInner) -> SyncPush {
    collect_sync_targets_except(inner, None)
}

fn collect_sync_targets_except(inner: &EngineInner, skip_mac: Option<[u8; 6]>) -> SyncPush {
    let writers = inner
        .host
        .as_ref()
        .map(|host| {
            host.stations
                .iter()
                .filter(|link| Some(link.mac) != skip_mac)
                .map(|link| Arc::clone(&link.writer))
                .collect()
        })
        .unwrap_or_default();
    SyncPush {
        writers,
        info: inner.network.clone(),
    }
}

/// Sends a previously collected descriptor push. Failures are logged and
/// left to the liveness sweep; a member with a broken stream will be
/// evicted shortly anyway.
pub(crate) async fn push_sync(shared: &Arc<EngineShared>, push: SyncPush) {
    if push.writers.is_empty() {
        return;
    }
    let msg = LanMessage::SyncNetwork(push.info);
    for writer in push.writers {
        let send = write_frame(&writer, &msg, shared.sequence.next());
        match tokio::time::timeout(PUSH_TIMEOUT, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("descriptor push failed: {e}"),
            Err(_) => debug!("descriptor push timed out"),
        }
    }
}

/// Tears the session down from a background task after repeated transport
/// failures. Mirrors `destroy_network` but records a system-initiated
/// disconnect reason.
async fn force_destroy(shared: &Arc<EngineShared>) {
    let runtime = {
        let mut inner = shared.inner.lock().await;
        if inner.state != SessionState::AccessPointCreated {
            return;
        }
        inner.state = SessionState::AccessPointOpened;
        inner.disconnect_reason = DisconnectReason::DisconnectedBySystem;
        inner.network = NetworkInfo::default();
        inner.node_updates = Default::default();
        inner.host.take()
    };
    shared.notifier.signal();
    if let Some(runtime) = runtime {
        teardown(runtime, true, &shared.sequence).await;
    }
}

// ── Advertisement ─────────────────────────────────────────────────────────────

async fn advertise_task(shared: Arc<EngineShared>, stop: Arc<CancelFlag>, udp: Arc<UdpSocket>) {
    let dest = SocketAddr::from((
        shared.config.broadcast_addr,
        shared.config.discovery_port,
    ));
    let mut failures = 0u32;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(shared.config.advertise_interval) => {}
        }
        let frame = {
            let inner = shared.inner.lock().await;
            if inner.state != SessionState::AccessPointCreated {
                continue;
            }
            encode_message_now(
                &LanMessage::Advertise(inner.network.clone()),
                shared.sequence.next(),
            )
            .ok()
        };
        let Some(frame) = frame else { continue };
        if dest.port() == 0 {
            // Ephemeral discovery port: no well-known broadcast target.
            // Scanners still reach us through directed probes.
            continue;
        }
        match udp.send_to(&frame, dest).await {
            Ok(_) => failures = 0,
            Err(e) => {
                failures += 1;
                warn!("advertisement broadcast failed ({failures}): {e}");
                if failures >= shared.config.advertise_failure_threshold {
                    error!("advertisement failing persistently, destroying session");
                    force_destroy(&shared).await;
                    break;
                }
            }
        }
    }
}

// ── Discovery answers ─────────────────────────────────────────────────────────

async fn probe_responder_task(
    shared: Arc<EngineShared>,
    stop: Arc<CancelFlag>,
    udp: Arc<UdpSocket>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let (len, src) = tokio::select! {
            _ = stop.cancelled() => break,
            res = udp.recv_from(&mut buf) => match res {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("discovery socket recv error: {e}");
                    continue;
                }
            }
        };
        match lanlink_core::protocol::codec::decode_message(&buf[..len]) {
            Ok((LanMessage::Probe, _)) => {
                let frame = {
                    let inner = shared.inner.lock().await;
                    if inner.state != SessionState::AccessPointCreated {
                        continue;
                    }
                    encode_message_now(
                        &LanMessage::ProbeResponse(inner.network.clone()),
                        shared.sequence.next(),
                    )
                    .ok()
                };
                if let Some(frame) = frame {
                    if let Err(e) = udp.send_to(&frame, src).await {
                        warn!("probe response to {src} failed: {e}");
                    } else {
                        debug!("answered probe from {src}");
                    }
                }
            }
            // Another host's periodic broadcast arriving on the shared
            // discovery port; not addressed to us.
            Ok((LanMessage::Advertise(_), _)) => {}
            Ok((other, _)) => debug!(
                "unexpected {:?} on discovery socket from {src}",
                other.message_type()
            ),
            Err(e) => debug!("undecodable discovery datagram from {src}: {e}"),
        }
    }
}

// ── Join handling ─────────────────────────────────────────────────────────────

async fn join_listener_task(
    shared: Arc<EngineShared>,
    stop: Arc<CancelFlag>,
    listener: TcpListener,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = stop.cancelled() => break,
            res = listener.accept() => match res {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("session listener accept error: {e}");
                    continue;
                }
            }
        };
        debug!("inbound session connection from {peer}");
        let shared = Arc::clone(&shared);
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = handle_join(shared, stream, peer) => {}
            }
        });
    }
}

async fn handle_join(shared: Arc<EngineShared>, stream: TcpStream, peer: SocketAddr) {
    let IpAddr::V4(peer_ip) = peer.ip() else {
        debug!("rejecting non-IPv4 session peer {peer}");
        return;
    };
    let _ = stream.set_nodelay(true);
    let (mut read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));

    let join = tokio::time::timeout(shared.config.join_timeout, read_frame(&mut read_half));
    let request = match join.await {
        Ok(Ok(LanMessage::Join(request))) => request,
        Ok(Ok(other)) => {
            debug!(
                "expected a join request from {peer}, got {:?}",
                other.message_type()
            );
            return;
        }
        Ok(Err(e)) => {
            debug!("join read from {peer} failed: {e}");
            return;
        }
        Err(_) => {
            debug!("join handshake with {peer} timed out");
            return;
        }
    };

    let mac = derive_mac(peer_ip, peer.port());
    let mut inner = shared.inner.lock().await;

    let reject = if inner.state != SessionState::AccessPointCreated {
        Some(JoinRejectReason::NotAccepting)
    } else if inner.network.accept_policy == AcceptPolicy::RejectAll {
        Some(JoinRejectReason::NotAccepting)
    } else if request.local_communication_version != inner.network.local_communication_version {
        Some(JoinRejectReason::VersionMismatch)
    } else if request.security_mode != inner.network.security_mode
        || (inner.network.security_mode == SecurityMode::SharedKey
            && request.key != inner.network.security_key)
    {
        Some(JoinRejectReason::SecurityMismatch)
    } else if inner.network.is_full() {
        Some(JoinRejectReason::TableFull)
    } else {
        None
    };

    if let Some(reason) = reject {
        drop(inner);
        info!("rejecting join from {peer}: {reason:?}");
        let msg = LanMessage::JoinReject(reason);
        let answer = write_frame(&writer, &msg, shared.sequence.next());
        let _ = tokio::time::timeout(PUSH_TIMEOUT, answer).await;
        return;
    }

    // Admission: record the member, start its reader, then answer with the
    // descriptor that already includes it.
    let node = NodeInfo {
        ipv4: peer_ip,
        mac,
        nickname: request.nickname.clone(),
        local_communication_version: request.local_communication_version,
        ..NodeInfo::default()
    };
    let slot = match inner.network.add_node(node) {
        Ok(slot) => slot,
        Err(_) => {
            drop(inner);
            let answer = write_frame(
                &writer,
                &LanMessage::JoinReject(JoinRejectReason::TableFull),
                shared.sequence.next(),
            );
            let _ = tokio::time::timeout(PUSH_TIMEOUT, answer).await;
            return;
        }
    };
    inner.node_updates[slot as usize].state_change |= NodeLatestUpdate::FLAG_JOIN;

    let last_seen = Arc::new(AtomicU64::new(now_millis()));
    let reader = tokio::spawn(member_reader(
        Arc::clone(&shared),
        read_half,
        mac,
        Arc::clone(&last_seen),
    ));
    let accepted = inner.network.clone();
    if let Some(host) = inner.host.as_mut() {
        host.stations.push(StationLink {
            mac,
            addr: peer,
            writer: Arc::clone(&writer),
            last_seen,
            reader,
        });
    }
    let sync = collect_sync_targets_except(&inner, Some(mac));
    drop(inner);

    info!(
        nickname = %request.nickname,
        %peer,
        slot,
        "station joined"
    );
    shared.notifier.signal();

    let msg = LanMessage::JoinAccept(accepted);
    let answer = write_frame(&writer, &msg, shared.sequence.next());
    match tokio::time::timeout(PUSH_TIMEOUT, answer).await {
        Ok(Ok(())) => {}
        _ => {
            // The acceptance never reached the station; undo the admission.
            warn!("join acceptance to {peer} failed, evicting");
            remove_member(&shared, mac, false).await;
            return;
        }
    }
    push_sync(&shared, sync).await;
}

/// Reads frames from one member until the stream ends, keeping its
/// liveness stamp fresh.
async fn member_reader(
    shared: Arc<EngineShared>,
    mut read_half: OwnedReadHalf,
    mac: [u8; 6],
    last_seen: Arc<AtomicU64>,
) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(msg) => {
                last_seen.store(now_millis(), Ordering::Relaxed);
                match msg {
                    LanMessage::Pong(_) => {}
                    LanMessage::Leave(_) => {
                        debug!("member announced departure");
                        remove_member(&shared, mac, true).await;
                        return;
                    }
                    other => debug!(
                        "unexpected {:?} from session member",
                        other.message_type()
                    ),
                }
            }
            Err(e) => {
                debug!("member stream ended: {e}");
                remove_member(&shared, mac, true).await;
                return;
            }
        }
    }
}

/// Removes one member: compacts the node table, flags the change, pushes
/// the new descriptor to survivors, and drops the member's link.
///
/// Quiet when the member is already gone, so the departure, stream-end, and
/// liveness paths can race freely.
pub(crate) async fn remove_member(shared: &Arc<EngineShared>, mac: [u8; 6], push: bool) {
    let (link, sync) = {
        let mut inner = shared.inner.lock().await;
        if inner.state != SessionState::AccessPointCreated {
            return;
        }
        let Some(slot) = inner
            .network
            .active_nodes()
            .iter()
            .position(|n| n.mac == mac)
        else {
            return;
        };
        if slot == 0 {
            // Slot 0 is the host itself; a member can never shadow it.
            return;
        }
        let _ = inner.network.remove_node(slot as u8);
        inner.node_updates[slot].state_change |= NodeLatestUpdate::FLAG_LEAVE;
        let link = inner.host.as_mut().and_then(|host| {
            host.stations
                .iter()
                .position(|l| l.mac == mac)
                .map(|i| host.stations.swap_remove(i))
        });
        (link, collect_sync_targets(&inner))
    };
    info!("member removed from node table");
    shared.notifier.signal();
    if push {
        push_sync(shared, sync).await;
    }
    if let Some(link) = link {
        link.reader.abort();
    }
}

// ── Liveness ──────────────────────────────────────────────────────────────────

async fn liveness_task(shared: Arc<EngineShared>, stop: Arc<CancelFlag>) {
    let timeout_ms = shared.config.liveness_timeout.as_millis() as u64;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(shared.config.ping_interval) => {}
        }
        let (stale, writers) = {
            let inner = shared.inner.lock().await;
            if inner.state != SessionState::AccessPointCreated {
                continue;
            }
            let Some(host) = inner.host.as_ref() else {
                continue;
            };
            let now = now_millis();
            let mut stale = Vec::new();
            let mut writers = Vec::new();
            for link in &host.stations {
                let age = now.saturating_sub(link.last_seen.load(Ordering::Relaxed));
                if age > timeout_ms {
                    stale.push((link.mac, link.addr));
                } else {
                    writers.push(Arc::clone(&link.writer));
                }
            }
            (stale, writers)
        };
        for (mac, addr) in stale {
            warn!("member {addr} silent past the liveness deadline, evicting");
            remove_member(&shared, mac, true).await;
        }
        for writer in writers {
            let ping = LanMessage::Ping(shared.sequence.next());
            let send = write_frame(&writer, &ping, shared.sequence.next());
            if let Ok(Err(e)) = tokio::time::timeout(PUSH_TIMEOUT, send).await {
                debug!("liveness ping failed: {e}");
            }
        }
    }
}
