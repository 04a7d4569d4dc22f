//! Discovery scanning: probe, collect, deduplicate, filter.
//!
//! A scan is one UDP exchange: broadcast a probe on the discovery channel,
//! then collect unicast probe responses (and any periodic advertisements
//! that happen by) until the scan window closes. The window closing is the
//! normal end of a scan; an empty result set is a valid outcome.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use lanlink_core::domain::descriptor::NetworkInfo;
use lanlink_core::domain::session::ScanFilter;
use lanlink_core::protocol::codec::{decode_message, encode_message_now};
use lanlink_core::protocol::messages::LanMessage;

use crate::application::engine::{EngineError, EngineShared};

/// Runs one scan pass.
///
/// Candidates are deduplicated by session identifier with the most recent
/// answer winning, checked against `filter`, and truncated to `capacity`.
///
/// # Errors
///
/// `TransportFailure` when the probe socket cannot be used and `Cancelled`
/// when engine teardown interrupts the window.
pub(crate) async fn scan(
    shared: &Arc<EngineShared>,
    filter: &ScanFilter,
    capacity: usize,
) -> Result<Vec<NetworkInfo>, EngineError> {
    if capacity == 0 {
        return Ok(Vec::new());
    }

    let socket = UdpSocket::bind((shared.config.bind_addr, 0)).await?;
    socket.set_broadcast(true)?;
    let dest = SocketAddr::from((
        shared.config.broadcast_addr,
        shared.config.discovery_port,
    ));
    let probe = encode_message_now(&LanMessage::Probe, shared.sequence.next())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    socket.send_to(&probe, dest).await?;
    debug!("probe sent to {dest}");

    let deadline = Instant::now() + shared.config.scan_window;
    let mut results: Vec<NetworkInfo> = Vec::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let recv = tokio::time::timeout(remaining, socket.recv_from(&mut buf));
        let outcome = tokio::select! {
            _ = shared.teardown.cancelled() => return Err(EngineError::Cancelled),
            outcome = recv => outcome,
        };
        let (len, src) = match outcome {
            // Window elapsed; the scan is complete.
            Err(_) => break,
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!("scan recv error: {e}");
                continue;
            }
        };
        match decode_message(&buf[..len]) {
            Ok((LanMessage::ProbeResponse(info), _)) | Ok((LanMessage::Advertise(info), _)) => {
                if !filter.matches(&info) {
                    debug!("scan candidate from {src} filtered out");
                    continue;
                }
                match results
                    .iter_mut()
                    .find(|r| r.session_id == info.session_id)
                {
                    // Most recent answer for a session wins.
                    Some(existing) => *existing = info,
                    None => results.push(info),
                }
            }
            Ok((LanMessage::Probe, _)) => {} // our own or a peer's probe
            Ok((other, _)) => debug!(
                "unexpected {:?} during scan from {src}",
                other.message_type()
            ),
            Err(e) => debug!("undecodable scan answer from {src}: {e}"),
        }
    }

    results.truncate(capacity);
    Ok(results)
}
