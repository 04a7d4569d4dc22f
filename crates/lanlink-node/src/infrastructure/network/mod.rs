//! Socket-level plumbing shared by the host, scanner, and station paths.
//!
//! The session channel is framed TCP: each frame is the fixed 24-byte
//! protocol header followed by the payload length the header declares.
//! [`read_frame`] fetches exactly one frame; [`write_frame`] serializes one
//! behind the connection's write-half mutex so concurrent pushes never
//! interleave.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use lanlink_core::protocol::codec::{
    decode_message, encode_message_now, payload_length, NETWORK_INFO_SIZE,
};
use lanlink_core::protocol::messages::{LanMessage, HEADER_SIZE};

pub mod host;
pub mod scanner;
pub mod station;

/// Upper bound on a frame payload. The largest legal payload is a full
/// descriptor; anything bigger is a corrupt or hostile frame.
const FRAME_MAX_PAYLOAD: usize = NETWORK_INFO_SIZE + 64;

/// Reads one complete frame from the stream.
pub(crate) async fn read_frame(reader: &mut OwnedReadHalf) -> io::Result<LanMessage> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let payload_len = payload_length(&header).map_err(to_invalid_data)?;
    if payload_len > FRAME_MAX_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload of {payload_len} bytes exceeds the protocol maximum"),
        ));
    }
    let mut frame = vec![0u8; HEADER_SIZE + payload_len];
    frame[..HEADER_SIZE].copy_from_slice(&header);
    if payload_len > 0 {
        reader.read_exact(&mut frame[HEADER_SIZE..]).await?;
    }
    let (msg, _) = decode_message(&frame).map_err(to_invalid_data)?;
    Ok(msg)
}

/// Encodes and writes one frame, holding the write half only for the write.
pub(crate) async fn write_frame(
    writer: &Mutex<OwnedWriteHalf>,
    msg: &LanMessage,
    sequence_number: u64,
) -> io::Result<()> {
    let bytes = encode_message_now(msg, sequence_number).map_err(to_invalid_data)?;
    let mut guard = writer.lock().await;
    guard.write_all(&bytes).await?;
    guard.flush().await
}

fn to_invalid_data<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

/// Best guess at the local IPv4 address: the source address the OS would
/// route a datagram from. No packet is sent.
///
/// # Errors
///
/// Propagates socket errors, and reports `AddrNotAvailable` when the OS
/// offers no usable IPv4 source address.
pub fn detect_local_ipv4() -> io::Result<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    // TEST-NET-3 target; connect() only selects a route.
    socket.connect(("203.0.113.1", 9))?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        _ => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no local IPv4 address",
        )),
    }
}

/// Synthesizes a stable locally-administered MAC for a member from its
/// transport endpoint. The emulated segment has no real link layer, but the
/// node table format carries one, and it doubles as the member key while a
/// session is live.
pub(crate) fn derive_mac(ip: Ipv4Addr, port: u16) -> [u8; 6] {
    let o = ip.octets();
    let p = port.to_be_bytes();
    [0x02, o[1], o[2], o[3], p[0], p[1]]
}

/// Milliseconds since the Unix epoch; coarse clock for liveness accounting.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_mac_is_locally_administered() {
        let mac = derive_mac(Ipv4Addr::new(192, 168, 1, 20), 4242);
        assert_eq!(mac[0] & 0x02, 0x02, "local-admin bit must be set");
        assert_eq!(mac[0] & 0x01, 0x00, "multicast bit must be clear");
    }

    #[test]
    fn test_derive_mac_differs_per_port() {
        let a = derive_mac(Ipv4Addr::LOCALHOST, 5000);
        let b = derive_mac(Ipv4Addr::LOCALHOST, 5001);
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_mac_differs_per_address() {
        let a = derive_mac(Ipv4Addr::new(10, 0, 0, 1), 5000);
        let b = derive_mac(Ipv4Addr::new(10, 0, 0, 2), 5000);
        assert_ne!(a, b);
    }

    #[test]
    fn test_now_millis_is_nonzero_and_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[tokio::test]
    async fn test_read_frame_round_trips_over_loopback() {
        use tokio::net::{TcpListener, TcpStream};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (_, write_half) = stream.into_split();
            let writer = Mutex::new(write_half);
            write_frame(&writer, &LanMessage::Ping(77), 1).await.unwrap();
            writer
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (mut read_half, _write_half) = stream.into_split();
        let msg = read_frame(&mut read_half).await.unwrap();
        assert_eq!(msg, LanMessage::Ping(77));
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame_reports_eof_when_peer_closes() {
        use tokio::net::{TcpListener, TcpStream};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        drop(client);

        let (mut read_half, _write_half) = stream.into_split();
        let err = read_frame(&mut read_half).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
