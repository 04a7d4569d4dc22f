//! All lanlink protocol message types.
//!
//! Two channels share one frame format: the discovery channel (UDP, probe
//! and advertisement datagrams) and the session channel (TCP, the join
//! handshake and membership updates). Type codes are partitioned so a
//! datagram arriving on the wrong channel is recognisable at a glance.

use crate::domain::descriptor::NetworkInfo;
use crate::domain::session::ConnectRequest;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current engine protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common frame header in bytes.
pub const HEADER_SIZE: usize = 24;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    // Session channel (0x00-0x3F)
    Join = 0x01,
    JoinAccept = 0x02,
    JoinReject = 0x03,
    SyncNetwork = 0x04,
    Leave = 0x05,
    Ping = 0x07,
    Pong = 0x08,
    // Discovery channel (0x80-0x8F)
    Probe = 0x80,
    ProbeResponse = 0x81,
    Advertise = 0x82,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Join),
            0x02 => Ok(MessageType::JoinAccept),
            0x03 => Ok(MessageType::JoinReject),
            0x04 => Ok(MessageType::SyncNetwork),
            0x05 => Ok(MessageType::Leave),
            0x07 => Ok(MessageType::Ping),
            0x08 => Ok(MessageType::Pong),
            0x80 => Ok(MessageType::Probe),
            0x81 => Ok(MessageType::ProbeResponse),
            0x82 => Ok(MessageType::Advertise),
            _ => Err(()),
        }
    }
}

// ── Reason codes ──────────────────────────────────────────────────────────────

/// Why a host refused a join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinRejectReason {
    /// The request's application protocol version differs from the host's.
    VersionMismatch = 0x01,
    /// Security mode or key material did not match.
    SecurityMismatch = 0x02,
    /// The node table already holds the configured maximum.
    TableFull = 0x03,
    /// The host's accept policy currently refuses all stations.
    NotAccepting = 0x04,
}

impl TryFrom<u8> for JoinRejectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(JoinRejectReason::VersionMismatch),
            0x02 => Ok(JoinRejectReason::SecurityMismatch),
            0x03 => Ok(JoinRejectReason::TableFull),
            0x04 => Ok(JoinRejectReason::NotAccepting),
            _ => Err(()),
        }
    }
}

/// Why a session participant is leaving, sent in a [`LanMessage::Leave`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LeaveReason {
    /// The station disconnected voluntarily.
    StationDeparting = 0x01,
    /// The host destroyed the network; all members must drop.
    NetworkDestroyed = 0x02,
}

impl TryFrom<u8> for LeaveReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(LeaveReason::StationDeparting),
            0x02 => Ok(LeaveReason::NetworkDestroyed),
            _ => Err(()),
        }
    }
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All valid lanlink messages, discriminated by type.
#[derive(Debug, Clone, PartialEq)]
pub enum LanMessage {
    /// Discovery probe broadcast by a scanner. Empty payload.
    Probe,
    /// Unicast answer to a probe, carrying the hosted session's descriptor.
    ProbeResponse(NetworkInfo),
    /// Periodic broadcast of the hosted session's descriptor.
    Advertise(NetworkInfo),
    /// Station to host: request to join, opening the handshake.
    Join(ConnectRequest),
    /// Host to station: join granted; the descriptor already includes the
    /// new member.
    JoinAccept(NetworkInfo),
    /// Host to station: join refused.
    JoinReject(JoinRejectReason),
    /// Host to stations: authoritative descriptor after a membership or
    /// payload change.
    SyncNetwork(NetworkInfo),
    /// Graceful departure notification, either direction.
    Leave(LeaveReason),
    /// Liveness request carrying an opaque token echoed back in the Pong.
    Ping(u64),
    Pong(u64),
}

impl LanMessage {
    /// Returns the [`MessageType`] discriminant for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            LanMessage::Probe => MessageType::Probe,
            LanMessage::ProbeResponse(_) => MessageType::ProbeResponse,
            LanMessage::Advertise(_) => MessageType::Advertise,
            LanMessage::Join(_) => MessageType::Join,
            LanMessage::JoinAccept(_) => MessageType::JoinAccept,
            LanMessage::JoinReject(_) => MessageType::JoinReject,
            LanMessage::SyncNetwork(_) => MessageType::SyncNetwork,
            LanMessage::Leave(_) => MessageType::Leave,
            LanMessage::Ping(_) => MessageType::Ping,
            LanMessage::Pong(_) => MessageType::Pong,
        }
    }
}
