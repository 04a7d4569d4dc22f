//! Binary codec for lanlink protocol frames.
//!
//! Frame format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][seq:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 24 bytes. All multi-byte integers are big-endian.
//!
//! The three caller-facing records encode at fixed sizes so the boundary
//! that marshals them can use static buffers: [`NETWORK_INFO_SIZE`] (0x480),
//! [`CONNECT_REQUEST_SIZE`] (0x7C) and [`SCAN_FILTER_SIZE`] (0x60). Reserved
//! ranges encode as zero and are ignored on decode.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use uuid::Uuid;

use crate::domain::descriptor::{
    AcceptPolicy, NetworkInfo, NodeInfo, SecurityMode, ADVERTISE_DATA_MAX, NETWORK_NAME_MAX,
    NICKNAME_MAX, NODE_TABLE_CAPACITY, SECURITY_KEY_MAX,
};
use crate::domain::session::{ConnectRequest, ScanFilter};
use crate::protocol::messages::{
    JoinRejectReason, LanMessage, LeaveReason, MessageType, HEADER_SIZE, PROTOCOL_VERSION,
};

/// Encoded size of a [`NetworkInfo`].
pub const NETWORK_INFO_SIZE: usize = 0x480;

/// Encoded size of one [`NodeInfo`] table entry.
pub const NODE_INFO_SIZE: usize = 0x40;

/// Encoded size of a [`ConnectRequest`].
pub const CONNECT_REQUEST_SIZE: usize = 0x7C;

/// Encoded size of a [`ScanFilter`].
pub const SCAN_FILTER_SIZE: usize = 0x60;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed (field out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`LanMessage`] into a byte vector including the 24-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError`] if serialization fails.
pub fn encode_message(
    msg: &LanMessage,
    sequence_number: u64,
    timestamp_us: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg);
    let payload_len = payload.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&timestamp_us.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encodes a [`LanMessage`] using the current system time as the timestamp.
///
/// # Errors
///
/// Returns [`ProtocolError`] if serialization fails.
pub fn encode_message_now(
    msg: &LanMessage,
    sequence_number: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let timestamp_us = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    encode_message(msg, sequence_number, timestamp_us)
}

/// Decodes one [`LanMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (header plus payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(LanMessage, usize), ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let msg_type_byte = bytes[1];
    let msg_type = MessageType::try_from(msg_type_byte)
        .map_err(|_| ProtocolError::UnknownMessageType(msg_type_byte))?;

    // bytes[2..4] are reserved, ignored on decode

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let msg = decode_payload(msg_type, payload)?;
    Ok((msg, total_needed))
}

/// Reads the payload length field out of a frame header.
///
/// Used by stream readers that fetch the fixed-size header first and then
/// the declared number of payload bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when `header` is shorter
/// than [`HEADER_SIZE`].
pub fn payload_length(header: &[u8]) -> Result<usize, ProtocolError> {
    if header.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: header.len(),
        });
    }
    Ok(u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize)
}

// ── Payload dispatch ──────────────────────────────────────────────────────────

fn encode_payload(msg: &LanMessage) -> Vec<u8> {
    match msg {
        LanMessage::Probe => Vec::new(),
        LanMessage::ProbeResponse(info)
        | LanMessage::Advertise(info)
        | LanMessage::JoinAccept(info)
        | LanMessage::SyncNetwork(info) => network_info_to_bytes(info).to_vec(),
        LanMessage::Join(request) => connect_request_to_bytes(request).to_vec(),
        LanMessage::JoinReject(reason) => vec![*reason as u8],
        LanMessage::Leave(reason) => vec![*reason as u8],
        LanMessage::Ping(token) | LanMessage::Pong(token) => token.to_be_bytes().to_vec(),
    }
}

fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<LanMessage, ProtocolError> {
    match msg_type {
        MessageType::Probe => Ok(LanMessage::Probe),
        MessageType::ProbeResponse => {
            network_info_from_bytes(payload).map(LanMessage::ProbeResponse)
        }
        MessageType::Advertise => network_info_from_bytes(payload).map(LanMessage::Advertise),
        MessageType::JoinAccept => network_info_from_bytes(payload).map(LanMessage::JoinAccept),
        MessageType::SyncNetwork => {
            network_info_from_bytes(payload).map(LanMessage::SyncNetwork)
        }
        MessageType::Join => connect_request_from_bytes(payload).map(LanMessage::Join),
        MessageType::JoinReject => {
            require_len(payload, 1, "JoinReject")?;
            let reason = JoinRejectReason::try_from(payload[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown reject reason: {}", payload[0]))
            })?;
            Ok(LanMessage::JoinReject(reason))
        }
        MessageType::Leave => {
            require_len(payload, 1, "Leave")?;
            let reason = LeaveReason::try_from(payload[0]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown leave reason: {}", payload[0]))
            })?;
            Ok(LanMessage::Leave(reason))
        }
        MessageType::Ping => Ok(LanMessage::Ping(read_u64(payload, 0)?)),
        MessageType::Pong => Ok(LanMessage::Pong(read_u64(payload, 0)?)),
    }
}

// ── NetworkInfo layout ────────────────────────────────────────────────────────
//
// offset size field
// 0x000  8    local_communication_id
// 0x008  2    scene_id
// 0x00A  6    reserved
// 0x010  16   session_id
// 0x020  2    local_communication_version
// 0x022  1    security_mode
// 0x023  1    accept_policy
// 0x024  1    network_name_len
// 0x025  32   network_name
// 0x045  2    host_port
// 0x047  1    security_key_len
// 0x048  64   security_key
// 0x088  1    node_count_max
// 0x089  1    node_count
// 0x08A  2    reserved
// 0x08C  512  node table (8 x 0x40)
// 0x28C  2    advertise_data_len
// 0x28E  384  advertise_data
// 0x40E  114  reserved

const NI_OFF_COMM_ID: usize = 0x000;
const NI_OFF_SCENE: usize = 0x008;
const NI_OFF_SESSION_ID: usize = 0x010;
const NI_OFF_VERSION: usize = 0x020;
const NI_OFF_SEC_MODE: usize = 0x022;
const NI_OFF_POLICY: usize = 0x023;
const NI_OFF_NAME_LEN: usize = 0x024;
const NI_OFF_NAME: usize = 0x025;
const NI_OFF_HOST_PORT: usize = 0x045;
const NI_OFF_KEY_LEN: usize = 0x047;
const NI_OFF_KEY: usize = 0x048;
const NI_OFF_NODE_MAX: usize = 0x088;
const NI_OFF_NODE_COUNT: usize = 0x089;
const NI_OFF_NODES: usize = 0x08C;
const NI_OFF_ADV_LEN: usize = 0x28C;
const NI_OFF_ADV: usize = 0x28E;

/// Encodes a [`NetworkInfo`] into its fixed 0x480-byte wire form.
pub fn network_info_to_bytes(info: &NetworkInfo) -> [u8; NETWORK_INFO_SIZE] {
    let mut b = [0u8; NETWORK_INFO_SIZE];

    b[NI_OFF_COMM_ID..NI_OFF_COMM_ID + 8]
        .copy_from_slice(&info.local_communication_id.to_be_bytes());
    b[NI_OFF_SCENE..NI_OFF_SCENE + 2].copy_from_slice(&info.scene_id.to_be_bytes());
    b[NI_OFF_SESSION_ID..NI_OFF_SESSION_ID + 16].copy_from_slice(info.session_id.as_bytes());
    b[NI_OFF_VERSION..NI_OFF_VERSION + 2]
        .copy_from_slice(&info.local_communication_version.to_be_bytes());
    b[NI_OFF_SEC_MODE] = info.security_mode as u8;
    b[NI_OFF_POLICY] = info.accept_policy as u8;

    let name = info.network_name.as_bytes();
    let name_len = name.len().min(NETWORK_NAME_MAX);
    b[NI_OFF_NAME_LEN] = name_len as u8;
    b[NI_OFF_NAME..NI_OFF_NAME + name_len].copy_from_slice(&name[..name_len]);

    b[NI_OFF_HOST_PORT..NI_OFF_HOST_PORT + 2].copy_from_slice(&info.host_port.to_be_bytes());

    let key_len = info.security_key.len().min(SECURITY_KEY_MAX);
    b[NI_OFF_KEY_LEN] = key_len as u8;
    b[NI_OFF_KEY..NI_OFF_KEY + key_len].copy_from_slice(&info.security_key[..key_len]);

    b[NI_OFF_NODE_MAX] = info.node_count_max;
    b[NI_OFF_NODE_COUNT] = info.node_count;
    for (i, node) in info.nodes.iter().enumerate() {
        let off = NI_OFF_NODES + i * NODE_INFO_SIZE;
        encode_node_info(&mut b[off..off + NODE_INFO_SIZE], node);
    }

    let adv_len = info.advertise_data.len().min(ADVERTISE_DATA_MAX);
    b[NI_OFF_ADV_LEN..NI_OFF_ADV_LEN + 2].copy_from_slice(&(adv_len as u16).to_be_bytes());
    b[NI_OFF_ADV..NI_OFF_ADV + adv_len].copy_from_slice(&info.advertise_data[..adv_len]);

    b
}

/// Decodes a [`NetworkInfo`] from its fixed wire form.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the buffer is short or any field is out
/// of range.
pub fn network_info_from_bytes(p: &[u8]) -> Result<NetworkInfo, ProtocolError> {
    require_len(p, NETWORK_INFO_SIZE, "NetworkInfo")?;

    let local_communication_id = read_u64(p, NI_OFF_COMM_ID)?;
    let scene_id = u16::from_be_bytes([p[NI_OFF_SCENE], p[NI_OFF_SCENE + 1]]);
    let session_id = read_uuid(p, NI_OFF_SESSION_ID)?;
    let local_communication_version =
        u16::from_be_bytes([p[NI_OFF_VERSION], p[NI_OFF_VERSION + 1]]);

    let security_mode = SecurityMode::try_from(p[NI_OFF_SEC_MODE]).map_err(|_| {
        ProtocolError::MalformedPayload(format!("unknown security mode: {}", p[NI_OFF_SEC_MODE]))
    })?;
    let accept_policy = AcceptPolicy::try_from(p[NI_OFF_POLICY]).map_err(|_| {
        ProtocolError::MalformedPayload(format!("unknown accept policy: {}", p[NI_OFF_POLICY]))
    })?;

    let name_len = p[NI_OFF_NAME_LEN] as usize;
    if name_len > NETWORK_NAME_MAX {
        return Err(ProtocolError::MalformedPayload(format!(
            "network name length {name_len} exceeds {NETWORK_NAME_MAX}"
        )));
    }
    let network_name = read_utf8(&p[NI_OFF_NAME..NI_OFF_NAME + name_len], "network_name")?;

    let host_port = u16::from_be_bytes([p[NI_OFF_HOST_PORT], p[NI_OFF_HOST_PORT + 1]]);

    let key_len = p[NI_OFF_KEY_LEN] as usize;
    if key_len > SECURITY_KEY_MAX {
        return Err(ProtocolError::MalformedPayload(format!(
            "security key length {key_len} exceeds {SECURITY_KEY_MAX}"
        )));
    }
    let security_key = p[NI_OFF_KEY..NI_OFF_KEY + key_len].to_vec();

    let node_count_max = p[NI_OFF_NODE_MAX];
    let node_count = p[NI_OFF_NODE_COUNT];
    if node_count_max as usize > NODE_TABLE_CAPACITY || node_count > node_count_max {
        return Err(ProtocolError::MalformedPayload(format!(
            "node counts out of range: {node_count}/{node_count_max}"
        )));
    }

    let mut nodes: [NodeInfo; NODE_TABLE_CAPACITY] =
        std::array::from_fn(|_| NodeInfo::default());
    for (i, slot) in nodes.iter_mut().enumerate() {
        let off = NI_OFF_NODES + i * NODE_INFO_SIZE;
        *slot = decode_node_info(&p[off..off + NODE_INFO_SIZE])?;
    }

    let adv_len = u16::from_be_bytes([p[NI_OFF_ADV_LEN], p[NI_OFF_ADV_LEN + 1]]) as usize;
    if adv_len > ADVERTISE_DATA_MAX {
        return Err(ProtocolError::MalformedPayload(format!(
            "advertise data length {adv_len} exceeds {ADVERTISE_DATA_MAX}"
        )));
    }
    let advertise_data = p[NI_OFF_ADV..NI_OFF_ADV + adv_len].to_vec();

    Ok(NetworkInfo {
        local_communication_id,
        scene_id,
        session_id,
        local_communication_version,
        security_mode,
        accept_policy,
        network_name,
        host_port,
        security_key,
        node_count_max,
        node_count,
        nodes,
        advertise_data,
    })
}

// ── NodeInfo layout ───────────────────────────────────────────────────────────
//
// ipv4 (4), mac (6), node_id (1), is_connected (1), nickname (32),
// local_communication_version (2), reserved (18)

fn encode_node_info(b: &mut [u8], node: &NodeInfo) {
    b[0..4].copy_from_slice(&node.ipv4.octets());
    b[4..10].copy_from_slice(&node.mac);
    b[10] = node.node_id;
    b[11] = u8::from(node.is_connected);
    let nick = node.nickname.as_bytes();
    let nick_len = nick.len().min(NICKNAME_MAX);
    b[12..12 + nick_len].copy_from_slice(&nick[..nick_len]);
    b[44..46].copy_from_slice(&node.local_communication_version.to_be_bytes());
}

fn decode_node_info(p: &[u8]) -> Result<NodeInfo, ProtocolError> {
    require_len(p, NODE_INFO_SIZE, "NodeInfo")?;
    let ipv4 = Ipv4Addr::new(p[0], p[1], p[2], p[3]);
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&p[4..10]);
    let node_id = p[10];
    let is_connected = p[11] != 0;
    // Nickname is zero padded; trim the padding before UTF-8 validation.
    let nick_raw = &p[12..12 + NICKNAME_MAX];
    let nick_end = nick_raw.iter().position(|&c| c == 0).unwrap_or(NICKNAME_MAX);
    let nickname = read_utf8(&nick_raw[..nick_end], "nickname")?;
    let local_communication_version = u16::from_be_bytes([p[44], p[45]]);
    Ok(NodeInfo {
        ipv4,
        mac,
        node_id,
        is_connected,
        nickname,
        local_communication_version,
    })
}

// ── ConnectRequest layout ─────────────────────────────────────────────────────
//
// security_mode (2), key_len (2), key (64), nickname (32), reserved (16),
// local_communication_version (2), reserved (2), option (4)

const CR_OFF_SEC_MODE: usize = 0;
const CR_OFF_KEY_LEN: usize = 2;
const CR_OFF_KEY: usize = 4;
const CR_OFF_NICKNAME: usize = 68;
const CR_OFF_VERSION: usize = 116;
const CR_OFF_OPTION: usize = 120;

/// Encodes a [`ConnectRequest`] into its fixed 0x7C-byte wire form.
pub fn connect_request_to_bytes(request: &ConnectRequest) -> [u8; CONNECT_REQUEST_SIZE] {
    let mut b = [0u8; CONNECT_REQUEST_SIZE];
    b[CR_OFF_SEC_MODE..CR_OFF_SEC_MODE + 2]
        .copy_from_slice(&(request.security_mode as u16).to_be_bytes());
    let key_len = request.key.len().min(SECURITY_KEY_MAX);
    b[CR_OFF_KEY_LEN..CR_OFF_KEY_LEN + 2].copy_from_slice(&(key_len as u16).to_be_bytes());
    b[CR_OFF_KEY..CR_OFF_KEY + key_len].copy_from_slice(&request.key[..key_len]);
    let nick = request.nickname.as_bytes();
    let nick_len = nick.len().min(NICKNAME_MAX);
    b[CR_OFF_NICKNAME..CR_OFF_NICKNAME + nick_len].copy_from_slice(&nick[..nick_len]);
    b[CR_OFF_VERSION..CR_OFF_VERSION + 2]
        .copy_from_slice(&request.local_communication_version.to_be_bytes());
    b[CR_OFF_OPTION..CR_OFF_OPTION + 4].copy_from_slice(&request.option.to_be_bytes());
    b
}

/// Decodes a [`ConnectRequest`] from its fixed wire form.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the buffer is short or any field is out
/// of range.
pub fn connect_request_from_bytes(p: &[u8]) -> Result<ConnectRequest, ProtocolError> {
    require_len(p, CONNECT_REQUEST_SIZE, "ConnectRequest")?;
    let mode_raw = u16::from_be_bytes([p[CR_OFF_SEC_MODE], p[CR_OFF_SEC_MODE + 1]]);
    let security_mode = u8::try_from(mode_raw)
        .ok()
        .and_then(|lo| SecurityMode::try_from(lo).ok())
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!("unknown security mode: {mode_raw}"))
        })?;
    let key_len = u16::from_be_bytes([p[CR_OFF_KEY_LEN], p[CR_OFF_KEY_LEN + 1]]) as usize;
    if key_len > SECURITY_KEY_MAX {
        return Err(ProtocolError::MalformedPayload(format!(
            "security key length {key_len} exceeds {SECURITY_KEY_MAX}"
        )));
    }
    let key = p[CR_OFF_KEY..CR_OFF_KEY + key_len].to_vec();
    let nick_raw = &p[CR_OFF_NICKNAME..CR_OFF_NICKNAME + NICKNAME_MAX];
    let nick_end = nick_raw.iter().position(|&c| c == 0).unwrap_or(NICKNAME_MAX);
    let nickname = read_utf8(&nick_raw[..nick_end], "nickname")?;
    let local_communication_version =
        u16::from_be_bytes([p[CR_OFF_VERSION], p[CR_OFF_VERSION + 1]]);
    let option = u32::from_be_bytes([
        p[CR_OFF_OPTION],
        p[CR_OFF_OPTION + 1],
        p[CR_OFF_OPTION + 2],
        p[CR_OFF_OPTION + 3],
    ]);
    Ok(ConnectRequest {
        security_mode,
        key,
        nickname,
        local_communication_version,
        option,
    })
}

// ── ScanFilter layout ─────────────────────────────────────────────────────────
//
// local_communication_id (8), scene_id (2), reserved (6), session_id (16),
// flags (4), reserved (60)

const SF_OFF_COMM_ID: usize = 0;
const SF_OFF_SCENE: usize = 8;
const SF_OFF_SESSION_ID: usize = 16;
const SF_OFF_FLAGS: usize = 32;

/// Encodes a [`ScanFilter`] into its fixed 0x60-byte wire form.
pub fn scan_filter_to_bytes(filter: &ScanFilter) -> [u8; SCAN_FILTER_SIZE] {
    let mut b = [0u8; SCAN_FILTER_SIZE];
    b[SF_OFF_COMM_ID..SF_OFF_COMM_ID + 8]
        .copy_from_slice(&filter.local_communication_id.to_be_bytes());
    b[SF_OFF_SCENE..SF_OFF_SCENE + 2].copy_from_slice(&filter.scene_id.to_be_bytes());
    b[SF_OFF_SESSION_ID..SF_OFF_SESSION_ID + 16].copy_from_slice(filter.session_id.as_bytes());
    b[SF_OFF_FLAGS..SF_OFF_FLAGS + 4].copy_from_slice(&filter.flags.to_be_bytes());
    b
}

/// Decodes a [`ScanFilter`] from its fixed wire form.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when the buffer is short.
pub fn scan_filter_from_bytes(p: &[u8]) -> Result<ScanFilter, ProtocolError> {
    require_len(p, SCAN_FILTER_SIZE, "ScanFilter")?;
    Ok(ScanFilter {
        local_communication_id: read_u64(p, SF_OFF_COMM_ID)?,
        scene_id: u16::from_be_bytes([p[SF_OFF_SCENE], p[SF_OFF_SCENE + 1]]),
        session_id: read_uuid(p, SF_OFF_SESSION_ID)?,
        flags: u32::from_be_bytes([
            p[SF_OFF_FLAGS],
            p[SF_OFF_FLAGS + 1],
            p[SF_OFF_FLAGS + 2],
            p[SF_OFF_FLAGS + 3],
        ]),
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    if buf.len() < offset + 8 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        });
    }
    Ok(u64::from_be_bytes(
        buf[offset..offset + 8].try_into().unwrap(),
    ))
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    if buf.len() < offset + 16 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 16 bytes for UUID at offset {offset}, got {}",
            buf.len().saturating_sub(offset)
        )));
    }
    Ok(Uuid::from_bytes(buf[offset..offset + 16].try_into().unwrap()))
}

fn read_utf8(bytes: &[u8], context: &str) -> Result<String, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ProtocolError::MalformedPayload(format!("{context}: invalid UTF-8: {e}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::filter_flags;
    use std::net::Ipv4Addr;

    fn sample_info() -> NetworkInfo {
        let mut info = NetworkInfo {
            local_communication_id: 0x0102_0304_0506_0708,
            scene_id: 0x0A0B,
            session_id: Uuid::new_v4(),
            local_communication_version: 3,
            security_mode: SecurityMode::SharedKey,
            accept_policy: AcceptPolicy::AcceptAll,
            network_name: "weekend-race".to_string(),
            host_port: 11453,
            security_key: vec![0x55; 16],
            node_count_max: 4,
            ..NetworkInfo::default()
        };
        info.add_node(NodeInfo {
            ipv4: Ipv4Addr::new(192, 168, 1, 10),
            mac: [0x02, 1, 2, 3, 4, 5],
            nickname: "host".to_string(),
            local_communication_version: 3,
            ..NodeInfo::default()
        })
        .unwrap();
        info.add_node(NodeInfo {
            ipv4: Ipv4Addr::new(192, 168, 1, 20),
            mac: [0x02, 6, 7, 8, 9, 10],
            nickname: "guest".to_string(),
            local_communication_version: 3,
            ..NodeInfo::default()
        })
        .unwrap();
        info.set_advertise_data(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        info
    }

    fn round_trip(msg: &LanMessage) -> LanMessage {
        let encoded = encode_message(msg, 0, 0).expect("encode failed");
        let (decoded, consumed) = decode_message(&encoded).expect("decode failed");
        assert_eq!(consumed, encoded.len());
        decoded
    }

    // ── Fixed record sizes ────────────────────────────────────────────────────

    #[test]
    fn test_network_info_encodes_to_exactly_0x480_bytes() {
        let bytes = network_info_to_bytes(&sample_info());
        assert_eq!(bytes.len(), 0x480);
    }

    #[test]
    fn test_connect_request_encodes_to_exactly_0x7c_bytes() {
        let bytes = connect_request_to_bytes(&ConnectRequest::default());
        assert_eq!(bytes.len(), 0x7C);
    }

    #[test]
    fn test_scan_filter_encodes_to_exactly_0x60_bytes() {
        let bytes = scan_filter_to_bytes(&ScanFilter::any());
        assert_eq!(bytes.len(), 0x60);
    }

    // ── Record round trips ────────────────────────────────────────────────────

    #[test]
    fn test_network_info_round_trip_preserves_all_fields() {
        let info = sample_info();
        let decoded = network_info_from_bytes(&network_info_to_bytes(&info)).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_zeroed_network_info_round_trips() {
        let info = NetworkInfo::default();
        let decoded = network_info_from_bytes(&network_info_to_bytes(&info)).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_connect_request_round_trip() {
        let request = ConnectRequest {
            security_mode: SecurityMode::SharedKey,
            key: vec![9; 32],
            nickname: "player-two".to_string(),
            local_communication_version: 7,
            option: 0xCAFE_F00D,
        };
        let decoded = connect_request_from_bytes(&connect_request_to_bytes(&request)).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_scan_filter_round_trip() {
        let filter = ScanFilter {
            local_communication_id: 0xFEED,
            scene_id: 2,
            session_id: Uuid::new_v4(),
            flags: filter_flags::ALL,
        };
        let decoded = scan_filter_from_bytes(&scan_filter_to_bytes(&filter)).unwrap();
        assert_eq!(decoded, filter);
    }

    // ── Message round trips ───────────────────────────────────────────────────

    #[test]
    fn test_probe_has_empty_payload() {
        let bytes = encode_message(&LanMessage::Probe, 0, 0).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(round_trip(&LanMessage::Probe), LanMessage::Probe);
    }

    #[test]
    fn test_advertise_round_trip() {
        let msg = LanMessage::Advertise(sample_info());
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_join_round_trip() {
        let msg = LanMessage::Join(ConnectRequest {
            nickname: "station".to_string(),
            local_communication_version: 1,
            ..ConnectRequest::default()
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_join_reject_round_trip() {
        for reason in [
            JoinRejectReason::VersionMismatch,
            JoinRejectReason::SecurityMismatch,
            JoinRejectReason::TableFull,
            JoinRejectReason::NotAccepting,
        ] {
            let msg = LanMessage::JoinReject(reason);
            assert_eq!(round_trip(&msg), msg);
        }
    }

    #[test]
    fn test_ping_pong_round_trip() {
        assert_eq!(
            round_trip(&LanMessage::Ping(0xDEAD_BEEF)),
            LanMessage::Ping(0xDEAD_BEEF)
        );
        assert_eq!(round_trip(&LanMessage::Pong(0)), LanMessage::Pong(0));
    }

    // ── Error conditions ──────────────────────────────────────────────────────

    #[test]
    fn test_decode_empty_bytes_returns_insufficient_data() {
        assert!(matches!(
            decode_message(&[]),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_decode_unknown_message_type_returns_error() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0] = PROTOCOL_VERSION;
        bytes[1] = 0x7F;
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::UnknownMessageType(0x7F))
        ));
    }

    #[test]
    fn test_decode_wrong_version_returns_error() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0] = 0x42;
        bytes[1] = MessageType::Ping as u8;
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::UnsupportedVersion(0x42))
        ));
    }

    #[test]
    fn test_decode_truncated_payload_returns_length_mismatch() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0] = PROTOCOL_VERSION;
        bytes[1] = MessageType::Ping as u8;
        bytes[4..8].copy_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::PayloadLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_network_info_rejects_node_count_above_maximum() {
        let mut bytes = network_info_to_bytes(&sample_info());
        // node_count greater than node_count_max must not decode.
        bytes[NI_OFF_NODE_COUNT] = bytes[NI_OFF_NODE_MAX] + 1;
        assert!(matches!(
            network_info_from_bytes(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_network_info_rejects_oversized_name_length() {
        let mut bytes = network_info_to_bytes(&sample_info());
        bytes[NI_OFF_NAME_LEN] = (NETWORK_NAME_MAX + 1) as u8;
        assert!(matches!(
            network_info_from_bytes(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_network_info_rejects_oversized_advertise_length() {
        let mut bytes = network_info_to_bytes(&sample_info());
        bytes[NI_OFF_ADV_LEN..NI_OFF_ADV_LEN + 2]
            .copy_from_slice(&((ADVERTISE_DATA_MAX + 1) as u16).to_be_bytes());
        assert!(matches!(
            network_info_from_bytes(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_connect_request_rejects_bad_security_mode() {
        let mut bytes = connect_request_to_bytes(&ConnectRequest::default());
        bytes[CR_OFF_SEC_MODE] = 0xFF;
        assert!(matches!(
            connect_request_from_bytes(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_payload_length_reads_header_field() {
        let bytes = encode_message(&LanMessage::Ping(1), 5, 6).unwrap();
        assert_eq!(payload_length(&bytes).unwrap(), 8);
        assert!(payload_length(&bytes[..4]).is_err());
    }

    #[test]
    fn test_header_encodes_sequence_and_timestamp() {
        let seq = 0x1234_5678_9ABC_DEF0u64;
        let ts = 0x0FED_CBA9_8765_4321u64;
        let bytes = encode_message(&LanMessage::Probe, seq, ts).unwrap();
        assert_eq!(u64::from_be_bytes(bytes[8..16].try_into().unwrap()), seq);
        assert_eq!(u64::from_be_bytes(bytes[16..24].try_into().unwrap()), ts);
    }
}
