//! The session descriptor: the canonical description of one hosted network.
//!
//! A [`NetworkInfo`] is created when a node starts hosting, mutated in place
//! as stations join and leave, and pushed verbatim to every member whenever
//! the membership changes. Scanners receive the same record in probe
//! responses. External callers only ever see clones of it; the hosting
//! engine is the single writer.
//!
//! # Node table invariants
//!
//! - `node_count` never exceeds `node_count_max`, which never exceeds
//!   [`NODE_TABLE_CAPACITY`].
//! - Active entries are contiguous from slot 0 and ordered by join time.
//! - While hosting, slot 0 is always the host itself.
//! - After a removal the table is compacted and each surviving entry's
//!   `node_id` is rewritten to its new slot index.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifies one hosted session for its whole lifetime.
pub type SessionId = Uuid;

/// Hard capacity of the node table. `node_count_max` may be configured
/// lower, never higher.
pub const NODE_TABLE_CAPACITY: usize = 8;

/// Maximum byte length of the opaque advertise payload.
pub const ADVERTISE_DATA_MAX: usize = 0x180;

/// Maximum byte length of the opaque security key material.
pub const SECURITY_KEY_MAX: usize = 0x40;

/// Maximum UTF-8 byte length of a network name.
pub const NETWORK_NAME_MAX: usize = 32;

/// Maximum UTF-8 byte length of a member nickname.
pub const NICKNAME_MAX: usize = 32;

/// Errors from node-table and payload edits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// The node table already holds `node_count_max` entries.
    #[error("node table is full ({0} entries)")]
    TableFull(u8),
    /// The advertise payload exceeds [`ADVERTISE_DATA_MAX`].
    #[error("advertise data too long: {0} bytes, max {ADVERTISE_DATA_MAX}")]
    AdvertiseDataTooLong(usize),
    /// No active node occupies the given slot.
    #[error("no node at slot {0}")]
    NoSuchNode(u8),
}

/// How join attempts are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SecurityMode {
    /// No key material; any station may join.
    #[default]
    Open = 0x00,
    /// Stations must present the same key material the host was created with.
    SharedKey = 0x01,
}

impl TryFrom<u8> for SecurityMode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(SecurityMode::Open),
            0x01 => Ok(SecurityMode::SharedKey),
            _ => Err(()),
        }
    }
}

/// Whether the host is currently admitting new stations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum AcceptPolicy {
    #[default]
    AcceptAll = 0x00,
    RejectAll = 0x01,
}

impl TryFrom<u8> for AcceptPolicy {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(AcceptPolicy::AcceptAll),
            0x01 => Ok(AcceptPolicy::RejectAll),
            _ => Err(()),
        }
    }
}

/// One member of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// The member's IP address on the emulated segment.
    pub ipv4: Ipv4Addr,
    /// Synthetic link-layer address (locally administered).
    pub mac: [u8; 6],
    /// Slot index; equals the entry's position in the node table.
    pub node_id: u8,
    /// False only in zeroed padding slots.
    pub is_connected: bool,
    /// Display name supplied by the member, at most [`NICKNAME_MAX`] bytes.
    pub nickname: String,
    /// Application protocol version the member joined with.
    pub local_communication_version: u16,
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            ipv4: Ipv4Addr::UNSPECIFIED,
            mac: [0; 6],
            node_id: 0,
            is_connected: false,
            nickname: String::new(),
            local_communication_version: 0,
        }
    }
}

/// The canonical description of one session.
///
/// Field groups, in wire order: identity (intent id, scene, session id,
/// version), security (mode plus key material), the node table, and the
/// host-controlled advertise payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Application-defined intent identifier shared by all participants.
    pub local_communication_id: u64,
    /// Sub-identifier distinguishing concurrent activities of one application.
    pub scene_id: u16,
    /// Unique identifier of this session instance.
    pub session_id: SessionId,
    /// Application protocol version; joins must match exactly.
    pub local_communication_version: u16,
    pub security_mode: SecurityMode,
    pub accept_policy: AcceptPolicy,
    /// Human-readable network name, at most [`NETWORK_NAME_MAX`] bytes.
    pub network_name: String,
    /// TCP port the host accepts session connections on.
    pub host_port: u16,
    /// Opaque key material, at most [`SECURITY_KEY_MAX`] bytes.
    pub security_key: Vec<u8>,
    /// Configured member limit for this session.
    pub node_count_max: u8,
    /// Number of active entries in `nodes`.
    pub node_count: u8,
    /// Fixed-capacity member table; slots at `node_count` and beyond are zeroed.
    pub nodes: [NodeInfo; NODE_TABLE_CAPACITY],
    /// Opaque payload carried unmodified to scanners.
    pub advertise_data: Vec<u8>,
}

impl Default for NetworkInfo {
    fn default() -> Self {
        Self {
            local_communication_id: 0,
            scene_id: 0,
            session_id: Uuid::nil(),
            local_communication_version: 0,
            security_mode: SecurityMode::Open,
            accept_policy: AcceptPolicy::AcceptAll,
            network_name: String::new(),
            host_port: 0,
            security_key: Vec::new(),
            node_count_max: 0,
            node_count: 0,
            nodes: std::array::from_fn(|_| NodeInfo::default()),
            advertise_data: Vec::new(),
        }
    }
}

impl NetworkInfo {
    /// Active entries, in join order.
    pub fn active_nodes(&self) -> &[NodeInfo] {
        &self.nodes[..self.node_count as usize]
    }

    /// True when the configured member limit is reached.
    pub fn is_full(&self) -> bool {
        self.node_count >= self.node_count_max
    }

    /// Appends a member at the next free slot and returns its node id.
    ///
    /// The entry's `node_id` and `is_connected` fields are overwritten by
    /// this method; callers only supply identity fields.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::TableFull`] when the member limit is
    /// reached.
    pub fn add_node(&mut self, mut node: NodeInfo) -> Result<u8, DescriptorError> {
        if self.is_full() {
            return Err(DescriptorError::TableFull(self.node_count));
        }
        let slot = self.node_count;
        node.node_id = slot;
        node.is_connected = true;
        self.nodes[slot as usize] = node;
        self.node_count += 1;
        Ok(slot)
    }

    /// Removes the member at `node_id`, compacts the table, and rewrites
    /// surviving entries' `node_id` fields to their new slots.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::NoSuchNode`] when the slot is not active.
    pub fn remove_node(&mut self, node_id: u8) -> Result<(), DescriptorError> {
        let count = self.node_count as usize;
        let slot = node_id as usize;
        if slot >= count {
            return Err(DescriptorError::NoSuchNode(node_id));
        }
        for i in slot..count - 1 {
            self.nodes[i] = self.nodes[i + 1].clone();
            self.nodes[i].node_id = i as u8;
        }
        self.nodes[count - 1] = NodeInfo::default();
        self.node_count -= 1;
        Ok(())
    }

    /// Replaces the advertise payload.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::AdvertiseDataTooLong`] when `data` exceeds
    /// [`ADVERTISE_DATA_MAX`].
    pub fn set_advertise_data(&mut self, data: &[u8]) -> Result<(), DescriptorError> {
        if data.len() > ADVERTISE_DATA_MAX {
            return Err(DescriptorError::AdvertiseDataTooLong(data.len()));
        }
        self.advertise_data = data.to_vec();
        Ok(())
    }

    /// Derives the security snapshot the query interface exposes.
    pub fn security_parameter(&self) -> SecurityParameter {
        let mut data = [0u8; 16];
        let n = self.security_key.len().min(16);
        data[..n].copy_from_slice(&self.security_key[..n]);
        SecurityParameter {
            data,
            session_id: self.session_id,
        }
    }

    /// Derives the configuration snapshot the query interface exposes.
    pub fn network_config(&self) -> NetworkConfigSnapshot {
        NetworkConfigSnapshot {
            local_communication_id: self.local_communication_id,
            scene_id: self.scene_id,
            node_count_max: self.node_count_max,
            local_communication_version: self.local_communication_version,
        }
    }
}

/// Security snapshot derived from a [`NetworkInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityParameter {
    /// Leading bytes of the session key material, zero padded.
    pub data: [u8; 16],
    pub session_id: SessionId,
}

/// Configuration snapshot derived from a [`NetworkInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfigSnapshot {
    pub local_communication_id: u64,
    pub scene_id: u16,
    pub node_count_max: u8,
    pub local_communication_version: u16,
}

/// Why the node's last session ended. Queryable until the next session
/// starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum DisconnectReason {
    #[default]
    None = 0,
    /// The local caller disconnected or destroyed the session.
    DisconnectedByUser = 1,
    /// The engine tore the session down itself (e.g. repeated transport
    /// failures while advertising).
    DisconnectedBySystem = 2,
    /// The host destroyed the network while this station was a member.
    DestroyedByHost = 3,
    /// The transport to the peer was lost.
    ConnectionLost = 4,
}

/// Per-slot membership change flags accumulated between latest-update
/// queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeLatestUpdate {
    /// Bit 0: a member joined this slot. Bit 1: a member left this slot.
    pub state_change: u8,
}

impl NodeLatestUpdate {
    pub const FLAG_JOIN: u8 = 1 << 0;
    pub const FLAG_LEAVE: u8 = 1 << 1;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn member(nickname: &str, last_octet: u8) -> NodeInfo {
        NodeInfo {
            ipv4: Ipv4Addr::new(10, 0, 0, last_octet),
            mac: [0x02, 0, 0, 0, 0, last_octet],
            nickname: nickname.to_string(),
            local_communication_version: 1,
            ..NodeInfo::default()
        }
    }

    fn hosted(max: u8) -> NetworkInfo {
        let mut info = NetworkInfo {
            session_id: Uuid::new_v4(),
            node_count_max: max,
            ..NetworkInfo::default()
        };
        info.add_node(member("host", 1)).unwrap();
        info
    }

    #[test]
    fn test_default_network_info_is_zeroed() {
        let info = NetworkInfo::default();
        assert_eq!(info.session_id, Uuid::nil());
        assert_eq!(info.node_count, 0);
        assert!(info.active_nodes().is_empty());
        assert!(info.advertise_data.is_empty());
    }

    #[test]
    fn test_add_node_assigns_sequential_slots() {
        let mut info = hosted(4);
        let a = info.add_node(member("a", 2)).unwrap();
        let b = info.add_node(member("b", 3)).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(info.node_count, 3);
        assert_eq!(info.nodes[1].node_id, 1);
        assert!(info.nodes[1].is_connected);
    }

    #[test]
    fn test_add_node_past_limit_fails_with_table_full() {
        let mut info = hosted(2);
        info.add_node(member("a", 2)).unwrap();
        let result = info.add_node(member("b", 3));
        assert_eq!(result, Err(DescriptorError::TableFull(2)));
        assert_eq!(info.node_count, 2);
    }

    #[test]
    fn test_configured_limit_binds_before_capacity() {
        let mut info = hosted(1);
        assert!(info.is_full());
        assert!(info.add_node(member("a", 2)).is_err());
    }

    #[test]
    fn test_remove_node_compacts_and_renumbers() {
        let mut info = hosted(4);
        info.add_node(member("a", 2)).unwrap();
        info.add_node(member("b", 3)).unwrap();

        info.remove_node(1).unwrap();

        assert_eq!(info.node_count, 2);
        // "b" slid into slot 1 and was renumbered; join order is preserved.
        assert_eq!(info.nodes[1].nickname, "b");
        assert_eq!(info.nodes[1].node_id, 1);
        // Freed tail slot is zeroed.
        assert!(!info.nodes[2].is_connected);
        assert_eq!(info.nodes[2], NodeInfo::default());
    }

    #[test]
    fn test_remove_node_unknown_slot_fails() {
        let mut info = hosted(4);
        assert_eq!(info.remove_node(5), Err(DescriptorError::NoSuchNode(5)));
        assert_eq!(info.node_count, 1);
    }

    #[test]
    fn test_set_advertise_data_enforces_maximum() {
        let mut info = hosted(2);
        assert!(info.set_advertise_data(&[0xAB; ADVERTISE_DATA_MAX]).is_ok());
        assert_eq!(info.advertise_data.len(), ADVERTISE_DATA_MAX);

        let result = info.set_advertise_data(&[0xAB; ADVERTISE_DATA_MAX + 1]);
        assert_eq!(
            result,
            Err(DescriptorError::AdvertiseDataTooLong(ADVERTISE_DATA_MAX + 1))
        );
        // Payload is unchanged after a rejected replacement.
        assert_eq!(info.advertise_data.len(), ADVERTISE_DATA_MAX);
    }

    #[test]
    fn test_security_parameter_copies_leading_key_bytes() {
        let mut info = hosted(2);
        info.security_key = vec![7u8; 4];
        let param = info.security_parameter();
        assert_eq!(&param.data[..4], &[7, 7, 7, 7]);
        assert_eq!(&param.data[4..], &[0u8; 12]);
        assert_eq!(param.session_id, info.session_id);
    }

    #[test]
    fn test_network_config_snapshot_mirrors_identity() {
        let mut info = hosted(6);
        info.local_communication_id = 0x0102_0304_0506_0708;
        info.scene_id = 9;
        info.local_communication_version = 3;
        let cfg = info.network_config();
        assert_eq!(cfg.local_communication_id, 0x0102_0304_0506_0708);
        assert_eq!(cfg.scene_id, 9);
        assert_eq!(cfg.node_count_max, 6);
        assert_eq!(cfg.local_communication_version, 3);
    }

    #[test]
    fn test_security_mode_round_trips_through_u8() {
        for mode in [SecurityMode::Open, SecurityMode::SharedKey] {
            assert_eq!(SecurityMode::try_from(mode as u8), Ok(mode));
        }
        assert!(SecurityMode::try_from(0x7F).is_err());
    }
}
