//! Caller-supplied values for single operations: the connect request, the
//! scan filter, and the create-network configuration.
//!
//! These are transient. A [`ConnectRequest`] and a [`ScanFilter`] live for
//! one call; a [`CreateNetworkConfig`] is consumed when hosting begins and
//! its fields become the initial [`NetworkInfo`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::descriptor::{
    NetworkInfo, SecurityMode, SessionId, ADVERTISE_DATA_MAX, NETWORK_NAME_MAX,
    NICKNAME_MAX, NODE_TABLE_CAPACITY, SECURITY_KEY_MAX,
};

/// Validation failures for caller-supplied values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("network name must be 1..={NETWORK_NAME_MAX} bytes, got {0}")]
    BadNetworkName(usize),
    #[error("nickname must be 1..={NICKNAME_MAX} bytes, got {0}")]
    BadNickname(usize),
    #[error("security key must be at most {SECURITY_KEY_MAX} bytes, got {0}")]
    KeyTooLong(usize),
    #[error("shared-key security requires a non-empty key")]
    MissingKey,
    #[error("node count max must be 1..={NODE_TABLE_CAPACITY}, got {0}")]
    BadNodeCountMax(u8),
    #[error("advertise data must be at most {ADVERTISE_DATA_MAX} bytes, got {0}")]
    AdvertiseDataTooLong(usize),
}

/// What a station presents to a host when joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Must match the target's security mode.
    pub security_mode: SecurityMode,
    /// Key material, compared byte-for-byte under shared-key security.
    pub key: Vec<u8>,
    /// Nickname recorded into the host's node table.
    pub nickname: String,
    /// Must exactly match the target's recorded version.
    pub local_communication_version: u16,
    /// Application-defined option bits, carried but not interpreted.
    pub option: u32,
}

impl Default for ConnectRequest {
    fn default() -> Self {
        Self {
            security_mode: SecurityMode::Open,
            key: Vec::new(),
            nickname: String::new(),
            local_communication_version: 0,
            option: 0,
        }
    }
}

impl ConnectRequest {
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for an over-long nickname or key, or a
    /// shared-key request without key material.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.nickname.is_empty() || self.nickname.len() > NICKNAME_MAX {
            return Err(ValidationError::BadNickname(self.nickname.len()));
        }
        if self.key.len() > SECURITY_KEY_MAX {
            return Err(ValidationError::KeyTooLong(self.key.len()));
        }
        if self.security_mode == SecurityMode::SharedKey && self.key.is_empty() {
            return Err(ValidationError::MissingKey);
        }
        Ok(())
    }
}

/// Selects which [`ScanFilter`] fields take part in matching.
pub mod filter_flags {
    pub const SESSION_ID: u32 = 1 << 0;
    pub const LOCAL_COMMUNICATION_ID: u32 = 1 << 1;
    pub const SCENE_ID: u32 = 1 << 2;

    pub const ALL: u32 = SESSION_ID | LOCAL_COMMUNICATION_ID | SCENE_ID;
}

/// Criteria a scan candidate must satisfy to be returned.
///
/// Only fields whose bit is set in `flags` participate; a zero mask passes
/// every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFilter {
    pub local_communication_id: u64,
    pub scene_id: u16,
    pub session_id: SessionId,
    pub flags: u32,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            local_communication_id: 0,
            scene_id: 0,
            session_id: SessionId::nil(),
            flags: 0,
        }
    }
}

impl ScanFilter {
    /// A filter that matches every candidate.
    pub fn any() -> Self {
        Self::default()
    }

    /// True when every active field equals the candidate's.
    pub fn matches(&self, candidate: &NetworkInfo) -> bool {
        if self.flags & filter_flags::SESSION_ID != 0
            && candidate.session_id != self.session_id
        {
            return false;
        }
        if self.flags & filter_flags::LOCAL_COMMUNICATION_ID != 0
            && candidate.local_communication_id != self.local_communication_id
        {
            return false;
        }
        if self.flags & filter_flags::SCENE_ID != 0 && candidate.scene_id != self.scene_id {
            return false;
        }
        true
    }
}

/// Host-side parameters for creating a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNetworkConfig {
    pub network_name: String,
    pub local_communication_id: u64,
    #[serde(default)]
    pub scene_id: u16,
    #[serde(default)]
    pub local_communication_version: u16,
    #[serde(default)]
    pub security_mode: SecurityMode,
    /// Key material for shared-key security; ignored when open.
    #[serde(default)]
    pub security_key: Vec<u8>,
    /// Member limit, including the host.
    pub node_count_max: u8,
    /// Nickname the host records for itself at slot 0.
    pub host_nickname: String,
    /// Initial advertise payload; replaceable while hosting.
    #[serde(default)]
    pub advertise_data: Vec<u8>,
}

impl CreateNetworkConfig {
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first malformed field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.network_name.is_empty() || self.network_name.len() > NETWORK_NAME_MAX {
            return Err(ValidationError::BadNetworkName(self.network_name.len()));
        }
        if self.host_nickname.is_empty() || self.host_nickname.len() > NICKNAME_MAX {
            return Err(ValidationError::BadNickname(self.host_nickname.len()));
        }
        if self.node_count_max == 0 || self.node_count_max as usize > NODE_TABLE_CAPACITY {
            return Err(ValidationError::BadNodeCountMax(self.node_count_max));
        }
        if self.security_key.len() > SECURITY_KEY_MAX {
            return Err(ValidationError::KeyTooLong(self.security_key.len()));
        }
        if self.security_mode == SecurityMode::SharedKey && self.security_key.is_empty() {
            return Err(ValidationError::MissingKey);
        }
        if self.advertise_data.len() > ADVERTISE_DATA_MAX {
            return Err(ValidationError::AdvertiseDataTooLong(
                self.advertise_data.len(),
            ));
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
