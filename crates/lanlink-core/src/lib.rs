//! # lanlink-core
//!
//! Shared library for lanlink, an emulation of a handheld console's local
//! wireless discovery and session protocol on top of conventional IP
//! networking. This crate defines the session descriptor model and the
//! binary wire codec used by every node role.
//!
//! - **`domain`** - pure data: the session descriptor ([`NetworkInfo`]) with
//!   its fixed-capacity node table, plus the transient caller-supplied
//!   values ([`ConnectRequest`], [`ScanFilter`], [`CreateNetworkConfig`]).
//! - **`protocol`** - how bytes travel over the network: the [`LanMessage`]
//!   set for the discovery and session channels, the 24-byte frame header,
//!   and fixed-layout record encodings.
//!
//! This crate has no dependency on sockets, timers, or OS APIs; the engine
//! crate supplies all I/O.

pub mod domain;
pub mod protocol;

pub use domain::descriptor::{
    AcceptPolicy, DescriptorError, DisconnectReason, NetworkConfigSnapshot, NetworkInfo,
    NodeInfo, NodeLatestUpdate, SecurityMode, SecurityParameter, SessionId,
    ADVERTISE_DATA_MAX, NETWORK_NAME_MAX, NICKNAME_MAX, NODE_TABLE_CAPACITY, SECURITY_KEY_MAX,
};
pub use domain::session::{
    filter_flags, ConnectRequest, CreateNetworkConfig, ScanFilter, ValidationError,
};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::LanMessage;
