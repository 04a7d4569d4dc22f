//! Wire protocol: message types, the binary codec, and frame numbering.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_message, encode_message, encode_message_now, ProtocolError};
pub use sequence::SequenceCounter;
