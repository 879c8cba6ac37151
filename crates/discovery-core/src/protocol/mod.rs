//! Wire protocol for discovery datagrams.
//!
//! Every datagram is one fixed-size envelope:
//! - `magic: u16` (big-endian) - protocol sanity check
//! - `type: u16` (big-endian) - beacon, response, leave, or a user type
//! - `body: [u8; MAX_USER_DATA]` - announcement or zero-padded user payload
//!
//! Announcement bodies hold the sender's response address followed by the
//! NUL-padded cluster name. Because the body always has the same size, no
//! length field is needed.

pub mod address;
pub mod envelope;

pub use envelope::{Announcement, Message, UserPayload, WireError};

/// Magic number at the start of every datagram.
pub const MAGIC_NUMBER: u16 = 0x5643;

/// Beacon broadcast soliciting responses from cluster members.
pub const MSG_TYPE_BEACON: u16 = 1;

/// Direct reply to a beacon.
pub const MSG_TYPE_RESPONSE: u16 = 2;

/// Explicit departure notice.
pub const MSG_TYPE_LEAVE: u16 = 3;

/// First message type available for user messages.
pub const MSG_TYPE_USER: u16 = 16;

/// Maximum user payload, which is also the size of every envelope body.
pub const MAX_USER_DATA: usize = 256;

/// Size of the encoded response address inside an announcement body.
pub const ADDRESS_FIELD_LEN: usize = address::ENCODED_LEN;

/// Maximum cluster name length in bytes.
pub const MAX_NAME_LEN: usize = MAX_USER_DATA - ADDRESS_FIELD_LEN;

/// Size of the magic number and type tag.
pub const HEADER_SIZE: usize = 4;

/// Size of every datagram on the wire.
pub const MESSAGE_SIZE: usize = HEADER_SIZE + MAX_USER_DATA;
