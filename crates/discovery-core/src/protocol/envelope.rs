//! Typed view of the discovery envelope.
//!
//! `Message::encode` always produces a fresh, fully zeroed `MESSAGE_SIZE`
//! buffer, so no scratch state is shared between the two worker loops.

use super::{
    address, ADDRESS_FIELD_LEN, HEADER_SIZE, MAGIC_NUMBER, MAX_NAME_LEN, MAX_USER_DATA,
    MESSAGE_SIZE, MSG_TYPE_BEACON, MSG_TYPE_LEAVE, MSG_TYPE_RESPONSE, MSG_TYPE_USER,
};
use crate::config::ClusterName;
use crate::error::ConfigError;
use std::net::SocketAddr;
use thiserror::Error;

/// Reasons a datagram is not accepted as a discovery message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("Datagram too short: {len} bytes, expected {expected}")]
    Undersized { len: usize, expected: usize },

    #[error("Datagram too long: {len} bytes, expected {expected}")]
    Oversized { len: usize, expected: usize },

    #[error("Bad magic number {0:#06x}")]
    BadMagic(u16),

    #[error("Unknown message type {0}")]
    UnknownType(u16),

    #[error("Unknown address family {0}")]
    AddressFamily(u8),

    #[error("Cluster name is not valid")]
    InvalidName,
}

/// Body of beacon, response and leave messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Cluster the sender belongs to
    pub cluster: ClusterName,
    /// Callback address the sender advertises
    pub response_addr: SocketAddr,
}

impl Announcement {
    pub fn new(cluster: ClusterName, response_addr: SocketAddr) -> Self {
        Self {
            cluster,
            response_addr,
        }
    }
}

/// User payload, zero-padded to `MAX_USER_DATA` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPayload([u8; MAX_USER_DATA]);

impl UserPayload {
    /// Copy `body` into a zeroed payload buffer.
    ///
    /// Fails if `body` is longer than `MAX_USER_DATA`; it is never truncated.
    pub fn new(body: &[u8]) -> Result<Self, ConfigError> {
        if body.len() > MAX_USER_DATA {
            return Err(ConfigError::PayloadTooLarge {
                size: body.len(),
                max: MAX_USER_DATA,
            });
        }
        let mut data = [0u8; MAX_USER_DATA];
        data[..body.len()].copy_from_slice(body);
        Ok(Self(data))
    }

    /// The full fixed-size payload, including trailing zero padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A decoded discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Periodic broadcast asking cluster members to respond
    Beacon(Announcement),
    /// Direct answer to a beacon
    Response(Announcement),
    /// Sender is leaving the cluster
    Leave(Announcement),
    /// Application-defined message
    User { msg_type: u16, payload: UserPayload },
}

impl Message {
    /// Build a user message, validating type and payload size.
    pub fn user(msg_type: u16, body: &[u8]) -> Result<Self, ConfigError> {
        if msg_type < MSG_TYPE_USER {
            return Err(ConfigError::ReservedMessageType {
                msg_type,
                min: MSG_TYPE_USER,
            });
        }
        Ok(Self::User {
            msg_type,
            payload: UserPayload::new(body)?,
        })
    }

    /// Type tag as written on the wire.
    pub fn msg_type(&self) -> u16 {
        match self {
            Self::Beacon(_) => MSG_TYPE_BEACON,
            Self::Response(_) => MSG_TYPE_RESPONSE,
            Self::Leave(_) => MSG_TYPE_LEAVE,
            Self::User { msg_type, .. } => *msg_type,
        }
    }

    /// Short name for log output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Beacon(_) => "beacon",
            Self::Response(_) => "response",
            Self::Leave(_) => "leave",
            Self::User { .. } => "user",
        }
    }

    /// Serialize into a new fixed-size datagram.
    pub fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let mut buf = [0u8; MESSAGE_SIZE];
        buf[0..2].copy_from_slice(&MAGIC_NUMBER.to_be_bytes());
        buf[2..4].copy_from_slice(&self.msg_type().to_be_bytes());

        let body = &mut buf[HEADER_SIZE..];
        match self {
            Self::Beacon(a) | Self::Response(a) | Self::Leave(a) => {
                address::encode(&a.response_addr, &mut body[..ADDRESS_FIELD_LEN]);
                let name = a.cluster.as_bytes();
                body[ADDRESS_FIELD_LEN..ADDRESS_FIELD_LEN + name.len()].copy_from_slice(name);
            }
            Self::User { payload, .. } => {
                body.copy_from_slice(payload.as_bytes());
            }
        }
        buf
    }

    /// Parse a received datagram.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < MESSAGE_SIZE {
            return Err(WireError::Undersized {
                len: data.len(),
                expected: MESSAGE_SIZE,
            });
        }
        if data.len() > MESSAGE_SIZE {
            return Err(WireError::Oversized {
                len: data.len(),
                expected: MESSAGE_SIZE,
            });
        }

        let magic = u16::from_be_bytes([data[0], data[1]]);
        if magic != MAGIC_NUMBER {
            return Err(WireError::BadMagic(magic));
        }

        let msg_type = u16::from_be_bytes([data[2], data[3]]);
        let body = &data[HEADER_SIZE..];

        match msg_type {
            MSG_TYPE_BEACON => Ok(Self::Beacon(decode_announcement(body)?)),
            MSG_TYPE_RESPONSE => Ok(Self::Response(decode_announcement(body)?)),
            MSG_TYPE_LEAVE => Ok(Self::Leave(decode_announcement(body)?)),
            t if t >= MSG_TYPE_USER => {
                let mut payload = [0u8; MAX_USER_DATA];
                payload.copy_from_slice(body);
                Ok(Self::User {
                    msg_type: t,
                    payload: UserPayload(payload),
                })
            }
            t => Err(WireError::UnknownType(t)),
        }
    }
}

fn decode_announcement(body: &[u8]) -> Result<Announcement, WireError> {
    let response_addr =
        address::decode(&body[..ADDRESS_FIELD_LEN]).map_err(WireError::AddressFamily)?;

    let field = &body[ADDRESS_FIELD_LEN..ADDRESS_FIELD_LEN + MAX_NAME_LEN];
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    let name = std::str::from_utf8(&field[..end]).map_err(|_| WireError::InvalidName)?;
    let cluster = ClusterName::new(name).map_err(|_| WireError::InvalidName)?;

    Ok(Announcement {
        cluster,
        response_addr,
    })
}
