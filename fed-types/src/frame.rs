//! Frame - the versioned transport wrapper for all federation messages.

use serde::{Deserialize, Serialize};

use crate::{Message, WireError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message type discriminator for frame routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Identity exchange
    Handshake = 1,
    /// Page request
    SyncRequest = 2,
    /// Page of content
    SyncPayload = 3,
    /// Push acknowledgement
    SyncAck = 4,
    /// Refusal
    Reject = 5,
}

impl MessageType {
    /// Discriminator for a message.
    pub fn of(message: &Message) -> Self {
        match message {
            Message::Handshake(_) => MessageType::Handshake,
            Message::SyncRequest(_) => MessageType::SyncRequest,
            Message::SyncPayload(_) => MessageType::SyncPayload,
            Message::SyncAck(_) => MessageType::SyncAck,
            Message::Reject(_) => MessageType::Reject,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Handshake),
            2 => Ok(MessageType::SyncRequest),
            3 => Ok(MessageType::SyncPayload),
            4 => Ok(MessageType::SyncAck),
            5 => Ok(MessageType::Reject),
            _ => Err(WireError::InvalidMessageType(value)),
        }
    }
}

/// The frame wraps every protocol message with version and type metadata.
///
/// This is the outer layer a transport moves around. Signatures live on the
/// inner message, so a frame can be re-encoded without invalidating them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Protocol version (currently 1)
    pub version: u8,
    /// Message type discriminator
    pub msg_type: u8,
    /// MessagePack-encoded inner message
    pub body: Vec<u8>,
}

impl Frame {
    /// Wrap a message.
    pub fn seal(message: &Message) -> Result<Self, WireError> {
        let body = rmp_serde::to_vec_named(message).map_err(WireError::Serialization)?;
        Ok(Self {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::of(message) as u8,
            body,
        })
    }

    /// Unwrap the message, checking version and discriminator.
    pub fn open(&self) -> Result<Message, WireError> {
        if self.version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(self.version));
        }
        let declared = MessageType::try_from(self.msg_type)?;
        let message: Message =
            rmp_serde::from_slice(&self.body).map_err(WireError::Deserialization)?;
        let actual = MessageType::of(&message);
        if actual != declared {
            return Err(WireError::TypeMismatch {
                frame: declared as u8,
                message: actual as u8,
            });
        }
        Ok(message)
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec_named(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }

    /// Encode a message straight to bytes.
    pub fn encode(message: &Message) -> Result<Vec<u8>, WireError> {
        Self::seal(message)?.to_bytes()
    }

    /// Decode bytes straight to a message.
    pub fn decode(bytes: &[u8]) -> Result<Message, WireError> {
        Self::from_bytes(bytes)?.open()
    }
}
