//! Protocol message definitions

use ferrule_core::{Request, Response, RpcError, SerializerKind};
use uuid::Uuid;

/// Magic byte opening every frame
pub const PROTOCOL_MAGIC: u8 = 0x01;

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Encoded header size in bytes
pub const HEADER_LENGTH: usize = 17;

/// Largest body accepted by the decoder
pub const MAX_BODY_LENGTH: usize = 16 * 1024 * 1024;

/// Kind of payload a frame carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    Heartbeat,
    Other,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 1,
            MessageType::Heartbeat => 2,
            MessageType::Other => 3,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = RpcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::Heartbeat),
            3 => Ok(MessageType::Other),
            other => Err(RpcError::Protocol(format!("unknown message type: {}", other))),
        }
    }
}

/// Frame status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Ok,
    BadRequest,
    BadResponse,
}

impl MessageStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            MessageStatus::Ok => 20,
            MessageStatus::BadRequest => 40,
            MessageStatus::BadResponse => 50,
        }
    }
}

impl TryFrom<u8> for MessageStatus {
    type Error = RpcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            20 => Ok(MessageStatus::Ok),
            40 => Ok(MessageStatus::BadRequest),
            50 => Ok(MessageStatus::BadResponse),
            other => Err(RpcError::Protocol(format!("unknown status: {}", other))),
        }
    }
}

/// Frame header
///
/// The body length is a wire-only field: the encoder derives it from the
/// encoded body and the decoder uses it to delimit the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic byte, always [`PROTOCOL_MAGIC`] for valid frames
    pub magic: u8,
    /// Protocol version
    pub version: u8,
    /// Serializer used for the body
    pub serializer: SerializerKind,
    /// Kind of body
    pub message_type: MessageType,
    /// Frame status
    pub status: MessageStatus,
    /// Correlation id pairing a response with its request
    pub request_id: u64,
}

impl Header {
    /// Create a header with a fresh correlation id
    pub fn new(message_type: MessageType, serializer: SerializerKind) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            serializer,
            message_type,
            status: MessageStatus::Ok,
            request_id: next_request_id(),
        }
    }

    /// Header answering this one, reusing its correlation id and serializer
    pub fn reply(&self, status: MessageStatus, message_type: MessageType) -> Self {
        Self {
            message_type,
            status,
            ..*self
        }
    }
}

/// Generate a correlation id
pub fn next_request_id() -> u64 {
    Uuid::new_v4().as_u64_pair().0
}

/// Frame body, matching the header's message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Request(Request),
    Response(Response),
    Heartbeat,
    Other(Vec<u8>),
}

impl MessageBody {
    /// Message type announced in the header for this body
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Request(_) => MessageType::Request,
            MessageBody::Response(_) => MessageType::Response,
            MessageBody::Heartbeat => MessageType::Heartbeat,
            MessageBody::Other(_) => MessageType::Other,
        }
    }
}

/// A complete frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub header: Header,
    pub body: MessageBody,
}

impl ProtocolMessage {
    /// Request frame with a fresh correlation id
    pub fn request(request: Request, serializer: SerializerKind) -> Self {
        Self {
            header: Header::new(MessageType::Request, serializer),
            body: MessageBody::Request(request),
        }
    }

    /// Heartbeat frame with a fresh correlation id
    pub fn heartbeat(serializer: SerializerKind) -> Self {
        Self {
            header: Header::new(MessageType::Heartbeat, serializer),
            body: MessageBody::Heartbeat,
        }
    }

    /// Reply to this frame, reusing its correlation id and serializer
    pub fn reply(&self, status: MessageStatus, body: MessageBody) -> Self {
        Self {
            header: self.header.reply(status, body.message_type()),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_and_status_bytes() {
        for t in [
            MessageType::Request,
            MessageType::Response,
            MessageType::Heartbeat,
            MessageType::Other,
        ] {
            assert_eq!(MessageType::try_from(t.as_u8()).unwrap(), t);
        }
        assert!(matches!(MessageType::try_from(9), Err(RpcError::Protocol(_))));
        assert_eq!(MessageStatus::try_from(50).unwrap(), MessageStatus::BadResponse);
        assert!(MessageStatus::try_from(0).is_err());
    }

    #[test]
    fn test_reply_keeps_correlation() {
        let request = ProtocolMessage::request(Request::new("a", "b"), SerializerKind::Json);
        let reply = request.reply(
            MessageStatus::Ok,
            MessageBody::Response(Response::success(vec![], "()")),
        );
        assert_eq!(reply.header.request_id, request.header.request_id);
        assert_eq!(reply.header.serializer, SerializerKind::Json);
        assert_eq!(reply.header.message_type, MessageType::Response);
    }

    #[test]
    fn test_request_ids_differ() {
        assert_ne!(next_request_id(), next_request_id());
    }
}
