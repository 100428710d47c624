//! Frame encoding and decoding
//!
//! # Wire format
//!
//! ```text
//! +-------+---------+------------+------+--------+------------+-------------+----------+
//! | magic | version | serializer | type | status | request id | body length | body ... |
//! |  u8   |   u8    |     u8     |  u8  |   u8   |    u64     |     u32     |          |
//! +-------+---------+------------+------+--------+------------+-------------+----------+
//! ```
//!
//! All integers are big-endian. The body is exactly `body length` bytes,
//! encoded with the serializer named by the selector byte.

use bytes::{Buf, BufMut, BytesMut};
use ferrule_core::{Request, Response, RpcError, RpcResult, SerializerKind};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::{
    Header, MessageBody, MessageStatus, MessageType, ProtocolMessage, HEADER_LENGTH,
    MAX_BODY_LENGTH, PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
use crate::serializer::{serializer_for, Serializer};

/// Encode a frame into a new buffer
pub fn encode(message: &ProtocolMessage) -> RpcResult<BytesMut> {
    let mut dst = BytesMut::new();
    encode_into(message, &mut dst)?;
    Ok(dst)
}

/// Append an encoded frame to `dst`
///
/// The body length written to the wire is the size of the encoded body.
pub fn encode_into(message: &ProtocolMessage, dst: &mut BytesMut) -> RpcResult<()> {
    let header = &message.header;
    if header.message_type != message.body.message_type() {
        return Err(RpcError::Protocol(format!(
            "header type {:?} does not match body {:?}",
            header.message_type,
            message.body.message_type()
        )));
    }

    let body = encode_body(header.serializer, &message.body)?;
    if body.len() > MAX_BODY_LENGTH {
        return Err(RpcError::Protocol(format!(
            "body of {} bytes exceeds limit of {}",
            body.len(),
            MAX_BODY_LENGTH
        )));
    }

    dst.reserve(HEADER_LENGTH + body.len());
    dst.put_u8(header.magic);
    dst.put_u8(header.version);
    dst.put_u8(header.serializer.id());
    dst.put_u8(header.message_type.as_u8());
    dst.put_u8(header.status.as_u8());
    dst.put_u64(header.request_id);
    dst.put_u32(body.len() as u32);
    dst.put_slice(&body);
    Ok(())
}

fn encode_body(kind: SerializerKind, body: &MessageBody) -> RpcResult<Vec<u8>> {
    let serializer = serializer_for(kind);
    match body {
        MessageBody::Request(request) => serializer.serialize(request),
        MessageBody::Response(response) => serializer.serialize(response),
        MessageBody::Heartbeat => Ok(Vec::new()),
        MessageBody::Other(raw) => Ok(raw.clone()),
    }
}

/// Decode and validate a frame header, returning it with the announced body
/// length
pub fn decode_header(mut src: &[u8]) -> RpcResult<(Header, usize)> {
    if src.len() < HEADER_LENGTH {
        return Err(RpcError::Protocol(format!(
            "incomplete header: {} of {} bytes",
            src.len(),
            HEADER_LENGTH
        )));
    }

    let magic = src.get_u8();
    if magic != PROTOCOL_MAGIC {
        return Err(RpcError::Protocol(format!("bad magic: {:#04x}", magic)));
    }
    let version = src.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(RpcError::Protocol(format!("unsupported version: {}", version)));
    }
    let selector = src.get_u8();
    let serializer = SerializerKind::from_id(selector)
        .ok_or_else(|| RpcError::Protocol(format!("unknown serializer: {}", selector)))?;
    let message_type = MessageType::try_from(src.get_u8())?;
    let status = MessageStatus::try_from(src.get_u8())?;
    let request_id = src.get_u64();
    let body_length = src.get_u32();

    if body_length as usize > MAX_BODY_LENGTH {
        return Err(RpcError::Protocol(format!(
            "body of {} bytes exceeds limit of {}",
            body_length, MAX_BODY_LENGTH
        )));
    }

    let header = Header {
        magic,
        version,
        serializer,
        message_type,
        status,
        request_id,
    };
    Ok((header, body_length as usize))
}

/// Decode exactly one frame from `src`
pub fn decode(src: &[u8]) -> RpcResult<ProtocolMessage> {
    let (header, body_length) = decode_header(src)?;
    let total = HEADER_LENGTH + body_length;
    if src.len() != total {
        return Err(RpcError::Protocol(format!(
            "frame is {} bytes, header announces {}",
            src.len(),
            total
        )));
    }

    let body = decode_body(&header, &src[HEADER_LENGTH..])?;
    Ok(ProtocolMessage { header, body })
}

fn decode_body(header: &Header, bytes: &[u8]) -> RpcResult<MessageBody> {
    let serializer = serializer_for(header.serializer);
    let corrupt = |e: RpcError| RpcError::Protocol(format!("undecodable body: {}", e));

    match header.message_type {
        MessageType::Request => serializer
            .deserialize::<Request>(bytes)
            .map(MessageBody::Request)
            .map_err(corrupt),
        MessageType::Response => serializer
            .deserialize::<Response>(bytes)
            .map(MessageBody::Response)
            .map_err(corrupt),
        MessageType::Heartbeat if bytes.is_empty() => Ok(MessageBody::Heartbeat),
        MessageType::Heartbeat => Err(RpcError::Protocol(
            "heartbeat frame with a body".to_string(),
        )),
        MessageType::Other => Ok(MessageBody::Other(bytes.to_vec())),
    }
}

/// Streaming codec for framed sockets
///
/// Buffers partial reads until a whole frame is available and splits
/// coalesced frames apart.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = ProtocolMessage;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LENGTH {
            src.reserve(HEADER_LENGTH - src.len());
            return Ok(None);
        }

        let (_, body_length) = decode_header(&src[..HEADER_LENGTH])?;
        let total = HEADER_LENGTH + body_length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        decode(&frame).map(Some)
    }
}

impl Encoder<ProtocolMessage> for FrameCodec {
    type Error = RpcError;

    fn encode(&mut self, item: ProtocolMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn sample_request(kind: SerializerKind) -> ProtocolMessage {
        let arg = serializer_for(kind).serialize("foo").unwrap();
        ProtocolMessage::request(
            Request::new("UserService", "get_user").with_arg("&str", arg),
            kind,
        )
    }

    #[test]
    fn test_request_and_response_survive_encoding() {
        for kind in [
            SerializerKind::Bincode,
            SerializerKind::Json,
            SerializerKind::Postcard,
            SerializerKind::MessagePack,
        ] {
            let request = sample_request(kind);
            let bytes = encode(&request).unwrap();
            let decoded = decode(&bytes).unwrap();
            assert_eq!(decoded.body, request.body);
            assert_eq!(decoded.header.request_id, request.header.request_id);
            assert_eq!(decoded.header.serializer, kind);

            let response = request.reply(
                MessageStatus::Ok,
                MessageBody::Response(Response::success(vec![3, 1, 4], "User")),
            );
            let decoded = decode(&encode(&response).unwrap()).unwrap();
            assert_eq!(decoded.body, response.body);
            assert_eq!(decoded.header.message_type, MessageType::Response);
        }
    }

    #[test]
    fn test_decode_reproduces_encoded_message() {
        for kind in [
            SerializerKind::Bincode,
            SerializerKind::Json,
            SerializerKind::Postcard,
            SerializerKind::MessagePack,
        ] {
            let request = sample_request(kind);
            assert_eq!(decode(&encode(&request).unwrap()).unwrap(), request);

            let failure = request.reply(
                MessageStatus::BadResponse,
                MessageBody::Response(Response::failure("user not found")),
            );
            assert_eq!(decode(&encode(&failure).unwrap()).unwrap(), failure);

            let heartbeat = ProtocolMessage::heartbeat(kind);
            assert_eq!(decode(&encode(&heartbeat).unwrap()).unwrap(), heartbeat);
        }
    }

    #[test]
    fn test_body_length_matches_payload() {
        let message = sample_request(SerializerKind::Json);
        let bytes = encode(&message).unwrap();
        let (_, body_length) = decode_header(&bytes).unwrap();
        assert_eq!(body_length, bytes.len() - HEADER_LENGTH);
    }

    #[test]
    fn test_header_layout() {
        let mut message = ProtocolMessage::heartbeat(SerializerKind::Postcard);
        message.header.request_id = 0x0102_0304_0506_0708;
        let bytes = encode(&message).unwrap();
        assert_eq!(
            &bytes[..],
            &[0x01, 0x01, 2, 2, 20, 1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0]
        );
        assert_eq!(decode(&bytes).unwrap().body, MessageBody::Heartbeat);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode(&sample_request(SerializerKind::Bincode)).unwrap();
        bytes[0] = 0x7f;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ref m) if m.contains("magic")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unknown_selector_and_type_rejected() {
        let mut bytes = encode(&sample_request(SerializerKind::Bincode)).unwrap();
        bytes[2] = 42;
        assert!(matches!(decode(&bytes), Err(RpcError::Protocol(_))));

        let mut bytes = encode(&sample_request(SerializerKind::Bincode)).unwrap();
        bytes[3] = 42;
        assert!(matches!(decode(&bytes), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_truncated_and_corrupt_frames() {
        let bytes = encode(&sample_request(SerializerKind::Bincode)).unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(RpcError::Protocol(_))
        ));
        assert!(matches!(decode(&bytes[..5]), Err(RpcError::Protocol(_))));

        // announce a request but ship garbage
        let mut garbage = bytes[..HEADER_LENGTH].to_vec();
        garbage[13..17].copy_from_slice(&3u32.to_be_bytes());
        garbage.extend_from_slice(&[0xff, 0xff, 0xff]);
        assert!(matches!(decode(&garbage), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_mismatched_header_type_rejected() {
        let mut message = sample_request(SerializerKind::Json);
        message.header.message_type = MessageType::Response;
        assert!(matches!(encode(&message), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_oversized_body_rejected() {
        let mut bytes = encode(&ProtocolMessage::heartbeat(SerializerKind::Json)).unwrap();
        bytes[13..17].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(decode_header(&bytes), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_frame_codec_waits_for_whole_frame() {
        let message = sample_request(SerializerKind::MessagePack);
        let bytes = encode(&message).unwrap();

        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&bytes[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[10..bytes.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[bytes.len() - 1..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.body, message.body);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_frame_codec_over_stream() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(client, FrameCodec);
        let mut reader = FramedRead::new(server, FrameCodec);

        let first = sample_request(SerializerKind::Postcard);
        let second = ProtocolMessage::heartbeat(SerializerKind::Bincode);
        let expected = vec![first.body.clone(), second.body.clone()];

        tokio::spawn(async move {
            writer.send(first).await.unwrap();
            writer.send(second).await.unwrap();
        });

        let mut received = Vec::new();
        while received.len() < 2 {
            received.push(reader.next().await.unwrap().unwrap().body);
        }
        assert_eq!(received, expected);
    }
}
