//! ferrule-protocol: Wire protocol
//!
//! This crate provides the byte-level contract between consumers and providers:
//! - Fixed 17-byte frame header
//! - Pluggable payload serializers selected per message
//! - Frame encoding/decoding and a streaming codec for sockets

pub mod codec;
pub mod message;
pub mod serializer;

pub use codec::{decode, encode, FrameCodec};
pub use message::{Header, MessageBody, MessageStatus, MessageType, ProtocolMessage};
pub use serializer::{serializer_for, AnySerializer, Serializer};
