//! Payload serializers
//!
//! The serializer for a frame is chosen per message by the selector byte in
//! its header. Every variant is reachable through [`serializer_for`], which
//! hands out process-wide instances that are safe to share between tasks.

use ferrule_core::{RpcError, RpcResult, SerializerKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Mutex, OnceLock};

/// Encodes values to bytes and back
pub trait Serializer: Send + Sync {
    /// Encode a value
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> RpcResult<Vec<u8>>;

    /// Decode a value; the whole input must be consumed
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> RpcResult<T>;
}

/// bincode with the standard configuration
#[derive(Debug, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> RpcResult<Vec<u8>> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| RpcError::Serialization(format!("bincode encode: {}", e)))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> RpcResult<T> {
        let (value, read) =
            bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard())
                .map_err(|e| RpcError::Serialization(format!("bincode decode: {}", e)))?;
        ensure_consumed(read, bytes.len())?;
        Ok(value)
    }
}

/// JSON text
#[derive(Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> RpcResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> RpcResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Initial capacity of a pooled scratch buffer
const SCRATCH_CAPACITY: usize = 1024;

/// Idle scratch buffers kept by a pool
const SCRATCH_MAX_IDLE: usize = 64;

/// Scratch buffers handed out to one encoder at a time
#[derive(Debug, Default)]
struct ScratchPool {
    idle: Mutex<Vec<Vec<u8>>>,
}

impl ScratchPool {
    fn checkout(&self) -> Vec<u8> {
        self.idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(SCRATCH_CAPACITY))
    }

    fn give_back(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < SCRATCH_MAX_IDLE {
            idle.push(buffer);
        }
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// postcard, encoding through pooled scratch buffers
///
/// A scratch buffer is owned by exactly one encode at a time, so concurrent
/// calls never share encoder state.
#[derive(Debug, Default)]
pub struct PostcardSerializer {
    pool: ScratchPool,
}

impl Serializer for PostcardSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> RpcResult<Vec<u8>> {
        let scratch = self.pool.checkout();
        let scratch = postcard::to_extend(value, scratch)
            .map_err(|e| RpcError::Serialization(format!("postcard encode: {}", e)))?;
        let encoded = scratch.as_slice().to_vec();
        self.pool.give_back(scratch);
        Ok(encoded)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> RpcResult<T> {
        let (value, rest) = postcard::take_from_bytes::<T>(bytes)
            .map_err(|e| RpcError::Serialization(format!("postcard decode: {}", e)))?;
        ensure_consumed(bytes.len() - rest.len(), bytes.len())?;
        Ok(value)
    }
}

/// MessagePack with named fields, readable from other languages
#[derive(Debug, Default)]
pub struct MessagePackSerializer;

impl Serializer for MessagePackSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> RpcResult<Vec<u8>> {
        rmp_serde::to_vec_named(value)
            .map_err(|e| RpcError::Serialization(format!("msgpack encode: {}", e)))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> RpcResult<T> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| RpcError::Serialization(format!("msgpack decode: {}", e)))
    }
}

fn ensure_consumed(read: usize, total: usize) -> RpcResult<()> {
    if read != total {
        return Err(RpcError::Serialization(format!(
            "{} trailing bytes after payload",
            total - read
        )));
    }
    Ok(())
}

/// Any of the supported serializers
#[derive(Debug)]
pub enum AnySerializer {
    Bincode(BincodeSerializer),
    Json(JsonSerializer),
    Postcard(PostcardSerializer),
    MessagePack(MessagePackSerializer),
}

impl AnySerializer {
    /// Create a fresh serializer of the given kind
    pub fn new(kind: SerializerKind) -> Self {
        match kind {
            SerializerKind::Bincode => AnySerializer::Bincode(BincodeSerializer),
            SerializerKind::Json => AnySerializer::Json(JsonSerializer),
            SerializerKind::Postcard => AnySerializer::Postcard(PostcardSerializer::default()),
            SerializerKind::MessagePack => AnySerializer::MessagePack(MessagePackSerializer),
        }
    }

    /// Kind of this serializer
    pub fn kind(&self) -> SerializerKind {
        match self {
            AnySerializer::Bincode(_) => SerializerKind::Bincode,
            AnySerializer::Json(_) => SerializerKind::Json,
            AnySerializer::Postcard(_) => SerializerKind::Postcard,
            AnySerializer::MessagePack(_) => SerializerKind::MessagePack,
        }
    }
}

impl Serializer for AnySerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> RpcResult<Vec<u8>> {
        match self {
            AnySerializer::Bincode(s) => s.serialize(value),
            AnySerializer::Json(s) => s.serialize(value),
            AnySerializer::Postcard(s) => s.serialize(value),
            AnySerializer::MessagePack(s) => s.serialize(value),
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> RpcResult<T> {
        match self {
            AnySerializer::Bincode(s) => s.deserialize(bytes),
            AnySerializer::Json(s) => s.deserialize(bytes),
            AnySerializer::Postcard(s) => s.deserialize(bytes),
            AnySerializer::MessagePack(s) => s.deserialize(bytes),
        }
    }
}

/// Shared serializer instance for a kind
pub fn serializer_for(kind: SerializerKind) -> &'static AnySerializer {
    static SERIALIZERS: OnceLock<[AnySerializer; 4]> = OnceLock::new();

    let table = SERIALIZERS.get_or_init(|| {
        [
            AnySerializer::new(SerializerKind::Bincode),
            AnySerializer::new(SerializerKind::Json),
            AnySerializer::new(SerializerKind::Postcard),
            AnySerializer::new(SerializerKind::MessagePack),
        ]
    });
    &table[kind.id() as usize]
}
