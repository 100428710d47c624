//! Configuration types for ferrule

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::{RpcError, RpcResult};

/// Environment variable prefix used by [`RpcConfig::load`]
pub const ENV_PREFIX: &str = "FERRULE";

/// Main runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Application name
    pub name: String,
    /// Default service version
    pub version: String,
    /// Provider server configuration
    pub server: ServerConfig,
    /// Skip the network path and return default values
    pub mock: bool,
    /// Payload serializer
    pub serializer: SerializerKind,
    /// Load balancing strategy
    pub load_balancer: LoadBalanceStrategy,
    /// Retry strategy
    pub retry_strategy: RetryStrategyKind,
    /// Tolerant strategy
    pub tolerant_strategy: TolerantStrategyKind,
    /// Registry configuration
    pub registry: RegistryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            name: "ferrule".to_string(),
            version: "1.0".to_string(),
            server: ServerConfig::default(),
            mock: false,
            serializer: SerializerKind::Bincode,
            load_balancer: LoadBalanceStrategy::RoundRobin,
            retry_strategy: RetryStrategyKind::FixedInterval,
            tolerant_strategy: TolerantStrategyKind::FailFast,
            registry: RegistryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RpcConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> RpcResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RpcError::Configuration(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| RpcError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Layer defaults, an optional TOML file and `FERRULE_*` environment variables
    ///
    /// Nested keys use a double underscore, e.g. `FERRULE_SERVER__PORT=9000`.
    pub fn load(path: Option<&Path>) -> RpcResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&RpcConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}

/// Provider server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host advertised in the registry and bound by the server
    pub host: String,
    /// Port advertised in the registry and bound by the server
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry backend
    pub kind: RegistryKind,
    /// Store address (comma separated for several endpoints)
    pub address: String,
    /// Optional user name
    pub username: Option<String>,
    /// Optional password
    pub password: Option<String>,
    /// Connect timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: RegistryKind::Etcd,
            address: "http://localhost:2379".to_string(),
            username: None,
            password: None,
            timeout_ms: 1000,
        }
    }
}

impl RegistryConfig {
    /// Store endpoints parsed from `address`
    pub fn endpoints(&self) -> Vec<String> {
        self.address
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resolve a configuration key against a static key table
fn resolve_key<T: Copy>(table: &[(&str, T)], kind: &str, key: &str) -> RpcResult<T> {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key.trim()))
        .map(|(_, value)| *value)
        .ok_or_else(|| RpcError::Configuration(format!("unknown {}: {}", kind, key)))
}

/// Name of a value in a static key table
fn key_name<T: PartialEq>(table: &[(&'static str, T)], value: &T) -> &'static str {
    table
        .iter()
        .find(|(_, v)| v == value)
        .map(|(name, _)| *name)
        .unwrap_or("unknown")
}

macro_rules! keyed_enum {
    ($ty:ident, $kind:literal, $table:ident) => {
        impl FromStr for $ty {
            type Err = RpcError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                resolve_key($table, $kind, s)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(key_name($table, self))
            }
        }
    };
}

/// Payload serializer selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerializerKind {
    /// General purpose binary format
    #[serde(rename = "bincode")]
    Bincode,
    /// JSON text
    #[serde(rename = "json")]
    Json,
    /// Compact high-performance binary format
    #[serde(rename = "postcard")]
    Postcard,
    /// Cross-language MessagePack
    #[serde(rename = "msgpack")]
    MessagePack,
}

const SERIALIZER_KEYS: &[(&str, SerializerKind)] = &[
    ("bincode", SerializerKind::Bincode),
    ("json", SerializerKind::Json),
    ("postcard", SerializerKind::Postcard),
    ("msgpack", SerializerKind::MessagePack),
];

keyed_enum!(SerializerKind, "serializer", SERIALIZER_KEYS);

impl SerializerKind {
    /// Selector byte carried in the wire header
    pub fn id(self) -> u8 {
        match self {
            SerializerKind::Bincode => 0,
            SerializerKind::Json => 1,
            SerializerKind::Postcard => 2,
            SerializerKind::MessagePack => 3,
        }
    }

    /// Resolve a selector byte from the wire header
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(SerializerKind::Bincode),
            1 => Some(SerializerKind::Json),
            2 => Some(SerializerKind::Postcard),
            3 => Some(SerializerKind::MessagePack),
            _ => None,
        }
    }
}

/// Load balancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalanceStrategy {
    /// Process-wide rotation over the candidates
    RoundRobin,
    /// Uniform random choice
    Random,
    /// Consistent hashing of the routing parameters
    ConsistentHash,
}

const LOAD_BALANCER_KEYS: &[(&str, LoadBalanceStrategy)] = &[
    ("round-robin", LoadBalanceStrategy::RoundRobin),
    ("random", LoadBalanceStrategy::Random),
    ("consistent-hash", LoadBalanceStrategy::ConsistentHash),
];

keyed_enum!(LoadBalanceStrategy, "load balancer", LOAD_BALANCER_KEYS);

/// Retry strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategyKind {
    /// Invoke once
    No,
    /// Fixed number of attempts with a fixed delay
    FixedInterval,
}

const RETRY_KEYS: &[(&str, RetryStrategyKind)] = &[
    ("no", RetryStrategyKind::No),
    ("fixed-interval", RetryStrategyKind::FixedInterval),
];

keyed_enum!(RetryStrategyKind, "retry strategy", RETRY_KEYS);

/// Tolerant strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TolerantStrategyKind {
    /// Re-raise the failure
    FailFast,
    /// Log the failure and return an empty result
    FailSafe,
}

const TOLERANT_KEYS: &[(&str, TolerantStrategyKind)] = &[
    ("fail-fast", TolerantStrategyKind::FailFast),
    ("fail-safe", TolerantStrategyKind::FailSafe),
];

keyed_enum!(TolerantStrategyKind, "tolerant strategy", TOLERANT_KEYS);

/// Registry backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// etcd coordination store
    Etcd,
    /// In-process store
    ///
    /// Every registry of the process shares one store, so providers and
    /// consumers in the same process see each other. Destroying any of those
    /// registries closes the store for all of them.
    Memory,
}

const REGISTRY_KEYS: &[(&str, RegistryKind)] = &[
    ("etcd", RegistryKind::Etcd),
    ("memory", RegistryKind::Memory),
];

keyed_enum!(RegistryKind, "registry", REGISTRY_KEYS);
