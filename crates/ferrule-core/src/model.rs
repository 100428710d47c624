//! Service metadata, request and response definitions

use serde::{Deserialize, Serialize};

use crate::{RpcError, RpcResult};

/// Default service version
pub const DEFAULT_SERVICE_VERSION: &str = "1.0";

/// Default service group
pub const DEFAULT_SERVICE_GROUP: &str = "default";

/// Registration record of one provider instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceMetaInfo {
    /// Logical service name
    pub service_name: String,
    /// Service version
    #[serde(default = "default_version")]
    pub service_version: String,
    /// Provider host
    pub service_host: String,
    /// Provider port
    pub service_port: u16,
    /// Service group (carried, not used for routing)
    #[serde(default = "default_group")]
    pub service_group: String,
}

fn default_version() -> String {
    DEFAULT_SERVICE_VERSION.to_string()
}

fn default_group() -> String {
    DEFAULT_SERVICE_GROUP.to_string()
}

impl ServiceMetaInfo {
    /// Create metadata for a provider instance with the default version and group
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: default_version(),
            service_host: host.into(),
            service_port: port,
            service_group: default_group(),
        }
    }

    /// Override the version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Logical identity of the service: `name:version`
    pub fn service_key(&self) -> String {
        service_key(&self.service_name, &self.service_version)
    }

    /// Key of this instance in the registry: `name:version:version:host`
    ///
    /// The version appears twice; existing registrations depend on this shape.
    pub fn service_node_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.service_key(),
            self.service_version,
            self.service_host
        )
    }

    /// Socket address of the provider
    pub fn service_address(&self) -> String {
        format!("{}:{}", self.service_host, self.service_port)
    }
}

/// Build a service key from its parts
pub fn service_key(name: &str, version: &str) -> String {
    format!("{}:{}", name, version)
}

/// A single method invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Target service name
    pub service_name: String,
    /// Target method name
    pub method_name: String,
    /// Target service version
    pub service_version: String,
    /// Type names of the parameters, in order
    pub parameter_types: Vec<String>,
    /// Arguments, each encoded with the call's serializer
    pub args: Vec<Vec<u8>>,
}

impl Request {
    /// Create a request without arguments for the default version
    pub fn new(service_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            method_name: method_name.into(),
            service_version: default_version(),
            parameter_types: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Override the version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Append an already encoded argument
    pub fn with_arg(mut self, type_name: impl Into<String>, encoded: Vec<u8>) -> Self {
        self.parameter_types.push(type_name.into());
        self.args.push(encoded);
        self
    }

    /// Service key this request is routed by
    pub fn service_key(&self) -> String {
        service_key(&self.service_name, &self.service_version)
    }
}

/// Outcome of a single invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Encoded result, absent for empty or failed calls
    pub data: Option<Vec<u8>>,
    /// Type name of the result
    pub data_type: Option<String>,
    /// Status message
    pub message: String,
    /// Error raised by the invoked method
    pub error: Option<String>,
}

impl Response {
    /// Successful response carrying an encoded result
    pub fn success(data: Vec<u8>, data_type: impl Into<String>) -> Self {
        Self {
            data: Some(data),
            data_type: Some(data_type.into()),
            message: "ok".to_string(),
            error: None,
        }
    }

    /// Response describing a failure of the invoked method
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            data: None,
            data_type: None,
            message: format!("Error: {}", error),
            error: Some(error),
        }
    }

    /// Response with neither data nor error
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the invoked method failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Encoded data, or the carried error as [`RpcError::RemoteExecution`]
    pub fn into_data(self) -> RpcResult<Option<Vec<u8>>> {
        match self.error {
            Some(error) => Err(RpcError::RemoteExecution(error)),
            None => Ok(self.data),
        }
    }
}
