//! Service trait and the local service map

use async_trait::async_trait;
use dashmap::DashMap;
use ferrule_core::{
    service_key, Request, Response, RpcError, RpcResult, SerializerKind, DEFAULT_SERVICE_VERSION,
};
use ferrule_protocol::{serializer_for, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Arguments of one invocation, still encoded with the caller's serializer
#[derive(Debug, Clone)]
pub struct Arguments {
    serializer: SerializerKind,
    parameter_types: Vec<String>,
    args: Vec<Vec<u8>>,
}

impl Arguments {
    /// Wrap encoded arguments
    pub fn new(serializer: SerializerKind, parameter_types: Vec<String>, args: Vec<Vec<u8>>) -> Self {
        Self {
            serializer,
            parameter_types,
            args,
        }
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Declared type name of an argument
    pub fn parameter_type(&self, index: usize) -> Option<&str> {
        self.parameter_types.get(index).map(String::as_str)
    }

    /// Decode the argument at `index`
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> RpcResult<T> {
        let bytes = self.args.get(index).ok_or_else(|| {
            RpcError::Serialization(format!(
                "missing argument {} of {}",
                index,
                self.args.len()
            ))
        })?;
        serializer_for(self.serializer).deserialize(bytes)
    }

    /// Raw bytes of the argument at `index`
    pub fn raw(&self, index: usize) -> Option<&[u8]> {
        self.args.get(index).map(Vec::as_slice)
    }

    /// Encode a return value with the caller's serializer
    pub fn reply<T: Serialize>(&self, value: &T) -> RpcResult<Reply> {
        Ok(Reply {
            data: serializer_for(self.serializer).serialize(value)?,
            data_type: std::any::type_name::<T>().to_string(),
        })
    }

    /// Serializer the caller chose
    pub fn serializer(&self) -> SerializerKind {
        self.serializer
    }
}

/// Encoded return value of an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub data: Vec<u8>,
    pub data_type: String,
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        Response::success(reply.data, reply.data_type)
    }
}

/// Error for a method a service does not provide
pub fn unknown_method(service: &str, method: &str) -> RpcError {
    RpcError::RemoteExecution(format!("{} has no method {}", service, method))
}

/// A service hosted by a provider
#[async_trait]
pub trait Service: Send + Sync {
    /// Logical service name
    fn name(&self) -> &str;

    /// Service version
    fn version(&self) -> &str {
        DEFAULT_SERVICE_VERSION
    }

    /// Invoke a method
    async fn call(&self, method: &str, args: Arguments) -> RpcResult<Reply>;
}

/// Services hosted by this process, indexed by service key
#[derive(Default)]
pub struct ServiceMap {
    services: DashMap<String, Arc<dyn Service>>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host a service, replacing any previous one with the same key
    pub fn register(&self, service: Arc<dyn Service>) {
        let key = service_key(service.name(), service.version());
        info!(service_key = %key, "Hosting service");
        self.services.insert(key, service);
    }

    /// Stop hosting a service
    pub fn remove(&self, service_key: &str) -> Option<Arc<dyn Service>> {
        self.services.remove(service_key).map(|(_, service)| service)
    }

    pub fn get(&self, service_key: &str) -> Option<Arc<dyn Service>> {
        self.services
            .get(service_key)
            .map(|entry| entry.value().clone())
    }

    /// Keys of every hosted service
    pub fn keys(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Route a request to the hosted service it names
    pub async fn dispatch(
        &self,
        request: Request,
        serializer: SerializerKind,
    ) -> RpcResult<Response> {
        let key = request.service_key();
        let service = self
            .get(&key)
            .ok_or_else(|| RpcError::RemoteExecution(format!("service not found: {}", key)))?;

        debug!(
            service_key = %key,
            method = %request.method_name,
            args = request.args.len(),
            "Dispatching request"
        );

        let args = Arguments::new(serializer, request.parameter_types, request.args);
        let reply = service.call(&request.method_name, args).await?;
        Ok(reply.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Calculator;

    #[async_trait]
    impl Service for Calculator {
        fn name(&self) -> &str {
            "Calculator"
        }

        async fn call(&self, method: &str, args: Arguments) -> RpcResult<Reply> {
            match method {
                "add" => {
                    let a: i64 = args.get(0)?;
                    let b: i64 = args.get(1)?;
                    args.reply(&(a + b))
                }
                "div" => {
                    let a: i64 = args.get(0)?;
                    let b: i64 = args.get(1)?;
                    if b == 0 {
                        return Err(RpcError::RemoteExecution("division by zero".to_string()));
                    }
                    args.reply(&(a / b))
                }
                other => Err(unknown_method(self.name(), other)),
            }
        }
    }

    fn request(method: &str, a: i64, b: i64, kind: SerializerKind) -> Request {
        let s = serializer_for(kind);
        Request::new("Calculator", method)
            .with_arg("i64", s.serialize(&a).unwrap())
            .with_arg("i64", s.serialize(&b).unwrap())
    }

    fn hosted() -> ServiceMap {
        let map = ServiceMap::new();
        map.register(Arc::new(Calculator));
        map
    }

    #[tokio::test]
    async fn test_dispatch_to_hosted_service() {
        let map = hosted();
        assert_eq!(map.keys(), vec!["Calculator:1.0".to_string()]);

        for kind in [SerializerKind::Bincode, SerializerKind::MessagePack] {
            let response = map.dispatch(request("add", 2, 40, kind), kind).await.unwrap();
            let data = response.into_data().unwrap().unwrap();
            let sum: i64 = serializer_for(kind).deserialize(&data).unwrap();
            assert_eq!(sum, 42);
        }
    }

    #[tokio::test]
    async fn test_dispatch_failures() {
        let map = hosted();
        let kind = SerializerKind::Json;

        let err = map.dispatch(request("div", 1, 0, kind), kind).await.unwrap_err();
        assert!(matches!(err, RpcError::RemoteExecution(_)));

        let err = map.dispatch(request("pow", 1, 2, kind), kind).await.unwrap_err();
        assert!(err.to_string().contains("no method pow"));

        let missing = Request::new("Calculator", "add").with_version("2.0");
        let err = map.dispatch(missing, kind).await.unwrap_err();
        assert!(err.to_string().contains("service not found"));
    }

    #[test]
    fn test_missing_argument() {
        let args = Arguments::new(SerializerKind::Json, Vec::new(), Vec::new());
        assert!(args.is_empty());
        assert!(matches!(
            args.get::<String>(0),
            Err(RpcError::Serialization(_))
        ));
    }
}
