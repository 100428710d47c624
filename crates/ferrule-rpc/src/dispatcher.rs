//! Call dispatcher
//!
//! A call moves through discovery, node selection and the network send
//! inside the retry strategy. Retryable failures (discovery, transport) are
//! re-attempted; a protocol error fails the call at once. Whatever is left
//! after retries goes to the tolerant strategy.
//!
//! Every attempt selects its node again, so a retry may reach a different
//! provider and advances the round-robin position.

use ferrule_core::{Request, Response, RpcError, RpcResult, SerializerKind};
use ferrule_network::{routing_params, RoutingParams};
use ferrule_protocol::{serializer_for, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::context::RpcContext;

/// Makes remote calls through an [`RpcContext`]
#[derive(Clone)]
pub struct Dispatcher {
    context: Arc<RpcContext>,
}

impl Dispatcher {
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self { context }
    }

    /// Start building a call to `method` of `service`
    pub fn invocation(
        &self,
        service: impl Into<String>,
        method: impl Into<String>,
    ) -> Invocation<'_> {
        Invocation {
            dispatcher: self,
            request: Request::new(service, method),
            error: None,
        }
    }

    /// Serializer used for arguments and results
    pub fn serializer(&self) -> SerializerKind {
        self.context.config().serializer
    }

    /// Send a request and return the provider's response
    ///
    /// A failure of the invoked method is not an error here: it comes back
    /// inside the response.
    pub async fn invoke(&self, request: Request) -> RpcResult<Response> {
        if self.context.config().mock {
            debug!(
                service = %request.service_name,
                method = %request.method_name,
                "Mock call"
            );
            return Ok(Response::empty());
        }

        let service_key = request.service_key();
        let params = routing_params(&request.method_name);
        let serializer = self.serializer();

        let outcome = self
            .context
            .retry()
            .execute(|| {
                let request = request.clone();
                let service_key = service_key.as_str();
                let params = &params;
                async move {
                    match self.attempt(service_key, params, request, serializer).await {
                        Ok(response) => Ok(Ok(response)),
                        Err(e) if e.is_retryable() => Err(e),
                        Err(e) => Ok(Err(e)),
                    }
                }
            })
            .await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e @ RpcError::Protocol(_))) => Err(e),
            Ok(Err(e)) | Err(e) => self.context.tolerant().handle(&request, e),
        }
    }

    /// Send a request and decode the result
    ///
    /// Yields `R::default()` when the response carries no data, which is the
    /// case in mock mode and after a fail-safe degradation.
    pub async fn call<R>(&self, request: Request) -> RpcResult<R>
    where
        R: DeserializeOwned + Default,
    {
        match self.invoke(request).await?.into_data()? {
            Some(bytes) => serializer_for(self.serializer()).deserialize(&bytes),
            None => Ok(R::default()),
        }
    }

    async fn attempt(
        &self,
        service_key: &str,
        params: &RoutingParams,
        request: Request,
        serializer: SerializerKind,
    ) -> RpcResult<Response> {
        let candidates = self.context.registry().discover(service_key).await?;
        let selected = self
            .context
            .balancer()
            .select(params, &candidates)
            .ok_or_else(|| RpcError::Discovery(format!("no provider found for {}", service_key)))?;

        let addr = selected.service_address();
        debug!(
            service_key = service_key,
            method = %request.method_name,
            addr = %addr,
            "Sending request"
        );
        self.context
            .transport()
            .send(&addr, request, serializer)
            .await
    }
}

/// A call under construction
///
/// Arguments are encoded with the dispatcher's serializer as they are added.
pub struct Invocation<'a> {
    dispatcher: &'a Dispatcher,
    request: Request,
    error: Option<RpcError>,
}

impl<'a> Invocation<'a> {
    /// Target a specific service version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.request = self.request.with_version(version);
        self
    }

    /// Append an argument
    pub fn arg<T: Serialize>(mut self, value: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        match serializer_for(self.dispatcher.serializer()).serialize(value) {
            Ok(encoded) => {
                self.request = self
                    .request
                    .with_arg(std::any::type_name::<T>(), encoded);
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Finished request
    pub fn build(self) -> RpcResult<Request> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.request),
        }
    }

    /// Send the call and return the raw response
    pub async fn invoke(self) -> RpcResult<Response> {
        let dispatcher = self.dispatcher;
        dispatcher.invoke(self.build()?).await
    }

    /// Send the call and decode the result
    pub async fn call<R>(self) -> RpcResult<R>
    where
        R: DeserializeOwned + Default,
    {
        let dispatcher = self.dispatcher;
        dispatcher.call(self.build()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrule_core::{RetryStrategyKind, RpcConfig, ServiceMetaInfo, TolerantStrategyKind};
    use ferrule_network::retry::FIXED_INTERVAL_DELAY;
    use ferrule_protocol::{FrameCodec, MessageBody, MessageStatus};
    use ferrule_registry::{KvStore, MemoryStore};
    use futures::{SinkExt, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio::time::{Duration, Instant};
    use tokio_util::codec::Framed;

    fn context(config: RpcConfig) -> (Arc<RpcContext>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let context = RpcContext::with_store(config, store.clone() as Arc<dyn KvStore>);
        (context, store)
    }

    #[tokio::test]
    async fn test_mock_returns_defaults() {
        let config = RpcConfig {
            mock: true,
            ..RpcConfig::default()
        };
        let (context, _) = context(config);
        let dispatcher = context.dispatcher();

        let count: u32 = dispatcher
            .invocation("UserService", "count")
            .call()
            .await
            .unwrap();
        assert_eq!(count, 0);

        let name: String = dispatcher
            .invocation("UserService", "name")
            .arg(&"foo")
            .call()
            .await
            .unwrap();
        assert_eq!(name, "");
    }

    #[tokio::test]
    async fn test_invocation_encodes_arguments() {
        let (context, _) = context(RpcConfig::default());
        let dispatcher = context.dispatcher();

        let request = dispatcher
            .invocation("UserService", "get_user")
            .version("2.0")
            .arg(&7u32)
            .arg(&"foo")
            .build()
            .unwrap();

        assert_eq!(request.service_key(), "UserService:2.0");
        assert_eq!(request.parameter_types, vec!["u32", "&str"]);
        let s = serializer_for(SerializerKind::Bincode);
        assert_eq!(s.deserialize::<u32>(&request.args[0]).unwrap(), 7);
        assert_eq!(s.deserialize::<String>(&request.args[1]).unwrap(), "foo");
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_is_retried_then_tolerated() {
        let config = RpcConfig {
            retry_strategy: RetryStrategyKind::FixedInterval,
            tolerant_strategy: TolerantStrategyKind::FailSafe,
            ..RpcConfig::default()
        };
        let (context, _) = context(config);
        let started = Instant::now();

        let response = context
            .dispatcher()
            .invoke(Request::new("UserService", "get_user"))
            .await
            .unwrap();

        assert_eq!(response, Response::empty());
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_fail_fast_reraises_discovery_error() {
        let config = RpcConfig {
            retry_strategy: RetryStrategyKind::No,
            tolerant_strategy: TolerantStrategyKind::FailFast,
            ..RpcConfig::default()
        };
        let (context, _) = context(config);

        let err = context
            .dispatcher()
            .invocation("UserService", "get_user")
            .call::<String>()
            .await
            .unwrap_err();
        match err {
            RpcError::CallFailed(inner) => assert!(matches!(*inner, RpcError::Discovery(_))),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_failure() {
        let config = RpcConfig {
            retry_strategy: RetryStrategyKind::No,
            ..RpcConfig::default()
        };
        let (context, _) = context(config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        context
            .registry()
            .register(&ServiceMetaInfo::new("UserService", "127.0.0.1", port))
            .await
            .unwrap();

        let err = context
            .dispatcher()
            .invoke(Request::new("UserService", "get_user"))
            .await
            .unwrap_err();
        match err {
            RpcError::CallFailed(inner) => assert!(matches!(*inner, RpcError::Transport(_))),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    /// Register a provider that answers every request under the wrong
    /// correlation id; returns the number of connections it accepted
    async fn register_misbehaving_provider(context: &RpcContext) -> Arc<AtomicUsize> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut framed = Framed::new(stream, FrameCodec);
                if let Some(Ok(message)) = framed.next().await {
                    let mut reply = message.reply(
                        MessageStatus::Ok,
                        MessageBody::Response(Response::empty()),
                    );
                    reply.header.request_id = reply.header.request_id.wrapping_add(1);
                    let _ = framed.send(reply).await;
                }
            }
        });

        context
            .registry()
            .register(&ServiceMetaInfo::new("UserService", "127.0.0.1", port))
            .await
            .unwrap();
        accepted
    }

    #[tokio::test]
    async fn test_protocol_error_skips_retry_and_fail_safe() {
        let config = RpcConfig {
            retry_strategy: RetryStrategyKind::FixedInterval,
            tolerant_strategy: TolerantStrategyKind::FailSafe,
            ..RpcConfig::default()
        };
        let (context, _) = context(config);
        let accepted = register_misbehaving_provider(&context).await;
        let started = Instant::now();

        let err = context
            .dispatcher()
            .invoke(Request::new("UserService", "get_user"))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Protocol(_)));
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < FIXED_INTERVAL_DELAY);
    }
}
