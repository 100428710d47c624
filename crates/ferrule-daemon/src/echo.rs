//! Built-in echo service

use async_trait::async_trait;
use ferrule_rpc::{unknown_method, Arguments, Reply, RpcResult, Service};

/// Returns its first argument unchanged
pub struct EchoService;

impl EchoService {
    pub const NAME: &'static str = "echo";
}

#[async_trait]
impl Service for EchoService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn call(&self, method: &str, args: Arguments) -> RpcResult<Reply> {
        match method {
            "echo" => match args.raw(0) {
                Some(bytes) => Ok(Reply {
                    data: bytes.to_vec(),
                    data_type: args.parameter_type(0).unwrap_or("unknown").to_string(),
                }),
                None => args.reply(&()),
            },
            "ping" => args.reply(&"pong"),
            other => Err(unknown_method(Self::NAME, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrule_protocol::{serializer_for, Serializer};
    use ferrule_rpc::SerializerKind;

    #[tokio::test]
    async fn test_echo_returns_argument() {
        let kind = SerializerKind::MessagePack;
        let encoded = serializer_for(kind).serialize(&vec![1u8, 2, 3]).unwrap();
        let args = Arguments::new(kind, vec!["Vec<u8>".to_string()], vec![encoded.clone()]);

        let reply = EchoService.call("echo", args).await.unwrap();
        assert_eq!(reply.data, encoded);
        assert_eq!(reply.data_type, "Vec<u8>");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let args = Arguments::new(SerializerKind::Json, Vec::new(), Vec::new());
        let err = EchoService.call("shout", args).await.unwrap_err();
        assert!(err.to_string().contains("no method shout"));
    }
}
