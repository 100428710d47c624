//! TCP transport
//!
//! Every call opens a fresh connection, writes one frame and waits for the
//! matching reply, so there is exactly one outstanding request per socket.

use ferrule_core::{Request, Response, RpcError, RpcResult, SerializerKind};
use ferrule_protocol::{FrameCodec, MessageBody, ProtocolMessage};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of the wire protocol
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport with the given connect timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Send a request to `addr` and wait for its response
    pub async fn send(
        &self,
        addr: &str,
        request: Request,
        serializer: SerializerKind,
    ) -> RpcResult<Response> {
        let message = ProtocolMessage::request(request, serializer);
        let reply = self.exchange(addr, message).await?;

        match reply.body {
            MessageBody::Response(response) => Ok(response),
            other => Err(RpcError::Protocol(format!(
                "expected a response frame, got {:?}",
                other.message_type()
            ))),
        }
    }

    /// Check that a provider answers heartbeats
    pub async fn ping(&self, addr: &str, serializer: SerializerKind) -> RpcResult<()> {
        let reply = self
            .exchange(addr, ProtocolMessage::heartbeat(serializer))
            .await?;

        match reply.body {
            MessageBody::Heartbeat => Ok(()),
            other => Err(RpcError::Protocol(format!(
                "expected a heartbeat frame, got {:?}",
                other.message_type()
            ))),
        }
    }

    /// Write one frame on a fresh connection and read the reply
    async fn exchange(&self, addr: &str, message: ProtocolMessage) -> RpcResult<ProtocolMessage> {
        let request_id = message.header.request_id;
        let mut framed = self.connect(addr).await?;

        framed.send(message).await?;
        let reply = framed.next().await.ok_or_else(|| {
            RpcError::Transport(format!("{} closed the connection before replying", addr))
        })??;

        if reply.header.request_id != request_id {
            return Err(RpcError::Protocol(format!(
                "response id {} does not match request id {}",
                reply.header.request_id, request_id
            )));
        }

        debug!(
            addr = addr,
            request_id = request_id,
            status = ?reply.header.status,
            "Received reply"
        );
        Ok(reply)
    }

    async fn connect(&self, addr: &str) -> RpcResult<Framed<TcpStream, FrameCodec>> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                RpcError::Transport(format!(
                    "connect to {} timed out after {:?}",
                    addr, self.connect_timeout
                ))
            })?
            .map_err(|e| RpcError::Transport(format!("failed to connect to {}: {}", addr, e)))?;

        stream.set_nodelay(true)?;
        Ok(Framed::new(stream, FrameCodec::default()))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}
