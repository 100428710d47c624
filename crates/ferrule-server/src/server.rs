//! TCP server for hosted services

use ferrule_core::{Response, RpcError, RpcResult};
use ferrule_protocol::{FrameCodec, MessageBody, MessageStatus, ProtocolMessage};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::ServiceMap;

/// Accepts connections and answers frames with the hosted services
pub struct RpcServer {
    listener: TcpListener,
    services: Arc<ServiceMap>,
}

impl RpcServer {
    /// Bind to `addr`, e.g. "0.0.0.0:8080"
    pub async fn bind(addr: &str, services: Arc<ServiceMap>) -> RpcResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RpcError::Transport(format!("failed to bind {}: {}", addr, e)))?;
        Ok(Self { listener, services })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> RpcResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> RpcResult<()> {
        info!(addr = %self.local_addr()?, "RPC server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "Connection accepted");

                    let services = self.services.clone();
                    let shutdown = shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, services, shutdown).await {
                            warn!(peer = %peer, error = %e, "Connection closed with error");
                        }
                    });
                }
            }
        }

        info!("RPC server stopped");
        Ok(())
    }
}

/// Answer frames on one connection until the peer closes it
///
/// A frame that cannot be decoded ends the connection.
async fn handle_connection(
    stream: TcpStream,
    services: Arc<ServiceMap>,
    shutdown: CancellationToken,
) -> RpcResult<()> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, FrameCodec);

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = framed.next() => match next {
                Some(message) => message?,
                None => return Ok(()),
            },
        };

        let reply = answer(&services, message).await;
        framed.send(reply).await?;
    }
}

async fn answer(services: &ServiceMap, message: ProtocolMessage) -> ProtocolMessage {
    let ProtocolMessage { header, body } = message;

    let (status, body) = match body {
        MessageBody::Request(request) => {
            let method = request.method_name.clone();
            match services.dispatch(request, header.serializer).await {
                Ok(response) => (MessageStatus::Ok, MessageBody::Response(response)),
                Err(e) => {
                    warn!(method = %method, error = %e, "Invocation failed");
                    // the client wraps the text in RemoteExecution again
                    let message = match e {
                        RpcError::RemoteExecution(message) => message,
                        other => other.to_string(),
                    };
                    (
                        MessageStatus::BadResponse,
                        MessageBody::Response(Response::failure(message)),
                    )
                }
            }
        }
        MessageBody::Heartbeat => (MessageStatus::Ok, MessageBody::Heartbeat),
        other => {
            let message_type = other.message_type();
            (
                MessageStatus::BadRequest,
                MessageBody::Response(Response::failure(format!(
                    "unexpected {:?} frame",
                    message_type
                ))),
            )
        }
    };

    ProtocolMessage {
        header: header.reply(status, body.message_type()),
        body,
    }
}
