use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerError, Result};
use crate::protocol::handler::RequestHandler;
use crate::protocol::message::{Envelope, Request, Response, Status};

/// How long a connected client may take to send its request.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(30);

enum Served {
    Continue,
    Finish,
}

/// Accept loop of the broker.
///
/// Connections are served one at a time: read one request, dispatch it,
/// write one response, close. All allocation decisions are serialized.
pub struct BrokerServer {
    addr: SocketAddr,
    conn_key: String,
    handler: Arc<RequestHandler>,
    shutdown: CancellationToken,
}

impl BrokerServer {
    pub fn new(
        addr: SocketAddr,
        conn_key: impl Into<String>,
        handler: RequestHandler,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            addr,
            conn_key: conn_key.into(),
            handler: Arc::new(handler),
            shutdown,
        }
    }

    /// Bind the configured address and serve until shutdown or `Finish`.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Fatal`] when the broker state became unusable.
    /// The shutdown token is cancelled on every exit path.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "Broker listening");

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, closing listener");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            match self.serve_connection(stream).await {
                Ok(Served::Continue) => {}
                Ok(Served::Finish) => {
                    tracing::info!(peer = %peer, "Finish requested, closing listener");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(peer = %peer, error = %e, "Unrecoverable error, stopping broker");
                    self.shutdown.cancel();
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Connection dropped");
                }
            }
        }

        self.shutdown.cancel();
        Ok(())
    }

    async fn serve_connection(&self, stream: TcpStream) -> Result<Served> {
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        let frame = match tokio::time::timeout(REQUEST_READ_TIMEOUT, framed.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => return Ok(Served::Continue),
            Err(_) => {
                return Err(BrokerError::Protocol(
                    "timed out waiting for request".to_string(),
                ))
            }
        };

        let envelope: Envelope = match serde_json::from_slice(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = BrokerError::Protocol(format!("malformed request: {}", e));
                tracing::warn!(error = %err, "Rejecting request");
                send_response(&mut framed, &Response::from_error(&err)).await?;
                return Ok(Served::Continue);
            }
        };

        if envelope.key != self.conn_key {
            tracing::warn!(kind = envelope.request.kind(), "Rejecting request with invalid key");
            send_response(&mut framed, &Response::from_error(&BrokerError::InvalidKey)).await?;
            return Ok(Served::Continue);
        }

        let finish = matches!(envelope.request, Request::Finish);
        let handler = Arc::clone(&self.handler);
        let response =
            match tokio::task::spawn_blocking(move || handler.respond(envelope.request)).await {
                Ok(response) => response,
                Err(e) => {
                    let err = BrokerError::Internal(format!("request handler panicked: {}", e));
                    tracing::error!(error = %err, "Request handler crashed");
                    Response::from_error(&err)
                }
            };

        send_response(&mut framed, &response).await?;

        if response.status == Status::Fatal {
            return Err(BrokerError::Fatal(response.message));
        }
        if finish && response.status.is_ok() {
            return Ok(Served::Finish);
        }
        Ok(Served::Continue)
    }
}

async fn send_response(
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    response: &Response,
) -> Result<()> {
    let payload = serde_json::to_vec(response)?;
    framed.send(Bytes::from(payload)).await?;
    Ok(())
}
