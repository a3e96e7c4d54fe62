use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::{BrokerError, Result};
use crate::protocol::message::{Envelope, Request, Response};

/// Sends requests to a broker, one connection per request.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    addr: String,
    conn_key: String,
}

impl BrokerClient {
    pub fn new(addr: impl Into<String>, conn_key: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn_key: conn_key.into(),
        }
    }

    pub async fn send(&self, request: Request) -> Result<Response> {
        let stream = TcpStream::connect(&self.addr).await?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        let envelope = Envelope {
            key: self.conn_key.clone(),
            request,
        };
        framed
            .send(Bytes::from(serde_json::to_vec(&envelope)?))
            .await?;

        match framed.next().await {
            Some(frame) => Ok(serde_json::from_slice(&frame?)?),
            None => Err(BrokerError::Protocol(
                "connection closed before a response arrived".to_string(),
            )),
        }
    }
}
