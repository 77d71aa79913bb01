//! Socket transport.
//!
//! A [`Connector`] opens one connection and hands back a [`TransportLink`]:
//! a pair of text channels pumped by a background task. The link is closed
//! from our side by dropping `outgoing`; the remote side closing shows up
//! as `incoming` returning `None`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::shared::error::{PortalError, Result};

/// Both directions of an open connection
#[derive(Debug)]
pub struct TransportLink {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens transport connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportLink>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| PortalError::network(format!("WebSocket handshake failed: {}", e)))?;

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<String>();

        tokio::spawn(pump(ws_stream, rx_out, tx_in));

        Ok(TransportLink {
            outgoing: tx_out,
            incoming: rx_in,
        })
    }
}

async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    tx_in: mpsc::UnboundedSender<String>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            outgoing = rx_out.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        tracing::debug!("socket write failed: {}", e);
                        break;
                    }
                }
                None => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if tx_in.send(text).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        if tx_in.send(text).is_err() {
                            break;
                        }
                    }
                    Err(_) => tracing::debug!("non UTF-8 binary frame dropped"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!("socket read failed: {}", e);
                    break;
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("socket pump finished");
}
