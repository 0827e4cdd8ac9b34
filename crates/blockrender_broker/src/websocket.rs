//! WebSocket transport for render contexts
//!
//! Each provisioned context is one client connection to the render service.
//! Envelopes travel as JSON text frames in both directions.
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace};
use url::Url;

use crate::{
    protocol::OutboundMessage,
    transport::{ChannelError, ChannelEvent, ContextHandle, ContextProvisioner, ContextSpec},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketProvisioner;

impl WebSocketProvisioner {
    pub fn new() -> Self {
        Self
    }
}

impl ContextProvisioner for WebSocketProvisioner {
    fn provision(
        &self,
        spec: &ContextSpec,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<ContextHandle, ChannelError> {
        let url = socket_url(&spec.render_url)?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        let (tx, rx) = mpsc::unbounded_channel::<OutboundMessage>();
        runtime.spawn(run_connection(url, spec.clone(), rx, events));

        Ok(ContextHandle::new(spec.origin.clone(), tx))
    }
}

/// Maps `http`/`https` render urls onto `ws`/`wss`
///
/// # Errors
///
/// Returns [`ChannelError::UnsupportedScheme`] for anything else
pub fn socket_url(render_url: &Url) -> Result<Url, ChannelError> {
    let scheme = match render_url.scheme() {
        "ws" | "wss" => return Ok(render_url.clone()),
        "http" => "ws",
        "https" => "wss",
        other => return Err(ChannelError::UnsupportedScheme(other.to_string())),
    };

    let mut url = render_url.clone();
    url.set_scheme(scheme)
        .map_err(|()| ChannelError::UnsupportedScheme(render_url.scheme().to_string()))?;
    Ok(url)
}

async fn run_connection(
    url: Url,
    spec: ContextSpec,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let reason = match connect_async(url.as_str()).await {
        Ok((stream, _)) => {
            info!("Connected to render service at {url}");
            pump(stream, &spec.origin, &mut outbound, &events).await
        }
        Err(e) => {
            error!("Failed to connect to render service at {url}: {e}");
            Some(format!("Failed to connect to render service: {e}"))
        }
    };

    if let Some(reason) = reason {
        let _ = events.send(ChannelEvent::Closed {
            origin: spec.origin,
            generation: spec.generation,
            reason,
        });
    }
}

/// Moves frames until either side goes away. Returns why the connection was
/// lost, or `None` when the context handle was dropped on our side.
async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    origin: &str,
    outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    events: &mpsc::UnboundedSender<ChannelEvent>,
) -> Option<String> {
    let (mut ws_sender, mut ws_receiver) = stream.split();

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    debug!("Render context {origin} released, closing connection");
                    let _ = ws_sender.send(Message::Close(None)).await;
                    return None;
                };

                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize envelope: {}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                    return Some(format!("Failed to send to render service: {e}"));
                }
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Value>(text.as_str()) {
                        Ok(data) => {
                            let event = ChannelEvent::message(origin, data);
                            if events.send(event).is_err() {
                                debug!("Render channel dropped, closing connection to {origin}");
                                return None;
                            }
                        }
                        Err(e) => trace!("Ignoring non-JSON frame from {origin}: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Some("Render service closed the connection".to_string());
                }
                Some(Ok(_)) => {
                    // Ping/pong is answered by tungstenite, binary frames are not part of the protocol
                }
                Some(Err(e)) => {
                    return Some(format!("Render service connection error: {e}"));
                }
            }
        }
    }
}
