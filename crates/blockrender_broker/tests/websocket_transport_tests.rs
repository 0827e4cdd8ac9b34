use std::net::SocketAddr;
use std::sync::Arc;

use blockrender_broker::{
    RenderBroker, RenderChannel, RenderRequest, RenderResult, WebSocketProvisioner,
};
use blockrender_config::targets::{RenderTarget, TargetTable};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    Message,
    handshake::server::{ErrorResponse, Request, Response},
};
use url::Url;

/// Behaviour of the fake render service
#[derive(Clone, Copy)]
enum Service {
    /// Announces readiness and answers every request
    Renders,
    /// Announces readiness, then hangs up on the first request
    HangsUp,
}

/// Starts a fake render service. Returns its address and a receiver of the
/// request paths it was opened with.
async fn start_render_service(service: Service) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (paths_tx, paths_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let record_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = paths_tx.send(req.uri().to_string());
            Ok(resp)
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, record_path)
            .await
            .unwrap();
        let (mut write, mut read) = ws_stream.split();

        // unrelated traffic first, it must be ignored
        for noise in [
            json!({ "source": "devtools", "type": "renderready" }),
            json!({ "type": "renderblocks", "id": "r1", "error": "spoofed" }),
        ] {
            write
                .send(Message::Text(noise.to_string().into()))
                .await
                .unwrap();
        }
        write
            .send(Message::Text(
                json!({ "source": "makecode", "type": "renderready" })
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();

        while let Some(Ok(msg)) = read.next().await {
            let Message::Text(text) = msg else { continue };
            let request: Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(request["type"], "renderblocks");

            if matches!(service, Service::HangsUp) {
                write.send(Message::Close(None)).await.unwrap();
                break;
            }

            let id = request["id"].clone();
            let code = request["code"].as_str().unwrap_or_default();
            let reply = if code.contains("syntax error") {
                json!({ "source": "makecode", "type": "renderblocks", "id": id, "error": "compile error" })
            } else {
                json!({
                    "source": "makecode",
                    "type": "renderblocks",
                    "id": id,
                    "uri": format!("data:image/png;base64,{}", code.len()),
                    "width": 100,
                    "height": 40
                })
            };
            write
                .send(Message::Text(reply.to_string().into()))
                .await
                .unwrap();
        }
    });

    (addr, paths_rx)
}

async fn broker_for(addr: SocketAddr) -> RenderBroker {
    let targets = TargetTable::new(vec![RenderTarget::new(
        "local",
        Url::parse(&format!("http://{addr}/")).unwrap(),
    )])
    .unwrap();
    let channel = RenderChannel::new(Arc::new(WebSocketProvisioner::new()), "makecode");
    let broker = RenderBroker::new(channel, targets);
    broker.start().await.unwrap();
    broker
}

#[tokio::test]
async fn test_render_round_trip_over_websocket() {
    let (addr, mut paths) = start_render_service(Service::Renders).await;
    let broker = broker_for(addr).await;

    let first = broker
        .request_render(RenderRequest::new("r1", "basic.showString('x')", "local"))
        .await
        .unwrap();
    let second = broker
        .request_render(RenderRequest::new("r2", "syntax error(", "unknown-key"))
        .await
        .unwrap();

    assert_eq!(
        first.wait().await,
        RenderResult::Success {
            image_uri: "data:image/png;base64,21".into(),
            width: 100.0,
            height: 40.0,
        }
    );
    assert_eq!(second.wait().await, RenderResult::failure("compile error"));

    // one connection, opened on the render-mode page
    assert_eq!(paths.recv().await.unwrap(), "/--docs?render=1");
    assert_eq!(broker.outstanding_count().await, 0);
}

#[tokio::test]
async fn test_service_hang_up_fails_outstanding_renders() {
    let (addr, _paths) = start_render_service(Service::HangsUp).await;
    let broker = broker_for(addr).await;

    let pending = broker
        .request_render(RenderRequest::new("r1", "basic.showNumber(1)", "local"))
        .await
        .unwrap();

    let RenderResult::Failure { message } = pending.wait().await else {
        panic!("expected failure");
    };
    assert_eq!(message, "Render service closed the connection");
    assert_eq!(broker.outstanding_count().await, 0);
}

#[tokio::test]
async fn test_unreachable_service_fails_render() {
    // grab a free port, then release it so nothing listens there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let broker = broker_for(addr).await;
    let pending = broker
        .request_render(RenderRequest::new("r1", "", "local"))
        .await
        .unwrap();

    let RenderResult::Failure { message } = pending.wait().await else {
        panic!("expected failure");
    };
    assert!(message.starts_with("Failed to connect to render service"), "{message}");
}
