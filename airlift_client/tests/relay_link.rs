//! The client messaging layer against a real relay instance.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use airlift_client::RelayLink;
use airlift_client::wire::ws_connector;
use airlift_proto::{Envelope, action};
use airlift_relay::{RelayState, create_router};
use tokio::net::TcpListener;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

async fn spawn_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(RelayState::default());
    let app = create_router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

#[tokio::test]
async fn allocate_and_download_through_a_live_relay() {
    init_tracing();
    let addr = spawn_relay().await;

    let sender = RelayLink::new(
        ws_connector(format!("ws://{addr}/ws")),
        Duration::from_secs(5),
    );
    let receiver = RelayLink::new(
        ws_connector(format!("ws://{addr}/ws")),
        Duration::from_secs(5),
    );

    // The sender publishes a code and stays connected for the push.
    let (_listener, mut inbound) = sender.listen();
    let reply = sender
        .request_keep_open(Envelope::new(action::ALLOCATE))
        .await
        .unwrap();
    let code = reply.code.unwrap();
    assert_eq!(code.len(), 6);

    // The receiver redeems it.
    let mut req = Envelope::new(action::DOWNLOAD);
    req.code = Some(code.clone());
    req.channel_id = Some("ch-1".to_string());
    let reply = receiver.request_keep_open(req).await.unwrap();
    assert_eq!(reply.code.as_deref(), Some(code.as_str()));

    // The push reaches the sender uncorrelated.
    let frame = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.action, action::CONNECT);
    assert_eq!(frame.code.as_deref(), Some(code.as_str()));
    assert_eq!(frame.channel_id.as_deref(), Some("ch-1"));
}

#[tokio::test]
async fn relay_rejections_surface_as_server_errors() {
    init_tracing();
    let addr = spawn_relay().await;

    let link = RelayLink::new(
        ws_connector(format!("ws://{addr}/ws")),
        Duration::from_secs(5),
    );

    let mut req = Envelope::new(action::DOWNLOAD);
    req.code = Some("000000".to_string());
    req.channel_id = Some("ch-1".to_string());
    let err = link.request_keep_open(req).await.unwrap_err();
    match err {
        airlift_client::ClientError::Server(message) => {
            assert!(message.contains("000000"));
        }
        other => panic!("expected a server error, got {other:?}"),
    }
}

#[tokio::test]
async fn plain_request_closes_the_connection_afterwards() {
    init_tracing();
    let addr = spawn_relay().await;

    let link = RelayLink::new(
        ws_connector(format!("ws://{addr}/ws")),
        Duration::from_secs(5),
    );

    link.request(Envelope::new(action::ALLOCATE)).await.unwrap();
    assert!(!link.is_open());

    // A fresh exchange reconnects transparently.
    let reply = link.request(Envelope::new(action::ALLOCATE)).await.unwrap();
    assert!(reply.code.is_some());
    assert!(!link.is_open());
}
