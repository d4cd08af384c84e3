use futures::StreamExt;
use keepconnect::config::ConnectorConfig;
use keepconnect::connector::sidecar::{SidecarConnectorFactory, SidecarHub};
use keepconnect::connector::ConnectorFactory;
use keepconnect::error::Error;
use keepconnect::types::{ConnectorEvent, PairingEvent, UploadedMedia};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn factory(server: &MockServer) -> SidecarConnectorFactory {
    factory_with_hub(server, SidecarHub::new())
}

fn factory_with_hub(server: &MockServer, hub: SidecarHub) -> SidecarConnectorFactory {
    let cfg = ConnectorConfig {
        sidecar_url: format!("{}/", server.uri()),
        request_timeout_secs: 5,
        pairing_poll_ms: 50,
    };
    SidecarConnectorFactory::new(&cfg, hub).unwrap()
}

fn media() -> UploadedMedia {
    UploadedMedia {
        url: "https://mmg.example/x".into(),
        direct_path: "/v/t62/x".into(),
        media_key: "key".into(),
        file_enc_sha256: "enc".into(),
        file_sha256: "sha".into(),
    }
}

#[tokio::test]
async fn test_lifecycle_calls() {
    let server = MockServer::start().await;
    for action in ["connect", "disconnect", "logout"] {
        Mock::given(method("POST"))
            .and(path(format!("/v1/accounts/acc-1/{action}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/v1/accounts/acc-1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"authenticated": true})))
        .mount(&server)
        .await;

    let connector = factory(&server).connector_for("acc-1");
    assert!(connector.is_authenticated().await);
    connector.connect().await.unwrap();
    connector.logout().await.unwrap();
    connector.disconnect().await;
}

#[tokio::test]
async fn test_status_errors_read_as_unauthenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let connector = factory(&server).connector_for("acc-1");
    assert!(!connector.is_authenticated().await);
}

#[tokio::test]
async fn test_connect_error_is_connector_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts/acc-1/connect"))
        .respond_with(ResponseTemplate::new(503).set_body_string("sidecar busy"))
        .mount(&server)
        .await;
    let connector = factory(&server).connector_for("acc-1");
    let err = connector.connect().await.unwrap_err();
    assert!(matches!(err, Error::Connector(ref msg) if msg.contains("sidecar busy")));
}

#[tokio::test]
async fn test_pairing_stream_polls_until_closed() {
    let server = MockServer::start().await;
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    Mock::given(method("GET"))
        .and(path("/v1/accounts/acc-1/pairing"))
        .respond_with(move |_req: &wiremock::Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let body = match n {
                0 => json!({"events": [{"kind": "code", "payload": "code-1"}], "closed": false}),
                1 => json!({"events": [], "closed": false}),
                2 => json!({"events": [{"kind": "code", "payload": "code-2"}, {"kind": "success"}], "closed": true}),
                _ => json!({"events": [], "closed": true}),
            };
            ResponseTemplate::new(200).set_body_json(body)
        })
        .mount(&server)
        .await;

    let connector = factory(&server).connector_for("acc-1");
    let events: Vec<PairingEvent> = connector.open_pairing_stream().await.unwrap().collect().await;
    assert_eq!(
        events,
        vec![
            PairingEvent::Code("code-1".into()),
            PairingEvent::Code("code-2".into()),
            PairingEvent::Success,
        ]
    );
    assert_eq!(polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_pairing_stream_open_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let connector = factory(&server).connector_for("acc-1");
    assert!(matches!(
        connector.open_pairing_stream().await,
        Err(Error::Connector(_))
    ));
}

#[tokio::test]
async fn test_send_text_wire_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts/acc-1/messages/text"))
        .and(body_json(json!({"to": "919876543210@s.whatsapp.net", "text": "hello"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message_id": "3EB0ABC", "timestamp": 1700000000})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let connector = factory(&server).connector_for("acc-1");
    let receipt = connector
        .send_text("919876543210@s.whatsapp.net", "hello")
        .await
        .unwrap();
    assert_eq!(receipt.message_id, "3EB0ABC");
    assert_eq!(receipt.timestamp, 1_700_000_000);
}

#[tokio::test]
async fn test_media_upload_and_send() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts/acc-1/media"))
        .and(header("content-type", "image/png"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(media())))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts/acc-1/messages/media"))
        .and(body_json(json!({
            "to": "1@s.whatsapp.net",
            "media": media(),
            "caption": "look",
            "mimetype": "image/png",
            "length": 3
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message_id": "m2", "timestamp": 5})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let connector = factory(&server).connector_for("acc-1");
    let uploaded = connector.upload_media(&[1, 2, 3], "image/png").await.unwrap();
    assert_eq!(uploaded, media());
    let receipt = connector
        .send_media("1@s.whatsapp.net", &uploaded, "look", "image/png", 3)
        .await
        .unwrap();
    assert_eq!(receipt.message_id, "m2");
}

#[tokio::test]
async fn test_stored_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accounts": ["a", "b"]})))
        .mount(&server)
        .await;
    let creds = factory(&server).stored_credentials().await.unwrap();
    assert_eq!(creds, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_subscribe_routes_through_hub() {
    let server = MockServer::start().await;
    let hub = SidecarHub::new();
    let connector = factory_with_hub(&server, hub.clone()).connector_for("acc-1");
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    connector.subscribe(Arc::new(move |event| {
        if event == ConnectorEvent::Connected {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }));

    assert!(hub.deliver("acc-1", ConnectorEvent::Connected));
    assert!(!hub.deliver("acc-2", ConnectorEvent::Connected));
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    connector.unsubscribe();
    assert!(!hub.deliver("acc-1", ConnectorEvent::Connected));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
