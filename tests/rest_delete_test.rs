//! Deprecated message delete through the REST side-channel.

mod common;

use std::sync::Arc;

use common::{next_peer, MemoryConnector};
use mixer_chat::chat::event::IncomingMessageData;
use mixer_chat::chat::{ChatError, ChatInfo, ChatSession, ReconnectPolicy};
use mixer_chat::RestClient;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MESSAGE_ID: &str = "9d2a3e1c-7b44-4c6f-a0f1-55e3b2c8d901";

fn message(channel: u64) -> IncomingMessageData {
    serde_json::from_value(serde_json::json!({
        "channel": channel,
        "id": MESSAGE_ID,
        "user_name": "viewer",
        "user_id": 42,
        "message": { "message": [{ "type": "text", "text": "spam" }], "meta": {} }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_delete_issues_http_delete_under_base_path() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/v1/chats/1234/message/{MESSAGE_ID}")))
        .and(header("authorization", "Bearer token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let rest = RestClient::new(&format!("{}/api/v1/", server.uri()), Some("token".into())).unwrap();
    let (connector, mut peers) = MemoryConnector::new();
    let session = ChatSession::builder(connector, ChatInfo::with_endpoint(1234, "mem://chat"))
        .policy(ReconnectPolicy::disabled())
        .http(Arc::new(rest))
        .build();
    session.connect().await.unwrap();
    let _peer = next_peer(&mut peers).await;

    assert_eq!(session.delete(&message(1234)).await, Ok(()));
}

#[tokio::test]
async fn test_delete_reports_server_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let rest = RestClient::new(&format!("{}/api/v1/", server.uri()), None).unwrap();
    let (connector, mut peers) = MemoryConnector::new();
    let session = ChatSession::builder(connector, ChatInfo::with_endpoint(1234, "mem://chat"))
        .policy(ReconnectPolicy::disabled())
        .http(Arc::new(rest))
        .build();
    session.connect().await.unwrap();
    let _peer = next_peer(&mut peers).await;

    assert!(matches!(
        session.delete(&message(1234)).await,
        Err(ChatError::Http(_))
    ));
}

#[tokio::test]
async fn test_delete_before_connect() {
    let (connector, _peers) = MemoryConnector::new();
    let session = ChatSession::builder(connector, ChatInfo::with_endpoint(1234, "mem://chat")).build();
    assert_eq!(
        session.delete(&message(1234)).await,
        Err(ChatError::NotConnected)
    );
}
