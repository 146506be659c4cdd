use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use openrouter_chat::{ChatBackend, ClientConfig, ErrorKind, ResponseFormatOptions};

fn completion(content: &str) -> serde_json::Value
{   json!({
      "id": "gen-backend",
      "model": "test/model",
      "choices": [{
        "index": 0,
        "finish_reason": "stop",
        "message": { "role": "assistant", "content": content }
      }]
    })
}

fn backend_for(server: &MockServer) -> ChatBackend
{   ChatBackend::new(
      ClientConfig::default()
        .with_api_key("test-key")
        .with_endpoint(format!("{}/chat/completions", server.uri()))
        .with_retries(0, 1, 2.0)
    )
}

#[tokio::test]
async fn test_backend_initialization()
{   let server = MockServer::start().await;
    let backend = backend_for(&server);
    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_applies_updates_in_order()
{   let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(body_partial_json(json!({
        "model": "test/model",
        "messages": [
          { "role": "system", "content": "Answer in JSON." },
          { "role": "user", "content": "Two cards" }
        ],
        "response_format": { "json_schema": { "name": "deck" } }
      })))
      .respond_with(ResponseTemplate::new(200)
        .set_body_json(completion(r#"{"cards": 2}"#)))
      .expect(1)
      .mount(&server)
      .await;

    let backend = backend_for(&server);
    assert_ok!(backend.set_system_message("Answer in JSON.").await);
    assert_ok!(backend.set_model("test/model", None).await);
    assert_ok!(backend.set_response_format(
      json!({
        "type": "object",
        "required": ["cards"],
        "properties": { "cards": { "type": "integer" } }
      }),
      ResponseFormatOptions::named("deck")
    ).await);

    let result = assert_ok!(backend.chat("Two cards").await);
    assert_eq!(result.parsed, Some(json!({ "cards": 2 })));

    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_queued_sends_get_their_own_replies()
{   let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200)
        .set_body_json(completion("pong")))
      .expect(3)
      .mount(&server)
      .await;

    let backend = backend_for(&server);
    let mut receivers = Vec::new();
    for i in 0..3
    {   receivers.push(assert_ok!(
          backend.send_chat_message(format!("ping {}", i))
        ));
    }
    for mut rx in receivers
    {   let reply = rx.recv().await.expect("backend replied");
        assert_eq!(assert_ok!(reply).content, "pong");
    }

    assert_ok!(backend.clear_response_format().await);
    assert_ok!(backend.clear_system_message().await);
    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_forwards_errors()
{   let server = MockServer::start().await;
    let backend = backend_for(&server);

    let err = assert_err!(backend.set_system_message("   ").await);
    assert_eq!(err.kind, ErrorKind::Validation);

    let err = assert_err!(backend.chat("").await);
    assert_eq!(err.kind, ErrorKind::Validation);

    assert_ok!(backend.shutdown().await);
}
