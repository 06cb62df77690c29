//! Integration tests for `ResponsesClient` against a mock HTTP server.
//!
//! Every test uses a zero-delay retry policy so retries do not sleep.

use std::io::Write;
use std::time::Duration;

use futures_util::StreamExt;
use mockito::{Matcher, Server, ServerGuard};
use parley_config::Configuration;
use parley_core::{ChatMessage, Error, Result, RetryPolicy, Role};
use parley_providers::ResponsesClient;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;

const PATH: &str = "/v1/responses";

fn instant_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::ZERO,
        Duration::ZERO,
        2.0,
        0.0,
        [408, 409, 429, 500, 502, 503, 504],
    )
}

fn config_for(server: &ServerGuard) -> Configuration {
    let endpoint = Url::parse(&format!("{}{PATH}", server.url())).unwrap();
    Configuration::new("sk-test")
        .with_endpoint(endpoint)
        .with_retry_policy(instant_retries(3))
}

fn reply_body(text: &str) -> String {
    json!({
        "id": "resp_123",
        "output": [{
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text}]
        }]
    })
    .to_string()
}

fn request_body(input: &[(&str, &str)], stream: bool) -> serde_json::Value {
    let input: Vec<_> = input
        .iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();
    json!({
        "model": "gpt-4.1-mini",
        "input": input,
        "stream": stream,
        "temperature": 0.5,
    })
}

const SSE_HELLO: &str = "event: response.created
data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}

event: response.output_text.delta
data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hello\"}

event: response.output_text.delta
data: {\"type\":\"response.output_text.delta\",\"delta\":\" there\"}

event: response.output_text.done
data: {\"type\":\"response.output_text.done\",\"text\":\"Hello there\"}

data: [DONE]

";

#[tokio::test]
async fn send_returns_text_and_records_turn() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .match_header("authorization", "Bearer sk-test")
        .match_header("content-type", "application/json")
        .match_header("accept", "application/json, text/event-stream")
        .match_body(Matcher::Json(request_body(&[("user", "Hi")], false)))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(reply_body("Hello from model"))
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    let reply = client.send("Hi", None).await.unwrap();

    mock.assert_async().await;
    assert_eq!(reply, "Hello from model");
    assert_eq!(
        client.conversation_history().await,
        vec![
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello from model")
        ]
    );
}

#[tokio::test]
async fn second_request_carries_history() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("POST", PATH)
        .match_body(Matcher::Json(request_body(&[("user", "Question 1")], false)))
        .with_status(200)
        .with_body(reply_body("First response"))
        .create_async()
        .await;
    let second = server
        .mock("POST", PATH)
        .match_body(Matcher::Json(request_body(
            &[
                ("user", "Question 1"),
                ("assistant", "First response"),
                ("user", "Question 2"),
            ],
            false,
        )))
        .with_status(200)
        .with_body(reply_body("Second response"))
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    assert_eq!(client.send("Question 1", None).await.unwrap(), "First response");
    assert_eq!(client.send("Question 2", None).await.unwrap(), "Second response");

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(client.conversation_history().await.len(), 4);
}

#[tokio::test]
async fn instructions_merge_prompt_and_extra() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .match_body(Matcher::PartialJson(json!({
            "instructions": "Be brief.\n\nAnswer in French."
        })))
        .with_status(200)
        .with_body(reply_body("Bonjour"))
        .create_async()
        .await;

    let config = config_for(&server).with_system_prompt("  Be brief.  ");
    let client = ResponsesClient::new(config);
    client.send("Hi", Some("Answer in French.")).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn context_is_trimmed_to_character_budget() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("POST", PATH)
        .match_body(Matcher::Json(request_body(&[("user", "Question 1")], false)))
        .with_status(200)
        .with_body(reply_body("First response"))
        .create_async()
        .await;
    // 10 + 14 chars of history plus 10 new chars exceeds 30: the old pair goes.
    let second = server
        .mock("POST", PATH)
        .match_body(Matcher::Json(request_body(&[("user", "Question 2")], false)))
        .with_status(200)
        .with_body(reply_body("Second"))
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server).with_max_context_characters(30));
    client.send("Question 1", None).await.unwrap();
    client.send("Question 2", None).await.unwrap();

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(
        client.conversation_history().await,
        vec![
            ChatMessage::user("Question 2"),
            ChatMessage::assistant("Second")
        ]
    );
}

#[tokio::test]
async fn retryable_status_is_retried_until_exhausted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .with_status(503)
        .with_body(r#"{"error": {"message": "Service unavailable", "type": "server_error"}}"#)
        .expect(3)
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    let err = client.send("Hi", None).await.unwrap_err();

    mock.assert_async().await;
    assert_eq!(
        err,
        Error::BadResponse {
            status_code: 503,
            message: "Service unavailable".to_string(),
        }
    );
    assert!(client.conversation_history().await.is_empty());
}

#[tokio::test]
async fn non_retryable_status_fails_after_one_attempt() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .with_status(400)
        .with_body("bad request")
        .expect(1)
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    let err = client.send("Hi", None).await.unwrap_err();

    mock.assert_async().await;
    assert_eq!(
        err,
        Error::BadResponse {
            status_code: 400,
            message: "bad request".to_string(),
        }
    );
}

#[tokio::test]
async fn missing_api_key_fails_before_any_request() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", PATH).expect(0).create_async().await;

    let endpoint = Url::parse(&format!("{}{PATH}", server.url())).unwrap();
    let client = ResponsesClient::new(Configuration::new("   ").with_endpoint(endpoint));

    assert_eq!(client.send("Hi", None).await, Err(Error::MissingApiKey));
    let streamed: Vec<Result<String>> = client.stream("Hi", None).collect().await;
    assert_eq!(streamed, vec![Err(Error::MissingApiKey)]);

    mock.assert_async().await;
}

#[tokio::test]
async fn empty_output_is_not_recorded() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(r#"{"output": []}"#)
        .expect(1)
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));

    assert_eq!(client.send("Hi", None).await, Err(Error::EmptyResponse));
    mock.assert_async().await;
    assert!(client.conversation_history().await.is_empty());
}

#[tokio::test]
async fn cancelled_send_is_not_retried_or_recorded() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", PATH).expect(0).create_async().await;

    let client = ResponsesClient::new(config_for(&server));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = client.send_with_cancellation("Hi", None, &cancel).await;

    assert_eq!(result, Err(Error::Cancelled));
    mock.assert_async().await;
    assert!(client.conversation_history().await.is_empty());
}

#[tokio::test]
async fn cancelling_send_in_flight_is_not_recorded() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_secs(1));
            w.write_all(reply_body("too late").as_bytes())
        })
        .expect(1)
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.send_with_cancellation("Hi", None, &cancel),
    )
    .await
    .unwrap();

    assert_eq!(result, Err(Error::Cancelled));
    mock.assert_async().await;
    assert!(client.conversation_history().await.is_empty());
}

#[tokio::test]
async fn cancelling_stream_stops_buffered_lines_and_commit() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_HELLO)
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    let cancel = CancellationToken::new();
    let mut stream = Box::pin(client.stream_with_cancellation("Hi", None, cancel.clone()));

    assert_eq!(stream.next().await, Some(Ok("Hello".to_string())));
    cancel.cancel();
    let rest: Vec<Result<String>> = stream.collect().await;

    assert_eq!(rest, vec![Err(Error::Cancelled)]);
    assert!(client.conversation_history().await.is_empty());
}

#[tokio::test]
async fn stream_yields_deltas_and_records_turn() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .match_header("accept", "application/json, text/event-stream")
        .match_body(Matcher::Json(request_body(&[("user", "Hi")], true)))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(SSE_HELLO)
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    let chunks: Vec<Result<String>> = client.stream("Hi", None).collect().await;

    mock.assert_async().await;
    assert_eq!(chunks, vec![Ok("Hello".to_string()), Ok(" there".to_string())]);
    assert_eq!(
        client.conversation_history().await,
        vec![ChatMessage::user("Hi"), ChatMessage::assistant("Hello there")]
    );
}

#[tokio::test]
async fn stream_without_done_sentinel_completes_on_close() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_body("data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hi\"}")
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    let chunks: Vec<Result<String>> = client.stream("Hello", None).collect().await;

    assert_eq!(chunks, vec![Ok("Hi".to_string())]);
    assert_eq!(client.conversation_history().await.len(), 2);
}

#[tokio::test]
async fn stream_error_event_fails_without_recording() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Par\"}\n\n\
             data: {\"type\":\"error\",\"error\":{\"message\":\"model overloaded\"}}\n\n",
        )
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    let chunks: Vec<Result<String>> = client.stream("Hi", None).collect().await;

    assert_eq!(
        chunks,
        vec![
            Ok("Par".to_string()),
            Err(Error::Stream("model overloaded".to_string()))
        ]
    );
    assert!(client.conversation_history().await.is_empty());
}

#[tokio::test]
async fn stream_error_status_is_drained_and_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .with_status(429)
        .with_body(r#"{"error": {"message": "Rate limit reached"}}"#)
        .expect(2)
        .create_async()
        .await;

    let config = config_for(&server).with_retry_policy(instant_retries(2));
    let client = ResponsesClient::new(config);
    let chunks: Vec<Result<String>> = client.stream("Hi", None).collect().await;

    mock.assert_async().await;
    assert_eq!(
        chunks,
        vec![Err(Error::BadResponse {
            status_code: 429,
            message: "Rate limit reached".to_string(),
        })]
    );
    assert!(client.conversation_history().await.is_empty());
}

#[tokio::test]
async fn dropping_stream_early_does_not_record() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(SSE_HELLO)
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    {
        let mut stream = Box::pin(client.stream("Hi", None));
        assert_eq!(stream.next().await, Some(Ok("Hello".to_string())));
    }

    assert!(client.conversation_history().await.is_empty());
}

#[tokio::test]
async fn stream_is_lazy_until_polled() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", PATH).expect(0).create_async().await;

    let client = ResponsesClient::new(config_for(&server));
    let stream = client.stream("Hi", None);
    drop(stream);

    mock.assert_async().await;
    assert!(client.conversation_history().await.is_empty());
}

#[tokio::test]
async fn update_configuration_trims_history() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(reply_body("ok"))
        .expect(2)
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    client.send("one", None).await.unwrap();
    client.send("two", None).await.unwrap();
    assert_eq!(client.conversation_history().await.len(), 4);

    let config = client.configuration().await.with_max_history_items(1);
    client.update_configuration(config).await;

    assert_eq!(
        client.conversation_history().await,
        vec![ChatMessage::assistant("ok")]
    );
    assert_eq!(client.configuration().await.max_history_items(), 1);
}

#[tokio::test]
async fn history_respects_item_limit_and_clears() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(reply_body("ok"))
        .expect(4)
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server).with_max_history_items(5));
    for turn in 1..=4_usize {
        client.send("q", None).await.unwrap();
        assert_eq!(client.conversation_history().await.len(), (2 * turn).min(5));
    }

    client.clear_history().await;
    assert!(client.conversation_history().await.is_empty());
    assert_eq!(client.history_stats().await.total_messages, 0);
}

#[tokio::test]
async fn concurrent_sends_record_whole_turns() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(reply_body("answer"))
        .expect(6)
        .create_async()
        .await;

    let client = ResponsesClient::new(config_for(&server));
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.send(&format!("question {i}"), None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let history = client.conversation_history().await;
    assert_eq!(history.len(), 12);
    for pair in history.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1], ChatMessage::assistant("answer"));
    }
}
