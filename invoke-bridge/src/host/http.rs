use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use super::Host;
use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{EventMessage, InvokePayload};
use crate::error::BridgeError;
use crate::events::EventBus;
use crate::request::{Failure, Request, Response};
use crate::version::user_agent;

/// Where the HTTP invoke server lives and which window this client is.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server origin, e.g. `http://localhost:4100`.
    pub base_url: String,
    /// Window label used as the first path segment.
    pub window: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            window: "main".to_string(),
        }
    }

    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        self.window = window.into();
        self
    }

    fn url(&self, last_segment: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.window,
            last_segment
        )
    }
}

/// Host reached over the HTTP invoke protocol.
pub struct HttpHost {
    config: ClientConfig,
    client: reqwest::Client,
}

impl HttpHost {
    pub fn new(config: ClientConfig) -> Result<Self, BridgeError> {
        // No request timeout: a command may legitimately take as long as it needs.
        let client = reqwest::Client::builder()
            .user_agent(user_agent())
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send(&self, request: Request) -> Result<Result<Response, Failure>, BridgeError> {
        let url = self.config.url(&request.name);
        let payload = InvokePayload::new(request.name, request.args);

        tracing::debug!(request_id = %request.id, %url, "Invoking over HTTP");
        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() && body.is_empty() {
            return Ok(Err(BridgeError::Status(status.as_u16()).into()));
        }

        let value: serde_json::Value = serde_json::from_slice(&body)?;
        if status == reqwest::StatusCode::OK {
            Ok(Ok(Response::new(value)))
        } else {
            tracing::debug!(request_id = %request.id, status = status.as_u16(), "Command rejected");
            Ok(Err(Failure::new(value)))
        }
    }
}

#[async_trait]
impl Host for HttpHost {
    async fn invoke(&self, request: Request) -> Result<Response, Failure> {
        match self.send(request).await {
            Ok(outcome) => outcome,
            Err(e) => Err(e.into()),
        }
    }

    async fn forward_events(&self, bus: EventBus) -> Result<JoinHandle<()>, BridgeError> {
        let url = self.config.url("events");

        // The server subscribes before sending headers, so once this resolves
        // every later emit is framed onto this body.
        let response = self.client.get(&url).send().await?.error_for_status()?;
        tracing::debug!(%url, "Event stream connected");

        Ok(tokio::spawn(async move {
            match pump_events(response, &bus).await {
                Ok(()) => tracing::debug!(%url, "Event stream closed by host"),
                Err(e) => tracing::warn!(%url, error = %e, "Event stream failed"),
            }
        }))
    }
}

/// Read length-delimited `EventMessage` frames from the host until it hangs up.
async fn pump_events(response: reqwest::Response, bus: &EventBus) -> Result<(), BridgeError> {
    let body = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
    let mut frames = FramedRead::new(StreamReader::new(body), JsonCodec::<EventMessage>::new());

    while let Some(frame) = frames.next().await {
        let message = frame?;
        if bus.is_shut_down() {
            break;
        }
        bus.emit(&message.event, message.payload);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Args;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::bytes::BytesMut;
    use tokio_util::codec::Encoder;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(value: serde_json::Value) -> Args {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("args must be an object"),
        }
    }

    fn host_for(server: &MockServer) -> HttpHost {
        HttpHost::new(ClientConfig::new(server.uri())).unwrap()
    }

    #[test]
    fn urls_are_window_scoped() {
        let config = ClientConfig::new("http://localhost:4100/").with_window("settings");
        assert_eq!(
            config.url("test_command"),
            "http://localhost:4100/settings/test_command"
        );
    }

    #[tokio::test]
    async fn ok_status_resolves_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/main/test_command"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({"cmd": "test_command", "args": 5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("5 processed")))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = host_for(&server)
            .invoke(Request::new("test_command", args(json!({"args": 5}))))
            .await;

        assert_eq!(outcome, Ok(Response::new(json!("5 processed"))));
    }

    #[tokio::test]
    async fn rejection_status_resolves_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/main/test_command"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!("bad args")))
            .mount(&server)
            .await;

        let outcome = host_for(&server)
            .invoke(Request::new("test_command", Args::new()))
            .await;

        assert_eq!(outcome, Err(Failure::new(json!("bad args"))));
    }

    #[tokio::test]
    async fn unparseable_body_is_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let failure = host_for(&server)
            .invoke(Request::new("test_command", Args::new()))
            .await
            .unwrap_err();

        assert!(failure.to_string().starts_with("invalid JSON"));
    }

    #[tokio::test]
    async fn empty_error_body_reports_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let failure = host_for(&server)
            .invoke(Request::new("test_command", Args::new()))
            .await
            .unwrap_err();

        assert_eq!(failure.to_string(), "host responded with 404");
    }

    #[tokio::test]
    async fn unreachable_host_is_failure() {
        let host = HttpHost::new(ClientConfig::new("http://127.0.0.1:1")).unwrap();

        let failure = host
            .invoke(Request::new("test_command", Args::new()))
            .await
            .unwrap_err();

        assert!(failure.to_string().starts_with("request to host failed"));
    }

    #[tokio::test]
    async fn event_stream_rejection_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/main/events"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = host_for(&server)
            .forward_events(EventBus::new())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("request to host failed"));
    }

    #[tokio::test]
    async fn event_frames_are_forwarded() {
        let server = MockServer::start().await;

        let mut codec = JsonCodec::<EventMessage>::new();
        let mut body = BytesMut::new();
        codec
            .encode(
                EventMessage::broadcast("time_elapsed", json!({"seconds": 3})),
                &mut body,
            )
            .unwrap();
        codec
            .encode(EventMessage::broadcast("other", json!(null)), &mut body)
            .unwrap();

        Mock::given(method("GET"))
            .and(path("/main/events"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(&server)
            .await;

        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _token = bus.listen("time_elapsed", move |payload| {
            let _ = tx.send(payload);
        });

        let forwarder = host_for(&server).forward_events(bus).await.unwrap();
        forwarder.await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, json!({"seconds": 3}));
    }
}
