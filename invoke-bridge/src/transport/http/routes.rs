//! HTTP route handlers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::{FutureExt, Stream};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::Encoder;

use super::responder::Responder;
use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{EventMessage, InvokePayload, InvokeResponse};
use crate::command::{CommandRouter, InvokeContext};
use crate::events::Emitter;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    router: Arc<CommandRouter>,
    emitter: Emitter,
    responder: Arc<Responder>,
    allowed_origins: Arc<[String]>,
    windows: Arc<[String]>,
    /// Flips to true when the server is shutting down; ends event streams.
    shutdown_rx: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        router: Arc<CommandRouter>,
        emitter: Emitter,
        responder: Arc<Responder>,
        allowed_origins: Vec<String>,
        windows: Vec<String>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            router,
            emitter,
            responder,
            allowed_origins: allowed_origins.into(),
            windows: windows.into(),
            shutdown_rx,
        }
    }

    fn knows_window(&self, window: &str) -> bool {
        self.windows.iter().any(|w| w == window)
    }

    /// CORS headers for a reply to a request carrying `request` headers.
    fn cors(&self, request: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(origin) = request.get(header::ORIGIN)
            && let Ok(value) = origin.to_str()
            && self.allowed_origins.iter().any(|allowed| allowed == value)
        {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers
    }
}

fn error_response(status: StatusCode, cors: HeaderMap, message: String) -> Response {
    (status, cors, Json(json!(message))).into_response()
}

/// Absent content type counts as JSON; webview shims do not always set it.
fn is_json_content(headers: &HeaderMap) -> bool {
    match headers.get(header::CONTENT_TYPE) {
        None => true,
        Some(value) => value
            .to_str()
            .map(|v| v.trim_start().starts_with("application/json"))
            .unwrap_or(false),
    }
}

async fn preflight(State(state): State<AppState>, headers: HeaderMap) -> Response {
    (StatusCode::OK, state.cors(&headers)).into_response()
}

async fn fallback(State(state): State<AppState>, method: Method, headers: HeaderMap) -> Response {
    let cors = state.cors(&headers);
    if method == Method::OPTIONS {
        return (StatusCode::OK, cors).into_response();
    }
    error_response(StatusCode::NOT_FOUND, cors, "no such route".to_string())
}

async fn invoke(
    State(state): State<AppState>,
    Path((window, command)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let cors = state.cors(&headers);

    if !state.knows_window(&window) {
        return error_response(
            StatusCode::NOT_FOUND,
            cors,
            format!("window {window} not found"),
        );
    }

    if !is_json_content(&headers) {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            cors,
            "expected application/json".to_string(),
        );
    }

    let payload: InvokePayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(%window, %command, error = %e, "Malformed invoke payload");
            return error_response(
                StatusCode::BAD_REQUEST,
                cors,
                format!("invalid invoke payload: {e}"),
            );
        }
    };

    let callback = payload.callback.clone();
    let outcome = match state.responder.register(callback.clone()) {
        Ok(rx) => rx,
        Err(e) => return error_response(StatusCode::CONFLICT, cors, e.to_string()),
    };

    tracing::debug!(%window, %command, %callback, "Invoke received");

    let router = Arc::clone(&state.router);
    let responder = Arc::clone(&state.responder);
    let ctx = InvokeContext::new(window, command.clone(), state.emitter.clone());
    tokio::spawn(async move {
        let response = match AssertUnwindSafe(router.dispatch(ctx, payload.args))
            .catch_unwind()
            .await
        {
            Ok(result) => InvokeResponse::from(result),
            Err(_) => {
                tracing::error!(%command, "Command panicked");
                InvokeResponse::Err(json!(format!("command {command} panicked")))
            }
        };
        responder.respond(&callback, response);
    });

    match outcome.await {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, cors, Json(response.into_body())).into_response()
        }
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            cors,
            "command dropped without a reply".to_string(),
        ),
    }
}

async fn events(
    State(state): State<AppState>,
    Path(window): Path<String>,
    headers: HeaderMap,
) -> Response {
    let cors = state.cors(&headers);

    if !state.knows_window(&window) {
        return error_response(
            StatusCode::NOT_FOUND,
            cors,
            format!("window {window} not found"),
        );
    }

    tracing::debug!(%window, "Event stream opened");
    let frames = event_frames(state.emitter.subscribe(), state.shutdown_rx.clone(), window);

    (
        StatusCode::OK,
        cors,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(frames),
    )
        .into_response()
}

/// Resolves once shutdown is signalled or the signal sender is gone.
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

struct FrameState {
    rx: broadcast::Receiver<EventMessage>,
    shutdown_rx: watch::Receiver<bool>,
    window: String,
    codec: JsonCodec<EventMessage>,
}

/// Length-delimited JSON frames for every event targeting `window`, until
/// the emitter closes or the server shuts down.
fn event_frames(
    rx: broadcast::Receiver<EventMessage>,
    shutdown_rx: watch::Receiver<bool>,
    window: String,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let state = FrameState {
        rx,
        shutdown_rx,
        window,
        codec: JsonCodec::new(),
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            let message = tokio::select! {
                _ = stopped(&mut state.shutdown_rx) => None,
                received = state.rx.recv() => match received {
                    Ok(message) => Some(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(window = %state.window, skipped, "Event stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => None,
                },
            };

            let Some(message) = message else {
                tracing::debug!(window = %state.window, "Event stream closed");
                return None;
            };
            if !message.targets(&state.window) {
                continue;
            }

            let mut buf = BytesMut::new();
            if let Err(e) = state.codec.encode(message, &mut buf) {
                tracing::warn!(window = %state.window, error = %e, "Failed to encode event");
                continue;
            }
            return Some((Ok(buf.freeze()), state));
        }
    })
}

pub fn routes(state: AppState) -> Router {
    // A static segment wins over a parameter, so `events` cannot be a command name.
    Router::new()
        .route("/{window}/events", get(events).options(preflight))
        .route("/{window}/{command}", post(invoke).options(preflight))
        .fallback(fallback)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::CallbackId;
    use crate::command::parse_arg;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tokio_util::codec::Decoder;
    use tower::ServiceExt;

    struct TestApp {
        state: AppState,
        shutdown_tx: watch::Sender<bool>,
    }

    impl TestApp {
        fn new(router: CommandRouter) -> Self {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let state = AppState::new(
                Arc::new(router),
                Emitter::default(),
                Arc::new(Responder::new()),
                vec!["http://localhost:8080".to_string()],
                vec!["main".to_string()],
                shutdown_rx,
            );
            Self { state, shutdown_tx }
        }

        fn app(&self) -> Router {
            routes(self.state.clone())
        }
    }

    async fn test_command(
        ctx: InvokeContext,
        args: crate::request::Args,
    ) -> Result<serde_json::Value, serde_json::Value> {
        let n: u64 = parse_arg(&ctx, &args, "args")?;
        Ok(json!(format!("{n} processed")))
    }

    fn test_router() -> CommandRouter {
        CommandRouter::new()
            .command("test_command", test_command)
            .command("reject", |_ctx, _args| async move {
                Err::<serde_json::Value, _>(json!("bad args"))
            })
            .command("boom", |_ctx, _args| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, serde_json::Value>(json!(null))
            })
    }

    fn invoke_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn payload(extra: serde_json::Value) -> serde_json::Value {
        let mut body = json!({"callback": CallbackId::new(), "error": CallbackId::new()});
        if let (Some(target), serde_json::Value::Object(extra)) = (body.as_object_mut(), extra) {
            target.extend(extra);
        }
        body
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn preflight_echoes_allowed_origin() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(
                Request::options("/main/test_command")
                    .header("origin", "http://localhost:8080")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers["access-control-allow-origin"],
            "http://localhost:8080"
        );
        assert_eq!(headers["access-control-allow-headers"], "*");
        assert_eq!(
            headers["access-control-allow-methods"],
            "GET, POST, OPTIONS"
        );
    }

    #[tokio::test]
    async fn unknown_origin_gets_no_allow_origin() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(
                Request::options("/anything/at/all")
                    .header("origin", "http://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get("access-control-allow-origin")
                .is_none()
        );
    }

    #[tokio::test]
    async fn ok_outcome_is_200_with_value() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(invoke_request(
                "/main/test_command",
                payload(json!({"cmd": "test_command", "args": 5})),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, json!("5 processed"));
    }

    #[tokio::test]
    async fn err_outcome_is_400_with_value() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(invoke_request("/main/reject", payload(json!({}))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_json(response).await, json!("bad args"));
    }

    #[tokio::test]
    async fn invalid_args_are_rejected_by_command() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(invoke_request(
                "/main/test_command",
                payload(json!({"args": "five"})),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let message = response_json(response).await;
        assert!(
            message
                .as_str()
                .unwrap()
                .starts_with("invalid args `args` for command `test_command`")
        );
    }

    #[tokio::test]
    async fn unknown_command_is_400() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(invoke_request("/main/nope", payload(json!({}))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_json(response).await, json!("command nope not found"));
    }

    #[tokio::test]
    async fn panicking_command_is_400() {
        let test_app = TestApp::new(test_router());

        let response = test_app
            .app()
            .oneshot(invoke_request("/main/boom", payload(json!({}))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_json(response).await, json!("command boom panicked"));
        assert_eq!(test_app.state.responder.pending(), 0);
    }

    #[tokio::test]
    async fn unknown_window_is_404() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(invoke_request("/settings/test_command", payload(json!({}))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response_json(response).await,
            json!("window settings not found")
        );
    }

    #[tokio::test]
    async fn non_json_content_type_is_415() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(
                Request::post("/main/test_command")
                    .header("content-type", "text/plain")
                    .body(Body::from("args=5"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn missing_content_type_is_treated_as_json() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(
                Request::post("/main/test_command")
                    .body(Body::from(payload(json!({"args": 2})).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, json!("2 processed"));
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(invoke_request("/main/test_command", json!({"args": 5})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let message = response_json(response).await;
        assert!(
            message
                .as_str()
                .unwrap()
                .starts_with("invalid invoke payload")
        );
    }

    #[tokio::test]
    async fn duplicate_callback_is_409() {
        let test_app = TestApp::new(test_router());
        let _held = test_app
            .state
            .responder
            .register(CallbackId::from("cb-1"))
            .unwrap();

        let response = test_app
            .app()
            .oneshot(invoke_request(
                "/main/test_command",
                json!({"callback": "cb-1", "error": "cb-2", "args": 5}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response_json(response).await,
            json!("callback cb-1 is already pending")
        );
    }

    #[tokio::test]
    async fn event_stream_frames_window_events_until_shutdown() {
        let test_app = TestApp::new(test_router());

        let response = test_app
            .app()
            .oneshot(Request::get("/main/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let emitter = test_app.state.emitter.clone();
        emitter
            .emit_to("settings", "time_elapsed", json!("not ours"))
            .unwrap();
        emitter
            .emit("time_elapsed", json!({"seconds": 3}))
            .unwrap();

        let mut body = response.into_body();
        let chunk = body
            .frame()
            .await
            .unwrap()
            .unwrap()
            .into_data()
            .unwrap();
        let mut buf = BytesMut::from(&chunk[..]);
        let message = JsonCodec::<EventMessage>::new()
            .decode(&mut buf)
            .unwrap()
            .unwrap();
        assert_eq!(
            message,
            EventMessage::broadcast("time_elapsed", json!({"seconds": 3}))
        );

        test_app.shutdown_tx.send_replace(true);
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn event_stream_for_unknown_window_is_404() {
        let app = TestApp::new(test_router()).app();

        let response = app
            .oneshot(Request::get("/settings/events").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
