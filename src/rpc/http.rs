//! Streamable HTTP transport
//!
//! `POST /mcp` carries one client message; `initialize` mints a session whose
//! id rides the `Mcp-Session-Id` header. `GET /mcp` opens the session's SSE
//! notification stream. When the stream drops, the next push fails and the
//! notifier evicts the session.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::stream::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use super::protocol::{push_to_notification, JsonRpcRequest};
use super::service::McpService;
use crate::error::Result;
use crate::session::{Push, SessionHandle, SessionId};

const SESSION_HEADER: &str = "mcp-session-id";

struct Slot {
    handle: SessionHandle,
    /// Present until the client opens its notification stream.
    rx: Option<UnboundedReceiver<Push>>,
}

#[derive(Clone)]
struct HttpState {
    service: McpService,
    slots: Arc<Mutex<HashMap<SessionId, Slot>>>,
}

pub fn router(service: McpService) -> Router {
    let state = HttpState {
        service,
        slots: Arc::new(Mutex::new(HashMap::new())),
    };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/mcp", get(open_stream).post(post_message).delete(end_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the shutdown token fires. Bind failures propagate.
pub async fn serve(
    service: McpService,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| crate::error::Error::InvalidParams(format!("bad bind address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening on http://{addr}/mcp");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

fn session_id(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
}

async fn post_message(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let request: JsonRpcRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(err) => {
            let reply = McpService::invalid_payload(format!("invalid request: {err}"));
            return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
        }
    };

    if request.method == "initialize" {
        let (handle, rx) = SessionHandle::channel();
        let id = handle.id;
        state.slots.lock().unwrap().insert(
            id,
            Slot {
                handle: handle.clone(),
                rx: Some(rx),
            },
        );
        info!(session = %id, "session initialized");
        let response = state.service.handle(&handle, request);
        let header = [(HeaderName::from_static(SESSION_HEADER), id.to_string())];
        return match response {
            Some(response) => (header, Json(response)).into_response(),
            None => (StatusCode::ACCEPTED, header).into_response(),
        };
    }

    let Some(id) = session_id(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("missing or malformed {SESSION_HEADER} header"),
        )
            .into_response();
    };
    let handle = {
        let slots = state.slots.lock().unwrap();
        slots.get(&id).map(|slot| slot.handle.clone())
    };
    let Some(handle) = handle else {
        return (StatusCode::NOT_FOUND, "unknown session; initialize first").into_response();
    };

    match state.service.handle(&handle, request) {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn open_stream(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some(id) = session_id(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("missing or malformed {SESSION_HEADER} header"),
        )
            .into_response();
    };

    let rx = {
        let mut slots = state.slots.lock().unwrap();
        match slots.get_mut(&id) {
            Some(slot) => slot.rx.take(),
            None => {
                return (StatusCode::NOT_FOUND, "unknown session; initialize first")
                    .into_response()
            }
        }
    };
    let Some(rx) = rx else {
        return (
            StatusCode::CONFLICT,
            "notification stream already consumed for this session",
        )
            .into_response();
    };

    info!(session = %id, "notification stream opened");
    notification_stream(rx).into_response()
}

fn notification_stream(
    rx: UnboundedReceiver<Push>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let events = UnboundedReceiverStream::new(rx).map(|push| {
        Ok(Event::default()
            .event("message")
            .data(push_to_notification(&push).to_string()))
    });
    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

async fn end_session(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some(id) = session_id(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("missing or malformed {SESSION_HEADER} header"),
        )
            .into_response();
    };
    state.slots.lock().unwrap().remove(&id);
    state.service.release_session(id);
    info!(session = %id, "session ended");
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::roster::Roster;
    use crate::session::SessionRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use std::path::PathBuf;
    use tower::util::ServiceExt;

    fn test_router() -> Router {
        let store = Store::open_in_memory().unwrap();
        let sessions = SessionRegistry::new();
        let roster = Roster::new(
            store.clone(),
            sessions.clone(),
            PathBuf::from("/nonexistent"),
            None,
        );
        router(McpService::new(store, sessions, roster))
    }

    fn post(body: Value, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json");
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn initialize_mints_a_session() {
        let app = test_router();
        let response = app
            .oneshot(post(
                json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}}),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap();
        assert!(Uuid::parse_str(&id).is_ok());

        let body = body_json(response).await;
        assert_eq!(
            body["result"]["capabilities"]["tools"]["listChanged"],
            true
        );
    }

    #[tokio::test]
    async fn tool_calls_require_a_session() {
        let app = test_router();
        let response = app
            .clone()
            .oneshot(post(
                json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post(
                json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}}),
                Some(&Uuid::new_v4().to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn register_and_list_tools_over_http() {
        let app = test_router();
        let init = app
            .clone()
            .oneshot(post(
                json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}}),
                None,
            ))
            .await
            .unwrap();
        let session = init
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap();

        let register = app
            .clone()
            .oneshot(post(
                json!({
                    "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                    "params": {"name": "register", "arguments": {"agent_name": "argo"}}
                }),
                Some(&session),
            ))
            .await
            .unwrap();
        assert_eq!(register.status(), StatusCode::OK);
        let body = body_json(register).await;
        assert!(body["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("registered successfully"));

        let list = app
            .oneshot(post(
                json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list", "params": {}}),
                Some(&session),
            ))
            .await
            .unwrap();
        let body = body_json(list).await;
        assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 22);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let app = test_router();
        let response = app
            .oneshot(post(json!({"no": "method"}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
