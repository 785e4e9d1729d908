// Shared fake session server, booted once per test binary.
#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{
        Query,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::OnceLock, thread, time::Duration};

static SERVER_ADDR: OnceLock<SocketAddr> = OnceLock::new();

// Score the fake server awards for the answer "correct".
pub const CORRECT_ANSWER_POINTS: i64 = 10;
// A scripted opponent already sits in every session with this score.
pub const BOT_NAME: &str = "Bot";
pub const BOT_SCORE: i64 = 5;

/// HTTP base URL of the fake session server, started on first use.
pub fn ensure_server() -> String {
    format!("http://{}", server_addr())
}

pub fn ws_url() -> String {
    format!("ws://{}/ws", server_addr())
}

fn server_addr() -> SocketAddr {
    *SERVER_ADDR.get_or_init(|| {
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        // Its own thread and runtime, so the server outlives each `#[tokio::test]` runtime.
        thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("fake server runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind fake session server");
                let addr = listener.local_addr().expect("fake server address");
                addr_tx.send(addr).expect("publish fake server address");
                axum::serve(listener, router())
                    .await
                    .expect("fake session server stopped");
            });
        });

        let addr = addr_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("fake session server should bind");
        wait_until_accepting(addr);
        addr
    })
}

fn wait_until_accepting(addr: SocketAddr) {
    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("fake session server at {addr} is not accepting connections");
}

fn router() -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/ws", get(session_socket))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody {
    #[serde(default)]
    collection_id: String,
}

async fn create_session(Json(body): Json<CreateSessionBody>) -> impl IntoResponse {
    if body.collection_id.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"message": "collectionId is required"})),
        );
    }

    let id = uuid::Uuid::new_v4().simple().to_string();
    (
        StatusCode::CREATED,
        Json(json!({
            "sessionId": format!("s-{id}"),
            "sessionCode": id[..6].to_uppercase(),
        })),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionQuery {
    code: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn session_socket(
    ws: WebSocketUpgrade,
    Query(query): Query<SessionQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_quiz(socket, query))
}

// One scripted quiz per connection: join, start, one question, end.
async fn run_quiz(mut socket: WebSocket, query: SessionQuery) {
    let session_id = query
        .session_id
        .unwrap_or_else(|| format!("s-{}", query.code));
    let mut me: Option<(String, String, i64)> = None;

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };

        match frame["type"].as_str() {
            Some("join") => {
                let name = frame["data"]["displayName"]
                    .as_str()
                    .unwrap_or("anonymous")
                    .to_owned();
                let guest_id = uuid::Uuid::new_v4().to_string();
                me = Some((guest_id, name, 0));
                if send(&mut socket, roster(me.as_ref())).await.is_err() {
                    return;
                }
            }
            Some("start") => {
                let frames = [
                    json!({"type": "sessionStart", "data": {"sessionId": session_id}}),
                    json!({"type": "nextActivity", "data": {"activityId": "q1", "pointType": "STANDARD"}}),
                ];
                for frame in frames {
                    if send(&mut socket, frame).await.is_err() {
                        return;
                    }
                }
            }
            Some("advance") => {
                let frame = json!({"type": "nextActivity", "data": {"activityId": "q2", "pointType": "DOUBLE_POINTS"}});
                if send(&mut socket, frame).await.is_err() {
                    return;
                }
            }
            Some("submitActivity") => {
                if frame["data"]["answerContent"] == "correct"
                    && let Some((_, _, score)) = me.as_mut()
                {
                    *score += CORRECT_ANSWER_POINTS;
                }
                let summary: Vec<Value> = me
                    .iter()
                    .map(|(guest_id, name, score)| {
                        json!({"guestId": guest_id, "displayName": name, "finalScore": score})
                    })
                    .collect();
                let frames = [
                    roster(me.as_ref()),
                    json!({"type": "sessionEnd", "data": {"sessionId": session_id}}),
                    json!({"type": "sessionSummary", "data": summary}),
                ];
                for frame in frames {
                    if send(&mut socket, frame).await.is_err() {
                        return;
                    }
                }
            }
            Some("leave") => break,
            _ => {
                let frame = json!({"type": "error", "data": {"message": "unknown frame"}});
                if send(&mut socket, frame).await.is_err() {
                    return;
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}

fn roster(me: Option<&(String, String, i64)>) -> Value {
    let mut entries = vec![json!({"guestId": "bot", "displayName": BOT_NAME, "realtimeScore": BOT_SCORE})];
    if let Some((guest_id, name, score)) = me {
        entries.push(json!({"guestId": guest_id, "displayName": name, "realtimeScore": score}));
    }
    json!({"type": "participantsUpdate", "data": entries})
}

async fn send(socket: &mut WebSocket, frame: Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(frame.to_string().into())).await
}
