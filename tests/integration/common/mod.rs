//! In-process chat service for integration tests.
//!
//! Serves the REST endpoints (`/auth/users`, `/messages`,
//! `/messages/{delivered|read}`) and the realtime socket (`/ws?token=`)
//! on an OS-assigned port. A socket's token doubles as its user id.
//!
//! Persisted records use the service's PascalCase field names so every
//! client-side read goes through normalization. Creating a message pushes
//! it to the recipient's sockets (every other socket for broadcasts);
//! acknowledging one pushes the receipt to its sender.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use parley::api::http::HttpChatApi;
use parley::connection::Endpoint;
use parley::connection::ws::WsDialer;
use parley::net::{self, ClientCommand, ClientHandle, NetConfig};
use parley::state::ChatSnapshot;

/// Reconnect delay used by test clients, shorter than the production 2s.
pub const TEST_RECONNECT_DELAY: Duration = Duration::from_millis(250);

/// A receipt the service accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub kind: String,
    pub message_id: String,
    pub recipient_id: String,
}

struct Socket {
    user: String,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

#[derive(Default)]
struct ServiceState {
    users: Vec<Value>,
    records: Mutex<Vec<Value>>,
    receipts: Mutex<Vec<Receipt>>,
    sockets: Mutex<Vec<Socket>>,
    frames: Mutex<Vec<(String, Value)>>,
    next_id: AtomicU64,
    accepted: AtomicUsize,
    reject_credentials: AtomicBool,
}

impl ServiceState {
    fn push_to(&self, user: &str, frame: &Value) {
        let text = frame.to_string();
        for socket in self.sockets.lock().iter().filter(|s| s.user == user) {
            let _ = socket.outbound.send(WsMessage::Text(text.clone().into()));
        }
    }

    fn push_except(&self, user: &str, frame: &Value) {
        let text = frame.to_string();
        for socket in self.sockets.lock().iter().filter(|s| s.user != user) {
            let _ = socket.outbound.send(WsMessage::Text(text.clone().into()));
        }
    }

    fn online(&self) -> Vec<String> {
        let mut users: Vec<String> = self.sockets.lock().iter().map(|s| s.user.clone()).collect();
        users.sort();
        users.dedup();
        users
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        !self.reject_credentials.load(Ordering::SeqCst)
            && headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("Bearer "))
    }
}

/// A running fake service.
pub struct FakeService {
    pub addr: SocketAddr,
    state: Arc<ServiceState>,
    server: tokio::task::JoinHandle<()>,
}

impl FakeService {
    /// Starts the service with one roster entry per user id.
    pub async fn start(user_ids: &[&str]) -> Self {
        let users = user_ids
            .iter()
            .map(|id| json!({"id": id, "username": id.to_uppercase(), "email": format!("{id}@example.com")}))
            .collect();
        let state = Arc::new(ServiceState {
            users,
            next_id: AtomicU64::new(1),
            ..Default::default()
        });

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/auth/users", get(list_users))
            .route("/messages", get(history).post(create_message))
            .route("/messages/{kind}", post(acknowledge))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake service");
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            secure: false,
        }
    }

    /// Stores a record as if it had been written earlier.
    pub fn seed(&self, sender: &str, recipient: &str, content: &str) -> String {
        let id = format!("srv-{}", self.state.next_id.fetch_add(1, Ordering::SeqCst));
        self.state.records.lock().push(json!({
            "ID": id,
            "SenderID": sender,
            "RecipientID": recipient,
            "Content": content,
            "IsBroadcast": false,
            "CreatedAt": "2026-01-01T12:00:00Z",
            "Delivered": false,
            "Read": false,
        }));
        id
    }

    /// Pushes a raw frame to every socket of `user`.
    pub fn push(&self, user: &str, frame: &Value) {
        self.state.push_to(user, frame);
    }

    /// Makes every REST call answer 401.
    pub fn reject_credentials(&self, reject: bool) {
        self.state.reject_credentials.store(reject, Ordering::SeqCst);
    }

    /// Closes every open socket from the service side.
    pub fn drop_connections(&self) {
        self.state.sockets.lock().clear();
    }

    /// Total sockets accepted since start.
    pub fn accepted_sockets(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Sockets currently open.
    pub fn open_sockets(&self) -> usize {
        self.state.sockets.lock().len()
    }

    pub fn record(&self, id: &str) -> Option<Value> {
        self.state
            .records
            .lock()
            .iter()
            .find(|r| r["ID"] == id)
            .cloned()
    }

    pub fn records(&self) -> Vec<Value> {
        self.state.records.lock().clone()
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.state.receipts.lock().clone()
    }

    /// Frames clients sent over their sockets, with the sender's token.
    pub fn frames(&self) -> Vec<(String, Value)> {
        self.state.frames.lock().clone()
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<ServiceState>>,
) -> Response {
    let Some(user) = query.get("token").filter(|t| !t.is_empty()).cloned() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    ws.on_upgrade(move |socket| serve_socket(socket, user, state))
}

async fn serve_socket(socket: WebSocket, user: String, state: Arc<ServiceState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    state.push_except(&user, &json!({"type": "user_online", "userId": user}));
    state.sockets.lock().push(Socket {
        user: user.clone(),
        outbound: tx.clone(),
    });
    state.accepted.fetch_add(1, Ordering::SeqCst);
    let snapshot = json!({"type": "online_users", "userIds": state.online()});
    let _ = tx.send(WsMessage::Text(snapshot.to_string().into()));
    // Only the registry holds a sender now; dropping it closes the socket.
    drop(tx);

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(message) => {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    if frame["type"] == "get_online_users" {
                        let reply = json!({"type": "online_users", "userIds": state.online()});
                        state.push_to(&user, &reply);
                    }
                    state.frames.lock().push((user.clone(), frame));
                }
                Some(Ok(WsMessage::Close(_)) | Err(_)) | None => {
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    drop(rx);
    let still_online = {
        let mut sockets = state.sockets.lock();
        sockets.retain(|s| !s.outbound.is_closed());
        sockets.iter().any(|s| s.user == user)
    };
    if !still_online {
        state.push_except(&user, &json!({"type": "user_offline", "userId": user}));
    }
}

async fn list_users(State(state): State<Arc<ServiceState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.users.clone()).into_response()
}

async fn history(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let (Some(a), Some(b)) = (query.get("user1"), query.get("user2")) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let records: Vec<Value> = state
        .records
        .lock()
        .iter()
        .filter(|r| {
            let (s, t) = (&r["SenderID"], &r["RecipientID"]);
            (s == a.as_str() && t == b.as_str()) || (s == b.as_str() && t == a.as_str())
        })
        .cloned()
        .collect();
    Json(records).into_response()
}

async fn create_message(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let id = format!("srv-{}", state.next_id.fetch_add(1, Ordering::SeqCst));
    let record = json!({
        "ID": id,
        "SenderID": body["sender_id"],
        "RecipientID": body["recipient_id"],
        "Content": body["content"],
        "MediaURL": body.get("media_url").cloned().unwrap_or(Value::Null),
        "IsBroadcast": body["is_broadcast"],
        "CreatedAt": body["created_at"],
        "Delivered": false,
        "Read": false,
    });
    state.records.lock().push(record.clone());

    let push = json!({"type": "message", "payload": record});
    let sender = body["sender_id"].as_str().unwrap_or_default();
    if body["is_broadcast"] == true {
        state.push_except(sender, &push);
    } else if let Some(recipient) = body["recipient_id"].as_str() {
        state.push_to(recipient, &push);
    }
    (StatusCode::CREATED, Json(record)).into_response()
}

async fn acknowledge(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Path(kind): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let flag = match kind.as_str() {
        "delivered" => "Delivered",
        "read" => "Read",
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    let (Some(message_id), Some(recipient_id)) = (query.get("message_id"), query.get("recipient_id"))
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let sender = {
        let mut records = state.records.lock();
        let Some(record) = records.iter_mut().find(|r| r["ID"] == message_id.as_str()) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        record[flag] = Value::Bool(true);
        record["SenderID"].as_str().unwrap_or_default().to_string()
    };
    state.receipts.lock().push(Receipt {
        kind: kind.clone(),
        message_id: message_id.clone(),
        recipient_id: recipient_id.clone(),
    });
    state.push_to(&sender, &json!({"type": kind, "message_id": message_id}));
    StatusCode::OK.into_response()
}

/// Starts a client for `user` against `service`, authenticated with the
/// user id as its token.
pub async fn start_client(service: &FakeService, user: &str) -> ClientHandle {
    let api = Arc::new(
        HttpChatApi::new(
            &service.base_url(),
            Some(user.to_string()),
            Duration::from_secs(5),
        )
        .unwrap(),
    );
    let mut config = NetConfig::new(service.endpoint());
    config.reconnect_delay = TEST_RECONNECT_DELAY;
    let handle = net::spawn_client(config, api, WsDialer::default());
    handle
        .send(ClientCommand::Authenticate {
            user_id: user.to_string(),
            token: user.to_string(),
        })
        .await;
    handle
}

/// Waits until the client's snapshot satisfies `predicate`.
pub async fn wait_for(
    handle: &mut ClientHandle,
    what: &str,
    mut predicate: impl FnMut(&ChatSnapshot) -> bool,
) -> ChatSnapshot {
    tokio::time::timeout(
        Duration::from_secs(10),
        handle.snapshots.wait_for(|s| predicate(s)),
    )
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    .expect("client task stopped")
    .clone()
}

/// Polls `condition` until it holds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
