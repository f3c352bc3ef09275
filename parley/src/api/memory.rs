//! In-memory [`ChatApi`] used by tests and the offline demo mode.
//!
//! Records are stored in the service's native PascalCase shape so that
//! everything read back goes through the same normalization path as a
//! live deployment.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;

use parley_proto::message::{MessageId, MessageWriteRequest, ReceiptKind, User};

use super::{ApiError, ChatApi};

/// Identifies a [`ChatApi`] operation for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    /// `list_users`
    ListUsers,
    /// `fetch_history`
    FetchHistory,
    /// `create_message`
    CreateMessage,
    /// `acknowledge`
    Acknowledge,
}

/// What [`InMemoryChatApi::create_message`] answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateResponse {
    /// The stored record, in snake_case.
    Echo,
    /// A fixed body, e.g. a bare status object.
    Fixed(Value),
}

/// A receipt the fake service accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReceipt {
    /// Delivered or read.
    pub kind: ReceiptKind,
    /// Acknowledged message.
    pub message_id: MessageId,
    /// Who acknowledged it.
    pub recipient_id: String,
}

#[derive(Debug)]
struct Inner {
    users: Vec<User>,
    records: Vec<Value>,
    next_id: u64,
    create_response: CreateResponse,
    failures: HashMap<ApiOp, ApiError>,
    receipts: Vec<RecordedReceipt>,
    history_requests: usize,
}

/// A fake chat service holding users and messages in memory.
#[derive(Debug)]
pub struct InMemoryChatApi {
    inner: Mutex<Inner>,
    writes_open: watch::Sender<bool>,
}

impl InMemoryChatApi {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                users: Vec::new(),
                records: Vec::new(),
                next_id: 1,
                create_response: CreateResponse::Echo,
                failures: HashMap::new(),
                receipts: Vec::new(),
                history_requests: 0,
            }),
            writes_open: watch::Sender::new(true),
        }
    }

    /// Creates a service that knows `users`.
    #[must_use]
    pub fn with_users(users: Vec<User>) -> Self {
        let api = Self::new();
        api.inner.lock().users = users;
        api
    }

    /// Stores a raw record as if it had been written earlier.
    pub fn seed_record(&self, record: Value) {
        self.inner.lock().records.push(record);
    }

    /// Makes every subsequent call to `op` fail with `error`.
    pub fn fail(&self, op: ApiOp, error: ApiError) {
        self.inner.lock().failures.insert(op, error);
    }

    /// Clears an injected failure.
    pub fn recover(&self, op: ApiOp) {
        self.inner.lock().failures.remove(&op);
    }

    /// Changes what `create_message` answers with.
    pub fn respond_to_create(&self, response: CreateResponse) {
        self.inner.lock().create_response = response;
    }

    /// Parks `create_message` calls until [`Self::release_writes`].
    pub fn hold_writes(&self) {
        self.writes_open.send_replace(false);
    }

    /// Lets parked and future `create_message` calls complete.
    pub fn release_writes(&self) {
        self.writes_open.send_replace(true);
    }

    /// Receipts accepted so far, in arrival order.
    #[must_use]
    pub fn receipts(&self) -> Vec<RecordedReceipt> {
        self.inner.lock().receipts.clone()
    }

    /// Raw records currently stored.
    #[must_use]
    pub fn records(&self) -> Vec<Value> {
        self.inner.lock().records.clone()
    }

    /// Number of `fetch_history` calls served.
    #[must_use]
    pub fn history_requests(&self) -> usize {
        self.inner.lock().history_requests
    }

    fn check(&self, op: ApiOp) -> Result<(), ApiError> {
        match self.inner.lock().failures.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryChatApi {
    fn default() -> Self {
        Self::new()
    }
}

fn field<'a>(record: &'a Value, key: &str) -> &'a str {
    record.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn between(record: &Value, user1: &str, user2: &str) -> bool {
    let sender = field(record, "SenderID");
    let recipient = field(record, "RecipientID");
    (sender == user1 && recipient == user2) || (sender == user2 && recipient == user1)
}

impl ChatApi for InMemoryChatApi {
    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.check(ApiOp::ListUsers)?;
        Ok(self.inner.lock().users.clone())
    }

    async fn fetch_history(&self, user1: &str, user2: &str) -> Result<Vec<Value>, ApiError> {
        self.check(ApiOp::FetchHistory)?;
        let mut inner = self.inner.lock();
        inner.history_requests += 1;
        Ok(inner
            .records
            .iter()
            .filter(|record| between(record, user1, user2))
            .cloned()
            .collect())
    }

    async fn create_message(&self, request: &MessageWriteRequest) -> Result<Value, ApiError> {
        let mut open = self.writes_open.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = open.wait_for(|open| *open).await;
        self.check(ApiOp::CreateMessage)?;

        let mut inner = self.inner.lock();
        let id = format!("srv-{}", inner.next_id);
        inner.next_id += 1;
        inner.records.push(json!({
            "ID": id,
            "SenderID": request.sender_id,
            "RecipientID": request.recipient_id,
            "Content": request.content,
            "MediaURL": request.media_url,
            "IsBroadcast": request.is_broadcast,
            "CreatedAt": request.created_at,
            "Delivered": false,
            "Read": false,
        }));

        Ok(match &inner.create_response {
            CreateResponse::Echo => json!({
                "id": id,
                "sender_id": request.sender_id,
                "recipient_id": request.recipient_id,
                "content": request.content,
                "media_url": request.media_url,
                "is_broadcast": request.is_broadcast,
                "created_at": request.created_at,
            }),
            CreateResponse::Fixed(body) => body.clone(),
        })
    }

    async fn acknowledge(
        &self,
        kind: ReceiptKind,
        message_id: &MessageId,
        recipient_id: &str,
    ) -> Result<(), ApiError> {
        self.check(ApiOp::Acknowledge)?;
        let mut inner = self.inner.lock();
        let flag = match kind {
            ReceiptKind::Delivered => "Delivered",
            ReceiptKind::Read => "Read",
        };
        if let Some(record) = inner
            .records
            .iter_mut()
            .find(|record| field(record, "ID") == message_id.as_str())
        {
            record[flag] = Value::Bool(true);
        }
        inner.receipts.push(RecordedReceipt {
            kind,
            message_id: message_id.clone(),
            recipient_id: recipient_id.to_owned(),
        });
        Ok(())
    }
}
