//! WebSocket relay client implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::hex;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use futures_util::sink::SinkExt;
use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, error, info, warn};

use super::Relay;
use super::types::{
    ConnectionStatus, IncomingFrame, JsonRpcErrorObject, JsonRpcRequest, PendingSettlement,
    RelayError, RelayEvent, SessionProposal, SessionSettlement, SignerRequest, methods,
    pairing_uri,
};
use crate::config::RelayConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RelayError>>>>>;
type PendingProposals =
    Arc<Mutex<HashMap<String, oneshot::Sender<Result<SessionSettlement, RelayError>>>>>;

/// How long a published pairing URI stays valid
const PAIRING_TTL_SECS: i64 = 300;

/// Reason code sent with a user-initiated session delete
const USER_DISCONNECTED_CODE: i64 = 6000;

/// JSON-RPC relay client over a single WebSocket
pub struct WebSocketRelay {
    config: RelayConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    status_rx: watch::Receiver<ConnectionStatus>,
    sink: Arc<Mutex<Option<WsSink>>>,
    pending_requests: PendingRequests,
    pending_proposals: PendingProposals,
    events_tx: broadcast::Sender<RelayEvent>,
    next_id: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketRelay {
    /// Create a new relay client
    pub fn new(config: RelayConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (events_tx, _) = broadcast::channel(64);

        Self {
            config,
            status_tx,
            status_rx,
            sink: Arc::new(Mutex::new(None)),
            pending_requests: Arc::new(Mutex::new(HashMap::new())),
            pending_proposals: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            next_id: AtomicU64::new(1),
            reader: Mutex::new(None),
        }
    }

    /// Get current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        matches!(self.status(), ConnectionStatus::Connected)
    }

    /// Open the socket, retrying with exponential backoff
    async fn open_socket(&self) -> Result<WsStream, RelayError> {
        let endpoint = self.config.endpoint();
        let endpoint = endpoint.as_str();
        let max_attempts = self.config.max_reconnect_attempts.max(1);
        let attempts = &AtomicU32::new(0);

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.reconnect_interval_ms))
            .with_max_elapsed_time(None)
            .build();

        backoff::future::retry(policy, || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match connect_async(endpoint).await {
                Ok((stream, _)) => Ok(stream),
                Err(e) => {
                    let error_msg = format!("Failed to connect to relay: {}", e);
                    if attempt >= max_attempts {
                        error!("{} (attempt {}/{}, giving up)", error_msg, attempt, max_attempts);
                        Err(backoff::Error::permanent(RelayError::ConnectionError(error_msg)))
                    } else {
                        warn!("{} (attempt {}/{})", error_msg, attempt, max_attempts);
                        Err(backoff::Error::transient(RelayError::ConnectionError(error_msg)))
                    }
                }
            }
        })
        .await
    }

    /// Send one JSON-RPC request and wait for its response
    async fn call(&self, method: &str, params: Value) -> Result<Value, RelayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let text = serde_json::to_string(&request)
            .map_err(|e| RelayError::ParseError(format!("Failed to serialize request: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        self.pending_requests.lock().await.insert(id, tx);

        if let Err(e) = self.send_message(Message::Text(text)).await {
            self.pending_requests.lock().await.remove(&id);
            return Err(e);
        }
        debug!("Sent relay request {} ({})", id, method);

        match tokio::time::timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RelayError::ConnectionError(
                "Relay connection closed before response".to_string(),
            )),
            Err(_) => {
                self.pending_requests.lock().await.remove(&id);
                warn!("Relay request {} ({}) timed out", id, method);
                Err(RelayError::Timeout)
            }
        }
    }

    /// Send a message through the WebSocket
    async fn send_message(&self, message: Message) -> Result<(), RelayError> {
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(ws) => ws
                .send(message)
                .await
                .map_err(|e| RelayError::ConnectionError(format!("Failed to send: {}", e))),
            None => Err(RelayError::NotConnected),
        }
    }

    /// Start the reader task that routes responses and notifications
    fn spawn_reader(&self, mut stream: SplitStream<WsStream>) -> JoinHandle<()> {
        let pending_requests = self.pending_requests.clone();
        let pending_proposals = self.pending_proposals.clone();
        let events_tx = self.events_tx.clone();
        let status_tx = self.status_tx.clone();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => match Self::parse_frame(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Dropping malformed relay frame: {}", e);
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => {
                        info!("Relay closed the connection");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let error_msg = format!("Relay message error: {}", e);
                        error!("{}", error_msg);
                        let _ = status_tx.send(ConnectionStatus::Error(error_msg));
                        break;
                    }
                };

                match frame {
                    IncomingFrame::Response { id, outcome } => {
                        match pending_requests.lock().await.remove(&id) {
                            Some(tx) => {
                                let _ = tx.send(outcome);
                            }
                            None => debug!("Response for unknown request id {}", id),
                        }
                    }
                    IncomingFrame::Settle {
                        pairing_topic,
                        settlement,
                    } => match pending_proposals.lock().await.remove(&pairing_topic) {
                        Some(tx) => {
                            info!("Pairing {} settled as session {}", pairing_topic, settlement.topic);
                            let _ = tx.send(Ok(settlement));
                        }
                        None => debug!("Settlement for unknown pairing {}", pairing_topic),
                    },
                    IncomingFrame::Reject {
                        pairing_topic,
                        reason,
                    } => {
                        if let Some(tx) = pending_proposals.lock().await.remove(&pairing_topic) {
                            info!("Pairing {} rejected: {}", pairing_topic, reason);
                            let _ = tx.send(Err(RelayError::Rejected(reason)));
                        }
                    }
                    IncomingFrame::Event(event) => {
                        debug!("Relay event: {:?}", event);
                        let _ = events_tx.send(event);
                    }
                    IncomingFrame::Ignored => {}
                }
            }

            // Dropping the senders fails every waiter with a closed-connection error
            pending_requests.lock().await.clear();
            pending_proposals.lock().await.clear();
            sink.lock().await.take();
            let _ = status_tx.send(ConnectionStatus::Disconnected);
            let _ = events_tx.send(RelayEvent::TransportClosed);
            info!("Relay reader stopped");
        })
    }

    /// Classify an incoming text frame
    pub(crate) fn parse_frame(text: &str) -> Result<IncomingFrame, RelayError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RelayError::ParseError(format!("Failed to parse JSON: {}", e)))?;

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            let topic = |key: &str| {
                params
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| RelayError::ParseError(format!("{} without {}", method, key)))
            };

            return match method {
                methods::SESSION_SETTLE => {
                    let pairing_topic = topic("pairingTopic")?;
                    let settlement: SessionSettlement = serde_json::from_value(params.clone())
                        .map_err(|e| {
                            RelayError::ParseError(format!("Failed to parse settlement: {}", e))
                        })?;
                    Ok(IncomingFrame::Settle {
                        pairing_topic,
                        settlement,
                    })
                }
                methods::SESSION_REJECT => Ok(IncomingFrame::Reject {
                    pairing_topic: topic("pairingTopic")?,
                    reason: Self::reason_message(&params)
                        .unwrap_or_else(|| "User rejected".to_string()),
                }),
                methods::SESSION_DELETE => Ok(IncomingFrame::Event(RelayEvent::SessionDelete {
                    topic: topic("topic")?,
                    reason: Self::reason_message(&params),
                })),
                methods::SESSION_EXPIRE => Ok(IncomingFrame::Event(RelayEvent::SessionExpire {
                    topic: topic("topic")?,
                })),
                _ => {
                    debug!("Ignoring relay notification {}", method);
                    Ok(IncomingFrame::Ignored)
                }
            };
        }

        match value.get("id").and_then(Value::as_u64) {
            Some(id) => {
                let outcome = match value.get("error") {
                    Some(error) => {
                        let error: JsonRpcErrorObject = serde_json::from_value(error.clone())
                            .map_err(|e| {
                                RelayError::ParseError(format!("Failed to parse error: {}", e))
                            })?;
                        Err(RelayError::Rpc {
                            code: error.code,
                            message: error.message,
                        })
                    }
                    None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
                };
                Ok(IncomingFrame::Response { id, outcome })
            }
            None => Ok(IncomingFrame::Ignored),
        }
    }

    fn reason_message(params: &Value) -> Option<String> {
        match params.get("reason") {
            Some(Value::String(reason)) => Some(reason.clone()),
            Some(reason) => reason
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            None => None,
        }
    }

    fn random_hex() -> String {
        hex::encode(rand::random::<[u8; 32]>())
    }
}

#[async_trait]
impl Relay for WebSocketRelay {
    async fn connect(&self) -> Result<(), RelayError> {
        if self.is_connected() {
            debug!("Relay already connected");
            return Ok(());
        }

        let _ = self.status_tx.send(ConnectionStatus::Connecting);
        let stream = match self.open_socket().await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = self.status_tx.send(ConnectionStatus::Error(e.to_string()));
                return Err(e);
            }
        };

        let (sink, stream) = stream.split();
        *self.sink.lock().await = Some(sink);

        let handle = self.spawn_reader(stream);
        if let Some(previous) = self.reader.lock().await.replace(handle) {
            previous.abort();
        }

        let _ = self.status_tx.send(ConnectionStatus::Connected);
        info!("Connected to relay at {}", self.config.url);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events_tx.subscribe()
    }

    async fn propose(&self, proposal: SessionProposal) -> Result<PendingSettlement, RelayError> {
        let pairing_topic = Self::random_hex();
        let sym_key = Self::random_hex();
        let expires_at = Utc::now() + chrono::Duration::seconds(PAIRING_TTL_SECS);

        let (tx, rx) = oneshot::channel();
        self.pending_proposals
            .lock()
            .await
            .insert(pairing_topic.clone(), tx);

        let params = json!({
            "pairingTopic": pairing_topic,
            "symKey": sym_key,
            "expiry": expires_at.timestamp(),
            "proposal": proposal,
        });

        if let Err(e) = self.call(methods::SESSION_PROPOSE, params).await {
            self.pending_proposals.lock().await.remove(&pairing_topic);
            return Err(e);
        }

        info!("Published session proposal on pairing {}", pairing_topic);
        Ok(PendingSettlement {
            uri: pairing_uri(&pairing_topic, &sym_key, expires_at),
            pairing_topic,
            expires_at,
            settlement: rx,
        })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), RelayError> {
        self.call(methods::SUBSCRIBE, json!({ "topic": topic }))
            .await
            .map(|_| ())
    }

    async fn request(&self, topic: &str, request: SignerRequest) -> Result<Value, RelayError> {
        self.call(
            methods::SESSION_REQUEST,
            json!({ "topic": topic, "request": request }),
        )
        .await
    }

    async fn disconnect_session(&self, topic: &str, reason: &str) -> Result<(), RelayError> {
        self.call(
            methods::SESSION_DELETE,
            json!({
                "topic": topic,
                "reason": { "code": USER_DISCONNECTED_CODE, "message": reason },
            }),
        )
        .await
        .map(|_| ())
    }

    async fn close(&self) -> Result<(), RelayError> {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                warn!("Error closing relay connection: {}", e);
            }
        }

        self.pending_requests.lock().await.clear();
        self.pending_proposals.lock().await.clear();
        let _ = self.status_tx.send(ConnectionStatus::Disconnected);
        info!("Relay connection closed");
        Ok(())
    }
}
