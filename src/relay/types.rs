//! Relay protocol data types and structures

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

/// Relay protocol version advertised in pairing URIs
pub const PAIRING_PROTOCOL_VERSION: u8 = 2;

/// Relay protocol name advertised in pairing URIs
pub const RELAY_PROTOCOL: &str = "irn";

/// Connection status for the relay transport
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// Transport-level relay errors, normalized by the session and dispatch layers
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RelayError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Relay transport is not connected")]
    NotConnected,

    #[error("Request timed out")]
    Timeout,

    #[error("Rejected by peer: {0}")]
    Rejected(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Asynchronous signals pushed by the relay
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// The peer deleted the session
    SessionDelete {
        topic: String,
        reason: Option<String>,
    },
    /// The session reached its expiry on the relay side
    SessionExpire { topic: String },
    /// The underlying socket closed
    TransportClosed,
}

/// Metadata describing one side of a pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PeerMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// Namespace requirements sent with a session proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProposal {
    /// CAIP-2 chain ids, e.g. `eip155:11155111`
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
    pub metadata: PeerMetadata,
}

/// Settlement payload delivered once the signer approves a proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettlement {
    pub topic: String,
    /// CAIP-10 account ids, e.g. `eip155:1:0xabc...`
    pub accounts: Vec<String>,
    /// Unix seconds
    pub expiry: i64,
    #[serde(default)]
    pub peer: Option<PeerMetadata>,
}

impl SessionSettlement {
    pub fn expiry_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expiry, 0).single()
    }
}

/// A proposal that has been published and awaits the signer's answer
#[derive(Debug)]
pub struct PendingSettlement {
    pub uri: String,
    pub pairing_topic: String,
    pub expires_at: DateTime<Utc>,
    pub settlement: oneshot::Receiver<Result<SessionSettlement, RelayError>>,
}

/// A JSON-RPC request forwarded through a session to the signer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerRequest {
    /// CAIP-2 chain id
    pub chain_id: String,
    pub method: String,
    pub params: serde_json::Value,
}

impl SignerRequest {
    pub fn new(chain_id: u64, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            chain_id: eip155_chain(chain_id),
            method: method.into(),
            params,
        }
    }
}

/// Outgoing JSON-RPC 2.0 envelope
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: serde_json::Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id,
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a JSON-RPC response
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// Incoming JSON-RPC frame: either a response to one of our ids or a relay notification
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingFrame {
    Response {
        id: u64,
        outcome: Result<serde_json::Value, RelayError>,
    },
    Settle {
        pairing_topic: String,
        settlement: SessionSettlement,
    },
    Reject {
        pairing_topic: String,
        reason: String,
    },
    Event(RelayEvent),
    Ignored,
}

/// Relay-side method names
pub mod methods {
    pub const SESSION_PROPOSE: &str = "wc_sessionPropose";
    pub const SESSION_SETTLE: &str = "wc_sessionSettle";
    pub const SESSION_REJECT: &str = "wc_sessionReject";
    pub const SESSION_REQUEST: &str = "wc_sessionRequest";
    pub const SESSION_DELETE: &str = "wc_sessionDelete";
    pub const SESSION_EXPIRE: &str = "wc_sessionExpire";
    pub const SUBSCRIBE: &str = "irn_subscribe";
}

/// CAIP-2 chain id for an EVM chain
pub fn eip155_chain(chain_id: u64) -> String {
    format!("eip155:{}", chain_id)
}

/// Build a one-time pairing URI
pub fn pairing_uri(topic: &str, sym_key: &str, expires_at: DateTime<Utc>) -> String {
    format!(
        "wc:{}@{}?relay-protocol={}&symKey={}&expiryTimestamp={}",
        topic,
        PAIRING_PROTOCOL_VERSION,
        RELAY_PROTOCOL,
        sym_key,
        expires_at.timestamp()
    )
}

/// Extract the pairing topic from a pairing URI
pub fn pairing_topic(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("wc:")?;
    let (topic, _) = rest.split_once('@')?;
    if topic.is_empty() { None } else { Some(topic) }
}
