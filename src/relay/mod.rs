//! Relay transport module
//!
//! Carries pairing proposals, session requests and teardown signals between
//! this client and the external signer application.

pub mod mock;
pub mod types;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use mock::{MockRelay, MockResponse, RecordedRequest};
pub use types::*;
pub use websocket::WebSocketRelay;

/// Relay-mediated pairing/session transport
#[async_trait]
pub trait Relay: Send + Sync {
    /// Open the transport. Calling it on an open transport is a no-op.
    async fn connect(&self) -> Result<(), RelayError>;

    /// Receive asynchronous relay signals (session delete/expire, socket close)
    fn events(&self) -> broadcast::Receiver<RelayEvent>;

    /// Publish a session proposal and return the pairing URI with its pending settlement
    async fn propose(&self, proposal: SessionProposal) -> Result<PendingSettlement, RelayError>;

    /// Resume listening on an already settled session topic
    async fn subscribe(&self, topic: &str) -> Result<(), RelayError>;

    /// Forward a JSON-RPC request to the signer over a session topic
    async fn request(
        &self,
        topic: &str,
        request: SignerRequest,
    ) -> Result<serde_json::Value, RelayError>;

    /// Tell the peer the session is gone
    async fn disconnect_session(&self, topic: &str, reason: &str) -> Result<(), RelayError>;

    /// Close the transport
    async fn close(&self) -> Result<(), RelayError>;
}
