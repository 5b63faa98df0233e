//! In-process relay double
//! Used by tests and dry runs where no relay or signer application is reachable

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, oneshot};

use super::Relay;
use super::types::{
    PendingSettlement, PeerMetadata, RelayError, RelayEvent, SessionProposal, SessionSettlement,
    SignerRequest, pairing_uri,
};

/// Scripted answer for the next signer request
#[derive(Debug, Clone)]
pub enum MockResponse {
    Result(Value),
    Error { code: i64, message: String },
    /// Never answer, as a signer that leaves the prompt open
    Hang,
}

/// A signer request observed by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub topic: String,
    pub request: SignerRequest,
}

#[derive(Default)]
struct MockState {
    connected: bool,
    connect_calls: usize,
    proposals: Vec<SessionProposal>,
    pending: Option<(String, oneshot::Sender<Result<SessionSettlement, RelayError>>)>,
    subscriptions: Vec<String>,
    requests: Vec<RecordedRequest>,
    responses: VecDeque<MockResponse>,
    deleted: Vec<String>,
}

/// Relay double whose signer side is driven by the test
pub struct MockRelay {
    state: Mutex<MockState>,
    events_tx: broadcast::Sender<RelayEvent>,
    next_topic: AtomicU64,
}

impl MockRelay {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(MockState::default()),
            events_tx,
            next_topic: AtomicU64::new(1),
        }
    }

    /// Approve the outstanding proposal with the given CAIP-10 accounts
    pub async fn settle_pending(&self, accounts: Vec<String>) -> Result<String, RelayError> {
        let topic = format!("session-{}", self.next_topic.fetch_add(1, Ordering::SeqCst));
        let settlement = SessionSettlement {
            topic: topic.clone(),
            accounts,
            expiry: (Utc::now() + chrono::Duration::days(7)).timestamp(),
            peer: Some(PeerMetadata {
                name: "Mock Wallet".to_string(),
                ..PeerMetadata::default()
            }),
        };
        self.answer_pending(Ok(settlement)).await?;
        Ok(topic)
    }

    /// Reject the outstanding proposal
    pub async fn reject_pending(&self, reason: &str) -> Result<(), RelayError> {
        self.answer_pending(Err(RelayError::Rejected(reason.to_string())))
            .await
    }

    async fn answer_pending(
        &self,
        answer: Result<SessionSettlement, RelayError>,
    ) -> Result<(), RelayError> {
        let pending = self.state.lock().await.pending.take();
        match pending {
            Some((_, tx)) => tx
                .send(answer)
                .map_err(|_| RelayError::ConnectionError("approval receiver dropped".into())),
            None => Err(RelayError::ParseError("no pending proposal".into())),
        }
    }

    /// Queue the answer for the next signer request
    pub async fn push_response(&self, response: MockResponse) {
        self.state.lock().await.responses.push_back(response);
    }

    /// Push a relay signal to every listener
    pub fn emit(&self, event: RelayEvent) {
        let _ = self.events_tx.send(event);
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn proposals(&self) -> Vec<SessionProposal> {
        self.state.lock().await.proposals.clone()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.state.lock().await.subscriptions.clone()
    }

    pub async fn deleted_topics(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }

    pub async fn connect_calls(&self) -> usize {
        self.state.lock().await.connect_calls
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }
}

impl Default for MockRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Relay for MockRelay {
    async fn connect(&self) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        state.connect_calls += 1;
        state.connected = true;
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events_tx.subscribe()
    }

    async fn propose(&self, proposal: SessionProposal) -> Result<PendingSettlement, RelayError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(RelayError::NotConnected);
        }

        let pairing_topic = format!("pairing-{}", self.next_topic.fetch_add(1, Ordering::SeqCst));
        let expires_at = Utc::now() + chrono::Duration::minutes(5);
        let (tx, rx) = oneshot::channel();

        state.proposals.push(proposal);
        state.pending = Some((pairing_topic.clone(), tx));

        Ok(PendingSettlement {
            uri: pairing_uri(&pairing_topic, "00", expires_at),
            pairing_topic,
            expires_at,
            settlement: rx,
        })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(RelayError::NotConnected);
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn request(&self, topic: &str, request: SignerRequest) -> Result<Value, RelayError> {
        let response = {
            let mut state = self.state.lock().await;
            if !state.connected {
                return Err(RelayError::NotConnected);
            }
            state.requests.push(RecordedRequest {
                topic: topic.to_string(),
                request,
            });
            state.responses.pop_front()
        };

        match response {
            Some(MockResponse::Result(value)) => Ok(value),
            Some(MockResponse::Error { code, message }) => Err(RelayError::Rpc { code, message }),
            Some(MockResponse::Hang) => std::future::pending().await,
            None => Err(RelayError::Timeout),
        }
    }

    async fn disconnect_session(&self, topic: &str, _reason: &str) -> Result<(), RelayError> {
        self.state.lock().await.deleted.push(topic.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        state.connected = false;
        state.pending = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal() -> SessionProposal {
        SessionProposal {
            chains: vec!["eip155:1".to_string()],
            methods: vec!["eth_sendTransaction".to_string()],
            events: vec![],
            metadata: PeerMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_propose_requires_connection() {
        let relay = MockRelay::new();
        assert!(matches!(
            relay.propose(proposal()).await,
            Err(RelayError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_settle_delivers_to_pending() {
        let relay = MockRelay::new();
        relay.connect().await.unwrap();

        let pending = relay.propose(proposal()).await.unwrap();
        assert!(pending.uri.starts_with("wc:pairing-"));

        let topic = relay
            .settle_pending(vec!["eip155:1:0x0000000000000000000000000000000000000001".into()])
            .await
            .unwrap();
        let settlement = pending.settlement.await.unwrap().unwrap();
        assert_eq!(settlement.topic, topic);
    }

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let relay = MockRelay::new();
        relay.connect().await.unwrap();
        relay
            .push_response(MockResponse::Result(Value::String("0x01".into())))
            .await;
        relay
            .push_response(MockResponse::Error {
                code: 4001,
                message: "nope".into(),
            })
            .await;

        let request = SignerRequest::new(1, "personal_sign", Value::Null);
        assert_eq!(
            relay.request("t", request.clone()).await,
            Ok(Value::String("0x01".into()))
        );
        assert!(matches!(
            relay.request("t", request).await,
            Err(RelayError::Rpc { code: 4001, .. })
        ));
        assert_eq!(relay.requests().await.len(), 2);
    }
}
