//! Transaction dispatch through the live wallet session
//!
//! Requests are forwarded to the signer over the session topic and race
//! against session teardown, so a request in flight when the session ends
//! resolves to `SessionLost` instead of hanging.

use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256, hex};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::relay::{RelayError, SignerRequest};
use crate::session::{Session, SessionManager, wait_for_state};

/// Signer-side JSON-RPC methods
pub mod methods {
    pub const ETH_SEND_TRANSACTION: &str = "eth_sendTransaction";
    pub const PERSONAL_SIGN: &str = "personal_sign";
}

/// Signer error codes with a dedicated mapping
pub mod codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const USER_REJECTED_REQUEST: i64 = 5000;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// A contract call ready for the signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub chain_id: u64,
    pub value: Option<U256>,
}

impl TransactionRequest {
    /// `eth_sendTransaction` parameter object
    pub fn to_rpc_params(&self) -> Value {
        let mut tx = json!({
            "from": hex::encode_prefixed(self.from),
            "to": hex::encode_prefixed(self.to),
            "data": hex::encode_prefixed(&self.data),
        });
        if let Some(value) = self.value {
            tx["value"] = Value::String(format!("0x{:x}", value));
        }
        json!([tx])
    }
}

/// Map a relay failure onto the caller-facing taxonomy
pub fn normalize(error: RelayError) -> Error {
    match error {
        RelayError::Rpc { code, .. }
            if code == codes::USER_REJECTED || code == codes::USER_REJECTED_REQUEST =>
        {
            Error::UserRejectedTransaction
        }
        RelayError::Rpc { code, message } if code == codes::INTERNAL_ERROR => {
            Error::InternalRpcError { message }
        }
        RelayError::Rpc { code, message } => Error::Unknown {
            code: Some(code),
            message,
        },
        RelayError::Rejected(_) => Error::UserRejectedTransaction,
        RelayError::ParseError(message) => Error::Unknown {
            code: None,
            message,
        },
        e @ (RelayError::ConnectionError(_) | RelayError::NotConnected | RelayError::Timeout) => {
            Error::RelayNetwork(e.to_string())
        }
    }
}

/// Sends transactions and signature requests to the connected signer
pub struct TransactionDispatcher {
    session: Arc<SessionManager>,
}

impl TransactionDispatcher {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Transaction from the session's primary account on the configured chain
    pub fn request_for(&self, to: Address, data: Bytes) -> Result<TransactionRequest> {
        let account = self.session.primary_account()?;
        Ok(TransactionRequest {
            from: account.address,
            to,
            data,
            chain_id: account.chain_id,
            value: None,
        })
    }

    /// Ask the signer to submit `tx`; resolves to the transaction hash
    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256> {
        let session = self.session.active_session()?;
        self.check_request(&session, tx)?;
        info!(
            "Sending transaction to {} ({} bytes of calldata) via session {}",
            tx.to,
            tx.data.len(),
            session.topic
        );

        let request = SignerRequest::new(
            tx.chain_id,
            methods::ETH_SEND_TRANSACTION,
            tx.to_rpc_params(),
        );
        let response = self.forward(&session, request).await?;
        let hash = parse_hash(&response)?;

        info!("Transaction submitted: {}", hash);
        Ok(hash)
    }

    /// The session only covers its accounts on the configured chain
    fn check_request(&self, session: &Session, tx: &TransactionRequest) -> Result<()> {
        let chain_id = self.session.chain_id();
        if tx.chain_id != chain_id {
            return Err(Error::InvalidTransaction(format!(
                "chain {} is not the session chain {}",
                tx.chain_id, chain_id
            )));
        }
        let authorized = session
            .accounts
            .iter()
            .any(|account| account.chain_id == chain_id && account.address == tx.from);
        if !authorized {
            return Err(Error::InvalidTransaction(format!(
                "sender {} is not an account of session {}",
                tx.from, session.topic
            )));
        }
        Ok(())
    }

    /// `personal_sign` the UTF-8 message with the primary account
    pub async fn sign_message(&self, message: &str) -> Result<Bytes> {
        let session = self.session.active_session()?;
        let account = self.session.primary_account()?;

        let params = json!([
            hex::encode_prefixed(message.as_bytes()),
            account.address_hex()
        ]);
        let request = SignerRequest::new(account.chain_id, methods::PERSONAL_SIGN, params);
        let response = self.forward(&session, request).await?;

        match response.as_str().map(str::parse::<Bytes>) {
            Some(Ok(signature)) => Ok(signature),
            _ => Err(Error::Unknown {
                code: None,
                message: format!("malformed signature response: {}", response),
            }),
        }
    }

    async fn forward(&self, session: &Session, request: SignerRequest) -> Result<Value> {
        let relay = self.session.relay();
        let mut state_rx = self.session.watch_state();
        let topic = session.topic.as_str();
        debug!("Forwarding {} on session {}", request.method, topic);

        tokio::select! {
            outcome = relay.request(topic, request) => outcome.map_err(|e| {
                warn!("Signer request failed: {}", e);
                normalize(e)
            }),
            _ = wait_for_state(&mut state_rx, |state| !state.is_live(topic)) => {
                warn!("Session {} ended while a request was in flight", topic);
                Err(Error::SessionLost)
            }
        }
    }
}

fn parse_hash(response: &Value) -> Result<B256> {
    response
        .as_str()
        .and_then(|s| s.parse::<B256>().ok())
        .ok_or_else(|| Error::Unknown {
            code: None,
            message: format!("malformed transaction hash: {}", response),
        })
}
