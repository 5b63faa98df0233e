//! Session data types

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, hex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::relay::{PeerMetadata, SessionSettlement};

/// CAIP-10 account on an EVM chain: `eip155:<chain id>:<address>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainAccount {
    pub chain_id: u64,
    pub address: Address,
}

impl ChainAccount {
    pub fn new(chain_id: u64, address: Address) -> Self {
        Self { chain_id, address }
    }

    /// Lower-cased `0x` address, as the backend stores it
    pub fn address_hex(&self) -> String {
        hex::encode_prefixed(self.address)
    }
}

impl fmt::Display for ChainAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eip155:{}:{}", self.chain_id, self.address_hex())
    }
}

impl FromStr for ChainAccount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (namespace, chain, address) = match (parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(c), Some(a)) => (n, c, a),
            _ => return Err(format!("Invalid CAIP-10 account: {}", s)),
        };

        if namespace != "eip155" {
            return Err(format!("Unsupported account namespace: {}", namespace));
        }

        let chain_id = chain
            .parse::<u64>()
            .map_err(|e| format!("Invalid chain id in {}: {}", s, e))?;
        let address = address
            .parse::<Address>()
            .map_err(|e| format!("Invalid address in {}: {}", s, e))?;

        Ok(Self { chain_id, address })
    }
}

impl TryFrom<String> for ChainAccount {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChainAccount> for String {
    fn from(account: ChainAccount) -> Self {
        account.to_string()
    }
}

/// An established pairing with the external signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub topic: String,
    pub accounts: Vec<ChainAccount>,
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    pub peer: Option<PeerMetadata>,
}

impl Session {
    /// Build a session from a relay settlement, keeping only well-formed accounts
    pub fn from_settlement(settlement: SessionSettlement) -> Result<Self, String> {
        let expiry = settlement
            .expiry_time()
            .ok_or_else(|| format!("Invalid session expiry: {}", settlement.expiry))?;

        let accounts = settlement
            .accounts
            .iter()
            .filter_map(|raw| match raw.parse::<ChainAccount>() {
                Ok(account) => Some(account),
                Err(e) => {
                    tracing::warn!("Skipping settled account: {}", e);
                    None
                }
            })
            .collect();

        Ok(Self {
            topic: settlement.topic,
            accounts,
            expiry,
            peer: settlement.peer,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expiry <= Utc::now()
    }

    /// First account on the given chain
    pub fn account_on(&self, chain_id: u64) -> Option<&ChainAccount> {
        self.accounts.iter().find(|a| a.chain_id == chain_id)
    }
}

/// One-time connection offer handed to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingOffer {
    pub uri: String,
    pub pairing_topic: String,
    pub expires_at: DateTime<Utc>,
}

/// Lifecycle states of the session manager
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Uninitialized,
    Idle,
    Pairing { pairing_topic: String },
    Connected(Session),
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Connected(session) => Some(session),
            _ => None,
        }
    }

    /// Whether a live, unexpired session with this topic is held
    pub fn is_live(&self, topic: &str) -> bool {
        matches!(self, SessionState::Connected(s) if s.topic == topic && !s.is_expired())
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Idle => "idle",
            SessionState::Pairing { .. } => "pairing",
            SessionState::Connected(_) => "connected",
        }
    }
}
