//! Wallet session management module
//!
//! This module owns the pairing/session lifecycle with the external signer,
//! its persistence across restarts, and the teardown notifications other
//! components subscribe to.

pub mod events;
pub mod session_manager;
pub mod store;
pub mod types;

pub(crate) use session_manager::wait_for_state;

pub use events::{DisconnectReason, SessionEvent, SessionEvents, SubscriptionId};
pub use session_manager::SessionManager;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use types::{ChainAccount, PairingOffer, Session, SessionState};
