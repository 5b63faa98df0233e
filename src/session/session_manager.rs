//! Session Manager for the wallet pairing/session lifecycle

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::events::{DisconnectReason, SessionEvent, SessionEvents, SubscriptionId};
use super::store::SessionStore;
use super::types::{ChainAccount, PairingOffer, Session, SessionState};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::relay::{
    PendingSettlement, Relay, RelayError, RelayEvent, SessionProposal, SessionSettlement,
    eip155_chain, pairing_topic,
};

/// Wait until the watched state satisfies `done`
pub(crate) async fn wait_for_state<F>(rx: &mut watch::Receiver<SessionState>, done: F)
where
    F: Fn(&SessionState) -> bool,
{
    loop {
        if done(&*rx.borrow_and_update()) {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// State shared with the relay listener task
#[derive(Clone)]
struct Shared {
    state_tx: Arc<watch::Sender<SessionState>>,
    store: Arc<dyn SessionStore>,
    events: Arc<SessionEvents>,
}

impl Shared {
    async fn handle_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::SessionDelete { topic, reason } => {
                self.teardown(&topic, DisconnectReason::RemoteDelete(reason))
                    .await
            }
            RelayEvent::SessionExpire { topic } => {
                self.teardown(&topic, DisconnectReason::RemoteExpire).await
            }
            RelayEvent::TransportClosed => {
                warn!("Relay transport closed; the session stays persisted for the next init()");
            }
        }
    }

    /// Drop the session for `topic` if it is live, and its persisted copy
    async fn teardown(&self, topic: &str, reason: DisconnectReason) {
        let mut cleared = false;
        self.state_tx.send_if_modified(|state| {
            if state.session().is_some_and(|s| s.topic == topic) {
                *state = SessionState::Idle;
                cleared = true;
                true
            } else {
                false
            }
        });

        let persisted = if cleared {
            true
        } else {
            match self.store.load().await {
                Ok(Some(session)) => session.topic == topic,
                Ok(None) => false,
                Err(e) => {
                    warn!("Failed to inspect persisted session: {}", e);
                    false
                }
            }
        };

        if persisted {
            if let Err(e) = self.store.clear().await {
                error!("Failed to clear persisted session {}: {}", topic, e);
            }
        }

        if cleared {
            info!("Session {} ended remotely ({:?})", topic, reason);
            self.events
                .publish(SessionEvent::Disconnected {
                    topic: topic.to_string(),
                    reason,
                })
                .await;
        } else {
            debug!("Ignoring teardown for inactive topic {}", topic);
        }
    }
}

/// Owns the single pairing/session with the external signer
pub struct SessionManager {
    chain_id: u64,
    approval_timeout: Duration,
    proposal: SessionProposal,
    relay: Arc<dyn Relay>,
    shared: Shared,
    pending: Mutex<Option<PendingSettlement>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    init_lock: Mutex<()>,
}

impl SessionManager {
    /// Create a new SessionManager
    pub fn new(config: &Config, relay: Arc<dyn Relay>, store: Arc<dyn SessionStore>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Uninitialized);

        let proposal = SessionProposal {
            chains: vec![eip155_chain(config.chain_id)],
            methods: config.session.methods.clone(),
            events: config.session.events.clone(),
            metadata: config.session.metadata.clone(),
        };

        Self {
            chain_id: config.chain_id,
            approval_timeout: config.relay.approval_timeout(),
            proposal,
            relay,
            shared: Shared {
                state_tx: Arc::new(state_tx),
                store,
                events: Arc::new(SessionEvents::new()),
            },
            pending: Mutex::new(None),
            listener: Mutex::new(None),
            init_lock: Mutex::new(()),
        }
    }

    /// Override how long `approve()` waits for the signer
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Connect the relay, start listening for teardown signals and restore a persisted session
    pub async fn init(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if !matches!(*self.shared.state_tx.borrow(), SessionState::Uninitialized) {
            debug!("Session manager already initialized");
            return Ok(());
        }

        info!("Initializing wallet session manager (chain {})", self.chain_id);
        self.relay
            .connect()
            .await
            .map_err(|e| Error::RelayNetwork(e.to_string()))?;

        self.start_listener().await;

        match self.restore().await {
            Some(session) => {
                info!(
                    "Restored session {} (expires {})",
                    session.topic, session.expiry
                );
                self.shared
                    .events
                    .publish(SessionEvent::Restored { session })
                    .await;
            }
            None => {
                self.shared.state_tx.send_if_modified(|state| {
                    if matches!(state, SessionState::Uninitialized) {
                        *state = SessionState::Idle;
                        true
                    } else {
                        false
                    }
                });
            }
        }

        info!("Session manager initialized");
        Ok(())
    }

    async fn start_listener(&self) {
        let mut events = self.relay.events();
        let shared = self.shared.clone();

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => shared.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Session listener missed {} relay events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Session listener stopped");
        });

        if let Some(previous) = self.listener.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn restore(&self) -> Option<Session> {
        let session = match self.shared.store.load().await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                warn!("Discarding unreadable persisted session: {}", e);
                self.clear_store().await;
                return None;
            }
        };

        if session.is_expired() {
            info!("Persisted session {} has expired", session.topic);
            self.clear_store().await;
            return None;
        }

        if session.account_on(self.chain_id).is_none() {
            info!(
                "Persisted session {} has no account on {}",
                session.topic,
                eip155_chain(self.chain_id)
            );
            self.clear_store().await;
            return None;
        }

        // Installed before subscribing so a teardown arriving meanwhile applies to it
        self.shared
            .state_tx
            .send_replace(SessionState::Connected(session.clone()));

        if let Err(e) = self.relay.subscribe(&session.topic).await {
            warn!("Failed to resume session {}: {}", session.topic, e);
            self.shared.state_tx.send_if_modified(|state| {
                if state.is_live(&session.topic) {
                    *state = SessionState::Idle;
                    true
                } else {
                    false
                }
            });
            return None;
        }

        if !self.shared.state_tx.borrow().is_live(&session.topic) {
            info!("Session {} ended while it was being restored", session.topic);
            return None;
        }

        Some(session)
    }

    async fn clear_store(&self) {
        if let Err(e) = self.shared.store.clear().await {
            error!("Failed to clear persisted session: {}", e);
        }
    }

    fn accepts_pairing(state: &SessionState) -> Result<()> {
        match state {
            SessionState::Uninitialized => Err(Error::ClientNotInitialized),
            SessionState::Idle => Ok(()),
            SessionState::Pairing { .. } => Err(Error::PairingInProgress),
            SessionState::Connected(session) if session.is_expired() => Ok(()),
            SessionState::Connected(_) => Err(Error::AlreadyConnected),
        }
    }

    /// Publish a session proposal and return the URI the signer must open
    pub async fn connect(&self) -> Result<PairingOffer> {
        let mut pending = self.pending.lock().await;
        Self::accepts_pairing(&self.shared.state_tx.borrow())?;

        let settlement = self
            .relay
            .propose(self.proposal.clone())
            .await
            .map_err(|e| Error::RelayNetwork(e.to_string()))?;

        if pairing_topic(&settlement.uri) != Some(settlement.pairing_topic.as_str()) {
            return Err(Error::RelayNetwork(format!(
                "pairing URI does not carry topic {}",
                settlement.pairing_topic
            )));
        }

        let offer = PairingOffer {
            uri: settlement.uri.clone(),
            pairing_topic: settlement.pairing_topic.clone(),
            expires_at: settlement.expires_at,
        };

        let mut replaced_expired = false;
        let mut refused = None;
        self.shared.state_tx.send_if_modified(|state| match Self::accepts_pairing(state) {
            Ok(()) => {
                replaced_expired = matches!(state, SessionState::Connected(_));
                *state = SessionState::Pairing {
                    pairing_topic: offer.pairing_topic.clone(),
                };
                true
            }
            Err(e) => {
                refused = Some(e);
                false
            }
        });

        if let Some(e) = refused {
            return Err(e);
        }
        if replaced_expired {
            self.clear_store().await;
        }

        *pending = Some(settlement);
        info!("Pairing offer ready on topic {}", offer.pairing_topic);
        Ok(offer)
    }

    /// Wait for the signer to approve the outstanding pairing offer
    pub async fn approve(&self) -> Result<Session> {
        let pending = self
            .pending
            .lock()
            .await
            .take()
            .ok_or(Error::NoPendingApproval)?;
        let pairing_topic = pending.pairing_topic.clone();
        let mut state_rx = self.shared.state_tx.subscribe();

        info!("Waiting for signer approval on pairing {}", pairing_topic);

        let still_pairing = |state: &SessionState| {
            matches!(state, SessionState::Pairing { pairing_topic: t } if *t == pairing_topic)
        };

        let settlement = tokio::time::timeout(self.approval_timeout, pending.settlement);
        tokio::pin!(settlement);

        let outcome = tokio::select! {
            outcome = &mut settlement => outcome,
            _ = wait_for_state(&mut state_rx, |state| !still_pairing(state)) => {
                info!("Pairing {} cancelled before approval", pairing_topic);
                if let Some(Ok(Ok(Ok(settled)))) = settlement.as_mut().now_or_never() {
                    self.decline_session(&settled.topic, "User disconnected").await;
                }
                return Err(Error::ApprovalRejected {
                    reason: "pairing cancelled".to_string(),
                });
            }
        };

        let result = match outcome {
            Err(_) => Err(Error::ApprovalTimeout(self.approval_timeout)),
            Ok(Err(_)) => Err(Error::RelayNetwork(
                "relay dropped the pairing before settlement".to_string(),
            )),
            Ok(Ok(Err(RelayError::Rejected(reason)))) => Err(Error::ApprovalRejected { reason }),
            Ok(Ok(Err(e))) => Err(Error::RelayNetwork(e.to_string())),
            Ok(Ok(Ok(settlement))) => self.accept_settlement(settlement).await,
        };

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                warn!("Pairing {} failed: {}", pairing_topic, e);
                self.shared.state_tx.send_if_modified(|state| {
                    if still_pairing(state) {
                        *state = SessionState::Idle;
                        true
                    } else {
                        false
                    }
                });
                return Err(e);
            }
        };

        let installed = self.shared.state_tx.send_if_modified(|state| {
            if still_pairing(state) {
                *state = SessionState::Connected(session.clone());
                true
            } else {
                false
            }
        });
        if !installed {
            info!("Pairing {} cancelled during settlement", pairing_topic);
            self.decline_session(&session.topic, "User disconnected").await;
            return Err(Error::ApprovalRejected {
                reason: "pairing cancelled".to_string(),
            });
        }

        if let Err(e) = self.shared.store.save(&session).await {
            warn!("Session {} is live but could not be persisted: {}", session.topic, e);
        }

        info!(
            "Session {} approved for {}",
            session.topic,
            session
                .account_on(self.chain_id)
                .map(ChainAccount::address_hex)
                .unwrap_or_default()
        );
        self.shared
            .events
            .publish(SessionEvent::Connected {
                session: session.clone(),
            })
            .await;

        Ok(session)
    }

    async fn accept_settlement(&self, settlement: SessionSettlement) -> Result<Session> {
        let session = Session::from_settlement(settlement)
            .map_err(|reason| Error::ApprovalRejected { reason })?;

        if session.account_on(self.chain_id).is_none() {
            let reason = format!("no account on {}", eip155_chain(self.chain_id));
            self.decline_session(&session.topic, "Unsupported chains").await;
            return Err(Error::ApprovalRejected { reason });
        }

        Ok(session)
    }

    /// Tell the signer a settled session will not be used
    async fn decline_session(&self, topic: &str, reason: &str) {
        if let Err(e) = self.relay.disconnect_session(topic, reason).await {
            warn!("Failed to decline session {}: {}", topic, e);
        }
    }

    /// Whether a session is held and not known to be expired
    pub fn is_connected(&self) -> bool {
        self.shared
            .state_tx
            .borrow()
            .session()
            .is_some_and(|s| !s.is_expired())
    }

    /// Tear down the session locally and notify the relay; a no-op when idle
    pub async fn disconnect(&self) -> Result<()> {
        let abandoned_offer = self.pending.lock().await.take();

        let mut previous = None;
        self.shared.state_tx.send_if_modified(|state| match state {
            SessionState::Connected(_) | SessionState::Pairing { .. } => {
                previous = Some(std::mem::replace(state, SessionState::Idle));
                true
            }
            _ => false,
        });

        match previous {
            Some(SessionState::Connected(session)) => {
                info!("Disconnecting session {}", session.topic);
                self.clear_store().await;
                if let Err(e) = self
                    .relay
                    .disconnect_session(&session.topic, "User disconnected")
                    .await
                {
                    warn!("Failed to notify relay about disconnect: {}", e);
                }
                self.shared
                    .events
                    .publish(SessionEvent::Disconnected {
                        topic: session.topic,
                        reason: DisconnectReason::Local,
                    })
                    .await;
            }
            Some(SessionState::Pairing { pairing_topic }) => {
                info!("Cancelled pairing {}", pairing_topic);
            }
            _ => debug!("disconnect() without a live session"),
        }

        drop(abandoned_offer);
        Ok(())
    }

    /// Stop listening and close the relay; the persisted session is kept for the next `init()`
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        self.pending.lock().await.take();
        self.shared
            .state_tx
            .send_replace(SessionState::Uninitialized);

        self.relay
            .close()
            .await
            .map_err(|e| Error::RelayNetwork(e.to_string()))?;
        info!("Session manager shut down");
        Ok(())
    }

    /// Apply a relay signal directly, as the background listener does
    pub async fn handle_relay_event(&self, event: RelayEvent) {
        self.shared.handle_event(event).await;
    }

    /// Subscribe to session lifecycle events
    pub async fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        self.shared.events.subscribe().await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id).await
    }

    /// Current state snapshot
    pub fn state(&self) -> SessionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Live, unexpired session
    pub fn session(&self) -> Option<Session> {
        self.shared
            .state_tx
            .borrow()
            .session()
            .filter(|s| !s.is_expired())
            .cloned()
    }

    /// Live session, or the error a request without one must fail with
    pub fn active_session(&self) -> Result<Session> {
        let state = self.shared.state_tx.borrow();
        match &*state {
            SessionState::Uninitialized => Err(Error::ClientNotInitialized),
            SessionState::Connected(session) if !session.is_expired() => Ok(session.clone()),
            _ => Err(Error::SessionLost),
        }
    }

    /// Signer account on the configured chain
    pub fn primary_account(&self) -> Result<ChainAccount> {
        let session = self.active_session()?;
        session
            .account_on(self.chain_id)
            .copied()
            .ok_or(Error::SessionLost)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Read-only view of state transitions
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub(crate) fn relay(&self) -> Arc<dyn Relay> {
        self.relay.clone()
    }
}
