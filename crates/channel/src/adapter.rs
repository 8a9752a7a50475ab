//! Lifecycle wrapper around a [`ChannelSession`].
//!
//! The session's own readiness signal is known to be missed occasionally
//! even though sends would succeed. [`ChannelAdapter::wait_ready`] therefore
//! falls back to a liveness probe after a grace period, and only promotes to
//! `Ready` when the probe corroborates connectivity.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use billnotify_core::{Destination, NotifierConfig};

use crate::attachment::Attachment;
use crate::credentials::CredentialStore;
use crate::error::ChannelError;
use crate::session::{ChannelSession, ConnectOutcome, OutgoingMessage, Receipt, RemoteState, SessionEvent};
use crate::state::{ChannelState, Transition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// How long to wait for the readiness signal before probing.
    pub ready_grace: Duration,
    pub max_attachment_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ready_grace: Duration::from_secs(60),
            max_attachment_bytes: 16 * 1024 * 1024,
        }
    }
}

impl From<&NotifierConfig> for ChannelConfig {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            ready_grace: config.channel_ready_grace,
            max_attachment_bytes: config.attachment_max_bytes,
        }
    }
}

/// Outcome of a liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    pub state: ChannelState,
    pub remote: Option<RemoteState>,
    pub chats_listed: bool,
    pub error: Option<String>,
}

impl Liveness {
    /// Remote side reports connected and a read-only call went through.
    pub fn corroborates_connectivity(&self) -> bool {
        self.remote == Some(RemoteState::Connected) && self.chats_listed
    }
}

pub struct ChannelAdapter<S: ChannelSession> {
    session: Arc<S>,
    store: Arc<CredentialStore>,
    state: Arc<watch::Sender<ChannelState>>,
    config: ChannelConfig,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<S: ChannelSession> ChannelAdapter<S> {
    pub fn new(session: Arc<S>, store: CredentialStore, config: ChannelConfig) -> Self {
        let (state, _) = watch::channel(ChannelState::Uninitialized);
        Self {
            session,
            store: Arc::new(store),
            state: Arc::new(state),
            config,
            pump: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Connect the session and start applying its events.
    ///
    /// Calling `start` on an adapter that already left `Uninitialized` is a
    /// no-op.
    pub async fn start(&self) -> Result<(), ChannelError> {
        if self.state() != ChannelState::Uninitialized {
            return Ok(());
        }

        let credential = self.store.load()?;
        let resuming = credential.is_some();
        match self.session.connect(credential.as_ref()).await? {
            ConnectOutcome::Resumed => {
                info!("channel session resumed from stored credential");
                apply(&self.state, Transition::Authenticated);
            }
            ConnectOutcome::PairingRequired(challenge) => {
                if resuming {
                    warn!("stored channel credential was rejected; pairing required");
                    self.store.clear()?;
                }
                announce_pairing(&challenge.code, &challenge.expires_at.to_rfc3339());
                apply(&self.state, Transition::PairingRequested(challenge));
            }
        }

        let handle = tokio::spawn(pump_events(
            self.session.clone(),
            self.store.clone(),
            self.state.clone(),
        ));
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(old) = pump.replace(handle) {
                old.abort();
            }
        }
        Ok(())
    }

    /// Wait until the channel is `Ready`, for at most `grace`.
    ///
    /// On expiry while `Authenticated` or `Disconnected`, runs [`Self::probe`]
    /// and promotes to `Ready` if it corroborates connectivity.
    pub async fn wait_ready(&self, grace: Duration) -> Result<(), ChannelError> {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(grace, async {
            rx.wait_for(|s| s.is_ready() || s.is_failed())
                .await
                .map(|s| s.clone())
        })
        .await;

        match waited {
            Ok(Ok(ChannelState::Ready)) => Ok(()),
            Ok(Ok(ChannelState::Failed { reason })) => Err(ChannelError::AuthLost(reason)),
            Ok(Ok(other)) => Err(ChannelError::not_ready(other)),
            Ok(Err(_)) => Err(ChannelError::not_ready(self.state())),
            Err(_) => self.infer_readiness(grace).await,
        }
    }

    /// Query the remote state and make one read-only call.
    pub async fn probe(&self) -> Liveness {
        let state = self.state();
        let mut liveness = Liveness {
            state,
            remote: None,
            chats_listed: false,
            error: None,
        };

        match self.session.remote_state().await {
            Ok(remote) => liveness.remote = Some(remote),
            Err(err) => {
                liveness.error = Some(err.to_string());
                return liveness;
            }
        }
        match self.session.list_chats(1).await {
            Ok(_) => liveness.chats_listed = true,
            Err(err) => liveness.error = Some(err.to_string()),
        }
        debug!(?liveness, "channel liveness probe");
        liveness
    }

    /// Send one message. Requires the `Ready` state.
    pub async fn send(
        &self,
        to: &Destination,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> Result<Receipt, ChannelError> {
        let state = self.state();
        if !state.is_ready() {
            return Err(ChannelError::not_ready(state));
        }
        if let Some(attachment) = attachment {
            attachment.ensure_within(self.config.max_attachment_bytes)?;
        }

        let message = OutgoingMessage {
            to,
            text,
            attachment,
        };
        match self.session.send(message).await {
            Ok(receipt) => {
                debug!(destination = %to, message_id = %receipt.message_id, "message accepted by channel");
                Ok(receipt)
            }
            Err(ChannelError::NotReady { state: remote }) => {
                apply(
                    &self.state,
                    Transition::Disconnected(format!("session refused send ({remote})")),
                );
                Err(ChannelError::not_ready(self.state()))
            }
            Err(err) => Err(err),
        }
    }

    /// Stop applying session events and wait for the event pump to finish.
    /// The credential lock is released once the adapter is dropped.
    pub async fn shutdown(&self) {
        let handle = self.pump.lock().ok().and_then(|mut pump| pump.take());
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn infer_readiness(&self, grace: Duration) -> Result<(), ChannelError> {
        let current = self.state();
        if !current.may_infer_ready() {
            return Err(ChannelError::not_ready(current));
        }

        let liveness = self.probe().await;
        if !liveness.corroborates_connectivity() {
            debug!(state = %current, ?liveness, "readiness not corroborated");
            return Err(ChannelError::not_ready(self.state()));
        }

        apply(&self.state, Transition::ReadinessInferred);
        if self.state().is_ready() {
            warn!(
                from = %current,
                grace_secs = grace.as_secs(),
                "channel readiness signal missing; promoted to ready from liveness probe"
            );
            Ok(())
        } else {
            Err(ChannelError::not_ready(self.state()))
        }
    }
}

impl<S: ChannelSession> Drop for ChannelAdapter<S> {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}

/// Apply `transition`, logging state changes. Invalid transitions are
/// ignored with a warning.
fn apply(state: &watch::Sender<ChannelState>, transition: Transition) -> bool {
    state.send_if_modified(|current| match current.apply(&transition) {
        Ok(next) if next != *current => {
            info!(from = %current, to = %next, "channel state changed");
            *current = next;
            true
        }
        Ok(_) => false,
        Err(err) => {
            warn!(error = %err, "ignoring channel event");
            false
        }
    })
}

fn announce_pairing(code: &str, expires_at: &str) {
    warn!(pairing_code = code, expires_at, "channel needs pairing; enter the code on the device");
}

async fn pump_events<S: ChannelSession>(
    session: Arc<S>,
    store: Arc<CredentialStore>,
    state: Arc<watch::Sender<ChannelState>>,
) {
    while let Some(event) = session.next_event().await {
        match event {
            SessionEvent::PairingCode(challenge) => {
                announce_pairing(&challenge.code, &challenge.expires_at.to_rfc3339());
                apply(&state, Transition::PairingRequested(challenge));
            }
            SessionEvent::Paired(credential) => {
                if let Err(err) = store.save(&credential) {
                    error!(error = %err, "failed to persist channel credential");
                }
                info!(identity = %credential.identity, "channel paired");
                apply(&state, Transition::Authenticated);
            }
            SessionEvent::Ready => {
                apply(&state, Transition::Ready);
            }
            SessionEvent::Disconnected(reason) => {
                warn!(%reason, "channel disconnected");
                apply(&state, Transition::Disconnected(reason));
            }
            SessionEvent::AuthFailure(reason) => {
                error!(%reason, "channel authentication lost; operator must pair again");
                if let Err(err) = store.clear() {
                    error!(error = %err, "failed to clear channel credential");
                }
                apply(&state, Transition::AuthLost(reason));
            }
        }
    }
    apply(&state, Transition::Disconnected("session closed".to_string()));
    debug!("channel event pump stopped");
}
