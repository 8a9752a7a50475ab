//! Messaging channel adapter.
//!
//! Wraps a stateful, paired messaging session behind an explicit state
//! machine (`Uninitialized → PendingPairing → Authenticated → Ready ⇄
//! Disconnected`, any → `Failed`). Consumers await readiness through a watch
//! channel; sends are refused unless the channel is `Ready`.
//!
//! ## Components
//!
//! - [`ChannelAdapter`]: lifecycle, readiness, liveness probe, send
//! - [`ChannelSession`]: the wrapped session (transport seam)
//! - [`HttpBridgeSession`]: session served by a local messaging gateway
//! - [`InMemorySession`]: loopback session for tests/dev
//! - [`CredentialStore`]: persisted pairing credential, exclusively locked

pub mod adapter;
pub mod attachment;
pub mod bridge;
pub mod credentials;
pub mod error;
pub mod memory;
pub mod session;
pub mod state;

pub use adapter::{ChannelAdapter, ChannelConfig, Liveness};
pub use attachment::Attachment;
pub use bridge::HttpBridgeSession;
pub use credentials::{CredentialStore, StoredCredential};
pub use error::ChannelError;
pub use memory::{InMemorySession, LoopbackMessage};
pub use session::{
    ChannelSession, ConnectOutcome, OutgoingMessage, PairingChallenge, Receipt, RemoteState,
    SessionEvent,
};
pub use state::{ChannelState, InvalidTransition, Transition};
