//! Contracts between this crate and the outer protocol's dispatch layer.
//!
//! The outer protocol decodes an authentication request off a connection's
//! stream, hands it to that connection's [`Authenticator`], and writes back
//! whatever response comes out. One authenticator per connection; requests
//! arrive strictly in stream order (per-connection FIFO). Crypto here is
//! synchronous and CPU-bound — callers may run `authenticate` off the I/O
//! thread, but must not reorder steps of the same connection.

use std::collections::BTreeMap;

use crate::core::crypto::session::BufferDecrypter;
use crate::domain::identity::PeerIdentity;
use crate::protocol::message::{AuthRequest, AuthResponse};

/// Flat configuration map handed to factory constructors: paths to the CA
/// bundle and host credential, allowed algorithm lists, variant, delegation
/// policy.
pub type Properties = BTreeMap<String, String>;

/// Per-connection handshake object.
///
/// `authenticate` never panics and never returns transport errors: every
/// internal failure is mapped to a generic wire error response and latches
/// the handshake; the caller must then drop the connection's authentication
/// attempt. A half-completed handshake never reports `is_completed()` and
/// never yields a subject.
pub trait Authenticator: Send {
    /// Drive one handshake round.
    fn authenticate(&mut self, request: AuthRequest) -> AuthResponse;

    /// True once the handshake reached its terminal success state.
    fn is_completed(&self) -> bool;

    /// Short protocol token for the outer login negotiation.
    fn protocol_name(&self) -> &'static str;

    /// Verified peer identity; `Some` only when completed.
    fn subject(&self) -> Option<&PeerIdentity>;

    /// Post-handshake handle over the negotiated session key, for later
    /// requests carrying signed/encrypted payloads. `Some` only once the
    /// session key exists.
    fn decrypter(&self) -> Option<BufferDecrypter>;
}

/// Shared, connection-independent provider state: credential store, trust
/// anchors, negotiation policy. Safe for concurrent `create_handler` calls.
pub trait AuthFactory: Send + Sync {
    /// Fresh handshake object for one connection.
    fn create_handler(&self) -> Box<dyn Authenticator>;

    /// Protocol token of the handlers this factory produces.
    fn protocol_name(&self) -> &'static str;
}
