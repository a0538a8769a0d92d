//! Crate root for `gsi-authn`.
//!
//! Implements the GSI (Grid Security Infrastructure) mutual-authentication
//! handshake used by a binary remote-file-access protocol: a multi-round
//! state machine exchanging typed, nested binary containers ("security
//! buckets"), negotiating a DH session key, proving key possession through a
//! signed random challenge, and optionally delegating a short-lived proxy
//! credential.
//!
//! High-level tree:
//! * `protocol` – wire-level bucket codec and the handshake request/response
//!   seam shared with the outer protocol.
//! * `domain` – negotiated parameters, the failure taxonomy, verified peer
//!   identity and the shared credential store.
//! * `core::crypto` – concrete crypto: DH exchange + KDF, the symmetric
//!   session cipher, challenge signatures, chain validation and proxy
//!   delegation.
//! * `application` – the server and client handshake state machines and the
//!   provider factory/registry.
//! * `ports` – the authenticator/factory traits consumed by the outer
//!   protocol's dispatch layer.
//!
//! The outer request framing, transport TLS and authorization policy are
//! explicitly out of scope; this crate begins at the decoded authentication
//! request and ends at the verified [`domain::identity::PeerIdentity`].

pub mod application;
pub mod core;
pub mod domain;
pub mod ports;
pub mod protocol;

#[cfg(test)]
mod test_support;
