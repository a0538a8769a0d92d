//! Handshake orchestration: the server and client state machines and the
//! provider factory/registry. This layer owns the flow; crypto primitives
//! live in `core::crypto`, wire shapes in `protocol`.

pub mod client;
pub mod factory;
pub mod server;

/// Per-connection handshake progress. Exclusively owned by one connection's
/// handshake object; never shared.
///
/// Server reading: the step it has processed. Client reading: the step it
/// has sent and awaits an answer to. `Failed` latches: every subsequent
/// request on that connection is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing exchanged yet.
    Init,
    /// Certificate challenge issued (server) / first request sent (client).
    CertRequested,
    /// Peer certificate verified (server) / cert step sent (client).
    CertVerified,
    /// Delegation signing request outstanding.
    ProxyRequested,
    /// Terminal success; identity available.
    Finished,
    /// Terminal failure; latched.
    Failed,
}

impl HandshakeState {
    /// True for the two terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}
