//! Verified peer identity.
//!
//! Produced exactly once, at the `Finished` transition. Intermediate
//! handshake steps keep their own local state; nothing here is mutated
//! incrementally.

use openssl::x509::X509;

/// The authenticated result of a completed handshake: the verified chain,
/// the derived principal, and the delegated proxy if one was produced.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    /// Verified certificate chain, leaf first. When delegation happened the
    /// delegated proxy is the new leaf.
    chain: Vec<X509>,
    /// Principal name derived from the first non-proxy certificate's subject.
    principal: String,
    /// Whether the chain's leaf is a delegated proxy certificate.
    delegated: bool,
}

impl PeerIdentity {
    pub(crate) fn new(chain: Vec<X509>, principal: String, delegated: bool) -> Self {
        Self {
            chain,
            principal,
            delegated,
        }
    }

    /// Verified chain, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    /// Principal name in slash-separated DN form, e.g.
    /// `/O=Example/CN=data mover`.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// True when a delegated proxy certificate heads the chain.
    #[must_use]
    pub fn is_delegated(&self) -> bool {
        self.delegated
    }
}
