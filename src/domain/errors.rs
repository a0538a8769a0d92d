//! ---- Failure taxonomy ----
//!
//! Every handshake failure is one of these kinds. All are local,
//! per-connection failures: they latch the handshake into `Failed`, are
//! surfaced to the peer only as one of the four generic wire codes, and are
//! never retried here. The detailed cause (which certificate field, which
//! padding check) is logged locally and never disclosed on the wire.

use thiserror::Error;

use crate::protocol::bucket::BucketError;
use crate::protocol::message::WireErrorCode;

#[derive(Debug, Error)]
pub enum SecurityError {
    /// Structural decode failure in a bucket buffer.
    #[error("malformed bucket: {0}")]
    MalformedBucket(#[from] BucketError),

    /// Peer's exchange public value was absent, unparsable or out of range.
    #[error("key agreement failed")]
    KeyAgreement,

    /// Symmetric unwrap failure: bad padding, integrity mismatch or wrong
    /// key. Deliberately carries no distinguishing detail.
    #[error("decryption failed")]
    Decrypt,

    /// Challenge signature did not verify under the presented leaf key.
    #[error("challenge signature invalid")]
    SignatureInvalid,

    /// Peer chose an algorithm this side did not offer or does not speak.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Peer requested an operation the negotiated variant does not allow.
    #[error("operation not supported by negotiated protocol: {0}")]
    UnsupportedOperation(&'static str),

    /// Request step does not match the state machine's expected next step.
    #[error("handshake step out of sequence: expected {expected}, got {got}")]
    ProtocolSequence {
        expected: &'static str,
        got: &'static str,
    },

    /// Chain failed path validation or the trust-anchor check.
    #[error("certificate chain invalid: {0}")]
    CertificateInvalid(String),

    /// Explicit error response received from the peer.
    #[error("authentication rejected by peer: {0}")]
    AuthenticationRejected(String),

    /// Crypto backend failure. Wire-invisible; mapped to the generic
    /// security code like everything else.
    #[error("crypto backend failure: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

impl SecurityError {
    /// Collapse the failure kind onto the small wire-level code set.
    #[must_use]
    pub fn wire_code(&self) -> WireErrorCode {
        match self {
            Self::MalformedBucket(_) => WireErrorCode::Serialization,
            Self::KeyAgreement | Self::Decrypt => WireErrorCode::Decrypt,
            Self::ProtocolSequence { .. } | Self::UnsupportedOperation(_) => {
                WireErrorCode::Sequence
            }
            Self::SignatureInvalid
            | Self::UnsupportedAlgorithm(_)
            | Self::CertificateInvalid(_)
            | Self::AuthenticationRejected(_)
            | Self::Crypto(_) => WireErrorCode::Security,
        }
    }
}
