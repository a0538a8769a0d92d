//! Handshake request/response seam.
//!
//! The outer protocol owns byte framing and dispatch; it hands this crate a
//! decoded [`AuthRequest`] and sends back whatever [`AuthResponse`] the state
//! machine produces. Step codes and wire error codes are interop-frozen.

use crate::protocol::bucket::{BucketTag, SecurityBucket};

/// Steps a client may declare on an authentication request.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStep {
    /// First request: advertise version/options, ask for the certificate
    /// challenge.
    CertReq = 1000,
    /// Certificate step: chosen algorithms, exchange public value, encrypted
    /// main bucket with chain + signed challenge.
    Cert = 1001,
    /// Delegation signing step: encrypted main bucket with the signed proxy
    /// certificate.
    SigPxy = 1002,
}

impl ClientStep {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CertReq => "certreq",
            Self::Cert => "cert",
            Self::SigPxy => "sigpxy",
        }
    }
}

impl TryFrom<u32> for ClientStep {
    type Error = u32;
    fn try_from(v: u32) -> Result<Self, u32> {
        match v {
            1000 => Ok(Self::CertReq),
            1001 => Ok(Self::Cert),
            1002 => Ok(Self::SigPxy),
            other => Err(other),
        }
    }
}

/// Steps a server may declare on an intermediate ("auth-more") response.
/// Code 2001 is reserved for the final certificate ack, which the outer
/// protocol expresses as a plain `Ok` status instead.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStep {
    /// Challenge response: offered algorithms, issuer hashes, exchange public
    /// value, random challenge tag.
    Init = 2000,
    /// Delegation request: encrypted main bucket carrying a certificate
    /// signing request.
    PxyReq = 2002,
}

impl TryFrom<u32> for ServerStep {
    type Error = u32;
    fn try_from(v: u32) -> Result<Self, u32> {
        match v {
            2000 => Ok(Self::Init),
            2002 => Ok(Self::PxyReq),
            other => Err(other),
        }
    }
}

/// Wire-level error codes. Internal failure kinds collapse onto this small
/// set before anything is sent to the peer (§ failure mapping); the detailed
/// cause is only ever logged locally.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireErrorCode {
    /// Malformed or undecodable bucket buffer.
    Serialization = 3010,
    /// Key agreement or symmetric unwrap failure. Deliberately generic.
    Decrypt = 3011,
    /// Any other security failure (bad chain, bad signature, unsupported
    /// algorithm, peer rejection).
    Security = 3012,
    /// Step received out of the expected order.
    Sequence = 3013,
}

impl WireErrorCode {
    /// Fixed, non-diagnostic text placed on the wire alongside the code.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::Serialization => "malformed security buffer",
            Self::Decrypt => "decryption failed",
            Self::Security => "authentication failed",
            Self::Sequence => "handshake step out of sequence",
        }
    }
}

/// One authentication request as decoded by the outer protocol.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub step: ClientStep,
    pub buffer: Vec<SecurityBucket>,
}

/// Outcome of one authentication round.
#[derive(Debug, Clone)]
pub enum AuthStatus {
    /// Handshake complete; the connection is authenticated.
    Ok,
    /// Intermediate response: the client must answer the given step.
    More {
        step: ServerStep,
        buffer: Vec<SecurityBucket>,
    },
    /// Terminal failure reported to the peer.
    Error {
        code: WireErrorCode,
        buffer: Vec<SecurityBucket>,
    },
}

#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub status: AuthStatus,
}

impl AuthResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: AuthStatus::Ok,
        }
    }

    #[must_use]
    pub fn more(step: ServerStep, buffer: Vec<SecurityBucket>) -> Self {
        Self {
            status: AuthStatus::More { step, buffer },
        }
    }

    /// Build the error response for a wire code: an `ErrorCode` bucket plus
    /// the fixed generic message.
    #[must_use]
    pub fn error(code: WireErrorCode) -> Self {
        let buffer = vec![
            SecurityBucket::from_u32_payload(BucketTag::ErrorCode, code as u32),
            SecurityBucket::from_str_payload(BucketTag::Message, code.message()),
        ];
        Self {
            status: AuthStatus::Error { code, buffer },
        }
    }
}
