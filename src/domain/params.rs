//! ---- Negotiated handshake parameters and interop constants ----
//!
//! Protocol versions, the padding-mode binding rule, the cipher/digest
//! catalogs and client option flags. Wire values here are interop
//! commitments; the defensive maxima are not.

use openssl::hash::MessageDigest;
use openssl::symm::Cipher;

use crate::domain::errors::SecurityError;

/// Wire protocol version of the legacy (pre-delegation) handshake.
pub const VERSION_LEGACY: u32 = 10200;
/// Wire protocol version of the delegation-capable handshake.
pub const VERSION_DELEGATION: u32 = 10300;

/// Crypto module token carried in the `CryptoMod` bucket. Only the openssl
/// module is spoken here.
pub const CRYPTO_MODULE: &str = "ssl";

/// Length of the random challenge tag.
pub const RTAG_LEN: usize = 16;

/// Separator for algorithm offer lists on the wire.
pub const LIST_SEP: char = ':';

/// Client option flags carried in the `ClntOpts` bucket.
pub mod clnt_opts {
    /// Client is willing to delegate a proxy credential if asked.
    pub const DELEGATE: u32 = 0x1;
}

/// The two wire-incompatible handshake revisions, negotiated via the
/// `Version` bucket. Gates which transitions and padding modes are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    Legacy,
    DelegationCapable,
}

impl ProtocolVariant {
    /// Classify a peer-declared version. Anything below the delegation
    /// revision speaks the legacy wire form.
    #[must_use]
    pub fn from_version(version: u32) -> Self {
        if version >= VERSION_DELEGATION {
            Self::DelegationCapable
        } else {
            Self::Legacy
        }
    }

    /// Version token this side advertises for the variant.
    #[must_use]
    pub fn version(self) -> u32 {
        match self {
            Self::Legacy => VERSION_LEGACY,
            Self::DelegationCapable => VERSION_DELEGATION,
        }
    }

    /// Padding-mode binding rule: legacy sessions always run the session
    /// cipher padded, delegation-capable sessions run unpadded. Fixed once
    /// per session at key finalization; never re-chosen.
    #[must_use]
    pub fn padding_mode(self) -> PaddingMode {
        match self {
            Self::Legacy => PaddingMode::Padded,
            Self::DelegationCapable => PaddingMode::Unpadded,
        }
    }
}

/// Session-cipher padding mode. See [`ProtocolVariant::padding_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    /// PKCS#7 block padding handled by the cipher backend.
    Padded,
    /// No cipher padding; plaintext is length-framed and zero-filled to the
    /// block boundary by the session sealing format.
    Unpadded,
}

/// Symmetric ciphers this side can speak, by wire token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    Aes128Cbc,
    BlowfishCbc,
}

impl CipherSuite {
    pub const ALL: [CipherSuite; 2] = [CipherSuite::Aes128Cbc, CipherSuite::BlowfishCbc];

    /// # Errors
    /// `UnsupportedAlgorithm` for tokens outside the catalog.
    pub fn from_token(token: &str) -> Result<Self, SecurityError> {
        match token {
            "aes-128-cbc" => Ok(Self::Aes128Cbc),
            "bf-cbc" => Ok(Self::BlowfishCbc),
            other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Aes128Cbc => "aes-128-cbc",
            Self::BlowfishCbc => "bf-cbc",
        }
    }

    #[must_use]
    pub fn cipher(self) -> Cipher {
        match self {
            Self::Aes128Cbc => Cipher::aes_128_cbc(),
            Self::BlowfishCbc => Cipher::bf_cbc(),
        }
    }
}

/// Digests this side can speak, by wire token. Used for the session KDF,
/// the sealed-payload integrity check and the challenge signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlg {
    Sha1,
    Md5,
}

impl DigestAlg {
    pub const ALL: [DigestAlg; 2] = [DigestAlg::Sha1, DigestAlg::Md5];

    /// # Errors
    /// `UnsupportedAlgorithm` for tokens outside the catalog.
    pub fn from_token(token: &str) -> Result<Self, SecurityError> {
        match token {
            "sha1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    #[must_use]
    pub fn digest(self) -> MessageDigest {
        match self {
            Self::Sha1 => MessageDigest::sha1(),
            Self::Md5 => MessageDigest::md5(),
        }
    }

    /// Digest output length in bytes.
    #[must_use]
    pub fn len(self) -> usize {
        self.digest().size()
    }
}

/// Render an offer list as the colon-separated wire form.
#[must_use]
pub fn offer_list(tokens: &[&str]) -> String {
    tokens.join(":")
}

/// Check a peer-chosen token against an advertised offer list.
///
/// # Errors
/// `UnsupportedAlgorithm` when the token was not offered.
pub fn check_offered(chosen: &str, offered: &str) -> Result<(), SecurityError> {
    if offered.split(LIST_SEP).any(|t| t == chosen) {
        Ok(())
    } else {
        Err(SecurityError::UnsupportedAlgorithm(chosen.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_from_version_thresholds() {
        assert_eq!(
            ProtocolVariant::from_version(VERSION_LEGACY),
            ProtocolVariant::Legacy
        );
        assert_eq!(
            ProtocolVariant::from_version(VERSION_DELEGATION),
            ProtocolVariant::DelegationCapable
        );
        assert_eq!(
            ProtocolVariant::from_version(VERSION_DELEGATION + 100),
            ProtocolVariant::DelegationCapable
        );
        assert_eq!(ProtocolVariant::from_version(1), ProtocolVariant::Legacy);
    }

    #[test]
    fn padding_binding_is_fixed_per_variant() {
        assert_eq!(ProtocolVariant::Legacy.padding_mode(), PaddingMode::Padded);
        assert_eq!(
            ProtocolVariant::DelegationCapable.padding_mode(),
            PaddingMode::Unpadded
        );
    }

    #[test]
    fn cipher_and_digest_tokens_round_trip() {
        for c in CipherSuite::ALL {
            assert_eq!(CipherSuite::from_token(c.token()).unwrap(), c);
        }
        for d in DigestAlg::ALL {
            assert_eq!(DigestAlg::from_token(d.token()).unwrap(), d);
        }
        assert!(matches!(
            CipherSuite::from_token("rot13"),
            Err(SecurityError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            DigestAlg::from_token("crc32"),
            Err(SecurityError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn offer_list_membership() {
        let offered = offer_list(&["aes-128-cbc", "bf-cbc"]);
        assert_eq!(offered, "aes-128-cbc:bf-cbc");
        assert!(check_offered("bf-cbc", &offered).is_ok());
        assert!(matches!(
            check_offered("des-cbc", &offered),
            Err(SecurityError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn digest_lengths() {
        assert_eq!(DigestAlg::Sha1.len(), 20);
        assert_eq!(DigestAlg::Md5.len(), 16);
    }
}
