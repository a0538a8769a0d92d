//! Session-key agreement: ephemeral Diffie-Hellman over a fixed well-known
//! group, plus the key-derivation scheme that turns the shared secret into
//! symmetric key + IV material.
//!
//! The `Puk` bucket carries this side's group and public value as three
//! newline-separated hex runs (`p`, `g`, `pub`), 7-bit clean. The KDF is
//! counter-chained digest expansion: `B1 = MD(secret)`,
//! `Bi = MD(B(i-1) || secret)`, concatenated and split into key then IV.
//! Both are interop constants validated against the reference peer, not
//! tunables.

use openssl::bn::{BigNum, BigNumRef};
use openssl::dh::Dh;
use openssl::pkey::Private;

use crate::domain::errors::SecurityError;
use crate::domain::params::{CipherSuite, DigestAlg, PaddingMode};
use crate::protocol::bucket::{BucketBuffer, BucketTag, SecurityBucket};

use super::session::SessionKey;

/// One side's ephemeral exchange state, generated at handshake start and
/// consumed when the peer's public value arrives.
pub struct DhExchange {
    dh: Dh<Private>,
}

impl DhExchange {
    /// Generate an ephemeral keypair over the fixed 2048-bit group.
    ///
    /// # Errors
    /// `Crypto` on backend failure.
    pub fn generate() -> Result<Self, SecurityError> {
        let dh = Dh::get_2048_256()?.generate_key()?;
        Ok(Self { dh })
    }

    /// Generate an ephemeral keypair on a peer-supplied group (the initiator
    /// responds on the parameters the server advertised).
    ///
    /// # Errors
    /// `KeyAgreement` when the parameters are structurally unusable.
    pub fn on_group(p: &BigNumRef, g: &BigNumRef) -> Result<Self, SecurityError> {
        let params = Dh::from_pqg(
            p.to_owned().map_err(|_| SecurityError::KeyAgreement)?,
            None,
            g.to_owned().map_err(|_| SecurityError::KeyAgreement)?,
        )
        .map_err(|_| SecurityError::KeyAgreement)?;
        let dh = params.generate_key().map_err(|_| SecurityError::KeyAgreement)?;
        Ok(Self { dh })
    }

    /// Serialize this side's group and public value into a `Puk` bucket.
    ///
    /// # Errors
    /// `Crypto` on backend failure.
    pub fn public_bucket(&self) -> Result<SecurityBucket, SecurityError> {
        let p = self.dh.prime_p().to_hex_str()?;
        let g = self.dh.generator().to_hex_str()?;
        let y = self.dh.public_key().to_hex_str()?;
        let payload = format!("{p}\n{g}\n{y}");
        Ok(SecurityBucket::from_str_payload(BucketTag::Puk, &payload))
    }

    /// Parse a peer `Puk` payload into `(p, g, pub)`.
    ///
    /// # Errors
    /// `KeyAgreement` on any malformed field.
    pub fn parse_puk(payload: &[u8]) -> Result<(BigNum, BigNum, BigNum), SecurityError> {
        let text = std::str::from_utf8(payload).map_err(|_| SecurityError::KeyAgreement)?;
        let mut lines = text.lines();
        let mut next = || -> Result<BigNum, SecurityError> {
            let line = lines.next().ok_or(SecurityError::KeyAgreement)?;
            BigNum::from_hex_str(line.trim()).map_err(|_| SecurityError::KeyAgreement)
        };
        let p = next()?;
        let g = next()?;
        let y = next()?;
        Ok((p, g, y))
    }

    /// Combine the peer's exchange public value (from the named bucket of a
    /// decoded buffer) with this side's private value and derive the session
    /// key for the negotiated cipher/digest/padding.
    ///
    /// The peer value is range-checked (`2 <= y <= p - 2`) before use; the
    /// peer must also be speaking the same group.
    ///
    /// # Errors
    /// `KeyAgreement` for a missing, malformed or out-of-range value.
    pub fn finalize_session_key(
        self,
        buffer: &BucketBuffer<'_>,
        tag: BucketTag,
        cipher: CipherSuite,
        digest: DigestAlg,
        padding: PaddingMode,
    ) -> Result<SessionKey, SecurityError> {
        let payload = buffer.bytes(tag).map_err(|_| SecurityError::KeyAgreement)?;
        let (peer_p, peer_g, peer_y) = Self::parse_puk(payload)?;

        // The group is fixed per handshake; a peer swapping p or g is in the
        // invalid-key failure class.
        if &*peer_p != self.dh.prime_p() || &*peer_g != self.dh.generator() {
            return Err(SecurityError::KeyAgreement);
        }
        check_public_range(&peer_y, self.dh.prime_p())?;

        let secret = self
            .dh
            .compute_key(&peer_y)
            .map_err(|_| SecurityError::KeyAgreement)?;
        derive_session_key(&secret, cipher, digest, padding)
    }
}

/// Reject exchange values outside `[2, p - 2]`.
fn check_public_range(y: &BigNum, p: &BigNumRef) -> Result<(), SecurityError> {
    let two = BigNum::from_u32(2).map_err(|_| SecurityError::KeyAgreement)?;
    let mut p_minus_2 = BigNum::new().map_err(|_| SecurityError::KeyAgreement)?;
    p_minus_2
        .checked_sub(p, &two)
        .map_err(|_| SecurityError::KeyAgreement)?;
    if *y < two || *y > p_minus_2 {
        return Err(SecurityError::KeyAgreement);
    }
    Ok(())
}

/// Fixed KDF: counter-chained digest expansion over the shared secret,
/// split into cipher key then IV.
pub(crate) fn derive_session_key(
    secret: &[u8],
    cipher: CipherSuite,
    digest: DigestAlg,
    padding: PaddingMode,
) -> Result<SessionKey, SecurityError> {
    let key_len = cipher.cipher().key_len();
    let iv_len = cipher.cipher().iv_len().unwrap_or(0);
    let need = key_len + iv_len;

    let mut okm = Vec::with_capacity(need + digest.len());
    let mut block: Vec<u8> = Vec::new();
    while okm.len() < need {
        let mut input = block.clone();
        input.extend_from_slice(secret);
        block = openssl::hash::hash(digest.digest(), &input)?.to_vec();
        okm.extend_from_slice(&block);
    }
    okm.truncate(need);

    let iv = okm.split_off(key_len);
    Ok(SessionKey::new(okm, iv, cipher, digest, padding))
}
