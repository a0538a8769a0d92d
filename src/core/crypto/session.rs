//! Symmetric session cipher.
//!
//! A [`SessionKey`] is created once per connection during the cert step and
//! seals/opens every sensitive bucket from then on. CBC carries no MAC, so
//! the sealing format appends the negotiated digest over the plaintext
//! before encryption; any unwrap inconsistency — padding, digest, length —
//! is reported as the single generic `Decrypt` error.
//!
//! Sealing format, fixed per session by the negotiated padding mode:
//! * padded: `CBC-PKCS7(data || MD(data))`
//! * unpadded: `CBC(u32 len || data || MD(data) || zero fill)` to the block
//!   boundary, no cipher padding.
//!
//! The mode is chosen once, from the peer's declared protocol version, at
//! key finalization. Mixing modes mid-session is a protocol violation and
//! fails closed; this code never attempts the other mode on failure.

use std::sync::Arc;

use openssl::symm::{Crypter, Mode};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::errors::SecurityError;
use crate::domain::params::{CipherSuite, DigestAlg, PaddingMode};

/// Negotiated symmetric key material plus the algorithms it is bound to.
/// Key and IV are wiped on drop; destroying the handshake object destroys
/// the session key.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: Vec<u8>,
    iv: Vec<u8>,
    #[zeroize(skip)]
    cipher: CipherSuite,
    #[zeroize(skip)]
    digest: DigestAlg,
    #[zeroize(skip)]
    padding: PaddingMode,
}

impl SessionKey {
    pub(crate) fn new(
        key: Vec<u8>,
        iv: Vec<u8>,
        cipher: CipherSuite,
        digest: DigestAlg,
        padding: PaddingMode,
    ) -> Self {
        Self {
            key,
            iv,
            cipher,
            digest,
            padding,
        }
    }

    /// Digest negotiated alongside the key (also used for the challenge
    /// signature).
    #[must_use]
    pub fn digest(&self) -> DigestAlg {
        self.digest
    }

    fn crypter(&self, mode: Mode) -> Result<Crypter, SecurityError> {
        let iv = if self.iv.is_empty() {
            None
        } else {
            Some(self.iv.as_slice())
        };
        let mut c = Crypter::new(self.cipher.cipher(), mode, &self.key, iv)
            .map_err(|_| SecurityError::Decrypt)?;
        c.pad(self.padding == PaddingMode::Padded);
        Ok(c)
    }

    fn run(&self, mode: Mode, input: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let block = self.cipher.cipher().block_size();
        let mut c = self.crypter(mode)?;
        let mut out = vec![0u8; input.len() + block];
        let mut n = c.update(input, &mut out).map_err(|_| SecurityError::Decrypt)?;
        n += c.finalize(&mut out[n..]).map_err(|_| SecurityError::Decrypt)?;
        out.truncate(n);
        Ok(out)
    }

    /// Seal a plaintext under the session key.
    ///
    /// # Errors
    /// `Decrypt` on any backend failure (reported generically in both
    /// directions to keep the error surface symmetric).
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let md = openssl::hash::hash(self.digest.digest(), plain).map_err(|_| SecurityError::Decrypt)?;
        let block = self.cipher.cipher().block_size();
        let mut framed = match self.padding {
            PaddingMode::Padded => Vec::with_capacity(plain.len() + md.len()),
            PaddingMode::Unpadded => {
                let mut v = Vec::with_capacity(4 + plain.len() + md.len() + block);
                v.extend_from_slice(&u32::try_from(plain.len()).map_err(|_| SecurityError::Decrypt)?.to_be_bytes());
                v
            }
        };
        framed.extend_from_slice(plain);
        framed.extend_from_slice(&md);
        if self.padding == PaddingMode::Unpadded {
            let fill = (block - framed.len() % block) % block;
            framed.resize(framed.len() + fill, 0);
        }
        self.run(Mode::Encrypt, &framed)
    }

    /// Open a ciphertext sealed by the peer under the same session key.
    ///
    /// # Errors
    /// `Decrypt` on bad padding, length framing, or digest mismatch — never
    /// anything more specific.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, SecurityError> {
        if sealed.is_empty() {
            return Err(SecurityError::Decrypt);
        }
        let framed = self.run(Mode::Decrypt, sealed)?;
        let md_len = self.digest.len();
        let (data, md) = match self.padding {
            PaddingMode::Padded => {
                if framed.len() < md_len {
                    return Err(SecurityError::Decrypt);
                }
                let split = framed.len() - md_len;
                (&framed[..split], &framed[split..])
            }
            PaddingMode::Unpadded => {
                if framed.len() < 4 {
                    return Err(SecurityError::Decrypt);
                }
                let len = u32::from_be_bytes(framed[..4].try_into().expect("4-byte slice")) as usize;
                if framed.len() < 4 + len + md_len {
                    return Err(SecurityError::Decrypt);
                }
                (&framed[4..4 + len], &framed[4 + len..4 + len + md_len])
            }
        };
        let expect = openssl::hash::hash(self.digest.digest(), data).map_err(|_| SecurityError::Decrypt)?;
        if !openssl::memcmp::eq(&expect, md) {
            return Err(SecurityError::Decrypt);
        }
        Ok(data.to_vec())
    }
}

/// Cloneable post-handshake handle over the negotiated session key, handed
/// to the outer protocol for later requests that carry signed/encrypted
/// payloads.
#[derive(Clone)]
pub struct BufferDecrypter {
    key: Arc<SessionKey>,
}

impl BufferDecrypter {
    pub(crate) fn new(key: Arc<SessionKey>) -> Self {
        Self { key }
    }

    /// # Errors
    /// `Decrypt`, as [`SessionKey::decrypt`].
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, SecurityError> {
        self.key.decrypt(sealed)
    }

    /// # Errors
    /// `Decrypt`, as [`SessionKey::encrypt`].
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, SecurityError> {
        self.key.encrypt(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::dh::derive_session_key;

    fn key(cipher: CipherSuite, padding: PaddingMode) -> SessionKey {
        derive_session_key(&[0x5Au8; 48], cipher, DigestAlg::Sha1, padding).unwrap()
    }

    #[test]
    fn seal_open_round_trip_padded() {
        let k = key(CipherSuite::Aes128Cbc, PaddingMode::Padded);
        let sealed = k.encrypt(b"gsi main bucket payload").unwrap();
        assert_ne!(&sealed, b"gsi main bucket payload");
        assert_eq!(k.decrypt(&sealed).unwrap(), b"gsi main bucket payload");
    }

    #[test]
    fn seal_open_round_trip_unpadded() {
        let k = key(CipherSuite::Aes128Cbc, PaddingMode::Unpadded);
        for len in [0usize, 1, 15, 16, 17, 100] {
            let plain = vec![0xABu8; len];
            let sealed = k.encrypt(&plain).unwrap();
            assert_eq!(sealed.len() % 16, 0, "unpadded output stays block aligned");
            assert_eq!(k.decrypt(&sealed).unwrap(), plain);
        }
    }

    #[test]
    fn ciphertext_tamper_is_generic_decrypt_error() {
        for padding in [PaddingMode::Padded, PaddingMode::Unpadded] {
            let k = key(CipherSuite::Aes128Cbc, padding);
            let mut sealed = k.encrypt(b"tamper target payload bytes").unwrap();
            for idx in [0, sealed.len() / 2, sealed.len() - 1] {
                let mut copy = sealed.clone();
                copy[idx] ^= 0x01;
                assert!(
                    matches!(k.decrypt(&copy).unwrap_err(), SecurityError::Decrypt),
                    "bit flip at {idx} must fail generically"
                );
            }
            // Truncation fails too.
            sealed.truncate(sealed.len() - 1);
            assert!(matches!(k.decrypt(&sealed).unwrap_err(), SecurityError::Decrypt));
        }
    }

    #[test]
    fn wrong_key_is_generic_decrypt_error() {
        let k1 = key(CipherSuite::Aes128Cbc, PaddingMode::Padded);
        let k2 = derive_session_key(
            &[0x11u8; 48],
            CipherSuite::Aes128Cbc,
            DigestAlg::Sha1,
            PaddingMode::Padded,
        )
        .unwrap();
        let sealed = k1.encrypt(b"secret").unwrap();
        assert!(matches!(k2.decrypt(&sealed).unwrap_err(), SecurityError::Decrypt));
    }

    #[test]
    fn mixed_padding_modes_fail_closed() {
        let secret = [0x77u8; 48];
        let padded = derive_session_key(
            &secret,
            CipherSuite::Aes128Cbc,
            DigestAlg::Sha1,
            PaddingMode::Padded,
        )
        .unwrap();
        let unpadded = derive_session_key(
            &secret,
            CipherSuite::Aes128Cbc,
            DigestAlg::Sha1,
            PaddingMode::Unpadded,
        )
        .unwrap();
        // Same key material, different fixed modes: neither direction opens.
        let sealed = padded.encrypt(b"mode mixing check").unwrap();
        assert!(matches!(
            unpadded.decrypt(&sealed).unwrap_err(),
            SecurityError::Decrypt
        ));
        let sealed = unpadded.encrypt(b"mode mixing check").unwrap();
        assert!(matches!(
            padded.decrypt(&sealed).unwrap_err(),
            SecurityError::Decrypt
        ));
    }

    #[test]
    fn empty_ciphertext_rejected() {
        let k = key(CipherSuite::Aes128Cbc, PaddingMode::Padded);
        assert!(matches!(k.decrypt(b"").unwrap_err(), SecurityError::Decrypt));
    }

    #[test]
    fn decrypter_handle_shares_the_key() {
        let k = Arc::new(key(CipherSuite::Aes128Cbc, PaddingMode::Unpadded));
        let d1 = BufferDecrypter::new(k.clone());
        let d2 = d1.clone();
        let sealed = d1.encrypt(b"post-handshake frame").unwrap();
        assert_eq!(d2.decrypt(&sealed).unwrap(), b"post-handshake frame");
    }
}
