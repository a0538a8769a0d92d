//! Challenge-tag signatures: proof of possession of the private key bound
//! to the presented certificate. The verifier failure class is
//! `SignatureInvalid`, deliberately distinct from the symmetric `Decrypt`
//! failure.

use openssl::pkey::{HasPrivate, HasPublic, PKeyRef};
use openssl::sign::{Signer, Verifier};

use crate::domain::errors::SecurityError;
use crate::domain::params::{DigestAlg, RTAG_LEN};

/// Fresh random challenge tag.
///
/// # Errors
/// `Crypto` when the backend RNG fails.
pub fn new_rtag() -> Result<Vec<u8>, SecurityError> {
    let mut tag = vec![0u8; RTAG_LEN];
    openssl::rand::rand_bytes(&mut tag)?;
    Ok(tag)
}

/// Sign a challenge tag with this side's private key over the negotiated
/// digest.
///
/// # Errors
/// `Crypto` on backend failure.
pub fn sign_challenge<T: HasPrivate>(
    tag: &[u8],
    key: &PKeyRef<T>,
    digest: DigestAlg,
) -> Result<Vec<u8>, SecurityError> {
    let mut signer = Signer::new(digest.digest(), key)?;
    signer.update(tag)?;
    Ok(signer.sign_to_vec()?)
}

/// Verify a challenge signature under the peer's public key.
///
/// # Errors
/// `SignatureInvalid` when verification fails for any reason, including a
/// structurally unusable signature.
pub fn verify_challenge<T: HasPublic>(
    tag: &[u8],
    signature: &[u8],
    key: &PKeyRef<T>,
    digest: DigestAlg,
) -> Result<(), SecurityError> {
    let ok = Verifier::new(digest.digest(), key)
        .and_then(|mut v| {
            v.update(tag)?;
            v.verify(signature)
        })
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(SecurityError::SignatureInvalid)
    }
}
