//! Owned credentials and the shared credential store.
//!
//! A `Credential` is the end-entity chain + private key this side presents,
//! optionally with a proxy chain derived from the leaf. Loaded once at
//! factory construction; reloaded only through an explicit [`CredentialStore::refresh`],
//! which swaps atomically so concurrent handshakes never observe a
//! half-updated chain/key pair.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use openssl::asn1::Asn1Time;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tracing::warn;

use crate::domain::errors::SecurityError;

/// An owned certificate chain (leaf first) plus its private key.
#[derive(Debug)]
pub struct Credential {
    chain: Vec<X509>,
    key: PKey<Private>,
}

impl Credential {
    /// Load from PEM files: a chain file (leaf first, issuers appended) and
    /// a PKCS#8/PKCS#1 key file.
    ///
    /// # Errors
    /// `CertificateInvalid` on an empty chain file; `Crypto` on unreadable
    /// or unparsable PEM material.
    pub fn from_pem_files(cert: &Path, key: &Path) -> Result<Self, SecurityError> {
        let cert_pem = std::fs::read(cert).map_err(|e| {
            SecurityError::CertificateInvalid(format!("cannot read {}: {e}", cert.display()))
        })?;
        let key_pem = std::fs::read(key).map_err(|e| {
            SecurityError::CertificateInvalid(format!("cannot read {}: {e}", key.display()))
        })?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Load from in-memory PEM blobs.
    ///
    /// # Errors
    /// As [`Credential::from_pem_files`].
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, SecurityError> {
        let chain = X509::stack_from_pem(cert_pem)?;
        if chain.is_empty() {
            return Err(SecurityError::CertificateInvalid(
                "credential chain is empty".to_string(),
            ));
        }
        let key = PKey::private_key_from_pem(key_pem)?;
        Ok(Self { chain, key })
    }

    /// Chain, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    /// Leaf certificate.
    #[must_use]
    pub fn leaf(&self) -> &X509 {
        &self.chain[0]
    }

    #[must_use]
    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }

    /// Whether the leaf's validity window has already closed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match Asn1Time::days_from_now(0) {
            Ok(now) => self.leaf().not_after() < &*now,
            Err(_) => false,
        }
    }
}

/// Where a store's credential material lives on disk, kept so an explicit
/// refresh (e.g. proxy renewal) can re-read the same paths.
#[derive(Debug, Clone)]
pub struct CredentialPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Read-only shared credential handle. Safe for unlimited concurrent
/// handshakes; `refresh` is an atomic pointer swap, so readers holding a
/// snapshot keep a consistent chain/key pair.
pub struct CredentialStore {
    paths: CredentialPaths,
    current: RwLock<Arc<Credential>>,
}

impl CredentialStore {
    /// Load the credential once and build the store.
    ///
    /// # Errors
    /// As [`Credential::from_pem_files`].
    pub fn open(paths: CredentialPaths) -> Result<Self, SecurityError> {
        let cred = Credential::from_pem_files(&paths.cert, &paths.key)?;
        Ok(Self {
            paths,
            current: RwLock::new(Arc::new(cred)),
        })
    }

    /// Snapshot of the current credential. Lazily revalidates: a stale leaf
    /// is logged but still returned — renewal stays an explicit operation.
    #[must_use]
    pub fn current(&self) -> Arc<Credential> {
        let cred = self
            .current
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if cred.is_expired() {
            warn!(
                cert = %self.paths.cert.display(),
                "credential leaf certificate has expired; refresh required"
            );
        }
        cred
    }

    /// Re-read the credential from its paths and swap it in atomically.
    ///
    /// # Errors
    /// As [`Credential::from_pem_files`]; on error the previous credential
    /// stays installed.
    pub fn refresh(&self) -> Result<(), SecurityError> {
        let fresh = Arc::new(Credential::from_pem_files(&self.paths.cert, &self.paths.key)?);
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = fresh;
        Ok(())
    }
}
