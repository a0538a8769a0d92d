//! Proxy delegation: the server generates a keypair + signing request; the
//! client signs that request with its own credential into a short-lived
//! proxy certificate chained under its identity. The resulting chain
//! validates through the same path-validation routine as an ordinary chain.

use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::KeyUsage;
use openssl::x509::{X509Name, X509Req, X509};

use crate::domain::credential::Credential;
use crate::domain::errors::SecurityError;

/// RSA modulus size for delegated proxy keys. Shorter than host keys; the
/// credential is short-lived.
const PROXY_RSA_BITS: u32 = 2048;

/// Proxy certificate lifetime in seconds (12 hours).
const PROXY_LIFETIME_SECS: i64 = 12 * 60 * 60;

/// Signing digest for issued proxy certificates. Independent of the
/// handshake digest negotiation; never MD5.
fn issue_digest() -> MessageDigest {
    MessageDigest::sha256()
}

/// Server-side half of delegation: a fresh keypair and the CSR the client
/// is asked to sign. The private key never leaves this side.
pub struct ProxyRequest {
    key: PKey<Private>,
    req: X509Req,
}

impl ProxyRequest {
    /// Generate the delegation keypair and a self-signed CSR for it.
    ///
    /// # Errors
    /// `Crypto` on backend failure.
    pub fn generate() -> Result<Self, SecurityError> {
        let key = PKey::from_rsa(Rsa::generate(PROXY_RSA_BITS)?)?;
        let mut name = X509Name::builder()?;
        name.append_entry_by_nid(Nid::COMMONNAME, "proxy")?;
        let name = name.build();

        let mut builder = X509Req::builder()?;
        builder.set_version(0)?;
        builder.set_subject_name(&name)?;
        builder.set_pubkey(&key)?;
        builder.sign(&key, issue_digest())?;
        Ok(Self {
            key,
            req: builder.build(),
        })
    }

    /// PEM form for the `X509Req` bucket.
    ///
    /// # Errors
    /// `Crypto` on backend failure.
    pub fn to_pem(&self) -> Result<Vec<u8>, SecurityError> {
        Ok(self.req.to_pem()?)
    }

    /// The delegation private key, paired with the returned certificate once
    /// the client has signed.
    #[must_use]
    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }
}

/// Client-side half: sign a server-supplied CSR with the delegator's
/// credential, producing a proxy certificate that binds the server's public
/// key to the delegator's identity.
///
/// The proxy subject is the delegator's subject plus one `CN=proxy`
/// component; issuer is the delegator's subject; validity is capped at
/// twelve hours and never extends past the delegator's own leaf.
///
/// # Errors
/// `CertificateInvalid` on a CSR that fails its self-signature check;
/// `Crypto` on backend failure.
pub fn sign_proxy_request(
    csr_pem: &[u8],
    credential: &Credential,
) -> Result<X509, SecurityError> {
    let req = X509Req::from_pem(csr_pem)
        .map_err(|_| SecurityError::CertificateInvalid("unparsable signing request".into()))?;
    let req_key = req.public_key()?;
    if !req.verify(&req_key)? {
        return Err(SecurityError::CertificateInvalid(
            "signing request self-signature invalid".into(),
        ));
    }

    let delegator = credential.leaf();

    // Subject: delegator subject entries plus CN=proxy.
    let mut name = X509Name::builder()?;
    for entry in delegator.subject_name().entries() {
        let nid = entry.object().nid();
        let value = entry.data().as_utf8()?;
        name.append_entry_by_nid(nid, &value)?;
    }
    name.append_entry_by_nid(Nid::COMMONNAME, "proxy")?;
    let name = name.build();

    let mut builder = X509::builder()?;
    builder.set_version(2)?;

    let mut serial = BigNum::new()?;
    serial.rand(127, MsbOption::MAYBE_ZERO, false)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    builder.set_subject_name(&name)?;
    builder.set_issuer_name(delegator.subject_name())?;
    builder.set_pubkey(&req_key)?;

    let not_before = openssl::asn1::Asn1Time::from_unix(unix_now())?;
    let candidate = openssl::asn1::Asn1Time::from_unix(unix_now() + PROXY_LIFETIME_SECS)?;
    builder.set_not_before(&not_before)?;
    // Never outlive the delegator's own leaf.
    if delegator.not_after() < &*candidate {
        builder.set_not_after(delegator.not_after())?;
    } else {
        builder.set_not_after(&candidate)?;
    }

    builder.append_extension(KeyUsage::new().critical().digital_signature().build()?)?;
    builder.sign(credential.key(), issue_digest())?;
    Ok(builder.build())
}

fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(0))
        .unwrap_or(0)
}
