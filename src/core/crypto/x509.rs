//! Certificate-chain handling: PEM <-> bucket payloads, trust-store
//! construction, proxy-aware path validation and principal-name derivation.
//!
//! Validation detail (which link failed, which field) is logged locally at
//! `warn`; the wire only ever sees the generic security code.

use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::{X509NameRef, X509Ref, X509StoreContext, X509};
use tracing::warn;

use crate::domain::errors::SecurityError;

/// Parse a concatenated PEM blob (leaf first) into a chain.
///
/// # Errors
/// `CertificateInvalid` on an empty or unparsable blob.
pub fn chain_from_pem(pem: &[u8]) -> Result<Vec<X509>, SecurityError> {
    let chain = X509::stack_from_pem(pem)
        .map_err(|_| SecurityError::CertificateInvalid("unparsable certificate chain".into()))?;
    if chain.is_empty() {
        return Err(SecurityError::CertificateInvalid(
            "empty certificate chain".into(),
        ));
    }
    Ok(chain)
}

/// Render a chain as a concatenated PEM blob (7-bit clean bucket payload).
///
/// # Errors
/// `Crypto` on backend failure.
pub fn chain_to_pem(chain: &[X509]) -> Result<Vec<u8>, SecurityError> {
    let mut out = Vec::new();
    for cert in chain {
        out.extend_from_slice(&cert.to_pem()?);
    }
    Ok(out)
}

/// Build a trust store from a PEM CA bundle.
///
/// # Errors
/// `CertificateInvalid` on an empty/unparsable bundle, `Crypto` on backend
/// failure.
pub fn trust_store_from_pem(bundle: &[u8]) -> Result<X509Store, SecurityError> {
    let cas = chain_from_pem(bundle)?;
    let mut builder = X509StoreBuilder::new()?;
    for ca in cas {
        builder.add_cert(ca)?;
    }
    Ok(builder.build())
}

/// Slash-separated DN form of an X.509 name, e.g. `/O=Example/CN=host`.
///
/// # Errors
/// `Crypto` on backend failure.
pub fn name_to_string(name: &X509NameRef) -> Result<String, SecurityError> {
    let mut out = String::new();
    for entry in name.entries() {
        let key = entry
            .object()
            .nid()
            .short_name()
            .unwrap_or("UNKNOWN");
        let value = entry
            .data()
            .as_utf8()
            .map_err(SecurityError::Crypto)?;
        out.push('/');
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
    }
    Ok(out)
}

/// Colon-separated digest hashes of the trust anchors' subjects, advertised
/// in the `IssuerHash` bucket.
///
/// # Errors
/// `Crypto` on backend failure.
pub fn issuer_hashes(cas: &[X509], digest: MessageDigest) -> Result<String, SecurityError> {
    let mut parts = Vec::with_capacity(cas.len());
    for ca in cas {
        let der = ca.subject_name().to_der()?;
        let h = openssl::hash::hash(digest, &der)?;
        let mut hex = String::with_capacity(h.len() * 2);
        for b in h.iter() {
            use std::fmt::Write;
            let _ = write!(hex, "{b:02x}");
        }
        parts.push(hex);
    }
    Ok(parts.join(":"))
}

/// True when `cert` looks like a proxy link of `issuer`: issued by it,
/// carrying the issuer's subject plus one extra CN component, and not a CA.
fn is_proxy_link(cert: &X509Ref, issuer: &X509Ref) -> bool {
    let Ok(cert_issuer) = cert.issuer_name().to_der() else {
        return false;
    };
    let Ok(issuer_subject) = issuer.subject_name().to_der() else {
        return false;
    };
    if cert_issuer != issuer_subject {
        return false;
    }
    // A CA issuing a subordinate is ordinary path building, not delegation.
    let extra_cn = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .count()
        > issuer.subject_name().entries_by_nid(Nid::COMMONNAME).count();
    extra_cn
}

fn check_validity_window(cert: &X509Ref) -> Result<(), SecurityError> {
    let now = Asn1Time::days_from_now(0)?;
    if cert.not_after() < &*now || cert.not_before() > &*now {
        return Err(SecurityError::CertificateInvalid(
            "certificate outside validity window".into(),
        ));
    }
    Ok(())
}

/// Validate a presented chain (leaf first) against the trust store.
///
/// Leading proxy links are checked manually — issuer binding, signature by
/// the delegator's key, validity window — then ordinary path validation runs
/// from the first non-proxy certificate with the remaining chain as
/// untrusted intermediates. Ordinary and delegated chains go through this
/// identical routine.
///
/// # Errors
/// `CertificateInvalid` with local detail (logged, never wired).
pub fn validate_chain(chain: &[X509], store: &X509Store) -> Result<(), SecurityError> {
    if chain.is_empty() {
        return Err(SecurityError::CertificateInvalid(
            "empty certificate chain".into(),
        ));
    }

    // Strip proxy links off the front.
    let mut idx = 0;
    while idx + 1 < chain.len() && is_proxy_link(&chain[idx], &chain[idx + 1]) {
        let proxy = &chain[idx];
        let delegator = &chain[idx + 1];
        check_validity_window(proxy)?;
        let signer_key = delegator.public_key()?;
        let signed_ok = proxy.verify(&signer_key).unwrap_or(false);
        if !signed_ok {
            warn!(
                subject = %name_to_string(proxy.subject_name())?,
                "proxy certificate signature does not verify against delegator"
            );
            return Err(SecurityError::CertificateInvalid(
                "proxy signature invalid".into(),
            ));
        }
        idx += 1;
    }

    let leaf = &chain[idx];
    check_validity_window(leaf)?;
    let mut untrusted = Stack::new()?;
    for cert in &chain[idx + 1..] {
        untrusted.push(cert.clone())?;
    }
    let mut ctx = X509StoreContext::new()?;
    let (ok, verify_err) = ctx.init(store, leaf, &untrusted, |c| {
        let ok = c.verify_cert()?;
        Ok((ok, c.error()))
    })?;
    if !ok {
        warn!(
            subject = %name_to_string(leaf.subject_name())?,
            error = %verify_err.error_string(),
            "certificate chain failed path validation"
        );
        return Err(SecurityError::CertificateInvalid(
            verify_err.error_string().to_string(),
        ));
    }
    Ok(())
}

/// Principal name: subject DN of the first non-proxy certificate in the
/// chain, so a delegated identity maps to the delegator's principal.
///
/// # Errors
/// `CertificateInvalid` on an empty chain, `Crypto` on backend failure.
pub fn principal_name(chain: &[X509]) -> Result<String, SecurityError> {
    if chain.is_empty() {
        return Err(SecurityError::CertificateInvalid(
            "empty certificate chain".into(),
        ));
    }
    let mut idx = 0;
    while idx + 1 < chain.len() && is_proxy_link(&chain[idx], &chain[idx + 1]) {
        idx += 1;
    }
    name_to_string(chain[idx].subject_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::DigestAlg;
    use crate::test_support::TestCa;

    #[test]
    fn pem_round_trip_preserves_chain_order() {
        let ca = TestCa::generate("Chain CA");
        let ee = ca.issue_ee("chain-ee");
        let pem = chain_to_pem(ee.chain()).unwrap();
        let back = chain_from_pem(&pem).unwrap();
        assert_eq!(back.len(), ee.chain().len());
        assert_eq!(
            back[0].subject_name().to_der().unwrap(),
            ee.leaf_subject_der()
        );
    }

    #[test]
    fn valid_chain_passes_store_validation() {
        let ca = TestCa::generate("Valid CA");
        let ee = ca.issue_ee("valid-ee");
        let store = trust_store_from_pem(&ca.bundle_pem()).unwrap();
        validate_chain(ee.chain(), &store).unwrap();
    }

    #[test]
    fn chain_from_unrelated_ca_fails() {
        let good = TestCa::generate("Good CA");
        let evil = TestCa::generate("Evil CA");
        let ee = evil.issue_ee("impostor");
        let store = trust_store_from_pem(&good.bundle_pem()).unwrap();
        let err = validate_chain(ee.chain(), &store).unwrap_err();
        assert!(matches!(err, SecurityError::CertificateInvalid(_)));
    }

    #[test]
    fn principal_is_slash_dn() {
        let ca = TestCa::generate("Principal CA");
        let ee = ca.issue_ee("principal-ee");
        let p = principal_name(ee.chain()).unwrap();
        assert!(p.contains("/CN=principal-ee"), "got {p}");
    }

    #[test]
    fn issuer_hashes_are_stable_and_colon_joined() {
        let ca = TestCa::generate("Hash CA");
        let cas = chain_from_pem(&ca.bundle_pem()).unwrap();
        let h1 = issuer_hashes(&cas, DigestAlg::Sha1.digest()).unwrap();
        let h2 = issuer_hashes(&cas, DigestAlg::Sha1.digest()).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 40); // one sha1 hex run, no separator needed
    }

    #[test]
    fn empty_chain_is_invalid() {
        let ca = TestCa::generate("Empty CA");
        let store = trust_store_from_pem(&ca.bundle_pem()).unwrap();
        assert!(matches!(
            validate_chain(&[], &store).unwrap_err(),
            SecurityError::CertificateInvalid(_)
        ));
        assert!(matches!(
            principal_name(&[]).unwrap_err(),
            SecurityError::CertificateInvalid(_)
        ));
    }
}
