#![cfg(test)]
//! Throwaway PKI fixtures for unit tests: a self-signed CA that can issue
//! end-entity credentials, plus PEM-file helpers for the credential store.

use std::path::Path;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509};

use crate::domain::credential::{Credential, CredentialPaths};

fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn cn_name(cn: &str) -> X509Name {
    let mut b = X509Name::builder().unwrap();
    b.append_entry_by_nid(Nid::ORGANIZATIONNAME, "gsi-authn test").unwrap();
    b.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    b.build()
}

fn random_serial() -> openssl::asn1::Asn1Integer {
    let mut serial = BigNum::new().unwrap();
    serial.rand(127, MsbOption::MAYBE_ZERO, false).unwrap();
    serial.to_asn1_integer().unwrap()
}

/// A self-signed test CA.
pub struct TestCa {
    key: PKey<Private>,
    cert: X509,
}

impl TestCa {
    pub fn generate(cn: &str) -> Self {
        let key = rsa_key();
        let name = cn_name(cn);
        let mut b = X509::builder().unwrap();
        b.set_version(2).unwrap();
        b.set_serial_number(&random_serial()).unwrap();
        b.set_subject_name(&name).unwrap();
        b.set_issuer_name(&name).unwrap();
        b.set_pubkey(&key).unwrap();
        b.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        b.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
        b.append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        b.sign(&key, MessageDigest::sha256()).unwrap();
        Self {
            key,
            cert: b.build(),
        }
    }

    /// Issue an end-entity credential (leaf + this CA as its chain).
    pub fn issue_ee(&self, cn: &str) -> TestEe {
        let key = rsa_key();
        let name = cn_name(cn);
        let mut b = X509::builder().unwrap();
        b.set_version(2).unwrap();
        b.set_serial_number(&random_serial()).unwrap();
        b.set_subject_name(&name).unwrap();
        b.set_issuer_name(self.cert.subject_name()).unwrap();
        b.set_pubkey(&key).unwrap();
        b.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        b.set_not_after(&Asn1Time::days_from_now(7).unwrap()).unwrap();
        b.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()
                .unwrap(),
        )
        .unwrap();
        b.sign(&self.key, MessageDigest::sha256()).unwrap();
        TestEe {
            key,
            chain: vec![b.build(), self.cert.clone()],
        }
    }

    /// CA bundle PEM for trust-store construction.
    pub fn bundle_pem(&self) -> Vec<u8> {
        self.cert.to_pem().unwrap()
    }
}

/// An issued end-entity credential.
pub struct TestEe {
    key: PKey<Private>,
    chain: Vec<X509>,
}

impl TestEe {
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub fn leaf_subject_der(&self) -> Vec<u8> {
        self.chain[0].subject_name().to_der().unwrap()
    }

    pub fn chain_pem(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for c in &self.chain {
            out.extend_from_slice(&c.to_pem().unwrap());
        }
        out
    }

    pub fn key_pem(&self) -> Vec<u8> {
        self.key.private_key_to_pem_pkcs8().unwrap()
    }

    /// In-memory credential for direct crypto tests.
    pub fn credential(&self) -> Credential {
        Credential::from_pem(&self.chain_pem(), &self.key_pem()).unwrap()
    }
}

/// Write chain + key PEM files into `dir` and return store paths.
pub fn write_pem_files(dir: &Path, ee: &TestEe) -> CredentialPaths {
    let cert = dir.join("hostcert.pem");
    let key = dir.join("hostkey.pem");
    std::fs::write(&cert, ee.chain_pem()).unwrap();
    std::fs::write(&key, ee.key_pem()).unwrap();
    CredentialPaths { cert, key }
}
