#![allow(dead_code)]
//! Shared fixtures for the black-box handshake tests: a throwaway CA, issued
//! host/user credentials on disk, and ready-made server/client configurations.

use std::path::Path;
use std::sync::Arc;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509};

use gsi_authn::application::client::ClientConfig;
use gsi_authn::application::server::ServerConfig;
use gsi_authn::core::crypto::x509::trust_store_from_pem;
use gsi_authn::domain::credential::{CredentialPaths, CredentialStore};
use gsi_authn::domain::params::{CipherSuite, DigestAlg, ProtocolVariant};

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

    pub fn bundle_pem(&self) -> Vec<u8> {
        self.cert.to_pem().unwrap()
    }
}

pub struct TestEe {
    key: PKey<Private>,
    chain: Vec<X509>,
}

impl TestEe {
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
}

/// Write a credential to disk and open a store over it.
pub fn store_for(dir: &Path, name: &str, ee: &TestEe) -> Arc<CredentialStore> {
    let cert = dir.join(format!("{name}-cert.pem"));
    let key = dir.join(format!("{name}-key.pem"));
    std::fs::write(&cert, ee.chain_pem()).unwrap();
    std::fs::write(&key, ee.key_pem()).unwrap();
    Arc::new(CredentialStore::open(CredentialPaths { cert, key }).unwrap())
}

/// Like [`store_for`], but pairs the chain with a foreign private key, for
/// proof-of-possession failure tests.
pub fn mismatched_store_for(
    dir: &Path,
    name: &str,
    chain_of: &TestEe,
    key_of: &TestEe,
) -> Arc<CredentialStore> {
    let cert = dir.join(format!("{name}-cert.pem"));
    let key = dir.join(format!("{name}-key.pem"));
    std::fs::write(&cert, chain_of.chain_pem()).unwrap();
    std::fs::write(&key, key_of.key_pem()).unwrap();
    Arc::new(CredentialStore::open(CredentialPaths { cert, key }).unwrap())
}

pub struct Harness {
    pub ca: TestCa,
    pub server: Arc<ServerConfig>,
    pub client: Arc<ClientConfig>,
}

impl Harness {
    /// Fresh trust store over this harness's CA.
    pub fn trust_store(&self) -> openssl::x509::store::X509Store {
        trust_store_from_pem(&self.ca.bundle_pem()).unwrap()
    }

    /// Client configuration identical to the harness default except for the
    /// credential store.
    pub fn client_with_credentials(&self, credentials: Arc<CredentialStore>) -> Arc<ClientConfig> {
        Arc::new(ClientConfig {
            variant: self.client.variant,
            ciphers: self.client.ciphers.clone(),
            digests: self.client.digests.clone(),
            allow_delegation: false,
            store: self.trust_store(),
            user: None,
            credentials,
        })
    }
}

pub struct HarnessOptions {
    pub server_variant: ProtocolVariant,
    pub client_variant: ProtocolVariant,
    pub request_delegation: bool,
    pub allow_delegation: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            server_variant: ProtocolVariant::DelegationCapable,
            client_variant: ProtocolVariant::DelegationCapable,
            request_delegation: false,
            allow_delegation: false,
        }
    }
}

/// One CA trusted by both sides, a host credential for the server and a user
/// credential for the client.
pub fn harness(dir: &Path, opts: HarnessOptions) -> Harness {
    let ca = TestCa::generate("Loopback CA");
    let host = ca.issue_ee("server-host");
    let user = ca.issue_ee("alice");

    let server = Arc::new(ServerConfig {
        variant: opts.server_variant,
        ciphers: vec![CipherSuite::Aes128Cbc],
        digests: vec![DigestAlg::Sha1],
        request_delegation: opts.request_delegation,
        store: trust_store_from_pem(&ca.bundle_pem()).unwrap(),
        anchors: vec![ca.cert.clone()],
        credentials: store_for(dir, "host", &host),
    });
    let client = Arc::new(ClientConfig {
        variant: opts.client_variant,
        ciphers: vec![CipherSuite::Aes128Cbc],
        digests: vec![DigestAlg::Sha1],
        allow_delegation: opts.allow_delegation,
        store: trust_store_from_pem(&ca.bundle_pem()).unwrap(),
        user: Some("alice".to_string()),
        credentials: store_for(dir, "user", &user),
    });
    Harness { ca, server, client }
}
