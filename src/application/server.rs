//! Server-side handshake state machine.
//!
//! Drives authentication across successive client requests on one
//! connection:
//!
//! ```text
//! Init ──certreq──▶ CertRequested ──cert──▶ CertVerified ──▶ Finished
//!                                              │ (delegation)
//!                                              ▼
//!                                        ProxyRequested ──sigpxy──▶ Finished
//! ```
//!
//! A request whose declared step does not match the expected next step is
//! rejected with a sequence error rather than re-processed; replay and
//! out-of-order steps are not tolerated. Any failure latches `Failed` and
//! the connection must not proceed to non-authentication requests.

use std::sync::Arc;

use openssl::x509::store::X509Store;
use openssl::x509::X509;
use tracing::{debug, warn};

use crate::application::HandshakeState;
use crate::core::crypto::challenge::{new_rtag, sign_challenge, verify_challenge};
use crate::core::crypto::delegation::ProxyRequest;
use crate::core::crypto::dh::DhExchange;
use crate::core::crypto::session::{BufferDecrypter, SessionKey};
use crate::core::crypto::x509::{
    chain_from_pem, chain_to_pem, issuer_hashes, principal_name, validate_chain,
};
use crate::domain::credential::CredentialStore;
use crate::domain::errors::SecurityError;
use crate::domain::identity::PeerIdentity;
use crate::domain::params::{
    check_offered, clnt_opts, offer_list, CipherSuite, DigestAlg, ProtocolVariant, CRYPTO_MODULE,
};
use crate::ports::Authenticator;
use crate::protocol::bucket::{encode_buffer, BucketBuffer, BucketTag, SecurityBucket};
use crate::protocol::message::{AuthRequest, AuthResponse, ClientStep, ServerStep};

/// Connection-independent server policy, shared by every handshake a
/// factory produces.
pub struct ServerConfig {
    /// Highest variant this server speaks; the peer may negotiate down.
    pub variant: ProtocolVariant,
    /// Cipher offer, preference order.
    pub ciphers: Vec<CipherSuite>,
    /// Digest offer, preference order.
    pub digests: Vec<DigestAlg>,
    /// Ask willing delegation-capable clients for a proxy credential.
    pub request_delegation: bool,
    /// Trust anchors for path validation.
    pub store: X509Store,
    /// Trust anchors again, in certificate form, for the issuer-hash
    /// advertisement.
    pub anchors: Vec<X509>,
    /// This server's own credential.
    pub credentials: Arc<CredentialStore>,
}

/// One connection's server-side handshake.
pub struct ServerHandshake {
    config: Arc<ServerConfig>,
    state: HandshakeState,
    /// Ephemeral exchange value, alive between certreq and cert.
    exchange: Option<DhExchange>,
    /// Challenge issued to the client at certreq.
    rtag: Option<Vec<u8>>,
    /// Variant negotiated from the client's declared version.
    variant: Option<ProtocolVariant>,
    /// Client advertised willingness to delegate.
    client_delegates: bool,
    session: Option<Arc<SessionKey>>,
    /// Verified end-entity chain, held between cert and sigpxy.
    verified_chain: Option<Vec<X509>>,
    proxy_request: Option<ProxyRequest>,
    identity: Option<PeerIdentity>,
}

impl ServerHandshake {
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            state: HandshakeState::Init,
            exchange: None,
            rtag: None,
            variant: None,
            client_delegates: false,
            session: None,
            verified_chain: None,
            proxy_request: None,
            identity: None,
        }
    }

    /// Read-only view of the current state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn expected_step(&self) -> &'static str {
        match self.state {
            HandshakeState::Init => "certreq",
            HandshakeState::CertRequested => "cert",
            HandshakeState::ProxyRequested => "sigpxy",
            HandshakeState::CertVerified | HandshakeState::Finished | HandshakeState::Failed => {
                "none"
            }
        }
    }

    fn sequence_error(&self, got: ClientStep) -> SecurityError {
        SecurityError::ProtocolSequence {
            expected: self.expected_step(),
            got: got.name(),
        }
    }

    fn step(&mut self, request: &AuthRequest) -> Result<AuthResponse, SecurityError> {
        if self.state.is_terminal() {
            return Err(self.sequence_error(request.step));
        }
        match (self.state, request.step) {
            (HandshakeState::Init, ClientStep::CertReq) => self.on_certreq(request),
            (HandshakeState::CertRequested, ClientStep::Cert) => self.on_cert(request),
            (HandshakeState::ProxyRequested, ClientStep::SigPxy) => self.on_sigpxy(request),
            // The legacy variant never enters ProxyRequested; a signing-step
            // request against it is an unsupported operation, not merely a
            // sequencing slip.
            (_, ClientStep::SigPxy) if self.negotiated() == Some(ProtocolVariant::Legacy) => {
                Err(SecurityError::UnsupportedOperation("proxy delegation"))
            }
            (_, got) => Err(self.sequence_error(got)),
        }
    }

    fn negotiated(&self) -> Option<ProtocolVariant> {
        self.variant
    }

    /// First round: record the client's version/options, advertise our
    /// algorithm offers and issuers, send our exchange value and challenge.
    /// Mutual authentication happens here too: the server answers the
    /// client's challenge tag with its own chain and a signature over that
    /// tag, so the client can verify it before revealing anything.
    fn on_certreq(&mut self, request: &AuthRequest) -> Result<AuthResponse, SecurityError> {
        let view = BucketBuffer::new(&request.buffer);
        let peer_version = view.u32(BucketTag::Version)?;
        let module = view.token(BucketTag::CryptoMod)?;
        if module != CRYPTO_MODULE {
            return Err(SecurityError::UnsupportedAlgorithm(module.to_string()));
        }
        let client_rtag = view.bytes(BucketTag::Rtag)?;
        let opts = match view.find(BucketTag::ClntOpts) {
            Some(_) => view.u32(BucketTag::ClntOpts)?,
            None => 0,
        };
        self.client_delegates = opts & clnt_opts::DELEGATE != 0;

        // Negotiate down to the lower of the two sides.
        let version = peer_version.min(self.config.variant.version());
        let variant = ProtocolVariant::from_version(version);
        self.variant = Some(variant);

        let exchange = DhExchange::generate()?;
        let rtag = new_rtag()?;

        // The server signs with its preferred digest: the first entry of the
        // advertised offer, which is the one the client verifies against.
        let preferred = *self
            .config
            .digests
            .first()
            .ok_or_else(|| SecurityError::UnsupportedAlgorithm("empty digest offer".to_string()))?;
        let credential = self.config.credentials.current();
        let signed = sign_challenge(client_rtag, credential.key(), preferred)?;

        let cipher_tokens: Vec<&str> = self.config.ciphers.iter().map(|c| c.token()).collect();
        let digest_tokens: Vec<&str> = self.config.digests.iter().map(|d| d.token()).collect();
        let hash_digest = preferred.digest();
        let buffer = vec![
            SecurityBucket::from_u32_payload(BucketTag::Version, version),
            SecurityBucket::from_str_payload(BucketTag::CipherAlg, &offer_list(&cipher_tokens)),
            SecurityBucket::from_str_payload(BucketTag::MdAlg, &offer_list(&digest_tokens)),
            SecurityBucket::from_str_payload(
                BucketTag::IssuerHash,
                &issuer_hashes(&self.config.anchors, hash_digest)?,
            ),
            SecurityBucket::new(BucketTag::X509, chain_to_pem(credential.chain())?),
            SecurityBucket::new(BucketTag::SignedRtag, signed),
            exchange.public_bucket()?,
            SecurityBucket::new(BucketTag::Rtag, rtag.clone()),
        ];
        self.exchange = Some(exchange);
        self.rtag = Some(rtag);
        self.state = HandshakeState::CertRequested;
        debug!(version, ?variant, "issued certificate challenge");
        Ok(AuthResponse::more(ServerStep::Init, buffer))
    }

    /// Cert round: pin the negotiated algorithms, finalize the session key,
    /// open the main bucket and verify chain + challenge signature.
    fn on_cert(&mut self, request: &AuthRequest) -> Result<AuthResponse, SecurityError> {
        let view = BucketBuffer::new(&request.buffer);

        let cipher_token = view.token(BucketTag::CipherAlg)?;
        let digest_token = view.token(BucketTag::MdAlg)?;
        let cipher_tokens: Vec<&str> = self.config.ciphers.iter().map(|c| c.token()).collect();
        let digest_tokens: Vec<&str> = self.config.digests.iter().map(|d| d.token()).collect();
        check_offered(cipher_token, &offer_list(&cipher_tokens))?;
        check_offered(digest_token, &offer_list(&digest_tokens))?;
        let cipher = CipherSuite::from_token(cipher_token)?;
        let digest = DigestAlg::from_token(digest_token)?;

        let variant = self.variant.ok_or(SecurityError::KeyAgreement)?;
        let exchange = self.exchange.take().ok_or(SecurityError::KeyAgreement)?;
        let session = exchange.finalize_session_key(
            &view,
            BucketTag::Puk,
            cipher,
            digest,
            variant.padding_mode(),
        )?;

        let sealed = view.bytes(BucketTag::Main)?;
        let plain = session.decrypt(sealed)?;
        let nested = crate::protocol::bucket::decode_buffer(&plain)?;
        let inner = BucketBuffer::new(&nested);

        let chain = chain_from_pem(inner.bytes(BucketTag::X509)?)?;
        validate_chain(&chain, &self.config.store)?;

        let rtag = self.rtag.as_deref().ok_or(SecurityError::SignatureInvalid)?;
        let signature = inner.bytes(BucketTag::SignedRtag)?;
        let leaf_key = chain[0].public_key()?;
        verify_challenge(rtag, signature, &leaf_key, digest)?;

        if let Ok(user) = inner.token(BucketTag::User) {
            debug!(user, "client advertised login name");
        }

        self.session = Some(Arc::new(session));

        let delegating = variant == ProtocolVariant::DelegationCapable
            && self.config.request_delegation
            && self.client_delegates;
        if delegating {
            let proxy_request = ProxyRequest::generate()?;
            let inner = vec![SecurityBucket::new(
                BucketTag::X509Req,
                proxy_request.to_pem()?,
            )];
            let session = self.session.as_ref().ok_or(SecurityError::Decrypt)?;
            let main = session.encrypt(&encode_buffer(&inner))?;
            self.proxy_request = Some(proxy_request);
            self.verified_chain = Some(chain);
            self.state = HandshakeState::ProxyRequested;
            debug!("certificate verified; requesting proxy delegation");
            return Ok(AuthResponse::more(
                ServerStep::PxyReq,
                vec![SecurityBucket::new(BucketTag::Main, main)],
            ));
        }

        let principal = principal_name(&chain)?;
        debug!(%principal, "certificate verified; handshake finished");
        self.identity = Some(PeerIdentity::new(chain, principal, false));
        self.state = HandshakeState::Finished;
        Ok(AuthResponse::ok())
    }

    /// Delegation round: install the signed proxy returned by the client.
    fn on_sigpxy(&mut self, request: &AuthRequest) -> Result<AuthResponse, SecurityError> {
        let variant = self.variant.ok_or(SecurityError::KeyAgreement)?;
        if variant == ProtocolVariant::Legacy {
            return Err(SecurityError::UnsupportedOperation("proxy delegation"));
        }
        let view = BucketBuffer::new(&request.buffer);
        let session = self.session.as_ref().ok_or(SecurityError::Decrypt)?;
        let plain = session.decrypt(view.bytes(BucketTag::Main)?)?;
        let nested = crate::protocol::bucket::decode_buffer(&plain)?;
        let inner = BucketBuffer::new(&nested);

        let proxies = chain_from_pem(inner.bytes(BucketTag::X509)?)?;
        let ee_chain = self
            .verified_chain
            .take()
            .ok_or(SecurityError::UnsupportedOperation("proxy delegation"))?;

        let mut chain = proxies;
        chain.extend_from_slice(&ee_chain);
        validate_chain(&chain, &self.config.store)?;

        // The delegated key must be the one we generated the request for.
        let request_key = self
            .proxy_request
            .as_ref()
            .ok_or(SecurityError::UnsupportedOperation("proxy delegation"))?
            .key()
            .public_key_to_der()?;
        let delegated_key = chain[0].public_key()?.public_key_to_der()?;
        if request_key != delegated_key {
            return Err(SecurityError::CertificateInvalid(
                "delegated certificate binds an unexpected key".into(),
            ));
        }

        let principal = principal_name(&chain)?;
        debug!(%principal, "proxy delegation installed; handshake finished");
        self.identity = Some(PeerIdentity::new(chain, principal, true));
        self.state = HandshakeState::Finished;
        Ok(AuthResponse::ok())
    }
}

impl Authenticator for ServerHandshake {
    fn authenticate(&mut self, request: AuthRequest) -> AuthResponse {
        match self.step(&request) {
            Ok(response) => response,
            Err(err) => {
                warn!(step = request.step.name(), error = %err, "handshake step failed");
                self.state = HandshakeState::Failed;
                // Session key material of a failed handshake is discarded;
                // nothing later may decrypt under it.
                self.session = None;
                AuthResponse::error(err.wire_code())
            }
        }
    }

    fn is_completed(&self) -> bool {
        self.state == HandshakeState::Finished
    }

    fn protocol_name(&self) -> &'static str {
        "gsi"
    }

    fn subject(&self) -> Option<&PeerIdentity> {
        self.identity.as_ref()
    }

    fn decrypter(&self) -> Option<BufferDecrypter> {
        self.session.as_ref().map(|s| BufferDecrypter::new(s.clone()))
    }
}
