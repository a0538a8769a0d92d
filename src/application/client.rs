//! Client-side (initiator) handshake state machine, used when this peer
//! must authenticate itself outward, e.g. as the data-movement initiator of
//! a third-party transfer.
//!
//! The driver calls [`ClientHandshake::start`] to get the opening request,
//! sends it, and feeds every server response to [`ClientHandshake::next`];
//! `Ok(None)` means the handshake finished, `Ok(Some(request))` means
//! another round is needed. The first terminal server status ends the
//! exchange; an error status surfaces as `AuthenticationRejected`.

use std::sync::Arc;

use openssl::x509::store::X509Store;
use tracing::{debug, warn};

use crate::application::HandshakeState;
use crate::core::crypto::challenge::{new_rtag, sign_challenge, verify_challenge};
use crate::core::crypto::delegation::sign_proxy_request;
use crate::core::crypto::dh::DhExchange;
use crate::core::crypto::session::{BufferDecrypter, SessionKey};
use crate::core::crypto::x509::{chain_from_pem, chain_to_pem, validate_chain};
use crate::domain::credential::CredentialStore;
use crate::domain::errors::SecurityError;
use crate::domain::params::{
    clnt_opts, CipherSuite, DigestAlg, ProtocolVariant, CRYPTO_MODULE, LIST_SEP,
};
use crate::protocol::bucket::{encode_buffer, BucketBuffer, BucketTag, SecurityBucket};
use crate::protocol::message::{AuthRequest, AuthResponse, AuthStatus, ClientStep, ServerStep};

/// Connection-independent client policy.
pub struct ClientConfig {
    /// Highest variant this client speaks.
    pub variant: ProtocolVariant,
    /// Ciphers this client accepts, preference order.
    pub ciphers: Vec<CipherSuite>,
    /// Digests this client accepts, preference order.
    pub digests: Vec<DigestAlg>,
    /// Willing to delegate a proxy credential if the server asks.
    pub allow_delegation: bool,
    /// Trust anchors for validating the server's chain.
    pub store: X509Store,
    /// Login name advertised in the `User` bucket, when set.
    pub user: Option<String>,
    /// This client's own credential.
    pub credentials: Arc<CredentialStore>,
}

/// One connection's client-side handshake.
pub struct ClientHandshake {
    config: Arc<ClientConfig>,
    state: HandshakeState,
    /// Challenge we issued to the server in the opening request.
    our_rtag: Option<Vec<u8>>,
    /// Variant settled from the server's echoed version.
    variant: Option<ProtocolVariant>,
    session: Option<Arc<SessionKey>>,
}

impl ClientHandshake {
    #[must_use]
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            state: HandshakeState::Init,
            our_rtag: None,
            variant: None,
            session: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// True once the server acknowledged the handshake.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == HandshakeState::Finished
    }

    /// Post-handshake handle over the negotiated session key.
    #[must_use]
    pub fn decrypter(&self) -> Option<BufferDecrypter> {
        self.session.as_ref().map(|s| BufferDecrypter::new(s.clone()))
    }

    /// Build the opening request: declared version, crypto module, options
    /// and our challenge to the server.
    ///
    /// # Errors
    /// `Crypto` when the RNG fails; `ProtocolSequence` when called twice.
    pub fn start(&mut self) -> Result<AuthRequest, SecurityError> {
        if self.state != HandshakeState::Init {
            return Err(SecurityError::ProtocolSequence {
                expected: "none",
                got: "certreq",
            });
        }
        let rtag = new_rtag()?;
        let mut opts = 0u32;
        if self.config.allow_delegation && self.config.variant == ProtocolVariant::DelegationCapable
        {
            opts |= clnt_opts::DELEGATE;
        }
        let buffer = vec![
            SecurityBucket::from_u32_payload(BucketTag::Version, self.config.variant.version()),
            SecurityBucket::from_str_payload(BucketTag::CryptoMod, CRYPTO_MODULE),
            SecurityBucket::new(BucketTag::Rtag, rtag.clone()),
            SecurityBucket::from_u32_payload(BucketTag::ClntOpts, opts),
        ];
        self.our_rtag = Some(rtag);
        self.state = HandshakeState::CertRequested;
        Ok(AuthRequest {
            step: ClientStep::CertReq,
            buffer,
        })
    }

    /// Consume one server response; `None` means the handshake finished.
    ///
    /// Any failure latches `Failed` and discards session-key material.
    ///
    /// # Errors
    /// The mapped handshake failure; terminal either way.
    pub fn next(&mut self, response: &AuthResponse) -> Result<Option<AuthRequest>, SecurityError> {
        match self.step(response) {
            Ok(out) => Ok(out),
            Err(err) => {
                warn!(error = %err, "client handshake failed");
                self.state = HandshakeState::Failed;
                self.session = None;
                Err(err)
            }
        }
    }

    fn step(&mut self, response: &AuthResponse) -> Result<Option<AuthRequest>, SecurityError> {
        match &response.status {
            AuthStatus::Ok => {
                if !matches!(
                    self.state,
                    HandshakeState::CertVerified | HandshakeState::ProxyRequested
                ) {
                    return Err(SecurityError::ProtocolSequence {
                        expected: "auth-more",
                        got: "ok",
                    });
                }
                self.state = HandshakeState::Finished;
                debug!("handshake acknowledged by server");
                Ok(None)
            }
            AuthStatus::Error { code, .. } => Err(SecurityError::AuthenticationRejected(
                code.message().to_string(),
            )),
            AuthStatus::More { step, buffer } => {
                let view = BucketBuffer::new(buffer);
                match (self.state, step) {
                    (HandshakeState::CertRequested, ServerStep::Init) => {
                        self.on_init(&view).map(Some)
                    }
                    (HandshakeState::CertVerified, ServerStep::PxyReq) => {
                        self.on_pxyreq(&view).map(Some)
                    }
                    (_, ServerStep::PxyReq)
                        if self.variant == Some(ProtocolVariant::Legacy) =>
                    {
                        Err(SecurityError::UnsupportedOperation("proxy delegation"))
                    }
                    (_, ServerStep::PxyReq) => Err(SecurityError::ProtocolSequence {
                        expected: "init",
                        got: "pxyreq",
                    }),
                    (_, ServerStep::Init) => Err(SecurityError::ProtocolSequence {
                        expected: "pxyreq or ok",
                        got: "init",
                    }),
                }
            }
        }
    }

    /// Server challenge round: authenticate the server, settle algorithms,
    /// finalize the session key, and answer with our encrypted credentials.
    fn on_init(&mut self, view: &BucketBuffer<'_>) -> Result<AuthRequest, SecurityError> {
        let version = view.u32(BucketTag::Version)?;
        if version > self.config.variant.version() {
            // The server must negotiate down, never up.
            return Err(SecurityError::AuthenticationRejected(
                "server demanded a newer protocol version".to_string(),
            ));
        }
        let variant = ProtocolVariant::from_version(version);
        self.variant = Some(variant);

        // Server proof first: validated chain, then signature over the
        // challenge we sent. Our credentials go on the wire only after this
        // holds.
        let server_chain = chain_from_pem(view.bytes(BucketTag::X509)?)?;
        validate_chain(&server_chain, &self.config.store)?;
        let digest_offer = view.token(BucketTag::MdAlg)?;
        let signing_digest = DigestAlg::from_token(
            digest_offer
                .split(LIST_SEP)
                .next()
                .ok_or(SecurityError::SignatureInvalid)?,
        )?;
        let our_rtag = self.our_rtag.as_deref().ok_or(SecurityError::SignatureInvalid)?;
        let server_key = server_chain[0].public_key()?;
        verify_challenge(
            our_rtag,
            view.bytes(BucketTag::SignedRtag)?,
            &server_key,
            signing_digest,
        )?;

        let cipher_offer = view.token(BucketTag::CipherAlg)?;
        let cipher = choose_cipher(cipher_offer, &self.config.ciphers)?;
        let digest = choose_digest(digest_offer, &self.config.digests)?;

        // Respond on the server's group with a fresh keypair, then derive
        // the session key from the server's public value.
        let (p, g, _) = DhExchange::parse_puk(view.bytes(BucketTag::Puk)?)?;
        let exchange = DhExchange::on_group(&p, &g)?;
        let our_puk = exchange.public_bucket()?;
        let session = exchange.finalize_session_key(
            view,
            BucketTag::Puk,
            cipher,
            digest,
            variant.padding_mode(),
        )?;

        let credential = self.config.credentials.current();
        let server_rtag = view.bytes(BucketTag::Rtag)?;
        let signed = sign_challenge(server_rtag, credential.key(), digest)?;
        let mut inner = vec![
            SecurityBucket::new(BucketTag::X509, chain_to_pem(credential.chain())?),
            SecurityBucket::new(BucketTag::SignedRtag, signed),
        ];
        if let Some(user) = &self.config.user {
            inner.push(SecurityBucket::from_str_payload(BucketTag::User, user));
        }
        let main = session.encrypt(&encode_buffer(&inner))?;

        let buffer = vec![
            SecurityBucket::from_str_payload(BucketTag::CipherAlg, cipher.token()),
            SecurityBucket::from_str_payload(BucketTag::MdAlg, digest.token()),
            our_puk,
            SecurityBucket::new(BucketTag::Main, main),
        ];
        self.session = Some(Arc::new(session));
        self.state = HandshakeState::CertVerified;
        debug!(version, cipher = cipher.token(), digest = digest.token(), "sent certificate step");
        Ok(AuthRequest {
            step: ClientStep::Cert,
            buffer,
        })
    }

    /// Delegation round: sign the server's CSR with our credential.
    fn on_pxyreq(&mut self, view: &BucketBuffer<'_>) -> Result<AuthRequest, SecurityError> {
        let variant = self.variant.ok_or(SecurityError::KeyAgreement)?;
        if variant == ProtocolVariant::Legacy {
            return Err(SecurityError::UnsupportedOperation("proxy delegation"));
        }
        if !self.config.allow_delegation {
            return Err(SecurityError::AuthenticationRejected(
                "server requested delegation but it is disabled".to_string(),
            ));
        }
        let session = self.session.as_ref().ok_or(SecurityError::Decrypt)?;
        let plain = session.decrypt(view.bytes(BucketTag::Main)?)?;
        let nested = crate::protocol::bucket::decode_buffer(&plain)?;
        let inner = BucketBuffer::new(&nested);
        let csr_pem = inner.bytes(BucketTag::X509Req)?;

        let credential = self.config.credentials.current();
        let proxy = sign_proxy_request(csr_pem, &credential)?;

        let reply = vec![SecurityBucket::new(BucketTag::X509, proxy.to_pem()?)];
        let main = session.encrypt(&encode_buffer(&reply))?;
        self.state = HandshakeState::ProxyRequested;
        debug!("signed delegation request");
        Ok(AuthRequest {
            step: ClientStep::SigPxy,
            buffer: vec![SecurityBucket::new(BucketTag::Main, main)],
        })
    }
}

/// First entry of the server's offer that this side also speaks.
fn choose_cipher(offer: &str, ours: &[CipherSuite]) -> Result<CipherSuite, SecurityError> {
    offer
        .split(LIST_SEP)
        .filter_map(|t| CipherSuite::from_token(t).ok())
        .find(|c| ours.contains(c))
        .ok_or_else(|| SecurityError::UnsupportedAlgorithm(offer.to_string()))
}

fn choose_digest(offer: &str, ours: &[DigestAlg]) -> Result<DigestAlg, SecurityError> {
    offer
        .split(LIST_SEP)
        .filter_map(|t| DigestAlg::from_token(t).ok())
        .find(|d| ours.contains(d))
        .ok_or_else(|| SecurityError::UnsupportedAlgorithm(offer.to_string()))
}
