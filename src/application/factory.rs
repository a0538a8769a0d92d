//! Provider factory: turns a flat configuration map into a shared
//! [`ServerConfig`] and hands out per-connection handshake objects.
//!
//! Configuration problems are reported here, at construction, never at
//! handshake time. The registry maps provider names to constructors so the
//! hosting server can probe for a provider without linking against its
//! internals.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::application::server::{ServerConfig, ServerHandshake};
use crate::core::crypto::x509::{chain_from_pem, trust_store_from_pem};
use crate::domain::credential::{CredentialPaths, CredentialStore};
use crate::domain::errors::SecurityError;
use crate::domain::params::{CipherSuite, DigestAlg, ProtocolVariant, LIST_SEP};
use crate::ports::{AuthFactory, Authenticator, Properties};

/// Configuration keys consumed by [`GsiFactory::from_properties`].
pub mod keys {
    /// Path to the PEM CA bundle (required).
    pub const CA_BUNDLE: &str = "gsi.ca";
    /// Path to the host certificate chain PEM (required).
    pub const CERT: &str = "gsi.cert";
    /// Path to the host private key PEM (required).
    pub const KEY: &str = "gsi.key";
    /// Colon-separated cipher list, preference order.
    pub const CIPHERS: &str = "gsi.ciphers";
    /// Colon-separated digest list, preference order.
    pub const DIGESTS: &str = "gsi.digests";
    /// Declared protocol version.
    pub const VERSION: &str = "gsi.version";
    /// `true` to request proxy delegation from willing clients.
    pub const DELEGATION: &str = "gsi.delegation";
}

/// Construction-time configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key {0}")]
    MissingKey(&'static str),
    #[error("configuration key {key} invalid: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("configured material unusable: {0}")]
    Material(#[from] SecurityError),
}

/// Factory for the GSI provider. Holds everything connection-independent:
/// credential store, trust store, negotiation policy.
pub struct GsiFactory {
    config: Arc<ServerConfig>,
}

impl std::fmt::Debug for GsiFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GsiFactory").finish_non_exhaustive()
    }
}

impl GsiFactory {
    /// Build from a flat key/value map, loading and validating all on-disk
    /// material up front.
    ///
    /// # Errors
    /// `MissingKey`/`InvalidValue` for map problems, `Material` for PEM
    /// files that do not load.
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let require = |key: &'static str| -> Result<&str, ConfigError> {
            props
                .get(key)
                .map(String::as_str)
                .ok_or(ConfigError::MissingKey(key))
        };

        let bundle = std::fs::read(require(keys::CA_BUNDLE)?).map_err(|e| {
            ConfigError::InvalidValue {
                key: keys::CA_BUNDLE,
                reason: e.to_string(),
            }
        })?;
        let anchors = chain_from_pem(&bundle)?;
        let store = trust_store_from_pem(&bundle)?;

        let paths = CredentialPaths {
            cert: require(keys::CERT)?.into(),
            key: require(keys::KEY)?.into(),
        };
        let credentials = Arc::new(CredentialStore::open(paths)?);

        let ciphers = match props.get(keys::CIPHERS) {
            Some(list) => parse_list(keys::CIPHERS, list, CipherSuite::from_token)?,
            None => CipherSuite::ALL.to_vec(),
        };
        let digests = match props.get(keys::DIGESTS) {
            Some(list) => parse_list(keys::DIGESTS, list, DigestAlg::from_token)?,
            None => DigestAlg::ALL.to_vec(),
        };

        let variant = match props.get(keys::VERSION) {
            Some(raw) => {
                let version: u32 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: keys::VERSION,
                    reason: format!("not a version number: {raw}"),
                })?;
                ProtocolVariant::from_version(version)
            }
            None => ProtocolVariant::DelegationCapable,
        };

        let request_delegation = match props.get(keys::DELEGATION).map(String::as_str) {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") | None => false,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: keys::DELEGATION,
                    reason: format!("expected true/false, got {other}"),
                })
            }
        };

        debug!(
            ?variant,
            request_delegation,
            anchors = anchors.len(),
            "gsi provider configured"
        );
        Ok(Self {
            config: Arc::new(ServerConfig {
                variant,
                ciphers,
                digests,
                request_delegation,
                store,
                anchors,
                credentials,
            }),
        })
    }

    /// Direct construction from an already-built configuration.
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }
}

fn parse_list<T>(
    key: &'static str,
    list: &str,
    parse: impl Fn(&str) -> Result<T, SecurityError>,
) -> Result<Vec<T>, ConfigError> {
    let mut out = Vec::new();
    for token in list.split(LIST_SEP).filter(|t| !t.is_empty()) {
        out.push(parse(token).map_err(|_| ConfigError::InvalidValue {
            key,
            reason: format!("unknown algorithm token: {token}"),
        })?);
    }
    if out.is_empty() {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "empty algorithm list".to_string(),
        });
    }
    Ok(out)
}

impl AuthFactory for GsiFactory {
    fn create_handler(&self) -> Box<dyn Authenticator> {
        Box::new(ServerHandshake::new(self.config.clone()))
    }

    fn protocol_name(&self) -> &'static str {
        "gsi"
    }
}

/// Statically assembled provider table. An unmatched name yields `None` so
/// the caller can try its next provider; a matched name with a bad
/// configuration is an error, reported here rather than at handshake time.
pub struct Registry;

impl Registry {
    /// # Errors
    /// `ConfigError` when the named provider rejects its configuration.
    pub fn create_factory(
        name: &str,
        props: &Properties,
    ) -> Result<Option<Arc<dyn AuthFactory>>, ConfigError> {
        match name {
            "gsi" => Ok(Some(Arc::new(GsiFactory::from_properties(props)?))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_pem_files, TestCa};

    fn props_for(dir: &std::path::Path) -> Properties {
        let ca = TestCa::generate("Factory CA");
        let ee = ca.issue_ee("factory-host");
        let paths = write_pem_files(dir, &ee);
        std::fs::write(dir.join("ca.pem"), ca.bundle_pem()).unwrap();
        let mut props = Properties::new();
        props.insert(
            keys::CA_BUNDLE.to_string(),
            dir.join("ca.pem").display().to_string(),
        );
        props.insert(keys::CERT.to_string(), paths.cert.display().to_string());
        props.insert(keys::KEY.to_string(), paths.key.display().to_string());
        props
    }

    #[test]
    fn factory_from_minimal_properties() {
        let dir = tempfile::tempdir().unwrap();
        let factory = GsiFactory::from_properties(&props_for(dir.path())).unwrap();
        let handler = factory.create_handler();
        assert_eq!(handler.protocol_name(), "gsi");
        assert!(!handler.is_completed());
        assert!(handler.subject().is_none());
    }

    #[test]
    fn missing_required_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut props = props_for(dir.path());
        props.remove(keys::KEY);
        let err = GsiFactory::from_properties(&props).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(k) if k == keys::KEY));
    }

    #[test]
    fn unknown_algorithm_token_rejected_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut props = props_for(dir.path());
        props.insert(keys::CIPHERS.to_string(), "rot13".to_string());
        let err = GsiFactory::from_properties(&props).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == keys::CIPHERS));
    }

    #[test]
    fn registry_unmatched_name_yields_none() {
        let props = Properties::new();
        assert!(Registry::create_factory("krb5", &props).unwrap().is_none());
    }

    #[test]
    fn registry_matched_name_with_bad_config_errors() {
        let props = Properties::new();
        assert!(Registry::create_factory("gsi", &props).is_err());
    }
}
