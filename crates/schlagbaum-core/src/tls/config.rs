//! TLS context construction from PEM files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::pem::{self, PemObject};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{VerifierBuilderError, WebPkiClientVerifier};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::verify::{DirectClientVerifier, DirectServerVerifier};

/// Locations of the CA, own certificate and own private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsPaths {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Default for TlsPaths {
    fn default() -> Self {
        Self {
            ca: PathBuf::from("/etc/schlagbaum/ca.pem"),
            cert: PathBuf::from("/etc/schlagbaum/cert.pem"),
            key: PathBuf::from("/etc/schlagbaum/key.pem"),
        }
    }
}

/// TLS configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("cannot read {what} from {path}: {source}")]
    Pem {
        what: &'static str,
        path: String,
        source: pem::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("invalid CA certificate in {path}: {source}")]
    Anchor { path: String, source: rustls::Error },

    #[error("cannot build certificate verifier: {0}")]
    Verifier(#[from] VerifierBuilderError),

    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

fn load_certs(
    path: &Path,
    what: &'static str,
) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let pem_error = |source: pem::Error| TlsConfigError::Pem {
        what,
        path: path.display().to_string(),
        source,
    };
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(pem_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(pem_error)?;
    if certs.is_empty() {
        return Err(TlsConfigError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    PrivateKeyDer::from_pem_file(path).map_err(|source| TlsConfigError::Pem {
        what: "private key",
        path: path.display().to_string(),
        source,
    })
}

fn load_anchors(
    path: &Path,
) -> Result<(Arc<RootCertStore>, Vec<CertificateDer<'static>>), TlsConfigError> {
    let anchors = load_certs(path, "CA certificate")?;
    let mut roots = RootCertStore::empty();
    for cert in &anchors {
        roots.add(cert.clone()).map_err(|source| TlsConfigError::Anchor {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok((Arc::new(roots), anchors))
}

/// Server context: own identity plus a mandatory, depth-1 client check.
pub fn server_config(paths: &TlsPaths) -> Result<Arc<rustls::ServerConfig>, TlsConfigError> {
    let (roots, anchors) = load_anchors(&paths.ca)?;
    let certs = load_certs(&paths.cert, "certificate")?;
    let key = load_key(&paths.key)?;
    let provider = provider();

    let webpki = WebPkiClientVerifier::builder_with_provider(roots, provider.clone()).build()?;
    let verifier = Arc::new(DirectClientVerifier::new(webpki, anchors));

    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;

    info!(
        ca = %paths.ca.display(),
        cert = %paths.cert.display(),
        "Server TLS context ready (client certificates required)"
    );
    Ok(Arc::new(config))
}

/// Client context: own identity, server checked against the CA only.
pub fn client_config(paths: &TlsPaths) -> Result<Arc<rustls::ClientConfig>, TlsConfigError> {
    let (roots, anchors) = load_anchors(&paths.ca)?;
    let certs = load_certs(&paths.cert, "certificate")?;
    let key = load_key(&paths.key)?;
    let provider = provider();

    let webpki = WebPkiServerVerifier::builder_with_provider(roots, provider.clone()).build()?;
    let verifier = Arc::new(DirectServerVerifier::new(webpki, anchors));

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(certs, key)?;

    info!(
        ca = %paths.ca.display(),
        cert = %paths.cert.display(),
        "Client TLS context ready"
    );
    Ok(Arc::new(config))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tls::certs::{generate_dev_bundle, write_dev_certs};

    #[test]
    fn contexts_build_from_generated_material() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = generate_dev_bundle(&["localhost", "127.0.0.1"]).unwrap();
        let files = write_dev_certs(dir.path(), &bundle).unwrap();

        assert!(server_config(&files.server).is_ok());
        assert!(client_config(&files.client).is_ok());
    }

    #[test]
    fn missing_ca_is_reported() {
        let paths = TlsPaths {
            ca: PathBuf::from("/nonexistent/ca.pem"),
            ..TlsPaths::default()
        };
        let err = server_config(&paths).unwrap_err();
        assert!(matches!(err, TlsConfigError::Pem { what: "CA certificate", .. }));
    }

    #[test]
    fn empty_certificate_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = generate_dev_bundle(&["localhost"]).unwrap();
        let files = write_dev_certs(dir.path(), &bundle).unwrap();
        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "").unwrap();

        let paths = TlsPaths {
            cert: empty,
            ..files.client
        };
        assert!(matches!(
            client_config(&paths).unwrap_err(),
            TlsConfigError::NoCertificates(_)
        ));
    }

    #[test]
    fn tls_paths_deserialize_partially() {
        let paths: TlsPaths = toml::from_str(r#"ca = "/srv/ca.pem""#).unwrap();
        assert_eq!(paths.ca, PathBuf::from("/srv/ca.pem"));
        assert_eq!(paths.key, TlsPaths::default().key);
    }
}
