//! Development certificate generation using rcgen.
//!
//! Builds a throwaway CA with one server and one client certificate for
//! tests and local experiments. NOT suitable for production use.

use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose,
};

use super::TlsPaths;

/// CA material able to sign further certificates.
pub struct CaBundle {
    pub params: CertificateParams,
    pub key_pair: KeyPair,
    pub cert_pem: String,
}

/// PEM-encoded certificate and private key.
#[derive(Debug, Clone)]
pub struct LeafPem {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generated CA, server and client material (PEM-encoded).
#[derive(Debug, Clone)]
pub struct CertBundle {
    pub ca_cert_pem: String,
    pub server: LeafPem,
    pub client: LeafPem,
}

/// Paths of a bundle written to disk, grouped per role.
#[derive(Debug, Clone)]
pub struct DevCertFiles {
    pub dir: PathBuf,
    pub server: TlsPaths,
    pub client: TlsPaths,
}

/// Certificate generation errors.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("Certificate generation error: {0}")]
    Generation(#[from] rcgen::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn ca_params(name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, name);
    params.key_usages.push(KeyUsagePurpose::KeyCertSign);
    params.key_usages.push(KeyUsagePurpose::CrlSign);
    params
}

/// Self-signed root CA.
pub fn generate_ca(name: &str) -> Result<CaBundle, CertError> {
    let params = ca_params(name);
    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    Ok(CaBundle {
        cert_pem: cert.pem(),
        params,
        key_pair,
    })
}

/// Intermediate CA signed by `parent`.
pub fn generate_intermediate(parent: &CaBundle, name: &str) -> Result<CaBundle, CertError> {
    let issuer = Issuer::from_params(&parent.params, &parent.key_pair);
    let params = ca_params(name);
    let key_pair = KeyPair::generate()?;
    let cert = params.signed_by(&key_pair, &issuer)?;
    Ok(CaBundle {
        cert_pem: cert.pem(),
        params,
        key_pair,
    })
}

/// Leaf certificate for `names` signed by `ca`.
///
/// Names that parse as IP addresses become IP subject alternative names.
pub fn generate_leaf(
    ca: &CaBundle,
    common_name: &str,
    names: &[&str],
    purpose: ExtendedKeyUsagePurpose,
) -> Result<LeafPem, CertError> {
    let issuer = Issuer::from_params(&ca.params, &ca.key_pair);
    let mut params =
        CertificateParams::new(names.iter().map(ToString::to_string).collect::<Vec<_>>())?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.extended_key_usages.push(purpose);

    let key = KeyPair::generate()?;
    let cert = params.signed_by(&key, &issuer)?;
    Ok(LeafPem {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// Generate a full dev bundle: CA, server for `server_names`, one client.
pub fn generate_dev_bundle(server_names: &[&str]) -> Result<CertBundle, CertError> {
    let ca = generate_ca("Schlagbaum Dev CA")?;
    let server = generate_leaf(
        &ca,
        "Schlagbaum Server",
        server_names,
        ExtendedKeyUsagePurpose::ServerAuth,
    )?;
    let client = generate_leaf(
        &ca,
        "Schlagbaum Client",
        &[],
        ExtendedKeyUsagePurpose::ClientAuth,
    )?;
    Ok(CertBundle {
        ca_cert_pem: ca.cert_pem,
        server,
        client,
    })
}

/// Write a bundle as `ca.pem`, `server{,-key}.pem` and `client{,-key}.pem`.
pub fn write_dev_certs(dir: &Path, bundle: &CertBundle) -> Result<DevCertFiles, CertError> {
    std::fs::create_dir_all(dir)?;

    let ca = dir.join("ca.pem");
    std::fs::write(&ca, &bundle.ca_cert_pem)?;

    let write_leaf = |role: &str, leaf: &LeafPem| -> Result<TlsPaths, CertError> {
        let cert = dir.join(format!("{role}.pem"));
        let key = dir.join(format!("{role}-key.pem"));
        std::fs::write(&cert, &leaf.cert_pem)?;
        std::fs::write(&key, &leaf.key_pem)?;
        Ok(TlsPaths {
            ca: ca.clone(),
            cert,
            key,
        })
    };
    let server = write_leaf("server", &bundle.server)?;
    let client = write_leaf("client", &bundle.client)?;

    Ok(DevCertFiles {
        dir: dir.to_path_buf(),
        server,
        client,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dev_bundle_has_distinct_pems() {
        let bundle = generate_dev_bundle(&["localhost"]).unwrap();
        assert!(bundle.ca_cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(bundle.server.key_pem.contains("BEGIN PRIVATE KEY"));
        assert_ne!(bundle.server.cert_pem, bundle.client.cert_pem);
        assert_ne!(bundle.ca_cert_pem, bundle.server.cert_pem);
    }

    #[test]
    fn write_dev_certs_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = generate_dev_bundle(&["localhost"]).unwrap();
        let files = write_dev_certs(dir.path(), &bundle).unwrap();

        for path in [
            &files.server.ca,
            &files.server.cert,
            &files.server.key,
            &files.client.cert,
            &files.client.key,
        ] {
            assert!(path.exists(), "{} missing", path.display());
        }
        assert_eq!(files.server.ca, files.client.ca);
    }
}
