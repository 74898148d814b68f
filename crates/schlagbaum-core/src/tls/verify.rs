//! Depth-1 certificate verifiers.
//!
//! WebPKI happily builds chains through intermediates. These wrappers
//! refuse any chain that needs one, then delegate to WebPKI against the
//! configured CA.

use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tracing::warn;

/// Reject peers whose chain carries anything but copies of our anchors.
fn check_depth(
    intermediates: &[CertificateDer<'_>],
    anchors: &[CertificateDer<'static>],
) -> Result<(), rustls::Error> {
    let foreign = intermediates
        .iter()
        .filter(|cert| !anchors.iter().any(|a| a.as_ref() == cert.as_ref()))
        .count();
    if foreign > 0 {
        warn!(intermediates = foreign, "Peer chain exceeds verification depth 1");
        return Err(rustls::Error::InvalidCertificate(
            CertificateError::UnknownIssuer,
        ));
    }
    Ok(())
}

/// Server side: mandatory client certificate signed directly by the CA.
#[derive(Debug)]
pub struct DirectClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    anchors: Vec<CertificateDer<'static>>,
}

impl DirectClientVerifier {
    pub fn new(inner: Arc<dyn ClientCertVerifier>, anchors: Vec<CertificateDer<'static>>) -> Self {
        Self { inner, anchors }
    }
}

impl ClientCertVerifier for DirectClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        check_depth(intermediates, &self.anchors)?;
        self.inner.verify_client_cert(end_entity, &[], now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Client side: server certificate signed directly by the CA.
#[derive(Debug)]
pub struct DirectServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
    anchors: Vec<CertificateDer<'static>>,
}

impl DirectServerVerifier {
    pub fn new(inner: Arc<WebPkiServerVerifier>, anchors: Vec<CertificateDer<'static>>) -> Self {
        Self { inner, anchors }
    }
}

impl ServerCertVerifier for DirectServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        check_depth(intermediates, &self.anchors)?;
        self.inner
            .verify_server_cert(end_entity, &[], server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn anchor_copies_are_tolerated() {
        let anchor = CertificateDer::from(vec![1u8, 2, 3]);
        assert!(check_depth(&[], std::slice::from_ref(&anchor)).is_ok());
        assert!(check_depth(std::slice::from_ref(&anchor), std::slice::from_ref(&anchor)).is_ok());
    }

    #[test]
    fn foreign_intermediate_is_rejected() {
        let anchor = CertificateDer::from(vec![1u8, 2, 3]);
        let other = CertificateDer::from(vec![4u8, 5, 6]);
        let err = check_depth(&[other], &[anchor]).unwrap_err();
        assert_eq!(
            err,
            rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer)
        );
    }
}
