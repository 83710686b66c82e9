//! TLS connector selection for the WebSocket handshake.
//!
//! Local devices serve self-signed certificates, so connections to
//! localhost (or any host when `allow_insecure_tls` is set) skip
//! certificate verification. Everything else uses the default roots.

#[cfg(any(feature = "native-tls", feature = "rustls-tls"))]
use tokio_tungstenite::Connector;

#[cfg(any(feature = "native-tls", feature = "rustls-tls"))]
use crate::error::NotionResult;

/// Connector for the handshake, or `None` for tokio-tungstenite's default.
#[cfg(any(feature = "native-tls", feature = "rustls-tls"))]
pub(crate) fn connector(accept_invalid_certs: bool) -> NotionResult<Option<Connector>> {
    if accept_invalid_certs {
        insecure_connector().map(Some)
    } else {
        Ok(None)
    }
}

#[cfg(feature = "native-tls")]
fn insecure_connector() -> NotionResult<Connector> {
    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .build()?;
    Ok(Connector::NativeTls(tls))
}

#[cfg(all(feature = "rustls-tls", not(feature = "native-tls")))]
fn insecure_connector() -> NotionResult<Connector> {
    use std::sync::Arc;

    use crate::error::NotionError;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| NotionError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::AcceptAnyCert(provider)))
        .with_no_client_auth();
    Ok(Connector::Rustls(Arc::new(config)))
}

#[cfg(all(feature = "rustls-tls", not(feature = "native-tls")))]
mod danger {
    use std::sync::Arc;

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
    use rustls::{DigitallySignedStruct, SignatureScheme};
    use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

    /// Accepts any server certificate but still checks handshake signatures.
    #[derive(Debug)]
    pub(super) struct AcceptAnyCert(pub(super) Arc<CryptoProvider>);

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}
