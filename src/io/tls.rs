//! TLS configuration helpers
//!
//! The provider terminates TLS with a certificate and key loaded from PEM
//! files; the service user verifies against the system roots or, for lab
//! setups, not at all.

use crate::error::{DulError, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

/// Load a PEM certificate chain
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| DulError::Tls(format!("cannot open certificate file {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DulError::Tls(format!("cannot parse certificates in {}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(DulError::Tls(format!("no certificate found in {}", path)));
    }
    Ok(certs)
}

/// Load the first PEM private key (PKCS#8, PKCS#1 or SEC1)
pub fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| DulError::Tls(format!("cannot open key file {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| DulError::Tls(format!("cannot parse private key in {}: {}", path, e)))?
        .ok_or_else(|| DulError::Tls(format!("no private key found in {}", path)))
}

/// Server configuration without client authentication
pub fn server_config(cert_path: &str, key_path: &str) -> Result<rustls::ServerConfig> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| DulError::Tls(format!("invalid certificate or key: {}", e)))
}

pub fn acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor> {
    info!(cert = cert_path, key = key_path, "Loading TLS identity");
    Ok(TlsAcceptor::from(Arc::new(server_config(cert_path, key_path)?)))
}

/// Client configuration trusting the platform's root certificates
pub fn native_client_config() -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        warn!(
            error_count = native.errors.len(),
            "Some native certificates failed to load"
        );
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if added == 0 {
        return Err(DulError::Tls("no usable root certificates".into()));
    }
    if ignored > 0 {
        warn!(ignored = ignored, "Ignored unparsable root certificates");
    }
    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Client configuration that accepts any server certificate
///
/// Only for lab setups talking to peers with self-signed certificates.
pub fn insecure_client_config() -> rustls::ClientConfig {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    #[derive(Debug)]
    struct AcceptAnyCertificate;

    impl ServerCertVerifier for AcceptAnyCertificate {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ED25519,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
            ]
        }
    }

    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_are_tls_errors() {
        let err = load_certs("/nonexistent/cert.pem").unwrap_err();
        assert!(matches!(err, DulError::Tls(_)));
        let err = load_key("/nonexistent/key.pem").unwrap_err();
        assert!(matches!(err, DulError::Tls(_)));
    }

    #[test]
    fn test_empty_pem_has_no_certificate() {
        let path = std::env::temp_dir().join(format!("dicompot-empty-{}.pem", std::process::id()));
        std::fs::write(&path, b"not a pem file\n").unwrap();
        let path_str = path.to_string_lossy().to_string();

        assert!(matches!(load_certs(&path_str), Err(DulError::Tls(_))));
        assert!(matches!(load_key(&path_str), Err(DulError::Tls(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_insecure_config_creation() {
        let config = insecure_client_config();
        assert!(config.alpn_protocols.is_empty());
    }
}
