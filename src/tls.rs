//! TLS context construction for both ends of a call.
//!
//! The server loads a PEM certificate chain and private key. The client
//! either trusts a single PEM certificate (a CA, or the server's own
//! self-signed certificate) or, when explicitly asked to, any certificate
//! at all.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{ClientError, ServerError};

/// Certificate and key files for a TLS listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Default for TlsFiles {
    fn default() -> Self {
        Self {
            cert: PathBuf::from("server.crt"),
            key: PathBuf::from("server.key"),
        }
    }
}

/// How the client decides whether to trust the server's certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trust {
    /// Trust chains that end in the certificate(s) in this PEM file.
    CaFile(PathBuf),
    /// Accept any certificate. Handshake signatures are still checked.
    Insecure,
}

impl Default for Trust {
    fn default() -> Self {
        Self::CaFile(PathBuf::from("server.crt"))
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

fn read_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "no PEM certificates found",
        ));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no PEM private key found"))
}

/// Build the server-side TLS acceptor from `files`.
pub fn server_acceptor(files: &TlsFiles) -> Result<TlsAcceptor, ServerError> {
    let certs = read_certs(&files.cert).map_err(|e| {
        ServerError::configuration(
            format!("certificate {}: {}", files.cert.display(), e),
            Some(files.cert.clone()),
        )
    })?;
    let key = read_private_key(&files.key).map_err(|e| {
        ServerError::configuration(
            format!("private key {}: {}", files.key.display(), e),
            Some(files.key.clone()),
        )
    })?;

    let config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::configuration(e.to_string(), None))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| {
            ServerError::configuration(
                format!("certificate/key mismatch: {}", e),
                Some(files.key.clone()),
            )
        })?;

    tracing::debug!(
        "Loaded TLS certificate {} and key {}",
        files.cert.display(),
        files.key.display()
    );
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the client-side TLS connector for the given trust policy.
pub fn client_connector(trust: &Trust) -> Result<TlsConnector, ClientError> {
    let builder = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

    let config = match trust {
        Trust::CaFile(path) => {
            let certs = read_certs(path).map_err(|e| {
                ClientError::Configuration(format!("trust anchor {}: {}", path.display(), e))
            })?;
            let mut roots = RootCertStore::empty();
            for cert in certs {
                roots.add(cert).map_err(|e| {
                    ClientError::Configuration(format!("trust anchor {}: {}", path.display(), e))
                })?;
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        Trust::Insecure => {
            tracing::warn!("Server certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider())))
                .with_no_client_auth()
        }
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Verifier that accepts any server certificate, for self-signed setups
/// where the client has no copy of the certificate.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
