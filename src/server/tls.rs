//! HTTPS termination

use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{crypto::aws_lc_rs, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::types::CaError;

/// Build an acceptor from a PEM certificate chain and private key
pub fn acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, CaError> {
    let certs = CertificateDer::pem_file_iter(cert_path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| {
            CaError::Config(format!("cannot read TLS certificate {}: {}", cert_path.display(), e))
        })?;
    if certs.is_empty() {
        return Err(CaError::Config(format!(
            "no certificates in {}",
            cert_path.display()
        )));
    }

    let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| {
        CaError::Config(format!("cannot read TLS key {}: {}", key_path.display(), e))
    })?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| CaError::Config(format!("TLS protocol setup failed: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| CaError::Config(format!("TLS certificate rejected: {}", e)))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    info!("TLS enabled with certificate {}", cert_path.display());
    Ok(TlsAcceptor::from(Arc::new(config)))
}
