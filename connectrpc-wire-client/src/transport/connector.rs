//! TLS connector setup for the hyper client.

use std::sync::Arc;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::ClientConfig;

use crate::ClientError;

/// The TLS configuration used when none is supplied.
///
/// Needs a crypto provider: the `tls-ring` feature, or a process-wide default
/// installed with `CryptoProvider::install_default`.
pub fn default_tls_config() -> Result<ClientConfig, ClientError> {
    let provider = crypto_provider()?;
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::Tls(e.to_string()))?;
    Ok(builder
        .with_root_certificates(root_store())
        .with_no_client_auth())
}

#[cfg(feature = "tls-ring")]
fn crypto_provider() -> Result<Arc<rustls::crypto::CryptoProvider>, ClientError> {
    Ok(Arc::new(rustls::crypto::ring::default_provider()))
}

#[cfg(not(feature = "tls-ring"))]
fn crypto_provider() -> Result<Arc<rustls::crypto::CryptoProvider>, ClientError> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .ok_or_else(|| {
            ClientError::Tls(
                "no crypto provider: enable `tls-ring` or install a default provider".to_owned(),
            )
        })
}

fn root_store() -> rustls::RootCertStore {
    #[allow(unused_mut)]
    let mut roots = rustls::RootCertStore::empty();

    #[cfg(feature = "tls-native-roots")]
    {
        let native = rustls_native_certs::load_native_certs();
        // Some certs may still have loaded.
        #[cfg(feature = "tracing")]
        if !native.errors.is_empty() {
            tracing::debug!(errors = ?native.errors, "errors loading native certs");
        }
        roots.add_parsable_certificates(native.certs);
    }

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    roots
}

/// An HTTPS connector that also accepts `http://` URLs.
pub fn build_https_connector(config: ClientConfig) -> HttpsConnector<HttpConnector> {
    HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http()
        .enable_all_versions()
        .build()
}

/// A plain HTTP connector.
pub fn build_http_connector() -> HttpConnector {
    let mut connector = HttpConnector::new();
    connector.enforce_http(false);
    connector
}
