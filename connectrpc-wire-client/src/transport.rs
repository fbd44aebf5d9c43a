//! HTTP transport for calls.
//!
//! A [`Transport`] is any tower service from `http::Request<TransportBody>` to
//! an HTTP response. [`HyperTransport`] talks to the network; an axum `Router`
//! (or any other in-process service) can be used directly with
//! [`Transport::from_service`].
//!
//! # Feature Flags
//!
//! - `tls` (default) - `tls-ring` + `tls-native-roots`
//! - `tls-ring` - ring crypto provider
//! - `tls-native-roots` / `tls-webpki-roots` - root certificates
//!
//! Without a crypto provider [`HyperTransport`] only speaks plain HTTP.

mod body;
mod connector;
mod hyper;

use bytes::Bytes;
use connectrpc_wire_core::{BoxError, ConnectError, WireBody};
use http_body_util::BodyExt;
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};

pub use body::TransportBody;
pub use connector::{build_http_connector, build_https_connector, default_tls_config};
pub use hyper::{HyperTransport, HyperTransportBuilder};

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;

type BoxedService =
    BoxCloneSyncService<http::Request<TransportBody>, http::Response<WireBody>, ConnectError>;

/// Sends one HTTP request and yields the response head and streaming body.
#[derive(Clone)]
pub struct Transport {
    inner: BoxedService,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    /// Wrap any HTTP service.
    ///
    /// Service errors surface as `unavailable`.
    pub fn from_service<S, B>(service: S) -> Self
    where
        S: Service<http::Request<TransportBody>, Response = http::Response<B>>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let service = service
            .map_response(|response: http::Response<B>| {
                response.map(|body| body.map_err(|err| -> BoxError { err.into() }).boxed_unsync())
            })
            .map_err(|err: S::Error| {
                let err: BoxError = err.into();
                ConnectError::unavailable(format!("request failed: {err}"))
            });
        Self {
            inner: BoxCloneSyncService::new(service),
        }
    }

    /// A network transport with default settings.
    pub fn http() -> Self {
        Self::from_service(HyperTransport::new())
    }

    pub async fn call(
        &self,
        request: http::Request<TransportBody>,
    ) -> Result<http::Response<WireBody>, ConnectError> {
        self.inner.clone().oneshot(request).await
    }
}

impl From<HyperTransport> for Transport {
    fn from(transport: HyperTransport) -> Self {
        Self::from_service(transport)
    }
}
