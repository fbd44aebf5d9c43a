//! Network transport on hyper_util's legacy client.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Builder, Client, connect::HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use tower::Service;

use super::body::TransportBody;
use super::connector::{build_http_connector, build_https_connector, default_tls_config};

type ResponseFuture = Pin<
    Box<dyn Future<Output = Result<http::Response<Incoming>, hyper_util::client::legacy::Error>> + Send>,
>;

/// The pooled client, over whichever connector could be built.
#[derive(Clone, Debug)]
enum Pool {
    Plain(Client<HttpConnector, TransportBody>),
    Tls(Client<HttpsConnector<HttpConnector>, TransportBody>),
}

/// Pooled HTTP/1.1 and HTTP/2 transport, TLS when a crypto provider exists.
///
/// Bidi calls over cleartext need `http2_only(true)` (h2c prior knowledge).
///
/// ```ignore
/// let transport = HyperTransport::builder().http2_only(true).build();
/// let client = ConnectClient::builder("http://localhost:3000")
///     .transport(transport)
///     .build()?;
/// ```
#[derive(Clone, Debug)]
pub struct HyperTransport {
    pool: Pool,
    http2_only: bool,
}

impl HyperTransport {
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::default()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn is_http2_only(&self) -> bool {
        self.http2_only
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection settings for [`HyperTransport`].
#[derive(Clone, Debug)]
pub struct HyperTransportBuilder {
    tls_config: Option<ClientConfig>,
    http2_only: bool,
    idle_timeout: Duration,
    max_idle_per_host: usize,
    /// Ping interval and ack timeout for HTTP/2 keep-alive.
    keep_alive: Option<(Duration, Duration)>,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self {
            tls_config: None,
            http2_only: false,
            idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 32,
            keep_alive: None,
        }
    }
}

impl HyperTransportBuilder {
    /// Use this TLS configuration instead of the platform roots.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    pub fn http2_only(mut self, enabled: bool) -> Self {
        self.http2_only = enabled;
        self
    }

    /// How long an unused pooled connection is kept. Default 90s.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Default 32.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    pub fn h2_keep_alive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.keep_alive = Some((interval, timeout));
        self
    }

    fn client_builder(&self) -> Builder {
        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(self.idle_timeout)
            .pool_max_idle_per_host(self.max_idle_per_host)
            .http2_only(self.http2_only);
        if let Some((interval, timeout)) = self.keep_alive {
            builder
                .timer(TokioTimer::new())
                .http2_keep_alive_interval(interval)
                .http2_keep_alive_timeout(timeout);
        }
        builder
    }

    /// Falls back to plain HTTP when no TLS configuration can be made.
    pub fn build(self) -> HyperTransport {
        let builder = self.client_builder();
        let tls_config = self.tls_config.map(Ok).unwrap_or_else(default_tls_config);
        let pool = match tls_config {
            Ok(config) => Pool::Tls(builder.build(build_https_connector(config))),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_err, "TLS unavailable, using plain HTTP");
                Pool::Plain(builder.build(build_http_connector()))
            }
        };
        HyperTransport {
            pool,
            http2_only: self.http2_only,
        }
    }
}

impl Service<http::Request<TransportBody>> for HyperTransport {
    type Response = http::Response<Incoming>;
    type Error = hyper_util::client::legacy::Error;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<TransportBody>) -> Self::Future {
        match &self.pool {
            Pool::Plain(client) => Box::pin(client.request(request)),
            Pool::Tls(client) => Box::pin(client.request(request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_settings() {
        let builder = HyperTransport::builder();
        assert!(!builder.http2_only);
        assert_eq!(builder.max_idle_per_host, 32);

        let builder = builder
            .http2_only(true)
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .h2_keep_alive(Duration::from_secs(10), Duration::from_secs(2));
        assert_eq!(builder.idle_timeout, Duration::from_secs(60));
        assert_eq!(builder.max_idle_per_host, 10);
        assert_eq!(
            builder.keep_alive,
            Some((Duration::from_secs(10), Duration::from_secs(2)))
        );
    }

    #[tokio::test]
    async fn test_build_transport() {
        let transport = HyperTransport::builder().http2_only(true).build();
        assert!(transport.is_http2_only());
    }
}
