//! Client builder.
//!
//! Provides a fluent API for configuring and building a [`ConnectClient`].

use std::sync::Arc;
use std::time::Duration;

use connectrpc_wire_core::{
    BoxedCodec, BoxedCompressor, Codec, CodecRegistry, CompressionConfig, CompressionRegistry,
    Compressor, ConnectError, Interceptor, InterceptorChain, Protocol, codec,
};
use http::{HeaderMap, HeaderName, HeaderValue, Uri};

use crate::client::ConnectClient;
use crate::error::ClientError;
use crate::transport::Transport;

/// Settings shared by every call a client makes.
#[derive(Debug)]
pub(crate) struct ClientConfig {
    /// Scheme and authority, without a trailing slash.
    pub(crate) base_url: String,
    pub(crate) authority: String,
    pub(crate) protocol: Protocol,
    pub(crate) codec: BoxedCodec,
    /// Encodings advertised as acceptable for responses.
    pub(crate) compressions: CompressionRegistry,
    pub(crate) send_compression: Option<BoxedCompressor>,
    pub(crate) compression: CompressionConfig,
    pub(crate) read_max_bytes: Option<usize>,
    pub(crate) send_max_bytes: Option<usize>,
    pub(crate) http_get: bool,
    pub(crate) interceptors: InterceptorChain,
    pub(crate) header: HeaderMap,
    pub(crate) transport: Transport,
    pub(crate) timeout: Option<Duration>,
    /// Fails every call; set when the send compression is not registered.
    pub(crate) setup_error: Option<ConnectError>,
}

/// Builder for creating a [`ConnectClient`].
///
/// # Example
///
/// ```ignore
/// use connectrpc_wire_client::ClientBuilder;
///
/// let client = ClientBuilder::new("http://localhost:3000")
///     .grpc()
///     .send_compression("gzip")
///     .build()?;
/// ```
pub struct ClientBuilder {
    base_url: String,
    protocol: Protocol,
    codecs: CodecRegistry,
    codec: String,
    compressions: CompressionRegistry,
    send_compression: Option<String>,
    compression: CompressionConfig,
    read_max_bytes: Option<usize>,
    send_max_bytes: Option<usize>,
    http_get: bool,
    interceptors: InterceptorChain,
    header: HeaderMap,
    transport: Option<Transport>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url)
            .field("protocol", &self.protocol)
            .field("codec", &self.codec)
            .field("send_compression", &self.send_compression)
            .field("compression", &self.compression)
            .field("read_max_bytes", &self.read_max_bytes)
            .field("send_max_bytes", &self.send_max_bytes)
            .field("http_get", &self.http_get)
            .field("interceptors", &self.interceptors.len())
            .field("transport", &self.transport.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientBuilder {
    /// Create a builder for the service at `base_url`, e.g. `http://localhost:3000`.
    ///
    /// A trailing slash is ignored.
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            protocol: Protocol::Connect,
            codecs: CodecRegistry::default(),
            codec: codec::CODEC_NAME_PROTO.to_owned(),
            compressions: CompressionRegistry::with_defaults(),
            send_compression: None,
            compression: CompressionConfig::default(),
            read_max_bytes: None,
            send_max_bytes: None,
            http_get: false,
            interceptors: InterceptorChain::new(),
            header: HeaderMap::new(),
            transport: None,
            timeout: None,
        }
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Speak gRPC (HTTP trailers, requires HTTP/2 end to end).
    pub fn grpc(self) -> Self {
        self.protocol(Protocol::Grpc)
    }

    pub fn grpc_web(self) -> Self {
        self.protocol(Protocol::GrpcWeb)
    }

    /// Select a registered codec by name. The default is `proto`.
    pub fn codec(mut self, name: impl Into<String>) -> Self {
        self.codec = name.into();
        self
    }

    pub fn json(self) -> Self {
        self.codec(codec::CODEC_NAME_JSON)
    }

    pub fn proto(self) -> Self {
        self.codec(codec::CODEC_NAME_PROTO)
    }

    /// Register a custom codec and use it.
    pub fn register_codec<C: Codec>(mut self, codec: C) -> Self {
        self.codec = codec.name().to_owned();
        self.codecs.register(codec);
        self
    }

    /// Compress requests with a registered compressor.
    ///
    /// Naming an unregistered compressor makes every call fail with
    /// `unknown`.
    pub fn send_compression(mut self, name: impl Into<String>) -> Self {
        self.send_compression = Some(name.into());
        self
    }

    /// Register a compressor; every registered name is advertised as
    /// acceptable for responses.
    pub fn accept_compression<C: Compressor>(mut self, compressor: C) -> Self {
        self.compressions.register(compressor);
        self
    }

    pub fn remove_compression(mut self, name: &str) -> Self {
        self.compressions.remove(name);
        self
    }

    /// Requests smaller than `min_bytes` are sent uncompressed.
    pub fn compress_min_bytes(mut self, min_bytes: usize) -> Self {
        self.compression = CompressionConfig::new(min_bytes);
        self
    }

    pub fn read_max_bytes(mut self, max: usize) -> Self {
        self.read_max_bytes = Some(max);
        self
    }

    pub fn send_max_bytes(mut self, max: usize) -> Self {
        self.send_max_bytes = Some(max);
        self
    }

    /// Issue Connect unary calls as `GET` requests with the message in the query.
    pub fn http_get(mut self, enabled: bool) -> Self {
        self.http_get = enabled;
        self
    }

    pub fn interceptor<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// A header sent with every call.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.header.append(name, value);
        self
    }

    /// Use a specific transport instead of the default hyper client.
    pub fn transport(mut self, transport: impl Into<Transport>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    /// Default timeout for every call, propagated in the protocol's timeout header.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Fails on a base URL without scheme and authority, or an unknown codec.
    pub fn build(self) -> Result<ConnectClient, ClientError> {
        let base_url = self.base_url.trim_end_matches('/').to_owned();
        let uri: Uri = base_url.parse().map_err(|err: http::uri::InvalidUri| {
            ClientError::InvalidUrl {
                url: self.base_url.clone(),
                reason: err.to_string(),
            }
        })?;
        if uri.scheme().is_none() {
            return Err(ClientError::InvalidUrl {
                url: self.base_url,
                reason: "missing scheme".to_owned(),
            });
        }
        let Some(authority) = uri.authority().map(|a| a.to_string()) else {
            return Err(ClientError::InvalidUrl {
                url: self.base_url,
                reason: "missing host".to_owned(),
            });
        };

        let codec = self
            .codecs
            .get(&self.codec)
            .cloned()
            .ok_or_else(|| ClientError::UnknownCodec(self.codec.clone()))?;

        let (send_compression, setup_error) = match &self.send_compression {
            None => (None, None),
            Some(name) => match self.compressions.get(name) {
                Some(compressor) => (Some(compressor.clone()), None),
                None => (
                    None,
                    Some(ClientError::UnknownCompression(name.clone()).into()),
                ),
            },
        };

        let transport = self.transport.unwrap_or_else(Transport::http);

        Ok(ConnectClient::new(Arc::new(ClientConfig {
            base_url,
            authority,
            protocol: self.protocol,
            codec,
            compressions: self.compressions,
            send_compression,
            compression: self.compression,
            read_max_bytes: self.read_max_bytes,
            send_max_bytes: self.send_max_bytes,
            http_get: self.http_get,
            interceptors: self.interceptors,
            header: self.header,
            transport,
            timeout: self.timeout,
            setup_error,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectrpc_wire_core::Code;

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::new("http://localhost:3000");
        assert_eq!(builder.protocol, Protocol::Connect);
        assert_eq!(builder.codec, "proto");
        assert!(builder.send_compression.is_none());
        assert!(!builder.http_get);
    }

    #[test]
    fn test_builder_normalizes_url() {
        let client = ClientBuilder::new("http://localhost:3000/").build().unwrap();
        assert_eq!(client.base_url(), "http://localhost:3000");
    }

    #[test]
    fn test_builder_rejects_relative_url() {
        let err = ClientBuilder::new("/just/a/path").build().unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }

    #[test]
    fn test_builder_unknown_codec() {
        let err = ClientBuilder::new("http://localhost:3000")
            .codec("msgpack")
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::UnknownCodec(name) if name == "msgpack"));
    }

    #[test]
    fn test_builder_json_grpc_web() {
        let client = ClientBuilder::new("http://localhost:3000")
            .json()
            .grpc_web()
            .build()
            .unwrap();
        assert_eq!(client.protocol(), Protocol::GrpcWeb);
    }

    #[test]
    fn test_unregistered_send_compression_fails_calls() {
        let client = ClientBuilder::new("http://localhost:3000")
            .send_compression("gzip")
            .remove_compression("gzip")
            .build()
            .unwrap();
        let err = client.config().setup_error.clone().unwrap();
        assert_eq!(err.code(), Code::Unknown);
        assert_eq!(err.message(), Some("unknown compression \"gzip\""));
    }

    #[test]
    fn test_builder_timeout() {
        let builder = ClientBuilder::new("http://localhost:3000").timeout(Duration::from_secs(30));
        assert_eq!(builder.timeout, Some(Duration::from_secs(30)));
    }
}
