//! Protocol identification shared by handler and client.
//!
//! [`Protocol`] names the three wire protocols, [`parse_content_type`] maps a
//! request's `Content-Type` onto one of them, and [`TrailerDelivery`] captures
//! the one real difference the stream wrappers care about: where the final
//! status and trailers go.

pub mod connect;
pub mod grpc;

use std::fmt;

use crate::codec::CODEC_NAME_PROTO;

/// Header names recognized on the wire.
pub mod headers {
    use http::HeaderName;

    pub const CONTENT_TYPE: HeaderName = http::header::CONTENT_TYPE;
    pub const CONTENT_ENCODING: HeaderName = http::header::CONTENT_ENCODING;
    pub const ACCEPT_ENCODING: HeaderName = http::header::ACCEPT_ENCODING;
    pub const USER_AGENT: HeaderName = http::header::USER_AGENT;
    pub const TE: HeaderName = http::header::TE;

    pub const CONNECT_PROTOCOL_VERSION: HeaderName =
        HeaderName::from_static("connect-protocol-version");
    pub const CONNECT_TIMEOUT_MS: HeaderName = HeaderName::from_static("connect-timeout-ms");
    pub const CONNECT_CONTENT_ENCODING: HeaderName =
        HeaderName::from_static("connect-content-encoding");
    pub const CONNECT_ACCEPT_ENCODING: HeaderName =
        HeaderName::from_static("connect-accept-encoding");

    pub const GRPC_ENCODING: HeaderName = HeaderName::from_static("grpc-encoding");
    pub const GRPC_ACCEPT_ENCODING: HeaderName = HeaderName::from_static("grpc-accept-encoding");
    pub const GRPC_TIMEOUT: HeaderName = HeaderName::from_static("grpc-timeout");
    pub const GRPC_STATUS: HeaderName = HeaderName::from_static("grpc-status");
    pub const GRPC_MESSAGE: HeaderName = HeaderName::from_static("grpc-message");
    pub const GRPC_STATUS_DETAILS_BIN: HeaderName =
        HeaderName::from_static("grpc-status-details-bin");

    /// Prefix for Connect unary trailers sent as headers.
    pub const TRAILER_PREFIX: &str = "trailer-";
}

/// The wire protocol of one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Connect,
    Grpc,
    GrpcWeb,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Connect => "connect",
            Protocol::Grpc => "grpc",
            Protocol::GrpcWeb => "grpcweb",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four RPC shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    Unary,
    Client,
    Server,
    Bidi,
}

impl StreamType {
    /// The client sends more than one message.
    pub fn is_client_stream(&self) -> bool {
        matches!(self, StreamType::Client | StreamType::Bidi)
    }

    /// The server sends more than one message.
    pub fn is_server_stream(&self) -> bool {
        matches!(self, StreamType::Server | StreamType::Bidi)
    }
}

/// Static description of a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spec {
    /// `/package.Service/Method`
    pub procedure: String,
    pub stream_type: StreamType,
    pub is_client: bool,
}

impl Spec {
    pub fn new(procedure: impl Into<String>, stream_type: StreamType, is_client: bool) -> Self {
        Self {
            procedure: procedure.into(),
            stream_type,
            is_client,
        }
    }
}

/// The other end of a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub addr: String,
    pub protocol: Protocol,
}

/// Where the final status and trailers are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrailerDelivery {
    /// Connect unary: `Trailer-` prefixed headers, errors as a JSON body.
    UnaryHeaders,
    /// Connect streaming: a final `0x02` envelope with a JSON payload.
    EndStreamMessage,
    /// gRPC: HTTP trailers.
    HttpTrailers,
    /// gRPC-Web: a final `0x80` envelope holding an HTTP/1 header block.
    TrailerFrame,
}

impl TrailerDelivery {
    pub fn for_call(protocol: Protocol, stream_type: StreamType) -> Self {
        match (protocol, stream_type) {
            (Protocol::Connect, StreamType::Unary) => TrailerDelivery::UnaryHeaders,
            (Protocol::Connect, _) => TrailerDelivery::EndStreamMessage,
            (Protocol::Grpc, _) => TrailerDelivery::HttpTrailers,
            (Protocol::GrpcWeb, _) => TrailerDelivery::TrailerFrame,
        }
    }

    /// Messages are enveloped (everything except Connect unary).
    pub fn is_enveloped(&self) -> bool {
        !matches!(self, TrailerDelivery::UnaryHeaders)
    }

    /// Header carrying the message encoding.
    pub fn encoding_header(&self) -> http::HeaderName {
        match self {
            TrailerDelivery::UnaryHeaders => headers::CONTENT_ENCODING,
            TrailerDelivery::EndStreamMessage => headers::CONNECT_CONTENT_ENCODING,
            TrailerDelivery::HttpTrailers | TrailerDelivery::TrailerFrame => headers::GRPC_ENCODING,
        }
    }

    /// Header listing the encodings accepted in reply.
    pub fn accept_encoding_header(&self) -> http::HeaderName {
        match self {
            TrailerDelivery::UnaryHeaders => headers::ACCEPT_ENCODING,
            TrailerDelivery::EndStreamMessage => headers::CONNECT_ACCEPT_ENCODING,
            TrailerDelivery::HttpTrailers | TrailerDelivery::TrailerFrame => {
                headers::GRPC_ACCEPT_ENCODING
            }
        }
    }

    /// Header carrying the call timeout.
    pub fn timeout_header(&self) -> http::HeaderName {
        match self {
            TrailerDelivery::UnaryHeaders | TrailerDelivery::EndStreamMessage => {
                headers::CONNECT_TIMEOUT_MS
            }
            TrailerDelivery::HttpTrailers | TrailerDelivery::TrailerFrame => headers::GRPC_TIMEOUT,
        }
    }
}

/// A recognized `Content-Type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    pub protocol: Protocol,
    pub codec: String,
    /// `application/connect+<codec>`; always false for gRPC.
    pub connect_streaming: bool,
}

impl ContentType {
    /// Whether this content type fits a call of the given shape.
    pub fn matches(&self, stream_type: StreamType) -> bool {
        match self.protocol {
            Protocol::Connect => self.connect_streaming == (stream_type != StreamType::Unary),
            Protocol::Grpc | Protocol::GrpcWeb => true,
        }
    }
}

/// Why a `Content-Type` was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContentTypeError {
    #[error("unsupported content type {0:?}")]
    Unsupported(String),
    #[error("unsupported charset {0:?}")]
    Charset(String),
}

/// Parse `application/<prefix><codec>[; charset=...]`.
///
/// The codec name is not checked against any registry.
pub fn parse_content_type(value: &str) -> Result<ContentType, ContentTypeError> {
    let mut parts = value.split(';');
    let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    for param in parts {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("charset") {
            let charset = val.trim().trim_matches('"');
            if !charset.eq_ignore_ascii_case("utf-8") {
                return Err(ContentTypeError::Charset(charset.to_owned()));
            }
        }
    }

    let unsupported = || ContentTypeError::Unsupported(value.to_owned());
    let subtype = essence.strip_prefix("application/").ok_or_else(unsupported)?;

    let (protocol, codec, connect_streaming) = if let Some(rest) = subtype.strip_prefix("grpc-web") {
        (Protocol::GrpcWeb, codec_suffix(rest).ok_or_else(unsupported)?, false)
    } else if let Some(rest) = subtype.strip_prefix("grpc") {
        (Protocol::Grpc, codec_suffix(rest).ok_or_else(unsupported)?, false)
    } else if let Some(rest) = subtype.strip_prefix("connect+") {
        (Protocol::Connect, rest, true)
    } else {
        (Protocol::Connect, subtype, false)
    };
    if codec.is_empty() {
        return Err(unsupported());
    }
    Ok(ContentType {
        protocol,
        codec: codec.to_owned(),
        connect_streaming,
    })
}

fn codec_suffix(rest: &str) -> Option<&str> {
    if rest.is_empty() {
        Some(CODEC_NAME_PROTO)
    } else {
        rest.strip_prefix('+')
    }
}

/// The `Content-Type` for a protocol, shape and codec.
pub fn content_type(protocol: Protocol, stream_type: StreamType, codec: &str) -> String {
    match protocol {
        Protocol::Connect if stream_type == StreamType::Unary => format!("application/{codec}"),
        Protocol::Connect => format!("application/connect+{codec}"),
        Protocol::Grpc if codec == CODEC_NAME_PROTO => "application/grpc".to_owned(),
        Protocol::Grpc => format!("application/grpc+{codec}"),
        Protocol::GrpcWeb if codec == CODEC_NAME_PROTO => "application/grpc-web".to_owned(),
        Protocol::GrpcWeb => format!("application/grpc-web+{codec}"),
    }
}

/// The `Content-Type` a handler answers with.
///
/// gRPC and gRPC-Web echo the request's media type, so `application/grpc`
/// and `application/grpc+proto` each come back as sent. Connect always uses
/// the canonical form.
pub fn response_content_type(
    protocol: Protocol,
    stream_type: StreamType,
    codec: &str,
    request: Option<&str>,
) -> String {
    let echoed = request
        .filter(|_| protocol != Protocol::Connect)
        .and_then(|value| value.split(';').next())
        .map(|essence| essence.trim().to_ascii_lowercase())
        .filter(|essence| {
            parse_content_type(essence)
                .is_ok_and(|ct| ct.protocol == protocol && ct.codec == codec)
        });
    echoed.unwrap_or_else(|| content_type(protocol, stream_type, codec))
}

/// Every `Content-Type` accepted for a shape, sorted, for `Accept-Post`.
pub fn accepted_content_types<'a>(
    stream_type: StreamType,
    codecs: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut types = Vec::new();
    for codec in codecs {
        types.push(content_type(Protocol::Connect, stream_type, codec));
        for protocol in [Protocol::Grpc, Protocol::GrpcWeb] {
            types.push(content_type(protocol, stream_type, codec));
            if codec == CODEC_NAME_PROTO {
                types.push(format!("{}+{codec}", content_type(protocol, stream_type, codec)));
            }
        }
    }
    types.sort();
    types.dedup();
    types
}
