//! Request negotiation: protocol, codec, compression and timeout.
//!
//! Failures that happen before a protocol is known (method, content type,
//! HTTP version) are plain HTTP responses. Anything after that is a
//! [`ConnectError`] carried in [`Negotiated::error`] and written through the
//! chosen protocol.

use std::time::Duration;

use connectrpc_wire_core::protocol::connect::{GET_PROTOCOL_VERSION, GetQuery, check_protocol_version};
use connectrpc_wire_core::protocol::{
    ContentType, Protocol, StreamType, TrailerDelivery, accepted_content_types, headers,
    parse_content_type, response_content_type,
};
use connectrpc_wire_core::timeout::{parse_connect_timeout, parse_grpc_timeout};
use connectrpc_wire_core::{
    BoxedCodec, Code, ConnectError, Spec, UnknownCompression, WireBody, WireFormat, empty_body,
};
use http::request::Parts;
use http::{HeaderValue, Method, StatusCode, Version};

use crate::options::HandlerOptions;

/// Outcome of negotiating one request.
pub(crate) enum Negotiation {
    /// The request cannot be served; reply with this response as-is.
    Reject(http::Response<WireBody>),
    Accept(Box<Negotiated>),
}

/// Everything fixed for the lifetime of one call.
#[derive(Debug)]
pub(crate) struct Negotiated {
    pub protocol: Protocol,
    pub delivery: TrailerDelivery,
    pub codec: BoxedCodec,
    /// Response `Content-Type`.
    pub content_type: String,
    pub format: WireFormat,
    /// Comma separated names for the accept-encoding response header.
    pub accept_encoding: String,
    pub timeout: Option<Duration>,
    /// Decoded query of a Connect GET.
    pub get: Option<GetQuery>,
    /// Failure to report through the negotiated protocol.
    pub error: Option<ConnectError>,
}

pub(crate) fn negotiate(parts: &Parts, spec: &Spec, options: &HandlerOptions) -> Negotiation {
    let get_allowed = options.allow_get && spec.stream_type == StreamType::Unary;
    let is_get = parts.method == Method::GET && get_allowed;
    if parts.method != Method::POST && !is_get {
        tracing::debug!(method = %parts.method, procedure = %spec.procedure, "method not allowed");
        let allow = if get_allowed { "GET, POST" } else { "POST" };
        return Negotiation::Reject(reject(
            parts.version,
            StatusCode::METHOD_NOT_ALLOWED,
            http::header::ALLOW,
            allow,
        ));
    }

    let (content_type, get) = if is_get {
        match parts.uri.query().map(GetQuery::parse) {
            Some(Ok(query)) => {
                let ct = ContentType {
                    protocol: Protocol::Connect,
                    codec: query.encoding.clone(),
                    connect_streaming: false,
                };
                (Some(ct), Some(query))
            }
            _ => (None, None),
        }
    } else {
        let ct = parts
            .headers
            .get(headers::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_content_type(v).ok());
        (ct, None)
    };

    let codec = content_type
        .as_ref()
        .filter(|ct| ct.matches(spec.stream_type))
        .and_then(|ct| options.codecs.get(&ct.codec).cloned().map(|codec| (ct.protocol, codec)));
    let Some((protocol, codec)) = codec else {
        tracing::debug!(procedure = %spec.procedure, "unsupported content type");
        let accept_post = accepted_content_types(spec.stream_type, options.codecs.names()).join(", ");
        return Negotiation::Reject(reject(
            parts.version,
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            http::HeaderName::from_static("accept-post"),
            &accept_post,
        ));
    };

    if spec.stream_type == StreamType::Bidi && parts.version < Version::HTTP_2 {
        tracing::debug!(procedure = %spec.procedure, version = ?parts.version, "bidi stream over HTTP/1");
        let mut response = http::Response::new(empty_body());
        *response.status_mut() = StatusCode::HTTP_VERSION_NOT_SUPPORTED;
        *response.version_mut() = parts.version;
        return Negotiation::Reject(response);
    }

    let delivery = TrailerDelivery::for_call(protocol, spec.stream_type);
    let mut format = WireFormat::new(codec.clone());
    format.compression = options.compression;
    format.read_max_bytes = options.limits.read_max();
    format.send_max_bytes = options.limits.send_max();

    let request_content_type = parts
        .headers
        .get(headers::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let content_type =
        response_content_type(protocol, spec.stream_type, codec.name(), request_content_type);
    let mut negotiated = Negotiated {
        protocol,
        delivery,
        codec,
        content_type,
        format,
        accept_encoding: options.compressions.comma_separated_names(),
        timeout: options.timeout,
        get,
        error: None,
    };
    if let Err(err) = validate(parts, options, &mut negotiated) {
        tracing::debug!(procedure = %spec.procedure, error = %err, "request rejected");
        negotiated.error = Some(err);
    }
    Negotiation::Accept(Box::new(negotiated))
}

/// Checks that need a protocol to report through.
fn validate(
    parts: &Parts,
    options: &HandlerOptions,
    negotiated: &mut Negotiated,
) -> Result<(), ConnectError> {
    let header = |name: &http::HeaderName| parts.headers.get(name).and_then(|v| v.to_str().ok());

    if negotiated.protocol == Protocol::Connect {
        match &negotiated.get {
            Some(query) => check_get_version(
                query.connect.as_deref(),
                options.require_connect_protocol_header,
            )?,
            None => check_protocol_version(
                header(&headers::CONNECT_PROTOCOL_VERSION),
                options.require_connect_protocol_header,
            )?,
        }
    }

    let timeout_header = negotiated.delivery.timeout_header();
    if let Some(value) = header(&timeout_header) {
        let requested = match negotiated.protocol {
            Protocol::Connect => parse_connect_timeout(value)?,
            Protocol::Grpc | Protocol::GrpcWeb => parse_grpc_timeout(value)?,
        };
        negotiated.timeout = Some(match options.timeout {
            Some(cap) => cap.min(requested),
            None => requested,
        });
    }

    let request_encoding = match &negotiated.get {
        Some(query) => query.compression.as_deref(),
        None => header(&negotiated.delivery.encoding_header()),
    };
    let recv = options
        .compressions
        .resolve(request_encoding)
        .map_err(|UnknownCompression(name)| {
            ConnectError::new(
                Code::Unimplemented,
                format!(
                    "unknown compression \"{name}\": supported encodings are {}",
                    options.compressions.comma_separated_names()
                ),
            )
        })?;

    let send = match &recv {
        Some(compressor) => Some(compressor.clone()),
        None => options
            .compressions
            .negotiate(header(&negotiated.delivery.accept_encoding_header())),
    };
    negotiated.format.recv_compression = recv;
    negotiated.format.send_compression = send;
    Ok(())
}

fn check_get_version(value: Option<&str>, required: bool) -> Result<(), ConnectError> {
    match value {
        Some(GET_PROTOCOL_VERSION) => Ok(()),
        Some(other) => Err(ConnectError::invalid_argument(format!(
            "connect must be \"{GET_PROTOCOL_VERSION}\": got \"{other}\""
        ))),
        None if required => Err(ConnectError::invalid_argument(format!(
            "missing required parameter: set connect to \"{GET_PROTOCOL_VERSION}\""
        ))),
        None => Ok(()),
    }
}

fn reject(
    version: Version,
    status: StatusCode,
    name: http::HeaderName,
    value: &str,
) -> http::Response<WireBody> {
    let mut response = http::Response::new(empty_body());
    *response.status_mut() = status;
    *response.version_mut() = version;
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
    response
}
