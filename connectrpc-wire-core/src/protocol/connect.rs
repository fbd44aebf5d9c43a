//! Connect protocol wire forms: unary error bodies, `Trailer-` headers,
//! end-of-stream messages and the GET query encoding.

use std::collections::BTreeMap;

use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use super::headers::TRAILER_PREFIX;
use crate::error::{Code, ConnectError, ErrorResponseBody, decode_base64_lenient};

/// The only protocol version.
pub const PROTOCOL_VERSION: &str = "1";

/// Value of the `connect` GET query parameter.
pub const GET_PROTOCOL_VERSION: &str = "v1";

/// Validate a `Connect-Protocol-Version` header value.
pub fn check_protocol_version(value: Option<&str>, required: bool) -> Result<(), ConnectError> {
    match value {
        Some(PROTOCOL_VERSION) => Ok(()),
        Some(other) => Err(ConnectError::invalid_argument(format!(
            "connect-protocol-version must be \"{PROTOCOL_VERSION}\": got \"{other}\""
        ))),
        None if required => Err(ConnectError::invalid_argument(format!(
            "missing required header: set Connect-Protocol-Version to \"{PROTOCOL_VERSION}\""
        ))),
        None => Ok(()),
    }
}

/// Serialize an error as a unary response body.
pub fn error_body(err: &ConnectError) -> Bytes {
    let body = ErrorResponseBody::from(err);
    serde_json::to_vec(&body)
        .map(Bytes::from)
        .unwrap_or_else(|_| Bytes::from_static(br#"{"code":"internal"}"#))
}

/// Decode a non-200 unary response into an error.
///
/// Bodies that are not a Connect error document fall back to the HTTP status.
pub fn parse_error_body(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> ConnectError {
    let (headers, trailers) = split_unary_trailers(headers);
    let mut meta = headers;
    meta.extend(trailers);
    serde_json::from_slice::<ErrorResponseBody>(body)
        .ok()
        .and_then(|doc| doc.into_wire_error(meta.clone()))
        .unwrap_or_else(|| http_status_error(status, meta))
}

/// Error for a status that carried no usable error document.
pub fn http_status_error(status: StatusCode, meta: HeaderMap) -> ConnectError {
    let mut err = ConnectError::new(
        Code::from_http_status(status),
        format!(
            "HTTP status {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        ),
    );
    *err.meta_mut() = meta;
    err
}

/// Append trailers to unary response headers as `Trailer-<name>`.
pub fn merge_unary_trailers(headers: &mut HeaderMap, trailers: &HeaderMap) {
    for (name, value) in trailers {
        let prefixed = format!("{TRAILER_PREFIX}{}", name.as_str());
        if let Ok(name) = HeaderName::from_bytes(prefixed.as_bytes()) {
            headers.append(name, value.clone());
        }
    }
}

/// Split unary response headers into `(headers, trailers)`.
pub fn split_unary_trailers(all: &HeaderMap) -> (HeaderMap, HeaderMap) {
    let mut headers = HeaderMap::new();
    let mut trailers = HeaderMap::new();
    for (name, value) in all {
        match name.as_str().strip_prefix(TRAILER_PREFIX) {
            Some(stripped) => {
                if let Ok(name) = HeaderName::from_bytes(stripped.as_bytes()) {
                    trailers.append(name, value.clone());
                }
            }
            None => {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    (headers, trailers)
}

/// JSON payload of the final `0x02` envelope.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EndStreamMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponseBody>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Vec<String>>,
}

/// Build the end-of-stream payload; error metadata is merged into `metadata`.
pub fn end_stream_payload(error: Option<&ConnectError>, trailers: &HeaderMap) -> Bytes {
    let mut metadata = header_map_to_json(trailers);
    if let Some(err) = error {
        for (key, values) in header_map_to_json(err.meta()) {
            metadata.entry(key).or_default().extend(values);
        }
    }
    let message = EndStreamMessage {
        error: error.map(ErrorResponseBody::from),
        metadata,
    };
    serde_json::to_vec(&message)
        .map(Bytes::from)
        .unwrap_or_else(|_| Bytes::from_static(br#"{"error":{"code":"internal"}}"#))
}

/// Decode an end-of-stream payload into `(trailers, error)`.
pub fn parse_end_stream(data: &[u8]) -> Result<(HeaderMap, Option<ConnectError>), ConnectError> {
    let message: EndStreamMessage = serde_json::from_slice(data).map_err(|e| {
        ConnectError::internal(format!("protocol error: invalid end stream message: {e}"))
    })?;
    let trailers = json_to_header_map(&message.metadata);
    let error = message.error.map(|body| {
        let message = body.message.clone();
        body.into_wire_error(trailers.clone()).unwrap_or_else(|| {
            let mut err = ConnectError::from_code(Code::Unknown);
            if let Some(m) = message {
                err = err.with_context(m);
            }
            *err.meta_mut() = trailers.clone();
            err.into_wire_error()
        })
    });
    Ok((trailers, error))
}

fn header_map_to_json(map: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_owned())
                .or_default()
                .push(value.to_owned());
        }
    }
    out
}

fn json_to_header_map(metadata: &BTreeMap<String, Vec<String>>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, values) in metadata {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            tracing::debug!(key = %key, "dropping invalid end stream metadata key");
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                map.append(name.clone(), value);
            }
        }
    }
    map
}

/// Query parameters of a Connect unary GET.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<String>,
    pub encoding: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

impl GetQuery {
    /// Encode a marshaled (and possibly compressed) message.
    ///
    /// Binary payloads are base64url encoded; JSON goes as-is.
    pub fn new(codec: &str, payload: &[u8], binary: bool, compression: Option<&str>) -> Self {
        let text = if binary || compression.is_some() {
            None
        } else {
            std::str::from_utf8(payload).ok()
        };
        let (message, base64) = match text {
            Some(text) => (text.to_owned(), None),
            None => (
                base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload),
                Some("1".to_owned()),
            ),
        };
        Self {
            connect: Some(GET_PROTOCOL_VERSION.to_owned()),
            encoding: codec.to_owned(),
            message,
            base64,
            compression: compression.map(str::to_owned),
        }
    }

    pub fn parse(query: &str) -> Result<Self, ConnectError> {
        serde_qs::from_str(query)
            .map_err(|e| ConnectError::invalid_argument(format!("invalid GET query: {e}")))
    }

    pub fn to_query_string(&self) -> Result<String, ConnectError> {
        serde_qs::to_string(self).map_err(|e| ConnectError::internal(format!("encode GET query: {e}")))
    }

    /// The raw (possibly compressed) message bytes.
    pub fn payload(&self) -> Result<Bytes, ConnectError> {
        match self.base64.as_deref() {
            Some("1") | Some("true") => {
                let normalized = self.message.replace('-', "+").replace('_', "/");
                decode_base64_lenient(&normalized).map(Bytes::from).map_err(|e| {
                    ConnectError::invalid_argument(format!("invalid base64 message: {e}"))
                })
            }
            _ => Ok(Bytes::from(self.message.clone().into_bytes())),
        }
    }
}
