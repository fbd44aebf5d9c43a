//! RPC error codes and the error type shared by every protocol.
//!
//! - [`Code`]: canonical status codes and their HTTP mapping
//! - [`ErrorDetail`]: self-describing error details
//! - [`ConnectError`]: the single error type crossing the connection boundary
//! - [`EnvelopeError`]: envelope framing errors

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

/// Canonical RPC status codes, shared by Connect, gRPC and gRPC-Web.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Get the string representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    /// Convert a raw wire value (for example a `grpc-status` trailer) into a code.
    pub fn from_u32(value: u32) -> Option<Code> {
        let code = match value {
            0 => Code::Ok,
            1 => Code::Canceled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => return None,
        };
        Some(code)
    }

    /// HTTP status used when this code ends a Connect unary call.
    ///
    /// `Ok` is not an error code, so it lands on 500 together with
    /// anything outside the canonical set.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Code::Canceled => StatusCode::REQUEST_TIMEOUT,
            Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Code::Aborted => StatusCode::CONFLICT,
            Code::OutOfRange => StatusCode::BAD_REQUEST,
            Code::Unimplemented => StatusCode::NOT_FOUND,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::Ok => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Infer a code from the HTTP status of a response that carried no
    /// Connect error body.
    pub fn from_http_status(status: StatusCode) -> Code {
        match status.as_u16() {
            400 => Code::Internal,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            429 | 502 | 503 | 504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseCodeError(());

impl fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown error code")
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Code::Ok),
            "canceled" | "cancelled" => Ok(Code::Canceled),
            "unknown" => Ok(Code::Unknown),
            "invalid_argument" => Ok(Code::InvalidArgument),
            "deadline_exceeded" => Ok(Code::DeadlineExceeded),
            "not_found" => Ok(Code::NotFound),
            "already_exists" => Ok(Code::AlreadyExists),
            "permission_denied" => Ok(Code::PermissionDenied),
            "resource_exhausted" => Ok(Code::ResourceExhausted),
            "failed_precondition" => Ok(Code::FailedPrecondition),
            "aborted" => Ok(Code::Aborted),
            "out_of_range" => Ok(Code::OutOfRange),
            "unimplemented" => Ok(Code::Unimplemented),
            "internal" => Ok(Code::Internal),
            "unavailable" => Ok(Code::Unavailable),
            "data_loss" => Ok(Code::DataLoss),
            "unauthenticated" => Ok(Code::Unauthenticated),
            _ => Err(ParseCodeError(())),
        }
    }
}

impl Serialize for Code {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Code {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        // Codes added by newer peers degrade to unknown rather than failing the parse.
        Ok(s.parse().unwrap_or(Code::Unknown))
    }
}

const GOOGLE_TYPE_PREFIX: &str = "type.googleapis.com/";

/// A self-describing error detail, `google.protobuf.Any` on the wire.
///
/// JSON form: `{"type": "google.rpc.RetryInfo", "value": "<base64>"}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetail {
    type_url: String,
    value: Vec<u8>,
}

impl ErrorDetail {
    /// Create a new error detail with a type URL and protobuf-encoded bytes.
    pub fn new<S: Into<String>>(type_url: S, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }

    /// Get the type URL as given at construction.
    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    /// Fully-qualified message name, without the `type.googleapis.com/` prefix.
    pub fn type_name(&self) -> &str {
        self.type_url
            .strip_prefix(GOOGLE_TYPE_PREFIX)
            .unwrap_or(&self.type_url)
    }

    /// Get the protobuf-encoded value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl Serialize for ErrorDetail {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("ErrorDetail", 2)?;
        s.serialize_field("type", self.type_name())?;
        let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(&self.value);
        s.serialize_field("value", &encoded)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for ErrorDetail {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "type")]
            type_name: String,
            #[serde(default)]
            value: String,
        }

        let raw = Raw::deserialize(deserializer)?;
        let value = decode_base64_lenient(&raw.value).map_err(de::Error::custom)?;
        Ok(ErrorDetail::new(raw.type_name, value))
    }
}

/// Decode base64 that may or may not carry padding.
pub(crate) fn decode_base64_lenient(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = input.trim_end_matches('=');
    base64::engine::general_purpose::STANDARD_NO_PAD.decode(trimmed)
}

/// Envelope framing errors.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Incomplete envelope header.
    #[error("incomplete envelope header: expected {expected} bytes, got {actual}")]
    IncompleteHeader { expected: usize, actual: usize },

    /// Body ended in the middle of a payload.
    #[error("incomplete envelope: expected {expected} bytes, got {actual}")]
    IncompletePayload { expected: usize, actual: usize },

    /// Invalid frame flags.
    #[error("invalid frame flags: 0x{0:02x}")]
    InvalidFlags(u8),

    /// Declared or decoded size is above the read limit.
    #[error("message size {size} is larger than configured max {max}")]
    TooLarge { size: usize, max: usize },

    /// Decompression failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Compression failed.
    #[error("compression failed: {0}")]
    Compression(String),
}

impl From<EnvelopeError> for ConnectError {
    fn from(err: EnvelopeError) -> Self {
        let code = match &err {
            EnvelopeError::TooLarge { .. } => Code::ResourceExhausted,
            EnvelopeError::IncompleteHeader { .. }
            | EnvelopeError::IncompletePayload { .. }
            | EnvelopeError::InvalidFlags(_) => Code::InvalidArgument,
            EnvelopeError::Decompression(_) | EnvelopeError::Compression(_) => Code::Internal,
        };
        // Size errors keep their bare text so callers can match on it.
        let message = match &err {
            EnvelopeError::TooLarge { .. } => err.to_string(),
            _ => format!("protocol error: {err}"),
        };
        ConnectError::new(code, message)
    }
}

/// JSON document carrying an error: the Connect unary body, and the
/// `error` member of a Connect end-stream message.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ErrorResponseBody {
    #[serde(default)]
    pub code: Option<Code>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
}

impl From<&ConnectError> for ErrorResponseBody {
    fn from(err: &ConnectError) -> Self {
        Self {
            code: Some(err.code()),
            message: err.message().map(str::to_owned),
            details: err.details().to_vec(),
        }
    }
}

impl ErrorResponseBody {
    /// Turn a decoded body into a wire error. `None` when the body carries no code.
    pub fn into_wire_error(self, meta: HeaderMap) -> Option<ConnectError> {
        let code = self.code?;
        let mut err = ConnectError::from_code(code);
        err.message = self.message.filter(|m| !m.is_empty());
        err.details = self.details;
        err.meta = meta;
        err.wire = true;
        Some(err)
    }
}

/// The error every connection operation returns.
///
/// Carries a [`Code`], an optional message, metadata sent alongside the error
/// (headers or trailers depending on protocol) and structured details. Errors
/// decoded from a peer are marked as wire errors; locally synthesized ones are not.
#[derive(Clone, Debug)]
pub struct ConnectError {
    code: Code,
    message: Option<String>,
    details: Vec<ErrorDetail>,
    meta: HeaderMap,
    wire: bool,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ConnectError {
    /// Create a new error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: Vec::new(),
            meta: HeaderMap::new(),
            wire: false,
            source: None,
        }
    }

    /// Create a new error with just a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: Vec::new(),
            meta: HeaderMap::new(),
            wire: false,
            source: None,
        }
    }

    /// Wrap an underlying error, using its text as the message.
    pub fn from_error<E>(code: Code, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut this = Self::new(code, err.to_string());
        this.source = Some(Arc::new(err));
        this
    }

    /// Error returned by a send once the peer has stopped reading.
    ///
    /// The real outcome of the call is obtained by receiving.
    pub fn eof() -> Self {
        Self::from_error(
            Code::Unknown,
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "EOF"),
        )
    }

    pub fn canceled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn failed_precondition<S: Into<String>>(message: S) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Get the error code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the error message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Add an error detail with type URL and protobuf-encoded bytes.
    pub fn add_detail<S: Into<String>>(mut self, type_url: S, value: Vec<u8>) -> Self {
        self.details.push(ErrorDetail::new(type_url, value));
        self
    }

    /// Add a pre-constructed ErrorDetail.
    pub fn add_error_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Metadata sent with the error.
    pub fn meta(&self) -> &HeaderMap {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut HeaderMap {
        &mut self.meta
    }

    /// Add a metadata entry. Invalid names or values are dropped.
    pub fn with_meta<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let key_str = key.as_ref();
        let val_str = value.as_ref();

        match HeaderName::from_bytes(key_str.as_bytes()) {
            Ok(name) => match HeaderValue::from_str(val_str) {
                Ok(val) => {
                    self.meta.append(name, val);
                }
                Err(e) => {
                    tracing::debug!(
                        key = key_str,
                        value = val_str,
                        error = %e,
                        "invalid header value, metadata dropped"
                    );
                }
            },
            Err(e) => {
                tracing::debug!(
                    key = key_str,
                    error = %e,
                    "invalid header name, metadata dropped"
                );
            }
        }
        self
    }

    /// Whether this error was explicitly sent by the remote peer.
    pub fn is_wire_error(&self) -> bool {
        self.wire
    }

    /// Mark this error as received from the peer.
    pub fn into_wire_error(mut self) -> Self {
        self.wire = true;
        self
    }

    /// Whether this error only signals that the peer stopped reading.
    pub fn is_eof(&self) -> bool {
        self.source
            .as_deref()
            .and_then(|e| e.downcast_ref::<std::io::Error>())
            .is_some_and(|e| e.kind() == std::io::ErrorKind::UnexpectedEof)
    }

    /// Prefix the message, keeping code, metadata and details.
    pub fn with_context(mut self, context: impl fmt::Display) -> Self {
        self.message = Some(match self.message.take() {
            Some(m) => format!("{context}: {m}"),
            None => context.to_string(),
        });
        self
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message.as_deref() {
            Some(msg) if !msg.is_empty() => write!(f, "{}: {}", self.code, msg),
            _ => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: [(Code, u16); 16] = [
        (Code::Canceled, 408),
        (Code::Unknown, 500),
        (Code::InvalidArgument, 400),
        (Code::DeadlineExceeded, 408),
        (Code::NotFound, 404),
        (Code::AlreadyExists, 409),
        (Code::PermissionDenied, 403),
        (Code::ResourceExhausted, 429),
        (Code::FailedPrecondition, 412),
        (Code::Aborted, 409),
        (Code::OutOfRange, 400),
        (Code::Unimplemented, 404),
        (Code::Internal, 500),
        (Code::Unavailable, 503),
        (Code::DataLoss, 500),
        (Code::Unauthenticated, 401),
    ];

    #[test]
    fn test_code_http_status() {
        for (code, status) in ALL_CODES {
            assert_eq!(code.http_status().as_u16(), status, "{code}");
            assert_eq!(Code::from_u32(code as u32), Some(code));
        }
    }

    #[test]
    fn test_out_of_range_code_is_500() {
        assert_eq!(Code::from_u32(0), Some(Code::Ok));
        assert_eq!(Code::Ok.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(Code::from_u32(100), None);
    }

    #[test]
    fn test_code_from_u32_round_trips() {
        for (code, _) in ALL_CODES {
            assert_eq!(Code::from_u32(code as u32), Some(code));
        }
        assert_eq!(Code::from_u32(17), None);
    }

    #[test]
    fn test_code_from_str() {
        assert_eq!("canceled".parse::<Code>(), Ok(Code::Canceled));
        assert_eq!("cancelled".parse::<Code>(), Ok(Code::Canceled));
        assert_eq!(
            "resource_exhausted".parse::<Code>(),
            Ok(Code::ResourceExhausted)
        );
        assert!("nope".parse::<Code>().is_err());
    }

    #[test]
    fn test_code_from_http_status() {
        assert_eq!(Code::from_http_status(StatusCode::BAD_REQUEST), Code::Internal);
        assert_eq!(Code::from_http_status(StatusCode::NOT_FOUND), Code::Unimplemented);
        assert_eq!(
            Code::from_http_status(StatusCode::BAD_GATEWAY),
            Code::Unavailable
        );
        assert_eq!(
            Code::from_http_status(StatusCode::HTTP_VERSION_NOT_SUPPORTED),
            Code::Unknown
        );
    }

    #[test]
    fn test_error_display() {
        let err = ConnectError::resource_exhausted("oh no");
        assert_eq!(err.to_string(), "resource_exhausted: oh no");
        assert_eq!(ConnectError::from_code(Code::Internal).to_string(), "internal");
    }

    #[test]
    fn test_error_detail_json() {
        let detail = ErrorDetail::new("type.googleapis.com/google.rpc.RetryInfo", vec![1, 2, 3]);
        let json = serde_json::to_string(&detail).unwrap();
        assert_eq!(json, r#"{"type":"google.rpc.RetryInfo","value":"AQID"}"#);

        let back: ErrorDetail = serde_json::from_str(r#"{"type":"x.Y","value":"AQID"}"#).unwrap();
        assert_eq!(back.type_name(), "x.Y");
        assert_eq!(back.value(), &[1, 2, 3]);

        let padded: ErrorDetail = serde_json::from_str(r#"{"type":"x.Y","value":"AQI="}"#).unwrap();
        assert_eq!(padded.value(), &[1, 2]);
    }

    #[test]
    fn test_error_body_round_trip() {
        let err = ConnectError::not_found("missing").add_detail("a.B", vec![9]);
        let json = serde_json::to_string(&ErrorResponseBody::from(&err)).unwrap();
        assert_eq!(
            json,
            r#"{"code":"not_found","message":"missing","details":[{"type":"a.B","value":"CQ"}]}"#
        );

        let body: ErrorResponseBody = serde_json::from_str(&json).unwrap();
        let wire = body.into_wire_error(HeaderMap::new()).unwrap();
        assert!(wire.is_wire_error());
        assert_eq!(wire.code(), Code::NotFound);
        assert_eq!(wire.message(), Some("missing"));
        assert_eq!(wire.details().len(), 1);
    }

    #[test]
    fn test_error_body_unknown_code() {
        let body: ErrorResponseBody =
            serde_json::from_str(r#"{"code":"brand_new","message":"x"}"#).unwrap();
        assert_eq!(body.code, Some(Code::Unknown));
        let empty: ErrorResponseBody = serde_json::from_str("{}").unwrap();
        assert!(empty.into_wire_error(HeaderMap::new()).is_none());
    }

    #[test]
    fn test_local_errors_are_not_wire_errors() {
        assert!(!ConnectError::canceled("context canceled").is_wire_error());
        assert!(!ConnectError::eof().is_wire_error());
        assert!(ConnectError::eof().is_eof());
        assert!(!ConnectError::internal("x").is_eof());
    }

    #[test]
    fn test_with_meta_drops_invalid() {
        let err = ConnectError::internal("x")
            .with_meta("x-ok", "1")
            .with_meta("bad header", "2")
            .with_meta("x-bad-value", "a\nb");
        assert_eq!(err.meta().len(), 1);
        assert_eq!(err.meta().get("x-ok").unwrap(), "1");
    }

    #[test]
    fn test_envelope_error_conversion() {
        let err: ConnectError = EnvelopeError::TooLarge { size: 1025, max: 1024 }.into();
        assert_eq!(err.code(), Code::ResourceExhausted);
        assert_eq!(
            err.to_string(),
            "resource_exhausted: message size 1025 is larger than configured max 1024"
        );

        let err: ConnectError = EnvelopeError::InvalidFlags(0x40).into();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_with_context() {
        let err = ConnectError::internal("boom").with_context("marshal message");
        assert_eq!(err.to_string(), "internal: marshal message: boom");
    }
}
