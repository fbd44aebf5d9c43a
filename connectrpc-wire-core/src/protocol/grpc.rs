//! gRPC and gRPC-Web status trailers.
//!
//! Status travels as `grpc-status`, a percent-encoded `grpc-message` and an
//! optional `grpc-status-details-bin` holding a base64 `google.rpc.Status`.
//! gRPC-Web carries the same fields in an HTTP/1 style header block inside the
//! final `0x80` envelope.

use std::fmt::Write as _;

use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use prost::Message;

use super::headers::{GRPC_MESSAGE, GRPC_STATUS, GRPC_STATUS_DETAILS_BIN};
use crate::error::{Code, ConnectError, ErrorDetail, decode_base64_lenient};

/// `google.rpc.Status`
#[derive(Clone, PartialEq, Message)]
struct RpcStatus {
    #[prost(int32, tag = "1")]
    code: i32,
    #[prost(string, tag = "2")]
    message: String,
    #[prost(message, repeated, tag = "3")]
    details: Vec<prost_types::Any>,
}

/// Build the status trailers for a finished call.
///
/// `trailers` are the application trailers; an error's metadata is appended.
pub fn status_trailers(error: Option<&ConnectError>, trailers: &HeaderMap) -> HeaderMap {
    let mut out = trailers.clone();
    let Some(err) = error else {
        out.insert(GRPC_STATUS, HeaderValue::from_static("0"));
        return out;
    };
    for (name, value) in err.meta() {
        out.append(name.clone(), value.clone());
    }
    out.insert(GRPC_STATUS, HeaderValue::from(err.code() as u32));
    let message = err.message().unwrap_or_default();
    if !message.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&percent_encode(message)) {
            out.insert(GRPC_MESSAGE, value);
        }
    }
    if !err.details().is_empty() {
        let status = RpcStatus {
            code: err.code() as i32,
            message: message.to_owned(),
            details: err
                .details()
                .iter()
                .map(|d| prost_types::Any {
                    type_url: type_url(d),
                    value: d.value().to_vec(),
                })
                .collect(),
        };
        let encoded =
            base64::engine::general_purpose::STANDARD_NO_PAD.encode(status.encode_to_vec());
        if let Ok(value) = HeaderValue::from_str(&encoded) {
            out.insert(GRPC_STATUS_DETAILS_BIN, value);
        }
    }
    out
}

fn type_url(detail: &ErrorDetail) -> String {
    if detail.type_url().contains('/') {
        detail.type_url().to_owned()
    } else {
        format!("type.googleapis.com/{}", detail.type_url())
    }
}

/// Read the status out of trailers (or trailers-only headers).
///
/// `Ok(None)` means `grpc-status: 0`.
pub fn parse_status(trailers: &HeaderMap) -> Result<Option<ConnectError>, ConnectError> {
    let Some(raw) = trailers.get(GRPC_STATUS) else {
        return Err(ConnectError::internal(
            "gRPC protocol error: no Grpc-Status trailer",
        ));
    };
    let raw = raw.to_str().unwrap_or_default();
    let code: u32 = raw.parse().map_err(|_| {
        ConnectError::internal(format!(
            "gRPC protocol error: invalid Grpc-Status trailer {raw:?}"
        ))
    })?;
    if code == 0 {
        return Ok(None);
    }

    let message = trailers
        .get(GRPC_MESSAGE)
        .and_then(|v| v.to_str().ok())
        .map(percent_decode)
        .unwrap_or_default();
    let mut err = if message.is_empty() {
        ConnectError::from_code(Code::from_u32(code).unwrap_or(Code::Unknown))
    } else {
        ConnectError::new(Code::from_u32(code).unwrap_or(Code::Unknown), message)
    };

    if let Some(bin) = trailers.get(GRPC_STATUS_DETAILS_BIN) {
        let status = bin
            .to_str()
            .ok()
            .and_then(|s| decode_base64_lenient(s).ok())
            .and_then(|bytes| RpcStatus::decode(bytes.as_slice()).ok());
        match status {
            Some(status) => {
                for any in status.details {
                    err = err.add_detail(any.type_url, any.value);
                }
            }
            None => tracing::warn!("dropping malformed grpc-status-details-bin"),
        }
    }

    let mut meta = trailers.clone();
    strip_status(&mut meta);
    *err.meta_mut() = meta;
    Ok(Some(err.into_wire_error()))
}

/// Remove the status fields, leaving application trailers.
pub fn strip_status(map: &mut HeaderMap) {
    map.remove(GRPC_STATUS);
    map.remove(GRPC_MESSAGE);
    map.remove(GRPC_STATUS_DETAILS_BIN);
}

/// Serialize trailers as a gRPC-Web trailer frame payload.
pub fn encode_trailer_block(trailers: &HeaderMap) -> Bytes {
    let mut block = String::new();
    for (name, value) in trailers {
        if let Ok(value) = value.to_str() {
            // Header names are already lowercase.
            let _ = write!(block, "{}: {}\r\n", name.as_str(), value);
        }
    }
    Bytes::from(block)
}

/// Parse a gRPC-Web trailer frame payload.
pub fn parse_trailer_block(data: &[u8]) -> Result<HeaderMap, ConnectError> {
    let text = std::str::from_utf8(data).map_err(|e| {
        ConnectError::internal(format!("protocol error: invalid gRPC-Web trailers: {e}"))
    })?;
    let mut map = HeaderMap::new();
    for line in text.split("\r\n").map(str::trim).filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ConnectError::internal(format!(
                "protocol error: invalid gRPC-Web trailer line {line:?}"
            )));
        };
        let name = HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes());
        let value = HeaderValue::from_str(value.trim());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => tracing::warn!(line = %line, "dropping malformed gRPC-Web trailer"),
        }
    }
    Ok(map)
}

/// Percent-encode a status message: bytes outside printable ASCII and `%`.
pub fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for byte in message.bytes() {
        if (0x20..=0x7e).contains(&byte) && byte != b'%' {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

/// Reverse of [`percent_encode`]; malformed escapes pass through unchanged.
pub fn percent_decode(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_round_trip() {
        let message = "résumé 100% done\n";
        let encoded = percent_encode(message);
        assert_eq!(encoded, "r%C3%A9sum%C3%A9 100%25 done%0A");
        assert_eq!(percent_decode(&encoded), message);
        assert_eq!(percent_decode("50%"), "50%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    #[test]
    fn test_success_trailers() {
        let mut app = HeaderMap::new();
        app.insert("x-trailer", HeaderValue::from_static("t"));
        let trailers = status_trailers(None, &app);
        assert_eq!(trailers[GRPC_STATUS], "0");
        assert_eq!(trailers["x-trailer"], "t");
        assert!(parse_status(&trailers).unwrap().is_none());
    }

    #[test]
    fn test_error_trailers_round_trip() {
        let err = ConnectError::new(Code::ResourceExhausted, "oh no: 100%")
            .add_detail("google.rpc.RetryInfo", vec![8, 1])
            .with_meta("x-err", "e");
        let trailers = status_trailers(Some(&err), &HeaderMap::new());
        assert_eq!(trailers[GRPC_STATUS], "8");
        assert_eq!(trailers[GRPC_MESSAGE], "oh no: 100%25");
        assert!(trailers.contains_key(GRPC_STATUS_DETAILS_BIN));

        let parsed = parse_status(&trailers).unwrap().unwrap();
        assert!(parsed.is_wire_error());
        assert_eq!(parsed.code(), Code::ResourceExhausted);
        assert_eq!(parsed.message(), Some("oh no: 100%"));
        assert_eq!(parsed.details().len(), 1);
        assert_eq!(parsed.details()[0].type_name(), "google.rpc.RetryInfo");
        assert_eq!(parsed.details()[0].value(), &[8, 1]);
        assert_eq!(parsed.meta()["x-err"], "e");
        assert!(!parsed.meta().contains_key(GRPC_STATUS));
    }

    #[test]
    fn test_missing_status() {
        let err = parse_status(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(
            err.message(),
            Some("gRPC protocol error: no Grpc-Status trailer")
        );
        assert!(!err.is_wire_error());
    }

    #[test]
    fn test_unknown_numeric_code() {
        let mut trailers = HeaderMap::new();
        trailers.insert(GRPC_STATUS, HeaderValue::from_static("99"));
        let err = parse_status(&trailers).unwrap().unwrap();
        assert_eq!(err.code(), Code::Unknown);
    }

    #[test]
    fn test_trailer_block() {
        let mut trailers = HeaderMap::new();
        trailers.insert(GRPC_STATUS, HeaderValue::from_static("0"));
        trailers.append("x-multi", HeaderValue::from_static("a"));
        trailers.append("x-multi", HeaderValue::from_static("b"));
        let block = encode_trailer_block(&trailers);
        assert_eq!(&block[..], b"grpc-status: 0\r\nx-multi: a\r\nx-multi: b\r\n");

        let parsed = parse_trailer_block(b"Grpc-Status: 3\r\nGrpc-Message: bad\r\n").unwrap();
        assert_eq!(parsed[GRPC_STATUS], "3");
        assert_eq!(parsed[GRPC_MESSAGE], "bad");
        assert!(parse_trailer_block(b"no colon here").is_err());
    }
}
