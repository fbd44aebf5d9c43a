//! Errors raised while configuring a client.
//!
//! Call failures are always [`ConnectError`]s; [`ClientError`] covers what can
//! go wrong before any call is made.

use connectrpc_wire_core::{Code, ConnectError};

#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The base URL cannot be combined with a procedure path.
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// No codec registered under the requested name.
    #[error("unknown codec {0:?}")]
    UnknownCodec(String),

    /// Send compression must name a registered compressor.
    #[error("unknown compression {0:?}")]
    UnknownCompression(String),

    /// TLS could not be configured.
    #[error("tls error: {0}")]
    Tls(String),
}

impl From<ClientError> for ConnectError {
    fn from(err: ClientError) -> Self {
        let code = match &err {
            ClientError::InvalidUrl { .. } => Code::InvalidArgument,
            ClientError::UnknownCodec(_) => Code::Internal,
            ClientError::UnknownCompression(_) => Code::Unknown,
            ClientError::Tls(_) => Code::Unavailable,
        };
        ConnectError::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_connect_error() {
        let err: ConnectError = ClientError::UnknownCompression("gzip".into()).into();
        assert_eq!(err.code(), Code::Unknown);
        assert_eq!(err.message(), Some("unknown compression \"gzip\""));

        let err: ConnectError = ClientError::InvalidUrl {
            url: "nope".into(),
            reason: "missing scheme".into(),
        }
        .into();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
