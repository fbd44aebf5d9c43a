//! Wire-level building blocks shared by the `connectrpc-wire` handler and
//! `connectrpc-wire-client` crates.
//!
//! ## Modules
//!
//! - [`error`]: status codes, [`ConnectError`] and the HTTP mapping
//! - [`codec`]: message codecs and their registry
//! - [`compression`]: compressors and their registry
//! - [`envelope`]: length-prefixed framing and [`WireFormat`]
//! - [`body`]: reading envelopes out of HTTP bodies
//! - [`protocol`]: content types, headers and per-protocol status encodings
//! - [`timeout`]: `Connect-Timeout-Ms` and `Grpc-Timeout`
//! - [`context`]: [`CallContext`] cancellation and deadlines
//! - [`interceptor`]: header interceptors shared by both sides

pub mod body;
pub mod codec;
pub mod compression;
pub mod context;
pub mod envelope;
pub mod error;
pub mod interceptor;
pub mod protocol;
pub mod timeout;

pub use body::*;
pub use codec::*;
pub use compression::*;
pub use context::*;
pub use envelope::*;
pub use error::*;
pub use interceptor::*;
pub use protocol::{ContentType, Peer, Protocol, Spec, StreamType, TrailerDelivery};
