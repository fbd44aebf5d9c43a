//! # connectrpc-wire
//!
//! The handler side of a Connect, gRPC and gRPC-Web wire engine, built on
//! [axum](https://github.com/tokio-rs/axum) and tower.
//!
//! A [`Handler`] binds a typed implementation to one procedure. Each request
//! is negotiated (protocol, codec, compression, timeout), the implementation
//! runs against a [`HandlerConn`], and the result is written back in the
//! protocol's own framing:
//!
//! - Connect unary: plain body, errors as JSON, trailers as `Trailer-` headers
//! - Connect streaming: enveloped messages plus an end-of-stream message
//! - gRPC: enveloped messages plus HTTP trailers (trailers-only on early errors)
//! - gRPC-Web: enveloped messages plus a trailer frame
//!
//! ## Example
//!
//! ```rust,ignore
//! use connectrpc_wire::prelude::*;
//!
//! let ping = Handler::unary(
//!     "/test.v1.PingService/Ping",
//!     |_ctx: CallContext, req: ConnectRequest<PingRequest>| async move {
//!         Ok(ConnectResponse::new(PingResponse { number: req.message().number }))
//!     },
//!     HandlerOptions::new().read_max_bytes(1024),
//! );
//! let app = MakeServiceBuilder::new().add_handler(ping).build();
//! ```

mod conn;
mod handler;
mod limits;
mod message;
mod negotiate;
mod options;
mod service_builder;

pub use conn::{HandlerConn, HandlerReceiver, HandlerSender};
pub use handler::Handler;
pub use limits::{DEFAULT_MAX_MESSAGE_SIZE, MessageLimits};
pub use message::{ConnectRequest, ConnectResponse, StreamBody, Streaming};
pub use options::HandlerOptions;
pub use service_builder::MakeServiceBuilder;

// Re-export the shared wire types so handlers need only this crate.
pub use connectrpc_wire_core::{
    CallContext, CancelHandle, Code, CodecRegistry, CompressionRegistry, ConnectError,
    ErrorDetail, FnInterceptor, HeaderInterceptor, Interceptor, Peer, Protocol, Spec, StreamType,
    WireMessage,
};

// Re-export several crates
pub use connectrpc_wire_core;
pub use futures;
pub use prost;
pub use serde;

pub mod prelude {
    //! The most common types.
    pub use crate::{
        CallContext, Code, ConnectError, ConnectRequest, ConnectResponse, Handler, HandlerOptions,
        MakeServiceBuilder, StreamBody, Streaming,
    };
}
