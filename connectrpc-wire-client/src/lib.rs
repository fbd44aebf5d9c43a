//! Connect, gRPC and gRPC-Web client for Rust.
//!
//! ## Features
//!
//! - Unary, client-streaming, server-streaming and bidi calls
//! - Connect, gRPC and gRPC-Web on the wire, chosen per client
//! - Protobuf and JSON codecs
//! - Request compression and response decompression (gzip by default)
//! - Deadlines and cancellation through [`CallContext`]
//! - Any tower service as transport, e.g. an axum `Router` in tests
//!
//! ## Example
//!
//! ```ignore
//! use connectrpc_wire_client::{CallContext, ConnectClient};
//!
//! let client = ConnectClient::builder("http://localhost:3000").build()?;
//!
//! let response = client
//!     .unary::<PingRequest, PingResponse>(
//!         &CallContext::background(),
//!         "/connect.ping.v1.PingService/Ping",
//!         PingRequest { number: 42 }.into(),
//!     )
//!     .await?;
//! println!("{:?}", response.message);
//! ```
//!
//! ## Bidirectional Streaming Example
//!
//! ```ignore
//! let call = client.bidi_stream::<CumSumRequest, CumSumResponse>(
//!     &ctx,
//!     "/connect.ping.v1.PingService/CumSum",
//!     HeaderMap::new(),
//! );
//! let (mut requests, mut responses) = call.split();
//!
//! let send = async {
//!     for number in [3, 5, 1] {
//!         requests.send(&CumSumRequest { number }).await?;
//!     }
//!     requests.close().await
//! };
//! let receive = async {
//!     while let Some(sum) = responses.receive().await? {
//!         println!("sum so far: {}", sum.sum);
//!     }
//!     Ok::<_, ConnectError>(())
//! };
//! let (sent, received) = tokio::join!(send, receive);
//! ```
//!
//! Bidi calls need HTTP/2; over HTTP/1.1 the first receive fails with
//! `unimplemented`.

mod builder;
mod client;
mod conn;
mod error;
mod stream;
pub mod transport;

pub use builder::ClientBuilder;
pub use client::{ClientRequest, ClientResponse, ConnectClient};
pub use conn::{ClientConn, ClientReceiver, ClientSender};
pub use error::ClientError;
pub use stream::{BidiStreamCall, ClientStreamCall, RequestSender, ResponseStream};
pub use transport::{HyperTransport, HyperTransportBuilder, Transport, TransportBody};

pub use connectrpc_wire_core::{
    CallContext, CancelHandle, Code, CompressionConfig, ConnectError, ErrorDetail, FnInterceptor,
    HeaderInterceptor, Interceptor, Peer, Protocol, Spec, StreamType, WireMessage,
};

pub use connectrpc_wire_core;
