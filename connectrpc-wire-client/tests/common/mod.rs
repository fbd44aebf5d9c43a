//! A ping service mounted in-process, and clients wired straight to it.

#![allow(dead_code)]

use std::time::Duration;

use axum::Router;
use connectrpc_wire::prelude::*;
use connectrpc_wire_client::{ClientBuilder, ConnectClient, Protocol, Transport, TransportBody};
use futures::StreamExt;
use http::{HeaderValue, Version};

pub const PING: &str = "/connect.ping.v1.PingService/Ping";
pub const FAIL: &str = "/connect.ping.v1.PingService/Fail";
pub const SUM: &str = "/connect.ping.v1.PingService/Sum";
pub const COUNT_UP: &str = "/connect.ping.v1.PingService/CountUp";
pub const CUM_SUM: &str = "/connect.ping.v1.PingService/CumSum";
pub const PANIC: &str = "/connect.ping.v1.PingService/Panic";
pub const SLOW: &str = "/connect.ping.v1.PingService/Slow";
pub const ECHO: &str = "/connect.ping.v1.PingService/Echo";

pub const PROTOCOLS: [Protocol; 3] = [Protocol::Connect, Protocol::Grpc, Protocol::GrpcWeb];

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    #[prost(int64, tag = "1")]
    #[serde(default)]
    pub number: i64,
    #[prost(string, tag = "2")]
    #[serde(default)]
    pub text: String,
}

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    #[prost(int64, tag = "1")]
    #[serde(default)]
    pub number: i64,
    #[prost(string, tag = "2")]
    #[serde(default)]
    pub text: String,
}

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SumRequest {
    #[prost(int64, tag = "1")]
    #[serde(default)]
    pub number: i64,
}

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SumResponse {
    #[prost(int64, tag = "1")]
    #[serde(default)]
    pub sum: i64,
}

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountUpRequest {
    #[prost(int64, tag = "1")]
    #[serde(default)]
    pub number: i64,
}

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountUpResponse {
    #[prost(int64, tag = "1")]
    #[serde(default)]
    pub number: i64,
}

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumSumRequest {
    #[prost(int64, tag = "1")]
    #[serde(default)]
    pub number: i64,
}

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumSumResponse {
    #[prost(int64, tag = "1")]
    #[serde(default)]
    pub sum: i64,
}

/// A request whose proto encoding is exactly `size` bytes (130..=16386).
///
/// The text field costs a tag byte and a two byte length on top of its
/// characters; `number` stays zero so it is not encoded.
pub fn sized(size: usize) -> PingRequest {
    PingRequest {
        number: 0,
        text: "a".repeat(size - 3),
    }
}

/// A request of `len` pseudo-random characters that gzip barely shrinks.
pub fn noise(len: usize) -> PingRequest {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    let text = (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            ALPHABET[(state % 64) as usize] as char
        })
        .collect();
    PingRequest { number: 0, text }
}

/// The ping service with the same options on every procedure.
pub fn app(options: HandlerOptions) -> Router {
    MakeServiceBuilder::new()
        .add_handlers(vec![
            Handler::unary(
                PING,
                |_ctx: CallContext, req: ConnectRequest<PingRequest>| async move {
                    let PingRequest { number, text } = req.into_inner();
                    Ok(ConnectResponse::new(PingResponse { number, text }))
                },
                options.clone(),
            ),
            Handler::unary(
                FAIL,
                |_ctx: CallContext, _req: ConnectRequest<PingRequest>| async move {
                    Err::<ConnectResponse<PingResponse>, _>(
                        ConnectError::resource_exhausted("oh no").with_meta("x-fail", "yes"),
                    )
                },
                options.clone(),
            ),
            Handler::client_stream(
                SUM,
                |_ctx: CallContext, req: ConnectRequest<Streaming<SumRequest>>| async move {
                    let mut stream = req.into_inner();
                    let mut sum = 0;
                    while let Some(message) = stream.message().await? {
                        sum += message.number;
                    }
                    let mut response = ConnectResponse::new(SumResponse { sum });
                    response.header_mut().insert(
                        "connect-handler-header",
                        HeaderValue::from_static("some header value"),
                    );
                    response.trailer_mut().insert(
                        "connect-handler-trailer",
                        HeaderValue::from_static("some trailer value"),
                    );
                    Ok::<_, ConnectError>(response)
                },
                options.clone(),
            ),
            Handler::server_stream(
                COUNT_UP,
                |_ctx: CallContext, req: ConnectRequest<CountUpRequest>| async move {
                    let last = req.into_inner().number;
                    let stream = futures::stream::iter(
                        (1..=last).map(|number| Ok(CountUpResponse { number })),
                    );
                    let mut response = ConnectResponse::new(StreamBody::new(stream));
                    response.trailer_mut().insert(
                        "connect-handler-trailer",
                        HeaderValue::from_static("counted"),
                    );
                    Ok::<_, ConnectError>(response)
                },
                options.clone(),
            ),
            Handler::bidi_stream(
                CUM_SUM,
                |_ctx: CallContext, req: ConnectRequest<Streaming<CumSumRequest>>| async move {
                    let stream = req.into_inner().into_stream().scan(0i64, |sum, item| {
                        let item = item.map(|message| {
                            *sum += message.number;
                            CumSumResponse { sum: *sum }
                        });
                        futures::future::ready(Some(item))
                    });
                    Ok::<_, ConnectError>(ConnectResponse::new(StreamBody::new(stream)))
                },
                options.clone(),
            ),
            Handler::bidi_stream(
                ECHO,
                |_ctx: CallContext, req: ConnectRequest<Streaming<PingRequest>>| async move {
                    let stream = req.into_inner().into_stream().map(|item| {
                        item.map(|PingRequest { number, text }| PingResponse { number, text })
                    });
                    Ok::<_, ConnectError>(ConnectResponse::new(StreamBody::new(stream)))
                },
                options.clone(),
            ),
            Handler::unary(
                PANIC,
                |_ctx: CallContext, _req: ConnectRequest<PingRequest>| async move {
                    if true {
                        panic!("boom");
                    }
                    Ok::<_, ConnectError>(ConnectResponse::new(PingResponse::default()))
                },
                options.clone(),
            ),
            Handler::unary(
                SLOW,
                |ctx: CallContext, req: ConnectRequest<PingRequest>| async move {
                    ctx.run(tokio::time::sleep(Duration::from_secs(5))).await?;
                    let PingRequest { number, text } = req.into_inner();
                    Ok::<_, ConnectError>(ConnectResponse::new(PingResponse { number, text }))
                },
                options,
            ),
        ])
        .build()
}

/// An in-process transport that presents every request as `version`.
pub fn transport(app: Router, version: Version) -> Transport {
    let service = tower::ServiceBuilder::new()
        .map_request(move |mut request: http::Request<TransportBody>| {
            *request.version_mut() = version;
            request
        })
        .service(app);
    Transport::from_service(service)
}

pub fn builder(app: Router, protocol: Protocol) -> ClientBuilder {
    ConnectClient::builder("http://localhost")
        .protocol(protocol)
        .transport(transport(app, Version::HTTP_2))
}

pub fn client(app: Router, protocol: Protocol) -> ConnectClient {
    builder(app, protocol).build().unwrap()
}
