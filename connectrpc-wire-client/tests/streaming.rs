mod common;

use axum::Router;
use common::*;
use connectrpc_wire::HandlerOptions;
use connectrpc_wire_client::{
    CallContext, ClientRequest, Code, ConnectClient, ConnectError, Protocol,
};
use futures::StreamExt;
use http::{HeaderMap, Version};

#[tokio::test]
async fn test_client_stream_sum() {
    for protocol in PROTOCOLS {
        let client = client(app(HandlerOptions::new()), protocol);
        let mut call = client.client_stream::<SumRequest, SumResponse>(
            &CallContext::background(),
            SUM,
            HeaderMap::new(),
        );
        for number in 1..=10 {
            call.send(&SumRequest { number }).await.unwrap();
        }
        let response = call.close_and_receive().await.unwrap();
        assert_eq!(response.message.sum, 55, "{protocol}");
        assert_eq!(
            response.header.get("connect-handler-header").unwrap(),
            "some header value",
            "{protocol}"
        );
        assert_eq!(
            response.trailer.get("connect-handler-trailer").unwrap(),
            "some trailer value",
            "{protocol}"
        );
        assert!(response.trailer.get("grpc-status").is_none(), "{protocol}");
    }
}

#[tokio::test]
async fn test_server_stream_count_up() {
    for protocol in PROTOCOLS {
        for json in [false, true] {
            let mut builder = builder(app(HandlerOptions::new()), protocol);
            if json {
                builder = builder.json();
            }
            let client = builder.build().unwrap();
            let mut stream = client
                .server_stream::<_, CountUpResponse>(
                    &CallContext::background(),
                    COUNT_UP,
                    ClientRequest::new(CountUpRequest { number: 5 }),
                )
                .await
                .unwrap();
            let mut numbers = Vec::new();
            while let Some(message) = stream.receive().await.unwrap() {
                numbers.push(message.number);
            }
            assert_eq!(numbers, vec![1, 2, 3, 4, 5], "{protocol} json={json}");
            assert_eq!(
                stream.trailer().get("connect-handler-trailer").unwrap(),
                "counted",
                "{protocol}"
            );
            // The end is sticky.
            assert!(stream.receive().await.unwrap().is_none());
        }
    }
}

#[tokio::test]
async fn test_server_stream_into_stream() {
    let client = client(app(HandlerOptions::new()), Protocol::Connect);
    let stream = client
        .server_stream::<_, CountUpResponse>(
            &CallContext::background(),
            COUNT_UP,
            CountUpRequest { number: 3 }.into(),
        )
        .await
        .unwrap();
    let numbers: Vec<i64> = stream
        .into_stream()
        .map(|item| item.unwrap().number)
        .collect()
        .await;
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_bidi_cum_sum() {
    for protocol in [Protocol::Connect, Protocol::Grpc, Protocol::GrpcWeb] {
        let client = client(app(HandlerOptions::new()), protocol);
        let mut call = client.bidi_stream::<CumSumRequest, CumSumResponse>(
            &CallContext::background(),
            CUM_SUM,
            HeaderMap::new(),
        );
        let mut sums = Vec::new();
        for number in [3, 5, 1] {
            call.send(&CumSumRequest { number }).await.unwrap();
            sums.push(call.receive().await.unwrap().unwrap().sum);
        }
        call.close_request().await.unwrap();
        assert!(call.receive().await.unwrap().is_none(), "{protocol}");
        assert_eq!(sums, vec![3, 8, 9], "{protocol}");
    }
}

#[tokio::test]
async fn test_bidi_split_halves() {
    let client = client(app(HandlerOptions::new()), Protocol::Grpc);
    let call = client.bidi_stream::<CumSumRequest, CumSumResponse>(
        &CallContext::background(),
        CUM_SUM,
        HeaderMap::new(),
    );
    let (mut requests, mut responses) = call.split();
    let send = async move {
        for number in 1..=4 {
            requests.send(&CumSumRequest { number }).await?;
        }
        requests.close().await
    };
    let receive = async move {
        let mut sums = Vec::new();
        while let Some(message) = responses.receive().await? {
            sums.push(message.sum);
        }
        Ok::<_, ConnectError>(sums)
    };
    let (sent, received) = tokio::join!(send, receive);
    sent.unwrap();
    assert_eq!(received.unwrap(), vec![1, 3, 6, 10]);
}

#[tokio::test]
async fn test_bidi_requires_http2() {
    for protocol in PROTOCOLS {
        let client = ConnectClient::builder("http://localhost")
            .protocol(protocol)
            .transport(transport(app(HandlerOptions::new()), Version::HTTP_11))
            .build()
            .unwrap();
        let mut call = client.bidi_stream::<CumSumRequest, CumSumResponse>(
            &CallContext::background(),
            CUM_SUM,
            HeaderMap::new(),
        );
        let err = call.receive().await.unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented, "{protocol}");
        assert!(
            err.message().unwrap_or_default().contains("HTTP/2"),
            "{protocol}: {err}"
        );
    }
}

#[tokio::test]
async fn test_cancel_after_first_bidi_response() {
    for protocol in PROTOCOLS {
        let client = client(app(HandlerOptions::new()), protocol);
        let (ctx, cancel) = CallContext::background().with_cancel();
        let mut call =
            client.bidi_stream::<CumSumRequest, CumSumResponse>(&ctx, CUM_SUM, HeaderMap::new());
        call.send(&CumSumRequest { number: 7 }).await.unwrap();
        let first = call.receive().await.unwrap().unwrap();

        cancel.cancel();
        let err = call.receive().await.unwrap_err();
        assert_eq!(err.code(), Code::Canceled, "{protocol}");
        assert_eq!(first.sum, 7);

        let err = call.send(&CumSumRequest { number: 1 }).await.unwrap_err();
        assert_eq!(err.code(), Code::Canceled, "{protocol}");
    }
}

#[tokio::test]
async fn test_client_stream_over_read_max() {
    for protocol in PROTOCOLS {
        let client = ConnectClient::builder("http://localhost")
            .protocol(protocol)
            .transport(transport(
                app(HandlerOptions::new().read_max_bytes(1)),
                Version::HTTP_2,
            ))
            .build()
            .unwrap();
        let mut call = client.client_stream::<SumRequest, SumResponse>(
            &CallContext::background(),
            SUM,
            HeaderMap::new(),
        );
        // The handler may already have answered, so the send can see EOF.
        let _ = call.send(&SumRequest { number: 300 }).await;
        let err = call.close_and_receive().await.unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted, "{protocol}");
        assert!(err.is_wire_error(), "{protocol}");
    }
}

#[tokio::test]
async fn test_stream_send_max() {
    for protocol in PROTOCOLS {
        for gzip in [false, true] {
            let mut builder = builder(app(HandlerOptions::new()), protocol).send_max_bytes(1024);
            if gzip {
                builder = builder.send_compression("gzip");
            }
            let client = builder.build().unwrap();
            let mut call = client.bidi_stream::<PingRequest, PingResponse>(
                &CallContext::background(),
                ECHO,
                HeaderMap::new(),
            );
            call.send(&sized(1024)).await.unwrap();
            assert_eq!(call.receive().await.unwrap().unwrap().text.len(), 1021);

            let (request, expected) = if gzip {
                (noise(4096), "compressed message size ")
            } else {
                (sized(1025), "message size 1025 ")
            };
            let err = call.send(&request).await.unwrap_err();
            assert_eq!(err.code(), Code::ResourceExhausted, "{protocol} gzip={gzip}");
            let message = err.message().unwrap_or_default();
            assert!(message.starts_with(expected), "{protocol} gzip={gzip}: {message}");
            assert!(message.ends_with("exceeds sendMaxBytes 1024"), "{protocol}: {message}");

            // A rejected message is never written; the stream stays usable.
            call.send(&sized(200)).await.unwrap();
            assert_eq!(call.receive().await.unwrap().unwrap().text.len(), 197);
            call.close_request().await.unwrap();
            assert!(call.receive().await.unwrap().is_none(), "{protocol} gzip={gzip}");
        }
    }
}

/// Forwards response bodies without their HTTP trailers.
fn without_trailers(app: Router) -> Router {
    app.layer(axum::middleware::map_response(
        |response: axum::response::Response| async move {
            let (parts, body) = response.into_parts();
            let body = axum::body::Body::from_stream(body.into_data_stream());
            axum::response::Response::from_parts(parts, body)
        },
    ))
}

#[tokio::test]
async fn test_missing_grpc_status() {
    let client = client(without_trailers(app(HandlerOptions::new())), Protocol::Grpc);
    let ctx = CallContext::background();

    let err = client
        .unary::<_, PingResponse>(&ctx, PING, PingRequest::default().into())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(err.message(), Some("gRPC protocol error: no Grpc-Status trailer"));

    let mut stream = client
        .server_stream::<_, CountUpResponse>(&ctx, COUNT_UP, CountUpRequest { number: 2 }.into())
        .await
        .unwrap();
    assert_eq!(stream.receive().await.unwrap().unwrap().number, 1);
    assert_eq!(stream.receive().await.unwrap().unwrap().number, 2);
    let err = stream.receive().await.unwrap_err();
    assert_eq!(err.message(), Some("gRPC protocol error: no Grpc-Status trailer"));

    let mut call = client.client_stream::<SumRequest, SumResponse>(&ctx, SUM, HeaderMap::new());
    call.send(&SumRequest { number: 2 }).await.unwrap();
    let err = call.close_and_receive().await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);

    let mut call =
        client.bidi_stream::<CumSumRequest, CumSumResponse>(&ctx, CUM_SUM, HeaderMap::new());
    call.send(&CumSumRequest { number: 2 }).await.unwrap();
    call.close_request().await.unwrap();
    assert_eq!(call.receive().await.unwrap().unwrap().sum, 2);
    let err = call.receive().await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}

#[tokio::test]
async fn test_close_response_discards_messages() {
    let client = client(app(HandlerOptions::new()), Protocol::Connect);
    let mut stream = client
        .server_stream::<_, CountUpResponse>(
            &CallContext::background(),
            COUNT_UP,
            CountUpRequest { number: 100 }.into(),
        )
        .await
        .unwrap();
    assert_eq!(stream.receive().await.unwrap().unwrap().number, 1);
    stream.close();
    assert!(stream.receive().await.unwrap().is_none());
}
