//! Typed handlers bound to one procedure.
//!
//! A [`Handler`] is a `tower::Service` over HTTP requests. Mount it on an
//! axum router at its procedure path, or let
//! [`MakeServiceBuilder`](crate::MakeServiceBuilder) do that.
//!
//! ```ignore
//! let ping = Handler::unary(
//!     "/test.v1.PingService/Ping",
//!     |_ctx: CallContext, req: ConnectRequest<PingRequest>| async move {
//!         Ok(ConnectResponse::new(PingResponse { number: req.message().number }))
//!     },
//!     HandlerOptions::new(),
//! );
//! let app = axum::Router::new().route_service(ping.procedure(), ping.clone());
//! ```

use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::ConnectInfo;
use bytes::Bytes;
use connectrpc_wire_core::{
    BoxError, CallContext, CancelHandle, ConnectError, Peer, Spec, StreamType, WireBody,
    WireMessage, empty_body,
};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use http::StatusCode;
use http_body_util::BodyExt;
use tokio::sync::oneshot;
use tower::Service;

use crate::conn::HandlerConn;
use crate::message::{ConnectRequest, ConnectResponse, StreamBody, Streaming};
use crate::negotiate::{Negotiation, negotiate};
use crate::options::HandlerOptions;

type Implementation = Arc<
    dyn for<'a> Fn(CallContext, &'a mut HandlerConn) -> BoxFuture<'a, Result<(), ConnectError>>
        + Send
        + Sync,
>;

/// Pins down the higher-ranked signature for closures.
fn implementation<F>(f: F) -> Implementation
where
    F: for<'a> Fn(CallContext, &'a mut HandlerConn) -> BoxFuture<'a, Result<(), ConnectError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// One procedure's implementation plus its options.
#[derive(Clone)]
pub struct Handler {
    spec: Spec,
    options: Arc<HandlerOptions>,
    implementation: Implementation,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("spec", &self.spec)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Handler {
    /// A handler driven directly by a [`HandlerConn`].
    ///
    /// The closure receives the call's context and connection; returning an
    /// error ends the call with it.
    pub fn from_conn_fn<F>(
        procedure: impl Into<String>,
        stream_type: StreamType,
        f: F,
        options: HandlerOptions,
    ) -> Self
    where
        F: for<'a> Fn(CallContext, &'a mut HandlerConn) -> BoxFuture<'a, Result<(), ConnectError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            spec: Spec::new(procedure, stream_type, false),
            options: Arc::new(options),
            implementation: implementation(f),
        }
    }

    pub fn unary<F, Fut, Req, Res>(procedure: impl Into<String>, f: F, options: HandlerOptions) -> Self
    where
        F: Fn(CallContext, ConnectRequest<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ConnectResponse<Res>, ConnectError>> + Send + 'static,
        Req: WireMessage + Default + 'static,
        Res: WireMessage + 'static,
    {
        let f = Arc::new(f);
        Self::from_conn_fn(
            procedure,
            StreamType::Unary,
            move |ctx, conn| {
                let f = f.clone();
                Box::pin(async move {
                    let request = single_request::<Req>(conn).await?;
                    let response = f(ctx, request).await?;
                    send_single(conn, response).await
                })
            },
            options,
        )
    }

    pub fn client_stream<F, Fut, Req, Res>(
        procedure: impl Into<String>,
        f: F,
        options: HandlerOptions,
    ) -> Self
    where
        F: Fn(CallContext, ConnectRequest<Streaming<Req>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ConnectResponse<Res>, ConnectError>> + Send + 'static,
        Req: WireMessage + Default + 'static,
        Res: WireMessage + 'static,
    {
        let f = Arc::new(f);
        Self::from_conn_fn(
            procedure,
            StreamType::Client,
            move |ctx, conn| {
                let f = f.clone();
                Box::pin(async move {
                    let request = streaming_request::<Req>(conn)?;
                    let response = f(ctx, request).await?;
                    send_single(conn, response).await
                })
            },
            options,
        )
    }

    pub fn server_stream<F, Fut, S, Req, Res>(
        procedure: impl Into<String>,
        f: F,
        options: HandlerOptions,
    ) -> Self
    where
        F: Fn(CallContext, ConnectRequest<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ConnectResponse<StreamBody<S>>, ConnectError>> + Send + 'static,
        S: Stream<Item = Result<Res, ConnectError>> + Send + 'static,
        Req: WireMessage + Default + 'static,
        Res: WireMessage + 'static,
    {
        let f = Arc::new(f);
        Self::from_conn_fn(
            procedure,
            StreamType::Server,
            move |ctx, conn| {
                let f = f.clone();
                Box::pin(async move {
                    let request = single_request::<Req>(conn).await?;
                    let response = f(ctx, request).await?;
                    send_stream(conn, response).await
                })
            },
            options,
        )
    }

    pub fn bidi_stream<F, Fut, S, Req, Res>(
        procedure: impl Into<String>,
        f: F,
        options: HandlerOptions,
    ) -> Self
    where
        F: Fn(CallContext, ConnectRequest<Streaming<Req>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ConnectResponse<StreamBody<S>>, ConnectError>> + Send + 'static,
        S: Stream<Item = Result<Res, ConnectError>> + Send + 'static,
        Req: WireMessage + Default + 'static,
        Res: WireMessage + 'static,
    {
        let f = Arc::new(f);
        Self::from_conn_fn(
            procedure,
            StreamType::Bidi,
            move |ctx, conn| {
                let f = f.clone();
                Box::pin(async move {
                    let request = streaming_request::<Req>(conn)?;
                    let response = f(ctx, request).await?;
                    send_stream(conn, response).await
                })
            },
            options,
        )
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    /// The route this handler serves, `/package.Service/Method`.
    pub fn procedure(&self) -> &str {
        &self.spec.procedure
    }

    async fn serve<B>(self, request: http::Request<B>) -> http::Response<WireBody>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        let version = parts.version;
        let mut negotiated = match negotiate(&parts, &self.spec, &self.options) {
            Negotiation::Reject(response) => return response,
            Negotiation::Accept(negotiated) => *negotiated,
        };
        let peer = Peer {
            addr: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.to_string())
                .unwrap_or_default(),
            protocol: negotiated.protocol,
        };

        let mut header = parts.headers;
        let mut error = negotiated.error.take();
        if error.is_none() {
            error = self.options.interceptors.apply(&self.spec, &mut header).err();
        }

        let (ctx, cancel) = CallContext::background().with_cancel();
        let ctx = match negotiated.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        };
        let body = body.map_err(|err| -> BoxError { err.into() }).boxed_unsync();
        let (head_tx, head_rx) = oneshot::channel();
        let conn = HandlerConn::new(
            self.spec.clone(),
            peer,
            header,
            negotiated,
            body,
            version,
            ctx.clone(),
            head_tx,
        );
        tokio::spawn(run(self.implementation.clone(), ctx, cancel, conn, error));

        match head_rx.await {
            Ok(response) => response,
            Err(_) => {
                tracing::error!(procedure = %self.spec.procedure, "call ended without a response");
                let mut response = http::Response::new(empty_body());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                *response.version_mut() = version;
                response
            }
        }
    }
}

impl<B> Service<http::Request<B>> for Handler
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<WireBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.serve(request).await) })
    }
}

async fn run(
    implementation: Implementation,
    ctx: CallContext,
    cancel: CancelHandle,
    mut conn: HandlerConn,
    error: Option<ConnectError>,
) {
    let error = match error {
        Some(err) => Some(err),
        None => dispatch(&implementation, ctx, &cancel, &mut conn).await,
    };
    if let Some(err) = &error {
        tracing::debug!(
            procedure = %conn.spec().procedure,
            code = err.code().as_str(),
            "call failed"
        );
    }
    conn.sender.close(error).await;
    cancel.cancel();
}

/// Run the implementation until it finishes, the context fires or the
/// client goes away.
async fn dispatch(
    implementation: &Implementation,
    ctx: CallContext,
    cancel: &CancelHandle,
    conn: &mut HandlerConn,
) -> Option<ConnectError> {
    let procedure = conn.spec().procedure.clone();
    let peer_gone = conn.sender.peer_gone();
    let done = ctx.clone();
    let call = AssertUnwindSafe(implementation(ctx, conn)).catch_unwind();
    tokio::select! {
        biased;
        err = done.done() => Some(err),
        _ = peer_gone => {
            cancel.cancel();
            Some(ConnectError::canceled("client disconnected"))
        }
        outcome = call => match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(procedure = %procedure, panic = %message, "handler panicked");
                Some(ConnectError::internal(format!("panic in {procedure}: {message}")))
            }
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn request_consumed() -> ConnectError {
    ConnectError::internal("request already consumed")
}

async fn single_request<Req>(conn: &mut HandlerConn) -> Result<ConnectRequest<Req>, ConnectError>
where
    Req: WireMessage + Default,
{
    let receiver = conn.receiver().ok_or_else(request_consumed)?;
    let message = receiver.receive_unary::<Req>().await?;
    Ok(ConnectRequest::new(
        message,
        conn.request_header().clone(),
        conn.spec().clone(),
        conn.peer().clone(),
    ))
}

fn streaming_request<Req>(
    conn: &mut HandlerConn,
) -> Result<ConnectRequest<Streaming<Req>>, ConnectError>
where
    Req: WireMessage + Default,
{
    let receiver = conn.take_receiver().ok_or_else(request_consumed)?;
    Ok(ConnectRequest::new(
        Streaming::new(receiver),
        conn.request_header().clone(),
        conn.spec().clone(),
        conn.peer().clone(),
    ))
}

async fn send_single<Res>(
    conn: &mut HandlerConn,
    response: ConnectResponse<Res>,
) -> Result<(), ConnectError>
where
    Res: WireMessage,
{
    let (message, header, trailer) = response.into_parts();
    let sender = conn.sender();
    sender.header_mut().extend(header);
    sender.trailer_mut().extend(trailer);
    sender.send(&message).await
}

async fn send_stream<S, Res>(
    conn: &mut HandlerConn,
    response: ConnectResponse<StreamBody<S>>,
) -> Result<(), ConnectError>
where
    S: Stream<Item = Result<Res, ConnectError>> + Send,
    Res: WireMessage,
{
    let (body, header, trailer) = response.into_parts();
    let sender = conn.sender();
    sender.header_mut().extend(header);
    sender.trailer_mut().extend(trailer);
    sender.flush_head();
    let mut stream = std::pin::pin!(body.into_inner());
    while let Some(message) = stream.next().await {
        sender.send(&message?).await?;
    }
    Ok(())
}
