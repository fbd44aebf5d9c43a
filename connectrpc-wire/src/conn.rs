//! The handler side of one call.
//!
//! [`HandlerReceiver`] yields request messages; [`HandlerSender`] writes the
//! response head, messages and the final status in whichever form the
//! negotiated protocol uses.

use std::future::Future;

use bytes::Bytes;
use connectrpc_wire_core::envelope::envelope_flags;
use connectrpc_wire_core::protocol::{connect, grpc, headers};
use connectrpc_wire_core::{
    BoxError, CallContext, ConnectError, Envelope, EnvelopeError, EnvelopeReader, Peer,
    Spec, TrailerDelivery, WireBody, WireFormat, WireMessage, read_body,
};
use http::{HeaderMap, HeaderValue, StatusCode, Version};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::negotiate::Negotiated;

type FrameSender = mpsc::Sender<Result<Frame<Bytes>, BoxError>>;

/// Response frames buffered ahead of the peer.
const RESPONSE_BUFFER: usize = 16;

/// Both halves of a call, as seen by a handler.
#[derive(Debug)]
pub struct HandlerConn {
    spec: Spec,
    peer: Peer,
    request_header: HeaderMap,
    pub(crate) receiver: Option<HandlerReceiver>,
    pub(crate) sender: HandlerSender,
}

impl HandlerConn {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        spec: Spec,
        peer: Peer,
        request_header: HeaderMap,
        negotiated: Negotiated,
        body: WireBody,
        version: Version,
        ctx: CallContext,
        head: oneshot::Sender<http::Response<WireBody>>,
    ) -> Self {
        let source = match &negotiated.get {
            Some(query) => Source::Query(Some(query.payload())),
            None if negotiated.delivery.is_enveloped() => Source::Envelopes(EnvelopeReader::new(
                body,
                negotiated.format.read_max_bytes,
            )),
            None => Source::Whole(Some(body)),
        };
        let receiver = HandlerReceiver {
            spec: spec.clone(),
            peer: peer.clone(),
            header: request_header.clone(),
            format: negotiated.format.clone(),
            source,
            ctx: ctx.clone(),
            done: None,
        };

        let (frames, rx) = mpsc::channel(RESPONSE_BUFFER);
        let response_body = StreamBody::new(ReceiverStream::new(rx)).boxed_unsync();
        let sender = HandlerSender {
            spec: spec.clone(),
            delivery: negotiated.delivery,
            content_type: negotiated.content_type,
            format: negotiated.format,
            accept_encoding: negotiated.accept_encoding,
            version,
            header: HeaderMap::new(),
            trailer: HeaderMap::new(),
            head: Some((head, response_body)),
            frames: Some(frames),
            unary: None,
            ctx,
            closed: false,
        };
        Self {
            spec,
            peer,
            request_header,
            receiver: Some(receiver),
            sender,
        }
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn request_header(&self) -> &HeaderMap {
        &self.request_header
    }

    /// The receiving half, until it has been taken.
    pub fn receiver(&mut self) -> Option<&mut HandlerReceiver> {
        self.receiver.as_mut()
    }

    pub fn take_receiver(&mut self) -> Option<HandlerReceiver> {
        self.receiver.take()
    }

    pub fn sender(&mut self) -> &mut HandlerSender {
        &mut self.sender
    }
}

enum Source {
    /// Connect unary POST: the whole body is one message.
    Whole(Option<WireBody>),
    /// Connect unary GET: the message came in the query.
    Query(Option<Result<Bytes, ConnectError>>),
    Envelopes(EnvelopeReader),
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Whole(_) => f.write_str("Whole"),
            Source::Query(_) => f.write_str("Query"),
            Source::Envelopes(reader) => f.debug_tuple("Envelopes").field(reader).finish(),
        }
    }
}

/// Reads request messages.
#[derive(Debug)]
pub struct HandlerReceiver {
    spec: Spec,
    peer: Peer,
    header: HeaderMap,
    format: WireFormat,
    source: Source,
    ctx: CallContext,
    /// Sticky outcome once the request stream has ended or failed.
    done: Option<Result<(), ConnectError>>,
}

impl HandlerReceiver {
    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn header(&self) -> &HeaderMap {
        &self.header
    }

    /// Next request message, `Ok(None)` once the client has finished sending.
    ///
    /// Errors are sticky: every later call returns the same error.
    pub async fn receive<T>(&mut self) -> Result<Option<T>, ConnectError>
    where
        T: WireMessage + Default,
    {
        if let Some(done) = &self.done {
            return done.clone().map(|()| None);
        }
        let ctx = self.ctx.clone();
        let next = match ctx.run(self.next_envelope()).await {
            Ok(next) => next,
            Err(err) => Err(err),
        };
        let next = next.and_then(|envelope| match envelope {
            Some(envelope) => {
                let mut message = T::default();
                self.format.decode(envelope, &mut message)?;
                Ok(Some(message))
            }
            None => Ok(None),
        });
        match &next {
            Ok(Some(_)) => {}
            Ok(None) => self.done = Some(Ok(())),
            Err(err) => self.done = Some(Err(err.clone())),
        }
        next
    }

    /// Exactly one request message.
    pub(crate) async fn receive_unary<T>(&mut self) -> Result<T, ConnectError>
    where
        T: WireMessage + Default,
    {
        let Some(message) = self.receive::<T>().await? else {
            return Err(ConnectError::unknown("unary request has no message"));
        };
        if self.receive::<T>().await?.is_some() {
            return Err(ConnectError::unknown("unary request has multiple messages"));
        }
        Ok(message)
    }

    async fn next_envelope(&mut self) -> Result<Option<Envelope>, ConnectError> {
        let compressed = self.format.recv_compression.is_some();
        match &mut self.source {
            Source::Whole(body) => {
                let Some(body) = body.take() else {
                    return Ok(None);
                };
                let (data, _) = read_body(body, self.format.read_max_bytes).await?;
                let compressed = compressed && !data.is_empty();
                Ok(Some(Envelope::message(data, compressed)))
            }
            Source::Query(payload) => {
                let Some(payload) = payload.take() else {
                    return Ok(None);
                };
                let data = payload?;
                if let Some(max) = self.format.read_max_bytes {
                    if data.len() > max {
                        return Err(EnvelopeError::TooLarge {
                            size: data.len(),
                            max,
                        }
                        .into());
                    }
                }
                let compressed = compressed && !data.is_empty();
                Ok(Some(Envelope::message(data, compressed)))
            }
            Source::Envelopes(reader) => match reader.next().await? {
                Some(envelope) if envelope.is_final() => {
                    Err(EnvelopeError::InvalidFlags(envelope.flags).into())
                }
                next => Ok(next),
            },
        }
    }
}

/// Writes the response.
///
/// Headers and trailers may be edited until the head is flushed (headers) or
/// the sender is closed (trailers).
#[derive(Debug)]
pub struct HandlerSender {
    spec: Spec,
    delivery: TrailerDelivery,
    content_type: String,
    format: WireFormat,
    accept_encoding: String,
    version: Version,
    header: HeaderMap,
    trailer: HeaderMap,
    /// Pending response head and the body it will carry.
    head: Option<(oneshot::Sender<http::Response<WireBody>>, WireBody)>,
    frames: Option<FrameSender>,
    /// Connect unary holds its single message until close.
    unary: Option<Envelope>,
    ctx: CallContext,
    closed: bool,
}

impl HandlerSender {
    pub fn header(&self) -> &HeaderMap {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut HeaderMap {
        &mut self.header
    }

    pub fn trailer(&self) -> &HeaderMap {
        &self.trailer
    }

    pub fn trailer_mut(&mut self) -> &mut HeaderMap {
        &mut self.trailer
    }

    /// Write one response message.
    ///
    /// A vanished client surfaces as an EOF error; use [`close`](Self::close)
    /// to report the real status.
    pub async fn send(&mut self, message: &dyn WireMessage) -> Result<(), ConnectError> {
        if self.closed {
            return Err(ConnectError::failed_precondition("send after close"));
        }
        if let Some(err) = self.ctx.err() {
            return Err(err);
        }
        let envelope = self.format.encode(message)?;
        if !self.delivery.is_enveloped() {
            if self.unary.is_some() {
                return Err(ConnectError::internal("unary response has multiple messages"));
            }
            self.unary = Some(envelope);
            return Ok(());
        }
        self.flush_head();
        let Some(frames) = &self.frames else {
            return Err(ConnectError::eof());
        };
        match self.ctx.run(frames.send(Ok(Frame::data(envelope.encode())))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConnectError::eof()),
            Err(err) => Err(err),
        }
    }

    /// Finish the response with `error` (or success) and the trailers.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&mut self, error: Option<ConnectError>) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.delivery {
            TrailerDelivery::UnaryHeaders => self.close_unary(error).await,
            TrailerDelivery::EndStreamMessage => {
                self.flush_head();
                let payload = connect::end_stream_payload(error.as_ref(), &self.trailer);
                let envelope = Envelope::new(envelope_flags::END_STREAM, payload);
                self.finish(Frame::data(envelope.encode())).await;
            }
            TrailerDelivery::HttpTrailers => {
                let trailers = grpc::status_trailers(error.as_ref(), &self.trailer);
                if self.head.is_some() && error.is_some() {
                    // Trailers-only: the status rides in the head, the body stays empty.
                    let mut head = self.response_headers(None);
                    head.extend(trailers);
                    self.send_head(StatusCode::OK, head);
                } else {
                    self.flush_head();
                    self.finish(Frame::trailers(trailers)).await;
                }
            }
            TrailerDelivery::TrailerFrame => {
                self.flush_head();
                let trailers = grpc::status_trailers(error.as_ref(), &self.trailer);
                let block = grpc::encode_trailer_block(&trailers);
                let envelope = Envelope::new(envelope_flags::TRAILER, block);
                self.finish(Frame::data(envelope.encode())).await;
            }
        }
        self.frames = None;
    }

    /// Send the response head now if it has not gone out yet.
    pub(crate) fn flush_head(&mut self) {
        if self.head.is_some() {
            let encoding = self
                .format
                .send_compression
                .as_ref()
                .map(|c| c.name().to_owned());
            let head = self.response_headers(encoding.as_deref());
            self.send_head(StatusCode::OK, head);
        }
    }

    /// Resolves once the client has stopped reading the response.
    pub(crate) fn peer_gone(&self) -> impl Future<Output = ()> + Send + 'static {
        let frames = self.frames.clone();
        async move {
            match frames {
                Some(frames) => frames.closed().await,
                None => std::future::pending().await,
            }
        }
    }

    async fn close_unary(&mut self, error: Option<ConnectError>) {
        let error = match (error, self.unary.take()) {
            (None, Some(envelope)) => {
                let encoding = self
                    .format
                    .send_compression
                    .as_ref()
                    .filter(|_| envelope.is_compressed())
                    .map(|c| c.name().to_owned());
                let mut head = self.response_headers(encoding.as_deref());
                connect::merge_unary_trailers(&mut head, &self.trailer);
                self.send_head(StatusCode::OK, head);
                if !envelope.data.is_empty() {
                    self.finish(Frame::data(envelope.data)).await;
                }
                return;
            }
            (None, None) => ConnectError::internal("unary response has no message"),
            (Some(err), _) => err,
        };
        let mut head = self.response_headers(None);
        head.insert(
            headers::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        for (name, value) in error.meta() {
            head.append(name.clone(), value.clone());
        }
        connect::merge_unary_trailers(&mut head, &self.trailer);
        self.send_head(error.code().http_status(), head);
        self.finish(Frame::data(connect::error_body(&error))).await;
    }

    fn response_headers(&self, encoding: Option<&str>) -> HeaderMap {
        let mut head = self.header.clone();
        if let Ok(value) = HeaderValue::from_str(&self.content_type) {
            head.insert(headers::CONTENT_TYPE, value);
        }
        if let Some(value) = encoding.and_then(|e| HeaderValue::from_str(e).ok()) {
            head.insert(self.delivery.encoding_header(), value);
        }
        if !self.accept_encoding.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.accept_encoding) {
                head.insert(self.delivery.accept_encoding_header(), value);
            }
        }
        head
    }

    fn send_head(&mut self, status: StatusCode, head: HeaderMap) {
        let Some((tx, body)) = self.head.take() else {
            return;
        };
        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = self.version;
        *response.headers_mut() = head;
        if tx.send(response).is_err() {
            tracing::trace!(procedure = %self.spec.procedure, "response head dropped");
        }
    }

    async fn finish(&mut self, frame: Frame<Bytes>) {
        if let Some(frames) = &self.frames {
            if frames.send(Ok(frame)).await.is_err() {
                tracing::trace!(procedure = %self.spec.procedure, "client gone before final frame");
            }
        }
    }
}
