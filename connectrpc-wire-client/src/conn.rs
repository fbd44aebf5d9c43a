//! The client side of one call.
//!
//! A [`ClientConn`] pairs a [`ClientSender`] for request messages with a
//! [`ClientReceiver`] for the response. Enveloped calls start the HTTP request
//! as soon as the connection is created and stream the body as messages are
//! sent. Connect unary calls hold their single message and issue the request
//! when the sending half is closed.

use bytes::Bytes;
use connectrpc_wire_core::protocol::{
    connect, content_type, grpc, headers, parse_content_type,
};
use connectrpc_wire_core::timeout::{encode_connect_timeout, encode_grpc_timeout};
use connectrpc_wire_core::{
    CallContext, Code, ConnectError, Envelope, EnvelopeReader, Peer, Protocol, Spec, StreamType,
    TrailerDelivery, UnknownCompression, WireBody, WireFormat, WireMessage, read_body,
};
use http::header::HeaderValue;
use http::{HeaderMap, Method, StatusCode, Version};
use tokio::sync::{mpsc, oneshot};

use crate::builder::ClientConfig;
use crate::transport::{Transport, TransportBody};

type ResponseResult = Result<http::Response<WireBody>, ConnectError>;

/// Request messages buffered ahead of the transport.
const REQUEST_BUFFER: usize = 16;

const USER_AGENT: &str = concat!("connectrpc-wire/", env!("CARGO_PKG_VERSION"));

/// Both halves of a client call.
#[derive(Debug)]
pub struct ClientConn {
    sender: ClientSender,
    receiver: ClientReceiver,
}

impl ClientConn {
    pub(crate) fn new(
        config: &ClientConfig,
        ctx: &CallContext,
        spec: Spec,
        extra: HeaderMap,
    ) -> Self {
        let ctx = match config.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };
        let delivery = TrailerDelivery::for_call(config.protocol, spec.stream_type);
        let mut format = WireFormat::new(config.codec.clone());
        format.send_compression = config.send_compression.clone();
        format.compression = config.compression;
        format.read_max_bytes = config.read_max_bytes;
        format.send_max_bytes = config.send_max_bytes;
        let url = format!("{}{}", config.base_url, spec.procedure);
        let peer = Peer {
            addr: config.authority.clone(),
            protocol: config.protocol,
        };

        let mut header = request_headers(config, &spec, delivery, &ctx);
        header.extend(extra);
        let rejected = match &config.setup_error {
            Some(err) => Some(err.clone()),
            None => config.interceptors.apply(&spec, &mut header).err(),
        };

        let (response_tx, response_rx) = oneshot::channel();
        let mode = if delivery.is_enveloped() {
            let (body_tx, body) = TransportBody::channel(REQUEST_BUFFER);
            if rejected.is_none() {
                let request = build_request(Method::POST, &url, header, body);
                start(config.transport.clone(), request, ctx.clone(), response_tx);
            }
            SendMode::Stream {
                body: Some(body_tx),
            }
        } else {
            SendMode::Unary {
                pending: Some(PendingUnary {
                    transport: config.transport.clone(),
                    url: url.clone(),
                    header,
                    get: config.http_get,
                    response: response_tx,
                }),
                message: None,
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            procedure = %spec.procedure,
            protocol = %config.protocol,
            rejected = rejected.is_some(),
            "starting call"
        );

        let sender = ClientSender {
            format: format.clone(),
            ctx: ctx.clone(),
            mode,
            rejected: rejected.clone(),
            closed: false,
        };
        let receiver = ClientReceiver {
            spec,
            peer,
            protocol: config.protocol,
            delivery,
            format,
            ctx,
            url,
            compressions: config.compressions.clone(),
            response: Some(response_rx),
            source: Source::Waiting,
            header: HeaderMap::new(),
            trailer: HeaderMap::new(),
            done: rejected.map(Err),
        };
        Self { sender, receiver }
    }

    pub fn spec(&self) -> &Spec {
        &self.receiver.spec
    }

    pub fn peer(&self) -> &Peer {
        &self.receiver.peer
    }

    pub async fn send(&mut self, message: &dyn WireMessage) -> Result<(), ConnectError> {
        self.sender.send(message).await
    }

    pub async fn close_request(&mut self) -> Result<(), ConnectError> {
        self.sender.close_request().await
    }

    pub async fn receive<T>(&mut self) -> Result<Option<T>, ConnectError>
    where
        T: WireMessage + Default,
    {
        self.receiver.receive().await
    }

    /// Response headers; empty until the response has arrived.
    pub fn response_header(&self) -> &HeaderMap {
        &self.receiver.header
    }

    /// Response trailers; complete once `receive` has returned `Ok(None)`.
    pub fn response_trailer(&self) -> &HeaderMap {
        &self.receiver.trailer
    }

    /// Split into halves that can be driven from separate tasks.
    pub fn split(self) -> (ClientSender, ClientReceiver) {
        (self.sender, self.receiver)
    }

    pub(crate) fn receiver_mut(&mut self) -> &mut ClientReceiver {
        &mut self.receiver
    }
}

fn request_headers(
    config: &ClientConfig,
    spec: &Spec,
    delivery: TrailerDelivery,
    ctx: &CallContext,
) -> HeaderMap {
    let mut header = config.header.clone();
    set(
        &mut header,
        headers::CONTENT_TYPE,
        &content_type(config.protocol, spec.stream_type, config.codec.name()),
    );
    if !header.contains_key(headers::USER_AGENT) {
        header.insert(headers::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    }
    match config.protocol {
        Protocol::Connect => set(
            &mut header,
            headers::CONNECT_PROTOCOL_VERSION,
            connect::PROTOCOL_VERSION,
        ),
        Protocol::Grpc => set(&mut header, headers::TE, "trailers"),
        Protocol::GrpcWeb => {}
    }
    if delivery.is_enveloped() {
        if let Some(compressor) = &config.send_compression {
            set(&mut header, delivery.encoding_header(), compressor.name());
        }
    }
    if !config.compressions.is_empty() {
        set(
            &mut header,
            delivery.accept_encoding_header(),
            &config.compressions.comma_separated_names(),
        );
    }
    if let Some(remaining) = ctx.remaining() {
        let value = match config.protocol {
            Protocol::Connect => encode_connect_timeout(remaining),
            Protocol::Grpc | Protocol::GrpcWeb => encode_grpc_timeout(remaining),
        };
        set(&mut header, delivery.timeout_header(), &value);
    }
    header
}

fn set(header: &mut HeaderMap, name: http::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        header.insert(name, value);
    }
}

fn build_request(
    method: Method,
    url: &str,
    header: HeaderMap,
    body: TransportBody,
) -> http::Request<TransportBody> {
    let mut request = http::Request::new(body);
    *request.method_mut() = method;
    // The base URL was validated when the client was built.
    if let Ok(uri) = url.parse() {
        *request.uri_mut() = uri;
    }
    *request.headers_mut() = header;
    request
}

fn start(
    transport: Transport,
    request: http::Request<TransportBody>,
    ctx: CallContext,
    response: oneshot::Sender<ResponseResult>,
) {
    tokio::spawn(async move {
        let result = match ctx.run(transport.call(request)).await {
            Ok(result) => result,
            Err(err) => Err(err),
        };
        // The receiver may be gone already.
        let _ = response.send(result);
    });
}

struct PendingUnary {
    transport: Transport,
    url: String,
    header: HeaderMap,
    get: bool,
    response: oneshot::Sender<ResponseResult>,
}

enum SendMode {
    Unary {
        pending: Option<PendingUnary>,
        message: Option<Envelope>,
    },
    Stream {
        body: Option<mpsc::Sender<Bytes>>,
    },
}

impl std::fmt::Debug for SendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendMode::Unary { pending, .. } => f
                .debug_struct("Unary")
                .field("started", &pending.is_none())
                .finish(),
            SendMode::Stream { body } => f
                .debug_struct("Stream")
                .field("open", &body.is_some())
                .finish(),
        }
    }
}

/// Writes request messages.
#[derive(Debug)]
pub struct ClientSender {
    format: WireFormat,
    ctx: CallContext,
    mode: SendMode,
    /// An interceptor refused the call before it started.
    rejected: Option<ConnectError>,
    closed: bool,
}

impl ClientSender {
    /// Send one message.
    ///
    /// If the server has stopped reading this returns an EOF error; the real
    /// outcome comes from the receiving half.
    pub async fn send(&mut self, message: &dyn WireMessage) -> Result<(), ConnectError> {
        if self.closed {
            return Err(ConnectError::failed_precondition("send after close"));
        }
        if let Some(err) = &self.rejected {
            return Err(err.clone());
        }
        if let Some(err) = self.ctx.err() {
            return Err(err);
        }
        let envelope = self.format.encode(message)?;
        match &mut self.mode {
            SendMode::Unary { message, .. } => {
                if message.is_some() {
                    return Err(ConnectError::internal("unary request has multiple messages"));
                }
                *message = Some(envelope);
                Ok(())
            }
            SendMode::Stream { body } => {
                let Some(body) = body else {
                    return Err(ConnectError::eof());
                };
                match self.ctx.run(body.send(envelope.encode())).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(ConnectError::eof()),
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Finish sending. For Connect unary this issues the request.
    pub async fn close_request(&mut self) -> Result<(), ConnectError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match &mut self.mode {
            SendMode::Stream { body } => {
                body.take();
                Ok(())
            }
            SendMode::Unary { pending, message } => {
                let Some(pending) = pending.take() else {
                    return Ok(());
                };
                if let Some(err) = &self.rejected {
                    return Err(err.clone());
                }
                let envelope = message
                    .take()
                    .unwrap_or_else(|| Envelope::message(Bytes::new(), false));
                let request = unary_request(pending.url, pending.header, pending.get, &self.format, envelope)?;
                start(pending.transport, request, self.ctx.clone(), pending.response);
                Ok(())
            }
        }
    }
}

fn unary_request(
    url: String,
    mut header: HeaderMap,
    get: bool,
    format: &WireFormat,
    envelope: Envelope,
) -> Result<http::Request<TransportBody>, ConnectError> {
    let compression = format
        .send_compression
        .as_ref()
        .filter(|_| envelope.is_compressed())
        .map(|c| c.name().to_owned());
    if get {
        let query = connect::GetQuery::new(
            format.codec.name(),
            &envelope.data,
            format.codec.is_binary(),
            compression.as_deref(),
        );
        let url = format!("{url}?{}", query.to_query_string()?);
        header.remove(headers::CONTENT_TYPE);
        header.remove(headers::CONNECT_PROTOCOL_VERSION);
        return Ok(build_request(Method::GET, &url, header, TransportBody::empty()));
    }
    if let Some(value) = compression.and_then(|c| HeaderValue::from_str(&c).ok()) {
        header.insert(headers::CONTENT_ENCODING, value);
    }
    Ok(build_request(
        Method::POST,
        &url,
        header,
        TransportBody::full(envelope.data),
    ))
}

enum Source {
    /// Response head not yet received.
    Waiting,
    /// Connect unary: the whole body is the message.
    Whole(Option<Envelope>),
    Envelopes(EnvelopeReader),
    Finished,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Waiting => f.write_str("Waiting"),
            Source::Whole(_) => f.write_str("Whole"),
            Source::Envelopes(reader) => f.debug_tuple("Envelopes").field(reader).finish(),
            Source::Finished => f.write_str("Finished"),
        }
    }
}

/// How a response stream ended.
enum StreamEnd {
    /// A final envelope carrying the status.
    Envelope(Envelope),
    /// The body ended, possibly with HTTP trailers.
    Body(Option<HeaderMap>),
}

/// Reads response messages, headers and trailers.
#[derive(Debug)]
pub struct ClientReceiver {
    spec: Spec,
    peer: Peer,
    protocol: Protocol,
    delivery: TrailerDelivery,
    format: WireFormat,
    ctx: CallContext,
    url: String,
    compressions: connectrpc_wire_core::CompressionRegistry,
    response: Option<oneshot::Receiver<ResponseResult>>,
    source: Source,
    header: HeaderMap,
    trailer: HeaderMap,
    done: Option<Result<(), ConnectError>>,
}

impl ClientReceiver {
    pub fn header(&self) -> &HeaderMap {
        &self.header
    }

    pub fn trailer(&self) -> &HeaderMap {
        &self.trailer
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Stop reading and drop whatever the server has not delivered yet.
    ///
    /// Later receives return `Ok(None)` unless the call had already failed.
    pub fn close_response(&mut self) {
        self.response = None;
        self.source = Source::Finished;
        self.done.get_or_insert(Ok(()));
    }

    /// Next response message, `Ok(None)` once the server has finished.
    ///
    /// The call's final status is returned here: an error from the server
    /// ends the stream with that error. Errors are sticky.
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
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(procedure = %self.spec.procedure, error = %err, "call failed");
                self.done = Some(Err(err.clone()));
            }
        }
        next
    }

    /// Exactly one response message followed by a clean end.
    pub(crate) async fn receive_unary<T>(&mut self) -> Result<T, ConnectError>
    where
        T: WireMessage + Default,
    {
        let Some(message) = self.receive::<T>().await? else {
            return Err(ConnectError::unknown("unary response has no message"));
        };
        if self.receive::<T>().await?.is_some() {
            return Err(ConnectError::unknown("unary response has multiple messages"));
        }
        Ok(message)
    }

    async fn next_envelope(&mut self) -> Result<Option<Envelope>, ConnectError> {
        if let Some(response) = self.response.take() {
            let response = response
                .await
                .map_err(|_| ConnectError::canceled("call abandoned before a response"))??;
            let (parts, body) = response.into_parts();
            match self.delivery {
                TrailerDelivery::UnaryHeaders => self.accept_unary(parts, body).await?,
                _ => self.accept_stream(parts, body)?,
            }
        }
        let end = match &mut self.source {
            Source::Waiting | Source::Finished => return Ok(None),
            Source::Whole(slot) => return Ok(slot.take()),
            Source::Envelopes(reader) => match reader.next().await {
                Ok(Some(envelope)) if !envelope.is_final() => return Ok(Some(envelope)),
                Ok(Some(envelope)) => StreamEnd::Envelope(envelope),
                Ok(None) => StreamEnd::Body(reader.take_trailers()),
                Err(err) => return Err(framing_error(err)),
            },
        };
        self.source = Source::Finished;
        match end {
            StreamEnd::Envelope(envelope) => self.finish_with_envelope(envelope),
            StreamEnd::Body(trailer) => self.finish_with_trailers(trailer),
        }
        .map(|()| None)
    }

    async fn accept_unary(
        &mut self,
        parts: http::response::Parts,
        body: WireBody,
    ) -> Result<(), ConnectError> {
        let (header, trailer) = connect::split_unary_trailers(&parts.headers);
        self.header = header;
        self.trailer = trailer;
        let compression = self.response_compression(&parts.headers);
        let (data, _) = read_body(body, self.format.read_max_bytes)
            .await
            .map_err(framing_error)?;
        if parts.status != StatusCode::OK {
            let data = match compression {
                Ok(Some(compressor)) if !data.is_empty() => compressor
                    .decompress(&data, self.format.read_max_bytes)
                    .unwrap_or(data),
                _ => data,
            };
            return Err(connect::parse_error_body(parts.status, &parts.headers, &data));
        }
        self.format.recv_compression = compression?;
        let compressed = self.format.recv_compression.is_some() && !data.is_empty();
        self.source = Source::Whole(Some(Envelope::message(data, compressed)));
        Ok(())
    }

    fn accept_stream(
        &mut self,
        parts: http::response::Parts,
        body: WireBody,
    ) -> Result<(), ConnectError> {
        if self.spec.stream_type == StreamType::Bidi && parts.version < Version::HTTP_2 {
            return Err(ConnectError::unimplemented(format!(
                "response from {} is {:?}: bidi streams require at least HTTP/2",
                self.url, parts.version
            )));
        }
        if parts.status != StatusCode::OK {
            return Err(connect::http_status_error(parts.status, parts.headers));
        }
        if self.protocol != Protocol::Connect && parts.headers.contains_key(headers::GRPC_STATUS) {
            // Trailers-only: the status arrived with the head.
            self.source = Source::Finished;
            let status = grpc::parse_status(&parts.headers)?;
            let mut trailer = parts.headers;
            grpc::strip_status(&mut trailer);
            self.trailer = trailer;
            return status.map_or(Ok(()), Err);
        }

        let expected = content_type(self.protocol, self.spec.stream_type, self.format.codec.name());
        let raw = parts
            .headers
            .get(headers::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let matches = parse_content_type(raw)
            .is_ok_and(|ct| ct.protocol == self.protocol && ct.codec == self.format.codec.name());
        if !matches {
            return Err(ConnectError::internal(format!(
                "invalid content-type {raw:?}; expecting {expected:?}"
            )));
        }

        self.format.recv_compression = self.response_compression(&parts.headers)?;
        self.header = parts.headers;
        self.source = Source::Envelopes(EnvelopeReader::new(body, self.format.read_max_bytes));
        Ok(())
    }

    fn response_compression(
        &self,
        header: &HeaderMap,
    ) -> Result<Option<connectrpc_wire_core::BoxedCompressor>, ConnectError> {
        let name = header
            .get(self.delivery.encoding_header())
            .and_then(|v| v.to_str().ok());
        self.compressions
            .resolve(name)
            .map_err(|UnknownCompression(name)| {
                ConnectError::internal(format!(
                    "unknown encoding \"{name}\": accepted encodings are {}",
                    self.compressions.comma_separated_names()
                ))
            })
    }

    /// Handle the end-of-stream or trailer envelope.
    fn finish_with_envelope(&mut self, envelope: Envelope) -> Result<(), ConnectError> {
        let flags = envelope.flags;
        match self.delivery {
            TrailerDelivery::EndStreamMessage if envelope.is_end_stream() => {
                let data = self.format.decompress(envelope)?;
                let (trailer, error) = connect::parse_end_stream(&data)?;
                self.trailer = trailer;
                error.map_or(Ok(()), Err)
            }
            TrailerDelivery::TrailerFrame if envelope.is_trailer() => {
                let data = self.format.decompress(envelope)?;
                let trailer = grpc::parse_trailer_block(&data)?;
                self.finish_with_trailers(Some(trailer))
            }
            _ => Err(ConnectError::internal(format!(
                "protocol error: unexpected envelope flags 0x{flags:02x}"
            ))),
        }
    }

    /// Handle the end of the body (or a decoded trailer block).
    fn finish_with_trailers(&mut self, trailer: Option<HeaderMap>) -> Result<(), ConnectError> {
        if self.protocol == Protocol::Connect {
            return Err(ConnectError::internal(
                "protocol error: missing end-of-stream message",
            ));
        }
        let mut trailer = trailer.unwrap_or_default();
        let status = grpc::parse_status(&trailer)?;
        grpc::strip_status(&mut trailer);
        self.trailer = trailer;
        status.map_or(Ok(()), Err)
    }
}

/// Framing problems in a response are the server's fault.
fn framing_error(err: ConnectError) -> ConnectError {
    if err.code() == Code::InvalidArgument && !err.is_wire_error() {
        ConnectError::new(Code::Internal, err.message().unwrap_or_default())
    } else {
        err
    }
}
