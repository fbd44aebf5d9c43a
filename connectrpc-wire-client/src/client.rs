//! The client entry point and the unary call.

use std::sync::Arc;

use connectrpc_wire_core::{
    CallContext, ConnectError, Protocol, Spec, StreamType, WireMessage,
};
use http::HeaderMap;

use crate::builder::{ClientBuilder, ClientConfig};
use crate::conn::ClientConn;
use crate::stream::{BidiStreamCall, ClientStreamCall, ResponseStream};

/// A request message with its headers.
#[derive(Debug, Clone, Default)]
pub struct ClientRequest<T> {
    pub message: T,
    pub header: HeaderMap,
}

impl<T> ClientRequest<T> {
    pub fn new(message: T) -> Self {
        Self {
            message,
            header: HeaderMap::new(),
        }
    }

    pub fn header_mut(&mut self) -> &mut HeaderMap {
        &mut self.header
    }
}

impl<T> From<T> for ClientRequest<T> {
    fn from(message: T) -> Self {
        Self::new(message)
    }
}

/// A response message with the headers and trailers it arrived with.
#[derive(Debug, Clone, Default)]
pub struct ClientResponse<T> {
    pub message: T,
    pub header: HeaderMap,
    pub trailer: HeaderMap,
}

impl<T> ClientResponse<T> {
    pub fn into_inner(self) -> T {
        self.message
    }
}

/// A client for one base URL.
///
/// Cloning is cheap; clones share configuration and the connection pool.
///
/// # Example
///
/// ```ignore
/// let client = ConnectClient::builder("http://localhost:3000").build()?;
/// let response = client
///     .unary::<PingRequest, PingResponse>(
///         &CallContext::background(),
///         "/connect.ping.v1.PingService/Ping",
///         PingRequest { number: 42 }.into(),
///     )
///     .await?;
/// ```
#[derive(Clone, Debug)]
pub struct ConnectClient {
    config: Arc<ClientConfig>,
}

impl ConnectClient {
    pub fn builder<S: Into<String>>(base_url: S) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub(crate) fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn protocol(&self) -> Protocol {
        self.config.protocol
    }

    /// Open a raw connection for `procedure`.
    ///
    /// Streaming calls start immediately; a Connect unary call starts when
    /// the request side is closed.
    pub fn conn(
        &self,
        ctx: &CallContext,
        procedure: &str,
        stream_type: StreamType,
        header: HeaderMap,
    ) -> ClientConn {
        let spec = Spec::new(procedure, stream_type, true);
        ClientConn::new(&self.config, ctx, spec, header)
    }

    /// Send one message and wait for one response.
    pub async fn unary<Req, Res>(
        &self,
        ctx: &CallContext,
        procedure: &str,
        request: ClientRequest<Req>,
    ) -> Result<ClientResponse<Res>, ConnectError>
    where
        Req: WireMessage,
        Res: WireMessage + Default,
    {
        let mut conn = self.conn(ctx, procedure, StreamType::Unary, request.header);
        send_all(&mut conn, &request.message).await?;
        let message = conn.receiver_mut().receive_unary().await?;
        let (_, receiver) = conn.split();
        Ok(ClientResponse {
            message,
            header: receiver.header().clone(),
            trailer: receiver.trailer().clone(),
        })
    }

    /// Open a client-streaming call.
    pub fn client_stream<Req, Res>(
        &self,
        ctx: &CallContext,
        procedure: &str,
        header: HeaderMap,
    ) -> ClientStreamCall<Req, Res>
    where
        Req: WireMessage,
        Res: WireMessage + Default,
    {
        ClientStreamCall::new(self.conn(ctx, procedure, StreamType::Client, header))
    }

    /// Send one message and stream the responses.
    pub async fn server_stream<Req, Res>(
        &self,
        ctx: &CallContext,
        procedure: &str,
        request: ClientRequest<Req>,
    ) -> Result<ResponseStream<Res>, ConnectError>
    where
        Req: WireMessage,
        Res: WireMessage + Default,
    {
        let mut conn = self.conn(ctx, procedure, StreamType::Server, request.header);
        send_all(&mut conn, &request.message).await?;
        let (_, receiver) = conn.split();
        Ok(ResponseStream::new(receiver))
    }

    /// Open a bidirectional call.
    pub fn bidi_stream<Req, Res>(
        &self,
        ctx: &CallContext,
        procedure: &str,
        header: HeaderMap,
    ) -> BidiStreamCall<Req, Res>
    where
        Req: WireMessage,
        Res: WireMessage + Default,
    {
        BidiStreamCall::new(self.conn(ctx, procedure, StreamType::Bidi, header))
    }
}

/// Send the only request message and close the request side.
///
/// An EOF means the server answered early; its answer comes from receive.
async fn send_all(conn: &mut ClientConn, message: &dyn WireMessage) -> Result<(), ConnectError> {
    match conn.send(message).await {
        Err(err) if !err.is_eof() => return Err(err),
        _ => {}
    }
    conn.close_request().await
}
