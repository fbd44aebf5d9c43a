//! Typed wrappers for the streaming call shapes.
//!
//! The wrappers only translate between typed messages and a
//! [`ClientConn`]; none of them look at the protocol.

use std::marker::PhantomData;

use connectrpc_wire_core::{ConnectError, WireMessage};
use futures::Stream;
use http::HeaderMap;

use crate::client::ClientResponse;
use crate::conn::{ClientConn, ClientReceiver, ClientSender};

/// A client-streaming call: many requests, one response.
#[derive(Debug)]
pub struct ClientStreamCall<Req, Res> {
    conn: ClientConn,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> ClientStreamCall<Req, Res>
where
    Req: WireMessage,
    Res: WireMessage + Default,
{
    pub(crate) fn new(conn: ClientConn) -> Self {
        Self {
            conn,
            _marker: PhantomData,
        }
    }

    /// Send one request message.
    ///
    /// An EOF error means the server has already answered; call
    /// [`close_and_receive`](Self::close_and_receive) for the outcome.
    pub async fn send(&mut self, message: &Req) -> Result<(), ConnectError> {
        self.conn.send(message).await
    }

    /// Close the request side and wait for the single response.
    pub async fn close_and_receive(mut self) -> Result<ClientResponse<Res>, ConnectError> {
        self.conn.close_request().await?;
        let message = self.conn.receiver_mut().receive_unary().await?;
        Ok(ClientResponse {
            message,
            header: self.conn.response_header().clone(),
            trailer: self.conn.response_trailer().clone(),
        })
    }
}

/// The response side of a server-streaming or bidi call.
#[derive(Debug)]
pub struct ResponseStream<Res> {
    receiver: ClientReceiver,
    _marker: PhantomData<fn() -> Res>,
}

impl<Res> ResponseStream<Res>
where
    Res: WireMessage + Default,
{
    pub(crate) fn new(receiver: ClientReceiver) -> Self {
        Self {
            receiver,
            _marker: PhantomData,
        }
    }

    /// Next message, or `Ok(None)` when the server finished successfully.
    pub async fn receive(&mut self) -> Result<Option<Res>, ConnectError> {
        self.receiver.receive().await
    }

    /// Response headers, available after the first `receive`.
    pub fn header(&self) -> &HeaderMap {
        self.receiver.header()
    }

    /// Response trailers, complete once `receive` returned `Ok(None)`.
    pub fn trailer(&self) -> &HeaderMap {
        self.receiver.trailer()
    }

    /// Stop reading and discard undelivered messages.
    pub fn close(&mut self) {
        self.receiver.close_response();
    }

    /// Yield messages until the end of the stream or the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Res, ConnectError>> + Send
    where
        Res: 'static,
    {
        futures::stream::unfold(Some(self), |state| async move {
            let mut stream = state?;
            match stream.receive().await {
                Ok(Some(message)) => Some((Ok(message), Some(stream))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

/// The request side of a bidi call.
#[derive(Debug)]
pub struct RequestSender<Req> {
    sender: ClientSender,
    _marker: PhantomData<fn(Req)>,
}

impl<Req> RequestSender<Req>
where
    Req: WireMessage,
{
    pub async fn send(&mut self, message: &Req) -> Result<(), ConnectError> {
        self.sender.send(message).await
    }

    pub async fn close(&mut self) -> Result<(), ConnectError> {
        self.sender.close_request().await
    }
}

/// A bidirectional call. Requires HTTP/2.
///
/// Both directions can be driven at once after [`split`](Self::split).
#[derive(Debug)]
pub struct BidiStreamCall<Req, Res> {
    sender: RequestSender<Req>,
    responses: ResponseStream<Res>,
}

impl<Req, Res> BidiStreamCall<Req, Res>
where
    Req: WireMessage,
    Res: WireMessage + Default,
{
    pub(crate) fn new(conn: ClientConn) -> Self {
        let (sender, receiver) = conn.split();
        Self {
            sender: RequestSender {
                sender,
                _marker: PhantomData,
            },
            responses: ResponseStream::new(receiver),
        }
    }

    pub async fn send(&mut self, message: &Req) -> Result<(), ConnectError> {
        self.sender.send(message).await
    }

    pub async fn close_request(&mut self) -> Result<(), ConnectError> {
        self.sender.close().await
    }

    pub async fn receive(&mut self) -> Result<Option<Res>, ConnectError> {
        self.responses.receive().await
    }

    pub fn close_response(&mut self) {
        self.responses.close();
    }

    pub fn header(&self) -> &HeaderMap {
        self.responses.header()
    }

    pub fn trailer(&self) -> &HeaderMap {
        self.responses.trailer()
    }

    pub fn split(self) -> (RequestSender<Req>, ResponseStream<Res>) {
        (self.sender, self.responses)
    }
}
