//! What a handler receives.

use std::marker::PhantomData;

use connectrpc_wire_core::{ConnectError, Peer, Spec, WireMessage};
use futures::Stream;
use http::HeaderMap;

use crate::conn::HandlerReceiver;

/// A request message (or message stream) with the call's metadata.
///
/// - `ConnectRequest<T>` carries the single message of a unary or
///   server-streaming call.
/// - `ConnectRequest<Streaming<T>>` carries the messages of a client-streaming
///   or bidi call.
#[derive(Debug)]
pub struct ConnectRequest<T> {
    message: T,
    header: HeaderMap,
    spec: Spec,
    peer: Peer,
}

impl<T> ConnectRequest<T> {
    pub(crate) fn new(message: T, header: HeaderMap, spec: Spec, peer: Peer) -> Self {
        Self {
            message,
            header,
            spec,
            peer,
        }
    }

    pub fn message(&self) -> &T {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut T {
        &mut self.message
    }

    /// Request headers, after interceptors ran.
    pub fn header(&self) -> &HeaderMap {
        &self.header
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn into_inner(self) -> T {
        self.message
    }
}

/// Messages streamed by the client.
///
/// ```ignore
/// async fn sum(
///     _ctx: CallContext,
///     req: ConnectRequest<Streaming<SumRequest>>,
/// ) -> Result<ConnectResponse<SumResponse>, ConnectError> {
///     let mut stream = req.into_inner();
///     let mut sum = 0;
///     while let Some(msg) = stream.message().await? {
///         sum += msg.number;
///     }
///     Ok(ConnectResponse::new(SumResponse { sum }))
/// }
/// ```
#[derive(Debug)]
pub struct Streaming<T> {
    receiver: HandlerReceiver,
    _message: PhantomData<fn() -> T>,
}

impl<T> Streaming<T>
where
    T: WireMessage + Default,
{
    pub(crate) fn new(receiver: HandlerReceiver) -> Self {
        Self {
            receiver,
            _message: PhantomData,
        }
    }

    /// Next message, `Ok(None)` once the client is done sending.
    pub async fn message(&mut self) -> Result<Option<T>, ConnectError> {
        self.receiver.receive().await
    }

    /// Adapt into a [`Stream`]; it ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, ConnectError>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut streaming = state?;
            match streaming.message().await {
                Ok(Some(message)) => Some((Ok(message), Some(streaming))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}
