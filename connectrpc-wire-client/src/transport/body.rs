//! Request body types for HTTP transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use connectrpc_wire_core::BoxError;
use futures::Stream;
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pin_project! {
    /// A request body.
    ///
    /// - `Empty` for Connect GET
    /// - `Full` for Connect unary POST
    /// - `Streaming` for enveloped calls, fed as messages are sent
    #[project = TransportBodyProj]
    pub enum TransportBody {
        Empty,
        Full {
            data: Option<Bytes>,
        },
        Streaming {
            #[pin]
            stream: Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>,
        },
    }
}

impl TransportBody {
    pub fn empty() -> Self {
        TransportBody::Empty
    }

    pub fn full(data: Bytes) -> Self {
        TransportBody::Full { data: Some(data) }
    }

    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BoxError>> + Send + 'static,
    {
        TransportBody::Streaming {
            stream: Box::pin(stream),
        }
    }

    /// A body fed by a channel; dropping the sender ends it.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel::<Bytes>(buffer);
        let stream = futures::StreamExt::map(ReceiverStream::new(rx), Ok::<_, BoxError>);
        (tx, Self::streaming(stream))
    }
}

impl Body for TransportBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            TransportBodyProj::Empty => Poll::Ready(None),
            TransportBodyProj::Full { data } => Poll::Ready(data.take().map(|d| Ok(Frame::data(d)))),
            TransportBodyProj::Streaming { stream } => match stream.poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(Frame::data(data)))),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            TransportBody::Empty => true,
            TransportBody::Full { data } => data.is_none(),
            TransportBody::Streaming { .. } => false,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            TransportBody::Empty => http_body::SizeHint::with_exact(0),
            TransportBody::Full { data } => {
                http_body::SizeHint::with_exact(data.as_ref().map_or(0, |d| d.len() as u64))
            }
            TransportBody::Streaming { .. } => http_body::SizeHint::default(),
        }
    }
}

impl Default for TransportBody {
    fn default() -> Self {
        TransportBody::Empty
    }
}

impl std::fmt::Debug for TransportBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportBody::Empty => write!(f, "TransportBody::Empty"),
            TransportBody::Full { data } => f
                .debug_struct("TransportBody::Full")
                .field("data_len", &data.as_ref().map(|d| d.len()))
                .finish(),
            TransportBody::Streaming { .. } => write!(f, "TransportBody::Streaming"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_empty_and_full() {
        let body = TransportBody::empty();
        assert!(body.is_end_stream());
        assert!(body.collect().await.unwrap().to_bytes().is_empty());

        let body = TransportBody::full(Bytes::from("hello"));
        assert_eq!(body.size_hint().exact(), Some(5));
        assert_eq!(body.collect().await.unwrap().to_bytes(), "hello");
    }

    #[tokio::test]
    async fn test_channel_body_ends_when_sender_drops() {
        let (tx, body) = TransportBody::channel(4);
        tx.send(Bytes::from("one,")).await.unwrap();
        tx.send(Bytes::from("two")).await.unwrap();
        drop(tx);
        assert_eq!(body.collect().await.unwrap().to_bytes(), "one,two");
    }
}
