//! What a handler returns.

use http::HeaderMap;

/// A response message (or [`StreamBody`]) plus headers and trailers.
#[derive(Debug, Clone)]
pub struct ConnectResponse<T> {
    message: T,
    header: HeaderMap,
    trailer: HeaderMap,
}

impl<T> ConnectResponse<T> {
    pub fn new(message: T) -> Self {
        Self {
            message,
            header: HeaderMap::new(),
            trailer: HeaderMap::new(),
        }
    }

    pub fn message(&self) -> &T {
        &self.message
    }

    pub fn header(&self) -> &HeaderMap {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut HeaderMap {
        &mut self.header
    }

    pub fn trailer(&self) -> &HeaderMap {
        &self.trailer
    }

    /// Trailers sent after the last message.
    pub fn trailer_mut(&mut self) -> &mut HeaderMap {
        &mut self.trailer
    }

    pub fn into_inner(self) -> T {
        self.message
    }

    pub fn into_parts(self) -> (T, HeaderMap, HeaderMap) {
        (self.message, self.header, self.trailer)
    }
}

impl<T> From<T> for ConnectResponse<T> {
    fn from(message: T) -> Self {
        Self::new(message)
    }
}

/// Response messages of a server-streaming or bidi call.
///
/// Wrap any `Stream<Item = Result<T, ConnectError>>`; the first error ends
/// the call with that error.
#[derive(Debug)]
pub struct StreamBody<S> {
    stream: S,
}

impl<S> StreamBody<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
