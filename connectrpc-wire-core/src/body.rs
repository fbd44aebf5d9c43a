//! Reading envelopes and whole messages out of an HTTP body.

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;

use crate::envelope::{Envelope, EnvelopeDecoder};
use crate::error::{ConnectError, EnvelopeError};

/// Boxed error used by bodies and transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The body type carried in both directions.
pub type WireBody = UnsyncBoxBody<Bytes, BoxError>;

/// An empty [`WireBody`].
pub fn empty_body() -> WireBody {
    http_body_util::Empty::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// A [`WireBody`] holding one buffer.
pub fn full_body(data: impl Into<Bytes>) -> WireBody {
    http_body_util::Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Pull envelopes out of a body, keeping any HTTP trailers it ends with.
pub struct EnvelopeReader {
    body: WireBody,
    decoder: EnvelopeDecoder,
    trailers: Option<HeaderMap>,
    finished: bool,
}

impl EnvelopeReader {
    pub fn new(body: WireBody, read_max: Option<usize>) -> Self {
        Self {
            body,
            decoder: EnvelopeDecoder::new(read_max),
            trailers: None,
            finished: false,
        }
    }

    /// Next envelope, or `None` once the body ends cleanly.
    ///
    /// Ending mid-frame is a protocol error; a failing body maps through
    /// `on_body_error`.
    pub async fn next(&mut self) -> Result<Option<Envelope>, ConnectError> {
        loop {
            if let Some(envelope) = self.decoder.decode()? {
                return Ok(Some(envelope));
            }
            if self.finished {
                self.decoder.finish()?;
                return Ok(None);
            }
            match self.body.frame().await {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => self.decoder.push(&data),
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            merge_trailers(&mut self.trailers, trailers);
                        }
                    }
                },
                Some(Err(e)) => return Err(body_error(e)),
                None => self.finished = true,
            }
        }
    }

    /// HTTP trailers received so far.
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    pub fn take_trailers(&mut self) -> Option<HeaderMap> {
        self.trailers.take()
    }

    /// Read the body to its end without decoding, for trailers.
    pub async fn drain(&mut self) -> Result<(), ConnectError> {
        while !self.finished {
            match self.body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        merge_trailers(&mut self.trailers, trailers);
                    }
                }
                Some(Err(e)) => return Err(body_error(e)),
                None => self.finished = true,
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for EnvelopeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeReader")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

fn merge_trailers(slot: &mut Option<HeaderMap>, trailers: HeaderMap) {
    match slot {
        Some(existing) => existing.extend(trailers),
        None => *slot = Some(trailers),
    }
}

/// Map a failing body read.
///
/// A [`ConnectError`] travelling through the body keeps its code.
pub fn body_error(err: BoxError) -> ConnectError {
    match err.downcast::<ConnectError>() {
        Ok(err) => *err,
        Err(err) => ConnectError::unknown(format!("read body: {err}")),
    }
}

/// Read a whole body, failing once more than `read_max` bytes arrive.
///
/// The count keeps going past the limit so the error reports the full size.
pub async fn read_body(
    mut body: WireBody,
    read_max: Option<usize>,
) -> Result<(Bytes, Option<HeaderMap>), ConnectError> {
    let mut buffer = BytesMut::new();
    let mut total = 0usize;
    let mut trailers = None;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(body_error)?;
        match frame.into_data() {
            Ok(data) => {
                total += data.len();
                match read_max {
                    Some(max) if total > max => {}
                    _ => buffer.extend_from_slice(&data),
                }
            }
            Err(frame) => {
                if let Ok(t) = frame.into_trailers() {
                    merge_trailers(&mut trailers, t);
                }
            }
        }
    }
    if let Some(max) = read_max {
        if total > max {
            return Err(EnvelopeError::TooLarge { size: total, max }.into());
        }
    }
    Ok((buffer.freeze(), trailers))
}
