//! Request and response wrappers handed to and returned by handlers.

mod request;
mod response;

pub use request::{ConnectRequest, Streaming};
pub use response::{ConnectResponse, StreamBody};
