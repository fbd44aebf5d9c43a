//! Message size limits for handlers.
//!
//! Read and send limits are independent. A read limit is checked against the
//! wire size before a message is buffered and again after decompression; a
//! send limit is checked against the marshaled (or compressed) size.

/// Default read limit (4 MB), matching gRPC's default receive limit.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Configuration for message size limits.
///
/// # Example
///
/// ```rust
/// use connectrpc_wire::MessageLimits;
///
/// // 4 MB reads, unlimited sends
/// let limits = MessageLimits::default();
///
/// // 1 KB both ways
/// let limits = MessageLimits::new(1024).send_max_bytes(1024);
///
/// // No limits at all
/// let limits = MessageLimits::unlimited();
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageLimits {
    /// Largest message accepted from the peer. `None` means unlimited.
    read_max_bytes: Option<usize>,
    /// Largest message written to the peer. `None` means unlimited.
    send_max_bytes: Option<usize>,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            read_max_bytes: Some(DEFAULT_MAX_MESSAGE_SIZE),
            send_max_bytes: None,
        }
    }
}

impl MessageLimits {
    /// Limits with the given read maximum and no send maximum.
    pub fn new(read_max_bytes: usize) -> Self {
        Self {
            read_max_bytes: Some(read_max_bytes),
            send_max_bytes: None,
        }
    }

    /// No limit in either direction.
    ///
    /// # Security Warning
    ///
    /// Unlimited reads let a peer exhaust memory with one large message.
    pub fn unlimited() -> Self {
        Self {
            read_max_bytes: None,
            send_max_bytes: None,
        }
    }

    pub fn read_max_bytes(mut self, max: usize) -> Self {
        self.read_max_bytes = Some(max);
        self
    }

    pub fn send_max_bytes(mut self, max: usize) -> Self {
        self.send_max_bytes = Some(max);
        self
    }

    pub fn read_max(&self) -> Option<usize> {
        self.read_max_bytes
    }

    pub fn send_max(&self) -> Option<usize> {
        self.send_max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = MessageLimits::default();
        assert_eq!(limits.read_max(), Some(DEFAULT_MAX_MESSAGE_SIZE));
        assert_eq!(limits.send_max(), None);
    }

    #[test]
    fn test_independent_limits() {
        let limits = MessageLimits::new(1024).send_max_bytes(2048);
        assert_eq!(limits.read_max(), Some(1024));
        assert_eq!(limits.send_max(), Some(2048));
    }

    #[test]
    fn test_unlimited() {
        let limits = MessageLimits::unlimited();
        assert_eq!(limits.read_max(), None);
        assert_eq!(limits.send_max(), None);
    }
}
