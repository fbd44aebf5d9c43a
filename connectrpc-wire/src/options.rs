//! Per-procedure handler configuration.

use std::time::Duration;

use connectrpc_wire_core::{
    Codec, CodecRegistry, CompressionConfig, CompressionRegistry, Compressor, Interceptor,
    InterceptorChain,
};

use crate::limits::MessageLimits;

/// Options shared by every call to one handler.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use connectrpc_wire::HandlerOptions;
///
/// let options = HandlerOptions::new()
///     .read_max_bytes(1024)
///     .compress_min_bytes(8)
///     .allow_get(true)
///     .timeout(Duration::from_secs(5));
/// ```
#[derive(Clone, Debug)]
pub struct HandlerOptions {
    pub(crate) limits: MessageLimits,
    pub(crate) compression: CompressionConfig,
    pub(crate) compressions: CompressionRegistry,
    pub(crate) codecs: CodecRegistry,
    pub(crate) require_connect_protocol_header: bool,
    pub(crate) allow_get: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) interceptors: InterceptorChain,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            limits: MessageLimits::default(),
            compression: CompressionConfig::default(),
            compressions: CompressionRegistry::with_defaults(),
            codecs: CodecRegistry::default(),
            require_connect_protocol_header: false,
            allow_get: false,
            timeout: None,
            interceptors: InterceptorChain::new(),
        }
    }
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limits(mut self, limits: MessageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn read_max_bytes(mut self, max: usize) -> Self {
        self.limits = self.limits.read_max_bytes(max);
        self
    }

    pub fn send_max_bytes(mut self, max: usize) -> Self {
        self.limits = self.limits.send_max_bytes(max);
        self
    }

    /// Only compress responses at least this large.
    pub fn compress_min_bytes(mut self, min: usize) -> Self {
        self.compression = CompressionConfig::new(min);
        self
    }

    /// Register an extra compressor, replacing one with the same name.
    pub fn compressor<C: Compressor>(mut self, compressor: C) -> Self {
        self.compressions.register(compressor);
        self
    }

    /// Replace the whole compression registry.
    pub fn compressions(mut self, registry: CompressionRegistry) -> Self {
        self.compressions = registry;
        self
    }

    /// Register an extra codec, replacing one with the same name.
    pub fn codec<C: Codec>(mut self, codec: C) -> Self {
        self.codecs.register(codec);
        self
    }

    pub fn codecs(mut self, registry: CodecRegistry) -> Self {
        self.codecs = registry;
        self
    }

    /// Reject Connect requests without `Connect-Protocol-Version`.
    pub fn require_connect_protocol_header(mut self, require: bool) -> Self {
        self.require_connect_protocol_header = require;
        self
    }

    /// Accept Connect unary calls over GET.
    pub fn allow_get(mut self, allow: bool) -> Self {
        self.allow_get = allow;
        self
    }

    /// Cap every call at `timeout`, whatever the client asked for.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn interceptor<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.interceptors.push(interceptor);
        self
    }
}
