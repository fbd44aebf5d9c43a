//! Header interceptors run before a call starts.
//!
//! On the client an interceptor sees the outgoing request headers; on the
//! handler it sees the incoming ones before the implementation is invoked.
//! Returning an error rejects the call, and the error is written through the
//! negotiated protocol like any other.
//!
//! # Example
//!
//! ```ignore
//! use connectrpc_wire_core::{HeaderInterceptor, InterceptorChain};
//!
//! let mut chain = InterceptorChain::new();
//! chain.push(HeaderInterceptor::try_new("authorization", "Bearer token123")?);
//! ```

use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::error::ConnectError;
use crate::protocol::Spec;

/// Inspect or modify headers before a call proceeds.
pub trait Interceptor: Send + Sync + 'static {
    fn intercept(&self, spec: &Spec, headers: &mut HeaderMap) -> Result<(), ConnectError>;
}

/// Interceptors applied in insertion order.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("count", &self.interceptors.len())
            .finish()
    }
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<I: Interceptor>(&mut self, interceptor: I) {
        self.interceptors.push(Arc::new(interceptor));
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Run every interceptor, stopping at the first rejection.
    pub fn apply(&self, spec: &Spec, headers: &mut HeaderMap) -> Result<(), ConnectError> {
        for interceptor in &self.interceptors {
            interceptor.intercept(spec, headers)?;
        }
        Ok(())
    }
}

/// Sets one header on every call.
#[derive(Clone, Debug)]
pub struct HeaderInterceptor {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderInterceptor {
    pub fn try_new(name: &str, value: &str) -> Result<Self, ConnectError> {
        let name = name
            .parse()
            .map_err(|_| ConnectError::internal(format!("invalid header name: {name}")))?;
        let value = value
            .parse()
            .map_err(|_| ConnectError::internal(format!("invalid header value: {value}")))?;
        Ok(Self { name, value })
    }

    pub fn from_parts(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

impl Interceptor for HeaderInterceptor {
    fn intercept(&self, _: &Spec, headers: &mut HeaderMap) -> Result<(), ConnectError> {
        headers.insert(self.name.clone(), self.value.clone());
        Ok(())
    }
}

/// An interceptor backed by a closure.
///
/// ```ignore
/// let auth = FnInterceptor::new(|_spec, headers| match headers.get("authorization") {
///     Some(_) => Ok(()),
///     None => Err(ConnectError::new(Code::Unauthenticated, "missing token")),
/// });
/// ```
#[derive(Clone)]
pub struct FnInterceptor<F> {
    func: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(&Spec, &mut HeaderMap) -> Result<(), ConnectError> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&Spec, &mut HeaderMap) -> Result<(), ConnectError> + Send + Sync + 'static,
{
    fn intercept(&self, spec: &Spec, headers: &mut HeaderMap) -> Result<(), ConnectError> {
        (self.func)(spec, headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;
    use crate::protocol::StreamType;

    #[test]
    fn test_chain_runs_in_order_and_stops_on_error() {
        let spec = Spec::new("/test.v1.Svc/Call", StreamType::Unary, true);
        let mut chain = InterceptorChain::new();
        chain.push(HeaderInterceptor::try_new("x-step", "one").unwrap());
        chain.push(FnInterceptor::new(|_: &Spec, headers: &mut HeaderMap| {
            headers.append("x-step", HeaderValue::from_static("two"));
            Ok(())
        }));
        let mut headers = HeaderMap::new();
        chain.apply(&spec, &mut headers).unwrap();
        let steps: Vec<_> = headers
            .get_all("x-step")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(steps, ["one", "two"]);

        chain.push(FnInterceptor::new(|spec: &Spec, _: &mut HeaderMap| {
            Err(ConnectError::new(
                Code::PermissionDenied,
                format!("{} denied", spec.procedure),
            ))
        }));
        chain.push(HeaderInterceptor::try_new("x-after", "never").unwrap());
        let mut headers = HeaderMap::new();
        let err = chain.apply(&spec, &mut headers).unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
        assert!(!headers.contains_key("x-after"));
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_header_interceptor_rejects_invalid() {
        assert!(HeaderInterceptor::try_new("bad name", "v").is_err());
        assert!(HeaderInterceptor::try_new("x-ok", "bad\nvalue").is_err());
    }
}
