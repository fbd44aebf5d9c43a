//! Service builder for mounting handlers on one axum router.
//!
//! # Examples
//!
//! ```rust,ignore
//! use connectrpc_wire::MakeServiceBuilder;
//!
//! let app = MakeServiceBuilder::new()
//!     .add_handler(ping)
//!     .add_handlers(vec![sum, count_up, cum_sum])
//!     .add_router(health_router)
//!     .build();
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! ```
//!
//! Serving with `into_make_service_with_connect_info` lets handlers see the
//! peer address.

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler::Handler;

/// Collects handlers and plain routers into a single [`Router`].
///
/// Each handler is routed at its procedure path. Requests for unknown paths
/// fall through to axum's 404.
pub struct MakeServiceBuilder<S = ()> {
    router: Router<S>,
    handlers: Vec<Handler>,
    trace: bool,
}

impl<S> Default for MakeServiceBuilder<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> MakeServiceBuilder<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            handlers: Vec::new(),
            trace: false,
        }
    }

    pub fn add_handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn add_handlers(mut self, handlers: impl IntoIterator<Item = Handler>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Merge an existing router, e.g. health checks or static routes.
    pub fn add_router(mut self, router: Router<S>) -> Self {
        self.router = self.router.merge(router);
        self
    }

    /// Wrap every route in a `tower_http` request span.
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    pub fn build(self) -> Router<S> {
        let router = self
            .handlers
            .into_iter()
            .fold(self.router, |router, handler| {
                tracing::debug!(procedure = handler.procedure(), "mounting handler");
                let path = handler.procedure().to_owned();
                router.route_service(&path, handler)
            });
        if self.trace {
            router.layer(TraceLayer::new_for_http())
        } else {
            router
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectRequest, ConnectResponse, HandlerOptions};
    use axum::body::Body;
    use connectrpc_wire_core::CallContext;
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct Echo {
        #[prost(string, tag = "1")]
        #[serde(default)]
        text: String,
    }

    fn echo(procedure: &str) -> Handler {
        Handler::unary(
            procedure,
            |_ctx: CallContext, req: ConnectRequest<Echo>| async move {
                Ok(ConnectResponse::new(req.into_inner()))
            },
            HandlerOptions::new(),
        )
    }

    async fn post(app: Router, path: &str) -> StatusCode {
        let req = Request::post(path)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"text":"hi"}"#))
            .unwrap();
        app.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_routes_by_procedure() {
        let app = MakeServiceBuilder::new()
            .add_handler(echo("/test.v1.EchoService/Echo"))
            .add_handlers(vec![echo("/test.v1.EchoService/Again")])
            .add_router(Router::new().route("/healthz", axum::routing::get(|| async { "ok" })))
            .trace(true)
            .build();

        assert_eq!(post(app.clone(), "/test.v1.EchoService/Echo").await, StatusCode::OK);
        assert_eq!(post(app.clone(), "/test.v1.EchoService/Again").await, StatusCode::OK);
        assert_eq!(post(app.clone(), "/test.v1.EchoService/Missing").await, StatusCode::NOT_FOUND);

        let health = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }
}
