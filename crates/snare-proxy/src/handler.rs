//! hudsucker adapter for [`CaptureController`].

use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hudsucker::{
    hyper::{Request, Response, StatusCode},
    Body, HttpContext, HttpHandler, RequestOrResponse,
};
use hyper::body::Bytes;

use crate::capture::{CaptureController, PendingExchange};

fn bytes_to_body(bytes: Bytes) -> Body {
    Body::from(Full::new(bytes))
}

fn bad_gateway() -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = StatusCode::BAD_GATEWAY;
    res
}

/// Per-request handler. hudsucker clones it for each request, and the clone
/// carries the pending exchange from request to response.
#[derive(Clone)]
pub struct InterceptHandler {
    controller: Arc<CaptureController>,
    pending: Option<PendingExchange>,
}

impl std::fmt::Debug for InterceptHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptHandler")
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

impl InterceptHandler {
    /// Wraps a controller.
    pub fn new(controller: Arc<CaptureController>) -> Self {
        Self {
            controller,
            pending: None,
        }
    }

    /// The wrapped controller.
    pub fn controller(&self) -> &Arc<CaptureController> {
        &self.controller
    }

    /// Request hook for the client session `session`.
    ///
    /// A captured request whose body cannot be read is logged without a
    /// response and answered with 502 instead of being forwarded altered.
    async fn intercept_request(&mut self, session: &str, req: Request<Body>) -> RequestOrResponse {
        let (parts, body) = req.into_parts();
        let Some(mut pending) = self.controller.on_request(session, &parts) else {
            return RequestOrResponse::Request(Request::from_parts(parts, body));
        };

        match body.collect().await {
            Ok(collected) => {
                let body_bytes = collected.to_bytes();
                pending.attach_request_body(&body_bytes);
                self.pending = Some(pending);
                RequestOrResponse::Request(Request::from_parts(parts, bytes_to_body(body_bytes)))
            }
            Err(e) => {
                tracing::warn!("Failed to read request body from {}: {}", session, e);
                self.controller.on_abandoned(pending);
                RequestOrResponse::Response(bad_gateway())
            }
        }
    }

    /// Response hook. A response body that cannot be read is answered with 502.
    async fn intercept_response(&mut self, res: Response<Body>) -> Response<Body> {
        let Some(pending) = self.pending.take() else {
            return res;
        };

        let (parts, body) = res.into_parts();
        match body.collect().await {
            Ok(collected) => {
                let body_bytes = collected.to_bytes();
                self.controller.on_response(pending, &parts, &body_bytes);
                Response::from_parts(parts, bytes_to_body(body_bytes))
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read response body for {}: {}",
                    pending.entry().request_url,
                    e
                );
                self.controller.on_abandoned(pending);
                bad_gateway()
            }
        }
    }
}

impl HttpHandler for InterceptHandler {
    async fn handle_request(&mut self, ctx: &HttpContext, req: Request<Body>) -> RequestOrResponse {
        self.intercept_request(&ctx.client_addr.to_string(), req).await
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        self.intercept_response(res).await
    }

    async fn handle_error(
        &mut self,
        ctx: &HttpContext,
        err: hyper_util::client::legacy::Error,
    ) -> Response<Body> {
        tracing::warn!("Upstream request from {} failed: {}", ctx.client_addr, err);
        match self.pending.take() {
            Some(pending) => self.controller.on_abandoned(pending),
            None => self.controller.close_session(&ctx.client_addr.to_string()),
        }
        bad_gateway()
    }
}
