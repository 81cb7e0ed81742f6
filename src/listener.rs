//! The `HttpListener` capability: axum supplies transport only (accept
//! loop, keep-alive, HTTP/1.1 framing); all path dispatch defers to
//! [`crate::router::Router`] via a single wildcard fallback route.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use http::{HeaderName, HeaderValue, StatusCode};
use http_body_util::BodyExt;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{HandlerError, ListenerError};
use crate::response::ResponseSink;
use crate::router::Router as ProxyRouter;

#[derive(Clone)]
struct ListenerState {
    router: Arc<ProxyRouter>,
    dispatcher: Arc<Dispatcher>,
}

/// A [`ResponseSink`] that accumulates into an `axum`/`http` response
/// builder, following the sink's write order (headers, status, body).
struct AxumResponseSink {
    builder: Option<http::response::Builder>,
    body: Bytes,
}

impl AxumResponseSink {
    fn new() -> Self {
        Self { builder: Some(Response::builder()), body: Bytes::new() }
    }

    fn into_response(self) -> Result<Response, HandlerError> {
        let builder = self.builder.unwrap_or_else(Response::builder);
        builder
            .body(Body::from(self.body))
            .map_err(|err| HandlerError::Sink(anyhow::Error::new(err)))
    }
}

impl ResponseSink for AxumResponseSink {
    fn write_header(&mut self, name: &str, value: &str) -> Result<(), HandlerError> {
        let name = HeaderName::try_from(name)
            .map_err(|_| HandlerError::BadHeader { name: name.to_string() })?;
        let value = HeaderValue::try_from(value)
            .map_err(|_| HandlerError::BadHeader { name: name.to_string() })?;
        if let Some(builder) = self.builder.take() {
            self.builder = Some(builder.header(name, value));
        }
        Ok(())
    }

    fn write_status(&mut self, status: StatusCode) -> Result<(), HandlerError> {
        if let Some(builder) = self.builder.take() {
            self.builder = Some(builder.status(status));
        }
        Ok(())
    }

    fn write_body(&mut self, body: Bytes) -> Result<(), HandlerError> {
        self.body = body;
        Ok(())
    }
}

async fn handle(State(state): State<ListenerState>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();
    let body = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    let mut sink = AxumResponseSink::new();
    state.dispatcher.dispatch(&state.router, method, &path, headers, body, &mut sink).await;
    match sink.into_response() {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "failed to build client response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Binds `bind` and serves requests for `router` until the process shuts
/// down. Transport-layer errors are logged here and never reach the
/// dispatcher.
pub async fn serve(
    bind: &str,
    router: Arc<ProxyRouter>,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), ListenerError> {
    let state = ListenerState { router, dispatcher };
    let app = axum::Router::new().fallback(handle).with_state(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|source| ListenerError::Bind { addr: bind.to_string(), source })?;

    info!(%bind, "http listener started");
    axum::serve(listener, app)
        .await
        .map_err(|source| ListenerError::Bind { addr: bind.to_string(), source })?;
    Ok(())
}
