//! [`Dispatcher`]: per-request orchestration, plus the control-plane
//! commands that mutate caches and log level.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tracing::warn;

use crate::error::{ControlError, FetchError, HandlerError};
use crate::fetcher::Fetcher;
use crate::logging::LevelHandle;
use crate::response::{ResponseSink, StoredResponse};
use crate::router::{cache_key, Route, Router};

/// Reply written on successful execution of a control command.
pub const CONTROL_OK: &str = "OK";

/// Builds the upstream response for a single request, applying the
/// header-policy chain. On fetch failure, returns a `500` stored response
/// rather than propagating the error: per the dispatcher's error
/// discipline, a failed fill still transitions its cache entry to `Ready`.
async fn build_response(
    fetcher: &dyn Fetcher,
    route: &Route,
    method: Method,
    path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> StoredResponse {
    let url = format!("{}{}", route.target_base_url, path);
    match fetcher.fetch(method, &url, headers, body).await {
        Ok((status, upstream_headers, upstream_body)) => {
            let mut response = StoredResponse::new();
            match apply_header_policy(route, &upstream_headers, &mut response) {
                Ok(()) => {
                    response.set_status(status);
                    response.write_body(upstream_body);
                    response
                }
                Err(err) => {
                    warn!(error = %err, url, "header policy failed, degrading to 500");
                    StoredResponse::with_status(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
        Err(err) => {
            warn!(error = %err, url, "upstream fetch failed");
            StoredResponse::with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Applies `keep_only` then `drop` to the upstream's response headers,
/// copying survivors into `response`. Headers named in neither list are
/// kept. Treated identically to a fetch failure by the caller: any error
/// here degrades the whole response to a cached `500`.
fn apply_header_policy(
    route: &Route,
    upstream_headers: &HeaderMap,
    response: &mut StoredResponse,
) -> Result<(), HandlerError> {
    for (name, value) in upstream_headers.iter() {
        let lowercase_name = name.as_str().to_ascii_lowercase();

        if let Some(keep) = &route.keep_headers {
            if !keep.contains(&lowercase_name) {
                continue;
            }
        }
        if let Some(drop) = &route.drop_headers {
            if drop.contains(&lowercase_name) {
                continue;
            }
        }

        let value_str = value
            .to_str()
            .map_err(|_| HandlerError::BadHeader { name: name.as_str().to_string() })?;
        response.set_header(name.as_str(), value_str);
    }
    Ok(())
}

/// Orchestrates request dispatch and control-plane commands across every
/// configured listener's [`Router`].
pub struct Dispatcher {
    fetcher: Arc<dyn Fetcher>,
    routers: Vec<Arc<Router>>,
    level_handle: LevelHandle,
}

impl Dispatcher {
    /// Builds a dispatcher over the given fetcher, the full set of
    /// per-listener routers (consulted by control-plane commands), and the
    /// process-wide log level handle.
    pub fn new(fetcher: Arc<dyn Fetcher>, routers: Vec<Arc<Router>>, level_handle: LevelHandle) -> Self {
        Self { fetcher, routers, level_handle }
    }

    /// Dispatches one request arriving on `router`'s listener, writing the
    /// resolved response into `sink`. Writes a `404` if no route matches.
    pub async fn dispatch(
        &self,
        router: &Router,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: Bytes,
        sink: &mut dyn ResponseSink,
    ) {
        let route = match router.resolve(path) {
            Some(route) => route,
            None => {
                if let Err(err) = sink.write_status(StatusCode::NOT_FOUND) {
                    warn!(error = %err, "failed to write response to client sink");
                }
                return;
            }
        };

        let response = match &route.cache {
            None => build_response(self.fetcher.as_ref(), route, method, path, headers, body).await,
            Some(cache) => {
                let key = cache_key(route, path);
                let fetcher = self.fetcher.as_ref();
                cache
                    .get_or_fill(&key, || build_response(fetcher, route, method, path, headers, body))
                    .await
            }
        };

        if let Err(err) = response.replay(sink) {
            warn!(error = %err, "failed to write response to client sink");
        }
    }

    /// Executes one line read from the control socket, returning the reply
    /// to write back verbatim.
    pub async fn handle_control_command(&self, line: &str) -> String {
        let mut fields = line.trim().split(' ').filter(|field| !field.is_empty());
        let command = match fields.next() {
            Some(command) => command,
            None => return ControlError::InvalidCommand.to_string(),
        };
        let argument = fields.next();

        match command {
            "drop" => match argument {
                Some(path) => {
                    self.drop_key(path).await;
                    CONTROL_OK.to_string()
                }
                None => ControlError::InvalidArguments.to_string(),
            },
            "drop_prefix" => match argument {
                Some(path) => {
                    self.drop_prefix(path).await;
                    CONTROL_OK.to_string()
                }
                None => ControlError::InvalidArguments.to_string(),
            },
            "log_level" => match argument {
                Some(level) => match self.level_handle.set(level) {
                    Ok(()) => CONTROL_OK.to_string(),
                    Err(_) => ControlError::InvalidArguments.to_string(),
                },
                None => ControlError::InvalidArguments.to_string(),
            },
            _ => ControlError::InvalidCommand.to_string(),
        }
    }

    async fn drop_key(&self, path: &str) {
        for router in &self.routers {
            if let Some(route) = router.find_by_prefix(path) {
                if let Some(cache) = &route.cache {
                    let key = cache_key(route, path);
                    cache.invalidate(&key).await;
                }
            }
        }
    }

    async fn drop_prefix(&self, path: &str) {
        for router in &self.routers {
            if let Some(route) = router.find_by_prefix(path) {
                let Some(residual) = path.strip_prefix(route.path_prefix.as_str()) else {
                    // The resolved route's own prefix must match `path` by
                    // construction, but a defensive check here keeps this
                    // path from ever deriving a meaningless predicate.
                    continue;
                };
                if let Some(cache) = &route.cache {
                    let residual = residual.to_string();
                    cache.invalidate_where(|key| key.starts_with(residual.as_str())).await;
                }
            }
        }
    }
}

/// Builds the set of header names a config entry lists, lower-cased for
/// case-insensitive matching.
pub fn header_set(names: &[String]) -> HashSet<String> {
    names.iter().map(|name| name.to_ascii_lowercase()).collect()
}
