//! The control socket: a line-oriented side channel for cache invalidation
//! and log-level changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::error::ListenerError;

/// Which transport the control socket listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlNetwork {
    /// A Unix domain socket at a filesystem path.
    Unix,
    /// A TCP socket.
    Tcp,
}

/// Initial accept-retry backoff; doubled on each consecutive failure up to
/// [`MAX_ACCEPT_BACKOFF`].
const INITIAL_ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
/// Ceiling on the accept-retry backoff, so a persistently broken listener
/// still retries at a bounded rate instead of busy-looping.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Runs the control socket's accept loop until the process shuts down.
///
/// On `network = Unix`, a stale socket file at `bind` is removed before
/// binding, matching the expectation that the process owns its own socket
/// path across restarts.
pub async fn serve(
    network: ControlNetwork,
    bind: &str,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), ListenerError> {
    match network {
        ControlNetwork::Unix => serve_unix(bind, dispatcher).await,
        ControlNetwork::Tcp => serve_tcp(bind, dispatcher).await,
    }
}

async fn serve_unix(bind: &str, dispatcher: Arc<Dispatcher>) -> Result<(), ListenerError> {
    if std::path::Path::new(bind).exists() {
        let _ = std::fs::remove_file(bind);
    }
    let listener = UnixListener::bind(bind).map_err(|source| ListenerError::ControlBind {
        addr: bind.to_string(),
        source,
    })?;

    let mut backoff = INITIAL_ACCEPT_BACKOFF;
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                backoff = INITIAL_ACCEPT_BACKOFF;
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move { handle_connection(stream, dispatcher).await });
            }
            Err(err) => {
                warn!(error = %err, "control socket accept failed, backing off");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
            }
        }
    }
}

async fn serve_tcp(bind: &str, dispatcher: Arc<Dispatcher>) -> Result<(), ListenerError> {
    let listener = TcpListener::bind(bind).await.map_err(|source| ListenerError::ControlBind {
        addr: bind.to_string(),
        source,
    })?;

    let mut backoff = INITIAL_ACCEPT_BACKOFF;
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                backoff = INITIAL_ACCEPT_BACKOFF;
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move { handle_connection(stream, dispatcher).await });
            }
            Err(err) => {
                warn!(error = %err, "control socket accept failed, backing off");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
            }
        }
    }
}

/// Serves one persistent connection: read a line, execute it, write exactly
/// one reply, repeat until the peer closes the connection. No concurrent
/// commands are ever in flight on the same connection.
async fn handle_connection<S>(stream: S, dispatcher: Arc<Dispatcher>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                debug!(error = %err, "control connection read error");
                return;
            }
        };

        let reply = dispatcher.handle_control_command(&line).await;
        if writer.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
        if writer.write_all(b"\n").await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Fetcher;
    use crate::logging::LevelHandle;
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};

    struct StubFetcher;

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(
            &self,
            _method: Method,
            _url: &str,
            _headers: HeaderMap,
            _body: Bytes,
        ) -> Result<(StatusCode, HeaderMap, Bytes), crate::error::FetchError> {
            Ok((StatusCode::OK, HeaderMap::new(), Bytes::new()))
        }
    }

    #[tokio::test]
    async fn unrecognized_command_replies_with_invalid_command() {
        let dispatcher =
            Arc::new(Dispatcher::new(Arc::new(StubFetcher), vec![], LevelHandle::for_testing()));

        let (client, server) = tokio::io::duplex(1024);
        tokio::spawn(handle_connection(server, dispatcher));

        let (reader, mut writer) = tokio::io::split(client);
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"bogus\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert_eq!(reply, "invalid command");
    }

    #[tokio::test]
    async fn log_level_command_replies_ok() {
        let dispatcher =
            Arc::new(Dispatcher::new(Arc::new(StubFetcher), vec![], LevelHandle::for_testing()));

        let (client, server) = tokio::io::duplex(1024);
        tokio::spawn(handle_connection(server, dispatcher));

        let (reader, mut writer) = tokio::io::split(client);
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"log_level debug\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert_eq!(reply, "OK");
    }

    #[tokio::test]
    async fn connection_serves_multiple_commands_sequentially() {
        let dispatcher =
            Arc::new(Dispatcher::new(Arc::new(StubFetcher), vec![], LevelHandle::for_testing()));

        let (client, server) = tokio::io::duplex(1024);
        tokio::spawn(handle_connection(server, dispatcher));

        let (reader, mut writer) = tokio::io::split(client);
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"bogus\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "invalid command");

        writer.write_all(b"drop\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "invalid arguments");
    }
}
