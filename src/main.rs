use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use cache_proxy::config;
use cache_proxy::control::{self, ControlNetwork};
use cache_proxy::dispatcher::Dispatcher;
use cache_proxy::fetcher::{HttpClientConfig, ReqwestFetcher};
use cache_proxy::listener;
use cache_proxy::logging;
use cache_proxy::router::{Route, Router};
use cache_proxy::ProxyError;

/// A caching reverse HTTP proxy.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &str) -> Result<(), ProxyError> {
    let config = config::load(config_path)?;
    let level_handle = logging::init(&config.log_level);

    let http_client_config: HttpClientConfig = (&config.http_client).into();
    let fetcher: Arc<dyn cache_proxy::Fetcher> = Arc::new(
        ReqwestFetcher::new(&http_client_config)
            .map_err(|source| cache_proxy::ConfigError::Invalid(source.to_string()))?,
    );

    let mut routers = Vec::new();
    for server in &config.servers {
        let mut router = Router::new();
        for route in &server.routes {
            let mut built = Route::new(route.path.clone(), route.target.clone());
            if let Some(ttl) = route.time_to_live {
                if !ttl.is_zero() {
                    built = built.with_ttl(ttl);
                }
            }
            if let Some(keep) = &route.keep_headers {
                built = built.with_keep_headers(keep.clone());
            }
            if let Some(drop) = &route.drop_headers {
                built = built.with_drop_headers(drop.clone());
            }
            router.add_route(built);
        }
        routers.push(Arc::new(router));
    }

    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&fetcher), routers.clone(), level_handle));

    let mut tasks = tokio::task::JoinSet::new();

    for (server, router) in config.servers.iter().zip(routers.into_iter()) {
        let bind = server.bind.clone();
        let dispatcher = Arc::clone(&dispatcher);
        tasks.spawn(async move { listener::serve(&bind, router, dispatcher).await });
    }

    if config.control_server.enabled {
        let network = match config.control_server.network.as_str() {
            "tcp" => ControlNetwork::Tcp,
            _ => ControlNetwork::Unix,
        };
        let bind = config.control_server.bind.clone();
        let dispatcher = Arc::clone(&dispatcher);
        tasks.spawn(async move { control::serve(network, &bind, dispatcher).await });
    }

    info!("proxy started");

    loop {
        tokio::select! {
            signal = shutdown_signal() => {
                info!(signal, "received shutdown signal, exiting");
                tasks.shutdown().await;
                return Ok(());
            }
            result = tasks.join_next() => {
                match result {
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(err))) => {
                        error!(error = %err, "listener task failed");
                        return Err(err.into());
                    }
                    Some(Err(join_err)) => {
                        error!(error = %join_err, "listener task panicked");
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Waits for SIGINT or SIGTERM, returning the signal's name. Used to drive a
/// clean shutdown (exit code 0) instead of relying on an unhandled kill.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}
