//! tether binary entry point.
//!
//! Attaches the local terminal to a raw TTY byte stream exported on a unix
//! socket or TCP address.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use tether_client::{Cli, ContainerEngine, Endpoint, attach_and_run};
use tether_core::{Dimensions, Error, Result};

/// Engine over a bare socket carrying the TTY stream.
///
/// A bare socket has no control channel, so resize requests are only logged.
struct RawSocketEngine {
    endpoint: Endpoint,
}

impl RawSocketEngine {
    fn log_resize(&self, id: &str, size: Dimensions) -> Result<()> {
        debug!(id, endpoint = %self.endpoint, %size, "Resize not forwarded over a raw socket");
        Ok(())
    }

    fn connect_error(&self, e: std::io::Error) -> Error {
        Error::Engine {
            message: format!("failed to connect to {}: {e}", self.endpoint),
        }
    }
}

/// TCP flavour of the raw engine.
struct TcpEngine(RawSocketEngine);

#[async_trait]
impl ContainerEngine for TcpEngine {
    type Connection = tokio::net::TcpStream;

    async fn attach(&self, _id: &str) -> Result<Self::Connection> {
        let Endpoint::Tcp(addr) = &self.0.endpoint else {
            return Err(Error::Engine {
                message: format!("{} is not a TCP endpoint", self.0.endpoint),
            });
        };
        let stream = tokio::net::TcpStream::connect(addr.as_str())
            .await
            .map_err(|e| self.0.connect_error(e))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn resize(&self, id: &str, size: Dimensions) -> Result<()> {
        self.0.log_resize(id, size)
    }
}

/// Unix socket flavour of the raw engine.
#[cfg(unix)]
struct UnixEngine(RawSocketEngine);

#[cfg(unix)]
#[async_trait]
impl ContainerEngine for UnixEngine {
    type Connection = tokio::net::UnixStream;

    async fn attach(&self, _id: &str) -> Result<Self::Connection> {
        let Endpoint::Unix(path) = &self.0.endpoint else {
            return Err(Error::Engine {
                message: format!("{} is not a unix socket endpoint", self.0.endpoint),
            });
        };
        tokio::net::UnixStream::connect(path)
            .await
            .map_err(|e| self.0.connect_error(e))
    }

    async fn resize(&self, id: &str, size: Dimensions) -> Result<()> {
        self.0.log_resize(id, size)
    }
}

fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = tether_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "tether starting");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("tether: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = rt.block_on(run(&cli));
    // The stdin thread may still be parked in read().
    rt.shutdown_background();

    match result {
        Ok(()) => {}
        Err(Error::Cancelled) => {
            info!("Interrupted");
            std::process::exit(130);
        }
        Err(e) => {
            error!(error = %e, "Session failed");
            eprintln!("tether: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let Some(endpoint) = cli.endpoint() else {
        return Err(Error::Engine {
            message: "no endpoint given".into(),
        });
    };
    let id = cli.session_id();
    let config = cli.session_config();
    info!(%endpoint, id = %id, detach_keys = %config.detach_keys, "Attaching");

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Received Ctrl-C");
            interrupt.cancel();
        }
    });

    let is_unix = matches!(endpoint, Endpoint::Unix(_));
    let engine = RawSocketEngine { endpoint };
    if is_unix {
        #[cfg(unix)]
        return attach_and_run(Arc::new(UnixEngine(engine)), cancel, &id, config).await;
        #[cfg(not(unix))]
        return Err(Error::Engine {
            message: "unix sockets are not supported on this platform".into(),
        });
    }
    attach_and_run(Arc::new(TcpEngine(engine)), cancel, &id, config).await
}
