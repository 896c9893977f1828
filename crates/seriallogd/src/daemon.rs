//! Wires configuration, ingestors, hub and HTTP server together.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use seriallog_core::ClockOffset;

use crate::config::{ConfigError, DaemonConfig};
use crate::delete::DeleteCoordinator;
use crate::device::{DeviceOpener, SerialOpener};
use crate::hub::{spawn_fanout, BroadcastHub};
use crate::ingest::{spawn_ingestors, IngestContext};
use crate::server::{AppState, HttpServer, ServerError};

/// Errors that stop the daemon.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No serial ports configured")]
    NoDevices,

    #[error("Failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("Task failed: {0}")]
    Task(String),
}

/// The daemon before it starts.
pub struct Daemon {
    config: DaemonConfig,
    opener: Arc<dyn DeviceOpener>,
}

impl Daemon {
    /// A daemon reading real serial ports.
    pub fn new(config: DaemonConfig) -> Self {
        Self::with_opener(config, Arc::new(SerialOpener::new()))
    }

    /// A daemon reading devices through `opener`.
    pub fn with_opener(config: DaemonConfig, opener: Arc<dyn DeviceOpener>) -> Self {
        Self { config, opener }
    }

    /// Starts every task and returns once the HTTP listener is bound.
    pub async fn start(self, shutdown: CancellationToken) -> Result<DaemonHandle, DaemonError> {
        let config = self.config;
        config.validate()?;

        let devices = config.devices();
        if devices.is_empty() {
            return Err(DaemonError::NoDevices);
        }

        let store = config.log_store();
        tokio::fs::create_dir_all(store.dir())
            .await
            .map_err(|source| DaemonError::LogDir {
                path: store.dir().to_path_buf(),
                source,
            })?;

        let hub = BroadcastHub::with_mailbox_capacity(config.mailbox_capacity);
        let deletes = DeleteCoordinator::new();
        let clock = ClockOffset::new();

        let state = AppState {
            hub: hub.clone(),
            deletes: deletes.clone(),
            store: store.clone(),
            active_ports: devices.len(),
            send_timeout: config.send_timeout(),
        };
        let server = HttpServer::bind(config.bind, state, shutdown.clone()).await?;
        let local_addr = server.local_addr()?;

        let (publisher, fanout) = spawn_fanout(hub.clone(), config.publish_queue, shutdown.clone());

        let ctx = IngestContext {
            opener: self.opener,
            store,
            clock: clock.clone(),
            publisher,
            deletes: deletes.clone(),
        };
        let ingestors = spawn_ingestors(devices, ctx, config.restart_delay(), shutdown.clone());

        info!(
            addr = %local_addr,
            devices = ingestors.len(),
            log_dir = %config.log_dir.display(),
            encoding = %config.log_encoding,
            "Daemon started"
        );

        let server = tokio::spawn(server.run());

        Ok(DaemonHandle {
            local_addr,
            hub,
            deletes,
            clock,
            shutdown,
            server,
            fanout,
            ingestors,
        })
    }

    /// Starts the daemon and runs it until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DaemonError> {
        self.start(shutdown).await?.wait().await
    }
}

/// A running daemon.
pub struct DaemonHandle {
    local_addr: SocketAddr,
    hub: BroadcastHub,
    deletes: DeleteCoordinator,
    clock: ClockOffset,
    shutdown: CancellationToken,
    server: JoinHandle<Result<(), ServerError>>,
    fanout: JoinHandle<()>,
    ingestors: Vec<JoinHandle<()>>,
}

impl DaemonHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn deletes(&self) -> &DeleteCoordinator {
        &self.deletes
    }

    pub fn clock(&self) -> &ClockOffset {
        &self.clock
    }

    /// Waits for the server and every ingestor to stop.
    ///
    /// A server failure cancels the shutdown token so the ingestors follow.
    pub async fn wait(self) -> Result<(), DaemonError> {
        let server_result = match self.server.await {
            Ok(result) => result.map_err(DaemonError::from),
            Err(e) => Err(DaemonError::Task(e.to_string())),
        };
        if let Err(e) = &server_result {
            error!(error = %e, "HTTP server stopped unexpectedly");
            self.shutdown.cancel();
        }

        for ingestor in self.ingestors {
            if let Err(e) = ingestor.await {
                error!(error = %e, "Ingestor task failed");
            }
        }
        if let Err(e) = self.fanout.await {
            error!(error = %e, "Fan-out task failed");
        }

        info!("Daemon stopped");
        server_result
    }
}
