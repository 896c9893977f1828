//! Supervised per-device ingestion.
//!
//! Each configured device gets one [`RestartSupervisor`] task that runs
//! [`SourceIngestor::run_cycle`] in a loop with a fixed pause between
//! cycles. There is no retry ceiling: a device that stays unplugged is
//! retried every `restart_delay` for the life of the process.

mod ingestor;

pub use ingestor::{CycleOutcome, SourceIngestor};

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use seriallog_core::{ClockOffset, DeviceDescriptor};

use crate::delete::DeleteCoordinator;
use crate::device::DeviceOpener;
use crate::hub::Publisher;
use crate::persist::LogStore;

/// Pause between two ingestion cycles of the same device.
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Shared collaborators of every ingestor.
#[derive(Clone)]
pub struct IngestContext {
    pub opener: Arc<dyn DeviceOpener>,
    pub store: LogStore,
    pub clock: ClockOffset,
    pub publisher: Publisher,
    pub deletes: DeleteCoordinator,
}

/// Re-runs one ingestor's cycle until shutdown.
pub struct RestartSupervisor {
    ingestor: SourceIngestor,
    restart_delay: Duration,
    shutdown: CancellationToken,
}

impl RestartSupervisor {
    pub fn new(ingestor: SourceIngestor, restart_delay: Duration, shutdown: CancellationToken) -> Self {
        Self {
            ingestor,
            restart_delay,
            shutdown,
        }
    }

    pub async fn run(self) {
        let index = self.ingestor.device().index;
        let mut cycles: u64 = 0;

        loop {
            cycles += 1;
            let outcome = self.ingestor.run_cycle(&self.shutdown).await;

            if outcome.is_success() {
                info!(index, cycle = cycles, outcome = %outcome, "Ingestion cycle ended");
            } else {
                warn!(index, cycle = cycles, outcome = %outcome, "Ingestion cycle failed");
            }

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                _ = tokio::time::sleep(self.restart_delay) => {
                    debug!(index, "Restarting ingestion");
                }
            }
        }

        info!(index, cycles, "Ingestor stopped");
    }
}

/// Spawns one supervised ingestor per device.
pub fn spawn_ingestors(
    devices: Vec<DeviceDescriptor>,
    ctx: IngestContext,
    restart_delay: Duration,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    devices
        .into_iter()
        .map(|device| {
            info!(device = %device, "Starting ingestor");
            let ingestor = SourceIngestor::new(device, ctx.clone());
            let supervisor = RestartSupervisor::new(ingestor, restart_delay, shutdown.clone());
            tokio::spawn(supervisor.run())
        })
        .collect()
}
