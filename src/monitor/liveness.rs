use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::broker::SharedBroker;
use crate::error::Result;
use crate::monitor::probe::NodeProbe;
use crate::nodes::NodeStatus;

/// Outcome of one probe cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub probed: usize,
    pub up: usize,
}

/// Periodically probes every node and records whether it is up, how many
/// outsider processes it runs and how much memory it has.
pub struct LivenessMonitor {
    state: SharedBroker,
    probe: Arc<dyn NodeProbe>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(state: SharedBroker, probe: Arc<dyn NodeProbe>, interval: Duration) -> Self {
        Self {
            state,
            probe,
            interval,
        }
    }

    /// Probe now, then once per interval until `shutdown` is cancelled.
    ///
    /// A fatal broker error stops the loop and cancels `shutdown`.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.run_cycle() => result,
            };

            match result {
                Ok(summary) => {
                    tracing::debug!(probed = summary.probed, up = summary.up, "Probe cycle done");
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Liveness monitor stopping");
                    shutdown.cancel();
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Probe cycle failed");
                }
            }
        }

        tracing::info!("Liveness monitor stopped");
    }

    /// Probe every registered node once.
    ///
    /// Probes run without the broker lock; the results are committed together
    /// under one acquisition.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let targets = self.state.lock()?.nodes.probe_targets();

        let mut results = Vec::with_capacity(targets.len());
        for (name, address) in targets {
            let status = match self.probe.probe(&address).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(node = %name, address = %address, error = %e, "Probe failed");
                    NodeStatus::down()
                }
            };
            results.push((name, status));
        }

        let mut state = self.state.lock()?;
        let mut summary = CycleSummary::default();
        for (name, status) in results {
            let is_up = status.is_up;
            if state.nodes.apply_status(&name, status) {
                summary.probed += 1;
                if is_up {
                    summary.up += 1;
                }
            }
        }
        Ok(summary)
    }
}
