use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerState, SharedBroker};
use crate::config::BrokerConfig;
use crate::distribution::CoreDistributionLoader;
use crate::error::Result;
use crate::monitor::{LivenessMonitor, NodeProbe, SshProbe};
use crate::protocol::{BrokerServer, RequestHandler};

/// The broker process: configuration, shared state, liveness monitor and
/// request server.
pub struct BrokerDaemon {
    config: BrokerConfig,
    loader: CoreDistributionLoader,
    state: SharedBroker,
}

impl BrokerDaemon {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            loader: CoreDistributionLoader::new(&config),
            state: SharedBroker::new(BrokerState::new()),
            config,
        }
    }

    pub fn state(&self) -> &SharedBroker {
        &self.state
    }

    /// Read the node list, distribution rules and allowed users and apply
    /// them. Every allowed user starts with its share already assigned.
    ///
    /// # Errors
    ///
    /// Fails when any file is missing or malformed, except the rules file,
    /// whose absence means an even split.
    pub fn load_configuration(&self) -> Result<()> {
        let specs = self.loader.load_nodes()?;
        let rules = self.loader.load_rules()?;
        let allowed = self.loader.load_allowed_users()?;

        let mut state = self.state.lock()?;
        state.reload_nodes(&specs)?;
        state.distribute(&rules, allowed)?;
        tracing::info!(
            n_nodes = state.nodes.len(),
            n_cores = state.n_cores(),
            n_users = state.users.len(),
            mode = %rules.mode,
            "Configuration loaded"
        );
        Ok(())
    }

    /// Load the configuration, bind the listen address and run with nodes
    /// probed over ssh.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.load_configuration()?;
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let probe: Arc<dyn NodeProbe> = Arc::new(SshProbe::new(self.config.probe.clone()));
        self.serve(listener, probe, shutdown).await
    }

    /// Run the liveness monitor and the request server until shutdown or
    /// `Finish`.
    ///
    /// The configuration must already be loaded. The first probe cycle starts
    /// immediately, so nodes come up before the first interval elapses.
    pub async fn serve(
        self,
        listener: TcpListener,
        probe: Arc<dyn NodeProbe>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let monitor = LivenessMonitor::new(self.state.clone(), probe, self.config.check_interval);
        let monitor_shutdown = shutdown.clone();
        let monitor_handle = tokio::spawn(async move {
            monitor.run(monitor_shutdown).await;
        });

        let handler = RequestHandler::new(self.state.clone(), self.loader.clone());
        let server = BrokerServer::new(
            self.config.listen_addr,
            self.config.conn_key.clone(),
            handler,
            shutdown.clone(),
        );
        let result = server.serve(listener).await;

        shutdown.cancel();
        if let Err(e) = monitor_handle.await {
            tracing::error!(error = %e, "Liveness monitor task failed");
        }

        tracing::info!("Broker stopped");
        result
    }
}
