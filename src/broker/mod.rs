//! Broker state shared by the protocol handler and the liveness monitor.
//!
//! [`BrokerState`] owns the node registry and the users collection.
//! [`SharedBroker`] wraps it in the one lock every component goes through:
//! - the request handler holds it while a request reads or mutates state
//! - the liveness monitor holds it only to commit a finished probe cycle
//!
//! The lock is never held across an `.await`. A poisoned lock means a handler
//! panicked halfway through a mutation; every later access reports
//! [`BrokerError::Fatal`](crate::error::BrokerError::Fatal).

mod report;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::distribution::{DistributionRules, NodeSpec};
use crate::error::{BrokerError, Result};
use crate::nodes::NodeRegistry;
use crate::users::{CoreRequest, MasterAddress, MultiuserJob, SyncOutcome, UsersCollection};

#[derive(Debug)]
pub struct BrokerState {
    pub nodes: NodeRegistry,
    pub users: UsersCollection,
    /// Log every request and response at info level
    pub save_messages: bool,
    pub started_at: DateTime<Utc>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerState {
    pub fn new() -> Self {
        Self {
            nodes: NodeRegistry::new(),
            users: UsersCollection::new(),
            save_messages: false,
            started_at: Utc::now(),
        }
    }

    pub fn n_cores(&self) -> u32 {
        self.nodes.n_cores()
    }

    pub fn request_core(&mut self, req: &CoreRequest<'_>) -> Result<String> {
        self.users.request_core(&mut self.nodes, req)
    }

    pub fn remove_job(&mut self, user: &str, job_id: u64) -> Result<MultiuserJob> {
        self.users.remove_job(&mut self.nodes, user, job_id)
    }

    pub fn sync_user(
        &mut self,
        user: &str,
        master: MasterAddress,
        cur_jobs: Vec<MultiuserJob>,
    ) -> Result<SyncOutcome> {
        self.users.sync_user(&mut self.nodes, user, master, cur_jobs)
    }

    /// Install a new node list and redistribute for the new capacity.
    ///
    /// The current rules are checked against the new capacity first, so a
    /// node list too small for the configured minimums changes nothing.
    pub fn reload_nodes(&mut self, specs: &[NodeSpec]) -> Result<()> {
        let n_cores: u32 = specs.iter().map(|s| s.max_cores).sum();
        let names: Vec<&str> = self.users.iter().map(|u| u.name.as_str()).collect();
        self.users.rules().compute_shares(&names, n_cores)?;

        self.nodes.apply_specs(specs);
        self.users.redistribute(n_cores)?;
        tracing::info!(n_nodes = self.nodes.len(), n_cores, "Nodes loaded");
        Ok(())
    }

    /// Apply new rules and, when given, a new allowed-users list.
    ///
    /// Allowed users not seen yet are registered first, so their shares are
    /// set before their masters connect. When the rules do not fit, no user
    /// is added and nothing changes.
    pub fn distribute(
        &mut self,
        rules: &DistributionRules,
        allowed_users: Option<BTreeSet<String>>,
    ) -> Result<()> {
        let n_cores = self.nodes.n_cores();
        let newcomers: Vec<&String> = allowed_users
            .iter()
            .flatten()
            .filter(|name| self.users.get(name).is_none())
            .collect();
        let names: Vec<&str> = self
            .users
            .iter()
            .map(|u| u.name.as_str())
            .chain(newcomers.iter().map(|name| name.as_str()))
            .collect();
        rules.compute_shares(&names, n_cores)?;

        for name in allowed_users.iter().flatten() {
            self.users.register(name);
        }
        self.users.distribute_cores(rules, n_cores)?;
        self.users.set_allowed_users(allowed_users);
        Ok(())
    }

    /// Users and nodes at a glance.
    pub fn status_report(&self) -> String {
        report::StatusReport(self).to_string()
    }

    /// Every counter, for debugging the accounting.
    pub fn variables_report(&self) -> String {
        report::VariablesReport(self).to_string()
    }
}

/// The lock-guarded broker state.
#[derive(Debug, Clone, Default)]
pub struct SharedBroker {
    inner: Arc<Mutex<BrokerState>>,
}

impl SharedBroker {
    pub fn new(state: BrokerState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, BrokerState>> {
        self.inner
            .lock()
            .map_err(|_| BrokerError::Fatal("broker state lock poisoned".to_string()))
    }
}
