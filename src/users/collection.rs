use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::distribution::DistributionRules;
use crate::error::{BrokerError, Result};
use crate::nodes::NodeRegistry;
use crate::users::user::{min_portion, MasterAddress, MultiuserJob, User};

/// Outcome of a successful user sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Exists,
    Added,
}

impl SyncOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            SyncOutcome::Exists => "User exists",
            SyncOutcome::Added => "User added",
        }
    }
}

/// A resource request from a user's master.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreRequest<'a> {
    pub user: &'a str,
    pub job_id: u64,
    pub n_cores: u32,
    pub mem: f64,
    pub node_attr: &'a [String],
}

/// All users and the fair-share accounting across them.
///
/// Aggregates are kept in step with every mutation:
/// - `n_min_cores`: sum of `min_cores`
/// - `n_used_cores`: sum of `n_used_cores`
/// - `n_used_min_cores`: sum of `min(min_cores, n_used_cores)`
#[derive(Debug, Default)]
pub struct UsersCollection {
    users: IndexMap<String, User>,
    allowed: Option<BTreeSet<String>>,
    rules: DistributionRules,
    n_min_cores: u32,
    n_used_cores: u32,
    n_used_min_cores: u32,
}

impl UsersCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn n_min_cores(&self) -> u32 {
        self.n_min_cores
    }

    pub fn n_used_cores(&self) -> u32 {
        self.n_used_cores
    }

    pub fn n_used_min_cores(&self) -> u32 {
        self.n_used_min_cores
    }

    pub fn rules(&self) -> &DistributionRules {
        &self.rules
    }

    pub fn allowed_users(&self) -> Option<&BTreeSet<String>> {
        self.allowed.as_ref()
    }

    /// `None` allows everyone.
    pub fn set_allowed_users(&mut self, allowed: Option<BTreeSet<String>>) {
        self.allowed = allowed;
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.as_ref().map_or(true, |a| a.contains(name))
    }

    /// Cores that are neither used nor held back as someone's unused minimum.
    pub fn n_free_cores(&self, n_cores: u32) -> i64 {
        (i64::from(n_cores) - i64::from(self.n_used_cores))
            - (i64::from(self.n_min_cores) - i64::from(self.n_used_min_cores))
    }

    pub fn set_queue_size(&mut self, name: &str, n_queue: u32) -> Result<()> {
        let user = self
            .users
            .get_mut(name)
            .ok_or_else(|| BrokerError::UnknownUser(name.to_string()))?;
        user.n_queue = n_queue;
        Ok(())
    }

    /// Decide whether a user may have `n_cores` more cores, and place the job.
    ///
    /// 1. Within the user's minimum: always granted.
    /// 2. Within minimum plus extra: granted when enough free cores exist.
    /// 3. Beyond that: the user may borrow an equal part of the share idle
    ///    users leave unused, split among all users that still want cores.
    pub fn request_core(&mut self, nodes: &mut NodeRegistry, req: &CoreRequest<'_>) -> Result<String> {
        let n_free_cores = self.n_free_cores(nodes.n_cores());
        let user = self
            .users
            .get(req.user)
            .ok_or_else(|| BrokerError::UnknownUser(req.user.to_string()))?;
        let wanted = user
            .n_used_cores
            .checked_add(req.n_cores)
            .ok_or(BrokerError::NoFreeCores)?;

        let space_available = if wanted <= user.min_cores {
            true
        } else if wanted <= user.share() {
            n_free_cores >= i64::from(req.n_cores)
        } else {
            let (n_extra, n_users_with_queue) = self.borrowable_extra(req.user);
            let n_extra_per_user = n_extra / n_users_with_queue;
            u64::from(wanted) <= u64::from(user.share()) + n_extra_per_user
                && n_free_cores >= i64::from(req.n_cores)
        };

        if !space_available {
            tracing::debug!(
                user = %req.user,
                job_id = req.job_id,
                n_cores = req.n_cores,
                n_free_cores,
                "No free cores"
            );
            return Err(BrokerError::NoFreeCores);
        }

        let node = nodes
            .select_node(req.n_cores, req.mem, req.node_attr)
            .ok_or(BrokerError::NoNodeAvailable)?;
        nodes.allocate(&node, req.n_cores, req.mem);

        let user = self
            .users
            .get_mut(req.user)
            .ok_or_else(|| BrokerError::Internal(format!("user {} vanished", req.user)))?;
        let min_part = min_portion(req.n_cores, user.n_used_cores, user.min_cores);
        user.add_job(MultiuserJob {
            user: req.user.to_string(),
            job_id: req.job_id,
            n_cores: req.n_cores,
            mem: req.mem,
            node: node.clone(),
        });
        self.n_used_cores = self.n_used_cores.saturating_add(req.n_cores);
        self.n_used_min_cores = self.n_used_min_cores.saturating_add(min_part);

        tracing::info!(
            user = %req.user,
            job_id = req.job_id,
            n_cores = req.n_cores,
            mem = req.mem,
            node = %node,
            "Cores granted"
        );
        Ok(node)
    }

    /// Idle share offered by users with nothing queued, and the number of
    /// users competing for it (the requester included).
    ///
    /// Users with a queue that already fill their share compete; users with a
    /// queue below their share neither offer nor compete.
    fn borrowable_extra(&self, requester: &str) -> (u64, u64) {
        let mut n_extra = 0u64;
        let mut n_users_with_queue = 1u64;
        for other in self.users.values().filter(|u| u.name != requester) {
            if other.n_queue == 0 {
                n_extra += u64::from(other.idle_share());
            } else if other.n_used_cores >= other.share() {
                n_users_with_queue += 1;
            }
        }
        (n_extra, n_users_with_queue)
    }

    /// Release a job's cores. Unknown jobs leave every counter untouched.
    pub fn remove_job(&mut self, nodes: &mut NodeRegistry, name: &str, job_id: u64) -> Result<MultiuserJob> {
        let user = self
            .users
            .get_mut(name)
            .ok_or_else(|| BrokerError::UnknownUser(name.to_string()))?;
        let job = user.take_job(job_id).ok_or_else(|| BrokerError::JobNotFound {
            user: name.to_string(),
            job_id,
        })?;
        let min_part = min_portion(job.n_cores, user.n_used_cores, user.min_cores);
        self.n_used_cores = self.n_used_cores.saturating_sub(job.n_cores);
        self.n_used_min_cores = self.n_used_min_cores.saturating_sub(min_part);

        if !nodes.free(&job.node, job.n_cores, job.mem) {
            tracing::warn!(
                user = %name,
                job_id,
                node = %job.node,
                "Job removed from a node that is no longer registered"
            );
        }

        tracing::info!(user = %name, job_id, n_cores = job.n_cores, node = %job.node, "Job removed");
        Ok(job)
    }

    /// Assign every user's `min_cores` and `extra_cores` from `rules`.
    /// On error no user changes.
    pub fn distribute_cores(&mut self, rules: &DistributionRules, n_cores: u32) -> Result<()> {
        let names: Vec<&str> = self.users.keys().map(String::as_str).collect();
        let shares = rules.compute_shares(&names, n_cores)?;

        for (user, share) in self.users.values_mut().zip(shares) {
            user.min_cores = share.min_cores;
            user.extra_cores = share.extra_cores;
        }
        self.rules = rules.clone();
        self.recompute_aggregates(n_cores);

        tracing::info!(
            mode = %rules.mode,
            minimum = rules.minimum,
            n_cores,
            n_users = self.users.len(),
            "Cores distributed"
        );
        Ok(())
    }

    /// Distribute again with the rules last applied.
    pub fn redistribute(&mut self, n_cores: u32) -> Result<()> {
        let rules = self.rules.clone();
        self.distribute_cores(&rules, n_cores)
    }

    /// Rebuild the aggregates and every user's `max_cores` from scratch.
    pub fn recompute_aggregates(&mut self, n_cores: u32) {
        self.n_min_cores = self.sum_over_users(|u| u.min_cores);
        self.n_used_cores = self.sum_over_users(|u| u.n_used_cores);
        self.n_used_min_cores = self.sum_over_users(User::n_used_min_cores);
        for user in self.users.values_mut() {
            user.max_cores = (n_cores + user.min_cores).saturating_sub(self.n_min_cores);
        }
    }

    fn sum_over_users(&self, count: impl Fn(&User) -> u32) -> u32 {
        self.users
            .values()
            .fold(0u32, |acc, u| acc.saturating_add(count(u)))
    }

    /// Add a user known from the allowed-users list before its master has
    /// connected. Returns false when the user already exists.
    ///
    /// Shares are not recomputed; distribute afterwards.
    pub fn register(&mut self, name: &str) -> bool {
        if self.users.contains_key(name) {
            return false;
        }
        self.users
            .insert(name.to_string(), User::new(name, MasterAddress::default()));
        tracing::debug!(user = %name, "User registered");
        true
    }

    /// Register a user's master, or refresh it.
    ///
    /// A new user adopts the jobs its master reports and triggers a
    /// redistribution. A registered user whose master connects for the first
    /// time adopts its jobs the same way. For a user already in contact,
    /// differing job lists are reported as [`BrokerError::JobListDivergence`]
    /// and left for the master to resolve.
    pub fn sync_user(
        &mut self,
        nodes: &mut NodeRegistry,
        name: &str,
        master: MasterAddress,
        cur_jobs: Vec<MultiuserJob>,
    ) -> Result<SyncOutcome> {
        if let Some(user) = self.users.get_mut(name) {
            if !user.has_master() && user.cur_jobs.is_empty() {
                check_reported_jobs(name, &cur_jobs, nodes.n_cores())?;
                user.master = master;
                adopt_jobs(nodes, user, cur_jobs);
                self.recompute_aggregates(nodes.n_cores());
                tracing::info!(user = %name, "Master connected");
                return Ok(SyncOutcome::Exists);
            }

            user.master = master;
            if user.cur_jobs != cur_jobs {
                return Err(BrokerError::JobListDivergence(format!(
                    "broker has [{}], master reported [{}]",
                    join_jobs(&user.cur_jobs),
                    join_jobs(&cur_jobs)
                )));
            }
            return Ok(SyncOutcome::Exists);
        }

        if !self.is_allowed(name) {
            return Err(BrokerError::NotAllowed(name.to_string()));
        }

        check_reported_jobs(name, &cur_jobs, nodes.n_cores())?;
        let mut user = User::new(name, master);
        adopt_jobs(nodes, &mut user, cur_jobs);
        self.users.insert(name.to_string(), user);
        tracing::info!(user = %name, "User added");

        let n_cores = nodes.n_cores();
        if let Err(e) = self.redistribute(n_cores) {
            tracing::warn!(user = %name, error = %e, "Could not redistribute cores for new user");
            self.recompute_aggregates(n_cores);
        }
        Ok(SyncOutcome::Added)
    }

    /// Every user's count matches its jobs and the aggregates match the users.
    pub fn is_consistent(&self) -> bool {
        self.users.values().all(User::is_consistent)
            && self.n_min_cores == self.users.values().map(|u| u.min_cores).sum::<u32>()
            && self.n_used_cores == self.users.values().map(|u| u.n_used_cores).sum::<u32>()
            && self.n_used_min_cores
                == self.users.values().map(User::n_used_min_cores).sum::<u32>()
    }
}

/// Jobs a master reports must fit in the cluster together.
fn check_reported_jobs(name: &str, jobs: &[MultiuserJob], n_cores: u32) -> Result<()> {
    let total = jobs
        .iter()
        .try_fold(0u32, |acc, job| acc.checked_add(job.n_cores));
    match total {
        Some(total) if total <= n_cores => Ok(()),
        _ => Err(BrokerError::Protocol(format!(
            "jobs reported for {} hold more than the {} cores of the cluster",
            name, n_cores
        ))),
    }
}

fn adopt_jobs(nodes: &mut NodeRegistry, user: &mut User, jobs: Vec<MultiuserJob>) {
    for job in jobs {
        if !nodes.allocate(&job.node, job.n_cores, job.mem) {
            tracing::warn!(
                user = %user.name,
                job_id = job.job_id,
                node = %job.node,
                "Reported job runs on an unknown node"
            );
        }
        user.add_job(job);
    }
}

fn join_jobs(jobs: &[MultiuserJob]) -> String {
    jobs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
