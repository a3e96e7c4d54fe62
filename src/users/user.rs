use serde::{Deserialize, Serialize};

/// A job holding cores on a node, as tracked by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiuserJob {
    pub user: String,
    pub job_id: u64,
    pub n_cores: u32,
    pub mem: f64,
    pub node: String,
}

impl std::fmt::Display for MultiuserJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} ({} cores, {:.1} GB) on {}",
            self.user, self.job_id, self.n_cores, self.mem, self.node
        )
    }
}

/// Where a user's master listens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MasterAddress {
    pub address: String,
    pub port: u16,
    pub conn_key: String,
}

/// Per-user core accounting.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub master: MasterAddress,
    pub min_cores: u32,
    pub extra_cores: u32,
    pub max_cores: u32,
    pub n_used_cores: u32,
    pub n_queue: u32,
    pub cur_jobs: Vec<MultiuserJob>,
}

impl User {
    pub fn new(name: impl Into<String>, master: MasterAddress) -> Self {
        Self {
            name: name.into(),
            master,
            min_cores: 0,
            extra_cores: 0,
            max_cores: 0,
            n_used_cores: 0,
            n_queue: 0,
            cur_jobs: Vec::new(),
        }
    }

    /// Cores of this user counted against its guaranteed minimum.
    pub fn n_used_min_cores(&self) -> u32 {
        self.n_used_cores.min(self.min_cores)
    }

    /// `min_cores + extra_cores`.
    pub fn share(&self) -> u32 {
        self.min_cores.saturating_add(self.extra_cores)
    }

    /// Whether a master has synced for this user yet.
    pub fn has_master(&self) -> bool {
        !self.master.address.is_empty()
    }

    /// Cores of the user's share it is not using.
    pub fn idle_share(&self) -> u32 {
        self.share().saturating_sub(self.n_used_cores)
    }

    pub fn find_job(&self, job_id: u64) -> Option<&MultiuserJob> {
        self.cur_jobs.iter().find(|j| j.job_id == job_id)
    }

    pub fn add_job(&mut self, job: MultiuserJob) {
        self.n_used_cores = self.n_used_cores.saturating_add(job.n_cores);
        self.cur_jobs.push(job);
    }

    pub fn take_job(&mut self, job_id: u64) -> Option<MultiuserJob> {
        let pos = self.cur_jobs.iter().position(|j| j.job_id == job_id)?;
        let job = self.cur_jobs.remove(pos);
        self.n_used_cores = self.n_used_cores.saturating_sub(job.n_cores);
        Some(job)
    }

    /// `n_used_cores` equals the cores held by `cur_jobs`.
    pub fn is_consistent(&self) -> bool {
        self.n_used_cores == self.cur_jobs.iter().map(|j| j.n_cores).sum::<u32>()
    }
}

/// Cores out of `n_cores` that fall below `min_cores` when added on top of
/// `used_below` already used cores.
pub fn min_portion(n_cores: u32, used_below: u32, min_cores: u32) -> u32 {
    n_cores.min(min_cores.saturating_sub(used_below))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: u64, cores: u32) -> MultiuserJob {
        MultiuserJob {
            user: "alice".to_string(),
            job_id: id,
            n_cores: cores,
            mem: 1.0,
            node: "n1".to_string(),
        }
    }

    #[test]
    fn add_and_take_jobs_keep_counts() {
        let mut user = User::new("alice", MasterAddress::default());
        user.add_job(job(1, 2));
        user.add_job(job(2, 3));
        assert_eq!(user.n_used_cores, 5);
        assert!(user.is_consistent());

        let taken = user.take_job(1).unwrap();
        assert_eq!(taken.n_cores, 2);
        assert_eq!(user.n_used_cores, 3);
        assert!(user.is_consistent());
        assert!(user.take_job(1).is_none());
    }

    #[test]
    fn min_portion_counts_only_cores_below_minimum() {
        assert_eq!(min_portion(2, 0, 4), 2);
        assert_eq!(min_portion(3, 2, 4), 2);
        assert_eq!(min_portion(3, 4, 4), 0);
        assert_eq!(min_portion(3, 6, 4), 0);
    }

    #[test]
    fn idle_share() {
        let mut user = User::new("alice", MasterAddress::default());
        user.min_cores = 1;
        user.extra_cores = 2;
        user.add_job(job(1, 1));
        assert_eq!(user.idle_share(), 2);
        user.add_job(job(2, 4));
        assert_eq!(user.idle_share(), 0);
        assert_eq!(user.n_used_min_cores(), 1);
    }
}
