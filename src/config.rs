use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const NODES_FILE: &str = "nodes";
pub const DISTRIBUTION_FILE: &str = "distribution_rules";
pub const ALLOWED_USERS_FILE: &str = "allowed_users";

/// How node liveness probes are run.
///
/// Each probe is one remote shell command over ssh that reports the number
/// of outsider cores and the node's memory.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Program used for remote execution
    pub ssh_program: String,
    /// Options passed before the node address
    pub ssh_options: Vec<String>,
    /// CPU percentage above which a foreign process occupies a core
    pub busy_threshold: f64,
    /// Substring of the command line of processes started by the scheduler
    pub job_marker: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            ssh_options: vec![
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                "ConnectTimeout=10".to_string(),
            ],
            busy_threshold: 50.0,
            job_marker: "qpy".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub listen_addr: SocketAddr,
    /// Shared secret every request must carry
    pub conn_key: String,
    pub nodes_file: PathBuf,
    pub distribution_file: PathBuf,
    /// When unset, any user may register
    pub allowed_users_file: Option<PathBuf>,
    /// Time between two liveness cycles
    pub check_interval: Duration,
    pub probe: ProbeConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9999)),
            conn_key: String::new(),
            nodes_file: PathBuf::from(NODES_FILE),
            distribution_file: PathBuf::from(DISTRIBUTION_FILE),
            allowed_users_file: None,
            check_interval: Duration::from_secs(300),
            probe: ProbeConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn new(listen_addr: SocketAddr, conn_key: impl Into<String>) -> Self {
        Self {
            listen_addr,
            conn_key: conn_key.into(),
            ..Default::default()
        }
    }

    /// Configuration whose files live in `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::default().with_config_dir(dir)
    }

    pub fn with_config_dir(mut self, dir: &Path) -> Self {
        self.nodes_file = dir.join(NODES_FILE);
        self.distribution_file = dir.join(DISTRIBUTION_FILE);
        self.allowed_users_file = Some(dir.join(ALLOWED_USERS_FILE));
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }

    pub fn without_allowed_users(mut self) -> Self {
        self.allowed_users_file = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_config_default() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.ssh_program, "ssh");
        assert!(cfg.ssh_options.contains(&"BatchMode=yes".to_string()));
        assert_eq!(cfg.busy_threshold, 50.0);
        assert_eq!(cfg.job_marker, "qpy");
    }

    #[test]
    fn broker_config_default() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:9999");
        assert!(cfg.conn_key.is_empty());
        assert!(cfg.allowed_users_file.is_none());
        assert_eq!(cfg.check_interval, Duration::from_secs(300));
    }

    #[test]
    fn broker_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = BrokerConfig::new(addr, "secret");
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.conn_key, "secret");
    }

    #[test]
    fn broker_config_in_dir() {
        let cfg = BrokerConfig::in_dir(Path::new("/etc/qpy"));
        assert_eq!(cfg.nodes_file, PathBuf::from("/etc/qpy/nodes"));
        assert_eq!(
            cfg.distribution_file,
            PathBuf::from("/etc/qpy/distribution_rules")
        );
        assert_eq!(
            cfg.allowed_users_file,
            Some(PathBuf::from("/etc/qpy/allowed_users"))
        );
    }

    #[test]
    fn broker_config_builders() {
        let cfg = BrokerConfig::in_dir(Path::new("/tmp"))
            .with_check_interval(Duration::from_secs(5))
            .without_allowed_users();
        assert_eq!(cfg.check_interval, Duration::from_secs(5));
        assert!(cfg.allowed_users_file.is_none());
    }
}
