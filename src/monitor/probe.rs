use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::ProbeConfig;
use crate::nodes::NodeStatus;

/// A probe that could not produce a status. The node is then marked down.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to run probe: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("probe exited with code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("unexpected probe output: {0:?}")]
    Output(String),
}

/// Reports the state of one node.
#[async_trait]
pub trait NodeProbe: Send + Sync {
    async fn probe(&self, address: &str) -> Result<NodeStatus, ProbeError>;
}

/// Probes a node by running a shell command on it over ssh.
///
/// The command prints three numbers: busy processes not started by the
/// scheduler, total memory and available memory, both in GiB.
#[derive(Debug, Clone)]
pub struct SshProbe {
    config: ProbeConfig,
}

impl SshProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn remote_command(&self) -> String {
        format!(
            "ps -eo pcpu=,args= | awk -v m='{marker}' '$1 >= {threshold} && index($0, m) == 0 {{ n++ }} END {{ print n + 0 }}'; \
             free -b | awk '/^Mem:/ {{ print $2 / 1073741824, $7 / 1073741824 }}'",
            marker = self.config.job_marker,
            threshold = self.config.busy_threshold,
        )
    }
}

#[async_trait]
impl NodeProbe for SshProbe {
    async fn probe(&self, address: &str) -> Result<NodeStatus, ProbeError> {
        let output = Command::new(&self.config.ssh_program)
            .args(&self.config.ssh_options)
            .arg(address)
            .arg(self.remote_command())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `<n_outsiders> <total_mem> <free_mem>`, whitespace separated.
pub fn parse_probe_output(text: &str) -> Result<NodeStatus, ProbeError> {
    let bad = || ProbeError::Output(text.trim().to_string());
    let fields: Vec<&str> = text.split_whitespace().collect();
    let &[outsiders, total, free] = fields.as_slice() else {
        return Err(bad());
    };

    let n_outsiders: u32 = outsiders.parse().map_err(|_| bad())?;
    let total_mem: f64 = total.parse().map_err(|_| bad())?;
    let free_mem_real: f64 = free.parse().map_err(|_| bad())?;

    Ok(NodeStatus {
        is_up: true,
        n_outsiders,
        total_mem,
        free_mem_real,
    })
}
