//! Loading of the administrator-maintained configuration files.
//!
//! Three files describe the cluster and its policy:
//! - **node list**: one node per line, `<name> <max_cores> [M] [attr ...]`
//! - **distribution rules**: `<even|explicit> [minimum <n>]` header, then
//!   `<user>=[<min>+]<extra>[%]` lines in explicit mode
//! - **allowed users**: one user name per line
//!
//! Parsing never touches broker state. Callers read and parse first, and only
//! then take the lock to apply the result, so a malformed file leaves the
//! running configuration as it was.

pub mod node_list;
pub mod rules;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub use node_list::{parse_node_list, NodeSpec};
pub use rules::{CoreShare, DistributionMode, DistributionRules, ExtraShare, UserShare};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};

/// Parse the allowed-users file.
pub fn parse_allowed_users(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(|line| node_list::strip_comment(line).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads the configuration files named in [`BrokerConfig`].
#[derive(Debug, Clone)]
pub struct CoreDistributionLoader {
    nodes_file: PathBuf,
    distribution_file: PathBuf,
    allowed_users_file: Option<PathBuf>,
}

impl CoreDistributionLoader {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            nodes_file: config.nodes_file.clone(),
            distribution_file: config.distribution_file.clone(),
            allowed_users_file: config.allowed_users_file.clone(),
        }
    }

    pub fn load_nodes(&self) -> Result<Vec<NodeSpec>> {
        parse_node_list(&read(&self.nodes_file)?)
    }

    /// A missing rules file means an even split without minimum.
    pub fn load_rules(&self) -> Result<DistributionRules> {
        if !self.distribution_file.exists() {
            tracing::info!(
                path = %self.distribution_file.display(),
                "No distribution rules file, distributing evenly"
            );
            return Ok(DistributionRules::default());
        }
        DistributionRules::parse(&read(&self.distribution_file)?)
    }

    /// `None` when no allowed-users file is configured: everyone is allowed.
    pub fn load_allowed_users(&self) -> Result<Option<BTreeSet<String>>> {
        match &self.allowed_users_file {
            Some(path) => Ok(Some(parse_allowed_users(&read(path)?))),
            None => Ok(None),
        }
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        BrokerError::parse(path.display().to_string(), 0, format!("cannot read file: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_users_one_per_line() {
        let users = parse_allowed_users("alice\n\n  bob  \n# carol\n");
        assert_eq!(users.len(), 2);
        assert!(users.contains("alice"));
        assert!(users.contains("bob"));
    }

    #[test]
    fn loader_reads_configured_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = BrokerConfig::in_dir(dir.path());
        std::fs::write(&config.nodes_file, "alpha 4\nbeta 2 M\n").unwrap();

        let loader = CoreDistributionLoader::new(&config);
        let nodes = loader.load_nodes().unwrap();
        assert_eq!(nodes.len(), 2);

        // Rules file absent
        assert_eq!(loader.load_rules().unwrap(), DistributionRules::default());

        // Allowed users file configured but absent is an error
        assert!(loader.load_allowed_users().is_err());
        std::fs::write(config.allowed_users_file.as_ref().unwrap(), "alice\n").unwrap();
        let allowed = loader.load_allowed_users().unwrap().unwrap();
        assert!(allowed.contains("alice"));
    }

    #[test]
    fn missing_node_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = CoreDistributionLoader::new(&BrokerConfig::in_dir(dir.path()));
        assert!(matches!(
            loader.load_nodes(),
            Err(BrokerError::Parse { .. })
        ));
    }
}
