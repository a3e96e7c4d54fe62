use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::distribution::NodeSpec;
use crate::nodes::attr_expr::AttrExpr;

/// Result of one liveness probe of a node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeStatus {
    pub is_up: bool,
    pub n_outsiders: u32,
    pub total_mem: f64,
    pub free_mem_real: f64,
}

impl NodeStatus {
    /// Status recorded for a node whose probe could not run.
    pub fn down() -> Self {
        Self::default()
    }
}

/// A compute node and its bookkeeping.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub address: String,
    pub max_cores: u32,
    pub n_used_cores: u32,
    pub req_mem: f64,
    pub total_mem: f64,
    pub free_mem_real: f64,
    pub n_outsiders: u32,
    pub is_up: bool,
    pub pref_multicores: bool,
    pub attributes: BTreeSet<String>,
    pub last_check: Option<DateTime<Utc>>,
}

impl Node {
    /// New nodes start down until the first probe reports on them.
    pub fn from_spec(spec: &NodeSpec) -> Self {
        Self {
            name: spec.name.clone(),
            address: spec.name.clone(),
            max_cores: spec.max_cores,
            n_used_cores: 0,
            req_mem: 0.0,
            total_mem: 0.0,
            free_mem_real: 0.0,
            n_outsiders: 0,
            is_up: false,
            pref_multicores: spec.pref_multicores,
            attributes: spec.attributes.clone(),
            last_check: None,
        }
    }

    /// Take capacity and attributes from a reloaded spec, keeping usage.
    pub fn update_spec(&mut self, spec: &NodeSpec) {
        self.max_cores = spec.max_cores;
        self.pref_multicores = spec.pref_multicores;
        self.attributes = spec.attributes.clone();
    }

    pub fn spec(&self) -> NodeSpec {
        NodeSpec {
            name: self.name.clone(),
            max_cores: self.max_cores,
            pref_multicores: self.pref_multicores,
            attributes: self.attributes.clone(),
        }
    }

    /// Cores neither used by our jobs nor by outsiders. Negative when
    /// outsiders grew past what is left.
    pub fn free_cores(&self) -> i64 {
        i64::from(self.max_cores) - i64::from(self.n_outsiders) - i64::from(self.n_used_cores)
    }

    /// Memory not yet reserved by jobs placed here.
    pub fn mem_headroom(&self) -> f64 {
        self.total_mem - self.req_mem
    }

    pub fn matches(&self, expr: &AttrExpr) -> bool {
        expr.matches(&self.attributes)
    }

    pub fn allocate(&mut self, cores: u32, mem: f64) {
        self.n_used_cores = self.n_used_cores.saturating_add(cores);
        self.req_mem += mem;
    }

    /// Release resources, never going below zero.
    pub fn free(&mut self, cores: u32, mem: f64) {
        self.n_used_cores = self.n_used_cores.saturating_sub(cores);
        self.req_mem = (self.req_mem - mem).max(0.0);
    }

    /// Apply a probe result and return the change in outsider cores.
    pub fn apply_status(&mut self, status: NodeStatus) -> i64 {
        let delta = i64::from(status.n_outsiders) - i64::from(self.n_outsiders);
        self.is_up = status.is_up;
        self.n_outsiders = status.n_outsiders;
        self.total_mem = status.total_mem;
        self.free_mem_real = status.free_mem_real;
        self.last_check = Some(Utc::now());
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, cores: u32) -> NodeSpec {
        NodeSpec {
            name: name.to_string(),
            max_cores: cores,
            pref_multicores: false,
            attributes: BTreeSet::new(),
        }
    }

    #[test]
    fn new_node_is_down_and_idle() {
        let node = Node::from_spec(&spec("n1", 8));
        assert!(!node.is_up);
        assert_eq!(node.address, "n1");
        assert_eq!(node.free_cores(), 8);
        assert!(node.last_check.is_none());
    }

    #[test]
    fn free_is_floored_at_zero() {
        let mut node = Node::from_spec(&spec("n1", 4));
        node.allocate(2, 1.5);
        node.free(3, 4.0);
        assert_eq!(node.n_used_cores, 0);
        assert_eq!(node.req_mem, 0.0);
    }

    #[test]
    fn outsiders_can_push_free_cores_negative() {
        let mut node = Node::from_spec(&spec("n1", 4));
        node.allocate(3, 0.0);
        let delta = node.apply_status(NodeStatus {
            is_up: true,
            n_outsiders: 2,
            total_mem: 16.0,
            free_mem_real: 10.0,
        });
        assert_eq!(delta, 2);
        assert_eq!(node.free_cores(), -1);
        assert!(node.last_check.is_some());
    }

    #[test]
    fn update_spec_keeps_usage() {
        let mut node = Node::from_spec(&spec("n1", 4));
        node.allocate(2, 3.0);
        let mut bigger = spec("n1", 16);
        bigger.pref_multicores = true;
        node.update_spec(&bigger);
        assert_eq!(node.max_cores, 16);
        assert!(node.pref_multicores);
        assert_eq!(node.n_used_cores, 2);
        assert_eq!(node.req_mem, 3.0);
    }
}
