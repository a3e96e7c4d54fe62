use indexmap::IndexMap;

use crate::distribution::{parse_node_list, NodeSpec};
use crate::error::Result;
use crate::nodes::attr_expr::AttrExpr;
use crate::nodes::node::{Node, NodeStatus};

/// The set of compute nodes, in selection order.
///
/// Nodes preferring multicore jobs come first, each group in node-list order.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: IndexMap<String, Node>,
    n_outsiders: i64,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a node list and apply it. On a parse error nothing changes.
    pub fn load(&mut self, text: &str) -> Result<()> {
        let specs = parse_node_list(text)?;
        self.apply_specs(&specs);
        Ok(())
    }

    /// Replace the node set with `specs`.
    ///
    /// Known nodes keep their usage and probe results. Nodes missing from
    /// `specs` are dropped together with whatever was allocated on them.
    pub fn apply_specs(&mut self, specs: &[NodeSpec]) {
        let mut old = std::mem::take(&mut self.nodes);
        let ordered = specs
            .iter()
            .filter(|s| s.pref_multicores)
            .chain(specs.iter().filter(|s| !s.pref_multicores));

        for spec in ordered {
            let node = match old.shift_remove(&spec.name) {
                Some(mut node) => {
                    node.update_spec(spec);
                    node
                }
                None => {
                    tracing::info!(node = %spec.name, max_cores = spec.max_cores, "Node added");
                    Node::from_spec(spec)
                }
            };
            self.nodes.insert(spec.name.clone(), node);
        }

        for (name, node) in old {
            if node.n_used_cores > 0 {
                tracing::warn!(
                    node = %name,
                    n_used_cores = node.n_used_cores,
                    "Node removed while jobs are allocated on it"
                );
            } else {
                tracing::info!(node = %name, "Node removed");
            }
        }

        self.n_outsiders = self.nodes.values().map(|n| i64::from(n.n_outsiders)).sum();
    }

    /// Sum of all nodes' capacity.
    pub fn n_cores(&self) -> u32 {
        self.nodes.values().map(|n| n.max_cores).sum()
    }

    /// Cores taken by processes the scheduler does not know about.
    pub fn n_outsiders(&self) -> i64 {
        self.n_outsiders
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node list as it would be written back to disk.
    pub fn specs(&self) -> Vec<NodeSpec> {
        self.nodes.values().map(Node::spec).collect()
    }

    /// `(name, address)` of every node, for the liveness monitor.
    pub fn probe_targets(&self) -> Vec<(String, String)> {
        self.nodes
            .values()
            .map(|n| (n.name.clone(), n.address.clone()))
            .collect()
    }

    /// Whether `node` satisfies the attribute expression. Malformed
    /// expressions match.
    pub fn attribute_match<S: AsRef<str>>(node: &Node, attr_expr: &[S]) -> bool {
        node.matches(&compile_attr_expr(attr_expr))
    }

    /// Choose a node for a job.
    ///
    /// Single-core jobs first go to the non-multicore node with the most free
    /// cores, keeping multicore nodes available. Otherwise the first node in
    /// selection order that fits wins.
    pub fn select_node<S: AsRef<str>>(&self, n_cores: u32, mem: f64, attr_expr: &[S]) -> Option<String> {
        let expr = compile_attr_expr(attr_expr);
        let wanted = i64::from(n_cores);

        if n_cores == 1 {
            let best = self
                .nodes
                .values()
                .filter(|n| {
                    n.is_up
                        && !n.pref_multicores
                        && n.matches(&expr)
                        && n.free_mem_real > mem
                        && n.mem_headroom() > mem
                        && n.free_cores() >= wanted
                })
                .fold(None::<&Node>, |best, n| match best {
                    Some(b) if b.free_cores() >= n.free_cores() => Some(b),
                    _ => Some(n),
                });
            if let Some(node) = best {
                return Some(node.name.clone());
            }
        }

        self.nodes
            .values()
            .find(|n| {
                n.is_up && n.matches(&expr) && n.free_cores() >= wanted && n.mem_headroom() > mem
            })
            .map(|n| n.name.clone())
    }

    /// Returns false when the node is not registered.
    pub fn allocate(&mut self, name: &str, cores: u32, mem: f64) -> bool {
        match self.nodes.get_mut(name) {
            Some(node) => {
                node.allocate(cores, mem);
                true
            }
            None => false,
        }
    }

    /// Returns false when the node is not registered.
    pub fn free(&mut self, name: &str, cores: u32, mem: f64) -> bool {
        match self.nodes.get_mut(name) {
            Some(node) => {
                node.free(cores, mem);
                true
            }
            None => false,
        }
    }

    /// Record a probe result. Nodes removed since the probe started are
    /// ignored.
    pub fn apply_status(&mut self, name: &str, status: NodeStatus) -> bool {
        match self.nodes.get_mut(name) {
            Some(node) => {
                if node.is_up != status.is_up {
                    tracing::info!(node = %name, is_up = status.is_up, "Node state changed");
                }
                self.n_outsiders += node.apply_status(status);
                true
            }
            None => false,
        }
    }
}

fn compile_attr_expr<S: AsRef<str>>(words: &[S]) -> AttrExpr {
    match AttrExpr::parse(words) {
        Ok(expr) => expr,
        Err(e) => {
            let text: Vec<&str> = words.iter().map(|w| w.as_ref()).collect();
            tracing::warn!(
                expr = %text.join(" "),
                error = %e,
                "Malformed node attribute expression, matching every node"
            );
            AttrExpr::Any
        }
    }
}
