use std::fmt;

use chrono::Utc;

use super::BrokerState;

/// Users and nodes as two tables.
pub(super) struct StatusReport<'a>(pub &'a BrokerState);

/// Every counter, one per line, then each user and node.
pub(super) struct VariablesReport<'a>(pub &'a BrokerState);

impl fmt::Display for StatusReport<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0;

        writeln!(
            out,
            "Cores: {} used of {} ({} taken by outsiders)",
            state.users.n_used_cores(),
            state.nodes.n_cores(),
            state.nodes.n_outsiders()
        )?;
        writeln!(out)?;

        if state.users.is_empty() {
            writeln!(out, "No users.")?;
        } else {
            writeln!(
                out,
                "{:<16} {:>6} {:>6} {:>6} {:>6} {:>6}",
                "USER", "USED", "MIN", "EXTRA", "MAX", "QUEUE"
            )?;
            writeln!(out, "{}", "-".repeat(51))?;
            for user in state.users.iter() {
                writeln!(
                    out,
                    "{:<16} {:>6} {:>6} {:>6} {:>6} {:>6}",
                    user.name,
                    user.n_used_cores,
                    user.min_cores,
                    user.extra_cores,
                    user.max_cores,
                    user.n_queue
                )?;
            }
        }
        writeln!(out)?;

        if state.nodes.is_empty() {
            return writeln!(out, "No nodes.");
        }

        writeln!(
            out,
            "{:<16} {:>9} {:>5} {:>15} {:<5} ATTRIBUTES",
            "NODE", "USED/MAX", "OUTS", "MEM REQ/TOTAL", "STATE"
        )?;
        writeln!(out, "{}", "-".repeat(66))?;
        for node in state.nodes.iter() {
            let mut attrs: Vec<&str> = node.attributes.iter().map(String::as_str).collect();
            if node.pref_multicores {
                attrs.insert(0, "[M]");
            }
            writeln!(
                out,
                "{:<16} {:>9} {:>5} {:>15} {:<5} {}",
                node.name,
                format!("{}/{}", node.n_used_cores, node.max_cores),
                node.n_outsiders,
                format!("{:.1}/{:.1}", node.req_mem, node.total_mem),
                if node.is_up { "up" } else { "down" },
                attrs.join(" ")
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for VariablesReport<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0;
        let n_cores = state.nodes.n_cores();

        writeln!(out, "now              = {}", Utc::now().to_rfc3339())?;
        writeln!(out, "started_at       = {}", state.started_at.to_rfc3339())?;
        writeln!(out, "save_messages    = {}", state.save_messages)?;
        writeln!(out, "n_cores          = {}", n_cores)?;
        writeln!(out, "n_outsiders      = {}", state.nodes.n_outsiders())?;
        writeln!(out, "n_min_cores      = {}", state.users.n_min_cores())?;
        writeln!(out, "n_used_cores     = {}", state.users.n_used_cores())?;
        writeln!(out, "n_used_min_cores = {}", state.users.n_used_min_cores())?;
        writeln!(out, "n_free_cores     = {}", state.users.n_free_cores(n_cores))?;
        let rules = state.users.rules();
        writeln!(out, "distribution     = {} minimum {}", rules.mode, rules.minimum)?;
        match state.users.allowed_users() {
            Some(allowed) => {
                let names: Vec<&str> = allowed.iter().map(String::as_str).collect();
                writeln!(out, "allowed_users    = {}", names.join(" "))?;
            }
            None => writeln!(out, "allowed_users    = (any)")?,
        }

        for user in state.users.iter() {
            writeln!(out)?;
            writeln!(out, "[user {}]", user.name)?;
            writeln!(out, "  master = {}:{}", user.master.address, user.master.port)?;
            writeln!(
                out,
                "  min_cores = {}, extra_cores = {}, max_cores = {}",
                user.min_cores, user.extra_cores, user.max_cores
            )?;
            writeln!(
                out,
                "  n_used_cores = {}, n_queue = {}",
                user.n_used_cores, user.n_queue
            )?;
            for job in &user.cur_jobs {
                writeln!(out, "  job {}", job)?;
            }
        }

        for node in state.nodes.iter() {
            writeln!(out)?;
            writeln!(out, "[node {}]", node.name)?;
            writeln!(out, "  spec = {}", node.spec())?;
            writeln!(out, "  address = {}, is_up = {}", node.address, node.is_up)?;
            writeln!(
                out,
                "  n_used_cores = {}, n_outsiders = {}",
                node.n_used_cores, node.n_outsiders
            )?;
            writeln!(
                out,
                "  req_mem = {:.2}, total_mem = {:.2}, free_mem_real = {:.2}",
                node.req_mem, node.total_mem, node.free_mem_real
            )?;
            if let Some(checked) = node.last_check {
                writeln!(out, "  last_check = {}", checked.to_rfc3339())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::parse_node_list;

    #[test]
    fn empty_state_reports_no_users_or_nodes() {
        let text = StatusReport(&BrokerState::new()).to_string();
        assert!(text.starts_with("Cores: 0 used of 0"));
        assert!(text.contains("No users."));
        assert!(text.ends_with("No nodes.\n"));
    }

    #[test]
    fn variables_list_nodes_and_allowed_users() {
        let mut state = BrokerState::new();
        state
            .reload_nodes(&parse_node_list("n1 4 M gpu\n").unwrap())
            .unwrap();
        let text = VariablesReport(&state).to_string();
        assert!(text.contains("n_cores          = 4\n"));
        assert!(text.contains("allowed_users    = (any)\n"));
        assert!(text.contains("[node n1]"));
        assert!(!text.contains("last_check"));
    }
}
