use std::collections::BTreeSet;
use std::fmt;

use crate::error::{BrokerError, Result};

/// One entry of the node list: `<name> <max_cores> [M] [attr ...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub max_cores: u32,
    pub pref_multicores: bool,
    pub attributes: BTreeSet<String>,
}

impl fmt::Display for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.max_cores)?;
        if self.pref_multicores {
            write!(f, " M")?;
        }
        for attr in &self.attributes {
            write!(f, " {}", attr)?;
        }
        Ok(())
    }
}

/// Parse the node list. Blank lines and `#` comments are skipped; a node
/// named twice is an error.
pub fn parse_node_list(text: &str) -> Result<Vec<NodeSpec>> {
    let mut specs: Vec<NodeSpec> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw);
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else {
            continue;
        };

        let cores_field = fields
            .next()
            .ok_or_else(|| BrokerError::parse("nodes", line_no, "missing core count"))?;
        let max_cores: u32 = cores_field.parse().map_err(|_| {
            BrokerError::parse(
                "nodes",
                line_no,
                format!("invalid core count '{}'", cores_field),
            )
        })?;

        let mut pref_multicores = false;
        let mut attributes = BTreeSet::new();
        for (pos, field) in fields.enumerate() {
            if pos == 0 && field == "M" {
                pref_multicores = true;
            } else {
                attributes.insert(field.to_string());
            }
        }

        if specs.iter().any(|s| s.name == name) {
            return Err(BrokerError::parse(
                "nodes",
                line_no,
                format!("node '{}' listed twice", name),
            ));
        }

        specs.push(NodeSpec {
            name: name.to_string(),
            max_cores,
            pref_multicores,
            attributes,
        });
    }

    Ok(specs)
}

pub(crate) fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_attributes() {
        let specs = parse_node_list("alpha 8 M big fast\nbeta 4 slow\n").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "alpha");
        assert_eq!(specs[0].max_cores, 8);
        assert!(specs[0].pref_multicores);
        assert!(specs[0].attributes.contains("big"));
        assert!(specs[0].attributes.contains("fast"));
        assert!(!specs[1].pref_multicores);
        assert_eq!(specs[1].attributes.len(), 1);
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let specs = parse_node_list("# cluster\n\nalpha 2 # lab machine\n").unwrap();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].attributes.is_empty());
    }

    #[test]
    fn m_only_counts_right_after_cores() {
        let specs = parse_node_list("alpha 2 big M\n").unwrap();
        assert!(!specs[0].pref_multicores);
        assert!(specs[0].attributes.contains("M"));
    }

    #[test]
    fn rejects_bad_core_count() {
        let err = parse_node_list("alpha 2\nbeta many\n").unwrap_err();
        assert!(matches!(err, BrokerError::Parse { line: 2, .. }));
    }

    #[test]
    fn rejects_missing_core_count() {
        assert!(parse_node_list("alpha\n").is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        assert!(parse_node_list("alpha 2\nalpha 4\n").is_err());
    }

    #[test]
    fn display_reproduces_the_line() {
        let specs = parse_node_list("alpha 8 M big fast\nbeta 4\n").unwrap();
        assert_eq!(specs[0].to_string(), "alpha 8 M big fast");
        assert_eq!(specs[1].to_string(), "beta 4");
    }
}
