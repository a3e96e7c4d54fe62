use indexmap::IndexMap;

use crate::distribution::node_list::strip_comment;
use crate::error::{BrokerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionMode {
    Even,
    Explicit,
}

impl std::fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionMode::Even => write!(f, "even"),
            DistributionMode::Explicit => write!(f, "explicit"),
        }
    }
}

/// Extra cores asked for by one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraShare {
    Cores(u32),
    /// Percentage of the cores left after every minimum is taken out.
    Percent(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserShare {
    /// Overrides the blanket minimum when set.
    pub min_cores: Option<u32>,
    pub extra: ExtraShare,
}

/// Per-user `(min_cores, extra_cores)` decided by a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreShare {
    pub min_cores: u32,
    pub extra_cores: u32,
}

/// Parsed distribution rules file.
///
/// ```text
/// explicit minimum 1
/// alice=2+30%
/// bob=4
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRules {
    pub mode: DistributionMode,
    pub minimum: u32,
    pub shares: IndexMap<String, UserShare>,
}

impl Default for DistributionRules {
    fn default() -> Self {
        Self::even(0)
    }
}

impl DistributionRules {
    pub fn even(minimum: u32) -> Self {
        Self {
            mode: DistributionMode::Even,
            minimum,
            shares: IndexMap::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut rules: Option<DistributionRules> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            match rules.as_mut() {
                None => rules = Some(Self::parse_header(line, line_no)?),
                Some(rules) => {
                    if rules.mode == DistributionMode::Even {
                        return Err(BrokerError::parse(
                            "distribution",
                            line_no,
                            "user rules are only allowed in explicit mode",
                        ));
                    }
                    let (user, share) = parse_user_share(line, line_no)?;
                    if rules.shares.insert(user.clone(), share).is_some() {
                        return Err(BrokerError::parse(
                            "distribution",
                            line_no,
                            format!("user '{}' listed twice", user),
                        ));
                    }
                }
            }
        }

        rules.ok_or_else(|| BrokerError::parse("distribution", 1, "missing header line"))
    }

    fn parse_header(line: &str, line_no: usize) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let mode = match fields[0] {
            "even" => DistributionMode::Even,
            "explicit" => DistributionMode::Explicit,
            other => {
                return Err(BrokerError::parse(
                    "distribution",
                    line_no,
                    format!("unknown distribution mode '{}'", other),
                ))
            }
        };

        let minimum = match &fields[1..] {
            [] => 0,
            ["minimum", value] => value.parse().map_err(|_| {
                BrokerError::parse(
                    "distribution",
                    line_no,
                    format!("invalid minimum '{}'", value),
                )
            })?,
            _ => {
                return Err(BrokerError::parse(
                    "distribution",
                    line_no,
                    "expected '<even|explicit> [minimum <n>]'",
                ))
            }
        };

        Ok(Self {
            mode,
            minimum,
            shares: IndexMap::new(),
        })
    }

    /// Compute every user's share of `n_cores`, in the order given.
    ///
    /// Cores left after the minimums and the requested extras go out one at a
    /// time, round-robin. In explicit mode only users named in the rules take
    /// part; with none listed the remainder stays unassigned.
    pub fn compute_shares<S: AsRef<str>>(&self, users: &[S], n_cores: u32) -> Result<Vec<CoreShare>> {
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let mut shares: Vec<CoreShare> = users
            .iter()
            .map(|user| CoreShare {
                min_cores: match self.mode {
                    DistributionMode::Even => self.minimum,
                    DistributionMode::Explicit => self
                        .shares
                        .get(user.as_ref())
                        .and_then(|s| s.min_cores)
                        .unwrap_or(self.minimum),
                },
                extra_cores: 0,
            })
            .collect();

        let total_min: u64 = shares.iter().map(|s| u64::from(s.min_cores)).sum();
        let left_cores = i64::from(n_cores) - total_min as i64;
        if left_cores < 0 {
            return Err(BrokerError::InsufficientCores {
                requested: total_min,
                available: u64::from(n_cores),
            });
        }

        let mut remaining = left_cores;
        if self.mode == DistributionMode::Explicit {
            for (share, user) in shares.iter_mut().zip(users) {
                share.extra_cores = match self.shares.get(user.as_ref()).map(|s| s.extra) {
                    Some(ExtraShare::Cores(cores)) => cores,
                    Some(ExtraShare::Percent(pct)) => (left_cores * i64::from(pct) / 100) as u32,
                    None => 0,
                };
                remaining -= i64::from(share.extra_cores);
            }
            if remaining < 0 {
                return Err(BrokerError::InsufficientCores {
                    requested: (i64::from(n_cores) - remaining) as u64,
                    available: u64::from(n_cores),
                });
            }
        }

        // Explicit rules hand the remainder to listed users only
        let recipients: Vec<usize> = users
            .iter()
            .enumerate()
            .filter(|(_, user)| {
                self.mode == DistributionMode::Even || self.shares.contains_key(user.as_ref())
            })
            .map(|(idx, _)| idx)
            .collect();
        if recipients.is_empty() {
            return Ok(shares);
        }

        let n_recipients = recipients.len() as i64;
        let per_user = remaining / n_recipients;
        let leftover = (remaining % n_recipients) as usize;
        for (pos, &idx) in recipients.iter().enumerate() {
            shares[idx].extra_cores += per_user as u32;
            if pos < leftover {
                shares[idx].extra_cores += 1;
            }
        }

        Ok(shares)
    }
}

/// `user=[min+]extra[%]`
fn parse_user_share(line: &str, line_no: usize) -> Result<(String, UserShare)> {
    let bad = |msg: &str| BrokerError::parse("distribution", line_no, msg.to_string());

    let (user, value) = line
        .split_once('=')
        .ok_or_else(|| bad("expected '<user>=[<min>+]<extra>[%]'"))?;
    let user = user.trim();
    if user.is_empty() || user.contains(char::is_whitespace) {
        return Err(bad("invalid user name"));
    }

    let value = value.trim();
    let (min_part, extra_part) = match value.split_once('+') {
        Some((min, extra)) => (Some(min.trim()), extra.trim()),
        None => (None, value),
    };

    let min_cores = min_part
        .map(|m| m.parse::<u32>().map_err(|_| bad("invalid minimum")))
        .transpose()?;

    let extra = match extra_part.strip_suffix('%') {
        Some(pct) => {
            let pct: u32 = pct.trim().parse().map_err(|_| bad("invalid percentage"))?;
            if pct > 100 {
                return Err(bad("percentage above 100"));
            }
            ExtraShare::Percent(pct)
        }
        None => ExtraShare::Cores(extra_part.parse().map_err(|_| bad("invalid extra cores"))?),
    };

    Ok((user.to_string(), UserShare { min_cores, extra }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_even_header() {
        let rules = DistributionRules::parse("even\n").unwrap();
        assert_eq!(rules.mode, DistributionMode::Even);
        assert_eq!(rules.minimum, 0);

        let rules = DistributionRules::parse("# comment\neven minimum 2\n").unwrap();
        assert_eq!(rules.minimum, 2);
    }

    #[test]
    fn parses_explicit_rules() {
        let rules =
            DistributionRules::parse("explicit minimum 1\nalice=2+30%\nbob=4\ncarol=50%\n").unwrap();
        assert_eq!(rules.mode, DistributionMode::Explicit);
        assert_eq!(
            rules.shares["alice"],
            UserShare {
                min_cores: Some(2),
                extra: ExtraShare::Percent(30)
            }
        );
        assert_eq!(
            rules.shares["bob"],
            UserShare {
                min_cores: None,
                extra: ExtraShare::Cores(4)
            }
        );
        assert_eq!(rules.shares["carol"].extra, ExtraShare::Percent(50));
    }

    #[test]
    fn rejects_malformed_files() {
        assert!(DistributionRules::parse("").is_err());
        assert!(DistributionRules::parse("fair\n").is_err());
        assert!(DistributionRules::parse("even minimum lots\n").is_err());
        assert!(DistributionRules::parse("even\nalice=2\n").is_err());
        assert!(DistributionRules::parse("explicit\nalice\n").is_err());
        assert!(DistributionRules::parse("explicit\nalice=x+2\n").is_err());
        assert!(DistributionRules::parse("explicit\nalice=120%\n").is_err());
        assert!(DistributionRules::parse("explicit\nalice=1\nalice=2\n").is_err());
    }

    #[test]
    fn even_split_equalizes_within_one_core() {
        let shares = DistributionRules::even(0)
            .compute_shares(&["a", "b", "c"], 10)
            .unwrap();
        let extras: Vec<u32> = shares.iter().map(|s| s.extra_cores).collect();
        assert_eq!(extras, vec![4, 3, 3]);
        assert_eq!(extras.iter().sum::<u32>(), 10);
    }

    #[test]
    fn even_split_with_minimum() {
        let shares = DistributionRules::even(2)
            .compute_shares(&["a", "b"], 7)
            .unwrap();
        assert_eq!(shares[0], CoreShare { min_cores: 2, extra_cores: 2 });
        assert_eq!(shares[1], CoreShare { min_cores: 2, extra_cores: 1 });
    }

    #[test]
    fn minimums_above_capacity_fail() {
        let err = DistributionRules::even(3)
            .compute_shares(&["a", "b"], 5)
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::InsufficientCores {
                requested: 6,
                available: 5
            }
        ));
    }

    #[test]
    fn explicit_percentages_use_cores_left_after_minimums() {
        let rules = DistributionRules::parse("explicit minimum 1\nalice=2+50%\nbob=1\n").unwrap();
        // minimums 2 + 1 + 1 = 4, left = 16, alice 8, bob 1, remainder 7
        // split between alice and bob
        let shares = rules.compute_shares(&["alice", "bob", "carol"], 20).unwrap();
        assert_eq!(shares[0].min_cores, 2);
        assert_eq!(shares[1].min_cores, 1);
        assert_eq!(shares[2].min_cores, 1);
        assert_eq!(shares[0].extra_cores, 8 + 4);
        assert_eq!(shares[1].extra_cores, 1 + 3);
        assert_eq!(shares[2].extra_cores, 0);
        let total: u32 = shares.iter().map(|s| s.min_cores + s.extra_cores).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn explicit_listed_user_takes_what_it_asked_for() {
        let rules = DistributionRules::parse("explicit\nalice=4\n").unwrap();
        let shares = rules.compute_shares(&["alice", "bob"], 4).unwrap();
        assert_eq!(shares[0], CoreShare { min_cores: 0, extra_cores: 4 });
        assert_eq!(shares[1], CoreShare::default());
    }

    #[test]
    fn explicit_remainder_skips_unlisted_users() {
        let rules = DistributionRules::parse("explicit\nalice=1\n").unwrap();
        let shares = rules.compute_shares(&["alice", "bob"], 10).unwrap();
        assert_eq!(shares[0], CoreShare { min_cores: 0, extra_cores: 10 });
        assert_eq!(shares[1], CoreShare::default());
    }

    #[test]
    fn explicit_remainder_without_listed_users_stays_unassigned() {
        let rules = DistributionRules::parse("explicit minimum 1\nzoe=2\n").unwrap();
        let shares = rules.compute_shares(&["alice", "bob"], 8).unwrap();
        assert_eq!(shares[0], CoreShare { min_cores: 1, extra_cores: 0 });
        assert_eq!(shares[1], CoreShare { min_cores: 1, extra_cores: 0 });
    }

    #[test]
    fn explicit_extras_above_capacity_fail() {
        let rules = DistributionRules::parse("explicit\nalice=3\nbob=3\n").unwrap();
        assert!(rules.compute_shares(&["alice", "bob"], 5).is_err());
    }

    #[test]
    fn no_users_no_shares() {
        let users: [&str; 0] = [];
        assert!(DistributionRules::default()
            .compute_shares(&users, 8)
            .unwrap()
            .is_empty());
    }
}
