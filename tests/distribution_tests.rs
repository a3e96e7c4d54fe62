use std::collections::BTreeSet;

use qpy_broker::broker::BrokerState;
use qpy_broker::config::BrokerConfig;
use qpy_broker::distribution::{
    parse_node_list, CoreDistributionLoader, DistributionMode, DistributionRules,
};
use qpy_broker::error::BrokerError;
use qpy_broker::users::MasterAddress;

fn state_with(node_list: &str, users: &[&str]) -> BrokerState {
    let mut state = BrokerState::new();
    state
        .reload_nodes(&parse_node_list(node_list).unwrap())
        .unwrap();
    for user in users {
        state
            .sync_user(user, MasterAddress::default(), Vec::new())
            .unwrap();
    }
    state
}

fn assert_aggregates_hold(state: &BrokerState) {
    let users = &state.users;
    assert!(users.is_consistent());
    assert!(users.n_used_min_cores() <= users.n_min_cores());
    assert!(users.n_min_cores() <= state.n_cores());
}

#[test]
fn test_even_distribution_sums_to_capacity() {
    let mut state = state_with("n1 6\nn2 4\n", &["a", "b", "c"]);
    state.distribute(&DistributionRules::even(0), None).unwrap();

    let extras: Vec<u32> = state.users.iter().map(|u| u.extra_cores).collect();
    assert!(extras.iter().all(|&e| e == 3 || e == 4));
    assert_eq!(extras.iter().sum::<u32>(), 10);
    assert_aggregates_hold(&state);
}

#[test]
fn test_max_cores_follow_the_distribution() {
    let mut state = state_with("n1 10\n", &["a", "b"]);
    state.distribute(&DistributionRules::even(3), None).unwrap();

    // n_cores + own minimum - all minimums
    for user in state.users.iter() {
        assert_eq!(user.min_cores, 3);
        assert_eq!(user.max_cores, 7);
    }
    assert_eq!(state.users.n_min_cores(), 6);
    assert_eq!(state.users.n_free_cores(state.n_cores()), 4);
}

#[test]
fn test_explicit_rules_with_percentages() {
    let rules = DistributionRules::parse(
        "# cluster policy\nexplicit minimum 1\nalice=3+50%\nbob=2\n",
    )
    .unwrap();
    assert_eq!(rules.mode, DistributionMode::Explicit);

    let mut state = state_with("n1 12\n", &["alice", "bob", "carol"]);
    state.distribute(&rules, None).unwrap();

    let alice = state.users.get("alice").unwrap();
    let bob = state.users.get("bob").unwrap();
    let carol = state.users.get("carol").unwrap();
    assert_eq!((alice.min_cores, bob.min_cores, carol.min_cores), (3, 1, 1));
    // 7 cores left after minimums: alice 50% = 3, bob 2, remaining 2 to the listed users
    assert_eq!(alice.extra_cores, 4);
    assert_eq!(bob.extra_cores, 3);
    assert_eq!(carol.extra_cores, 0);
    let total: u32 = state.users.iter().map(|u| u.share()).sum();
    assert_eq!(total, 12);
    assert_aggregates_hold(&state);
}

#[test]
fn test_explicit_remainder_goes_to_listed_users_only() {
    let rules = DistributionRules::parse("explicit\nalice=1\n").unwrap();
    let mut state = state_with("n1 10\n", &["alice", "bob"]);
    state.distribute(&rules, None).unwrap();

    let alice = state.users.get("alice").unwrap();
    let bob = state.users.get("bob").unwrap();
    assert_eq!((alice.min_cores, alice.extra_cores), (0, 10));
    assert_eq!((bob.min_cores, bob.extra_cores), (0, 0));

    let rules = DistributionRules::parse("explicit minimum 1\nalice=2\nbob=1\n").unwrap();
    let mut state = state_with("n1 40\n", &["alice", "bob", "carol", "dave"]);
    state.distribute(&rules, None).unwrap();

    // 36 left after minimums, 3 requested, 33 split between alice and bob
    let extras: Vec<u32> = state.users.iter().map(|u| u.extra_cores).collect();
    assert_eq!(extras, vec![2 + 17, 1 + 16, 0, 0]);
    assert!(state.users.iter().all(|u| u.min_cores == 1));
    assert_aggregates_hold(&state);
}

#[test]
fn test_failed_distribution_leaves_state_unchanged() {
    let mut state = state_with("n1 4\n", &["a", "b"]);
    state.distribute(&DistributionRules::even(1), None).unwrap();
    let before: Vec<(u32, u32)> = state
        .users
        .iter()
        .map(|u| (u.min_cores, u.extra_cores))
        .collect();

    let err = state
        .distribute(&DistributionRules::even(3), None)
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::InsufficientCores {
            requested: 6,
            available: 4
        }
    ));

    let after: Vec<(u32, u32)> = state
        .users
        .iter()
        .map(|u| (u.min_cores, u.extra_cores))
        .collect();
    assert_eq!(before, after);
    assert_eq!(state.users.rules(), &DistributionRules::even(1));
    assert_aggregates_hold(&state);
}

#[test]
fn test_distribute_replaces_allowed_users() {
    let mut state = state_with("n1 4\n", &[]);
    let allowed: BTreeSet<String> = ["alice".to_string()].into_iter().collect();
    state
        .distribute(&DistributionRules::default(), Some(allowed))
        .unwrap();
    assert!(state.users.is_allowed("alice"));
    assert!(!state.users.is_allowed("bob"));

    state.distribute(&DistributionRules::default(), None).unwrap();
    assert!(state.users.is_allowed("bob"));
}

#[test]
fn test_reload_nodes_redistributes() {
    let mut state = state_with("n1 4\n", &["a", "b"]);
    state.distribute(&DistributionRules::even(1), None).unwrap();
    assert_eq!(state.users.get("a").unwrap().share(), 2);

    state
        .reload_nodes(&parse_node_list("n1 4\nn2 8\n").unwrap())
        .unwrap();
    assert_eq!(state.n_cores(), 12);
    assert_eq!(state.users.get("a").unwrap().share(), 6);
    assert_eq!(state.users.get("b").unwrap().share(), 6);
    assert_aggregates_hold(&state);
}

#[test]
fn test_reload_nodes_too_small_for_minimums_is_rejected() {
    let mut state = state_with("n1 8\n", &["a", "b"]);
    state.distribute(&DistributionRules::even(3), None).unwrap();

    let err = state
        .reload_nodes(&parse_node_list("n1 4\n").unwrap())
        .unwrap_err();
    assert!(matches!(err, BrokerError::InsufficientCores { .. }));
    assert_eq!(state.n_cores(), 8);
    assert_eq!(state.users.get("a").unwrap().min_cores, 3);
}

#[test]
fn test_loader_reads_the_config_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = BrokerConfig::in_dir(dir.path());
    std::fs::write(&config.nodes_file, "n1 8 M\nn2 4 big\n").unwrap();
    std::fs::write(&config.distribution_file, "even minimum 2\n").unwrap();
    std::fs::write(
        config.allowed_users_file.as_ref().unwrap(),
        "alice\nbob\n",
    )
    .unwrap();

    let loader = CoreDistributionLoader::new(&config);
    let specs = loader.load_nodes().unwrap();
    let rules = loader.load_rules().unwrap();
    let allowed = loader.load_allowed_users().unwrap();

    let mut state = BrokerState::new();
    state.reload_nodes(&specs).unwrap();
    state.distribute(&rules, allowed).unwrap();
    assert_eq!(state.n_cores(), 12);
    assert_eq!(state.users.rules().minimum, 2);
    assert!(state.users.is_allowed("bob"));
    assert!(!state.users.is_allowed("eve"));

    let open = CoreDistributionLoader::new(&config.clone().without_allowed_users());
    assert_eq!(open.load_allowed_users().unwrap(), None);
}

#[test]
fn test_malformed_rules_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = BrokerConfig::in_dir(dir.path());
    std::fs::write(&config.distribution_file, "even\nalice=2\n").unwrap();

    let err = CoreDistributionLoader::new(&config).load_rules().unwrap_err();
    match err {
        BrokerError::Parse { line, .. } => assert_eq!(line, 2),
        other => panic!("expected parse error, got {:?}", other),
    }
}
