// Tests for configuration loading

use std::fs;
use tempfile::TempDir;
use tendril_core::config::{ClientConfig, ConfigError, TendrilConfig};
use tendril_core::{EdgeConvention, EdgeFilter};

const MINIMAL: &str = r#"
[[accounts]]
endpoint = "https://api.vk.com/method"
access_token = "token-a"

[crawl]
seeds = ["durov", "1"]
edge_filter = "within-visited"
edge_convention = "undirected"
"#;

#[test]
fn test_minimal_config_defaults() {
    let config = TendrilConfig::from_toml(MINIMAL).unwrap();

    assert_eq!(config.accounts.len(), 1);
    assert_eq!(config.crawl.seeds, vec!["durov", "1"]);
    assert_eq!(config.crawl.max_depth, 1);
    assert_eq!(config.crawl.chunk_size, 20);
    assert_eq!(config.crawl.edge_filter, EdgeFilter::WithinVisited);
    assert_eq!(config.crawl.edge_convention, EdgeConvention::Undirected);

    assert_eq!(config.api.version, "5.154");
    assert_eq!(config.api.max_attempts, 5);
    assert_eq!(config.output.csv_file, "friends.csv");
    assert_eq!(config.store.node_label, "Person");
    assert_eq!(config.store.relationship, "FRIENDS_WITH");
    assert!(config.store.reset);

    let options = config.crawl.expand_options();
    assert_eq!(options.materialize_depth, 1);
}

#[test]
fn test_missing_edge_filter_is_rejected() {
    let content = MINIMAL.replace("edge_filter = \"within-visited\"\n", "");

    let err = TendrilConfig::from_toml(&content).unwrap_err();

    assert!(matches!(err, ConfigError::Parse(_)));
    assert!(err.to_string().contains("edge_filter"));
}

#[test]
fn test_unknown_edge_convention_is_rejected() {
    let content = MINIMAL.replace("\"undirected\"", "\"sideways\"");

    assert!(matches!(
        TendrilConfig::from_toml(&content),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_no_accounts_is_rejected() {
    let content = r#"
accounts = []

[crawl]
seeds = ["durov"]
edge_filter = "dangling"
edge_convention = "directed"
"#;

    assert!(matches!(
        TendrilConfig::from_toml(content),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_empty_seeds_is_rejected() {
    let content = MINIMAL.replace("[\"durov\", \"1\"]", "[]");

    assert!(matches!(
        TendrilConfig::from_toml(&content),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_oversized_chunk_is_rejected() {
    let content = format!("{}chunk_size = 26\n", MINIMAL);

    assert!(matches!(
        TendrilConfig::from_toml(&content),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_materialize_deeper_than_crawl_is_rejected() {
    let content = format!("{}max_depth = 1\nmaterialize_depth = 2\n", MINIMAL);

    assert!(matches!(
        TendrilConfig::from_toml(&content),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_bad_backoff_factor_is_rejected() {
    for factor in ["-1.0", "nan", "inf"] {
        let content = format!("{}\n[api]\nbackoff_factor = {}\n", MINIMAL, factor);

        let err = TendrilConfig::from_toml(&content).unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)), "{} accepted", factor);
        assert!(err.to_string().contains("backoff_factor"));
    }
}

#[test]
fn test_zero_backoff_factor_is_accepted() {
    let content = format!("{}\n[api]\nbackoff_factor = 0.0\n", MINIMAL);

    let config = TendrilConfig::from_toml(&content).unwrap();

    assert_eq!(config.api.client_options().backoff_factor, 0.0);
}

#[test]
fn test_zero_max_attempts_is_rejected() {
    let content = format!("{}\n[api]\nmax_attempts = 0\n", MINIMAL);

    assert!(matches!(
        TendrilConfig::from_toml(&content),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_client_config_ignores_crawl_section() {
    let content = r#"
[[accounts]]
endpoint = "https://api.vk.com/method"
access_token = "token-a"

[[accounts]]
endpoint = "https://api.vk.com/method"
access_token = "token-b"
"#;

    let config = ClientConfig::from_toml(content).unwrap();
    assert_eq!(config.accounts.len(), 2);
    assert_eq!(config.api.max_attempts, 5);

    // A full crawl config works too, half-written crawl settings included
    let partial = MINIMAL.replace("edge_filter = \"within-visited\"\n", "");
    assert!(ClientConfig::from_toml(&partial).is_ok());
}

#[test]
fn test_client_config_validates_accounts_and_api() {
    assert!(matches!(
        ClientConfig::from_toml("accounts = []\n"),
        Err(ConfigError::Invalid(_))
    ));

    let content = format!("{}\n[api]\nbackoff_factor = -0.5\n", MINIMAL);
    assert!(matches!(
        ClientConfig::from_toml(&content),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_client_config_from_full_config() {
    let config = TendrilConfig::from_toml(MINIMAL).unwrap();

    let client = config.client_config();

    assert_eq!(client.accounts.len(), 1);
    assert_eq!(client.accounts[0].access_token, "token-a");
    assert_eq!(client.api.version, "5.154");
}

#[test]
fn test_access_token_from_environment() {
    // SAFETY: the variable name is unique to this test
    unsafe {
        std::env::set_var("TENDRIL_TEST_TOKEN", "secret-from-env");
    }
    let content = MINIMAL.replace("\"token-a\"", "\"$TENDRIL_TEST_TOKEN\"");

    let config = TendrilConfig::from_toml(&content).unwrap();

    assert_eq!(config.accounts[0].access_token, "secret-from-env");
}

#[test]
fn test_unset_token_variable_is_rejected() {
    let content = MINIMAL.replace("\"token-a\"", "\"$TENDRIL_TEST_TOKEN_UNSET\"");

    assert!(matches!(
        TendrilConfig::from_toml(&content),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_load_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tendril.toml");
    let content = format!(
        "{}\n[store]\npath = \"{}\"\nreset = false\n",
        MINIMAL,
        temp_dir.path().join("graph.db").display()
    );
    fs::write(&path, content).unwrap();

    let config = TendrilConfig::load(&path).unwrap();

    assert!(!config.store.reset);
    assert_eq!(config.store_path(), temp_dir.path().join("graph.db"));
}

#[test]
fn test_load_missing_file() {
    let temp_dir = TempDir::new().unwrap();

    let err = TendrilConfig::load(&temp_dir.path().join("missing.toml")).unwrap_err();

    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_custom_error_table() {
    let temp_dir = TempDir::new().unwrap();
    let table = temp_dir.path().join("errors.toml");
    fs::write(
        &table,
        r#"
[[error]]
code = 6
status = 429
action = "retry"
description = "Too many requests per second"
"#,
    )
    .unwrap();

    let content = format!("{}\n[api]\nerrors = \"{}\"\n", MINIMAL, table.display());
    let config = TendrilConfig::from_toml(&content).unwrap();

    let policy = config.api.load_policy().unwrap();
    assert_eq!(policy.len(), 1);
    assert!(policy.lookup(6).is_some());
}

#[test]
fn test_builtin_error_table() {
    let config = TendrilConfig::from_toml(MINIMAL).unwrap();

    let policy = config.api.load_policy().unwrap();

    assert!(policy.lookup(5).is_some());
    assert!(policy.lookup(4242).is_none());
}
