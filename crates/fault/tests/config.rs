use fault::{CONFIG_FILE, ConfigError, Direction, FaultConfig};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

const CONFIG: &str = r#"
[synthesis]
num_tests = 3

[process]
cwd = "build"

[[circuit]]
name = "Counter"
ports = [
    { name = "en", width = 1, direction = "in" },
    { name = "count", width = 8, direction = "out" },
]
"#;

#[test]
fn test_search_finds_nearest_ancestor() {
    let root = tempdir().unwrap();
    let nested = root.path().join("src/tests/deep");
    fs::create_dir_all(&nested).unwrap();
    fs::write(root.path().join(CONFIG_FILE), CONFIG).unwrap();

    let (path, config) = FaultConfig::search_from(&nested).unwrap().unwrap();
    assert_eq!(path, root.path().join(CONFIG_FILE));
    assert_eq!(config.synthesis_options().num_tests, 3);
    assert_eq!(config.process.cwd, Some(root.path().join("build")));
    assert_eq!(config.circuits[0].name, "Counter");
    assert_eq!(config.circuits[0].ports[1].direction, Direction::Out);
}

#[test]
fn test_inner_file_shadows_outer() {
    let root = tempdir().unwrap();
    let inner = root.path().join("inner");
    fs::create_dir_all(&inner).unwrap();
    fs::write(root.path().join(CONFIG_FILE), CONFIG).unwrap();
    fs::write(inner.join(CONFIG_FILE), "[synthesis]\nseed = 9\n").unwrap();

    let (path, config) = FaultConfig::search_from(&inner).unwrap().unwrap();
    assert_eq!(path, inner.join(CONFIG_FILE));
    assert_eq!(config.synthesis_options().seed, Some(9));
    assert!(config.circuits.is_empty());
}

#[test]
fn test_invalid_file_reported_with_path() {
    let root = tempdir().unwrap();
    fs::write(root.path().join(CONFIG_FILE), "[synthesis\n").unwrap();
    let err = FaultConfig::search_from(root.path()).unwrap_err();
    match err {
        ConfigError::Parse { path, .. } => assert_eq!(path, root.path().join(CONFIG_FILE)),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_file() {
    let err = FaultConfig::load(PathBuf::from("/nonexistent/fault.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}
