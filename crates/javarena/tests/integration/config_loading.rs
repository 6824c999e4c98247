use std::time::Duration;

use javarena::config::Config;

use super::FIXTURES_PATH;

#[test]
fn test_load_valid_config() {
    let path = format!("{FIXTURES_PATH}/configs/valid_full.toml");
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.compile_timeout(), Duration::from_secs(20));
    assert_eq!(config.grace_period(), Duration::from_secs(3));
    assert_eq!(config.max_session_duration(), Some(Duration::from_secs(120)));
    assert_eq!(config.batch_timeout(), Duration::from_secs(4));
    assert_eq!(config.workspace.prefix, "arena-");
    assert_eq!(config.server.listen.port(), 7071);
}

#[test]
fn test_load_minimal_config() {
    let path = format!("{FIXTURES_PATH}/configs/valid_minimal.toml");
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.toolchain.compiler, "javac");
    assert_eq!(config.toolchain.runtime, "java");
    assert_eq!(config.max_session_duration(), None);
}

#[test]
fn test_load_invalid_zero_grace() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_zero_grace.toml");
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_empty_compiler() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_empty_compiler.toml");
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_syntax() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_syntax.toml");
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_nonexistent_file() {
    let result = Config::from_file("/nonexistent/path/config.toml");
    assert!(result.is_err());
}
