use std::io::Write;

use weft_core::config::{AppConfig, ResultPolicy};
use weft_core::error::WeftError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "openai"
model_id = "gpt-4o"
api_key = "sk-test-key"
max_tokens = 2048
temperature = 0.2

[model.retry]
max_retries = 5

[[fallback_models]]
provider = "ollama"
model_id = "llama3.2"
base_url = "http://localhost:11434/v1"

[engine]
default_block_timeout_secs = 20
max_block_timeout_secs = 45
max_tool_rounds = 3
update_buffer = 16
result_policy = "designated_output"

[engine.checker]
default_model_id = "gpt-4o-mini"
authoritative = true
timeout_secs = 5

[gateway]
bind = "0.0.0.0:9999"

[[gateway.api_keys]]
name = "ci"
key = "wk_ci_key"
user_id = "ci-user"

[limits]
max_executions_per_day = 100

[store]
path = "/tmp/weft-test/weft.db"

[[credentials]]
user_id = "ci-user"
integration_type = "custom_webhook"
name = "alerts"
data = { webhook_url = "https://hooks.example.com/alerts", secret = "s" }
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.model_id, "gpt-4o");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 2048);
    assert_eq!(config.model.retry.as_ref().unwrap().max_retries, 5);
    assert_eq!(config.model.retry.as_ref().unwrap().initial_backoff_ms, 1000);
    assert_eq!(config.fallback_models[0].provider, "ollama");

    assert_eq!(config.engine.default_block_timeout_secs, 20);
    assert_eq!(config.engine.max_block_timeout_secs, 45);
    assert_eq!(config.engine.max_tool_rounds, 3);
    assert_eq!(config.engine.update_buffer, 16);
    assert_eq!(config.engine.result_policy, ResultPolicy::DesignatedOutput);
    assert!(config.engine.checker.authoritative);
    assert_eq!(config.engine.checker.timeout_secs, 5);

    assert_eq!(config.gateway.bind, "0.0.0.0:9999");
    assert_eq!(config.gateway.api_keys.len(), 1);
    assert_eq!(config.gateway.api_keys[0].user_id, "ci-user");
    assert_eq!(config.limits.max_executions_per_day, 100);
    assert_eq!(config.store_path(), std::path::PathBuf::from("/tmp/weft-test/weft.db"));

    assert_eq!(config.credentials.len(), 1);
    assert_eq!(config.credentials[0].name, "alerts");
}

#[test]
fn test_env_vars_expand_in_file() {
    std::env::set_var("WEFT_IT_API_KEY", "sk-from-env");
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"[model]\nmodel_id = \"gpt-4o\"\napi_key = \"${WEFT_IT_API_KEY}\"\n")
        .unwrap();

    let config = AppConfig::load(tmp.path()).unwrap();
    assert_eq!(config.model.api_key.as_deref(), Some("sk-from-env"));
    std::env::remove_var("WEFT_IT_API_KEY");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = AppConfig::load(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, WeftError::ConfigNotFound(_)));
}

#[test]
fn test_malformed_file_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"[model\nmodel_id = ").unwrap();
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, WeftError::Config(_)));
}

#[test]
fn test_round_trips_through_toml() {
    let config = AppConfig::parse("[model]\nmodel_id = \"gpt-4o\"\n").unwrap();
    let text = toml::to_string_pretty(&config).unwrap();
    let again = AppConfig::parse(&text).unwrap();
    assert_eq!(again.model.model_id, "gpt-4o");
    assert_eq!(again.engine.default_block_timeout_secs, 30);
    assert_eq!(again.limits.max_executions_per_day, -1);
}
