use letter_core::config::StorageBackend;
use letter_core::{LetterConfig, LetterError, WorkflowSettings};
use std::time::Duration;
use tempfile::TempDir;

const MINIMAL: &str = r#"{
    "renderer": { "base_url": "http://renderer:8090" },
    "mailer": {
        "base_url": "https://mail.example.com/api",
        "api_key": "secret",
        "from_address": "hr@example.com"
    }
}"#;

#[test]
fn test_minimal_config_uses_defaults() {
    let config = LetterConfig::from_json_str(MINIMAL).unwrap();

    assert_eq!(config.renderer.timeout_secs, 30);
    assert_eq!(config.mailer.timeout_secs, 30);
    assert_eq!(config.workflow.max_retries, 3);
    assert_eq!(config.workflow.bulk_parallelism, 4);
    assert_eq!(config.storage.backend, StorageBackend::File);
    assert_eq!(config.storage.data_dir, "/data/letters");
    assert_eq!(config.server.port, 8080);

    let settings = WorkflowSettings::from(&config);
    assert_eq!(settings.render_timeout, Duration::from_secs(30));
    assert_eq!(settings.max_retries, 3);
}

#[test]
fn test_aliases_and_overrides() {
    let json = r#"{
        "renderer": { "url": "http://renderer:8090", "timeout_secs": 5 },
        "mailer": {
            "api_url": "https://mail.example.com/api",
            "token": "secret",
            "from": "hr@example.com"
        },
        "workflow": { "max_retries": 5, "bulk_parallelism": 16 },
        "storage": { "backend": "memory" },
        "server": { "port": 9000 }
    }"#;

    let config = LetterConfig::from_json_str(json).unwrap();
    assert_eq!(config.renderer.base_url, "http://renderer:8090");
    assert_eq!(config.renderer.timeout_secs, 5);
    assert_eq!(config.mailer.api_key, "secret");
    assert_eq!(config.mailer.from_address, "hr@example.com");
    assert_eq!(config.workflow.max_retries, 5);
    assert_eq!(config.workflow.bulk_parallelism, 16);
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.server.port, 9000);
}

#[test]
fn test_invalid_configs_are_rejected() {
    let cases = [
        r#"{ "renderer": { "base_url": "" },
             "mailer": { "base_url": "m", "api_key": "k", "from_address": "hr@example.com" } }"#,
        r#"{ "renderer": { "base_url": "r" },
             "mailer": { "base_url": "m", "api_key": "", "from_address": "hr@example.com" } }"#,
        r#"{ "renderer": { "base_url": "r" },
             "mailer": { "base_url": "m", "api_key": "k", "from_address": "hr" } }"#,
        r#"{ "renderer": { "base_url": "r" },
             "mailer": { "base_url": "m", "api_key": "k", "from_address": "hr@example.com" },
             "workflow": { "bulk_parallelism": 0 } }"#,
        r#"{ "renderer": { "base_url": "r", "timeout_secs": 0 },
             "mailer": { "base_url": "m", "api_key": "k", "from_address": "hr@example.com" } }"#,
        r#"{ "renderer": { "base_url": "r" } }"#,
    ];

    for case in cases {
        let err = LetterConfig::from_json_str(case).unwrap_err();
        assert!(matches!(err, LetterError::Config(_)), "accepted: {}", case);
    }
}

#[test]
fn test_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("letters.json");
    std::fs::write(&path, MINIMAL).unwrap();

    let config = LetterConfig::from_file(&path).unwrap();
    assert_eq!(config.mailer.from_address, "hr@example.com");

    let missing = LetterConfig::from_file(dir.path().join("missing.json"));
    assert!(matches!(missing, Err(LetterError::Config(_))));
}
