mod common;

use shellbridge::common::config::{apply_overrides, load_config, ConfigOverrides};
use common::config_test_utils::with_config_env;

//============
// Precedence
//============

#[test]
fn precedence_defaults_file_env_cli() {
    with_config_env(
        r#"
        [server]
        port = 1111
        "#,
        |path| {
            std::env::set_var("SHELLBRIDGE_SERVER__PORT", "2222");

            let overrides = ConfigOverrides {
                host: None,
                port: Some(3333),
            };
            let config = load_config(Some(path)).expect("load config");
            let config = apply_overrides(config, &overrides);
            assert_eq!(config.server.port, 3333);
        },
    );
}

#[test]
fn precedence_defaults_file_env_without_cli() {
    with_config_env(
        r#"
        [server]
        port = 1111
        "#,
        |path| {
            std::env::set_var("SHELLBRIDGE_SERVER__PORT", "2222");

            let config = load_config(Some(path)).expect("load config");
            assert_eq!(config.server.port, 2222);
        },
    );
}

#[test]
fn file_overrides_defaults() {
    with_config_env(
        r#"
        [transfers]
        max_concurrent_transfers = 5

        [terminal]
        low_bandwidth_interval_ms = 80
        "#,
        |path| {
            let config = load_config(Some(path)).expect("load config");
            assert_eq!(config.transfers.max_concurrent_transfers, 5);
            assert_eq!(config.terminal.low_bandwidth_interval_ms, 80);
            // untouched sections keep their defaults
            assert_eq!(config.terminal.batch_interval_ms, 16);
            assert_eq!(config.files.max_upload_bytes, 100 * 1024 * 1024);
        },
    );
}

#[test]
fn missing_file_falls_back_to_defaults() {
    with_config_env("", |path| {
        let missing = path.with_file_name("absent.toml");
        let config = load_config(Some(&missing)).expect("load config");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.transfers.max_concurrent_transfers, 3);
    });
}

//============
// Validation
//============

#[test]
fn rejects_zero_chunk_size() {
    with_config_env(
        r#"
        [transfers]
        chunk_size = 0
        "#,
        |path| {
            let err = load_config(Some(path)).expect_err("expected validation failure");
            assert!(err.to_string().contains("chunk_size"));
        },
    );
}

#[test]
fn rejects_zero_concurrency_from_env() {
    with_config_env("", |path| {
        std::env::set_var("SHELLBRIDGE_TRANSFERS__MAX_CONCURRENT_TRANSFERS", "0");
        let err = load_config(Some(path)).expect_err("expected validation failure");
        assert!(err.to_string().contains("max_concurrent_transfers"));
    });
}

#[test]
fn rejects_over_max_concurrency() {
    with_config_env(
        r#"
        [transfers]
        max_concurrent_transfers = 1000
        "#,
        |path| {
            let err = load_config(Some(path)).expect_err("expected validation failure");
            assert!(err.to_string().contains("max_concurrent_transfers"));
        },
    );
}

#[test]
fn malformed_file_names_the_path() {
    with_config_env("[server\nport = ", |path| {
        let err = load_config(Some(path)).expect_err("expected parse failure");
        assert!(format!("{err:#}").contains("config.toml"));
    });
}
