//! Tests for the msgq-cli library module.

use super::*;
use msgq_runtime::{OverflowPolicy, PrimitiveConfig};
use serial_test::serial;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

// ============================================================================
// Argument Parsing Tests
// ============================================================================

mod parsing {
    use super::*;

    #[test]
    fn test_push_parses_key_type_and_payload() {
        let cli = Cli::try_parse_from(["msgq", "push", "--key", "31337", "--type", "3", "test"])
            .unwrap();

        match cli.command {
            Commands::Push {
                queue,
                message_type,
                payload,
                nowait,
                ..
            } => {
                assert_eq!(queue.key, Some(QueueKey::new(31337)));
                assert_eq!(message_type, Some(3));
                assert_eq!(payload, "test");
                assert!(!nowait);
            }
            other => panic!("Expected Push command, got {other:?}"),
        }
    }

    #[test]
    fn test_pop_accepts_negative_type_and_hex_key() {
        let cli = Cli::try_parse_from(["msgq", "pop", "-k", "0x7a69", "-t", "-4", "--nowait"])
            .unwrap();

        match cli.command {
            Commands::Pop {
                queue,
                message_type,
                nowait,
                format,
            } => {
                assert_eq!(queue.key, Some(QueueKey::new(31337)));
                assert_eq!(message_type, -4);
                assert!(nowait);
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("Expected Pop command, got {other:?}"),
        }
    }

    #[test]
    fn test_non_integer_key_is_rejected() {
        let result = Cli::try_parse_from(["msgq", "stat", "--key", "abc"]);

        assert!(result.is_err());
    }

    #[test]
    fn test_permissions_parse_as_written() {
        let cli = Cli::try_parse_from(["msgq", "remove", "-k", "1", "-p", "0x640"]).unwrap();

        match cli.command {
            Commands::Remove { queue } => {
                assert_eq!(queue.perms, Some(Permissions::new(0x640)));
            }
            other => panic!("Expected Remove command, got {other:?}"),
        }
    }
}

// ============================================================================
// Configuration Tests
// ============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CliConfig::default();

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.queue.key.is_none());
        assert_eq!(config.queue.permissions, 0x666);
    }

    #[test]
    #[serial]
    fn test_load_configuration_from_file() {
        let file = write_config(
            r#"
[queue]
key = 31337
permissions = 0x640

[queue.primitive]
type = "in_memory"

[queue.session.pending]
capacity = 8
overflow = "stop_loop"

[logging]
level = "debug"
"#,
        );

        let config = load_configuration(Some(file.path())).unwrap();

        assert_eq!(config.queue.key, Some(QueueKey::new(31337)));
        assert_eq!(config.queue.permissions, 0x640);
        assert!(matches!(config.queue.primitive, PrimitiveConfig::InMemory(_)));
        assert_eq!(config.queue.session.pending.capacity, Some(8));
        assert_eq!(config.queue.session.pending.overflow, OverflowPolicy::StopLoop);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let file = write_config("[queue]\nkey = 1\n");
        std::env::set_var("MSGQ__QUEUE__KEY", "42");

        let config = load_configuration(Some(file.path()));
        std::env::remove_var("MSGQ__QUEUE__KEY");

        assert_eq!(config.unwrap().queue.key, Some(QueueKey::new(42)));
    }

    #[test]
    #[serial]
    fn test_missing_file_is_reported() {
        let err = load_configuration(Some(Path::new("/nonexistent/msgq.toml"))).unwrap_err();

        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_command_line_overrides_configured_queue() {
        let mut config = CliConfig::default();
        config.queue.key = Some(QueueKey::new(1));
        let args = QueueArgs {
            key: Some(QueueKey::new(2)),
            perms: Some(Permissions::new(0x600)),
        };

        let queue = resolve_queue_config(&config, &args);

        assert_eq!(queue.key, Some(QueueKey::new(2)));
        assert_eq!(queue.permissions, 0x600);
    }

    #[test]
    fn test_render_config_as_toml() {
        let mut config = CliConfig::default();
        config.queue.key = Some(QueueKey::new(31337));

        let rendered = render_config(&config, ConfigFormat::Toml).unwrap();

        assert!(rendered.contains("key = 31337"));
        assert!(rendered.contains("[logging]"));
    }
}

// ============================================================================
// Output Tests
// ============================================================================

mod output {
    use super::*;

    fn message(body: &'static [u8]) -> ReceivedMessage {
        ReceivedMessage::new(3, Bytes::from_static(body))
    }

    #[test]
    fn test_render_text_and_hex() {
        let message = message(b"test");

        assert_eq!(render_message(&message, OutputFormat::Text).unwrap(), "3\ttest");
        assert_eq!(
            render_message(&message, OutputFormat::Hex).unwrap(),
            "3\t74657374"
        );
    }

    #[test]
    fn test_render_json_keeps_binary_payload_as_hex() {
        let rendered = render_message(&message(&[0xff, 0x00]), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(value["message_type"], 3);
        assert_eq!(value["size"], 2);
        assert!(value["text"].is_null());
        assert_eq!(value["hex"], "ff00");
    }

    #[test]
    fn test_render_stats_text() {
        let stats = QueueStats {
            message_count: 2,
            max_bytes: 16384,
            last_send_pid: Some(10),
            last_receive_pid: None,
            last_send_at: None,
            last_receive_at: None,
            changed_at: None,
        };

        let rendered = render_stats(QueueKey::new(5), &stats, OutputFormat::Text).unwrap();

        assert!(rendered.contains("messages:         2"));
        assert!(rendered.contains("(pid 10)"));
        assert!(rendered.contains("never"));
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload("abc", false).unwrap(), Bytes::from("abc"));
        assert_eq!(decode_payload("0aff", true).unwrap(), Bytes::from(vec![0x0a, 0xff]));

        let err = decode_payload("zz", true).unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument { .. }));
    }

    #[test]
    fn test_exit_codes_skip_usage_error_code() {
        let codes = [
            CliError::Configuration(ConfigError::Render {
                message: "x".to_string(),
            })
            .exit_code(),
            CliError::Queue(QueueError::SessionClosed { key: 1 }).exit_code(),
            CliError::CommandFailed {
                message: "x".to_string(),
            }
            .exit_code(),
            CliError::InvalidArgument {
                arg: "x".to_string(),
                message: "y".to_string(),
            }
            .exit_code(),
        ];

        assert!(!codes.contains(&0));
        assert!(!codes.contains(&2));
    }
}
