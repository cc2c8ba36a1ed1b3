//! KDL configuration parser

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::model::*;

/// Name of the `modes` property that sets the code for unknown modes
const FALLBACK_PROPERTY: &str = "fallback";

// kdl uses an older miette version, so spans are rebuilt from offset/len

fn entry_span(entry: &kdl::KdlEntry) -> miette::SourceSpan {
    let span = entry.span();
    miette::SourceSpan::from((span.offset(), span.len()))
}

fn node_name_span(node: &kdl::KdlNode) -> miette::SourceSpan {
    let span = node.name().span();
    miette::SourceSpan::from((span.offset(), span.len()))
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse the configuration file if it exists, otherwise use built-in defaults
///
/// Only a missing file falls back to defaults. A file that exists but cannot
/// be read or parsed is still an error.
pub fn parse_config_or_default(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(
                "No configuration at {}, using defaults",
                path.display()
            );
            Ok(Config::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "window-manager" => {
                config.window_manager = parse_window_manager(node)?;
            }
            "control-channel" => {
                config.channel = parse_channel(node)?;
            }
            "modes" => {
                config.modes = parse_modes(node, content)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_window_manager(node: &kdl::KdlNode) -> Result<WindowManagerConfig, ConfigError> {
    let mut wm = WindowManagerConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "socket-path" => {
                    wm.socket_path = Some(parse_path(child)?);
                }
                "initial-retry-delay-ms" => {
                    wm.initial_retry_delay = parse_millis(child)?;
                }
                "max-retry-delay-ms" => {
                    wm.max_retry_delay = parse_millis(child)?;
                }
                name => {
                    tracing::warn!("Unknown window-manager option: {}", name);
                }
            }
        }
    }

    if wm.max_retry_delay < wm.initial_retry_delay {
        return Err(ConfigError::Invalid {
            message: format!(
                "max-retry-delay-ms ({}) must not be smaller than initial-retry-delay-ms ({})",
                wm.max_retry_delay.as_millis(),
                wm.initial_retry_delay.as_millis()
            ),
        });
    }

    Ok(wm)
}

fn parse_channel(node: &kdl::KdlNode) -> Result<ChannelConfig, ConfigError> {
    let mut channel = ChannelConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "path" => {
                    channel.path = parse_path(child)?;
                }
                "timeout-ms" => {
                    channel.timeout = parse_millis(child)?;
                }
                name => {
                    tracing::warn!("Unknown control-channel option: {}", name);
                }
            }
        }
    }

    Ok(channel)
}

/// Parse a `modes` block
///
/// A `modes` block replaces the built-in table entirely; modes it does not
/// list resolve to the fallback.
fn parse_modes(node: &kdl::KdlNode, source: &str) -> Result<ModeTable, ConfigError> {
    let mut table = ModeTable::new(ControlCode::DEFAULT);

    for entry in node.entries() {
        match entry.name().map(|n| n.value()) {
            Some(FALLBACK_PROPERTY) => {
                let fallback = parse_code(entry, FALLBACK_PROPERTY, source)?;
                table.set_fallback(fallback);
            }
            Some(other) => {
                tracing::warn!("Unknown modes property: {}", other);
            }
            None => {
                tracing::warn!("Ignoring positional argument on modes node");
            }
        }
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let mode = child.name().value();

            let entry = child
                .entries()
                .iter()
                .find(|e| e.name().is_none())
                .ok_or_else(|| ConfigError::MissingField {
                    field: format!("control code for mode '{}' (e.g., `{} \"d\"`)", mode, mode),
                })?;

            let code = parse_code(entry, mode, source)?;

            if table.insert(mode, code).is_some() {
                return Err(ConfigError::DuplicateMode {
                    mode: mode.to_string(),
                    src: source.to_string(),
                    span: node_name_span(child),
                });
            }
        }
    }

    Ok(table)
}

fn parse_code(entry: &kdl::KdlEntry, mode: &str, source: &str) -> Result<ControlCode, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidCode {
        mode: mode.to_string(),
        reason,
        src: source.to_string(),
        span: entry_span(entry),
    };

    let value = entry
        .value()
        .as_string()
        .ok_or_else(|| invalid("expected a string".to_string()))?;

    value.parse::<ControlCode>().map_err(invalid)
}

fn parse_path(node: &kdl::KdlNode) -> Result<PathBuf, ConfigError> {
    let value = node
        .entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| ConfigError::MissingField {
            field: format!("path for {}", node.name().value()),
        })?;

    Ok(shellexpand::tilde(value).into_owned().into())
}

fn parse_millis(node: &kdl::KdlNode) -> Result<Duration, ConfigError> {
    let name = node.name().value();
    let value = node
        .entries()
        .first()
        .and_then(|e| e.value().as_i64())
        .ok_or_else(|| ConfigError::MissingField {
            field: format!("integer value for {}", name),
        })?;

    if value <= 0 {
        return Err(ConfigError::Invalid {
            message: format!("{} must be a positive number of milliseconds, got {}", name, value),
        });
    }

    Ok(Duration::from_millis(value as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = r#"
            window-manager {
                socket-path "/run/user/1000/i3/ipc-socket.1234"
                initial-retry-delay-ms 250
                max-retry-delay-ms 5000
            }

            control-channel {
                path "/tmp/remapper.fifo"
                timeout-ms 100
            }

            modes fallback="n" {
                default "d"
                mouse "m"
                "<b>launch</b>" "l"
            }
        "#;

        let result = parse_config_str(config).unwrap();

        assert_eq!(
            result.window_manager.socket_path,
            Some(PathBuf::from("/run/user/1000/i3/ipc-socket.1234"))
        );
        assert_eq!(result.window_manager.initial_retry_delay, Duration::from_millis(250));
        assert_eq!(result.window_manager.max_retry_delay, Duration::from_millis(5000));

        assert_eq!(result.channel.path, PathBuf::from("/tmp/remapper.fifo"));
        assert_eq!(result.channel.timeout, Duration::from_millis(100));

        assert_eq!(result.modes.len(), 3);
        assert_eq!(result.modes.resolve("default"), ControlCode::DEFAULT);
        assert_eq!(result.modes.resolve("mouse"), ControlCode::MOUSE);
        assert_eq!(result.modes.resolve("<b>launch</b>").as_char(), 'l');
        assert_eq!(result.modes.resolve("resize"), ControlCode::NOOP);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let result = parse_config_str("").unwrap();

        assert_eq!(result.window_manager, WindowManagerConfig::default());
        assert_eq!(result.channel.path, PathBuf::from(DEFAULT_CHANNEL_PATH));
        assert_eq!(
            result.channel.timeout,
            Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS)
        );
        assert_eq!(result.modes, ModeTable::default());
    }

    #[test]
    fn test_modes_block_replaces_defaults() {
        let config = r#"
            modes {
                resize "n"
            }
        "#;

        let result = parse_config_str(config).unwrap();

        assert_eq!(result.modes.len(), 1);
        assert!(!result.modes.contains("mouse"));
        assert_eq!(result.modes.resolve("resize"), ControlCode::NOOP);
        // Without a fallback property unknown modes still map to `d`
        assert_eq!(result.modes.resolve("mouse"), ControlCode::DEFAULT);
    }

    #[test]
    fn test_invalid_code_error() {
        let config = r#"
            modes {
                mouse "mm"
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::InvalidCode { mode, reason, .. } => {
                assert_eq!(mode, "mouse");
                assert!(reason.contains("exactly one character"), "{}", reason);
            }
            _ => panic!("Expected InvalidCode error, got: {:?}", err),
        }
    }

    #[test]
    fn test_non_string_code_error() {
        let config = r#"
            modes {
                mouse 1
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidCode { .. }),
            "Expected InvalidCode error, got: {:?}",
            err
        );
    }

    #[test]
    fn test_invalid_fallback_error() {
        let config = r#"
            modes fallback=" " {
                mouse "m"
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::InvalidCode { mode, .. } => assert_eq!(mode, "fallback"),
            _ => panic!("Expected InvalidCode error, got: {:?}", err),
        }
    }

    #[test]
    fn test_duplicate_mode_error() {
        let config = r#"
            modes {
                mouse "m"
                mouse "n"
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::DuplicateMode { mode, .. } => assert_eq!(mode, "mouse"),
            _ => panic!("Expected DuplicateMode error, got: {:?}", err),
        }
    }

    #[test]
    fn test_mode_without_code_error() {
        let config = r#"
            modes {
                mouse
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::MissingField { field } => assert!(field.contains("mouse")),
            _ => panic!("Expected MissingField error, got: {:?}", err),
        }
    }

    #[test]
    fn test_non_positive_timeout_error() {
        let config = r#"
            control-channel {
                timeout-ms 0
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { .. }),
            "Expected Invalid error, got: {:?}",
            err
        );
    }

    #[test]
    fn test_backoff_cap_below_initial_delay_error() {
        let config = r#"
            window-manager {
                initial-retry-delay-ms 2000
                max-retry-delay-ms 1000
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::Invalid { message } => assert!(message.contains("max-retry-delay-ms")),
            _ => panic!("Expected Invalid error, got: {:?}", err),
        }
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let err = parse_config_str("modes {").unwrap_err();
        assert!(
            matches!(err, ConfigError::ParseError { .. }),
            "Expected ParseError, got: {:?}",
            err
        );
    }

    #[test]
    fn test_unknown_nodes_are_ignored() {
        let config = r#"
            global {
                log-level "debug"
            }
            control-channel {
                colour "blue"
            }
        "#;

        let result = parse_config_str(config).unwrap();
        assert_eq!(result.channel, ChannelConfig::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = parse_config_or_default(&temp_dir.path().join("config.kdl")).unwrap();
        assert_eq!(result.modes, ModeTable::default());
    }

    #[test]
    fn test_parse_config_requires_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let err = parse_config(&temp_dir.path().join("config.kdl")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
