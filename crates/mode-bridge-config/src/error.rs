use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(mode_bridge::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(mode_bridge::config::invalid))]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    #[diagnostic(code(mode_bridge::config::missing_field))]
    MissingField { field: String },

    #[error("Invalid control code for mode '{mode}': {reason}")]
    #[diagnostic(
        code(mode_bridge::config::invalid_code),
        help("Control codes are a single printable ASCII character, e.g. \"d\" or \"m\"")
    )]
    InvalidCode {
        mode: String,
        reason: String,
        #[source_code]
        src: String,
        #[label("this code")]
        span: miette::SourceSpan,
    },

    #[error("Mode '{mode}' is mapped more than once")]
    #[diagnostic(code(mode_bridge::config::duplicate_mode))]
    DuplicateMode {
        mode: String,
        #[source_code]
        src: String,
        #[label("mapped again here")]
        span: miette::SourceSpan,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
