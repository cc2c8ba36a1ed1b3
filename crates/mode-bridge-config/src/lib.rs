//! Configuration parsing for mode-bridge
//!
//! This crate handles parsing the KDL configuration file: the mode table
//! that maps window manager modes to control codes, the control channel the
//! codes are written to, and the window manager connection settings.

mod error;
mod model;
mod parser;

pub use error::ConfigError;
pub use model::*;
pub use parser::{parse_config, parse_config_or_default, parse_config_str};
