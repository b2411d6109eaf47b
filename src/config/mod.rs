//! Configuration module for chmux.
//!
//! Handles the server endpoint, multiplexer polling settings and environment
//! variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, MultiplexerSettings, ServerSettings, Settings, SettingsError,
};
