//! Configuration for the chatrelay server.
//!
//! Config is read from `chatrelay.{toml,yaml,yml,json}`, `${VAR}` placeholders
//! are substituted, and `CHATRELAY_*` environment variables override the
//! result.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{CONFIG_FILENAMES, config_dir, discover_and_load, find_config_file, load, load_config},
    schema::{AuthConfig, DatabaseConfig, LoggerConfig, RelayConfig, ServerConfig},
};
