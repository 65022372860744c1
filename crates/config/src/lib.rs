//! Configuration loading for chorus (`chorus.{toml,yaml,yml,json}`).

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, find_or_default_config_path, load_config},
    schema::{ChorusConfig, GameSection, GatewaySection},
};
