//! Configuration loading for the murmur gateway.
//!
//! Config files may be TOML, YAML or JSON. `${VAR}` and `${VAR:-fallback}`
//! placeholders are substituted from the environment before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{clear_config_dir, data_dir, discover_and_load, load_config, set_config_dir},
    schema::{
        AuthConfig, MessagesConfig, MurmurConfig, PresenceConfig, ServerConfig, StoreConfig,
        UsersConfig,
    },
};
