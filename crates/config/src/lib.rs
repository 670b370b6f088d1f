//! Configuration loading for the gateway.
//!
//! Config files: `chargegate.toml`, `chargegate.yaml`, or `chargegate.json`,
//! searched in `./` then `~/.config/chargegate/`. `${ENV_VAR}` placeholders
//! are substituted before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, discover_and_load, find_config_file, load_config,
        set_config_dir, to_toml,
    },
    schema::{AuthConfig, ChargegateConfig, GatewayConfig, RegistrationConfig, TelemetryConfig},
};
