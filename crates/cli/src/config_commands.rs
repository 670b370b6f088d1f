use std::path::{Path, PathBuf};

use {anyhow::Result, clap::Subcommand};

use chargegate_config::ChargegateConfig;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the path of the config file that would be loaded.
    Path,
}

/// Load the config from `path`, or discover it when no path is given.
pub fn resolve_config(path: Option<&Path>) -> Result<ChargegateConfig> {
    match path {
        Some(path) => chargegate_config::load_config(path),
        None => Ok(chargegate_config::discover_and_load()),
    }
}

pub fn handle_config(action: Option<ConfigAction>, path: Option<PathBuf>) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let config = resolve_config(path.as_deref())?;
            print!("{}", chargegate_config::to_toml(&config)?);
        },
        ConfigAction::Path => match path.or_else(chargegate_config::find_config_file) {
            Some(path) => println!("{}", path.display()),
            None => println!("no config file found, using defaults"),
        },
    }
    Ok(())
}
