//! Show (and optionally persist) the effective configuration.

use std::path::PathBuf;

use framerec_common::config::{config_file_path, AppConfig};

pub fn run(config: &AppConfig, path: Option<PathBuf>, save: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(config_file_path);
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);

    if save {
        config.save_to(&path)?;
        tracing::info!(path = %path.display(), "Configuration saved");
    }
    Ok(())
}
