//! `shellbridge config ...` subcommands.

mod show;

use crate::common::config::{config_path, load_config};
use anyhow::Result;
use std::path::Path;

use show::Origin;

pub fn run_config_path(path: Option<&Path>) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    show::write_path(&path, &mut std::io::stdout().lock())
}

/// Print the settings the server would start with. Fails the same way
/// `serve` would on a malformed or invalid file.
pub fn run_config_show(path: Option<&Path>) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let config = load_config(Some(&path))?;
    let origin = if path.exists() {
        Origin::File(&path)
    } else {
        Origin::Defaults(&path)
    };
    show::write_effective(&config, origin, &mut std::io::stdout().lock())
}
