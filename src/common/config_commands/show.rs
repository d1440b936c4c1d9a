use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use crate::common::config::AppConfig;

/// Where the effective settings came from, printed above them.
pub(super) enum Origin<'a> {
    File(&'a Path),
    Defaults(&'a Path),
}

pub(super) fn write_path(path: &Path, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}", path.display())?;
    Ok(())
}

/// Render the merged settings as TOML under a one-line origin comment.
pub(super) fn write_effective(config: &AppConfig, origin: Origin<'_>, out: &mut dyn Write) -> Result<()> {
    match origin {
        Origin::File(path) => writeln!(out, "# loaded from {} (environment applied)", path.display())?,
        Origin::Defaults(path) => writeln!(
            out,
            "# no file at {}; built-in defaults (environment applied)",
            path.display()
        )?,
    }
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    out.write_all(rendered.as_bytes())?;
    Ok(())
}
