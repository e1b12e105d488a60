//! Synthesize command.

use anyhow::{Context, Result};
use pipewright_config::VariableContext;
use std::path::Path;
use tracing::info;

pub fn run(config: &Path, vars: VariableContext, out: Option<&Path>, pretty: bool) -> Result<()> {
    let assembly = super::synthesize(&super::load(config, vars)?)?;

    let json = if pretty {
        serde_json::to_string_pretty(&assembly)?
    } else {
        serde_json::to_string(&assembly)?
    };

    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "Wrote cloud assembly");
        }
        None => println!("{}", json),
    }
    Ok(())
}
