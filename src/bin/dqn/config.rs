use std::{fs, path::Path};

use anyhow::{Context, Result};
use ddqn::training::agent::AgentConfig;

/// Reads agent hyper-parameters from a TOML file. Omitted keys keep their
/// defaults.
pub fn load(filename: &Path) -> Result<AgentConfig> {
    let contents = fs::read_to_string(filename)
        .with_context(|| format!("failed to read config file {filename:?}"))?;
    let config: AgentConfig = toml::from_str(&contents)
        .with_context(|| format!("invalid agent config in {filename:?}"))?;

    Ok(config)
}
