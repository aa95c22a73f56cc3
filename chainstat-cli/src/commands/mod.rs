pub mod chain_status;
pub mod servers;

use std::path::Path;

use anyhow::Context;
use clap::Subcommand;

use chainstat_core::config::BotConfig;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarize the build chain rooted at a build id
    ChainStatus(chain_status::ChainStatusArgs),
    /// List configured CI servers
    Servers(servers::ServersArgs),
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::ChainStatus(args) => chain_status::run(args).await,
        Command::Servers(args) => servers::run(args).await,
    }
}

/// Load the bot configuration from the given path.
fn load_config(path: &Path) -> anyhow::Result<BotConfig> {
    let config = BotConfig::load(path)
        .with_context(|| format!("Cannot load config: {}", path.display()))?;
    if config.servers.is_empty() {
        anyhow::bail!("Config {} declares no [[server]] entries", path.display());
    }
    Ok(config)
}
