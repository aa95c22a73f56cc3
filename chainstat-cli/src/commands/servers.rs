use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug)]
pub struct ServersArgs {
    /// Path to chainstat.toml
    #[arg(short, long, env = "CHAINSTAT_CONFIG", default_value = "chainstat.toml")]
    pub config: PathBuf,
}

pub async fn run(args: ServersArgs) -> anyhow::Result<()> {
    let config = super::load_config(&args.config)?;
    let primary = config.primary_server().map(String::from);

    println!("Configured servers:");
    for server in &config.servers {
        let mut notes = Vec::new();
        if primary.as_deref() == Some(server.code.as_str()) {
            notes.push("primary".to_string());
        }
        if let Some(real) = &server.reference {
            notes.push(format!("alias of {real}"));
        }
        if server.token_env.is_some() {
            notes.push("authenticated".to_string());
        }
        let suffix = if notes.is_empty() {
            String::new()
        } else {
            format!(" ({})", notes.join(", "))
        };
        let url = if server.url.is_empty() {
            "-"
        } else {
            server.url.as_str()
        };
        println!("  {:<12} {url}{suffix}", server.code);
    }
    Ok(())
}
