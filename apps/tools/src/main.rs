mod config;
mod remote;
mod scenarios;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::domain::PostId;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Drive the reconciliation engine against a simulated remote")]
struct Cli {
    /// Settings file; defaults to ./reconcile.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Toggle a post's like flag several times in quick succession.
    Toggle {
        #[arg(long, default_value_t = 2)]
        times: u32,
        #[arg(long, default_value_t = PostId(1))]
        post: PostId,
    },
    /// Submit one title edit per argument without waiting in between.
    Rename {
        #[arg(long, default_value_t = PostId(1))]
        post: PostId,
        #[arg(required = true)]
        titles: Vec<String>,
    },
    /// Submit one reorder per argument, each a comma-separated id list like 3,1,2.
    Reorder {
        #[arg(required = true)]
        orders: Vec<String>,
    },
    /// Two toggles where the first confirmation fails.
    Scenario,
}

fn parse_order(raw: &str) -> Result<Vec<PostId>> {
    raw.split(',')
        .map(|id| {
            id.parse::<PostId>()
                .with_context(|| format!("invalid post id {id:?} in order {raw:?}"))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = config::load_settings(cli.config.as_deref())?;
    tracing::info!(
        latency_ms = settings.latency_ms,
        stagger_ms = settings.stagger_ms,
        fail_every = ?settings.fail_every,
        "loaded settings"
    );

    let report = match cli.command {
        Command::Toggle { times, post } => scenarios::toggle_likes(&settings, post, times).await?,
        Command::Rename { post, titles } => scenarios::rename(&settings, post, titles).await?,
        Command::Reorder { orders } => {
            let orders = orders
                .iter()
                .map(|raw| parse_order(raw))
                .collect::<Result<Vec<_>>>()?;
            scenarios::reorder(&settings, orders).await?
        }
        Command::Scenario => scenarios::failed_double_toggle(&settings).await?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
