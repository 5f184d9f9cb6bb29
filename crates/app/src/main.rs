use std::path::PathBuf;

use clap::Parser;

mod cli;

use cli::op::{Op, OpContext};
use cli::ops::{Demo, ShowConfig};
use menuboard::{logging, Config};

crate::command_enum! {
    (Demo, Demo),
    (Config, ShowConfig),
}

#[derive(Parser, Debug)]
#[command(name = "menuboard", version, about = "Menu sync layer tooling")]
struct Cli {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "MENUBOARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.log.level);

    let ctx = OpContext { config };
    let output = cli.command.execute(&ctx).await?;
    println!("{output}");
    Ok(())
}
