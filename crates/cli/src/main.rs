// nomad CLI entry point.

use std::path::PathBuf;

use clap::Parser;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "nomad", about = "Live city chat, meetup chat and incident feeds")]
struct Cli {
    /// Force JSON output even on a terminal
    #[arg(long, global = true)]
    json: bool,

    /// Config file to use instead of ~/.nomad/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = output::OutputFormat::detect(cli.json);
    let context = commands::Context { format, config_path: cli.config };
    if let Err(error) = commands::run(cli.command, &context).await {
        output::print_anyhow_error(format, &error);
        std::process::exit(1);
    }
    Ok(())
}
