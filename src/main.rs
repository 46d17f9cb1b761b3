use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cmd;

use cmd::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Show(a) => a.run(),
        Commands::Analyze(a) => a.run(),
        Commands::Rank(a) => a.run(),
        Commands::Insert(a) => a.run(),
        Commands::Verify(a) => a.run(),
    }
}
