use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = venture_dd_cli::Cli::parse();
    venture_dd_cli::run_cli(cli)
}
