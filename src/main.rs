//! Doctrine binary entry point.

use clap::Parser;
use doctrine::cli::Cli;

fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    doctrine::cli::run(&cli)
}
