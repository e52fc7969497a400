mod commands;
mod logger;
mod progress;

use clap::{ColorChoice, Parser};
use colored::Colorize;
use commands::{Args, Commands};
use logger::Logger;
use std::{
    io::{IsTerminal, stderr},
    process,
};

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    colored::control::set_override(match args.color {
        ColorChoice::Always => true,
        ColorChoice::Auto => stderr().is_terminal(),
        ColorChoice::Never => false,
    });

    Logger::init(args.verbose, args.quiet)?;

    match args.command {
        Commands::Pssh(x) => x.execute()?,
        Commands::Track(x) => x.execute(&args.engine).await?,
        Commands::Video(x) => x.execute(&args.engine).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}: {}", "error".bold().red(), e);
        process::exit(1);
    }
}
