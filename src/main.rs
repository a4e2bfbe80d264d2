use clap::Parser;
use std::path::PathBuf;
use std::process::exit;
use trackdown::cli::{Cli, Commands, commands};
use trackdown::logging::init_logging;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet) {
        eprintln!("Error: {e}");
        exit(1);
    }

    let root = cli
        .root
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let outcome = match &cli.command {
        Commands::Init(args) => commands::init::run(&root, args).map(|()| true),
        Commands::Push(args) => commands::push::run(&root, args, cli.quiet),
    };

    match outcome {
        Ok(true) => {}
        // The command ran but reported conflicts or per-record failures.
        Ok(false) => exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("{suggestion}");
            }
            exit(e.exit_code());
        }
    }
}
