use clap::{Parser, Subcommand};
use irma_demux::demultiplex::*;

static MODULE: &str = module_path!();

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Demultiplex one or more FASTQ files against a barcode table.
    Demultiplex(DemultiplexArgs),
}

fn main() {
    let args = Cli::parse();

    let result = match args.command {
        Commands::Demultiplex(cmd_args) => demultiplex_process(cmd_args),
    };

    if let Err(e) = result {
        eprintln!("{MODULE} {e}");
        std::process::exit(1);
    }
}
