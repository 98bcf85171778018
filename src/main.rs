use clap::Parser;
use log::error;

use ampligate::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli::init_logging(&cli.log_file) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
    if let Err(e) = cli::run(cli) {
        error!("{e:#}");
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
