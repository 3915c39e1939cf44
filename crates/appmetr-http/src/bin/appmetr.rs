//! AppMetr command line client

use appmetr_http::cli::{Cli, handle_cli_command};
use clap::Parser;

fn main() {
    appmetr::telemetry::init();
    let cli = Cli::parse();
    if let Err(e) = handle_cli_command(cli.command) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
