use std::process;

use clap::Parser;

use toychain::cli::{Cli, CliHandler};

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let handler = CliHandler::new(cli.node_id.clone());

    if let Err(e) = handler.run(cli.command) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
