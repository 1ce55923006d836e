// UTXO ledger - CLI

use clap::Parser;
use utxo_ledger::{Cli, CliHandler, Config};

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::new(&cli.data_dir);

    let mut handler = match CliHandler::new(config) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error initializing: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = handler.handle(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
