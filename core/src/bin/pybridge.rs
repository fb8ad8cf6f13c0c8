/// pybridge CLI
///
/// Runs Python payloads through the bridge with the process's own stdin and
/// stdout standing in for the host callbacks.

use pybridge_core::{cli, logging};

fn main() {
    dotenvy::dotenv().ok();
    logging::init();

    if let Err(e) = cli::run_cli() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
