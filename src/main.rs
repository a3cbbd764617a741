use clap::Parser;

use appforge::cli::{self, Cli};
use appforge::exit_codes::error_to_exit_code;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = cli::run(cli).await {
        eprintln!("Error: {err}");
        std::process::exit(error_to_exit_code(&err));
    }
}
