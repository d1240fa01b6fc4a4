use std::time::Duration;

use clap::Parser;
use firecast::api::{Cli, Command, run_cli, run_http_server};

#[tokio::main]
async fn main() {
    firecast::telemetry::init_logging();

    match Cli::parse().command {
        Command::Run(args) => match run_cli(args) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        Command::Serve { port, timeout_secs } => {
            if let Err(e) = run_http_server(port, Duration::from_secs(timeout_secs)).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
    }
}
