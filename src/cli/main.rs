use std::process::ExitCode;

use tollgate::cli::{parse_args, run, CliCommand};
use tollgate::config::{init_tracing, TollgateConfig};
use tollgate::lifecycle::LicenseEngine;
use tollgate::store::open_store;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match TollgateConfig::load().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if config.logging.enabled {
        init_tracing(&config.logging);
    }

    let command = match parse_args(std::env::args().skip(1), &config.license) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if command == CliCommand::None {
        println!("Please specify an action. Use -help for more information.");
        return ExitCode::FAILURE;
    }

    let store = match open_store(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let engine = LicenseEngine::with_system_clock(store);

    let mut stdout = std::io::stdout();
    match run(command, &engine, &mut stdout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
