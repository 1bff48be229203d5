//! HTTP server for the route-optimization playback UI.
//!
//! Configuration comes from `ROUTE_VIZ_*` environment variables, overridden by
//! command-line flags. Run with `--help` for the list.

use quantum_route_viz::api::start_server;
use quantum_route_viz::config::{AppConfig, CliAction, USAGE};

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match AppConfig::from_env().and_then(|config| config.apply_args(&args)) {
        Ok(CliAction::Run(config)) => config,
        Ok(CliAction::Help) => {
            println!("{}", USAGE);
            return;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    println!("Quantum Route Viz");
    println!("=================");
    println!("Listening on http://{}", config.bind_addr);
    println!("API key variable: {}", config.api_key_env);
    if std::env::var(&config.api_key_env).map_or(true, |v| v.trim().is_empty()) {
        println!("Warning: {} is not set; optimize requests will fail until it is.", config.api_key_env);
    }
    println!();

    if let Err(e) = start_server(config).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
