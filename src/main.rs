mod cleanup;
mod cli;
mod config;
mod error;
mod inventory;
mod metrics;
mod model;
mod orchestrator;
mod pipeline;
mod preflight;
mod registry;
mod status;
mod storage;
mod text_summary;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "director_runctl=debug"
    } else {
        "director_runctl=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    match cli::run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Domain errors carry their own formatting; everything else gets
            // the full context chain.
            match e.downcast_ref::<error::ControllerError>() {
                Some(ce) => eprintln!("{ce}"),
                None => eprintln!("Error: {e:#}"),
            }
            std::process::exit(1);
        }
    }
}
