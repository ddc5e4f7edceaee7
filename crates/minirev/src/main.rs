use std::process::ExitCode;

use clap::Parser;
use minirev::{cli::Cli, loop_::Daemon};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn install_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn main() -> ExitCode {
    install_tracing();
    let cli = Cli::parse();

    match Daemon::new(&cli.name) {
        Ok(mut daemon) => daemon.run(),
        Err(e) => {
            error!(error = %e, "failed to initialize");
            ExitCode::FAILURE
        }
    }
}
