//! raven-solver command-line entry point

use clap::Parser;
use raven_solver::cli::{run, Cli};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "raven_solver=info".into()),
        )
        .init();

    run(Cli::parse())
}
