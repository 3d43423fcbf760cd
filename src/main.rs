//! eval-forge CLI entry point.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = eval_forge::cli::parse_cli();

    // RUST_LOG wins over --log-level, which wins over the "info" default.
    let fallback = EnvFilter::new(&cli.log_level);
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or(fallback))
        .init();

    eval_forge::cli::run_with_cli(cli).await
}
