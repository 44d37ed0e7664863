use kuadrant_testsuite::{cli, utils::install_rustls_provider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_rustls_provider();
    cli::run_cli().await
}
