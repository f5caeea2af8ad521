use clap::Parser;
use phbgateway::cli::ServeArgs;
use phbgateway::config::GatewayConfig;
use phbgateway::gateway::GatewayServer;
use phbgateway::logging;
use tracing::error;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();

    let args = ServeArgs::parse();

    // clap itself exits with code 2 on invalid arguments, before we get here.
    let config = match GatewayConfig::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to resolve gateway state directory: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    logging::init(config.log_dir.as_deref());

    match run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gateway exited with error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let server = GatewayServer::start(&config).await?;
    server.run_until_shutdown().await
}
