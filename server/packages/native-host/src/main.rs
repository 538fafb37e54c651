use std::sync::Arc;

use media_fetch_host::cli::parse_host_cli;
use media_fetch_host::host::run_host;
use media_fetch_host::logging::init_logging;
use media_fetch_host::spawner::TokioSpawner;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = parse_host_cli();
    init_logging(&cli.log_target());
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        caller = ?cli.caller,
        "starting media-fetch-host"
    );

    let config = match cli.to_config() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(2);
        }
    };

    if let Err(err) = run_host(
        tokio::io::stdin(),
        tokio::io::stdout(),
        config,
        Arc::new(TokioSpawner),
    )
    .await
    {
        tracing::error!(error = %err, "media-fetch-host failed");
        std::process::exit(1);
    }
    tracing::info!("media-fetch-host exiting");
}
