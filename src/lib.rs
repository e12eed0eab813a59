pub mod api;
pub mod config;
pub mod pipeline;
pub mod pipeline_config;

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::pipeline::analyzer::PrescriptionAnalyzer;

/// Start the service and block until Ctrl-C.
///
/// Engines are probed and HTTP clients built before the runtime starts, since
/// both block. The analyzer outlives the runtime so its blocking clients are
/// never dropped inside async code.
pub fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = config::load_config(config_path.as_deref())?;
    let analyzer = Arc::new(PrescriptionAnalyzer::from_config(&config)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let ctx = ApiContext::new(Arc::clone(&analyzer), config.server.max_upload_bytes);
    runtime.block_on(async {
        let mut server = api::start_api_server(ctx, &config.server).await?;

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for shutdown signal: {e}");
        }
        server.shutdown();
        server.wait().await;
        Ok::<(), std::io::Error>(())
    })?;

    drop(runtime);
    drop(analyzer);
    tracing::info!("{} stopped", config::APP_NAME);
    Ok(())
}
