use cpu_affinity_rules::app::{App, AppConfig};
use mimalloc::MiMalloc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::default();
    info!(state = %config.state_path.display(), "loading state");

    let app = match App::start(config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Application error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("waiting for ctrl-c failed: {e}");
    }
    app.shutdown().await;
}
