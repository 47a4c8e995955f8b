use std::path::PathBuf;

use rmcp::{ServiceExt, transport::stdio};

use imagegen::config::Config;
use imagegen::server::ImageGenServer;

/// MCP clients launch us from arbitrary working directories, so look next to
/// the binary first, then the project root of a dev build, then the CWD.
fn load_dotenv() {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from));
    if let Some(dir) = exe_dir {
        for candidate in [dir.join(".env"), dir.join("../../.env")] {
            if candidate.exists() {
                dotenvy::from_path(&candidate).ok();
                return;
            }
        }
    }
    dotenvy::dotenv().ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    load_dotenv();
    tracing::info!("imagegen starting");

    let server = ImageGenServer::new(Config::load());
    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("serving error: {e:?}"))?;

    service.waiting().await?;

    tracing::info!("imagegen shutting down");
    Ok(())
}
