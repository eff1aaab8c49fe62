//! Standalone runner for the embedded map share engine (spec.md §6 process
//! factory). Host applications normally embed [`mapshare_engine::MapShareDaemon`]
//! directly; this binary exists so the crate is runnable end-to-end during
//! development and manual testing.

use std::path::PathBuf;

use mapshare_engine::app::ListenOptions;
use mapshare_engine::config::Config;
use mapshare_engine::MapShareDaemon;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    ensure_fallback_package(&config.fallback_map_path)?;

    let local_port: u16 = std::env::var("LOCAL_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(0);
    let remote_port: u16 = std::env::var("REMOTE_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(0);

    let daemon = MapShareDaemon::new(config)?;
    let mut handle = daemon
        .listen(ListenOptions {
            local_port: Some(local_port),
            remote_port: Some(remote_port),
        })
        .await?;

    tracing::info!(
        local_port = handle.local_port,
        remote_port = handle.remote_port,
        "map share engine ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.close().await;
    Ok(())
}

/// Create an empty-but-valid fallback package on first run so the binary
/// is runnable without a pre-seeded map. Host applications always bundle a
/// real fallback package; this is a development convenience only.
fn ensure_fallback_package(path: &PathBuf) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("style.json", zip::write::FileOptions::default())?;
    std::io::Write::write_all(&mut zip, br#"{"minzoom":0,"maxzoom":22}"#)?;
    zip.finish()?;
    Ok(())
}
