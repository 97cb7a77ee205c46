use colored::Color;
use memepulse::orchestrator::{wait_for_shutdown_signal, Orchestrator, ServiceSpec};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Managed binaries live next to this one in the build/install directory.
fn sibling(name: &str) -> std::io::Result<PathBuf> {
    Ok(std::env::current_exe()?.with_file_name(name))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("memepulse=info")
        .init();

    info!("==================================================");
    info!("  MEMEPULSE - service orchestrator");
    info!("==================================================");

    let specs = vec![
        ServiceSpec {
            name: "server",
            program: sibling("memepulse")?,
            args: vec![],
            color: Color::Cyan,
        },
        ServiceSpec {
            name: "market-data",
            program: sibling("market-data")?,
            args: vec![],
            color: Color::Green,
        },
        ServiceSpec {
            name: "telegram",
            program: sibling("telegram-ingest")?,
            args: vec![],
            color: Color::Magenta,
        },
        ServiceSpec {
            name: "tiktok",
            program: sibling("tiktok-ingest")?,
            args: vec![],
            color: Color::Yellow,
        },
    ];

    let orchestrator = Arc::new(Orchestrator::new(specs));
    orchestrator.start_all().await;

    let monitor = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run_monitor().await })
    };

    wait_for_shutdown_signal().await?;
    orchestrator.shutdown().await;
    monitor.abort();

    info!("Goodbye");
    Ok(())
}
