use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

mod api;
mod chat;
mod config;
mod error;
mod events;
mod export;
mod models;
mod pipeline;
mod player;
mod replay;
mod stats;

use config::{Cli, Commands, ServeOptions};
use export::{export_file_name, ExportFormat};
use pipeline::ChatExtractor;

fn main() -> ExitCode {
    // Logs go to stderr so `extract` can write the chat log to stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let extractor = cli.backend.extractor();
    tracing::debug!(
        "Using replay backend '{}' (missing players: {:?})",
        cli.backend.backend,
        extractor.policy()
    );

    match cli.command.unwrap_or_default() {
        Commands::Serve(options) => serve(extractor, options),
        Commands::Extract {
            file,
            format,
            output,
        } => extract(&extractor, &file, format, output),
    }
}

fn serve(extractor: ChatExtractor, options: ServeOptions) -> ExitCode {
    // 1. Shutdown signal shared between Ctrl+C and the server
    let shutdown = Arc::new(Notify::new());
    let shutdown_for_server = shutdown.clone();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<bool>();

    // 2. Start HTTP server in background thread (with its own tokio runtime)
    let address = options.address();
    let max_upload = options.max_upload_bytes();
    let server_handle = std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Failed to create tokio runtime: {}", e);
                let _ = ready_tx.send(false);
                return;
            }
        };
        rt.block_on(async {
            let app = api::create_router(extractor, max_upload);
            let listener = match tokio::net::TcpListener::bind(&address).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!("Failed to bind {}: {}", address, e);
                    let _ = ready_tx.send(false);
                    return;
                }
            };
            let _ = ready_tx.send(true);

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl+C received, shutting down");
                    shutdown.notify_one();
                }
            });

            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_for_server.notified().await;
                })
                .await
            {
                tracing::error!("Server error: {}", e);
            }
        });
    });

    // 3. Wait until the listener is up
    if !ready_rx.recv().unwrap_or(false) {
        let _ = server_handle.join();
        return ExitCode::FAILURE;
    }
    let url = options.url();
    tracing::info!("Chat viewer running at {}", url);

    // 4. Open browser automatically
    if !options.no_browser {
        if let Err(e) = open::that(&url) {
            tracing::warn!("Could not open browser: {}", e);
        }
    }

    // 5. Block until the server shuts down
    let _ = server_handle.join();
    ExitCode::SUCCESS
}

fn extract(
    extractor: &ChatExtractor,
    file: &Path,
    format: ExportFormat,
    output: Option<PathBuf>,
) -> ExitCode {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "replay.wowsreplay".to_string());

    let bytes = match std::fs::read(file) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("Failed to read {}: {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let report = match extractor.extract(&name, &bytes) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Error processing replay file: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if report.messages.is_empty() {
        tracing::warn!("No chat messages found in this replay file.");
    }
    for ns in &report.stats.namespaces {
        tracing::info!("{}: {}", ns.label, ns.count);
    }
    tracing::info!("Active players: {}", report.stats.unique_players);

    let content = match format.render(&report.messages) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Export failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let written = match output {
        Some(path) => {
            let path = if path.is_dir() {
                path.join(export_file_name(&name, format))
            } else {
                path
            };
            std::fs::write(&path, content).map(|_| {
                tracing::info!("Wrote chat log to {}", path.display());
            })
        }
        None => {
            use std::io::Write;
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", content).and_then(|_| stdout.flush())
        }
    };

    match written {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Failed to write chat log: {}", e);
            ExitCode::FAILURE
        }
    }
}
