//! Sitemap Processor (v1)
//!
//! Serves HTTP requests through a hot-reloading sitemap tree.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                  SITEMAP PROCESSOR                   │
//!                        │                                                      │
//!   Client Request       │  ┌─────────┐    ┌───────────────┐    ┌────────────┐  │
//!   ─────────────────────┼─▶│  http   │───▶│ TreeProcessor │───▶│    tree    │  │
//!                        │  │ server  │    │ (hot reload)  │    │   nodes    │  │
//!                        │  └─────────┘    └───────┬───────┘    └─────┬──────┘  │
//!                        │                         │ mount             │        │
//!                        │                         ▼                   ▼        │
//!                        │                  child processors     ┌──────────┐   │
//!                        │                                       │ pipeline │   │
//!   Client Response      │  ┌─────────┐                          │ + pooled │   │
//!   ◀────────────────────┼──│response │◀─────────────────────────│components│   │
//!                        │  └─────────┘                          └──────────┘   │
//!                        │                                                      │
//!                        │  config · watcher · observability · lifecycle        │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use sitemap_processor::components::ComponentCatalogue;
use sitemap_processor::config::watcher::refresh_on_change;
use sitemap_processor::config::{load_config, ServerConfig, SitemapWatcher};
use sitemap_processor::observability::{logging, metrics};
use sitemap_processor::source::SchemeResolver;
use sitemap_processor::{HttpServer, Shutdown, TreeProcessor};

#[derive(Parser, Debug)]
#[command(name = "sitemap-processor", version, about = "Serve requests through a sitemap tree")]
struct Cli {
    /// Server configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root sitemap, overriding the configuration file.
    #[arg(short, long)]
    sitemap: Option<PathBuf>,

    /// Bind address, overriding the configuration file.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(sitemap) = cli.sitemap {
        config.sitemap.path = sitemap;
    }
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_tracing(
        Some(&config.observability.log_level),
        config.observability.log_json,
    );
    tracing::info!("sitemap-processor v{} starting", env!("CARGO_PKG_VERSION"));

    let sitemap = std::path::absolute(&config.sitemap.path).unwrap_or_else(|_| config.sitemap.path.clone());
    tracing::info!(
        sitemap = ?sitemap,
        bind_address = %config.listener.bind_address,
        check_reload = config.sitemap.check_reload,
        "Configuration loaded"
    );

    let processor = TreeProcessor::new(
        &sitemap.to_string_lossy(),
        Arc::new(SchemeResolver::new()),
        Arc::new(ComponentCatalogue::with_builtins()),
        config.processor_settings(),
    );
    // Surface sitemap errors at startup; requests retry the build anyway.
    if let Err(e) = processor.refresh() {
        tracing::warn!(error = %e, "Initial sitemap build failed, retrying on first request");
    }

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    let _watcher = if config.sitemap.watch {
        let (watcher, changes) = SitemapWatcher::new(&sitemap);
        match watcher.run() {
            Ok(watcher) => {
                tokio::spawn(refresh_on_change(changes, Arc::clone(&processor), shutdown.clone()));
                Some(watcher)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Sitemap watcher unavailable, relying on request-time checks");
                None
            }
        }
    } else {
        None
    };

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, processor);
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
