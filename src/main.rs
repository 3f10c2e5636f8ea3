//! Static File Cache Daemon - serves a content root through an in-memory cache
//!
//! Primes the cache from the content root at startup and answers file
//! requests from local clients over a Unix socket.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use static_file_cache::ipc::IpcServer;
use static_file_cache::{
    CacheStore, CachingFileSource, PhysicalFileSource, StaticFileCacheSettings,
};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Prime the cache and serve requests (default)
    Serve,
    /// Prime the cache once and report its size
    Prime { content_root: Option<PathBuf> },
    /// Show help
    Help,
}

/// Parsed command line
#[derive(Debug)]
struct Args {
    command: Command,
    config: Option<PathBuf>,
}

fn print_help() {
    eprintln!(
        r#"Static File Cache - in-memory cache for static assets

USAGE:
    static-file-cache [--config <path>]                  # Serve (default)
    static-file-cache [--config <path>] prime [<root>]
    static-file-cache help

COMMANDS:
    (none)  Prime the cache from the content root, then answer requests
            on the IPC socket until Ctrl+C
    prime   Walk the content root once and report entries and bytes cached
    help    Show this help message

OPTIONS:
    --config <path>   Settings file (default: <config dir>/static-file-cache/settings.json)

ENVIRONMENT:
    STATIC_FILE_CACHE_SIZE_LIMIT_KB   Largest cached file size in KiB (default 256)
    STATIC_FILE_CACHE_CONTENT_ROOT    Directory to serve (default wwwroot)
    RUST_LOG                          Log filter (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Args> {
    let mut args = env::args().skip(1);
    let mut config = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a path"))?;
                config = Some(PathBuf::from(path));
            }
            _ => positional.push(arg),
        }
    }

    let command = match positional.first().map(String::as_str) {
        None | Some("serve") => Command::Serve,
        Some("prime") => Command::Prime {
            content_root: positional.get(1).map(PathBuf::from),
        },
        Some("help" | "--help" | "-h") => Command::Help,
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            Command::Help
        }
    };

    Ok(Args { command, config })
}

/// Build the caching source described by the settings
fn build_cache(
    settings: &StaticFileCacheSettings,
    watch: bool,
) -> Result<CachingFileSource<PhysicalFileSource>> {
    let source = if watch {
        PhysicalFileSource::new(&settings.content_root)
    } else {
        PhysicalFileSource::without_watching(&settings.content_root)
    }
    .with_context(|| {
        format!(
            "Failed to open content root {}",
            settings.content_root.display()
        )
    })?;

    let store = CacheStore::builder()
        .max_capacity(settings.max_capacity)
        .build();

    info!(
        content_root = %source.root().display(),
        file_size_limit = settings.file_size_limit_bytes(),
        max_capacity = ?settings.max_capacity,
        watch = watch,
        "Static file cache initialized"
    );

    Ok(CachingFileSource::new(
        source,
        store,
        settings.file_size_limit_bytes(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Serve => {
            let settings = StaticFileCacheSettings::load(args.config.as_deref())?;
            let cache = Arc::new(build_cache(&settings, settings.watch)?);

            if settings.prime_on_startup {
                let primer = Arc::clone(&cache);
                match tokio::task::spawn_blocking(move || primer.prime_cache()).await? {
                    Ok(_) => cache.log_metrics(),
                    Err(e) => warn!(error = %e, "Cache priming failed, continuing with a cold cache"),
                }
            }

            let mut ipc_server = IpcServer::new(Arc::clone(&cache), &settings.socket_path);
            if let Err(e) = ipc_server.start().await {
                error!(error = %e, "Failed to start IPC server");
                return Err(e);
            }
            let ipc_server = Arc::new(ipc_server);

            info!("Daemon ready. Waiting for requests...");

            let runner = Arc::clone(&ipc_server);
            let ipc_handle = tokio::spawn(async move {
                if let Err(e) = runner.run().await {
                    error!(error = %e, "IPC server error");
                }
            });

            tokio::signal::ctrl_c().await?;

            info!("Received shutdown signal, stopping...");
            ipc_handle.abort();
            ipc_server.stop().await?;
            cache.log_metrics();

            info!("Shutdown complete.");
        }
        Command::Prime { content_root } => {
            let mut settings = StaticFileCacheSettings::load(args.config.as_deref())?;
            if let Some(root) = content_root {
                settings.content_root = root;
            }

            let cache = build_cache(&settings, false)?;
            let size = cache.prime_cache().context("Failed to prime cache")?;
            cache.log_metrics();

            println!(
                "Cached {} entries totalling {} bytes from {}",
                size.entries,
                size.bytes,
                cache.source().root().display()
            );
        }
        Command::Help => {
            print_help();
        }
    }

    Ok(())
}
