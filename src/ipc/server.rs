//! IPC Server - Unix socket server answering file requests
//!
//! Accepts connections, reads newline-delimited JSON commands and answers them
//! from the caching file source.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::cache::CachingFileSource;
use crate::ipc::protocol::{
    parse_command, serialize_response, Command, FileEntry, Response, PROTOCOL_VERSION,
};
use crate::source::FileSource;

/// IPC server exposing a caching file source
pub struct IpcServer<S> {
    cache: Arc<CachingFileSource<S>>,
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl<S: FileSource + 'static> IpcServer<S> {
    /// Create a new IPC server
    pub fn new(cache: Arc<CachingFileSource<S>>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            socket_path: socket_path.into(),
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale socket file
    pub async fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).context("Failed to bind Unix socket")?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let cache = Arc::clone(&self.cache);
                    let connection_count = Arc::clone(&self.connection_count);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, cache, connection_count).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Remove the socket file
    pub async fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }

    /// Get the number of active connections
    pub async fn connection_count(&self) -> u32 {
        *self.connection_count.read().await
    }
}

/// Handle a single client connection
async fn handle_connection<S: FileSource + 'static>(
    stream: UnixStream,
    cache: Arc<CachingFileSource<S>>,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(command = %trimmed, "Received command");

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => {
                        // Cache lookups block on file I/O when they miss
                        let cache = Arc::clone(&cache);
                        tokio::task::spawn_blocking(move || process_command(command, &cache))
                            .await
                            .unwrap_or_else(|e| Response::Error {
                                error: format!("Command failed: {}", e),
                            })
                    }
                    Err(e) => {
                        error!(error = %e, command = %trimmed, "Failed to parse command");
                        Response::Error {
                            error: format!("Invalid command: {}", e),
                        }
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

/// Process a command and return a response
fn process_command<S: FileSource>(command: Command, cache: &CachingFileSource<S>) -> Response {
    match command {
        Command::GetFileInfo { path } => {
            let info = cache.get_file_info(&path);
            Response::FileInfo {
                file: FileEntry::from_info(info.as_ref()),
            }
        }

        Command::ReadFile { path } => {
            let info = cache.get_file_info(&path);
            if !info.exists() {
                return Response::Error {
                    error: format!("File not found: {}", path),
                };
            }

            let mut data = Vec::new();
            let read = info
                .create_read_stream()
                .and_then(|mut stream| stream.read_to_end(&mut data));
            if let Err(e) = read {
                return Response::Error {
                    error: format!("Failed to read {}: {}", path, e),
                };
            }

            Response::Contents {
                path,
                length: data.len() as u64,
                sha1: format!("{:x}", Sha1::digest(&data)),
                data: base64::engine::general_purpose::STANDARD.encode(&data),
            }
        }

        Command::ListDirectory { path } => {
            let listing = cache.get_directory_contents(&path);
            Response::Directory {
                path,
                exists: listing.exists(),
                entries: listing
                    .iter()
                    .map(|entry| FileEntry::from_info(entry.as_ref()))
                    .collect(),
            }
        }

        Command::GetStatus => {
            debug!("Processing getStatus command");
            let stats = cache.stats();
            Response::Status {
                version: PROTOCOL_VERSION,
                healthy: true,
                entries: cache.store().entry_count(),
                hits: stats.hits,
                misses: stats.misses,
                bypassed: stats.bypassed,
                hit_rate: stats.hit_rate(),
            }
        }
    }
}
