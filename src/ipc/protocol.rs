//! IPC protocol definitions
//!
//! Newline-delimited JSON spoken over the daemon's Unix socket. Each command
//! line gets exactly one response line.

use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::source::FileInfo;

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Look up a file's metadata
    GetFileInfo { path: String },
    /// Read a file's full content
    ReadFile { path: String },
    /// List a directory
    ListDirectory { path: String },
    /// Get daemon status and cache counters
    GetStatus,
}

/// Responses sent back to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Metadata for one path
    FileInfo { file: FileEntry },
    /// File content
    #[serde(rename_all = "camelCase")]
    Contents {
        path: String,
        length: u64,
        /// Hex SHA-1 of the content
        sha1: String,
        /// Base64-encoded content
        data: String,
    },
    /// Directory listing
    Directory {
        path: String,
        exists: bool,
        entries: Vec<FileEntry>,
    },
    /// Status response with cache counters
    #[serde(rename_all = "camelCase")]
    Status {
        version: u32,
        healthy: bool,
        entries: u64,
        hits: u64,
        misses: u64,
        bypassed: u64,
        hit_rate: f64,
    },
    /// Error response
    Error { error: String },
}

/// One file or directory as seen by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub exists: bool,
    pub is_directory: bool,
    pub length: u64,
    /// Milliseconds since the Unix epoch
    pub last_modified: Option<u64>,
}

impl FileEntry {
    pub fn from_info(info: &dyn FileInfo) -> Self {
        let last_modified = info
            .last_modified()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);

        Self {
            name: info.name().to_string(),
            exists: info.exists(),
            is_directory: info.is_directory(),
            length: info.length(),
            last_modified,
        }
    }
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}
