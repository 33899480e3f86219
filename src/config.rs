//! Server configuration
//!
//! Flags and their environment fallbacks. `--http` selects the streamable
//! HTTP transport; without it the server speaks JSON-RPC on stdio.

use std::path::{Path, PathBuf};

/// Configuration for one mailroom instance (one room).
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "mailroom", about = "Messaging and coordination server for LLM agent teams")]
pub struct Config {
    /// Serve streamable HTTP instead of stdio.
    #[arg(long)]
    pub http: bool,

    /// Host to bind on (HTTP transport).
    #[arg(long, default_value = "127.0.0.1", env = "HOST")]
    pub host: String,

    /// Port to listen on (HTTP transport).
    #[arg(long, default_value_t = 9400, env = "PORT")]
    pub port: u16,

    /// Path of the durable store file. Parent directory is created if
    /// missing.
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Room auth token. When set, register requires a matching token.
    #[arg(long, env = "ROOM_TOKEN")]
    pub room_token: Option<String>,

    /// Directory holding onboarding files (PROTOCOL.md, roles/<role>.md).
    #[arg(long, env = "RUNTIME_DIR")]
    pub runtime_dir: Option<PathBuf>,
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".mailroom").join("mailroom.db")
        })
    }

    /// Onboarding directory; defaults to the store file's directory.
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir.clone().unwrap_or_else(|| {
            self.db_path()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}
