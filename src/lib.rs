//! Messaging and coordination server for LLM agent teams
//!
//! One long-running process serving many concurrent RPC sessions over a
//! durable SQLite store: async messaging with an unread gate, a task state
//! machine with review gates, handshake barriers, versioned interface
//! contracts, a minion spawn-policy governor, and a push pathway that nudges
//! idle agents the instant they have mail.

pub mod archive;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod handshake;
pub mod mailbox;
pub mod minions;
pub mod notify;
pub mod roster;
pub mod rpc;
pub mod session;
pub mod tasks;

use tokio_util::sync::CancellationToken;
use tracing::info;

use config::Config;
use db::Store;
use roster::Roster;
use rpc::McpService;
use session::SessionRegistry;

/// Open the store, wire the components, and serve the selected transport
/// until ctrl-c.
pub async fn run(config: Config) -> error::Result<()> {
    let db_path = config.db_path();
    info!(path = %db_path.display(), "opening store");
    let store = Store::open(&db_path)?;

    let sessions = SessionRegistry::new();
    let roster = Roster::new(
        store.clone(),
        sessions.clone(),
        config.runtime_dir(),
        config.room_token.clone(),
    );
    let service = McpService::new(store, sessions, roster);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    if config.http {
        rpc::serve_http(service, &config.host, config.port, shutdown).await
    } else {
        info!("serving on stdio");
        rpc::run_stdio(service, shutdown).await
    }
}
