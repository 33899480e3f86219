use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailroom::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailroom=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                // stdout belongs to the stdio transport
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = mailroom::run(config).await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}
