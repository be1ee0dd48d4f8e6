//! Sandbox control server.
//!
//! Hosts one session (runner, terminal registry, preview registry, file
//! overlay) behind the HTTP control surface and the `/ws` endpoint.
//!
//! Environment:
//! - `SANDBOX_WORKDIR` - workspace root (default: current directory)
//! - `SANDBOX_PORT` - control server port (default: 3004)
//! - `SANDBOX_PREVIEW_PORT` - preview probe start (default: 3001)

mod routes;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use sandbox_core::WorkspaceContext;
use sandbox_transport::Session;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_port(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let working_dir = match std::env::var("SANDBOX_WORKDIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => std::env::current_dir()?,
    };
    let context = WorkspaceContext::new(working_dir).with_preview_port(env_port(
        "SANDBOX_PREVIEW_PORT",
        sandbox_core::context::DEFAULT_PREVIEW_PORT,
    ));
    tracing::info!(
        working_dir = %context.working_dir().display(),
        preview_port = context.preview_port,
        "starting sandbox session"
    );

    let session = Arc::new(Session::new(context));
    let app = routes::router(session);

    let addr = SocketAddr::from(([127, 0, 0, 1], env_port("SANDBOX_PORT", 3004)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("control server listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
