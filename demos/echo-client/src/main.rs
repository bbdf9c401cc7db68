use std::time::Duration;

use serde_json::json;
use sockline::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sockline=info,echo_client=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

fn log_lifecycle(connection: &Connection) {
    connection.on("connecting", |args| info!(transport = ?args.str(0), "connecting"));
    connection.on("connect", |_| info!("connected"));
    connection.on("connect_failed", |_| warn!("connect failed"));
    connection.on("disconnect", |args| info!(reason = ?args.str(0), "disconnected"));
    connection.on("reconnecting", |args| {
        info!(delay_ms = ?args.get(0), attempt = ?args.get(1), "reconnecting");
    });
    connection.on("reconnect", |args| info!(attempts = ?args.get(1), "reconnected"));
    connection.on("reconnect_failed", |_| warn!("gave up reconnecting"));
    connection.on("error", |args| warn!(reason = ?args.str(0), "server error"));
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:3000".to_string());

    let connection = Connection::builder(url)
        .reconnection(ReconnectPolicy {
            max_delay: Some(Duration::from_secs(10)),
            ..ReconnectPolicy::default()
        })
        .build()?;
    log_lifecycle(&connection);

    let socket = connection.of("");
    socket.on("message", |args| info!(data = ?args.values(), "message"));
    socket.on("echo", |args| {
        info!(args = ?args.values(), "echo from server");
        if let Some(reply) = args.reply() {
            reply.send(vec![json!("thanks")]);
        }
    });

    connection.wait_for(ConnectionState::Connected).await?;
    info!(session_id = ?connection.session_id(), "session established");

    socket.emit_with_ack("echo", vec![json!("hello"), json!({"n": 1})], |reply| {
        info!(?reply, "echo acknowledged");
    })?;
    socket.send("plain text")?;

    tokio::signal::ctrl_c().await?;
    connection.disconnect()?;
    connection.wait_for(ConnectionState::Disconnected).await?;
    Ok(())
}
