//! Session lifecycle walkthrough.
//!
//! Runs against the in-memory backend, or a real one when `CHAT_WS_URL`
//! and `CHAT_TOKEN_URL` are set.
//!
//! Usage:
//!   cargo run --example chat_demo
//!   cargo run --example chat_demo -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use chat_session::credential::{HttpTokenIssuer, StaticTokenIssuer};
use chat_session::transport::{MemoryTransport, WsTransport};
use chat_session::{Identity, Result, SessionController, SessionState, UserId};
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Helpers
// ============================================================================

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "chat_session=debug"
    } else {
        "chat_session=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

fn build_controller() -> Result<SessionController> {
    let builder = SessionController::builder();

    let builder = if std::env::var("CHAT_WS_URL").is_ok() {
        println!("Using backend from CHAT_WS_URL / CHAT_TOKEN_URL");
        builder
            .issuer(HttpTokenIssuer::from_env()?)
            .transport(WsTransport::from_env()?)
    } else {
        println!("Using in-memory backend");
        builder
            .issuer(StaticTokenIssuer::new())
            .transport(MemoryTransport::new())
    };

    builder.build()
}

async fn settle(controller: &SessionController) -> Result<SessionState> {
    let wait = controller.wait_for(|state| state.is_ready() || state.failure().is_some());
    match timeout(Duration::from_secs(30), wait).await {
        Ok(state) => state,
        Err(_) => Ok(controller.state()),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let debug = std::env::args().any(|a| a == "--debug");
    init_logging(debug);

    let controller = build_controller()?;

    // ------------------------------------------------------------------------
    // Open a conversation
    // ------------------------------------------------------------------------

    println!("=== 1. Open conversation u1 <-> u2 ===");
    controller.set_identity(Some(Identity::new("u1", "Ada")))?;
    controller.set_target(Some(UserId::new("u2")))?;

    let state = settle(&controller).await?;
    println!("State: {state}");

    if let Some(ready) = state.ready() {
        println!("Channel: {}", ready.channel.id());
        println!("History: {} messages", ready.channel.snapshot().messages.len());
        controller.send_system_notice("Hello from chat_demo").await?;
        controller.announce_call("https://chat.example.com").await?;
    }

    // ------------------------------------------------------------------------
    // Switch conversations quickly
    // ------------------------------------------------------------------------

    println!("\n=== 2. Switch targets u3, u4 ===");
    controller.set_target(Some(UserId::new("u3")))?;
    controller.set_target(Some(UserId::new("u4")))?;

    let state = controller
        .wait_for(|state| {
            state
                .ready()
                .is_some_and(|ready| ready.channel.id().as_str() == "u1-u4")
                || state.failure().is_some()
        })
        .await?;
    println!("State: {state}");

    // ------------------------------------------------------------------------
    // Sign out
    // ------------------------------------------------------------------------

    println!("\n=== 3. Sign out ===");
    controller.set_identity(None)?;
    let state = controller.wait_for(SessionState::is_idle).await?;
    println!("State: {state}");

    controller.dispose().await;
    println!("\nDisposed");

    Ok(())
}
