//! CM Events Listener - Entry Point
//!
//! Consumes the CM data-change diverted queue and forwards classified
//! notifications downstream.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    cm_events_listener::run().await
}
