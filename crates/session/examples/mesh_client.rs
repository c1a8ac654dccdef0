//! Mesh Client Example
//!
//! Joins a session through a WebSocket relay and prints the events the
//! rendering layer would consume: participants coming and going, remote
//! tracks, active speaker changes and gaze updates.
//!
//! # Running
//!
//! ```bash
//! cargo run --example mesh_client -- ws://localhost:8080 meeting-42 participant-1
//! ```
//!
//! The third argument is the relay-assigned participant identifier;
//! pass `--initiator` as a fourth argument for the side that sends
//! first offers.

use meshmeet_session::{
    LocalMediaSet, Result, SessionConfig, SessionCoordinator, SessionEvent, WebSocketRelay,
};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,meshmeet_session=debug".into()),
        )
        .init();

    let mut args = env::args().skip(1);
    let relay_url = args.next().unwrap_or_else(|| "ws://localhost:8080".to_string());
    let session_id = args.next().unwrap_or_else(|| "meeting-42".to_string());
    let local_id = args.next().unwrap_or_else(|| "participant-1".to_string());
    let is_initiator = args.next().as_deref() == Some("--initiator");

    let config = SessionConfig {
        session_id,
        is_initiator,
        relay_url,
        ..Default::default()
    };

    let (relay, relay_rx) = WebSocketRelay::connect(&config.relay_url).await?;

    // A real client would hand over capture tracks here; running
    // without them exercises the degraded path.
    let media = LocalMediaSet::new(None, None);

    let (coordinator, handle, mut events) =
        SessionCoordinator::new(config, local_id, Arc::new(relay), relay_rx, media)?;

    let session = tokio::spawn(coordinator.run());

    let event_printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::ParticipantJoined { participant } => {
                    println!("+ {} joined", participant.participant_id);
                }
                SessionEvent::ParticipantLeft { participant_id } => {
                    println!("- {} left", participant_id);
                }
                SessionEvent::RemoteTrackAdded { participant_id, .. } => {
                    println!("~ media from {}", participant_id);
                }
                SessionEvent::ActiveSpeakerChanged { participant_id } => {
                    println!("* speaking: {:?}", participant_id);
                }
                SessionEvent::GazeUpdate {
                    participant_id,
                    direction,
                } => {
                    println!("@ {} looks {:?}", participant_id, direction);
                }
                other => {
                    println!("  {:?}", other);
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(meshmeet_session::Error::Io)?;
    handle.shutdown()?;

    let _ = session.await;
    event_printer.abort();

    Ok(())
}
