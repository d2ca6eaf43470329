use std::fs::File;
use std::io;
use std::sync::Arc;

use clap::Parser;
use simplelog::{ConfigBuilder, WriteLogger};

use planstream::backend::{HttpApprovalApi, WebSocketTransport};
use planstream::console;
use planstream::core::config::{self, CliOverrides};
use planstream::core::state::SessionState;
use planstream::core::subscription::SubscriptionRegistry;
use planstream::core::transcript::{self, Transcript};
use planstream::core::types::SessionId;
use planstream::runtime::SessionRuntime;

#[derive(Parser)]
#[command(
    name = "planstream",
    about = "Follow an agent team's live stream and approve or reject its plans"
)]
struct Args {
    /// Session to join (default: a new random id)
    #[arg(long)]
    session_id: Option<String>,

    /// WebSocket endpoint, e.g. ws://localhost:8000/api/socket
    #[arg(long)]
    ws_url: Option<String>,

    /// Base URL of the approval API
    #[arg(long)]
    api_url: Option<String>,

    /// Last event id seen by a previous run, to resume from
    #[arg(long)]
    resume_from: Option<String>,
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    let file_config = config::load_config().map_err(|e| {
        eprintln!("planstream: {e}");
        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
    })?;
    let resolved = config::resolve(
        &file_config,
        &CliOverrides {
            ws_url: args.ws_url,
            api_url: args.api_url,
        },
    );

    // Initialize file logger; stdout belongs to the console
    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();
    if let Ok(log_file) = File::create(&resolved.log_file) {
        let _ = WriteLogger::init(resolved.log_level, log_config, log_file);
    }

    let session_id = args
        .session_id
        .map(SessionId::new)
        .unwrap_or_else(SessionId::generate);
    log::info!(
        "planstream starting: session={} ws={} api={}",
        session_id,
        resolved.ws_url,
        resolved.api_url
    );

    let transport = WebSocketTransport::new(resolved.ws_url.clone());
    let api = Arc::new(HttpApprovalApi::new(
        resolved.api_url.clone(),
        resolved.api_token.clone(),
        resolved.request_timeout,
    ));
    let registry = SubscriptionRegistry::new();

    let started = match args.resume_from {
        Some(event_id) => {
            let mut state = match transcript::load_transcript(&session_id) {
                Ok(saved) => Transcript::into_state(saved),
                Err(e) => {
                    log::debug!("No saved transcript for {}: {}", session_id, e);
                    SessionState::new(session_id.clone())
                }
            };
            state.last_event_id = Some(event_id);
            SessionRuntime::reconnect(state, transport, api, registry).await
        }
        None => SessionRuntime::connect(session_id.clone(), transport, api, registry).await,
    };
    let (runtime, handle) = started.map_err(|e| {
        eprintln!("planstream: {e}");
        io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string())
    })?;

    let outcome = console::run(runtime, handle).await?;
    println!("Session ended: {}", outcome.reason);

    if resolved.save_transcripts {
        transcript::save_session(&outcome.state);
    }
    match &outcome.state.last_event_id {
        Some(event_id) => println!(
            "Last event id: {event_id} (resume with --session-id {session_id} --resume-from {event_id})"
        ),
        None => println!("No events received."),
    }
    Ok(())
}
