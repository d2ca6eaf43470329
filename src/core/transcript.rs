//! # Transcript Persistence
//!
//! Save/load finished sessions to `~/.planstream/sessions/<session id>.json`.
//!
//! A transcript holds the finalized messages and the decision history, plus
//! the last event id so a later run can resume from it. Live state (buffer,
//! pending plan, in-flight decision) is not persisted.
//!
//! All writes use atomic rename (write `.tmp`, then `rename()`) for crash safety.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::state::SessionState;
use crate::core::types::{AgentMessage, DecisionRecord, SessionId};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transcript {
    pub session_id: SessionId,
    pub saved_at: DateTime<Utc>,
    pub last_event_id: Option<String>,
    pub messages: Vec<AgentMessage>,
    pub decisions: Vec<DecisionRecord>,
}

impl Transcript {
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            saved_at: Utc::now(),
            last_event_id: state.last_event_id.clone(),
            messages: state.messages.clone(),
            decisions: state.decisions.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.decisions.is_empty()
    }

    /// Seed a fresh session with this history, ready to reconnect.
    pub fn into_state(self) -> SessionState {
        let mut state = SessionState::new(self.session_id);
        state.messages = self.messages;
        state.decisions = self.decisions;
        state.last_event_id = self.last_event_id;
        state
    }
}

/// Returns `~/.planstream/sessions/`, creating it if needed.
pub fn sessions_dir() -> io::Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
    let dir = home.join(".planstream").join("sessions");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Session ids come from the command line and the wire, so one that could
/// name a file outside `dir` is refused.
fn transcript_path(dir: &Path, id: &SessionId) -> io::Result<PathBuf> {
    let name = id.as_str();
    let escapes = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\', '\0']);
    if escapes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("session id '{}' is not usable as a file name", name.escape_debug()),
        ));
    }
    Ok(dir.join(format!("{name}.json")))
}

/// Atomically write `data` as JSON to `path` (via `.tmp` + rename).
fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Write the transcript into `dir`. Returns the path written, or `None`
/// when there was nothing worth saving.
pub fn save_in(dir: &Path, transcript: &Transcript) -> io::Result<Option<PathBuf>> {
    if transcript.is_empty() {
        debug!("Transcript {} is empty, not saving", transcript.session_id);
        return Ok(None);
    }
    let path = transcript_path(dir, &transcript.session_id)?;
    atomic_write_json(&path, transcript)?;
    Ok(Some(path))
}

pub fn load_in(dir: &Path, id: &SessionId) -> io::Result<Transcript> {
    let json = fs::read_to_string(transcript_path(dir, id)?)?;
    serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Load a saved transcript by session id.
pub fn load_transcript(id: &SessionId) -> io::Result<Transcript> {
    load_in(&sessions_dir()?, id)
}

/// Save the session's transcript to disk. Skips empty sessions. This is the
/// single entry point for persistence; call it once the session has ended.
pub fn save_session(state: &SessionState) {
    let transcript = Transcript::from_state(state);
    let result = sessions_dir().and_then(|dir| save_in(&dir, &transcript));
    match result {
        Ok(Some(path)) => info!("Transcript saved to {}", path.display()),
        Ok(None) => {}
        Err(e) => warn!("Failed to save transcript: {}", e),
    }
}
