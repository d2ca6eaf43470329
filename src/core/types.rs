//! # Session Data Model
//!
//! Plain data carried through the session core. Everything here is
//! immutable once constructed, except `PlanApprovalRequest::status`,
//! which only the approval flow touches.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent name used when a frame carries no attribution.
pub const DEFAULT_AGENT: &str = "assistant";

/// Opaque id correlating one transport connection, buffer and subscriber set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh UUID v4 session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Thought,
    Action,
    Complete,
    Error,
}

impl EventKind {
    /// Maps a wire `type` tag to a known kind. Anything else is unknown.
    pub fn from_tag(tag: &str) -> Option<EventKind> {
        match tag {
            "progress" => Some(EventKind::Progress),
            "thought" => Some(EventKind::Thought),
            "action" => Some(EventKind::Action),
            "complete" => Some(EventKind::Complete),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }

    /// Whether this kind contributes narration text to the buffer.
    pub fn is_narration(self) -> bool {
        matches!(self, EventKind::Progress | EventKind::Thought)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Human,
    #[default]
    Assistant,
}

/// One classified frame from the backend stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub content: String,
    pub timestamp: String,
    pub plan_id: Option<String>,
    pub step_id: Option<String>,
    /// Agent the narration belongs to.
    pub agent: String,
    pub agent_type: AgentType,
    /// Backend event id, used to resume after a reconnect.
    pub event_id: Option<String>,
}

/// A finalized turn. Only produced by a buffer flush.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentMessage {
    pub agent: String,
    pub agent_type: AgentType,
    pub content: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub agent: Option<String>,
    pub action: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    #[default]
    Pending,
    /// A decision is in flight.
    Processing,
    Approved,
    Rejected,
}

/// A structured plan awaiting a human accept/reject decision.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlanApprovalRequest {
    pub id: String,
    /// Backend plan id, when it differs from the request id.
    pub plan_id: Option<String>,
    pub steps: Vec<PlanStep>,
    pub facts: String,
    pub team: Vec<String>,
    pub status: PlanStatus,
}

impl PlanApprovalRequest {
    /// The id sent as `plan_id` in the approval body.
    pub fn backend_plan_id(&self) -> &str {
        self.plan_id.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApprovalDecision {
    pub request_id: String,
    pub approved: bool,
    pub feedback: String,
}

/// A decision the backend accepted. Never mutated once recorded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub decision: ApprovalDecision,
    /// The plan as it stood when resolved, status included.
    pub plan: PlanApprovalRequest,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Transport,
    Policy,
    Validation,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, detail)
    }

    /// Policy and validation errors never end a session.
    pub fn is_advisory(&self) -> bool {
        matches!(self.kind, ErrorKind::Policy | ErrorKind::Validation)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Transport => "transport",
            ErrorKind::Policy => "policy",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{kind} error: {}", self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_from_tag() {
        assert_eq!(EventKind::from_tag("thought"), Some(EventKind::Thought));
        assert_eq!(EventKind::from_tag("complete"), Some(EventKind::Complete));
        assert_eq!(EventKind::from_tag("heartbeat"), None);
        assert_eq!(EventKind::from_tag("Thought"), None);
    }

    #[test]
    fn test_only_progress_and_thought_are_narration() {
        assert!(EventKind::Progress.is_narration());
        assert!(EventKind::Thought.is_narration());
        assert!(!EventKind::Action.is_narration());
        assert!(!EventKind::Complete.is_narration());
        assert!(!EventKind::Error.is_narration());
    }

    #[test]
    fn test_backend_plan_id_falls_back_to_request_id() {
        let mut request = PlanApprovalRequest {
            id: "m-1".to_string(),
            plan_id: None,
            steps: vec![],
            facts: String::new(),
            team: vec![],
            status: PlanStatus::Pending,
        };
        assert_eq!(request.backend_plan_id(), "m-1");
        request.plan_id = Some("p-9".to_string());
        assert_eq!(request.backend_plan_id(), "p-9");
    }

    #[test]
    fn test_error_record_advisory_kinds() {
        assert!(ErrorRecord::new(ErrorKind::Policy, "x").is_advisory());
        assert!(ErrorRecord::new(ErrorKind::Validation, "x").is_advisory());
        assert!(!ErrorRecord::transport("x").is_advisory());
        assert!(!ErrorRecord::new(ErrorKind::Unknown, "x").is_advisory());
        assert_eq!(
            ErrorRecord::transport("reset").to_string(),
            "transport error: reset"
        );
    }

    #[test]
    fn test_session_id_serializes_as_plain_string() {
        let id = SessionId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
