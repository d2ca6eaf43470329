//! # Session State
//!
//! Everything known about one session, in one place.
//!
//! ```text
//! SessionState
//! ├── session_id: SessionId
//! ├── phase: Phase                       // approval state machine
//! ├── buffer: StreamBuffer               // live narration
//! ├── messages: Vec<AgentMessage>        // finalized turns
//! ├── pending: Option<PlanApprovalRequest>
//! ├── in_flight: Option<InFlight>       // at most one
//! ├── decision_seq: u64                  // last issued InFlight::seq
//! ├── decisions: Vec<DecisionRecord>     // resolved history, append-only
//! ├── last_error: Option<ErrorRecord>
//! ├── last_action: Option<StreamEvent>
//! └── last_event_id: Option<String>      // resume point
//! ```
//!
//! Phases only move along these edges:
//!
//! ```text
//! Idle ──subscribe──► WaitingForPlan ──event──► Streaming ──plan──► AwaitingApproval
//!  ▲                                                                 │   ▲
//!  └──────────── fatal error (from any phase) ───────         decision   new plan
//!                                                                    ▼   │
//!                                                                  Resolved
//! ```
//!
//! State changes only happen through `update(state, action)` in action.rs
//! and the approval functions in approval.rs.

use serde::{Deserialize, Serialize};

use crate::core::buffer::StreamBuffer;
use crate::core::types::{
    AgentMessage, ApprovalDecision, DecisionRecord, ErrorRecord, PlanApprovalRequest, SessionId,
    StreamEvent,
};

/// The decision currently on the wire. `seq` identifies the call it came
/// from, so a late result can't settle a later decision with equal content.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlight {
    pub seq: u64,
    pub decision: ApprovalDecision,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn from_approved(approved: bool) -> Self {
        if approved {
            Verdict::Approved
        } else {
            Verdict::Rejected
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    WaitingForPlan,
    Streaming,
    AwaitingApproval,
    Resolved(Verdict),
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::WaitingForPlan => "waiting for plan",
            Phase::Streaming => "streaming",
            Phase::AwaitingApproval => "awaiting approval",
            Phase::Resolved(Verdict::Approved) => "approved",
            Phase::Resolved(Verdict::Rejected) => "rejected",
        }
    }
}

pub struct SessionState {
    pub session_id: SessionId,
    pub phase: Phase,
    pub buffer: StreamBuffer,
    pub messages: Vec<AgentMessage>,
    pub pending: Option<PlanApprovalRequest>,
    pub in_flight: Option<InFlight>,
    pub decision_seq: u64,
    pub decisions: Vec<DecisionRecord>,
    pub last_error: Option<ErrorRecord>,
    pub last_action: Option<StreamEvent>,
    pub last_event_id: Option<String>,
}

/// Read-only view handed to observers.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub phase: Phase,
    /// Live narration; `None` while the buffer is empty or whitespace.
    pub buffer: Option<String>,
    pub buffer_agent: Option<String>,
    pub messages: Vec<AgentMessage>,
    pub pending: Option<PlanApprovalRequest>,
    pub decision_in_flight: bool,
    pub decisions: Vec<DecisionRecord>,
    pub last_error: Option<ErrorRecord>,
    pub last_action: Option<StreamEvent>,
    pub last_event_id: Option<String>,
}

impl SessionState {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            phase: Phase::Idle,
            buffer: StreamBuffer::new(),
            messages: Vec::new(),
            pending: None,
            in_flight: None,
            decision_seq: 0,
            decisions: Vec::new(),
            last_error: None,
            last_action: None,
            last_event_id: None,
        }
    }

    /// The request a decision may currently be made against.
    pub fn pending_id(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.id.as_str())
    }

    /// Whether `request_id` has a decision on the wire right now.
    pub fn is_in_flight(&self, request_id: &str) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.decision.request_id == request_id)
    }

    /// The phase the held data implies once subscribed: a pending plan
    /// means `AwaitingApproval`, otherwise the last verdict, if any.
    pub fn held_phase(&self) -> Option<Phase> {
        if self.pending.is_some() {
            return Some(Phase::AwaitingApproval);
        }
        self.decisions
            .last()
            .map(|r| Phase::Resolved(Verdict::from_approved(r.decision.approved)))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            phase: self.phase,
            buffer: self.buffer.visible().map(str::to_string),
            buffer_agent: self.buffer.active_agent().map(str::to_string),
            messages: self.messages.clone(),
            pending: self.pending.clone(),
            decision_in_flight: self.in_flight.is_some(),
            decisions: self.decisions.clone(),
            last_error: self.last_error.clone(),
            last_action: self.last_action.clone(),
            last_event_id: self.last_event_id.clone(),
        }
    }
}
