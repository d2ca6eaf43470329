//! # Approval Coordinator
//!
//! Approve/reject with at most one decision in flight per request.
//!
//! ```text
//! approve(id) ──► begin()   checks: id is pending?  nothing in flight?
//!                   │       marks request Processing (optimistic)
//!                   ▼
//!                submit()   exactly one backend call, off the event loop
//!                   │
//!                   ▼
//!   Action::DecisionSucceeded / DecisionFailed ──► update() ──► settle_*()
//! ```
//!
//! `begin` and `settle_*` run on the session's event loop, so they never
//! interleave with stream events. Only `submit` runs elsewhere.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::backend::approval_api::{ApprovalApi, ApprovalBody};
use crate::core::action::Action;
use crate::core::state::{InFlight, Phase, SessionState, Verdict};
use crate::core::types::{ApprovalDecision, DecisionRecord, ErrorRecord, PlanStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalError {
    /// The id is not the current pending request (superseded, resolved, or never seen).
    StaleRequest { request_id: String },
    /// A decision for this id is already on the wire.
    ConcurrentDecision { request_id: String },
    /// The backend refused or could not be reached. The request stays pending.
    Backend(ErrorRecord),
    /// The session ended before the decision settled.
    SessionClosed,
}

impl fmt::Display for ApprovalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalError::StaleRequest { request_id } => {
                write!(f, "plan {request_id} is no longer pending")
            }
            ApprovalError::ConcurrentDecision { request_id } => {
                write!(f, "a decision for plan {request_id} is already in flight")
            }
            ApprovalError::Backend(record) => write!(f, "approval failed: {record}"),
            ApprovalError::SessionClosed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for ApprovalError {}

/// A decision that passed the local checks and is ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalCall {
    /// Per-session call number; settles only the `InFlight` with the same seq.
    pub seq: u64,
    pub decision: ApprovalDecision,
    /// Backend plan id for the request body.
    pub plan_id: String,
}

pub struct ApprovalCoordinator {
    api: Arc<dyn ApprovalApi>,
}

impl ApprovalCoordinator {
    pub fn new(api: Arc<dyn ApprovalApi>) -> Self {
        Self { api }
    }

    pub fn approve(
        &self,
        state: &mut SessionState,
        request_id: &str,
        feedback: String,
    ) -> Result<ApprovalCall, ApprovalError> {
        self.begin(state, request_id, true, feedback)
    }

    pub fn reject(
        &self,
        state: &mut SessionState,
        request_id: &str,
        feedback: String,
    ) -> Result<ApprovalCall, ApprovalError> {
        self.begin(state, request_id, false, feedback)
    }

    /// Local precondition checks, then mark the request as processing.
    /// No network I/O happens here.
    pub fn begin(
        &self,
        state: &mut SessionState,
        request_id: &str,
        approved: bool,
        feedback: String,
    ) -> Result<ApprovalCall, ApprovalError> {
        if state.is_in_flight(request_id) {
            return Err(ApprovalError::ConcurrentDecision {
                request_id: request_id.to_string(),
            });
        }

        let pending = state
            .pending
            .as_mut()
            .filter(|p| p.id == request_id)
            .ok_or_else(|| ApprovalError::StaleRequest {
                request_id: request_id.to_string(),
            })?;

        pending.status = PlanStatus::Processing;
        let plan_id = pending.backend_plan_id().to_string();
        state.decision_seq += 1;
        let call = ApprovalCall {
            seq: state.decision_seq,
            decision: ApprovalDecision {
                request_id: request_id.to_string(),
                approved,
                feedback,
            },
            plan_id,
        };
        state.in_flight = Some(InFlight {
            seq: call.seq,
            decision: call.decision.clone(),
        });

        info!(
            "Decision for plan {} in flight (approved={})",
            request_id, approved
        );
        Ok(call)
    }

    /// Issue the backend call. The returned future owns everything it needs,
    /// so it can be spawned; it resolves to the action that settles it.
    pub fn submit(&self, call: ApprovalCall) -> impl Future<Output = Action> + Send + 'static {
        let api = Arc::clone(&self.api);
        async move {
            let body = ApprovalBody {
                m_plan_id: call.decision.request_id.clone(),
                plan_id: call.plan_id,
                approved: call.decision.approved,
                feedback: call.decision.feedback.clone(),
            };
            debug!(
                "Submitting decision for plan {} via {}",
                call.decision.request_id,
                api.name()
            );
            match api.submit(&call.decision.request_id, &body).await {
                Ok(()) => Action::DecisionSucceeded {
                    seq: call.seq,
                    decision: call.decision,
                },
                Err(error) => Action::DecisionFailed {
                    seq: call.seq,
                    decision: call.decision,
                    error,
                },
            }
        }
    }
}

/// True when call `seq` is the one this state is waiting on.
fn is_current(state: &SessionState, seq: u64, decision: &ApprovalDecision) -> bool {
    state.pending_id() == Some(decision.request_id.as_str())
        && state.in_flight.as_ref().is_some_and(|f| f.seq == seq)
}

/// Backend accepted the decision: record it and resolve.
pub fn settle_success(
    state: &mut SessionState,
    seq: u64,
    decision: ApprovalDecision,
) -> Result<(), ApprovalError> {
    if !is_current(state, seq, &decision) {
        warn!(
            "Discarding result for superseded plan {}",
            decision.request_id
        );
        return Err(ApprovalError::StaleRequest {
            request_id: decision.request_id,
        });
    }

    state.in_flight = None;
    let verdict = Verdict::from_approved(decision.approved);
    if let Some(mut plan) = state.pending.take() {
        plan.status = match verdict {
            Verdict::Approved => PlanStatus::Approved,
            Verdict::Rejected => PlanStatus::Rejected,
        };
        state.decisions.push(DecisionRecord {
            decision,
            plan,
            resolved_at: chrono::Utc::now(),
        });
    }
    state.phase = Phase::Resolved(verdict);
    info!("Plan resolved: {}", state.phase.label());
    Ok(())
}

/// Backend call failed: put the request back so the user can retry.
pub fn settle_failure(
    state: &mut SessionState,
    seq: u64,
    decision: ApprovalDecision,
    error: ErrorRecord,
) -> Result<(), ApprovalError> {
    if !is_current(state, seq, &decision) {
        warn!(
            "Discarding failure for superseded plan {}: {}",
            decision.request_id, error
        );
        return Err(ApprovalError::StaleRequest {
            request_id: decision.request_id,
        });
    }

    warn!("Decision for plan {} failed: {}", decision.request_id, error);
    state.in_flight = None;
    if let Some(plan) = state.pending.as_mut() {
        plan.status = PlanStatus::Pending;
    }
    state.phase = Phase::AwaitingApproval;
    state.last_error = Some(error.clone());
    Err(ApprovalError::Backend(error))
}
