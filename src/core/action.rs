//! # Actions
//!
//! Everything that can happen to a session becomes an `Action`.
//! A frame arrives? That's `Action::Inbound(..)`.
//! The approval call returns? That's `Action::DecisionSucceeded { .. }`.
//!
//! The `update()` function takes the current state and an action, mutates
//! the state, and returns an `Effect` telling the event loop what to do
//! next. No I/O here. I/O happens in the runtime.
//!
//! ```text
//! State + Action  →  update()  →  New State + Effect
//! ```

use log::{debug, info, warn};

use crate::core::approval::{self, ApprovalError};
use crate::core::classifier::Inbound;
use crate::core::errors;
use crate::core::state::{Phase, SessionState};
use crate::core::types::{
    ApprovalDecision, ErrorKind, ErrorRecord, EventKind, PlanApprovalRequest, StreamEvent,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// The session started listening to the backend stream.
    Subscribed,
    /// A classified frame from the transport.
    Inbound(Inbound),
    /// The transport failed. Always fatal.
    ChannelFault(ErrorRecord),
    /// The transport closed cleanly.
    ChannelClosed,
    /// `seq` is the `ApprovalCall::seq` the result belongs to.
    DecisionSucceeded {
        seq: u64,
        decision: ApprovalDecision,
    },
    DecisionFailed {
        seq: u64,
        decision: ApprovalDecision,
        error: ErrorRecord,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Nothing observers need to see.
    None,
    /// State changed; publish a snapshot.
    Notify,
    /// An approval call settled; publish and answer whoever asked.
    Settle {
        seq: u64,
        request_id: String,
        result: Result<(), ApprovalError>,
    },
    /// The session is over. Publish a final snapshot and tear down.
    /// Carries the fault, if it wasn't a clean close.
    End(Option<ErrorRecord>),
}

pub fn update(state: &mut SessionState, action: Action) -> Effect {
    match action {
        Action::Subscribed => {
            if state.phase == Phase::Idle {
                // a resumed session picks up where its data says it was
                state.phase = state.held_phase().unwrap_or(Phase::WaitingForPlan);
                Effect::Notify
            } else {
                Effect::None
            }
        }
        Action::Inbound(_) if state.phase == Phase::Idle => {
            warn!("Session {} is idle; dropping inbound frame", state.session_id);
            Effect::None
        }
        Action::Inbound(Inbound::Event(event)) => on_event(state, event),
        Action::Inbound(Inbound::PlanRequest(request)) => on_plan(state, request),
        Action::ChannelFault(error) => end(state, error),
        Action::ChannelClosed => {
            info!("Session {} transport closed", state.session_id);
            state.phase = Phase::Idle;
            Effect::End(None)
        }
        Action::DecisionSucceeded { seq, decision } => Effect::Settle {
            seq,
            request_id: decision.request_id.clone(),
            result: approval::settle_success(state, seq, decision),
        },
        Action::DecisionFailed {
            seq,
            decision,
            error,
        } => Effect::Settle {
            seq,
            request_id: decision.request_id.clone(),
            result: approval::settle_failure(state, seq, decision, error),
        },
    }
}

fn end(state: &mut SessionState, error: ErrorRecord) -> Effect {
    warn!("Session {} ended: {}", state.session_id, error);
    state.phase = Phase::Idle;
    state.last_error = Some(error.clone());
    Effect::End(Some(error))
}

fn on_event(state: &mut SessionState, event: StreamEvent) -> Effect {
    if let Some(id) = &event.event_id {
        state.last_event_id = Some(id.clone());
    }
    if let (Some(event_plan), Some(pending)) = (&event.plan_id, state.pending_id())
        && event_plan != pending
    {
        // buffering is per session, not per plan
        debug!(
            "Event for plan {} while plan {} is pending",
            event_plan, pending
        );
    }
    if state.phase == Phase::WaitingForPlan {
        state.phase = Phase::Streaming;
    }

    match event.kind {
        EventKind::Thought | EventKind::Progress => {
            let flushed = state.buffer.append(&event);
            let had_flush = flushed.is_some();
            state.messages.extend(flushed);
            if had_flush || !state.buffer.is_blank() {
                Effect::Notify
            } else {
                Effect::None
            }
        }
        EventKind::Complete => {
            let message = state.buffer.flush(&event);
            debug!(
                "Turn complete for '{}' ({} bytes)",
                message.agent,
                message.content.len()
            );
            state.messages.push(message);
            Effect::Notify
        }
        EventKind::Action => {
            state.last_action = Some(event);
            Effect::Notify
        }
        EventKind::Error => {
            let record = errors::classify_payload(&event.content);
            if record.kind == ErrorKind::Transport {
                end(state, record)
            } else {
                info!("Advisory error on session {}: {}", state.session_id, record);
                state.last_error = Some(record);
                Effect::Notify
            }
        }
    }
}

fn on_plan(state: &mut SessionState, mut request: PlanApprovalRequest) -> Effect {
    match state.pending.as_ref() {
        Some(old) if old.id == request.id => {
            // re-sent plan: refresh content, keep any decision in flight
            request.status = old.status;
            debug!("Plan {} re-sent", request.id);
        }
        Some(old) => {
            info!("Plan {} superseded by {}", old.id, request.id);
            state.in_flight = None;
        }
        None => info!("Plan {} awaiting approval", request.id),
    }
    state.pending = Some(request);
    state.phase = Phase::AwaitingApproval;
    Effect::Notify
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::approval::ApprovalCoordinator;
    use crate::core::state::Verdict;
    use crate::core::types::{PlanStatus, SessionId};
    use crate::test_support::{RecordingApprovalApi, event, plan_request};
    use std::sync::Arc;

    fn subscribed() -> SessionState {
        let mut state = SessionState::new(SessionId::new("s"));
        update(&mut state, Action::Subscribed);
        state
    }

    fn send(state: &mut SessionState, e: StreamEvent) -> Effect {
        update(state, Action::Inbound(Inbound::Event(e)))
    }

    fn offer(state: &mut SessionState, id: &str) -> Effect {
        update(state, Action::Inbound(Inbound::PlanRequest(plan_request(id))))
    }

    #[test]
    fn test_subscribe_moves_idle_to_waiting() {
        let mut state = SessionState::new(SessionId::new("s"));
        assert_eq!(update(&mut state, Action::Subscribed), Effect::Notify);
        assert_eq!(state.phase, Phase::WaitingForPlan);
        assert_eq!(update(&mut state, Action::Subscribed), Effect::None);
    }

    #[test]
    fn test_resumed_session_with_pending_plan_awaits_approval() {
        let mut state = SessionState::new(SessionId::new("s"));
        state.pending = Some(plan_request("A"));
        update(&mut state, Action::Subscribed);
        assert_eq!(state.phase, Phase::AwaitingApproval);

        send(&mut state, event(EventKind::Thought, "Planner", "still here"));
        assert_eq!(state.phase, Phase::AwaitingApproval);
    }

    #[test]
    fn test_first_event_starts_streaming() {
        let mut state = subscribed();
        send(&mut state, event(EventKind::Thought, "Planner", "hi"));
        assert_eq!(state.phase, Phase::Streaming);
    }

    #[test]
    fn test_idle_session_drops_frames() {
        let mut state = SessionState::new(SessionId::new("s"));
        assert_eq!(send(&mut state, event(EventKind::Thought, "a", "x")), Effect::None);
        assert_eq!(state.buffer.text(), "");
        assert_eq!(offer(&mut state, "A"), Effect::None);
        assert!(state.pending.is_none());
    }

    #[test]
    fn test_planner_scenario() {
        let mut state = subscribed();
        send(&mut state, event(EventKind::Thought, "Planner", "Analyzing"));
        send(&mut state, event(EventKind::Thought, "Planner", " request"));
        assert_eq!(state.buffer.text(), "Analyzing request");
        assert_eq!(send(&mut state, event(EventKind::Complete, "Planner", "")), Effect::Notify);

        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].agent, "Planner");
        assert_eq!(state.messages[0].content, "Analyzing request");
        assert_eq!(state.buffer.text(), "");
    }

    #[test]
    fn test_complete_on_empty_buffer_still_makes_one_message() {
        let mut state = subscribed();
        send(&mut state, event(EventKind::Complete, "Planner", ""));
        send(&mut state, event(EventKind::Complete, "Planner", ""));
        assert_eq!(state.messages.len(), 2);
        assert!(state.messages.iter().all(|m| m.content.is_empty()));
    }

    #[test]
    fn test_whitespace_narration_is_quiet() {
        let mut state = subscribed();
        assert_eq!(send(&mut state, event(EventKind::Thought, "a", "  ")), Effect::None);
        assert_eq!(send(&mut state, event(EventKind::Thought, "a", "x")), Effect::Notify);
    }

    #[test]
    fn test_action_event_is_recorded_not_buffered() {
        let mut state = subscribed();
        send(&mut state, event(EventKind::Action, "Coder", "running step 2"));
        assert_eq!(state.buffer.text(), "");
        assert_eq!(state.last_action.as_ref().unwrap().content, "running step 2");
    }

    #[test]
    fn test_event_id_is_tracked() {
        let mut state = subscribed();
        let mut e = event(EventKind::Thought, "a", "x");
        e.event_id = Some("ev-3".to_string());
        send(&mut state, e);
        send(&mut state, event(EventKind::Thought, "a", "y"));
        assert_eq!(state.last_event_id.as_deref(), Some("ev-3"));
    }

    #[test]
    fn test_policy_error_event_is_advisory() {
        let mut state = subscribed();
        let e = event(
            EventKind::Error,
            "a",
            r#"{"error":{"code":"content_filter","message":"blocked"}}"#,
        );
        assert_eq!(send(&mut state, e), Effect::Notify);
        assert_eq!(state.phase, Phase::Streaming);
        assert_eq!(state.last_error.as_ref().unwrap().kind, ErrorKind::Policy);
    }

    #[test]
    fn test_unknown_error_event_does_not_end_session() {
        let mut state = subscribed();
        assert_eq!(send(&mut state, event(EventKind::Error, "a", "hmm")), Effect::Notify);
        assert_eq!(state.last_error.as_ref().unwrap().kind, ErrorKind::Unknown);
        assert_ne!(state.phase, Phase::Idle);
    }

    #[test]
    fn test_transport_error_event_is_fatal() {
        let mut state = subscribed();
        offer(&mut state, "A");
        let e = event(EventKind::Error, "a", r#"{"kind":"connection_error","message":"gone"}"#);
        assert!(matches!(send(&mut state, e), Effect::End(Some(_))));
        assert_eq!(state.phase, Phase::Idle);
    }

    #[test]
    fn test_channel_fault_from_any_phase_goes_idle() {
        let mut state = subscribed();
        offer(&mut state, "A");
        let effect = update(&mut state, Action::ChannelFault(ErrorRecord::transport("reset")));
        assert_eq!(effect, Effect::End(Some(ErrorRecord::transport("reset"))));
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.last_error.as_ref().unwrap().detail, "reset");
    }

    #[test]
    fn test_clean_close_ends_without_fault() {
        let mut state = subscribed();
        assert_eq!(update(&mut state, Action::ChannelClosed), Effect::End(None));
        assert_eq!(state.phase, Phase::Idle);
    }

    #[test]
    fn test_plan_arrival_awaits_approval_and_keeps_buffering() {
        let mut state = subscribed();
        send(&mut state, event(EventKind::Thought, "Planner", "drafting"));
        offer(&mut state, "A");
        assert_eq!(state.phase, Phase::AwaitingApproval);
        send(&mut state, event(EventKind::Thought, "Planner", " more"));
        assert_eq!(state.buffer.text(), "drafting more");
        assert_eq!(state.phase, Phase::AwaitingApproval);
    }

    #[test]
    fn test_newer_plan_supersedes() {
        let api = Arc::new(RecordingApprovalApi::new());
        let coord = ApprovalCoordinator::new(api.clone());
        let mut state = subscribed();
        offer(&mut state, "A");
        offer(&mut state, "B");

        assert_eq!(state.phase, Phase::AwaitingApproval);
        assert_eq!(state.pending_id(), Some("B"));
        assert!(matches!(
            coord.approve(&mut state, "A", String::new()),
            Err(ApprovalError::StaleRequest { .. })
        ));
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_supersede_while_in_flight_discards_old_result() {
        let coord = ApprovalCoordinator::new(Arc::new(RecordingApprovalApi::new()));
        let mut state = subscribed();
        offer(&mut state, "A");
        let call = coord.approve(&mut state, "A", String::new()).unwrap();
        offer(&mut state, "B");
        assert!(state.in_flight.is_none());

        let effect = update(
            &mut state,
            Action::DecisionSucceeded {
                seq: call.seq,
                decision: call.decision,
            },
        );
        assert!(matches!(
            effect,
            Effect::Settle { result: Err(ApprovalError::StaleRequest { .. }), .. }
        ));
        assert_eq!(state.pending_id(), Some("B"));
        assert_eq!(state.phase, Phase::AwaitingApproval);
        // B is free to be decided
        assert!(coord.approve(&mut state, "B", String::new()).is_ok());
    }

    #[test]
    fn test_resent_plan_keeps_processing_status() {
        let coord = ApprovalCoordinator::new(Arc::new(RecordingApprovalApi::new()));
        let mut state = subscribed();
        offer(&mut state, "A");
        coord.approve(&mut state, "A", String::new()).unwrap();
        offer(&mut state, "A");
        assert_eq!(state.pending.as_ref().unwrap().status, PlanStatus::Processing);
        assert!(state.is_in_flight("A"));
    }

    #[test]
    fn test_resolved_then_new_plan_restarts_cycle() {
        let coord = ApprovalCoordinator::new(Arc::new(RecordingApprovalApi::new()));
        let mut state = subscribed();
        offer(&mut state, "A");
        let call = coord.approve(&mut state, "A", String::new()).unwrap();
        let effect = update(
            &mut state,
            Action::DecisionSucceeded {
                seq: call.seq,
                decision: call.decision,
            },
        );
        assert_eq!(
            effect,
            Effect::Settle {
                seq: 1,
                request_id: "A".to_string(),
                result: Ok(())
            }
        );
        assert_eq!(state.phase, Phase::Resolved(Verdict::Approved));

        offer(&mut state, "B");
        assert_eq!(state.phase, Phase::AwaitingApproval);
        assert_eq!(state.decisions.len(), 1);
        assert_eq!(state.decisions[0].plan.id, "A");
        assert_eq!(state.decisions[0].plan.status, PlanStatus::Approved);
    }

    #[test]
    fn test_failed_decision_reverts_and_allows_retry() {
        let coord = ApprovalCoordinator::new(Arc::new(RecordingApprovalApi::new()));
        let mut state = subscribed();
        offer(&mut state, "A");
        let call = coord.approve(&mut state, "A", String::new()).unwrap();
        let effect = update(
            &mut state,
            Action::DecisionFailed {
                seq: call.seq,
                decision: call.decision,
                error: ErrorRecord::transport("HTTP 500"),
            },
        );
        assert!(matches!(
            effect,
            Effect::Settle { result: Err(ApprovalError::Backend(_)), .. }
        ));
        assert_eq!(state.phase, Phase::AwaitingApproval);
        assert_eq!(state.pending_id(), Some("A"));

        let retry = coord.approve(&mut state, "A", String::new()).unwrap();
        update(
            &mut state,
            Action::DecisionSucceeded {
                seq: retry.seq,
                decision: retry.decision,
            },
        );
        assert_eq!(state.phase, Phase::Resolved(Verdict::Approved));
    }
}
