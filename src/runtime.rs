//! # Session Runtime
//!
//! One task per session. All state mutation is serialized through a single
//! `select!` loop:
//!
//! ```text
//!   transport.receive() ──► classify ──┐
//!   SessionHandle commands ────────────┼──► update(state, action) ──► registry.notify()
//!   approval outcomes (spawned calls) ─┘
//! ```
//!
//! Approval round-trips run in their own tasks and post their result back
//! as an `Action`, so stream events keep flowing while a decision is in
//! flight. Nothing here retries on its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::backend::approval_api::ApprovalApi;
use crate::backend::transport::{ConnectionError, Transport};
use crate::core::action::{Action, Effect, update};
use crate::core::approval::{ApprovalCoordinator, ApprovalError};
use crate::core::classifier::{self, Inbound, ParseError};
use crate::core::state::{Phase, SessionState};
use crate::core::subscription::{Notification, Subscription, SubscriptionRegistry};
use crate::core::types::{ErrorRecord, PlanStatus, SessionId};

const COMMAND_CAPACITY: usize = 32;
const OUTCOME_CAPACITY: usize = 16;

type Reply = oneshot::Sender<Result<(), ApprovalError>>;

enum Command {
    Decide {
        request_id: String,
        approved: bool,
        feedback: String,
        reply: Reply,
    },
    Shutdown,
}

/// Why a session loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum EndReason {
    /// The backend closed the channel.
    Closed,
    /// A fatal fault: transport failure or a transport-class error event.
    Fault(ErrorRecord),
    /// Every handle was dropped, or `shutdown()` was called.
    Shutdown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Closed => write!(f, "closed by backend"),
            EndReason::Fault(record) => write!(f, "{record}"),
            EndReason::Shutdown => write!(f, "shut down"),
        }
    }
}

/// What's left after the loop stops. Hand `state` to
/// [`SessionRuntime::reconnect`] to pick up where the session left off.
pub struct SessionOutcome {
    pub reason: EndReason,
    pub state: SessionState,
}

/// Cheap, cloneable way to talk to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    commands: mpsc::Sender<Command>,
    registry: SubscriptionRegistry,
}

impl SessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.registry.subscribe(&self.session_id, observer)
    }

    /// Resolves once the backend answers, or immediately if a local check
    /// fails.
    pub async fn approve(
        &self,
        request_id: &str,
        feedback: impl Into<String>,
    ) -> Result<(), ApprovalError> {
        self.decide(request_id, true, feedback.into()).await
    }

    pub async fn reject(
        &self,
        request_id: &str,
        feedback: impl Into<String>,
    ) -> Result<(), ApprovalError> {
        self.decide(request_id, false, feedback.into()).await
    }

    async fn decide(
        &self,
        request_id: &str,
        approved: bool,
        feedback: String,
    ) -> Result<(), ApprovalError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Decide {
                request_id: request_id.to_string(),
                approved,
                feedback,
                reply,
            })
            .await
            .map_err(|_| ApprovalError::SessionClosed)?;
        answer.await.unwrap_or(Err(ApprovalError::SessionClosed))
    }

    /// Ask the loop to stop. Returns immediately.
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!("Session {} already stopped", self.session_id);
        }
    }
}

/// The parts of a session the loop handlers touch. Kept apart from the
/// transport so the receive future and the handlers borrow disjoint things.
struct SessionCore {
    state: SessionState,
    coordinator: ApprovalCoordinator,
    registry: SubscriptionRegistry,
    /// Waiting callers, keyed by `ApprovalCall::seq`.
    replies: HashMap<u64, (String, Reply)>,
    outcomes: mpsc::Sender<Action>,
}

impl SessionCore {
    fn publish(&self) {
        let snapshot = Notification::Snapshot(self.state.snapshot());
        self.registry.notify(&self.state.session_id, &snapshot);
    }

    fn apply(&mut self, action: Action) -> Option<EndReason> {
        match update(&mut self.state, action) {
            Effect::None => None,
            Effect::Notify => {
                self.publish();
                None
            }
            Effect::Settle {
                seq,
                request_id,
                result,
            } => {
                self.publish();
                if let Some((_, reply)) = self.replies.remove(&seq) {
                    let _ = reply.send(result);
                } else if let Err(e) = result {
                    debug!("Settled {} with nobody waiting: {}", request_id, e);
                }
                None
            }
            Effect::End(fault) => {
                self.publish();
                Some(fault.map_or(EndReason::Closed, EndReason::Fault))
            }
        }
    }

    fn on_frame(&mut self, raw: &str) -> Option<EndReason> {
        match classifier::classify(raw) {
            Ok(inbound) => {
                if let Inbound::Event(event) = &inbound {
                    self.registry
                        .notify(&self.state.session_id, &Notification::Event(event.clone()));
                }
                let is_plan = matches!(inbound, Inbound::PlanRequest(_));
                let end = self.apply(Action::Inbound(inbound));
                if is_plan {
                    self.reject_superseded_waiters();
                }
                end
            }
            Err(ParseError::UnknownKind(kind)) => {
                debug!("Ignoring frame of unknown type '{}'", kind);
                None
            }
            Err(e) => {
                warn!("Dropping frame: {} ({} bytes)", e, raw.len());
                None
            }
        }
    }

    /// Callers waiting on a request that is no longer pending hear about it
    /// now rather than when their backend call returns.
    fn reject_superseded_waiters(&mut self) {
        let live = self.state.in_flight.as_ref().map(|f| f.seq);
        let stale: Vec<u64> = self
            .replies
            .keys()
            .copied()
            .filter(|seq| Some(*seq) != live)
            .collect();
        for seq in stale {
            if let Some((request_id, reply)) = self.replies.remove(&seq) {
                let _ = reply.send(Err(ApprovalError::StaleRequest { request_id }));
            }
        }
    }

    fn on_command(&mut self, command: Command) -> Option<EndReason> {
        match command {
            Command::Decide {
                request_id,
                approved,
                feedback,
                reply,
            } => {
                match self
                    .coordinator
                    .begin(&mut self.state, &request_id, approved, feedback)
                {
                    Ok(call) => {
                        self.publish();
                        self.replies.insert(call.seq, (request_id, reply));
                        let submit = self.coordinator.submit(call);
                        let outcomes = self.outcomes.clone();
                        tokio::spawn(async move {
                            let action = submit.await;
                            if outcomes.send(action).await.is_err() {
                                debug!("Session gone; discarding approval result");
                            }
                        });
                    }
                    Err(e) => {
                        info!("Decision refused locally: {}", e);
                        let _ = reply.send(Err(e));
                    }
                }
                None
            }
            Command::Shutdown => Some(EndReason::Shutdown),
        }
    }

    fn close_replies(&mut self) {
        for (_, (_, reply)) in self.replies.drain() {
            let _ = reply.send(Err(ApprovalError::SessionClosed));
        }
    }
}

pub struct SessionRuntime<T: Transport> {
    core: SessionCore,
    transport: T,
    commands: mpsc::Receiver<Command>,
    outcomes: mpsc::Receiver<Action>,
}

impl<T: Transport> SessionRuntime<T> {
    /// Open a new session. Fails if the channel can't be established.
    pub async fn connect(
        session_id: SessionId,
        transport: T,
        api: Arc<dyn ApprovalApi>,
        registry: SubscriptionRegistry,
    ) -> Result<(Self, SessionHandle), ConnectionError> {
        Self::start(SessionState::new(session_id), transport, api, registry).await
    }

    /// Reopen a session that ended, from its final state.
    ///
    /// With a known last event id the backend can replay from there, so the
    /// buffer is kept. Without one the buffer restarts empty. A decision that
    /// was in flight when the session ended is forgotten; its request goes
    /// back to pending, and the session resumes in `AwaitingApproval` (or
    /// `Resolved` with its last verdict when nothing is pending).
    pub async fn reconnect(
        mut state: SessionState,
        transport: T,
        api: Arc<dyn ApprovalApi>,
        registry: SubscriptionRegistry,
    ) -> Result<(Self, SessionHandle), ConnectionError> {
        state.phase = Phase::Idle;
        state.in_flight = None;
        if let Some(plan) = state.pending.as_mut() {
            plan.status = PlanStatus::Pending;
        }
        if state.last_event_id.is_none() {
            state.buffer = Default::default();
        }
        Self::start(state, transport, api, registry).await
    }

    async fn start(
        state: SessionState,
        mut transport: T,
        api: Arc<dyn ApprovalApi>,
        registry: SubscriptionRegistry,
    ) -> Result<(Self, SessionHandle), ConnectionError> {
        transport
            .connect(&state.session_id, state.last_event_id.as_deref())
            .await?;
        info!(
            "Session {} connected via {}",
            state.session_id,
            transport.name()
        );

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CAPACITY);
        let handle = SessionHandle {
            session_id: state.session_id.clone(),
            commands: command_tx,
            registry: registry.clone(),
        };
        let runtime = Self {
            core: SessionCore {
                state,
                coordinator: ApprovalCoordinator::new(api),
                registry,
                replies: HashMap::new(),
                outcomes: outcome_tx,
            },
            transport,
            commands: command_rx,
            outcomes: outcome_rx,
        };
        Ok((runtime, handle))
    }

    /// Drive the session until the channel closes, a fatal fault hits, or
    /// the handles ask it to stop.
    pub async fn run(self) -> SessionOutcome {
        let SessionRuntime {
            mut core,
            mut transport,
            mut commands,
            mut outcomes,
        } = self;

        let mut reason = core.apply(Action::Subscribed);
        while reason.is_none() {
            reason = tokio::select! {
                frame = transport.receive() => match frame {
                    Ok(Some(raw)) => core.on_frame(&raw),
                    Ok(None) => core.apply(Action::ChannelClosed),
                    Err(e) => core.apply(Action::ChannelFault(ErrorRecord::transport(e.to_string()))),
                },
                command = commands.recv() => match command {
                    Some(command) => core.on_command(command),
                    None => Some(EndReason::Shutdown),
                },
                Some(action) = outcomes.recv() => core.apply(action),
            };
        }
        let reason = reason.unwrap_or(EndReason::Shutdown);

        info!("Session {} ending: {}", core.state.session_id, reason);
        core.close_replies();
        core.registry.clear(&core.state.session_id);
        transport.close().await;

        SessionOutcome {
            reason,
            state: core.state,
        }
    }
}
