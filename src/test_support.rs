//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::backend::approval_api::{ApprovalApi, ApprovalBody};
use crate::backend::transport::{ConnectionError, Transport, TransportError};
use crate::core::types::{
    AgentType, ErrorRecord, EventKind, PlanApprovalRequest, PlanStatus, SessionId, StreamEvent,
};

/// Approval API that records every call and succeeds unless told otherwise.
pub struct RecordingApprovalApi {
    calls: Mutex<Vec<(String, ApprovalBody)>>,
    failures: Mutex<VecDeque<ErrorRecord>>,
    gate: Option<Semaphore>,
}

impl RecordingApprovalApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            gate: None,
        }
    }

    /// Calls are recorded on arrival but don't answer until `release()`.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn fail_next(&self, error: ErrorRecord) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> Vec<(String, ApprovalBody)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApprovalApi for RecordingApprovalApi {
    fn name(&self) -> &str {
        "recording"
    }

    async fn submit(&self, request_id: &str, body: &ApprovalBody) -> Result<(), ErrorRecord> {
        self.calls
            .lock()
            .unwrap()
            .push((request_id.to_string(), body.clone()));
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct Script {
    refuse: Option<String>,
    session: Option<String>,
    resumed_from: Option<String>,
    closed: bool,
}

/// In-memory transport. Frames come from the paired [`ScriptFeed`].
pub struct ScriptedTransport {
    frames: UnboundedReceiver<Result<String, TransportError>>,
    script: Arc<Mutex<Script>>,
}

/// The test's end of a [`ScriptedTransport`].
pub struct ScriptFeed {
    tx: Option<UnboundedSender<Result<String, TransportError>>>,
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, ScriptFeed) {
        let (tx, frames) = unbounded_channel();
        let script = Arc::new(Mutex::new(Script::default()));
        (
            Self {
                frames,
                script: script.clone(),
            },
            ScriptFeed {
                tx: Some(tx),
                script,
            },
        )
    }
}

impl ScriptFeed {
    pub fn frame(&self, raw: String) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Ok(raw));
        }
    }

    pub fn fail(&self, error: TransportError) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(error));
        }
    }

    /// Peer closes the channel once queued frames drain.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn refuse_connect(&self, reason: &str) {
        self.script.lock().unwrap().refuse = Some(reason.to_string());
    }

    pub fn connected_session(&self) -> Option<String> {
        self.script.lock().unwrap().session.clone()
    }

    pub fn resumed_from(&self) -> Option<String> {
        self.script.lock().unwrap().resumed_from.clone()
    }

    pub fn was_closed(&self) -> bool {
        self.script.lock().unwrap().closed
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(
        &mut self,
        session_id: &SessionId,
        resume_from: Option<&str>,
    ) -> Result<(), ConnectionError> {
        let mut script = self.script.lock().unwrap();
        if let Some(reason) = script.refuse.clone() {
            return Err(ConnectionError {
                endpoint: "scripted".to_string(),
                reason,
            });
        }
        script.session = Some(session_id.as_str().to_string());
        script.resumed_from = resume_from.map(str::to_string);
        Ok(())
    }

    async fn send(&mut self, _frame: String) -> Result<(), TransportError> {
        if self.script.lock().unwrap().closed {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        match self.frames.recv().await {
            Some(Ok(raw)) => Ok(Some(raw)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.script.lock().unwrap().closed = true;
    }
}

pub fn event(kind: EventKind, agent: &str, content: &str) -> StreamEvent {
    StreamEvent {
        kind,
        content: content.to_string(),
        timestamp: "2026-01-01T00:00:00Z".to_string(),
        plan_id: None,
        step_id: None,
        agent: agent.to_string(),
        agent_type: AgentType::Assistant,
        event_id: None,
    }
}

pub fn plan_request(id: &str) -> PlanApprovalRequest {
    PlanApprovalRequest {
        id: id.to_string(),
        plan_id: None,
        steps: Vec::new(),
        facts: String::new(),
        team: Vec::new(),
        status: PlanStatus::Pending,
    }
}
