//! # Message Classifier
//!
//! Turns raw inbound frames into typed events. Pure: no state, no I/O.
//!
//! ```text
//! raw frame ──► classify() ──┬─► Inbound::Event(StreamEvent)
//!                            ├─► Inbound::PlanRequest(PlanApprovalRequest)
//!                            └─► ParseError (caller logs and drops)
//! ```
//!
//! Plan payloads have shown up under several different fields. Rather than
//! probing them ad hoc, [`PLAN_TIERS`] lists the places to look, in order.
//! The first tier that yields a well-formed plan wins.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::core::types::{
    AgentType, DEFAULT_AGENT, EventKind, PlanApprovalRequest, PlanStatus, PlanStep, StreamEvent,
};

/// Wire tag for plan approval frames.
pub const PLAN_APPROVAL_REQUEST: &str = "plan_approval_request";

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(StreamEvent),
    PlanRequest(PlanApprovalRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Not JSON, or JSON of the wrong shape.
    Malformed(String),
    /// No `type` tag.
    MissingType,
    /// A `type` tag we don't know. Advisory only.
    UnknownKind(String),
    /// A plan frame where no tier produced a plan.
    MissingPlan,
    /// A plan with nothing to identify it by.
    MissingPlanId,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Malformed(msg) => write!(f, "malformed frame: {msg}"),
            ParseError::MissingType => write!(f, "frame has no type"),
            ParseError::UnknownKind(kind) => write!(f, "unknown frame type '{kind}'"),
            ParseError::MissingPlan => write!(f, "plan frame carries no plan"),
            ParseError::MissingPlanId => write!(f, "plan has no id"),
        }
    }
}

impl std::error::Error for ParseError {}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct StreamFrame {
    #[serde(default)]
    content: String,
    timestamp: Option<String>,
    plan_id: Option<String>,
    step_id: Option<String>,
    agent: Option<String>,
    agent_type: Option<AgentType>,
    id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawPlan {
    id: Option<String>,
    m_plan_id: Option<String>,
    plan_id: Option<String>,
    steps: Vec<RawStep>,
    #[serde(default)]
    facts: String,
    #[serde(default)]
    team: Vec<String>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawStep {
    Text(String),
    Detailed(DetailedStep),
}

#[derive(Deserialize, Debug)]
struct DetailedStep {
    #[serde(alias = "description")]
    action: String,
    agent: Option<String>,
}

impl From<RawStep> for PlanStep {
    fn from(step: RawStep) -> Self {
        match step {
            RawStep::Text(action) => PlanStep {
                agent: None,
                action,
            },
            RawStep::Detailed(d) => PlanStep {
                agent: d.agent,
                action: d.action,
            },
        }
    }
}

// ============================================================================
// Plan Precedence
// ============================================================================

type PlanTier = fn(&Value) -> Option<Value>;

/// Where a plan may live inside a `plan_approval_request` frame, highest
/// precedence first.
pub const PLAN_TIERS: [(&str, PlanTier); 4] = [
    ("plan", plan_field),
    ("data.plan", data_plan_field),
    ("data", data_with_steps),
    ("content", content_json),
];

fn plan_field(frame: &Value) -> Option<Value> {
    frame.get("plan").filter(|v| v.is_object()).cloned()
}

fn data_plan_field(frame: &Value) -> Option<Value> {
    frame
        .get("data")?
        .get("plan")
        .filter(|v| v.is_object())
        .cloned()
}

fn data_with_steps(frame: &Value) -> Option<Value> {
    frame.get("data").filter(|v| v.get("steps").is_some()).cloned()
}

fn content_json(frame: &Value) -> Option<Value> {
    let content = frame.get("content")?.as_str()?;
    serde_json::from_str::<Value>(content)
        .ok()
        .filter(|v| v.get("steps").is_some())
}

/// Walks [`PLAN_TIERS`] once and returns the first well-formed plan.
fn first_plan(frame: &Value) -> Option<(&'static str, RawPlan)> {
    PLAN_TIERS.iter().find_map(|(name, tier)| {
        let candidate = tier(frame)?;
        match serde_json::from_value::<RawPlan>(candidate) {
            Ok(plan) => Some((*name, plan)),
            Err(e) => {
                log::debug!("Plan tier '{}' present but unusable: {}", name, e);
                None
            }
        }
    })
}

fn plan_request(frame: &Value) -> Result<PlanApprovalRequest, ParseError> {
    let (tier, plan) = first_plan(frame).ok_or(ParseError::MissingPlan)?;
    let frame_plan_id = frame.get("planId").and_then(Value::as_str);

    let id = plan
        .id
        .clone()
        .or_else(|| plan.m_plan_id.clone())
        .or_else(|| frame_plan_id.map(str::to_string))
        .or_else(|| plan.plan_id.clone())
        .ok_or(ParseError::MissingPlanId)?;

    log::debug!(
        "Plan request {} classified from tier '{}' ({} steps)",
        id,
        tier,
        plan.steps.len()
    );

    Ok(PlanApprovalRequest {
        plan_id: plan.plan_id.filter(|p| *p != id),
        id,
        steps: plan.steps.into_iter().map(PlanStep::from).collect(),
        facts: plan.facts,
        team: plan.team,
        status: PlanStatus::Pending,
    })
}

// ============================================================================
// Classification
// ============================================================================

/// Classify one raw frame.
///
/// Frames without a timestamp are stamped with the time of receipt.
pub fn classify(raw: &str) -> Result<Inbound, ParseError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingType)?;

    if tag == PLAN_APPROVAL_REQUEST {
        return plan_request(&value).map(Inbound::PlanRequest);
    }

    let kind = EventKind::from_tag(tag).ok_or_else(|| ParseError::UnknownKind(tag.to_string()))?;
    let frame: StreamFrame =
        serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))?;

    Ok(Inbound::Event(StreamEvent {
        kind,
        content: frame.content,
        timestamp: frame
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
        plan_id: frame.plan_id,
        step_id: frame.step_id,
        agent: frame.agent.unwrap_or_else(|| DEFAULT_AGENT.to_string()),
        agent_type: frame.agent_type.unwrap_or_default(),
        event_id: frame.id,
    }))
}
