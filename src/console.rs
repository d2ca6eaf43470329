//! # Console Adapter
//!
//! Line-oriented front end: prints what changed in each snapshot to stdout
//! and turns stdin lines into approve/reject calls.
//!
//! ```text
//!   stdin ──► ConsoleCommand ──► SessionHandle ──► runtime
//!   runtime ──► Notification ──► Renderer ──► stdout
//! ```
//!
//! Rendering is a pure function of the previous and current snapshot, so it
//! is tested without a terminal.

use std::io;
use std::sync::{Arc, Mutex};

use log::{debug, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::backend::transport::Transport;
use crate::core::state::{Phase, SessionSnapshot};
use crate::core::subscription::Notification;
use crate::core::types::{ErrorRecord, PlanApprovalRequest};
use crate::runtime::{SessionHandle, SessionOutcome, SessionRuntime};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Approve(String),
    Reject(String),
    Quit,
    Help,
    Unknown(String),
}

impl ConsoleCommand {
    /// `approve [feedback]`, `reject [feedback]`, `quit`. Blank lines are `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim().to_string()),
            None => (line, String::new()),
        };
        Some(match word.to_ascii_lowercase().as_str() {
            "approve" | "a" => ConsoleCommand::Approve(rest),
            "reject" | "r" => ConsoleCommand::Reject(rest),
            "quit" | "q" | "exit" => ConsoleCommand::Quit,
            "help" | "?" => ConsoleCommand::Help,
            _ => ConsoleCommand::Unknown(word.to_string()),
        })
    }
}

const HELP: &str = "Commands: approve [feedback] | reject [feedback] | quit";

/// Remembers what has been printed so each snapshot only prints the delta.
#[derive(Debug, Default)]
pub struct Renderer {
    phase: Option<Phase>,
    messages: usize,
    decisions: usize,
    plan: Option<PlanApprovalRequest>,
    error: Option<ErrorRecord>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the plan currently shown as awaiting a decision.
    pub fn pending_id(&self) -> Option<&str> {
        self.plan.as_ref().map(|p| p.id.as_str())
    }

    pub fn render(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        for message in snapshot.messages.iter().skip(self.messages) {
            lines.push(format!("[{}] {}", message.agent, message.content.trim_end()));
        }
        self.messages = snapshot.messages.len();

        for record in snapshot.decisions.iter().skip(self.decisions) {
            let verdict = if record.decision.approved { "approved" } else { "rejected" };
            if record.decision.feedback.is_empty() {
                lines.push(format!("Plan {} {}", record.plan.id, verdict));
            } else {
                lines.push(format!(
                    "Plan {} {} ({})",
                    record.plan.id, verdict, record.decision.feedback
                ));
            }
        }
        self.decisions = snapshot.decisions.len();

        let plan_changed = match (&self.plan, &snapshot.pending) {
            (Some(old), Some(new)) => old.id != new.id || old.steps != new.steps,
            (None, Some(_)) => true,
            _ => false,
        };
        if plan_changed && let Some(plan) = &snapshot.pending {
            lines.extend(plan_lines(plan));
        }
        self.plan = snapshot.pending.clone();

        if snapshot.last_error != self.error
            && let Some(error) = &snapshot.last_error
        {
            lines.push(format!("! {error}"));
        }
        self.error = snapshot.last_error.clone();

        if self.phase != Some(snapshot.phase) {
            lines.push(format!("-- {} --", snapshot.phase.label()));
            self.phase = Some(snapshot.phase);
        }
        lines
    }
}

fn plan_lines(plan: &PlanApprovalRequest) -> Vec<String> {
    let mut lines = vec![format!("== Plan {} awaiting approval ==", plan.id)];
    if !plan.team.is_empty() {
        lines.push(format!("Team: {}", plan.team.join(", ")));
    }
    if !plan.facts.trim().is_empty() {
        lines.push(format!("Facts: {}", plan.facts.trim()));
    }
    for (i, step) in plan.steps.iter().enumerate() {
        match &step.agent {
            Some(agent) => lines.push(format!("  {}. [{}] {}", i + 1, agent, step.action)),
            None => lines.push(format!("  {}. {}", i + 1, step.action)),
        }
    }
    lines.push(HELP.to_string());
    lines
}

/// Run the session with a console attached. Returns when the user quits,
/// stdin closes, or the session ends on its own.
pub async fn run<T>(runtime: SessionRuntime<T>, handle: SessionHandle) -> io::Result<SessionOutcome>
where
    T: Transport + 'static,
{
    let renderer = Arc::new(Mutex::new(Renderer::new()));
    let observer = Arc::clone(&renderer);
    let _subscription = handle.subscribe(move |notification| {
        if let Notification::Snapshot(snapshot) = notification {
            let lines = match observer.lock() {
                Ok(mut r) => r.render(snapshot),
                Err(poisoned) => poisoned.into_inner().render(snapshot),
            };
            for line in lines {
                println!("{line}");
            }
        }
    });

    println!("Session {}", handle.session_id());
    let mut session = tokio::spawn(runtime.run());
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            outcome = &mut session => {
                return outcome.map_err(io::Error::other);
            }
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed, shutting down");
                    break;
                };
                let Some(command) = ConsoleCommand::parse(&line) else { continue };
                debug!("Console command: {:?}", command);
                match command {
                    ConsoleCommand::Approve(feedback) => decide(&handle, &renderer, true, feedback),
                    ConsoleCommand::Reject(feedback) => decide(&handle, &renderer, false, feedback),
                    ConsoleCommand::Quit => break,
                    ConsoleCommand::Help => println!("{HELP}"),
                    ConsoleCommand::Unknown(word) => println!("Unknown command '{word}'. {HELP}"),
                }
            }
        }
    }

    handle.shutdown().await;
    session.await.map_err(io::Error::other)
}

/// Fire a decision without blocking the input loop; the outcome is printed
/// when it arrives.
fn decide(handle: &SessionHandle, renderer: &Mutex<Renderer>, approved: bool, feedback: String) {
    let pending = match renderer.lock() {
        Ok(r) => r.pending_id().map(str::to_string),
        Err(poisoned) => poisoned.into_inner().pending_id().map(str::to_string),
    };
    let Some(request_id) = pending else {
        println!("No plan is awaiting approval.");
        return;
    };

    let handle = handle.clone();
    tokio::spawn(async move {
        let result = if approved {
            handle.approve(&request_id, feedback).await
        } else {
            handle.reject(&request_id, feedback).await
        };
        if let Err(e) = result {
            println!("! {e}");
        }
    });
}
