//! # Stream Buffer
//!
//! Live narration for the active agent. Narration events append; a turn
//! boundary moves the text into an [`AgentMessage`] and empties the buffer.
//!
//! ```text
//! thought "Analyzing" ─┐
//! thought " request" ──┼─► "Analyzing request" ──complete──► AgentMessage
//!                      │                                     buffer = ""
//! thought from B ──────┘ (agent switch flushes A's text first)
//! ```

use crate::core::types::{AgentMessage, AgentType, StreamEvent};

#[derive(Debug, Default, Clone)]
pub struct StreamBuffer {
    agent: Option<(String, AgentType)>,
    text: String,
    /// Timestamp of the most recent appended event.
    last_timestamp: String,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a narration event's content.
    ///
    /// If the event comes from a different agent than the one currently
    /// buffered, the old agent's text is flushed first and returned.
    /// Whitespace-only leftovers are dropped rather than flushed.
    pub fn append(&mut self, event: &StreamEvent) -> Option<AgentMessage> {
        let switched = self
            .agent
            .as_ref()
            .is_some_and(|(name, _)| *name != event.agent);

        let flushed = if switched {
            let timestamp = self.last_timestamp.clone();
            let previous = self.take(&timestamp, event);
            log::debug!(
                "Agent switch to '{}' flushed buffer of '{}'",
                event.agent,
                previous.agent
            );
            Some(previous).filter(|m| !m.content.trim().is_empty())
        } else {
            None
        };

        if self.agent.is_none() {
            self.agent = Some((event.agent.clone(), event.agent_type));
        }
        self.text.push_str(&event.content);
        self.last_timestamp = event.timestamp.clone();
        flushed
    }

    /// Ends the current turn. Always yields exactly one message, even when
    /// nothing was buffered.
    ///
    /// The message is attributed to the buffered agent, or to the completing
    /// event's agent when the buffer never saw one.
    pub fn flush(&mut self, event: &StreamEvent) -> AgentMessage {
        self.take(&event.timestamp, event)
    }

    fn take(&mut self, timestamp: &str, fallback: &StreamEvent) -> AgentMessage {
        let (agent, agent_type) = self
            .agent
            .take()
            .unwrap_or_else(|| (fallback.agent.clone(), fallback.agent_type));
        self.last_timestamp.clear();
        AgentMessage {
            agent,
            agent_type,
            content: std::mem::take(&mut self.text),
            timestamp: timestamp.to_string(),
        }
    }

    /// Raw buffered text, whitespace included.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Buffered text as observers should see it: `None` when there is
    /// nothing but whitespace.
    pub fn visible(&self) -> Option<&str> {
        if self.is_blank() {
            None
        } else {
            Some(&self.text)
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn active_agent(&self) -> Option<&str> {
        self.agent.as_ref().map(|(name, _)| name.as_str())
    }
}
