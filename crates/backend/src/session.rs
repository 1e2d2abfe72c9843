//! Bounded conversation state for one (worker, target) pairing.
//!
//! The session pins the system instruction, keeps a fixed-size ring of
//! recent exchange turns, and decides when to inject a compliance
//! reminder to correct output-format drift. It lives for the worker's
//! run and is rebuilt from scratch on the next run.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::transport::ChatMessage;

/// Reinforcement message reinjected into history when the backend
/// drifts from the requested output format.
const COMPLIANCE_REMINDER: &str = "Reminder: respond with only the JSON array described in the \
     instructions. No prose, no markdown fences, no commentary.";

/// Tunables for session history and reminder cadence.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum retained exchange turns (messages, not request pairs).
    /// The pinned system instruction does not count against the cap.
    pub max_turns: usize,
    /// Inject a reminder automatically after every N successful items.
    /// Zero disables the automatic cadence; retry-triggered reminders
    /// still fire.
    pub reminder_interval: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            reminder_interval: 0,
        }
    }
}

/// Conversation history plus request/compliance counters.
pub struct Session {
    id: Uuid,
    target: String,
    system: ChatMessage,
    history: VecDeque<ChatMessage>,
    config: SessionConfig,
    request_count: u64,
    reminder_count: u64,
    items_since_reminder: usize,
}

impl Session {
    /// Seed a fresh session with the system instruction.
    pub fn start(target: &str, instruction: &str, config: SessionConfig) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            target: target.to_string(),
            system: ChatMessage::system(instruction),
            history: VecDeque::new(),
            config,
            request_count: 0,
            reminder_count: 0,
            items_since_reminder: 0,
        };
        tracing::debug!(
            session_id = %session.id,
            target = %session.target,
            max_turns = session.config.max_turns,
            "Session started"
        );
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn reminder_count(&self) -> u64 {
        self.reminder_count
    }

    /// Messages for the next request: pinned system instruction, the
    /// retained history, then the new user message.
    pub fn compose(&mut self, user: &ChatMessage) -> Vec<ChatMessage> {
        self.request_count += 1;
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(self.system.clone());
        messages.extend(self.history.iter().cloned());
        messages.push(user.clone());
        messages
    }

    /// Append a successful exchange to history. Called only when at
    /// least one record was recovered, so a garbage reply never
    /// poisons the conversation.
    pub fn record_exchange(&mut self, user: ChatMessage, assistant: ChatMessage) {
        self.push(user);
        self.push(assistant);
    }

    /// Count successfully processed items and inject the automatic
    /// reminder when the configured interval is reached. Returns true
    /// when a reminder was issued.
    pub fn note_successes(&mut self, items: usize) -> bool {
        if self.config.reminder_interval == 0 {
            return false;
        }
        self.items_since_reminder += items;
        if self.items_since_reminder >= self.config.reminder_interval {
            self.inject_reminder("interval");
            true
        } else {
            false
        }
    }

    /// Inject a reminder immediately because a retry was scheduled.
    /// Always fires; retries are the strongest drift signal.
    pub fn note_retry(&mut self) -> bool {
        self.inject_reminder("retry");
        true
    }

    fn inject_reminder(&mut self, cause: &str) {
        self.push(ChatMessage::user(COMPLIANCE_REMINDER));
        self.reminder_count += 1;
        self.items_since_reminder = 0;
        tracing::debug!(
            session_id = %self.id,
            target = %self.target,
            cause,
            total = self.reminder_count,
            "Compliance reminder injected"
        );
    }

    /// Ring-buffer push: oldest turns fall off once the cap is hit.
    fn push(&mut self, message: ChatMessage) {
        self.history.push_back(message);
        while self.history.len() > self.config.max_turns {
            self.history.pop_front();
        }
    }

    /// Log terminal session stats. The worker loop guarantees this
    /// runs on every exit path.
    pub fn close(&self) {
        tracing::info!(
            session_id = %self.id,
            target = %self.target,
            requests = self.request_count,
            reminders = self.reminder_count,
            "Session closed"
        );
    }

    #[cfg(test)]
    fn history_contents(&self) -> Vec<&str> {
        self.history.iter().map(|m| m.content.as_str()).collect()
    }
}
