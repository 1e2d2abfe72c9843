//! Batched request composition and reply routing for one target.
//!
//! A [`Connector`] owns the transport and [`Session`] for a single
//! backend target. It embeds all batch item texts in one request,
//! funnels the reply through the repair parser, and maps the recovered
//! records back to items positionally.

use drover_core::parse::{extract_records, RawRecord};

use crate::session::{Session, SessionConfig};
use crate::transport::{BackendError, ChatMessage, ChatTransport};

/// Failure classes returned from [`Connector::send_batch`]. The worker
/// branches on these: load failures shrink the batch, parse failures
/// trigger compliance reminders.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Connect/timeout class failure. Retryable; shrinks batch size.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Non-2xx response. Retryable; shrinks batch size.
    #[error("backend returned HTTP {status}")]
    Http { status: u16 },

    /// The reply arrived but no records could be recovered from it.
    /// Retryable; content-quality issue, does not shrink the batch.
    #[error("no records recovered from reply")]
    Parse,
}

/// Batch gateway to one chat-completion target.
pub struct Connector<T: ChatTransport> {
    target: String,
    transport: T,
    session: Session,
}

impl<T: ChatTransport> Connector<T> {
    /// Create the connector and seed its session with the system
    /// instruction.
    pub fn start(target: &str, transport: T, instruction: &str, config: SessionConfig) -> Self {
        Self {
            target: target.to_string(),
            transport,
            session: Session::start(target, instruction, config),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Send one batch of item texts and return per-item raw records.
    ///
    /// The reply's records map positionally onto the batch. Extra
    /// records beyond the batch length are truncated with a warning; a
    /// shortfall leaves trailing `None`s for the caller's retry
    /// policy. History is only extended when at least one record was
    /// recovered, so total failures never poison the session.
    pub async fn send_batch(&mut self, items: &[&str]) -> Result<Vec<Option<RawRecord>>, SendError> {
        let user = ChatMessage::user(compose_batch_text(items));
        let messages = self.session.compose(&user);

        let reply = match self.transport.complete(&self.target, &messages).await {
            Ok(reply) => reply,
            Err(BackendError::Transport(msg)) => return Err(SendError::Transport(msg)),
            Err(BackendError::Http { status, body }) => {
                tracing::debug!(target = %self.target, status, body = %body, "HTTP error body");
                return Err(SendError::Http { status });
            }
            Err(BackendError::EmptyReply) => return Err(SendError::Parse),
        };

        let records = extract_records(&reply).map_err(|_| SendError::Parse)?;

        self.session
            .record_exchange(user, ChatMessage::assistant(reply));

        if records.len() > items.len() {
            tracing::warn!(
                target = %self.target,
                requested = items.len(),
                received = records.len(),
                "Backend returned more records than requested; truncating extras"
            );
        }

        let mut slots: Vec<Option<RawRecord>> = Vec::with_capacity(items.len());
        let mut records = records.into_iter();
        for _ in 0..items.len() {
            slots.push(records.next());
        }
        Ok(slots)
    }

    /// Forwarded to the session; see [`Session::note_successes`].
    /// Returns true when a reminder was issued.
    pub fn note_successes(&mut self, items: usize) -> bool {
        self.session.note_successes(items)
    }

    /// Forwarded to the session; see [`Session::note_retry`]. Returns
    /// true (a retry reminder always fires).
    pub fn note_retry(&mut self) -> bool {
        self.session.note_retry()
    }

    pub fn reminder_count(&self) -> u64 {
        self.session.reminder_count()
    }

    /// Close the underlying session, logging terminal stats.
    pub fn close(&self) {
        self.session.close();
    }
}

/// Flatten item text into a single line: backends fed embedded
/// newlines inside numbered lists tend to miscount items.
fn flatten_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Number the batch items into one user message.
fn compose_batch_text(items: &[&str]) -> String {
    let mut lines = Vec::with_capacity(items.len() + 1);
    lines.push(format!(
        "Process the following {} item(s). Reply with a JSON array containing exactly one object per item, in order.",
        items.len()
    ));
    for (idx, item) in items.iter().enumerate() {
        lines.push(format!("{}. {}", idx + 1, flatten_whitespace(item)));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted transport: pops one canned result per call.
    struct ScriptedTransport {
        replies: Mutex<Vec<Result<String, BackendError>>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<String, BackendError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn complete(
            &self,
            _target: &str,
            _messages: &[ChatMessage],
        ) -> Result<String, BackendError> {
            self.replies
                .lock()
                .expect("scripted transport mutex")
                .remove(0)
        }
    }

    fn connector(replies: Vec<Result<String, BackendError>>) -> Connector<ScriptedTransport> {
        Connector::start(
            "test-model",
            ScriptedTransport::new(replies),
            "Return only JSON.",
            SessionConfig::default(),
        )
    }

    #[test]
    fn batch_text_numbers_and_flattens_items() {
        let text = compose_batch_text(&["first\nitem", "second   item"]);
        assert!(text.contains("1. first item"));
        assert!(text.contains("2. second item"));
        assert!(text.starts_with("Process the following 2 item(s)."));
    }

    #[tokio::test]
    async fn records_map_positionally() {
        let mut c = connector(vec![Ok(r#"[{"a":1},{"a":2}]"#.to_string())]);
        let slots = c.send_batch(&["one", "two"]).await.unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].as_ref().unwrap()["a"], 1);
        assert_eq!(slots[1].as_ref().unwrap()["a"], 2);
    }

    #[tokio::test]
    async fn shortfall_leaves_trailing_none() {
        let mut c = connector(vec![Ok(r#"[{"a":1}]"#.to_string())]);
        let slots = c.send_batch(&["one", "two"]).await.unwrap();
        assert!(slots[0].is_some());
        assert!(slots[1].is_none());
    }

    #[tokio::test]
    async fn extras_are_truncated() {
        let mut c = connector(vec![Ok(r#"[{"a":1},{"a":2},{"a":3}]"#.to_string())]);
        let slots = c.send_batch(&["only"]).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].as_ref().unwrap()["a"], 1);
    }

    #[tokio::test]
    async fn error_classification_is_preserved() {
        let mut c = connector(vec![
            Err(BackendError::Transport("connection refused".to_string())),
            Err(BackendError::Http {
                status: 503,
                body: "busy".to_string(),
            }),
            Ok("not json at all".to_string()),
        ]);
        assert_matches!(c.send_batch(&["x"]).await, Err(SendError::Transport(_)));
        assert_matches!(
            c.send_batch(&["x"]).await,
            Err(SendError::Http { status: 503 })
        );
        assert_matches!(c.send_batch(&["x"]).await, Err(SendError::Parse));
    }

    #[tokio::test]
    async fn parse_failure_leaves_history_untouched() {
        let mut c = connector(vec![
            Ok("garbage with no records".to_string()),
            Ok(r#"[{"a":1}]"#.to_string()),
        ]);
        assert_matches!(c.send_batch(&["x"]).await, Err(SendError::Parse));

        // The next request must not carry the poisoned exchange: only
        // system + the new user message.
        let _ = c.send_batch(&["y"]).await.unwrap();
        let messages = c.session.compose(&ChatMessage::user("probe"));
        // system, good user turn, good assistant turn, probe
        assert_eq!(messages.len(), 4);
        assert!(!messages.iter().any(|m| m.content.contains("garbage")));
    }
}
