//! Adaptive batch sizing (additive-increase, multiplicative-decrease).
//!
//! Each worker owns one batcher and reports a signal after every
//! batch. Load-class failures (connect, timeout, HTTP error) halve the
//! size; sustained clean batches grow it back one step at a time.
//! Content-quality failures say nothing about backend load, so they
//! only interrupt the growth streak.

/// What happened to the last batch, as far as sizing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSignal {
    /// Every item succeeded on this attempt.
    Clean,
    /// At least one item was re-queued for a content reason (parse
    /// shortfall, schema rejection, batch-level parse failure).
    Retried,
    /// The whole request failed under load (transport or HTTP error).
    Overload,
}

/// Per-worker batch size controller.
#[derive(Debug)]
pub struct AdaptiveBatcher {
    size: usize,
    max: usize,
    clean_streak: u32,
}

impl AdaptiveBatcher {
    /// Start at the configured maximum; the backend earns its way back
    /// up after any shrink.
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            size: max,
            max,
            clean_streak: 0,
        }
    }

    /// Current batch size, always in `1..=max`.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn record(&mut self, signal: BatchSignal) {
        let before = self.size;
        match signal {
            BatchSignal::Clean => {
                self.clean_streak += 1;
                if self.clean_streak >= 2 && self.size < self.max {
                    self.size += 1;
                    self.clean_streak = 0;
                }
            }
            BatchSignal::Retried => {
                self.clean_streak = 0;
            }
            BatchSignal::Overload => {
                self.size = (self.size / 2).max(1);
                self.clean_streak = 0;
            }
        }
        if self.size != before {
            tracing::debug!(from = before, to = self.size, ?signal, "Batch size adjusted");
        }
    }
}
