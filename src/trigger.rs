//! Message-count triggers
//!
//! A [`MessageCounter`] turns a growing message stream into periodic fire
//! events: one fire for every `period` new messages.

use crate::{RagMemoryError, Result};
use tracing::debug;

/// Per-counter state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerState {
    /// Messages observed since the last boundary
    pub count: usize,
    /// Whether the first boundary has been crossed
    pub fired: bool,
}

type FireCallback = Box<dyn FnMut() + Send>;

/// Fires a callback every `period` new messages.
///
/// With `first_callback == false` the first boundary is swallowed, so the
/// first fire happens at message `2 * period`.
pub struct MessageCounter {
    period: usize,
    first_callback: bool,
    state: TriggerState,
    callback: Option<FireCallback>,
}

impl std::fmt::Debug for MessageCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCounter")
            .field("period", &self.period)
            .field("first_callback", &self.first_callback)
            .field("state", &self.state)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl MessageCounter {
    pub fn new(period: usize, first_callback: bool) -> Result<Self> {
        if period == 0 {
            return Err(RagMemoryError::InvalidConfig(
                "trigger period must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            period,
            first_callback,
            state: TriggerState::default(),
            callback: None,
        })
    }

    /// Register the function invoked on every fire
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// Observe `delta` new messages. Returns how many times the counter fired.
    pub fn on_new_messages(&mut self, delta: usize) -> usize {
        let mut fires = 0;
        let mut remaining = delta;

        while remaining > 0 {
            let step = remaining.min(self.period - self.state.count);
            self.state.count += step;
            remaining -= step;

            if self.state.count < self.period {
                break;
            }

            self.state.count = 0;
            if !self.state.fired && !self.first_callback {
                self.state.fired = true;
                debug!("Suppressed first boundary (period {})", self.period);
                continue;
            }
            self.state.fired = true;
            fires += 1;
            if let Some(callback) = self.callback.as_mut() {
                callback();
            }
        }

        fires
    }
}
