//! Turn correlation: parks the outstanding turn until its terminal event

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::{Error, Result};

#[derive(Default)]
struct TurnInner {
    response: String,
    pending: Option<oneshot::Sender<String>>,
    /// The next `response.created` belongs to the waiting turn
    bind_next: bool,
    /// Response id the waiting turn accumulates from
    current: Option<String>,
}

impl TurnInner {
    fn reset(&mut self) {
        self.response.clear();
        self.pending = None;
        self.bind_next = false;
        self.current = None;
    }
}

/// Accumulates response text and resolves the single outstanding turn
///
/// Only the response created after [`TurnTracker::requested`] feeds the
/// waiting turn; fragments of earlier, abandoned responses are dropped.
#[derive(Default)]
pub struct TurnTracker {
    inner: Mutex<TurnInner>,
}

impl TurnTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next turn; resolves on its response's terminal event
    ///
    /// # Errors
    ///
    /// Returns [`Error::TurnInFlight`] if a turn is already waiting
    pub fn begin(&self) -> Result<oneshot::Receiver<String>> {
        let mut inner = self.lock();
        if inner.pending.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(Error::TurnInFlight);
        }

        let (tx, rx) = oneshot::channel();
        inner.reset();
        inner.pending = Some(tx);
        Ok(rx)
    }

    /// A response was requested for the waiting turn
    pub fn requested(&self) {
        let mut inner = self.lock();
        if inner.pending.is_some() {
            inner.bind_next = true;
            inner.current = None;
        }
    }

    /// The service started a response
    pub fn created(&self, response_id: &str) {
        let mut inner = self.lock();
        if inner.bind_next {
            inner.bind_next = false;
            inner.current = Some(response_id.to_string());
        } else {
            tracing::debug!(response_id, "response not requested by a waiting turn");
        }
    }

    /// Append a response fragment
    pub fn push_delta(&self, response_id: &str, delta: &str) {
        let mut inner = self.lock();
        if inner.current.as_deref() == Some(response_id) {
            inner.response.push_str(delta);
        }
    }

    /// Terminal response event: hand the accumulated text to the waiter
    pub fn complete(&self, response_id: &str) {
        let (text, pending) = {
            let mut inner = self.lock();
            if inner.current.as_deref() != Some(response_id) {
                tracing::debug!(response_id, "stale response ignored");
                return;
            }
            inner.current = None;
            (std::mem::take(&mut inner.response), inner.pending.take())
        };

        match pending {
            Some(tx) => {
                let _ = tx.send(text);
            }
            None => tracing::debug!(chars = text.len(), "response completed with no waiting turn"),
        }
    }

    /// Drop the in-flight response and fail the waiting turn, if any
    pub fn cancel(&self) {
        self.lock().reset();
    }

    /// Take whatever response text has accumulated and release the waiter slot
    pub fn take_partial(&self) -> String {
        let mut inner = self.lock();
        let partial = std::mem::take(&mut inner.response);
        inner.reset();
        partial
    }

    /// Current accumulated response text
    #[must_use]
    pub fn partial(&self) -> String {
        self.lock().response.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TurnInner> {
        // A poisoned tracker only holds plain strings; keep using it
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Wait for the turn registered with [`TurnTracker::begin`], bounded by `timeout`
///
/// On timeout the partial response is returned if non-empty.
///
/// # Errors
///
/// Returns [`Error::TurnTimeout`] on timeout with no partial text, and
/// [`Error::TurnCancelled`] if the turn was cancelled or the session dropped
pub async fn await_turn(
    tracker: &TurnTracker,
    rx: oneshot::Receiver<String>,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(_)) => Err(Error::TurnCancelled),
        Err(_) => {
            let partial = tracker.take_partial();
            if partial.trim().is_empty() {
                tracing::warn!(?timeout, "turn timed out with no response");
                Err(Error::TurnTimeout(timeout))
            } else {
                tracing::warn!(?timeout, chars = partial.len(), "turn timed out, using partial response");
                Ok(partial)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    /// Begin a turn and bind it to `response_id`
    fn start(tracker: &TurnTracker, response_id: &str) -> oneshot::Receiver<String> {
        let rx = tracker.begin().unwrap();
        tracker.requested();
        tracker.created(response_id);
        rx
    }

    #[tokio::test]
    async fn resolves_with_accumulated_response() {
        let tracker = TurnTracker::new();
        let rx = start(&tracker, "resp_1");
        tracker.push_delta("resp_1", "Recursion ");
        tracker.push_delta("resp_1", "is...");
        tracker.complete("resp_1");

        let text = await_turn(&tracker, rx, TIMEOUT).await.unwrap();
        assert_eq!(text, "Recursion is...");
        assert!(tracker.partial().is_empty());
    }

    #[tokio::test]
    async fn second_begin_is_refused_while_waiting() {
        let tracker = TurnTracker::new();
        let _rx = tracker.begin().unwrap();
        assert!(matches!(tracker.begin(), Err(Error::TurnInFlight)));
    }

    #[tokio::test]
    async fn begin_is_allowed_after_waiter_dropped() {
        let tracker = TurnTracker::new();
        drop(tracker.begin().unwrap());
        assert!(tracker.begin().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_with_partial_text_resolves_with_it() {
        let tracker = TurnTracker::new();
        let rx = start(&tracker, "resp_1");
        tracker.push_delta("resp_1", "Recursion is when");

        let text = await_turn(&tracker, rx, TIMEOUT).await.unwrap();
        assert_eq!(text, "Recursion is when");
        // Waiter slot is released for the next turn
        assert!(tracker.begin().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_partial_text_fails() {
        let tracker = TurnTracker::new();
        let rx = start(&tracker, "resp_1");
        tracker.push_delta("resp_1", "   ");

        let err = await_turn(&tracker, rx, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::TurnTimeout(d) if d == TIMEOUT));
    }

    #[tokio::test]
    async fn cancel_fails_the_waiting_turn() {
        let tracker = TurnTracker::new();
        let rx = start(&tracker, "resp_1");
        tracker.push_delta("resp_1", "half an ans");
        tracker.cancel();

        let err = await_turn(&tracker, rx, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::TurnCancelled));
        assert!(tracker.partial().is_empty());
    }

    #[tokio::test]
    async fn completion_without_waiter_discards_text() {
        let tracker = TurnTracker::new();
        tracker.created("resp_1");
        tracker.push_delta("resp_1", "stray");
        tracker.complete("resp_1");
        assert!(tracker.partial().is_empty());
    }

    #[tokio::test]
    async fn cancelled_response_does_not_leak_into_next_turn() {
        let tracker = TurnTracker::new();
        let _first = start(&tracker, "resp_1");
        tracker.push_delta("resp_1", "Recursion is ");
        tracker.cancel();

        let rx = tracker.begin().unwrap();
        // The abandoned response keeps streaming before the new one starts
        tracker.push_delta("resp_1", "when a function calls itself.");
        tracker.complete("resp_1");

        tracker.requested();
        tracker.created("resp_2");
        tracker.push_delta("resp_2", "A loop repeats a block.");
        tracker.complete("resp_2");

        let text = await_turn(&tracker, rx, TIMEOUT).await.unwrap();
        assert_eq!(text, "A loop repeats a block.");
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_response_does_not_resolve_next_turn() {
        let tracker = TurnTracker::new();
        let rx = start(&tracker, "resp_1");
        assert!(await_turn(&tracker, rx, TIMEOUT).await.is_err());

        let rx = start(&tracker, "resp_2");
        tracker.push_delta("resp_1", "late");
        tracker.complete("resp_1");
        tracker.push_delta("resp_2", "fresh");
        tracker.complete("resp_2");

        assert_eq!(await_turn(&tracker, rx, TIMEOUT).await.unwrap(), "fresh");
    }
}
