//! A counter session: one run's subscription bound to one display target.
//!
//! The session stores the latest [`Snapshot`] pushed by the server and, on
//! every render frame, extrapolates the displayed count from it using the
//! server-estimated rate. The displayed value is always derived, never
//! copied from the stream, so the counter advances smoothly between pushes.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::display::{format_count, Display};
use crate::registry::Refresh;
use crate::snapshot::{Snapshot, SnapshotError};

struct SessionState {
    snapshot: Snapshot,
    last_update_ms: u64,
    displayed_value: i64,
}

pub struct CounterSession {
    run_id: String,
    display: Box<dyn Display>,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    /// Cancelled once the server reports the run inactive. Never reset.
    subscription: CancellationToken,
}

impl CounterSession {
    pub fn new(
        run_id: impl Into<String>,
        display: Box<dyn Display>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            run_id: run_id.into(),
            display,
            clock,
            state: Mutex::new(SessionState {
                snapshot: Snapshot::default(),
                last_update_ms: 0,
                displayed_value: 0,
            }),
            subscription: CancellationToken::new(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Handle one raw stream payload.
    ///
    /// A payload reporting `active = false` closes the subscription; anything
    /// delivered after that is dropped.
    pub fn on_message(&self, raw: &str) -> Result<(), SnapshotError> {
        if self.subscription.is_cancelled() {
            tracing::debug!(run_id = %self.run_id, "message after close ignored");
            return Ok(());
        }

        let snapshot = Snapshot::decode(raw)?;
        let now = self.clock.now_ms();
        {
            let mut state = self.state.lock();
            state.snapshot = snapshot;
            state.last_update_ms = now;
        }
        tracing::trace!(
            run_id = %self.run_id,
            base_count = snapshot.base_count,
            rate = snapshot.rate,
            active = snapshot.active,
            "snapshot received"
        );

        if !snapshot.active {
            tracing::info!(run_id = %self.run_id, "run finished, closing stream");
            self.subscription.cancel();
        }
        Ok(())
    }

    /// Recompute and render the displayed count for `now_ms`.
    ///
    /// Returns whether the session should keep being driven.
    pub fn refresh(&self, now_ms: u64) -> bool {
        let (value, active) = {
            let mut state = self.state.lock();
            let elapsed = now_ms as i64 - state.last_update_ms as i64;
            state.displayed_value = round_half_up(state.snapshot.extrapolate(elapsed));
            (state.displayed_value, state.snapshot.active)
        };
        self.display.set_text(&format_count(value));
        active
    }

    pub fn displayed_value(&self) -> i64 {
        self.state.lock().displayed_value
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().snapshot
    }

    pub fn last_update_ms(&self) -> u64 {
        self.state.lock().last_update_ms
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().snapshot.active
    }

    /// Whether the stream subscription has been closed.
    pub fn is_closed(&self) -> bool {
        self.subscription.is_cancelled()
    }

    /// Resolves once the subscription is closed.
    pub async fn closed(&self) {
        self.subscription.cancelled().await
    }

    /// A token for a stream task that fires when the subscription closes.
    ///
    /// Cancelling the returned child does not close the session.
    pub fn subscription_token(&self) -> CancellationToken {
        self.subscription.child_token()
    }
}

impl Refresh for CounterSession {
    fn refresh(&self, now_ms: u64) -> bool {
        CounterSession::refresh(self, now_ms)
    }
}

/// Round with halves going toward positive infinity, like `Math.round`.
///
/// Compares the fraction against 0.5 instead of adding 0.5, so
/// 0.49999999999999994 and odd integers above 2^52 stay put.
fn round_half_up(value: f64) -> i64 {
    let floor = value.floor();
    let rounded = if value - floor >= 0.5 { floor + 1.0 } else { floor };
    rounded as i64
}
