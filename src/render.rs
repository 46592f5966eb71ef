//! The render loop: one repeating task that drives every registered session.
//!
//! Each frame reads the clock once and hands that time to every callback in
//! the [`Registry`], pruning the ones that report they are finished. The loop
//! does not stop when the registry empties; it keeps ticking until its
//! cancellation token fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::registry::Registry;

/// About sixty frames per second.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Clone)]
pub struct RenderLoop {
    registry: Registry,
    clock: Arc<dyn Clock>,
    frame_interval: Duration,
    frames: Arc<AtomicU64>,
}

impl RenderLoop {
    pub fn new(registry: Registry, clock: Arc<dyn Clock>, frame_interval: Duration) -> Self {
        Self {
            registry,
            clock,
            frame_interval,
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Render one frame. Returns the number of sessions pruned.
    pub fn frame(&self) -> usize {
        let now = self.clock.now_ms();
        let pruned = self.registry.drive(now);
        self.frames.fetch_add(1, Ordering::AcqRel);
        if pruned > 0 {
            tracing::debug!(pruned, remaining = self.registry.len(), "pruned finished sessions");
        }
        pruned
    }

    /// Render frames until `cancel` fires. Returns the number of frames rendered.
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let start = self.frames();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.frame();
                }
            }
        }

        let rendered = self.frames() - start;
        tracing::debug!(frames = rendered, "render loop stopped");
        rendered
    }

    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<u64> {
        tokio::spawn(self.run(cancel))
    }
}
