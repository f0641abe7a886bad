//! Display-side instance: follows the shared record and animates totals.
//!
//! An [`Overlay`] owns one [`TelemetryIntegrator`] and one [`FrameLoop`].
//! Broadcast records are drained in [`Overlay::pump`]; frames are advanced in
//! [`Overlay::frame`]. Checkpoints produced along the way are written back to
//! the store as checkpoint-only patches, so they never touch control fields.

use std::time::Duration;

use log::{info, warn};

use crate::error::{Result, StoreError};
use crate::integrator::{FrameOutcome, IntegratorSettings, TelemetryIntegrator, Transition};
use crate::display::OverlayView;
use crate::runtime::{Clock, FrameLoop};
use crate::session::{CheckpointPatch, SessionState};
use crate::store::{ensure_initialized, SessionStore, SnapshotSource};

pub struct Overlay<S: SessionStore, C: Clock> {
    store: S,
    clock: C,
    integrator: TelemetryIntegrator,
    frames: FrameLoop,
    subscription: Option<Box<dyn SnapshotSource>>,
    link_error: Option<String>,
    write_error: Option<String>,
}

impl<S: SessionStore, C: Clock> Overlay<S, C> {
    pub fn new(store: S, clock: C, settings: IntegratorSettings) -> Self {
        Self {
            store,
            clock,
            integrator: TelemetryIntegrator::new(settings),
            frames: FrameLoop::new(),
            subscription: None,
            link_error: None,
            write_error: None,
        }
    }

    /// Pace frames at `interval` instead of the default.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frames = FrameLoop::with_interval(interval);
        self
    }

    /// Initialize the record if missing, subscribe, and apply the current record.
    pub fn attach(&mut self) -> Result<()> {
        ensure_initialized(&self.store, self.clock.now_epoch_ms())?;
        self.subscription = Some(self.store.subscribe()?);
        self.link_error = None;
        self.pump();
        Ok(())
    }

    pub fn detach(&mut self) {
        if self.subscription.take().is_some() {
            info!("overlay detached");
        }
        self.frames.stop();
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// Apply every pending broadcast. Returns how many were applied.
    ///
    /// A broken subscription stops frames and leaves the totals frozen.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let next = match self.subscription.as_mut() {
                Some(sub) => sub.try_next(),
                None => return applied,
            };
            match next {
                Ok(Some(state)) => {
                    self.apply_snapshot(&state);
                    applied += 1;
                }
                Ok(None) => return applied,
                Err(e) => {
                    self.lose_link(e);
                    return applied;
                }
            }
        }
    }

    fn apply_snapshot(&mut self, state: &SessionState) {
        let now = self.clock.now_epoch_ms();
        let transition = self.integrator.on_snapshot(state, now);

        if self.integrator.is_running() {
            self.frames.start();
        } else {
            self.frames.stop();
        }

        if matches!(transition, Transition::Paused | Transition::Finished) {
            if let Some(patch) = self.integrator.flush_checkpoint(now) {
                self.write_checkpoint(patch);
            }
        }
    }

    fn lose_link(&mut self, e: StoreError) {
        warn!("session subscription lost: {e}");
        self.link_error = Some(format!("connection lost: {e}"));
        self.subscription = None;
        self.frames.stop();
    }

    fn write_checkpoint(&mut self, patch: CheckpointPatch) {
        match self.store.update(&patch.into()) {
            Ok(_) => self.write_error = None,
            Err(e) => {
                warn!("checkpoint not saved: {e}");
                self.write_error = Some(format!("checkpoint not saved: {e}"));
            }
        }
    }

    /// Advance one frame at the current clock time if the loop is live.
    pub fn frame(&mut self) -> FrameOutcome {
        let Some(now) = self.frames.frame(self.clock.now_epoch_ms()) else {
            return FrameOutcome::default();
        };
        let outcome = self.integrator.on_frame(now);
        if let Some(patch) = outcome.checkpoint {
            self.write_checkpoint(patch);
        }
        outcome
    }

    /// Drain broadcasts then advance one frame.
    pub fn step(&mut self) -> FrameOutcome {
        self.pump();
        self.frame()
    }

    pub fn view(&self) -> OverlayView {
        OverlayView::from_integrator(&self.integrator, self.clock.now_epoch_ms(), self.message())
    }

    pub fn message(&self) -> Option<String> {
        self.link_error.clone().or_else(|| self.write_error.clone())
    }

    pub fn integrator(&self) -> &TelemetryIntegrator {
        &self.integrator
    }

    pub fn frames(&self) -> &FrameLoop {
        &self.frames
    }
}
