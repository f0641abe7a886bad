use log::{info, warn};

use crate::config::Config;
use crate::error::{OverlayError, Result};
use crate::runtime::Clock;
use crate::session::{
    clamp_incline, clamp_speed, ControlPatch, RunStatus, SessionPatch, SessionPlan, SessionState,
};
use crate::store::{ensure_initialized, SessionStore, SnapshotSource};

fn round1(n: f64) -> f64 {
    (n * 10.0).round() / 10.0
}

fn finite(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(OverlayError::InvalidInput { field, value })
    }
}

/// Operator-side command surface.
///
/// Every command is one partial write to the store. Run ids are derived from
/// the last record this instance observed, never from a private counter, so
/// a controller that has seen another's start continues the sequence.
pub struct SessionController<S: SessionStore, C: Clock> {
    store: S,
    clock: C,
    last_known: Option<SessionState>,
    subscription: Option<Box<dyn SnapshotSource>>,
    speed_step_mph: f64,
    incline_step_pct: f64,
}

impl<S: SessionStore, C: Clock> SessionController<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        let cfg = Config::default();
        Self {
            store,
            clock,
            last_known: None,
            subscription: None,
            speed_step_mph: cfg.speed_step_mph,
            incline_step_pct: cfg.incline_step_pct,
        }
    }

    pub fn with_config(store: S, clock: C, cfg: &Config) -> Self {
        Self {
            speed_step_mph: cfg.speed_step_mph,
            incline_step_pct: cfg.incline_step_pct,
            ..Self::new(store, clock)
        }
    }

    /// Initialize the record if needed and start listening for changes.
    pub fn attach(&mut self) -> Result<&SessionState> {
        let state = ensure_initialized(&self.store, self.clock.now_epoch_ms())?;
        self.subscription = Some(self.store.subscribe()?);
        Ok(self.observe(state))
    }

    /// Read the record once, without subscribing.
    pub fn refresh(&mut self) -> Result<&SessionState> {
        let state = ensure_initialized(&self.store, self.clock.now_epoch_ms())?;
        Ok(self.observe(state))
    }

    /// Drain pending broadcasts. Returns how many records were observed.
    pub fn sync(&mut self) -> Result<usize> {
        let mut seen = 0;
        if let Some(sub) = self.subscription.as_mut() {
            while let Some(state) = sub.try_next()? {
                self.last_known = Some(state);
                seen += 1;
            }
        }
        Ok(seen)
    }

    pub fn observe(&mut self, state: SessionState) -> &SessionState {
        self.last_known.insert(state)
    }

    pub fn last_known(&self) -> Option<&SessionState> {
        self.last_known.as_ref()
    }

    pub fn last_known_run_id(&self) -> u64 {
        self.last_known.as_ref().map_or(0, |s| s.run_id)
    }

    fn status(&self) -> RunStatus {
        self.last_known
            .as_ref()
            .map_or(RunStatus::Ready, |s| s.status)
    }

    fn write(&mut self, command: &'static str, patch: ControlPatch) -> Result<&SessionState> {
        match self.store.update(&SessionPatch::Control(patch)) {
            Ok(next) => {
                info!(
                    "{command}: run {} now {} (updated at {})",
                    next.run_id, next.status, next.updated_at_epoch_ms
                );
                Ok(self.observe(next))
            }
            Err(e) => {
                warn!("{command} failed: {e}");
                Err(e.into())
            }
        }
    }

    pub fn apply_plan(&mut self, distance_miles: f64, duration_minutes: f64) -> Result<SessionPlan> {
        if self.status() == RunStatus::Running {
            return Err(OverlayError::PlanLocked);
        }
        let plan = SessionPlan::clamped(distance_miles, duration_minutes)?;
        let now = self.clock.now_epoch_ms();
        self.write("apply", ControlPatch::plan(plan, now))?;
        Ok(plan)
    }

    /// Start a new run and return its id.
    pub fn start_run(&mut self) -> Result<u64> {
        let next_run_id = self.last_known_run_id() + 1;
        let now = self.clock.now_epoch_ms();
        self.write("start", ControlPatch::start(next_run_id, now))?;
        Ok(next_run_id)
    }

    pub fn pause_run(&mut self) -> Result<()> {
        self.require("pause", &[RunStatus::Running])?;
        let now = self.clock.now_epoch_ms();
        self.write("pause", ControlPatch::status(RunStatus::Paused, now))?;
        Ok(())
    }

    pub fn resume_run(&mut self) -> Result<()> {
        self.require("resume", &[RunStatus::Paused])?;
        let now = self.clock.now_epoch_ms();
        self.write("resume", ControlPatch::status(RunStatus::Running, now))?;
        Ok(())
    }

    pub fn finish_run(&mut self) -> Result<()> {
        self.require("finish", &[RunStatus::Running, RunStatus::Paused])?;
        let now = self.clock.now_epoch_ms();
        self.write("finish", ControlPatch::status(RunStatus::Complete, now))?;
        Ok(())
    }

    pub fn reset_run(&mut self) -> Result<()> {
        let now = self.clock.now_epoch_ms();
        self.write("reset", ControlPatch::reset(now))?;
        Ok(())
    }

    pub fn set_speed(&mut self, mph: f64) -> Result<f64> {
        let mph = clamp_speed(round1(finite("speed", mph)?));
        let now = self.clock.now_epoch_ms();
        self.write("speed", ControlPatch::speed(mph, now))?;
        Ok(mph)
    }

    pub fn adjust_speed(&mut self, delta_mph: f64) -> Result<f64> {
        let current = self.last_known.as_ref().map_or(0.0, |s| s.speed_mph);
        self.set_speed(current + finite("speed", delta_mph)?)
    }

    pub fn set_incline(&mut self, pct: f64) -> Result<f64> {
        let pct = clamp_incline(round1(finite("incline", pct)?));
        let now = self.clock.now_epoch_ms();
        self.write("incline", ControlPatch::incline(pct, now))?;
        Ok(pct)
    }

    pub fn adjust_incline(&mut self, delta_pct: f64) -> Result<f64> {
        let current = self.last_known.as_ref().map_or(0.0, |s| s.incline_pct);
        self.set_incline(current + finite("incline", delta_pct)?)
    }

    /// One configured speed step up (`steps > 0`) or down
    pub fn step_speed(&mut self, steps: i32) -> Result<f64> {
        self.adjust_speed(self.speed_step_mph * steps as f64)
    }

    pub fn step_incline(&mut self, steps: i32) -> Result<f64> {
        self.adjust_incline(self.incline_step_pct * steps as f64)
    }

    fn require(&self, command: &'static str, allowed: &[RunStatus]) -> Result<()> {
        let status = self.status();
        if allowed.contains(&status) {
            Ok(())
        } else {
            Err(OverlayError::InvalidTransition { command, status })
        }
    }
}
