//! Per-overlay run state machine and time integrator.
//!
//! The integrator never reads a clock itself: snapshots and frames arrive
//! with the caller's `now`, so a headless test can replay an exact input
//! stream and get the same totals back.

use log::{debug, info};

use crate::calories::CalorieModel;
use crate::config::{Config, ProgressBasis};
use crate::session::{Checkpoint, CheckpointPatch, RunStatus, SessionPlan, SessionState};

const MS_PER_HOUR: f64 = 3_600_000.0;
const MS_PER_MINUTE: f64 = 60_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum IntegratorMode {
    /// not rendering motion
    Idle,
    /// local clock advancing
    Running,
    /// clock frozen, totals retained
    Paused,
}

/// Accumulated run totals
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Totals {
    pub elapsed_ms: u64,
    pub distance_miles: f64,
    pub calories: f64,
}

impl Totals {
    pub fn is_zero(&self) -> bool {
        *self == Totals::default()
    }
}

impl From<Checkpoint> for Totals {
    fn from(cp: Checkpoint) -> Self {
        Self {
            elapsed_ms: cp.elapsed_ms,
            distance_miles: cp.distance_miles,
            calories: cp.calories,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorSettings {
    pub max_frame_dt_ms: u64,
    pub checkpoint_interval_ms: u64,
    pub progress_basis: ProgressBasis,
    pub calories: CalorieModel,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        IntegratorSettings::from(&Config::default())
    }
}

impl From<&Config> for IntegratorSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            max_frame_dt_ms: cfg.max_frame_dt_ms,
            checkpoint_interval_ms: cfg.checkpoint_interval_ms,
            progress_basis: cfg.progress_basis,
            calories: cfg.calories,
        }
    }
}

/// What a snapshot did to the local run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Mode untouched; instantaneous inputs and plan refreshed
    Unchanged,
    /// Record went back to `ready`; totals zeroed
    Reset,
    /// New run picked up; `resumed` when totals were seeded from a checkpoint
    Started { run_id: u64, resumed: bool },
    /// Same run continues after a pause
    Resumed,
    /// Running run frozen
    Paused,
    /// Running or paused run reached `complete`
    Finished,
    /// First sight of a run that is already paused or complete
    Adopted { run_id: u64 },
}

/// Result of advancing one frame
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FrameOutcome {
    /// Milliseconds actually integrated (after clamping)
    pub dt_ms: u64,
    /// Totals due to be written back to the store
    pub checkpoint: Option<CheckpointPatch>,
    /// Set on the single frame where the goal was first reached
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct TelemetryIntegrator {
    settings: IntegratorSettings,
    mode: IntegratorMode,
    status: RunStatus,
    run_id: Option<u64>,
    origin_epoch_ms: i64,
    last_frame_epoch_ms: Option<i64>,
    last_checkpoint_epoch_ms: i64,
    paused_at_epoch_ms: Option<i64>,
    totals: Totals,
    speed_mph: f64,
    incline_pct: f64,
    plan: SessionPlan,
    completed: bool,
}

impl Default for TelemetryIntegrator {
    fn default() -> Self {
        Self::new(IntegratorSettings::default())
    }
}

impl TelemetryIntegrator {
    pub fn new(settings: IntegratorSettings) -> Self {
        Self {
            settings,
            mode: IntegratorMode::Idle,
            status: RunStatus::Ready,
            run_id: None,
            origin_epoch_ms: 0,
            last_frame_epoch_ms: None,
            last_checkpoint_epoch_ms: 0,
            paused_at_epoch_ms: None,
            totals: Totals::default(),
            speed_mph: 0.0,
            incline_pct: 0.0,
            plan: SessionPlan::default(),
            completed: false,
        }
    }

    /// Reconcile local state against a broadcast record received at `now`.
    pub fn on_snapshot(&mut self, snapshot: &SessionState, now: i64) -> Transition {
        self.plan = snapshot.plan();
        self.speed_mph = snapshot.speed_mph;
        self.incline_pct = snapshot.incline_pct;
        self.status = snapshot.status;

        let same_run = self.run_id == Some(snapshot.run_id);

        let transition = match snapshot.status {
            RunStatus::Ready => {
                let already_reset = self.mode == IntegratorMode::Idle
                    && self.totals.is_zero()
                    && !self.completed
                    && same_run;
                self.reset(snapshot.run_id);
                if already_reset {
                    Transition::Unchanged
                } else {
                    Transition::Reset
                }
            }
            RunStatus::Running => {
                if !same_run || self.mode == IntegratorMode::Idle {
                    let resumed = self.begin_run(snapshot, now);
                    Transition::Started {
                        run_id: snapshot.run_id,
                        resumed,
                    }
                } else if self.mode == IntegratorMode::Paused {
                    self.paused_at_epoch_ms = None;
                    self.last_frame_epoch_ms = Some(now);
                    self.mode = IntegratorMode::Running;
                    Transition::Resumed
                } else {
                    Transition::Unchanged
                }
            }
            RunStatus::Paused => match self.mode {
                IntegratorMode::Running if same_run => {
                    self.paused_at_epoch_ms = Some(now);
                    self.mode = IntegratorMode::Paused;
                    Transition::Paused
                }
                IntegratorMode::Paused if same_run => Transition::Unchanged,
                _ => {
                    self.adopt(snapshot, IntegratorMode::Paused, now);
                    Transition::Adopted {
                        run_id: snapshot.run_id,
                    }
                }
            },
            RunStatus::Complete => match self.mode {
                IntegratorMode::Running | IntegratorMode::Paused if same_run => {
                    self.mode = IntegratorMode::Idle;
                    self.paused_at_epoch_ms = None;
                    self.completed = true;
                    Transition::Finished
                }
                IntegratorMode::Idle if same_run && self.completed => Transition::Unchanged,
                _ => {
                    self.adopt(snapshot, IntegratorMode::Idle, now);
                    self.completed = true;
                    Transition::Adopted {
                        run_id: snapshot.run_id,
                    }
                }
            },
        };

        match transition {
            Transition::Unchanged => debug!(
                "snapshot run {} {}: inputs {:.1} mph / {:.1}%",
                snapshot.run_id, snapshot.status, self.speed_mph, self.incline_pct
            ),
            t => info!(
                "snapshot run {} {} -> {:?} (mode {})",
                snapshot.run_id, snapshot.status, t, self.mode
            ),
        }

        transition
    }

    /// Advance the local clock to `now`. Only integrates while running.
    pub fn on_frame(&mut self, now: i64) -> FrameOutcome {
        if self.mode != IntegratorMode::Running {
            return FrameOutcome::default();
        }

        let Some(last) = self.last_frame_epoch_ms else {
            self.last_frame_epoch_ms = Some(now);
            return FrameOutcome::default();
        };

        let raw_dt = now - last;
        if raw_dt <= 0 {
            return FrameOutcome::default();
        }
        let dt_ms = (raw_dt as u64).min(self.settings.max_frame_dt_ms);
        if dt_ms < raw_dt as u64 {
            debug!("frame gap of {}ms clamped to {}ms", raw_dt, dt_ms);
        }
        self.last_frame_epoch_ms = Some(now);
        self.advance(dt_ms);

        let completed = !self.completed && self.goal_reached();
        if completed {
            self.completed = true;
            info!(
                "goal reached: {:.2} mi in {}ms",
                self.totals.distance_miles, self.totals.elapsed_ms
            );
        }

        let checkpoint = if now - self.last_checkpoint_epoch_ms
            >= self.settings.checkpoint_interval_ms as i64
        {
            self.last_checkpoint_epoch_ms = now;
            self.run_id.map(|run_id| self.checkpoint_at(run_id, now))
        } else {
            None
        };

        FrameOutcome {
            dt_ms,
            checkpoint,
            completed,
        }
    }

    /// Checkpoint of the current totals, outside the regular cadence.
    ///
    /// Used when a run freezes so a reload during the pause resumes exactly.
    pub fn flush_checkpoint(&mut self, now: i64) -> Option<CheckpointPatch> {
        let run_id = self.run_id?;
        if self.totals.is_zero() {
            return None;
        }
        self.last_checkpoint_epoch_ms = now;
        Some(self.checkpoint_at(run_id, now))
    }

    fn checkpoint_at(&self, run_id: u64, now: i64) -> CheckpointPatch {
        CheckpointPatch {
            run_id,
            checkpoint: Checkpoint {
                elapsed_ms: self.totals.elapsed_ms,
                distance_miles: self.totals.distance_miles,
                calories: self.totals.calories,
                at_epoch_ms: now,
            },
        }
    }

    fn advance(&mut self, dt_ms: u64) {
        let miles = self.speed_mph * (dt_ms as f64 / MS_PER_HOUR);
        self.totals.elapsed_ms += dt_ms;
        self.totals.distance_miles += miles;
        self.totals.calories += miles * self.settings.calories.calories_per_mile(self.incline_pct);
    }

    fn reset(&mut self, run_id: u64) {
        self.mode = IntegratorMode::Idle;
        self.run_id = Some(run_id);
        self.origin_epoch_ms = 0;
        self.last_frame_epoch_ms = None;
        self.last_checkpoint_epoch_ms = 0;
        self.paused_at_epoch_ms = None;
        self.totals = Totals::default();
        self.completed = false;
    }

    /// Seed totals for `snapshot`'s run. Returns whether a checkpoint was used.
    fn seed(&mut self, snapshot: &SessionState) -> bool {
        let resumed = snapshot.checkpoint.belongs_to_run(snapshot.start_epoch_ms);
        self.totals = if resumed {
            Totals::from(snapshot.checkpoint)
        } else {
            Totals::default()
        };
        self.run_id = Some(snapshot.run_id);
        self.origin_epoch_ms = snapshot.start_epoch_ms;
        self.completed = self.goal_reached();
        resumed
    }

    fn begin_run(&mut self, snapshot: &SessionState, now: i64) -> bool {
        let resumed = self.seed(snapshot);

        // integrate from the shared origin so every subscriber moves in
        // lockstep, not from whenever this one happened to attach
        let base = if resumed {
            snapshot.checkpoint.at_epoch_ms.max(self.origin_epoch_ms)
        } else if self.origin_epoch_ms > 0 {
            self.origin_epoch_ms
        } else {
            now
        };
        // the gap since the seed point is covered once, unclamped
        if now > base {
            let gap_ms = (now - base) as u64;
            debug!("catching up {}ms since run {} seed", gap_ms, snapshot.run_id);
            self.advance(gap_ms);
            self.completed = self.completed || self.goal_reached();
        }
        self.last_frame_epoch_ms = Some(base.max(now));
        self.last_checkpoint_epoch_ms = base;
        self.paused_at_epoch_ms = None;
        self.mode = IntegratorMode::Running;
        resumed
    }

    fn adopt(&mut self, snapshot: &SessionState, mode: IntegratorMode, now: i64) {
        self.seed(snapshot);
        self.last_frame_epoch_ms = None;
        self.last_checkpoint_epoch_ms = now;
        self.paused_at_epoch_ms = (mode == IntegratorMode::Paused).then_some(now);
        self.mode = mode;
    }

    fn goal_reached(&self) -> bool {
        self.progress_fraction() >= 1.0
    }

    /// Fraction of the plan covered, clamped to [0, 1]
    pub fn progress_fraction(&self) -> f64 {
        let fraction = match self.settings.progress_basis {
            ProgressBasis::Distance => self.totals.distance_miles / self.plan.distance_miles,
            ProgressBasis::Time => {
                self.totals.elapsed_ms as f64 / (self.plan.duration_minutes * MS_PER_MINUTE)
            }
        };
        if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn mode(&self) -> IntegratorMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.mode == IntegratorMode::Running
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn run_id(&self) -> Option<u64> {
        self.run_id
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn plan(&self) -> SessionPlan {
        self.plan
    }

    pub fn speed_mph(&self) -> f64 {
        self.speed_mph
    }

    pub fn incline_pct(&self) -> f64 {
        self.incline_pct
    }

    /// Goal reached at some point during this run
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// How long the current pause has lasted
    pub fn paused_for_ms(&self, now: i64) -> Option<u64> {
        self.paused_at_epoch_ms
            .map(|at| now.saturating_sub(at).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const T0: i64 = 1_700_000_000_000;

    fn snapshot(status: RunStatus, run_id: u64, speed: f64) -> SessionState {
        SessionState {
            status,
            run_id,
            start_epoch_ms: if status == RunStatus::Ready { 0 } else { T0 },
            speed_mph: speed,
            ..SessionState::default()
        }
    }

    fn run_frames(integrator: &mut TelemetryIntegrator, from: i64, count: i64, step: i64) -> i64 {
        let mut now = from;
        for _ in 0..count {
            now += step;
            integrator.on_frame(now);
        }
        now
    }

    #[test]
    fn test_starts_idle() {
        let integrator = TelemetryIntegrator::default();
        assert_eq!(integrator.mode(), IntegratorMode::Idle);
        assert!(integrator.totals().is_zero());
        assert_eq!(integrator.run_id(), None);
    }

    #[test]
    fn test_constant_speed_integrates_to_one_mile() {
        let mut integrator = TelemetryIntegrator::default();
        let t = integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        assert_matches!(t, Transition::Started { run_id: 1, resumed: false });

        run_frames(&mut integrator, T0, 600, 1_000);

        let totals = integrator.totals();
        assert_eq!(totals.elapsed_ms, 600_000);
        assert!((totals.distance_miles - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_uneven_frames_integrate_the_same_distance() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);

        // 16ms and 17ms frames summing to 600s
        let mut now = T0;
        let mut total = 0;
        let mut i = 0;
        while total < 600_000 {
            let step = if i % 3 == 0 { 17 } else { 16 };
            let step = step.min(600_000 - total);
            now += step;
            total += step;
            integrator.on_frame(now);
            i += 1;
        }

        assert_eq!(integrator.totals().elapsed_ms, 600_000);
        assert!((integrator.totals().distance_miles - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_calories_follow_incline() {
        let mut flat = TelemetryIntegrator::default();
        let mut hill = TelemetryIntegrator::default();
        flat.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        let mut s = snapshot(RunStatus::Running, 1, 6.0);
        s.incline_pct = 5.0;
        hill.on_snapshot(&s, T0);

        run_frames(&mut flat, T0, 600, 1_000);
        run_frames(&mut hill, T0, 600, 1_000);

        let model = CalorieModel::default();
        assert!((flat.totals().calories - model.calories_per_mile(0.0)).abs() < 1e-6);
        assert!((hill.totals().calories - model.calories_per_mile(5.0)).abs() < 1e-6);
        assert!(hill.totals().calories > flat.totals().calories);
    }

    #[test]
    fn test_large_gap_is_clamped() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);

        let outcome = integrator.on_frame(T0 + 30_000);
        assert_eq!(outcome.dt_ms, 1_000);
        assert_eq!(integrator.totals().elapsed_ms, 1_000);
    }

    #[test]
    fn test_backwards_frame_is_skipped() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        integrator.on_frame(T0 + 500);

        let outcome = integrator.on_frame(T0 + 400);
        assert_eq!(outcome, FrameOutcome::default());
        assert_eq!(integrator.totals().elapsed_ms, 500);

        integrator.on_frame(T0 + 600);
        assert_eq!(integrator.totals().elapsed_ms, 600);
    }

    #[test]
    fn test_frames_before_shared_origin_do_nothing() {
        let mut integrator = TelemetryIntegrator::default();
        // local clock runs behind the controller that stamped the start
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0 - 2_000);
        integrator.on_frame(T0 - 1_000);
        assert!(integrator.totals().is_zero());
    }

    #[test]
    fn test_idle_frames_do_nothing() {
        let mut integrator = TelemetryIntegrator::default();
        assert_eq!(integrator.on_frame(T0), FrameOutcome::default());
        assert!(integrator.totals().is_zero());
    }

    #[test]
    fn test_pause_preserves_totals() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        let now = run_frames(&mut integrator, T0, 60, 1_000);
        let before = integrator.totals();

        let t = integrator.on_snapshot(&snapshot(RunStatus::Paused, 1, 6.0), now);
        assert_eq!(t, Transition::Paused);
        assert_eq!(integrator.mode(), IntegratorMode::Paused);

        let t = integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), now);
        assert_eq!(t, Transition::Resumed);
        assert_eq!(integrator.totals(), before);

        integrator.on_frame(now);
        assert_eq!(integrator.totals(), before);
    }

    #[test]
    fn test_paused_time_is_not_integrated() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        let now = run_frames(&mut integrator, T0, 10, 1_000);

        integrator.on_snapshot(&snapshot(RunStatus::Paused, 1, 6.0), now);
        // frames keep arriving while paused
        let later = run_frames(&mut integrator, now, 120, 1_000);
        assert_eq!(integrator.totals().elapsed_ms, 10_000);
        assert_eq!(integrator.paused_for_ms(later), Some(120_000));

        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), later);
        assert_eq!(integrator.paused_for_ms(later), None);
        integrator.on_frame(later + 1_000);
        assert_eq!(integrator.totals().elapsed_ms, 11_000);
    }

    #[test]
    fn test_same_run_refreshes_inputs_only() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        let now = run_frames(&mut integrator, T0, 10, 1_000);
        let before = integrator.totals();

        let mut faster = snapshot(RunStatus::Running, 1, 8.0);
        faster.incline_pct = 2.0;
        assert_eq!(integrator.on_snapshot(&faster, now), Transition::Unchanged);
        assert_eq!(integrator.totals(), before);
        assert_eq!(integrator.speed_mph(), 8.0);
        assert_eq!(integrator.incline_pct(), 2.0);

        integrator.on_frame(now + 1_000);
        let gained = integrator.totals().distance_miles - before.distance_miles;
        assert!((gained - 8.0 / 3_600.0).abs() < 1e-12);
    }

    #[test]
    fn test_new_run_id_resets_running_totals() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        let now = run_frames(&mut integrator, T0, 30, 1_000);
        assert!(integrator.totals().distance_miles > 0.0);

        let mut next = snapshot(RunStatus::Running, 2, 6.0);
        next.start_epoch_ms = now;
        let t = integrator.on_snapshot(&next, now);
        assert_matches!(t, Transition::Started { run_id: 2, resumed: false });
        assert!(integrator.totals().is_zero());
        integrator.on_frame(now + 1_000);
        assert_eq!(integrator.totals().elapsed_ms, 1_000);
    }

    #[test]
    fn test_new_run_seeds_from_its_checkpoint() {
        let mut s = snapshot(RunStatus::Running, 5, 6.0);
        s.checkpoint = Checkpoint {
            elapsed_ms: 120_000,
            distance_miles: 0.2,
            calories: 20.0,
            at_epoch_ms: T0 + 120_000,
        };

        let mut integrator = TelemetryIntegrator::default();
        let t = integrator.on_snapshot(&s, T0 + 125_000);
        assert_matches!(t, Transition::Started { run_id: 5, resumed: true });
        assert_eq!(integrator.totals().elapsed_ms, 120_000);

        // the 5s since the checkpoint are covered on attach
        assert_eq!(integrator.totals().elapsed_ms, 125_000);
        assert!((integrator.totals().distance_miles - (0.2 + 6.0 * 5.0 / 3_600.0)).abs() < 1e-12);

        integrator.on_frame(T0 + 126_000);
        assert_eq!(integrator.totals().elapsed_ms, 126_000);
    }

    #[test]
    fn test_late_attach_matches_an_overlay_that_saw_the_start() {
        let mut early = TelemetryIntegrator::default();
        early.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        let now = run_frames(&mut early, T0, 14, 1_000);

        // attaches 14s in, long after the start and past the frame clamp
        let mut late = TelemetryIntegrator::default();
        let t = late.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), now);
        assert_matches!(t, Transition::Started { run_id: 1, resumed: false });
        assert_eq!(late.totals().elapsed_ms, 14_000);

        run_frames(&mut early, now, 20, 1_000);
        run_frames(&mut late, now, 20, 1_000);
        assert_eq!(late.totals().elapsed_ms, early.totals().elapsed_ms);
        assert!((late.totals().distance_miles - early.totals().distance_miles).abs() < 1e-12);
    }

    #[test]
    fn test_late_attach_past_goal_is_already_complete() {
        let mut s = snapshot(RunStatus::Running, 1, 12.0);
        s.plan_distance_miles = 0.1;

        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&s, T0 + 45_000);
        assert!(integrator.is_complete());
        // goal was reached before this overlay was watching
        assert!(!integrator.on_frame(T0 + 46_000).completed);
    }

    #[test]
    fn test_checkpoints_carry_run_id() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&snapshot(RunStatus::Running, 7, 6.0), T0);
        let mut now = T0;
        let mut emitted = None;
        while emitted.is_none() {
            now += 1_000;
            emitted = integrator.on_frame(now).checkpoint;
        }
        assert_eq!(emitted.map(|cp| cp.run_id), Some(7));
        assert_eq!(integrator.flush_checkpoint(now).map(|cp| cp.run_id), Some(7));
    }

    #[test]
    fn test_stale_checkpoint_from_previous_run_is_ignored() {
        let mut s = snapshot(RunStatus::Running, 6, 6.0);
        s.checkpoint = Checkpoint {
            elapsed_ms: 999_000,
            distance_miles: 2.5,
            calories: 250.0,
            at_epoch_ms: T0 - 1,
        };

        let mut integrator = TelemetryIntegrator::default();
        let t = integrator.on_snapshot(&s, T0);
        assert_matches!(t, Transition::Started { resumed: false, .. });
        assert!(integrator.totals().is_zero());
    }

    #[test]
    fn test_ready_resets_to_zero() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        run_frames(&mut integrator, T0, 5, 1_000);

        assert_eq!(
            integrator.on_snapshot(&snapshot(RunStatus::Ready, 1, 6.0), T0 + 6_000),
            Transition::Reset
        );
        assert_eq!(integrator.mode(), IntegratorMode::Idle);
        assert!(integrator.totals().is_zero());

        // a second ready broadcast is a no-op
        assert_eq!(
            integrator.on_snapshot(&snapshot(RunStatus::Ready, 1, 6.0), T0 + 7_000),
            Transition::Unchanged
        );
    }

    #[test]
    fn test_checkpoints_follow_interval() {
        let settings = IntegratorSettings {
            checkpoint_interval_ms: 5_000,
            ..IntegratorSettings::default()
        };
        let mut integrator = TelemetryIntegrator::new(settings);
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);

        let mut emitted = Vec::new();
        let mut now = T0;
        for _ in 0..12 {
            now += 1_000;
            if let Some(cp) = integrator.on_frame(now).checkpoint {
                emitted.push(cp.checkpoint);
            }
        }

        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].at_epoch_ms, T0 + 5_000);
        assert_eq!(emitted[0].elapsed_ms, 5_000);
        assert_eq!(emitted[1].at_epoch_ms, T0 + 10_000);
        assert!(emitted[1].distance_miles > emitted[0].distance_miles);
    }

    #[test]
    fn test_flush_checkpoint() {
        let mut integrator = TelemetryIntegrator::default();
        assert!(integrator.flush_checkpoint(T0).is_none());

        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        run_frames(&mut integrator, T0, 3, 1_000);
        let cp = integrator.flush_checkpoint(T0 + 3_000).unwrap();
        assert_eq!(cp.checkpoint.elapsed_ms, 3_000);
        assert_eq!(cp.checkpoint.at_epoch_ms, T0 + 3_000);
    }

    #[test]
    fn test_completion_signals_once_and_keeps_going() {
        let mut integrator = TelemetryIntegrator::default();
        let mut s = snapshot(RunStatus::Running, 1, 12.0);
        s.plan_distance_miles = 0.1;
        integrator.on_snapshot(&s, T0);

        // 0.1 mi at 12 mph is 30s
        let mut signals = 0;
        let mut now = T0;
        for _ in 0..40 {
            now += 1_000;
            if integrator.on_frame(now).completed {
                signals += 1;
            }
        }

        assert_eq!(signals, 1);
        assert!(integrator.is_complete());
        assert_eq!(integrator.progress_fraction(), 1.0);
        assert!(integrator.totals().distance_miles > 0.1);
        assert!(integrator.is_running());
    }

    #[test]
    fn test_time_basis_progress() {
        let settings = IntegratorSettings {
            progress_basis: ProgressBasis::Time,
            ..IntegratorSettings::default()
        };
        let mut integrator = TelemetryIntegrator::new(settings);
        let mut s = snapshot(RunStatus::Running, 1, 0.0);
        s.plan_duration_minutes = 10.0;
        integrator.on_snapshot(&s, T0);

        run_frames(&mut integrator, T0, 300, 1_000);
        assert!((integrator.progress_fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_progress_uses_plan_from_snapshot() {
        let mut integrator = TelemetryIntegrator::default();
        let mut s = snapshot(RunStatus::Running, 1, 6.0);
        let plan = SessionPlan::clamped(4.0, 40.0).unwrap();
        s.plan_distance_miles = plan.distance_miles;
        s.plan_duration_minutes = plan.duration_minutes;
        integrator.on_snapshot(&s, T0);

        run_frames(&mut integrator, T0, 1_200, 1_000);
        assert!((integrator.progress_fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_attach_while_paused_adopts_checkpoint() {
        let mut s = snapshot(RunStatus::Paused, 3, 6.0);
        s.checkpoint = Checkpoint {
            elapsed_ms: 60_000,
            distance_miles: 0.1,
            calories: 10.0,
            at_epoch_ms: T0 + 60_000,
        };

        let mut integrator = TelemetryIntegrator::default();
        let t = integrator.on_snapshot(&s, T0 + 90_000);
        assert_eq!(t, Transition::Adopted { run_id: 3 });
        assert_eq!(integrator.mode(), IntegratorMode::Paused);
        assert_eq!(integrator.totals().elapsed_ms, 60_000);

        let resume = snapshot(RunStatus::Running, 3, 6.0);
        assert_eq!(
            integrator.on_snapshot(&resume, T0 + 95_000),
            Transition::Resumed
        );
        integrator.on_frame(T0 + 96_000);
        assert_eq!(integrator.totals().elapsed_ms, 61_000);
    }

    #[test]
    fn test_complete_freezes_running_run() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&snapshot(RunStatus::Running, 1, 6.0), T0);
        let now = run_frames(&mut integrator, T0, 10, 1_000);
        let before = integrator.totals();

        let t = integrator.on_snapshot(&snapshot(RunStatus::Complete, 1, 6.0), now);
        assert_eq!(t, Transition::Finished);
        assert_eq!(integrator.mode(), IntegratorMode::Idle);
        assert!(integrator.is_complete());

        run_frames(&mut integrator, now, 10, 1_000);
        assert_eq!(integrator.totals(), before);

        assert_eq!(
            integrator.on_snapshot(&snapshot(RunStatus::Complete, 1, 6.0), now + 20_000),
            Transition::Unchanged
        );
    }
}
