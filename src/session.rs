use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::OverlayError;

pub const MIN_PLAN_DISTANCE_MILES: f64 = 0.1;
pub const MAX_PLAN_DISTANCE_MILES: f64 = 26.0;
pub const MIN_PLAN_DURATION_MINUTES: f64 = 1.0;
pub const MAX_SPEED_MPH: f64 = 20.0;
pub const MAX_INCLINE_PCT: f64 = 30.0;

pub const DEFAULT_PLAN_DISTANCE_MILES: f64 = 4.0;
pub const DEFAULT_PLAN_DURATION_MINUTES: f64 = 40.0;

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Ready,
    Running,
    Paused,
    Complete,
}

/// User-configured target for a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionPlan {
    pub distance_miles: f64,
    pub duration_minutes: f64,
}

impl SessionPlan {
    /// Clamp raw inputs into the accepted plan range.
    pub fn clamped(distance_miles: f64, duration_minutes: f64) -> Result<Self, OverlayError> {
        if !distance_miles.is_finite() {
            return Err(OverlayError::InvalidInput {
                field: "distance",
                value: distance_miles,
            });
        }
        if !duration_minutes.is_finite() {
            return Err(OverlayError::InvalidInput {
                field: "duration",
                value: duration_minutes,
            });
        }

        Ok(Self {
            distance_miles: distance_miles.clamp(MIN_PLAN_DISTANCE_MILES, MAX_PLAN_DISTANCE_MILES),
            duration_minutes: duration_minutes.max(MIN_PLAN_DURATION_MINUTES),
        })
    }
}

impl Default for SessionPlan {
    fn default() -> Self {
        Self {
            distance_miles: DEFAULT_PLAN_DISTANCE_MILES,
            duration_minutes: DEFAULT_PLAN_DURATION_MINUTES,
        }
    }
}

/// Last durable snapshot of a run's accumulated totals
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Checkpoint {
    pub elapsed_ms: u64,
    pub distance_miles: f64,
    pub calories: f64,
    pub at_epoch_ms: i64,
}

impl Checkpoint {
    pub fn is_zero(&self) -> bool {
        *self == Checkpoint::default()
    }

    /// A checkpoint taken before `start_epoch_ms` was written by an earlier run.
    pub fn belongs_to_run(&self, start_epoch_ms: i64) -> bool {
        self.at_epoch_ms > 0 && self.at_epoch_ms >= start_epoch_ms
    }
}

/// The single shared record every controller and overlay instance reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    pub status: RunStatus,
    pub run_id: u64,
    pub start_epoch_ms: i64,
    pub plan_distance_miles: f64,
    pub plan_duration_minutes: f64,
    pub speed_mph: f64,
    pub incline_pct: f64,
    pub checkpoint: Checkpoint,
    pub updated_at_epoch_ms: i64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: RunStatus::Ready,
            run_id: 0,
            start_epoch_ms: 0,
            plan_distance_miles: DEFAULT_PLAN_DISTANCE_MILES,
            plan_duration_minutes: DEFAULT_PLAN_DURATION_MINUTES,
            speed_mph: 0.0,
            incline_pct: 0.0,
            checkpoint: Checkpoint::default(),
            updated_at_epoch_ms: 0,
        }
    }
}

impl SessionState {
    /// Default `ready` record stamped with the writer's clock
    pub fn initial(now_epoch_ms: i64) -> Self {
        Self {
            updated_at_epoch_ms: now_epoch_ms,
            ..Self::default()
        }
    }

    pub fn plan(&self) -> SessionPlan {
        SessionPlan {
            distance_miles: self.plan_distance_miles,
            duration_minutes: self.plan_duration_minutes,
        }
    }

    /// Pull remote values back inside the protocol bounds.
    ///
    /// Records are written by other instances (and, historically, by hand), so
    /// a reader never trusts them to be in range.
    pub fn sanitized(mut self) -> Self {
        self.plan_distance_miles = finite_or(self.plan_distance_miles, DEFAULT_PLAN_DISTANCE_MILES)
            .clamp(MIN_PLAN_DISTANCE_MILES, MAX_PLAN_DISTANCE_MILES);
        self.plan_duration_minutes =
            finite_or(self.plan_duration_minutes, DEFAULT_PLAN_DURATION_MINUTES)
                .max(MIN_PLAN_DURATION_MINUTES);
        self.speed_mph = clamp_speed(self.speed_mph);
        self.incline_pct = clamp_incline(self.incline_pct);
        self.checkpoint.distance_miles = finite_or(self.checkpoint.distance_miles, 0.0).max(0.0);
        self.checkpoint.calories = finite_or(self.checkpoint.calories, 0.0).max(0.0);
        self
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

pub fn clamp_speed(mph: f64) -> f64 {
    finite_or(mph, 0.0).clamp(0.0, MAX_SPEED_MPH)
}

pub fn clamp_incline(pct: f64) -> f64 {
    finite_or(pct, 0.0).clamp(0.0, MAX_INCLINE_PCT)
}

/// Partial update written by a controller. Never carries run totals except
/// for the zeroed baseline written by a reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlPatch {
    pub status: Option<RunStatus>,
    pub run_id: Option<u64>,
    pub start_epoch_ms: Option<i64>,
    pub plan: Option<SessionPlan>,
    pub speed_mph: Option<f64>,
    pub incline_pct: Option<f64>,
    pub updated_at_epoch_ms: i64,
    reset_checkpoint: bool,
}

impl ControlPatch {
    pub fn plan(plan: SessionPlan, now: i64) -> Self {
        Self {
            plan: Some(plan),
            updated_at_epoch_ms: now,
            ..Self::default()
        }
    }

    pub fn start(run_id: u64, now: i64) -> Self {
        Self {
            status: Some(RunStatus::Running),
            run_id: Some(run_id),
            start_epoch_ms: Some(now),
            updated_at_epoch_ms: now,
            ..Self::default()
        }
    }

    /// Status-only write; the run identity is left alone.
    pub fn status(status: RunStatus, now: i64) -> Self {
        Self {
            status: Some(status),
            updated_at_epoch_ms: now,
            ..Self::default()
        }
    }

    pub fn reset(now: i64) -> Self {
        Self {
            status: Some(RunStatus::Ready),
            start_epoch_ms: Some(0),
            updated_at_epoch_ms: now,
            reset_checkpoint: true,
            ..Self::default()
        }
    }

    pub fn speed(mph: f64, now: i64) -> Self {
        Self {
            speed_mph: Some(mph),
            updated_at_epoch_ms: now,
            ..Self::default()
        }
    }

    pub fn incline(pct: f64, now: i64) -> Self {
        Self {
            incline_pct: Some(pct),
            updated_at_epoch_ms: now,
            ..Self::default()
        }
    }
}

/// Totals written back by an overlay's integrator, tagged with the run that
/// produced them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointPatch {
    pub run_id: u64,
    pub checkpoint: Checkpoint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionPatch {
    Control(ControlPatch),
    Checkpoint(CheckpointPatch),
}

impl From<ControlPatch> for SessionPatch {
    fn from(p: ControlPatch) -> Self {
        SessionPatch::Control(p)
    }
}

impl From<CheckpointPatch> for SessionPatch {
    fn from(p: CheckpointPatch) -> Self {
        SessionPatch::Checkpoint(p)
    }
}

/// Whether `patch` may replace the checkpoint stored in `current`.
///
/// A checkpoint is dropped when the record has been reset, when another run
/// owns the record, when it was taken before the current run started, or when
/// a newer one is already stored.
pub fn accepts_checkpoint(current: &SessionState, patch: &CheckpointPatch) -> bool {
    current.status != RunStatus::Ready
        && patch.run_id == current.run_id
        && patch.checkpoint.at_epoch_ms >= current.start_epoch_ms
        && patch.checkpoint.at_epoch_ms >= current.checkpoint.at_epoch_ms
}

/// Merge a partial update into the current record.
///
/// Control patches and checkpoint patches touch disjoint field sets, so the
/// order in which two concurrent writers land never lets one undo the other.
pub fn apply_patch(current: &SessionState, patch: &SessionPatch) -> SessionState {
    let mut next = current.clone();

    match patch {
        SessionPatch::Control(p) => {
            if let Some(status) = p.status {
                next.status = status;
            }
            if let Some(run_id) = p.run_id {
                next.run_id = run_id;
            }
            if let Some(start) = p.start_epoch_ms {
                next.start_epoch_ms = start;
            }
            if let Some(plan) = p.plan {
                next.plan_distance_miles = plan.distance_miles;
                next.plan_duration_minutes = plan.duration_minutes;
            }
            if let Some(mph) = p.speed_mph {
                next.speed_mph = clamp_speed(mph);
            }
            if let Some(pct) = p.incline_pct {
                next.incline_pct = clamp_incline(pct);
            }
            if p.reset_checkpoint {
                next.checkpoint = Checkpoint::default();
            }
            next.updated_at_epoch_ms = p.updated_at_epoch_ms;
        }
        SessionPatch::Checkpoint(p) => {
            if accepts_checkpoint(current, p) {
                next.checkpoint = p.checkpoint;
            } else {
                warn!(
                    "discarding stale checkpoint of run {} at {} (record run {} {}, run start {}, stored checkpoint at {})",
                    p.run_id,
                    p.checkpoint.at_epoch_ms,
                    current.run_id,
                    current.status,
                    current.start_epoch_ms,
                    current.checkpoint.at_epoch_ms
                );
            }
        }
    }

    next
}
