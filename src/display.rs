use crate::integrator::{IntegratorMode, TelemetryIntegrator};
use crate::session::RunStatus;

pub const PACE_SENTINEL: &str = "--:-- min/mi";

/// Below this distance pace is meaningless and the sentinel is shown
const MIN_PACE_DISTANCE_MILES: f64 = 1e-6;

pub fn format_hms(ms: u64) -> String {
    let s = ms / 1000;
    let h = s / 3600;
    let m = (s % 3600) / 60;
    let sec = s % 60;
    format!("{h:02}:{m:02}:{sec:02}")
}

/// Minutes per mile from running totals, `MM:SS min/mi`
pub fn format_pace(elapsed_ms: u64, distance_miles: f64) -> String {
    if !distance_miles.is_finite() || distance_miles < MIN_PACE_DISTANCE_MILES {
        return PACE_SENTINEL.to_string();
    }
    let secs_per_mile = (elapsed_ms as f64 / 1000.0 / distance_miles).round() as u64;
    format!("{:02}:{:02} min/mi", secs_per_mile / 60, secs_per_mile % 60)
}

/// Pace the plan asks for, `M:SS min/mi`
pub fn format_plan_pace(duration_minutes: f64, distance_miles: f64) -> String {
    if !distance_miles.is_finite() || distance_miles <= 0.0 || !duration_minutes.is_finite() {
        return "-- min/mi".to_string();
    }
    let secs_per_mile = (duration_minutes * 60.0 / distance_miles).round() as u64;
    format!("{}:{:02} min/mi", secs_per_mile / 60, secs_per_mile % 60)
}

pub fn format_goal_time(duration_minutes: f64) -> String {
    format!("{} MIN", duration_minutes.max(0.0).floor() as u64)
}

pub fn format_goal_distance(distance_miles: f64) -> String {
    format!("{distance_miles:.1} MI")
}

/// Marker spacing for a goal: tenths under a mile, miles up to ten, fives beyond.
pub fn marker_step(goal_miles: f64) -> f64 {
    if goal_miles < 1.0 {
        0.1
    } else if goal_miles <= 10.0 {
        1.0
    } else {
        5.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMarker {
    pub miles: f64,
    pub label: String,
    /// position along the track, in [0, 1]
    pub ratio: f64,
    pub completed: bool,
}

/// Markers along the track for `goal_miles`. A marker is completed once
/// `progress` reaches its position, so markers always agree with the gauge.
pub fn distance_markers(goal_miles: f64, progress: f64) -> Vec<DistanceMarker> {
    if !goal_miles.is_finite() || goal_miles <= 0.0 {
        return Vec::new();
    }
    let step = marker_step(goal_miles);
    let count = (goal_miles / step + 1e-9).floor() as u64;

    (1..=count)
        .map(|i| {
            let miles = i as f64 * step;
            let label = if step < 1.0 {
                format!("{miles:.1}")
            } else {
                format!("{}", miles.round() as u64)
            };
            let ratio = (miles / goal_miles).min(1.0);
            DistanceMarker {
                miles,
                label,
                ratio,
                completed: progress + 1e-9 >= ratio,
            }
        })
        .collect()
}

/// Everything the presentation layer needs for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayView {
    pub mode: IntegratorMode,
    pub status: RunStatus,
    pub run_id: Option<u64>,
    pub progress: f64,
    pub elapsed: String,
    pub pace: String,
    pub distance: String,
    pub calories: u64,
    pub speed: String,
    pub incline: String,
    pub goal_distance: String,
    pub goal_time: String,
    pub plan_pace: String,
    pub markers: Vec<DistanceMarker>,
    pub complete: bool,
    /// how long the current pause has lasted, `HH:MM:SS`
    pub paused_for: Option<String>,
    pub message: Option<String>,
}

impl OverlayView {
    pub fn from_integrator(
        integrator: &TelemetryIntegrator,
        now_epoch_ms: i64,
        message: Option<String>,
    ) -> Self {
        let totals = integrator.totals();
        let plan = integrator.plan();
        let progress = integrator.progress_fraction();

        Self {
            mode: integrator.mode(),
            status: integrator.status(),
            run_id: integrator.run_id(),
            progress,
            elapsed: format_hms(totals.elapsed_ms),
            pace: format_pace(totals.elapsed_ms, totals.distance_miles),
            distance: format!("{:.2} mi", totals.distance_miles),
            calories: totals.calories.max(0.0).round() as u64,
            speed: format!("{:.1} mph", integrator.speed_mph()),
            incline: format!("{:.1} %", integrator.incline_pct()),
            goal_distance: format_goal_distance(plan.distance_miles),
            goal_time: format_goal_time(plan.duration_minutes),
            plan_pace: format_plan_pace(plan.duration_minutes, plan.distance_miles),
            markers: distance_markers(plan.distance_miles, progress),
            complete: integrator.is_complete() || integrator.status() == RunStatus::Complete,
            paused_for: integrator.paused_for_ms(now_epoch_ms).map(format_hms),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgressBasis;
    use crate::integrator::IntegratorSettings;
    use crate::session::SessionState;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(999), "00:00:00");
        assert_eq!(format_hms(61_000), "00:01:01");
        assert_eq!(format_hms(3_723_000), "01:02:03");
    }

    #[test]
    fn test_format_pace() {
        assert_eq!(format_pace(20 * 60_000, 2.0), "10:00 min/mi");
        assert_eq!(format_pace(9 * 60_000 + 30_000, 1.0), "09:30 min/mi");
    }

    #[test]
    fn test_format_pace_rounds_float_noise() {
        assert_eq!(format_pace(20 * 60_000, 2.000_000_000_1), "10:00 min/mi");
        assert_eq!(format_pace(20 * 60_000, 1.999_999_999_9), "10:00 min/mi");
    }

    #[test]
    fn test_format_pace_sentinel() {
        assert_eq!(format_pace(5_000, 0.0), PACE_SENTINEL);
        assert_eq!(format_pace(5_000, 1e-9), PACE_SENTINEL);
        assert_eq!(format_pace(5_000, f64::NAN), PACE_SENTINEL);
    }

    #[test]
    fn test_format_plan_pace() {
        assert_eq!(format_plan_pace(40.0, 4.0), "10:00 min/mi");
        assert_eq!(format_plan_pace(25.0, 3.1), "8:04 min/mi");
        assert_eq!(format_plan_pace(30.0, 0.0), "-- min/mi");
    }

    #[test]
    fn test_goal_labels() {
        assert_eq!(format_goal_time(40.0), "40 MIN");
        assert_eq!(format_goal_time(12.7), "12 MIN");
        assert_eq!(format_goal_distance(4.0), "4.0 MI");
    }

    #[test]
    fn test_marker_step() {
        assert_eq!(marker_step(0.5), 0.1);
        assert_eq!(marker_step(1.0), 1.0);
        assert_eq!(marker_step(10.0), 1.0);
        assert_eq!(marker_step(13.1), 5.0);
    }

    #[test]
    fn test_markers_for_whole_miles() {
        let markers = distance_markers(4.0, 0.625);
        let labels: Vec<&str> = markers.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["1", "2", "3", "4"]);
        let done: Vec<bool> = markers.iter().map(|m| m.completed).collect();
        assert_eq!(done, vec![true, true, false, false]);
        assert_eq!(markers[3].ratio, 1.0);
    }

    #[test]
    fn test_markers_for_short_goal() {
        let markers = distance_markers(0.3, 0.0);
        let labels: Vec<&str> = markers.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["0.1", "0.2", "0.3"]);
        assert!(markers.iter().all(|m| !m.completed));
    }

    #[test]
    fn test_markers_for_marathon() {
        let markers = distance_markers(26.0, 1.0);
        let labels: Vec<&str> = markers.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["5", "10", "15", "20", "25"]);
        assert!(markers.iter().all(|m| m.completed));
    }

    #[test]
    fn test_markers_empty_for_bad_goal() {
        assert!(distance_markers(0.0, 1.0).is_empty());
        assert!(distance_markers(f64::NAN, 1.0).is_empty());
    }

    #[test]
    fn test_view_of_idle_integrator() {
        let view = OverlayView::from_integrator(&TelemetryIntegrator::default(), T0, None);
        assert_eq!(view.elapsed, "00:00:00");
        assert_eq!(view.pace, PACE_SENTINEL);
        assert_eq!(view.calories, 0);
        assert_eq!(view.progress, 0.0);
        assert_eq!(view.goal_distance, "4.0 MI");
        assert_eq!(view.plan_pace, "10:00 min/mi");
        assert!(!view.complete);
        assert_eq!(view.paused_for, None);
    }

    fn running(speed_mph: f64) -> SessionState {
        SessionState {
            status: RunStatus::Running,
            run_id: 1,
            start_epoch_ms: T0,
            speed_mph,
            ..SessionState::default()
        }
    }

    #[test]
    fn test_markers_follow_time_progress() {
        let settings = IntegratorSettings {
            progress_basis: ProgressBasis::Time,
            ..IntegratorSettings::default()
        };
        let mut integrator = TelemetryIntegrator::new(settings);
        // half of the 40 minute plan walked at 3 mph covers 1 of the 4 miles
        integrator.on_snapshot(&running(3.0), T0);
        let mut now = T0;
        for _ in 0..(20 * 60) {
            now += 1_000;
            integrator.on_frame(now);
        }

        let view = OverlayView::from_integrator(&integrator, now, None);
        assert!((view.progress - 0.5).abs() < 1e-9);
        assert_eq!(view.distance, "1.00 mi");
        let done: Vec<bool> = view.markers.iter().map(|m| m.completed).collect();
        assert_eq!(done, vec![true, true, false, false]);
    }

    #[test]
    fn test_view_shows_pause_duration() {
        let mut integrator = TelemetryIntegrator::default();
        integrator.on_snapshot(&running(6.0), T0);
        integrator.on_frame(T0 + 1_000);
        let paused = SessionState {
            status: RunStatus::Paused,
            ..running(6.0)
        };
        integrator.on_snapshot(&paused, T0 + 1_000);

        let view = OverlayView::from_integrator(&integrator, T0 + 66_000, None);
        assert_eq!(view.paused_for.as_deref(), Some("00:01:05"));
    }
}
