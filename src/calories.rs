use serde::{Deserialize, Serialize};

/// Energy cost of running a mile, scaled by treadmill incline.
///
/// Flat cost is `body_weight_lb * cal_per_lb_per_mile` (160 lb * 0.63 gives
/// roughly 100.8 cal/mi). Each percent of grade adds `incline_gain_per_pct`
/// of the flat cost, which follows the vertical term of the ACSM running
/// equation (0.9 * grade against 0.2 for the horizontal term).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalorieModel {
    pub body_weight_lb: f64,
    pub cal_per_lb_per_mile: f64,
    pub incline_gain_per_pct: f64,
}

impl Default for CalorieModel {
    fn default() -> Self {
        Self {
            body_weight_lb: 160.0,
            cal_per_lb_per_mile: 0.63,
            incline_gain_per_pct: 0.045,
        }
    }
}

impl CalorieModel {
    pub fn flat_calories_per_mile(&self) -> f64 {
        self.body_weight_lb * self.cal_per_lb_per_mile
    }

    /// Non-decreasing in `incline_pct`; negative grades count as flat.
    pub fn calories_per_mile(&self, incline_pct: f64) -> f64 {
        let grade = if incline_pct.is_finite() {
            incline_pct.max(0.0)
        } else {
            0.0
        };
        self.flat_calories_per_mile() * (1.0 + self.incline_gain_per_pct.max(0.0) * grade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_baseline() {
        let model = CalorieModel::default();
        assert!((model.calories_per_mile(0.0) - 100.8).abs() < 1e-9);
    }

    #[test]
    fn test_six_flat_miles_near_605() {
        let model = CalorieModel::default();
        let total = model.calories_per_mile(0.0) * 6.0;
        assert_eq!(total.round(), 605.0);
    }

    #[test]
    fn test_monotonic_in_incline() {
        let model = CalorieModel::default();
        let mut prev = model.calories_per_mile(0.0);
        for pct in 1..=30 {
            let cur = model.calories_per_mile(pct as f64);
            assert!(cur > prev);
            prev = cur;
        }
    }

    #[test]
    fn test_negative_and_nan_incline_count_as_flat() {
        let model = CalorieModel::default();
        assert_eq!(model.calories_per_mile(-5.0), model.calories_per_mile(0.0));
        assert_eq!(
            model.calories_per_mile(f64::NAN),
            model.calories_per_mile(0.0)
        );
    }

    #[test]
    fn test_pure() {
        let model = CalorieModel {
            body_weight_lb: 200.0,
            ..CalorieModel::default()
        };
        assert_eq!(model.calories_per_mile(4.0), model.calories_per_mile(4.0));
    }
}
