//! Pure position planning and sample selection for the sweep phases

use crate::types::{FocusPosition, ScoreSample};

/// Inclusive range of focus positions a refinement phase covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub lo: FocusPosition,
    pub hi: FocusPosition,
}

impl Window {
    /// `center ± radius`, clamped to the device range.
    pub fn around(
        center: FocusPosition,
        radius: i32,
        min: FocusPosition,
        max: FocusPosition,
    ) -> Self {
        Self {
            lo: (center - radius).max(min),
            hi: (center + radius).min(max),
        }
    }

    pub fn contains(&self, position: FocusPosition) -> bool {
        (self.lo..=self.hi).contains(&position)
    }
}

/// Evenly spaced positions from `min` through `max`.
pub fn coarse_positions(min: FocusPosition, max: FocusPosition, step: i32) -> Vec<FocusPosition> {
    (min..=max).step_by(step.max(1) as usize).collect()
}

/// Positions of `window` at `step` that have not been measured yet.
pub fn refine_positions(window: Window, step: i32, tested: &[ScoreSample]) -> Vec<FocusPosition> {
    (window.lo..=window.hi)
        .step_by(step.max(1) as usize)
        .filter(|p| !tested.iter().any(|s| s.position == *p))
        .collect()
}

/// Highest-scoring sample; the earliest one wins ties.
pub fn best_of<'a, I>(samples: I) -> Option<ScoreSample>
where
    I: IntoIterator<Item = &'a ScoreSample>,
{
    samples.into_iter().fold(None, |best: Option<ScoreSample>, s| match best {
        Some(b) if b.score >= s.score => Some(b),
        _ => Some(*s),
    })
}

/// Best sample whose position lies inside `window`.
pub fn best_in_window(samples: &[ScoreSample], window: Window) -> Option<ScoreSample> {
    best_of(samples.iter().filter(|s| window.contains(s.position)))
}

/// Ratio of the best score to the runner-up, defined once at least three
/// samples exist and the runner-up is nonzero.
pub fn dominance(samples: &[ScoreSample]) -> Option<f64> {
    if samples.len() < 3 {
        return None;
    }
    let mut scores: Vec<f64> = samples.iter().map(|s| s.score).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    (scores[1] > 0.0).then(|| scores[0] / scores[1])
}

/// The dominance ratio when it reaches `threshold`, i.e. when refinement can
/// be skipped.
pub fn should_bail(samples: &[ScoreSample], threshold: f64) -> Option<f64> {
    dominance(samples).filter(|d| *d >= threshold)
}

/// Add the user offset and clamp into the device range.
pub fn apply_offset(
    position: FocusPosition,
    offset: i32,
    min: FocusPosition,
    max: FocusPosition,
) -> FocusPosition {
    (position + offset).clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(pairs: &[(i32, f64)]) -> Vec<ScoreSample> {
        pairs.iter().map(|&p| ScoreSample::from(p)).collect()
    }

    #[test]
    fn test_coarse_positions() {
        let positions = coarse_positions(0, 255, 20);
        assert_eq!(positions.len(), 13);
        assert_eq!(positions.first(), Some(&0));
        assert_eq!(positions.last(), Some(&240));
    }

    #[test]
    fn test_refine_excludes_tested_and_clamps() {
        let tested = samples(&[(0, 0.1), (20, 0.3), (40, 0.2)]);
        let window = Window::around(20, 15, 0, 255);
        assert_eq!(window, Window { lo: 5, hi: 35 });
        assert_eq!(refine_positions(window, 5, &tested), vec![5, 10, 15, 25, 30, 35]);

        let edge = Window::around(0, 15, 0, 255);
        assert_eq!(refine_positions(edge, 5, &tested), vec![5, 10, 15]);

        let top = Window::around(254, 2, 0, 255);
        assert_eq!(refine_positions(top, 1, &[]), vec![252, 253, 254, 255]);
    }

    #[test]
    fn test_bail_rule() {
        let dominant = samples(&[(10, 0.9), (30, 0.5), (50, 0.4)]);
        let d = should_bail(&dominant, 1.5).unwrap();
        assert!((d - 1.8).abs() < 1e-9);

        let close = samples(&[(10, 0.6), (30, 0.55)]);
        assert_eq!(should_bail(&close, 1.5), None);

        let close_three = samples(&[(10, 0.6), (30, 0.55), (50, 0.1)]);
        assert_eq!(should_bail(&close_three, 1.5), None);
    }

    #[test]
    fn test_bail_needs_nonzero_runner_up() {
        let lone = samples(&[(10, 0.9), (30, 0.0), (50, 0.0)]);
        assert_eq!(dominance(&lone), None);
        assert_eq!(should_bail(&lone, 1.5), None);
    }

    #[test]
    fn test_bail_depends_on_ratio_not_magnitude() {
        let tiny = samples(&[(10, 0.009), (30, 0.005), (50, 0.004)]);
        assert!(should_bail(&tiny, 1.5).is_some());
    }

    #[test]
    fn test_best_selection() {
        let all = samples(&[(100, 0.7), (140, 0.9), (150, 0.9), (139, 0.8)]);
        assert_eq!(best_of(&all).unwrap().position, 140);

        let window = Window::around(139, 2, 0, 255);
        assert_eq!(best_in_window(&all, window).unwrap().position, 140);

        let narrow = Window { lo: 100, hi: 139 };
        assert_eq!(best_in_window(&all, narrow).unwrap().position, 139);
        assert!(best_in_window(&all, Window { lo: 0, hi: 10 }).is_none());
        assert!(best_of(&[]).is_none());
    }

    #[test]
    fn test_apply_offset() {
        assert_eq!(apply_offset(142, 3, 0, 255), 145);
        assert_eq!(apply_offset(250, 20, 0, 255), 255);
        assert_eq!(apply_offset(5, -20, 0, 255), 0);
    }
}
