use std::collections::HashMap;

use crate::models::GradeScaleInterval;

/// Run-scoped lookup of grade scale boundaries.
///
/// Built once per invocation from a bulk read; each scale's intervals are kept
/// sorted ascending by boundary.
#[derive(Debug, Clone, Default)]
pub struct GradeScaleCache {
    scales: HashMap<String, Vec<(f64, String)>>,
}

impl GradeScaleCache {
    pub fn new(intervals: impl IntoIterator<Item = GradeScaleInterval>) -> Self {
        let mut scales: HashMap<String, Vec<(f64, String)>> = HashMap::new();
        for interval in intervals {
            if !interval.boundary.is_finite() {
                continue;
            }
            scales
                .entry(interval.grade_scale)
                .or_default()
                .push((interval.boundary, interval.label));
        }
        for boundaries in scales.values_mut() {
            boundaries.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
        Self { scales }
    }

    /// Label of the highest boundary at or below `score`.
    pub fn resolve(&self, scale: Option<&str>, score: Option<f64>) -> Option<String> {
        let boundaries = self.scales.get(scale?)?;
        let score = score?;
        boundaries
            .iter()
            .take_while(|(boundary, _)| *boundary <= score)
            .last()
            .map(|(_, label)| label.clone())
    }

    pub fn contains(&self, scale: &str) -> bool {
        self.scales.contains_key(scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(scale: &str, boundary: f64, label: &str) -> GradeScaleInterval {
        GradeScaleInterval {
            grade_scale: scale.to_string(),
            boundary,
            label: label.to_string(),
        }
    }

    fn letter_scale() -> GradeScaleCache {
        GradeScaleCache::new(vec![
            interval("Letter", 90.0, "A"),
            interval("Letter", 70.0, "B-"),
        ])
    }

    #[test]
    fn resolves_highest_boundary_at_or_below_score() {
        let cache = letter_scale();
        assert_eq!(cache.resolve(Some("Letter"), Some(75.0)).as_deref(), Some("B-"));
        assert_eq!(cache.resolve(Some("Letter"), Some(90.0)).as_deref(), Some("A"));
        assert_eq!(cache.resolve(Some("Letter"), Some(100.0)).as_deref(), Some("A"));
    }

    #[test]
    fn below_lowest_boundary_is_unresolved() {
        let cache = letter_scale();
        assert_eq!(cache.resolve(Some("Letter"), Some(65.0)), None);
    }

    #[test]
    fn missing_scale_or_score_is_unresolved() {
        let cache = letter_scale();
        assert_eq!(cache.resolve(None, Some(95.0)), None);
        assert_eq!(cache.resolve(Some("Letter"), None), None);
        assert_eq!(cache.resolve(Some("Unknown"), Some(95.0)), None);
        assert!(!cache.contains("Unknown"));
    }

    #[test]
    fn keeps_scales_separate() {
        let cache = GradeScaleCache::new(vec![
            interval("Letter", 90.0, "A"),
            interval("Band", 0.0, "Beginning"),
            interval("Band", 50.0, "Developing"),
        ]);
        assert_eq!(cache.resolve(Some("Band"), Some(92.0)).as_deref(), Some("Developing"));
        assert_eq!(cache.resolve(Some("Letter"), Some(92.0)).as_deref(), Some("A"));
    }
}
