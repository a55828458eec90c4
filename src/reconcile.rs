use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

use crate::aggregate::{AggregateBucket, Aggregation, BucketKey};
use crate::grade_scale::GradeScaleCache;
use crate::models::{CourseTermResult, RecalculateSummary, Stamp};

pub const NOTE_SCALE_MISMATCH: &str = "Grade scale mismatch";
pub const NOTE_NO_ELIGIBLE: &str = "No eligible outcomes";

const SCORE_TOLERANCE: f64 = 1e-9;

/// The engine-owned fields of a course term result.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedPayload {
    pub numeric_score: Option<f64>,
    pub grade_value: Option<String>,
    pub grade_scale: Option<String>,
    pub task_counted: i32,
    pub total_weight: f64,
    pub internal_note: Option<String>,
}

impl ComputedPayload {
    pub fn from_bucket(bucket: &AggregateBucket, scales: &GradeScaleCache) -> Self {
        let numeric_score = bucket.numeric_score();
        let grade_scale = bucket.effective_grade_scale().map(str::to_string);
        let grade_value = scales.resolve(grade_scale.as_deref(), numeric_score);

        let mut notes: BTreeSet<&str> = bucket.notes.iter().map(String::as_str).collect();
        if bucket.grade_scale_conflict {
            notes.insert(NOTE_SCALE_MISMATCH);
        }
        let internal_note = if notes.is_empty() {
            None
        } else {
            Some(notes.into_iter().collect::<Vec<_>>().join("; "))
        };

        Self {
            numeric_score,
            grade_value,
            grade_scale,
            task_counted: bucket.task_counted,
            total_weight: bucket.scored_weight,
            internal_note,
        }
    }

    pub fn cleared() -> Self {
        Self {
            numeric_score: None,
            grade_value: None,
            grade_scale: None,
            task_counted: 0,
            total_weight: 0.0,
            internal_note: Some(NOTE_NO_ELIGIBLE.to_string()),
        }
    }

    pub fn of(row: &CourseTermResult) -> Self {
        Self {
            numeric_score: row.numeric_score,
            grade_value: row.grade_value.clone(),
            grade_scale: row.grade_scale.clone(),
            task_counted: row.task_counted,
            total_weight: row.total_weight,
            internal_note: row.internal_note.clone(),
        }
    }

    /// Field-by-field comparison, tolerant of float noise from storage.
    pub fn matches(&self, other: &Self) -> bool {
        close_opt(self.numeric_score, other.numeric_score)
            && close(self.total_weight, other.total_weight)
            && self.grade_value == other.grade_value
            && self.grade_scale == other.grade_scale
            && self.task_counted == other.task_counted
            && self.internal_note == other.internal_note
    }

    /// Copies the computed fields onto `row`, leaving comment and override alone.
    pub fn write_onto(&self, row: &mut CourseTermResult, stamp: &Stamp) {
        row.numeric_score = self.numeric_score;
        row.grade_value = self.grade_value.clone();
        row.grade_scale = self.grade_scale.clone();
        row.task_counted = self.task_counted;
        row.total_weight = self.total_weight;
        row.internal_note = self.internal_note.clone();
        row.calculated_on = Some(stamp.at);
        row.calculated_by = Some(stamp.by.clone());
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= SCORE_TOLERANCE
}

fn close_opt(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => close(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub id: Uuid,
    pub payload: ComputedPayload,
}

/// Every write one recalculation intends to make, applied as a single batch.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub stamp: Stamp,
    pub creates: Vec<CourseTermResult>,
    pub updates: Vec<RowUpdate>,
    pub clears: Vec<RowUpdate>,
    pub buckets: usize,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.clears.is_empty()
    }

    pub fn summary(&self, dropped: usize) -> RecalculateSummary {
        RecalculateSummary {
            updated: self.updates.len() + self.clears.len(),
            created: self.creates.len(),
            buckets: self.buckets,
            cleared: self.clears.len(),
            dropped,
        }
    }
}

/// Diffs freshly computed buckets against the rows already stored for the cycle.
pub fn plan(
    reporting_cycle: Uuid,
    aggregation: &Aggregation,
    existing: &[CourseTermResult],
    scales: &GradeScaleCache,
    stamp: Stamp,
) -> ReconcilePlan {
    let by_key: HashMap<BucketKey, &CourseTermResult> = existing
        .iter()
        .map(|row| {
            let key = BucketKey {
                program_enrollment: row.program_enrollment,
                course: row.course.clone(),
            };
            (key, row)
        })
        .collect();

    let mut plan = ReconcilePlan {
        stamp,
        creates: Vec::new(),
        updates: Vec::new(),
        clears: Vec::new(),
        buckets: aggregation.buckets.len(),
    };

    for (key, bucket) in &aggregation.buckets {
        let payload = ComputedPayload::from_bucket(bucket, scales);
        match by_key.get(key) {
            None => {
                let mut row = CourseTermResult {
                    id: Uuid::new_v4(),
                    reporting_cycle,
                    program_enrollment: key.program_enrollment,
                    student: bucket.student.clone(),
                    course: key.course.clone(),
                    numeric_score: None,
                    grade_value: None,
                    grade_scale: None,
                    task_counted: 0,
                    total_weight: 0.0,
                    internal_note: None,
                    calculated_on: None,
                    calculated_by: None,
                    teacher_comment: None,
                    override_grade_value: None,
                    is_override: false,
                };
                payload.write_onto(&mut row, &plan.stamp);
                plan.creates.push(row);
            }
            Some(row) if ComputedPayload::of(row).matches(&payload) => {}
            Some(row) => plan.updates.push(RowUpdate { id: row.id, payload }),
        }
    }

    let cleared = ComputedPayload::cleared();
    for row in existing {
        let key = BucketKey {
            program_enrollment: row.program_enrollment,
            course: row.course.clone(),
        };
        if aggregation.buckets.contains_key(&key) {
            continue;
        }
        if !ComputedPayload::of(row).matches(&cleared) {
            plan.clears.push(RowUpdate {
                id: row.id,
                payload: cleared.clone(),
            });
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GradeScaleInterval;
    use chrono::Utc;

    fn stamp() -> Stamp {
        Stamp {
            at: Utc::now(),
            by: "registrar".to_string(),
        }
    }

    fn scales() -> GradeScaleCache {
        GradeScaleCache::new(vec![
            GradeScaleInterval {
                grade_scale: "Letter".to_string(),
                boundary: 90.0,
                label: "A".to_string(),
            },
            GradeScaleInterval {
                grade_scale: "Letter".to_string(),
                boundary: 70.0,
                label: "B-".to_string(),
            },
        ])
    }

    fn bucket(total: f64, weight: f64, counted: i32) -> AggregateBucket {
        AggregateBucket {
            student: "STU-1".to_string(),
            numeric_total: total,
            scored_weight: weight,
            task_counted: counted,
            grade_scale: Some("Letter".to_string()),
            ..AggregateBucket::default()
        }
    }

    fn aggregation_of(entries: Vec<(BucketKey, AggregateBucket)>) -> Aggregation {
        Aggregation {
            buckets: entries.into_iter().collect(),
            dropped: 0,
        }
    }

    fn key(course: &str) -> BucketKey {
        BucketKey {
            program_enrollment: Uuid::from_u128(7),
            course: course.to_string(),
        }
    }

    fn apply(plan: &ReconcilePlan, rows: &mut Vec<CourseTermResult>) {
        rows.extend(plan.creates.iter().cloned());
        for update in plan.updates.iter().chain(&plan.clears) {
            let row = rows
                .iter_mut()
                .find(|row| row.id == update.id)
                .expect("row exists");
            update.payload.write_onto(row, &plan.stamp);
        }
    }

    #[test]
    fn creates_then_settles() {
        let cycle = Uuid::new_v4();
        let aggregation = aggregation_of(vec![(key("MATH9"), bucket(150.0, 2.0, 2))]);

        let first = plan(cycle, &aggregation, &[], &scales(), stamp());
        assert_eq!(first.creates.len(), 1);
        let created = &first.creates[0];
        assert_eq!(created.numeric_score, Some(75.0));
        assert_eq!(created.grade_value.as_deref(), Some("B-"));
        assert_eq!(created.calculated_by.as_deref(), Some("registrar"));

        let mut rows = Vec::new();
        apply(&first, &mut rows);
        let second = plan(cycle, &aggregation, &rows, &scales(), stamp());
        assert!(second.is_empty());
        assert_eq!(second.summary(0).buckets, 1);
    }

    #[test]
    fn updates_only_computed_fields() {
        let cycle = Uuid::new_v4();
        let aggregation = aggregation_of(vec![(key("MATH9"), bucket(150.0, 2.0, 2))]);
        let mut rows = Vec::new();
        apply(&plan(cycle, &aggregation, &[], &scales(), stamp()), &mut rows);
        rows[0].teacher_comment = Some("Steady progress".to_string());
        rows[0].override_grade_value = Some("B".to_string());
        rows[0].is_override = true;

        let changed = aggregation_of(vec![(key("MATH9"), bucket(280.0, 3.0, 3))]);
        let next = plan(cycle, &changed, &rows, &scales(), stamp());
        assert_eq!(next.updates.len(), 1);
        apply(&next, &mut rows);

        let row = &rows[0];
        assert_eq!(row.task_counted, 3);
        assert_eq!(row.grade_value.as_deref(), Some("A"));
        assert_eq!(row.teacher_comment.as_deref(), Some("Steady progress"));
        assert_eq!(row.override_grade_value.as_deref(), Some("B"));
        assert!(row.is_override);
    }

    #[test]
    fn conflicted_bucket_has_no_scale_or_grade() {
        let mut conflicted = bucket(180.0, 2.0, 2);
        conflicted.grade_scale_conflict = true;
        conflicted.notes.insert("Absent (missing)".to_string());

        let payload = ComputedPayload::from_bucket(&conflicted, &scales());
        assert_eq!(payload.grade_scale, None);
        assert_eq!(payload.grade_value, None);
        assert_eq!(payload.numeric_score, Some(90.0));
        assert_eq!(
            payload.internal_note.as_deref(),
            Some("Absent (missing); Grade scale mismatch")
        );
    }

    #[test]
    fn zero_weight_bucket_has_null_score() {
        let mut empty = bucket(0.0, 0.0, 1);
        empty.notes.insert("Criteria-only outcome".to_string());
        let payload = ComputedPayload::from_bucket(&empty, &scales());
        assert_eq!(payload.numeric_score, None);
        assert_eq!(payload.grade_value, None);
        assert_eq!(payload.task_counted, 1);
    }

    #[test]
    fn vanished_bucket_is_cleared_once() {
        let cycle = Uuid::new_v4();
        let aggregation = aggregation_of(vec![(key("MATH9"), bucket(150.0, 2.0, 2))]);
        let mut rows = Vec::new();
        apply(&plan(cycle, &aggregation, &[], &scales(), stamp()), &mut rows);

        let empty = Aggregation::default();
        let clearing = plan(cycle, &empty, &rows, &scales(), stamp());
        assert_eq!(clearing.clears.len(), 1);
        assert_eq!(clearing.summary(0).updated, 1);
        apply(&clearing, &mut rows);

        let row = &rows[0];
        assert_eq!(row.numeric_score, None);
        assert_eq!(row.grade_value, None);
        assert_eq!(row.task_counted, 0);
        assert_eq!(row.total_weight, 0.0);
        assert_eq!(row.internal_note.as_deref(), Some(NOTE_NO_ELIGIBLE));

        let again = plan(cycle, &empty, &rows, &scales(), stamp());
        assert!(again.is_empty());
    }

    #[test]
    fn tolerates_float_noise() {
        let stored = ComputedPayload {
            numeric_score: Some(81.333_333_333_333_3),
            grade_value: Some("B-".to_string()),
            grade_scale: Some("Letter".to_string()),
            task_counted: 3,
            total_weight: 3.0,
            internal_note: None,
        };
        let mut fresh = stored.clone();
        fresh.numeric_score = Some(244.0 / 3.0);
        assert!(stored.matches(&fresh));

        fresh.numeric_score = Some(81.4);
        assert!(!stored.matches(&fresh));
    }
}
