use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::eligibility;
use crate::models::{EnrollmentCourse, Outcome, ReportingCycle};
use crate::policy::{self, PolicyDecision, PolicySettings};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub program_enrollment: Uuid,
    pub course: String,
}

/// Per-run accumulation for one (enrollment, course) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateBucket {
    pub student: String,
    pub numeric_total: f64,
    pub scored_weight: f64,
    pub task_counted: i32,
    pub notes: BTreeSet<String>,
    pub grade_scale: Option<String>,
    pub grade_scale_conflict: bool,
}

impl AggregateBucket {
    pub fn numeric_score(&self) -> Option<f64> {
        if self.scored_weight > 0.0 {
            Some(self.numeric_total / self.scored_weight)
        } else {
            None
        }
    }

    /// Scale usable for grade resolution; a conflicted bucket has none.
    pub fn effective_grade_scale(&self) -> Option<&str> {
        if self.grade_scale_conflict {
            None
        } else {
            self.grade_scale.as_deref()
        }
    }

    fn track_grade_scale(&mut self, scale: Option<&str>) -> bool {
        let Some(scale) = scale else {
            return false;
        };
        match self.grade_scale.as_deref() {
            None => {
                self.grade_scale = Some(scale.to_string());
                false
            }
            Some(current) if current != scale && !self.grade_scale_conflict => {
                self.grade_scale_conflict = true;
                true
            }
            Some(_) => false,
        }
    }
}

/// Resolves (student, course) to the program enrollment it is taught under.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentIndex {
    pairs: HashMap<(String, String), Uuid>,
}

impl EnrollmentIndex {
    /// When a student holds the same course under several enrollments the
    /// lowest enrollment id wins, so repeated runs land in the same bucket.
    pub fn new<'a>(pairings: impl IntoIterator<Item = &'a EnrollmentCourse>) -> Self {
        let mut pairs: HashMap<(String, String), Uuid> = HashMap::new();
        for pairing in pairings {
            let key = (pairing.student.clone(), pairing.course.clone());
            pairs
                .entry(key)
                .and_modify(|current| {
                    if pairing.program_enrollment < *current {
                        *current = pairing.program_enrollment;
                    }
                })
                .or_insert(pairing.program_enrollment);
        }
        Self { pairs }
    }

    /// Index over the pairings that fall inside `cycle`'s scope only.
    pub fn for_cycle(cycle: &ReportingCycle, pairings: &[EnrollmentCourse]) -> Self {
        Self::new(
            pairings
                .iter()
                .filter(|pairing| eligibility::pairing_in_scope(cycle, pairing)),
        )
    }

    pub fn resolve(&self, student: &str, course: &str) -> Option<Uuid> {
        self.pairs
            .get(&(student.to_string(), course.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub buckets: BTreeMap<BucketKey, AggregateBucket>,
    /// Outcomes that survived policy but had no enrollment pairing.
    pub dropped: usize,
}

pub fn aggregate<'a>(
    outcomes: impl IntoIterator<Item = &'a Outcome>,
    settings: &PolicySettings,
    index: &EnrollmentIndex,
) -> Aggregation {
    let mut aggregation = Aggregation::default();

    for outcome in outcomes {
        let contribution = match policy::evaluate(outcome, settings) {
            PolicyDecision::Exclude => continue,
            PolicyDecision::Contribute(contribution) => contribution,
        };
        let Some(course) = outcome.course.as_deref() else {
            continue;
        };
        let Some(program_enrollment) = index.resolve(&outcome.student, course) else {
            debug!(
                outcome = %outcome.id,
                task = %outcome.task,
                student = %outcome.student,
                course,
                "no enrollment pairing for outcome; dropped"
            );
            aggregation.dropped += 1;
            continue;
        };

        let key = BucketKey {
            program_enrollment,
            course: course.to_string(),
        };
        let bucket = aggregation
            .buckets
            .entry(key)
            .or_insert_with(|| AggregateBucket {
                student: outcome.student.clone(),
                ..AggregateBucket::default()
            });

        bucket.task_counted += 1;
        if contribution.weight > 0.0 {
            bucket.numeric_total += contribution.value;
            bucket.scored_weight += contribution.weight;
        }
        if let Some(note) = contribution.note {
            bucket.notes.insert(note.to_string());
        }
        if bucket.track_grade_scale(outcome.grade_scale.as_deref()) {
            warn!(
                %program_enrollment,
                course,
                first = bucket.grade_scale.as_deref().unwrap_or_default(),
                second = outcome.grade_scale.as_deref().unwrap_or_default(),
                "grade scale conflict within course bucket"
            );
        }
    }

    aggregation
}
