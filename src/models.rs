use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Raised when a stored text column does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a field-less enum persisted as a text column.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(
    /// Lifecycle state of a reporting cycle.
    CycleStatus, "cycle status" {
        Draft => "draft",
        Open => "open",
        Calculated => "calculated",
        Locked => "locked",
        Published => "published",
        Archived => "archived",
    }
);

impl CycleStatus {
    pub fn allows_calculation(&self) -> bool {
        matches!(self, Self::Draft | Self::Open | Self::Calculated)
    }
}

text_enum!(
    /// Which grading statuses qualify an outcome for aggregation.
    ReleasedRule, "released rule" {
        ReleasedOnly => "released_only",
        FinalizedOrReleased => "finalized_or_released",
    }
);

text_enum!(
    AbsencePolicy, "absence policy" {
        Exclude => "exclude",
        CountAsZero => "count_as_zero",
        IncludeAsMissing => "include_as_missing",
    }
);

text_enum!(
    DishonestyPolicy, "dishonesty policy" {
        ForceZero => "force_zero",
        Exclude => "exclude",
    }
);

text_enum!(
    GradingMode, "grading mode" {
        Numeric => "numeric",
        Criteria => "criteria",
    }
);

text_enum!(
    /// How a criteria-graded task feeds the course aggregate.
    RubricStrategy, "rubric strategy" {
        SumTotal => "sum_total",
        PerCriterionOnly => "per_criterion_only",
    }
);

text_enum!(
    GradingStatus, "grading status" {
        Pending => "pending",
        Finalized => "finalized",
        Released => "released",
    }
);

text_enum!(
    ProceduralStatus, "procedural status" {
        None => "none",
        Excused => "excused",
        Absent => "absent",
        AcademicDishonesty => "academic_dishonesty",
    }
);

text_enum!(
    ReportStatus, "report status" {
        Draft => "draft",
        Finalized => "finalized",
        Published => "published",
    }
);

impl ReportStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Finalized | Self::Published)
    }
}

/// Scope and policy configuration for one round of aggregation.
#[derive(Debug, Clone)]
pub struct ReportingCycle {
    pub id: Uuid,
    pub name: String,
    pub school: Option<String>,
    pub academic_year: Option<String>,
    pub term: Option<String>,
    pub program: Option<String>,
    pub status: CycleStatus,
    pub task_cutoff_date: Option<NaiveDate>,
    pub released_rule: ReleasedRule,
    pub absence_policy: AbsencePolicy,
    pub dishonesty_policy: DishonestyPolicy,
    pub exclude_excused: bool,
}

/// One student's result on one task, as read from the store.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub id: Uuid,
    pub student: String,
    pub course: Option<String>,
    pub program: Option<String>,
    pub school: String,
    pub academic_year: String,
    pub task: String,
    pub grading_mode: GradingMode,
    pub rubric_strategy: RubricStrategy,
    pub grading_status: GradingStatus,
    /// Raw score text; parsed leniently at aggregation time.
    pub official_score: Option<String>,
    pub official_grade_numeric: Option<String>,
    pub grade_scale: Option<String>,
    pub procedural_status: ProceduralStatus,
    pub due_date: Option<NaiveDate>,
    pub lock_date: Option<NaiveDate>,
    pub criterion_score_count: i64,
}

/// A course enrollment under a program enrollment, with the program
/// enrollment's scoping copied alongside.
#[derive(Debug, Clone)]
pub struct EnrollmentCourse {
    pub program_enrollment: Uuid,
    pub student: String,
    pub course: String,
    pub school: String,
    pub academic_year: String,
    pub program: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct ProgramEnrollment {
    pub id: Uuid,
    pub student: String,
    pub program: String,
    pub academic_year: String,
    pub school: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeScaleInterval {
    pub grade_scale: String,
    pub boundary: f64,
    pub label: String,
}

/// Persisted per-course result for one program enrollment in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseTermResult {
    pub id: Uuid,
    pub reporting_cycle: Uuid,
    pub program_enrollment: Uuid,
    pub student: String,
    pub course: String,
    pub numeric_score: Option<f64>,
    pub grade_value: Option<String>,
    pub grade_scale: Option<String>,
    pub task_counted: i32,
    pub total_weight: f64,
    pub internal_note: Option<String>,
    pub calculated_on: Option<DateTime<Utc>>,
    pub calculated_by: Option<String>,
    // Owned by teachers and coordinators; never written by the engine.
    pub teacher_comment: Option<String>,
    pub override_grade_value: Option<String>,
    pub is_override: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentTermReport {
    pub id: Uuid,
    pub reporting_cycle: Uuid,
    pub student: String,
    pub program_enrollment: Uuid,
    pub program: String,
    pub academic_year: String,
    pub school: String,
    pub status: ReportStatus,
    pub finalized_on: Option<DateTime<Utc>>,
    pub finalized_by: Option<String>,
    pub generated_on: Option<DateTime<Utc>>,
    pub courses: Vec<ReportCourseRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportCourseRow {
    pub course_term_result: Uuid,
    pub course: String,
    pub grade_value: Option<String>,
    pub numeric_score: Option<f64>,
    pub is_override: bool,
    pub teacher_comment: Option<String>,
}

/// Who wrote a computed value, and when.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamp {
    pub at: DateTime<Utc>,
    pub by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecalculateSummary {
    pub updated: usize,
    pub created: usize,
    pub buckets: usize,
    pub cleared: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollupSummary {
    pub reports: usize,
}
