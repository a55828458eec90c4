use crate::models::{
    AbsencePolicy, DishonestyPolicy, GradingMode, Outcome, ProceduralStatus, ReportingCycle,
    RubricStrategy,
};

pub const NOTE_DISHONESTY_ZERO: &str = "Dishonesty forced zero";
pub const NOTE_ABSENT_MISSING: &str = "Absent (missing)";
pub const NOTE_CRITERIA_ONLY: &str = "Criteria-only outcome";
pub const NOTE_CRITERIA_ONLY_EMPTY: &str = "Criteria-only outcome (no criterion scores)";

/// The policy settings of a cycle that affect individual outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicySettings {
    pub exclude_excused: bool,
    pub absence: AbsencePolicy,
    pub dishonesty: DishonestyPolicy,
}

impl From<&ReportingCycle> for PolicySettings {
    fn from(cycle: &ReportingCycle) -> Self {
        Self {
            exclude_excused: cycle.exclude_excused,
            absence: cycle.absence_policy,
            dishonesty: cycle.dishonesty_policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    /// Invisible to totals and to the task-counted tally.
    Exclude,
    Contribute(Contribution),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub value: f64,
    pub weight: f64,
    pub note: Option<&'static str>,
}

fn contribute(value: f64, weight: f64, note: Option<&'static str>) -> PolicyDecision {
    PolicyDecision::Contribute(Contribution { value, weight, note })
}

/// Decides how one outcome feeds its course aggregate. First matching rule wins.
pub fn evaluate(outcome: &Outcome, settings: &PolicySettings) -> PolicyDecision {
    match outcome.procedural_status {
        ProceduralStatus::Excused if settings.exclude_excused => return PolicyDecision::Exclude,
        ProceduralStatus::AcademicDishonesty => {
            return match settings.dishonesty {
                DishonestyPolicy::Exclude => PolicyDecision::Exclude,
                DishonestyPolicy::ForceZero => contribute(0.0, 1.0, Some(NOTE_DISHONESTY_ZERO)),
            };
        }
        ProceduralStatus::Absent => {
            return match settings.absence {
                AbsencePolicy::Exclude => PolicyDecision::Exclude,
                AbsencePolicy::CountAsZero => contribute(0.0, 1.0, None),
                AbsencePolicy::IncludeAsMissing => {
                    contribute(0.0, 0.0, Some(NOTE_ABSENT_MISSING))
                }
            };
        }
        ProceduralStatus::Excused | ProceduralStatus::None => {}
    }

    if outcome.grading_mode == GradingMode::Criteria
        && outcome.rubric_strategy == RubricStrategy::PerCriterionOnly
    {
        let note = if outcome.criterion_score_count > 0 {
            NOTE_CRITERIA_ONLY
        } else {
            NOTE_CRITERIA_ONLY_EMPTY
        };
        return contribute(0.0, 0.0, Some(note));
    }

    match base_numeric(outcome) {
        Some(value) => contribute(value, 1.0, None),
        None => PolicyDecision::Exclude,
    }
}

/// Official score first, then the grade-scale-derived value.
fn base_numeric(outcome: &Outcome) -> Option<f64> {
    outcome
        .official_score
        .as_deref()
        .and_then(parse_numeric)
        .or_else(|| {
            outcome
                .official_grade_numeric
                .as_deref()
                .and_then(parse_numeric)
        })
}

/// Lenient numeric parse; anything unparseable or non-finite counts as absent.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}
