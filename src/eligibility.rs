use chrono::NaiveDate;

use crate::models::{EnrollmentCourse, GradingStatus, Outcome, ReleasedRule, ReportingCycle};

/// Yields the outcomes that qualify for aggregation in `cycle`.
///
/// The store hands over a coarse candidate set; every scoping rule is
/// re-checked here so the filter holds regardless of how the rows were fetched.
pub fn eligible_outcomes<'a>(
    cycle: &'a ReportingCycle,
    outcomes: &'a [Outcome],
) -> impl Iterator<Item = &'a Outcome> + 'a {
    outcomes
        .iter()
        .filter(move |outcome| is_eligible(cycle, outcome))
}

pub fn is_eligible(cycle: &ReportingCycle, outcome: &Outcome) -> bool {
    if cycle.school.as_deref() != Some(outcome.school.as_str())
        || cycle.academic_year.as_deref() != Some(outcome.academic_year.as_str())
    {
        return false;
    }

    if let Some(program) = cycle.program.as_deref() {
        if outcome.program.as_deref() != Some(program) {
            return false;
        }
    }

    if outcome
        .course
        .as_deref()
        .map_or(true, |course| course.trim().is_empty())
    {
        return false;
    }

    if !satisfies_released_rule(cycle.released_rule, outcome.grading_status) {
        return false;
    }

    match cycle.task_cutoff_date {
        Some(cutoff) => within_cutoff(cutoff, outcome.due_date, outcome.lock_date),
        None => true,
    }
}

/// Whether a course pairing can carry outcomes for `cycle`: active, under a
/// program enrollment of the cycle's school and year, and of its program when
/// the cycle is program-scoped.
pub fn pairing_in_scope(cycle: &ReportingCycle, pairing: &EnrollmentCourse) -> bool {
    pairing.active
        && cycle.school.as_deref() == Some(pairing.school.as_str())
        && cycle.academic_year.as_deref() == Some(pairing.academic_year.as_str())
        && cycle
            .program
            .as_deref()
            .map_or(true, |program| program == pairing.program)
}

fn satisfies_released_rule(rule: ReleasedRule, status: GradingStatus) -> bool {
    match rule {
        ReleasedRule::ReleasedOnly => status == GradingStatus::Released,
        ReleasedRule::FinalizedOrReleased => {
            matches!(status, GradingStatus::Finalized | GradingStatus::Released)
        }
    }
}

// The lock date only stands in when the task has no due date.
fn within_cutoff(cutoff: NaiveDate, due: Option<NaiveDate>, lock: Option<NaiveDate>) -> bool {
    match (due, lock) {
        (Some(due), _) => due <= cutoff,
        (None, Some(lock)) => lock <= cutoff,
        (None, None) => false,
    }
}
