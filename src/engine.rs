use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::{self, EnrollmentIndex};
use crate::eligibility;
use crate::error::{CycleConfigError, EngineError};
use crate::grade_scale::GradeScaleCache;
use crate::models::{RecalculateSummary, ReportingCycle, RollupSummary, Stamp};
use crate::policy::PolicySettings;
use crate::reconcile;
use crate::rollup;
use crate::store::TermStore;

/// Loads a cycle and checks it is scoped well enough to aggregate.
pub async fn load_cycle<S: TermStore>(
    store: &S,
    cycle_id: Uuid,
    require_calculable: bool,
) -> Result<ReportingCycle, EngineError> {
    let cycle = store
        .load_cycle(cycle_id)
        .await?
        .ok_or(CycleConfigError::NotFound(cycle_id))?;
    validate_cycle(&cycle, require_calculable)?;
    Ok(cycle)
}

pub fn validate_cycle(
    cycle: &ReportingCycle,
    require_calculable: bool,
) -> Result<(), CycleConfigError> {
    let required = [
        ("school", &cycle.school),
        ("academic_year", &cycle.academic_year),
        ("term", &cycle.term),
    ];
    for (field, value) in required {
        if value.as_deref().map_or(true, |value| value.trim().is_empty()) {
            return Err(CycleConfigError::MissingField {
                cycle: cycle.id,
                field,
            });
        }
    }

    if require_calculable && !cycle.status.allows_calculation() {
        return Err(CycleConfigError::StatusNotEligible {
            cycle: cycle.id,
            status: cycle.status,
        });
    }

    Ok(())
}

/// Recomputes every course term result of the cycle and writes only what changed.
pub async fn recalculate_course_term_results<S: TermStore>(
    store: &S,
    cycle_id: Uuid,
    actor: &str,
) -> Result<RecalculateSummary, EngineError> {
    let cycle = load_cycle(store, cycle_id, true).await?;
    info!(cycle = %cycle.id, name = %cycle.name, "recalculating course term results");

    let candidates = store.candidate_outcomes(&cycle).await?;
    let pairings = store.enrollment_courses(&cycle).await?;
    let index = EnrollmentIndex::for_cycle(&cycle, &pairings);
    let settings = PolicySettings::from(&cycle);
    debug!(
        cycle = %cycle.id,
        candidates = candidates.len(),
        pairings = index.len(),
        "loaded aggregation inputs"
    );

    let aggregation = aggregate::aggregate(
        eligibility::eligible_outcomes(&cycle, &candidates),
        &settings,
        &index,
    );

    let scale_ids: Vec<String> = aggregation
        .buckets
        .values()
        .filter_map(|bucket| bucket.effective_grade_scale())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect();
    let scales = GradeScaleCache::new(store.grade_scale_intervals(&scale_ids).await?);
    for scale in scale_ids.iter().filter(|scale| !scales.contains(scale)) {
        warn!(grade_scale = %scale, "grade scale has no intervals; grades left blank");
    }

    let existing = store.course_term_results(cycle.id).await?;
    let stamp = Stamp {
        at: Utc::now(),
        by: actor.to_string(),
    };
    let plan = reconcile::plan(cycle.id, &aggregation, &existing, &scales, stamp);

    if !plan.is_empty() {
        store.apply_plan(&plan).await?;
    }

    let summary = plan.summary(aggregation.dropped);
    info!(
        cycle = %cycle.id,
        candidates = candidates.len(),
        buckets = summary.buckets,
        created = summary.created,
        updated = summary.updated,
        cleared = summary.cleared,
        dropped = summary.dropped,
        "course term results reconciled"
    );
    Ok(summary)
}

/// Regroups the cycle's course term results into student term reports.
pub async fn generate_student_term_reports<S: TermStore>(
    store: &S,
    cycle_id: Uuid,
    actor: &str,
) -> Result<RollupSummary, EngineError> {
    let cycle = load_cycle(store, cycle_id, true).await?;

    let results = store.course_term_results(cycle.id).await?;
    if results.is_empty() {
        info!(cycle = %cycle.id, "no course term results; nothing to roll up");
        return Ok(RollupSummary::default());
    }

    let enrollment_ids: Vec<Uuid> = results
        .iter()
        .map(|result| result.program_enrollment)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let enrollments: HashMap<_, _> = store
        .program_enrollments(&enrollment_ids)
        .await?
        .into_iter()
        .map(|enrollment| (enrollment.id, enrollment))
        .collect();
    let existing = store.student_term_reports(cycle.id).await?;

    let stamp = Stamp {
        at: Utc::now(),
        by: actor.to_string(),
    };
    let reports = rollup::build_reports(cycle.id, &results, &enrollments, &existing, &stamp);
    for report in &reports {
        store.save_student_term_report(report).await?;
    }

    info!(cycle = %cycle.id, reports = reports.len(), "student term reports generated");
    Ok(RollupSummary {
        reports: reports.len(),
    })
}

/// Marks every draft report of the cycle as finalized.
pub async fn finalize_student_term_reports<S: TermStore>(
    store: &S,
    cycle_id: Uuid,
    actor: &str,
) -> Result<usize, EngineError> {
    let cycle = load_cycle(store, cycle_id, false).await?;
    let mut reports = store.student_term_reports(cycle.id).await?;
    let stamp = Stamp {
        at: Utc::now(),
        by: actor.to_string(),
    };

    let before: Vec<_> = reports.iter().map(|report| report.status).collect();
    let candidates = rollup::finalize(&mut reports, &stamp);
    let mut finalized = 0;
    for (report, status) in reports.iter().zip(before) {
        if report.status != status && store.finalize_student_term_report(report).await? {
            finalized += 1;
        }
    }
    if finalized < candidates {
        debug!(
            cycle = %cycle.id,
            candidates,
            finalized,
            "reports left draft state before they could be finalized"
        );
    }

    info!(cycle = %cycle.id, finalized, "student term reports finalized");
    Ok(finalized)
}
