use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    CourseTermResult, EnrollmentCourse, GradeScaleInterval, Outcome, ProgramEnrollment,
    ReportingCycle, StudentTermReport,
};
use crate::reconcile::ReconcilePlan;

/// Storage abstraction so the engine can be exercised without Postgres.
///
/// Implementations must apply a [`ReconcilePlan`] as one unit: either every
/// create, update and clear lands, or none do.
#[allow(async_fn_in_trait)]
pub trait TermStore {
    async fn load_cycle(&self, id: Uuid) -> Result<Option<ReportingCycle>, StoreError>;

    /// Outcomes for the cycle's school and academic year; finer filtering is
    /// left to the eligibility filter.
    async fn candidate_outcomes(&self, cycle: &ReportingCycle) -> Result<Vec<Outcome>, StoreError>;

    async fn enrollment_courses(
        &self,
        cycle: &ReportingCycle,
    ) -> Result<Vec<EnrollmentCourse>, StoreError>;

    async fn grade_scale_intervals(
        &self,
        scales: &[String],
    ) -> Result<Vec<GradeScaleInterval>, StoreError>;

    async fn course_term_results(&self, cycle: Uuid) -> Result<Vec<CourseTermResult>, StoreError>;

    async fn apply_plan(&self, plan: &ReconcilePlan) -> Result<(), StoreError>;

    async fn program_enrollments(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<ProgramEnrollment>, StoreError>;

    async fn student_term_reports(
        &self,
        cycle: Uuid,
    ) -> Result<Vec<StudentTermReport>, StoreError>;

    /// Upserts a report and replaces its course rows. A stored report keeps its
    /// status and any finalization stamp it already has.
    async fn save_student_term_report(&self, report: &StudentTermReport) -> Result<(), StoreError>;

    /// Writes the status and finalization stamp of a report that is still a
    /// draft in the store; returns whether a row changed.
    async fn finalize_student_term_report(
        &self,
        report: &StudentTermReport,
    ) -> Result<bool, StoreError>;
}
