use std::collections::HashMap;
use std::str::FromStr;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    CourseTermResult, EnrollmentCourse, GradeScaleInterval, GradingMode, GradingStatus, Outcome,
    ProceduralStatus, ProgramEnrollment, ReportCourseRow, ReportingCycle, RubricStrategy,
    StudentTermReport, UnknownVariant,
};
use crate::reconcile::ReconcilePlan;
use crate::store::TermStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed record store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn text_column<T>(row: &PgRow, column: &'static str) -> Result<T, StoreError>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|source| StoreError::Decode { column, source })
}

fn cycle_from_row(row: &PgRow) -> Result<ReportingCycle, StoreError> {
    Ok(ReportingCycle {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        school: row.try_get("school")?,
        academic_year: row.try_get("academic_year")?,
        term: row.try_get("term")?,
        program: row.try_get("program")?,
        status: text_column(row, "status")?,
        task_cutoff_date: row.try_get("task_cutoff_date")?,
        released_rule: text_column(row, "released_rule")?,
        absence_policy: text_column(row, "absence_policy")?,
        dishonesty_policy: text_column(row, "dishonesty_policy")?,
        exclude_excused: row.try_get("exclude_excused")?,
    })
}

fn outcome_from_row(row: &PgRow) -> Result<Outcome, StoreError> {
    Ok(Outcome {
        id: row.try_get("id")?,
        student: row.try_get("student")?,
        course: row.try_get("course")?,
        program: row.try_get("program")?,
        school: row.try_get("school")?,
        academic_year: row.try_get("academic_year")?,
        task: row.try_get("task")?,
        grading_mode: text_column(row, "grading_mode")?,
        rubric_strategy: text_column(row, "rubric_strategy")?,
        grading_status: text_column(row, "grading_status")?,
        official_score: row.try_get("official_score")?,
        official_grade_numeric: row.try_get("official_grade_numeric")?,
        grade_scale: row.try_get("grade_scale")?,
        procedural_status: text_column(row, "procedural_status")?,
        due_date: row.try_get("due_date")?,
        lock_date: row.try_get("lock_date")?,
        criterion_score_count: row.try_get("criterion_score_count")?,
    })
}

fn result_from_row(row: &PgRow) -> Result<CourseTermResult, StoreError> {
    Ok(CourseTermResult {
        id: row.try_get("id")?,
        reporting_cycle: row.try_get("reporting_cycle")?,
        program_enrollment: row.try_get("program_enrollment")?,
        student: row.try_get("student")?,
        course: row.try_get("course")?,
        numeric_score: row.try_get("numeric_score")?,
        grade_value: row.try_get("grade_value")?,
        grade_scale: row.try_get("grade_scale")?,
        task_counted: row.try_get("task_counted")?,
        total_weight: row.try_get("total_weight")?,
        internal_note: row.try_get("internal_note")?,
        calculated_on: row.try_get("calculated_on")?,
        calculated_by: row.try_get("calculated_by")?,
        teacher_comment: row.try_get("teacher_comment")?,
        override_grade_value: row.try_get("override_grade_value")?,
        is_override: row.try_get("is_override")?,
    })
}

impl TermStore for PgStore {
    async fn load_cycle(&self, id: Uuid) -> Result<Option<ReportingCycle>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, school, academic_year, term, program, status, task_cutoff_date,
                   released_rule, absence_policy, dishonesty_policy, exclude_excused
            FROM term_reporting.reporting_cycles
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(cycle_from_row).transpose()
    }

    async fn candidate_outcomes(&self, cycle: &ReportingCycle) -> Result<Vec<Outcome>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.student, o.course, o.program, o.school, o.academic_year, o.task,
                   o.grading_mode, o.rubric_strategy, o.grading_status, o.official_score,
                   o.official_grade_numeric, o.grade_scale, o.procedural_status,
                   o.due_date, o.lock_date,
                   (SELECT COUNT(*) FROM term_reporting.outcome_criterion_scores c
                    WHERE c.outcome = o.id) AS criterion_score_count
            FROM term_reporting.outcomes o
            WHERE o.school = $1 AND o.academic_year = $2
            ORDER BY o.id
            "#,
        )
        .bind(cycle.school.as_deref())
        .bind(cycle.academic_year.as_deref())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(outcome_from_row).collect()
    }

    async fn enrollment_courses(
        &self,
        cycle: &ReportingCycle,
    ) -> Result<Vec<EnrollmentCourse>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ce.program_enrollment, pe.student, ce.course, pe.school, pe.academic_year,
                   pe.program, ce.active
            FROM term_reporting.course_enrollments ce
            JOIN term_reporting.program_enrollments pe ON pe.id = ce.program_enrollment
            WHERE ce.active
              AND pe.school = $1
              AND pe.academic_year = $2
              AND ($3::text IS NULL OR pe.program = $3)
            "#,
        )
        .bind(cycle.school.as_deref())
        .bind(cycle.academic_year.as_deref())
        .bind(cycle.program.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let mut pairings = Vec::with_capacity(rows.len());
        for row in rows {
            pairings.push(EnrollmentCourse {
                program_enrollment: row.try_get("program_enrollment")?,
                student: row.try_get("student")?,
                course: row.try_get("course")?,
                school: row.try_get("school")?,
                academic_year: row.try_get("academic_year")?,
                program: row.try_get("program")?,
                active: row.try_get("active")?,
            });
        }
        Ok(pairings)
    }

    async fn grade_scale_intervals(
        &self,
        scales: &[String],
    ) -> Result<Vec<GradeScaleInterval>, StoreError> {
        if scales.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT grade_scale, boundary, label
            FROM term_reporting.grade_scale_intervals
            WHERE grade_scale = ANY($1)
            "#,
        )
        .bind(scales)
        .fetch_all(&self.pool)
        .await?;

        let mut intervals = Vec::with_capacity(rows.len());
        for row in rows {
            intervals.push(GradeScaleInterval {
                grade_scale: row.try_get("grade_scale")?,
                boundary: row.try_get("boundary")?,
                label: row.try_get("label")?,
            });
        }
        Ok(intervals)
    }

    async fn course_term_results(&self, cycle: Uuid) -> Result<Vec<CourseTermResult>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, reporting_cycle, program_enrollment, student, course, numeric_score,
                   grade_value, grade_scale, task_counted, total_weight, internal_note,
                   calculated_on, calculated_by, teacher_comment, override_grade_value,
                   is_override
            FROM term_reporting.course_term_results
            WHERE reporting_cycle = $1
            ORDER BY program_enrollment, course
            "#,
        )
        .bind(cycle)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(result_from_row).collect()
    }

    // One transaction per plan: a failed row rolls back the batch and the
    // whole recalculation can simply be re-run.
    async fn apply_plan(&self, plan: &ReconcilePlan) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for row in &plan.creates {
            sqlx::query(
                r#"
                INSERT INTO term_reporting.course_term_results
                (id, reporting_cycle, program_enrollment, student, course, numeric_score,
                 grade_value, grade_scale, task_counted, total_weight, internal_note,
                 calculated_on, calculated_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (reporting_cycle, program_enrollment, course) DO UPDATE
                SET numeric_score = EXCLUDED.numeric_score,
                    grade_value = EXCLUDED.grade_value,
                    grade_scale = EXCLUDED.grade_scale,
                    task_counted = EXCLUDED.task_counted,
                    total_weight = EXCLUDED.total_weight,
                    internal_note = EXCLUDED.internal_note,
                    calculated_on = EXCLUDED.calculated_on,
                    calculated_by = EXCLUDED.calculated_by
                "#,
            )
            .bind(row.id)
            .bind(row.reporting_cycle)
            .bind(row.program_enrollment)
            .bind(&row.student)
            .bind(&row.course)
            .bind(row.numeric_score)
            .bind(&row.grade_value)
            .bind(&row.grade_scale)
            .bind(row.task_counted)
            .bind(row.total_weight)
            .bind(&row.internal_note)
            .bind(row.calculated_on)
            .bind(&row.calculated_by)
            .execute(&mut *tx)
            .await?;
        }

        for update in plan.updates.iter().chain(&plan.clears) {
            let payload = &update.payload;
            sqlx::query(
                r#"
                UPDATE term_reporting.course_term_results
                SET numeric_score = $2, grade_value = $3, grade_scale = $4,
                    task_counted = $5, total_weight = $6, internal_note = $7,
                    calculated_on = $8, calculated_by = $9
                WHERE id = $1
                "#,
            )
            .bind(update.id)
            .bind(payload.numeric_score)
            .bind(&payload.grade_value)
            .bind(&payload.grade_scale)
            .bind(payload.task_counted)
            .bind(payload.total_weight)
            .bind(&payload.internal_note)
            .bind(plan.stamp.at)
            .bind(&plan.stamp.by)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn program_enrollments(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<ProgramEnrollment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, student, program, academic_year, school
            FROM term_reporting.program_enrollments
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut enrollments = Vec::with_capacity(rows.len());
        for row in rows {
            enrollments.push(ProgramEnrollment {
                id: row.try_get("id")?,
                student: row.try_get("student")?,
                program: row.try_get("program")?,
                academic_year: row.try_get("academic_year")?,
                school: row.try_get("school")?,
            });
        }
        Ok(enrollments)
    }

    async fn student_term_reports(
        &self,
        cycle: Uuid,
    ) -> Result<Vec<StudentTermReport>, StoreError> {
        let course_rows = sqlx::query(
            r#"
            SELECT rc.report, rc.course_term_result, rc.course, rc.grade_value,
                   rc.numeric_score, rc.is_override, rc.teacher_comment
            FROM term_reporting.student_term_report_courses rc
            JOIN term_reporting.student_term_reports r ON r.id = rc.report
            WHERE r.reporting_cycle = $1
            ORDER BY rc.report, rc.position
            "#,
        )
        .bind(cycle)
        .fetch_all(&self.pool)
        .await?;

        let mut courses: HashMap<Uuid, Vec<ReportCourseRow>> = HashMap::new();
        for row in course_rows {
            let report: Uuid = row.try_get("report")?;
            courses.entry(report).or_default().push(ReportCourseRow {
                course_term_result: row.try_get("course_term_result")?,
                course: row.try_get("course")?,
                grade_value: row.try_get("grade_value")?,
                numeric_score: row.try_get("numeric_score")?,
                is_override: row.try_get("is_override")?,
                teacher_comment: row.try_get("teacher_comment")?,
            });
        }

        let rows = sqlx::query(
            r#"
            SELECT id, reporting_cycle, student, program_enrollment, program, academic_year,
                   school, status, finalized_on, finalized_by, generated_on
            FROM term_reporting.student_term_reports
            WHERE reporting_cycle = $1
            ORDER BY student, program_enrollment
            "#,
        )
        .bind(cycle)
        .fetch_all(&self.pool)
        .await?;

        let mut reports = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            reports.push(StudentTermReport {
                id,
                reporting_cycle: row.try_get("reporting_cycle")?,
                student: row.try_get("student")?,
                program_enrollment: row.try_get("program_enrollment")?,
                program: row.try_get("program")?,
                academic_year: row.try_get("academic_year")?,
                school: row.try_get("school")?,
                status: text_column(&row, "status")?,
                finalized_on: row.try_get("finalized_on")?,
                finalized_by: row.try_get("finalized_by")?,
                generated_on: row.try_get("generated_on")?,
                courses: courses.remove(&id).unwrap_or_default(),
            });
        }
        Ok(reports)
    }

    async fn save_student_term_report(&self, report: &StudentTermReport) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let report_id: Uuid = sqlx::query(
            r#"
            INSERT INTO term_reporting.student_term_reports
            (id, reporting_cycle, student, program_enrollment, program, academic_year, school,
             status, finalized_on, finalized_by, generated_on)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (reporting_cycle, student, program_enrollment) DO UPDATE
            SET program = EXCLUDED.program,
                academic_year = EXCLUDED.academic_year,
                school = EXCLUDED.school,
                finalized_on = COALESCE(term_reporting.student_term_reports.finalized_on,
                                        EXCLUDED.finalized_on),
                finalized_by = COALESCE(term_reporting.student_term_reports.finalized_by,
                                        EXCLUDED.finalized_by),
                generated_on = EXCLUDED.generated_on
            RETURNING id
            "#,
        )
        .bind(report.id)
        .bind(report.reporting_cycle)
        .bind(&report.student)
        .bind(report.program_enrollment)
        .bind(&report.program)
        .bind(&report.academic_year)
        .bind(&report.school)
        .bind(report.status.as_str())
        .bind(report.finalized_on)
        .bind(&report.finalized_by)
        .bind(report.generated_on)
        .fetch_one(&mut *tx)
        .await?
        .try_get("id")?;

        sqlx::query("DELETE FROM term_reporting.student_term_report_courses WHERE report = $1")
            .bind(report_id)
            .execute(&mut *tx)
            .await?;

        for (position, course) in report.courses.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO term_reporting.student_term_report_courses
                (report, position, course_term_result, course, grade_value, numeric_score,
                 is_override, teacher_comment)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(report_id)
            .bind(position as i32)
            .bind(course.course_term_result)
            .bind(&course.course)
            .bind(&course.grade_value)
            .bind(course.numeric_score)
            .bind(course.is_override)
            .bind(&course.teacher_comment)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn finalize_student_term_report(
        &self,
        report: &StudentTermReport,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE term_reporting.student_term_reports
            SET status = $2,
                finalized_on = COALESCE(finalized_on, $3),
                finalized_by = COALESCE(finalized_by, $4)
            WHERE id = $1 AND status = 'draft'
            "#,
        )
        .bind(report.id)
        .bind(report.status.as_str())
        .bind(report.finalized_on)
        .bind(&report.finalized_by)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Loads a small demo school: one open cycle, a grade scale, two students.
pub async fn seed(pool: &PgPool) -> anyhow::Result<Uuid> {
    let cycle_id = Uuid::parse_str("6f1d2c9e-5a0b-4f3e-9c8d-1b2a3c4d5e6f")?;

    sqlx::query(
        r#"
        INSERT INTO term_reporting.reporting_cycles
        (id, name, school, academic_year, term, program, status, task_cutoff_date,
         released_rule, absence_policy, dishonesty_policy, exclude_excused)
        VALUES ($1, 'Term 1 2025-2026', 'North Campus', '2025-2026', 'Term 1', NULL, 'open',
                $2, 'finalized_or_released', 'include_as_missing', 'force_zero', TRUE)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(cycle_id)
    .bind(NaiveDate::from_ymd_opt(2025, 12, 19).context("invalid date")?)
    .execute(pool)
    .await?;

    let intervals = [
        ("Percent", 90.0, "A"),
        ("Percent", 80.0, "B"),
        ("Percent", 70.0, "C"),
        ("Percent", 60.0, "D"),
        ("Percent", 0.0, "F"),
    ];
    for (scale, boundary, label) in intervals {
        sqlx::query(
            r#"
            INSERT INTO term_reporting.grade_scale_intervals (grade_scale, boundary, label)
            VALUES ($1, $2, $3)
            ON CONFLICT (grade_scale, boundary) DO UPDATE SET label = EXCLUDED.label
            "#,
        )
        .bind(scale)
        .bind(boundary)
        .bind(label)
        .execute(pool)
        .await?;
    }

    let enrollments = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "STU-0001",
            vec!["MATH9", "ENG9"],
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "STU-0002",
            vec!["MATH9", "SCI9"],
        ),
    ];
    for (enrollment_id, student, courses) in &enrollments {
        sqlx::query(
            r#"
            INSERT INTO term_reporting.program_enrollments
            (id, student, program, academic_year, school)
            VALUES ($1, $2, 'Grade 9', '2025-2026', 'North Campus')
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(enrollment_id)
        .bind(student)
        .execute(pool)
        .await?;

        for course in courses {
            sqlx::query(
                r#"
                INSERT INTO term_reporting.course_enrollments (program_enrollment, course, active)
                VALUES ($1, $2, TRUE)
                ON CONFLICT (program_enrollment, course) DO NOTHING
                "#,
            )
            .bind(enrollment_id)
            .bind(course)
            .execute(pool)
            .await?;
        }
    }

    let outcomes = vec![
        ("seed-001", "STU-0001", "MATH9", "Unit 1 test", Some("84"), "none"),
        ("seed-002", "STU-0001", "MATH9", "Unit 2 test", None, "absent"),
        ("seed-003", "STU-0001", "ENG9", "Persuasive essay", Some("91"), "none"),
        ("seed-004", "STU-0002", "MATH9", "Unit 1 test", Some("77"), "none"),
        ("seed-005", "STU-0002", "SCI9", "Lab report", Some("88"), "academic_dishonesty"),
    ];
    let due = NaiveDate::from_ymd_opt(2025, 11, 14).context("invalid date")?;
    for (source_key, student, course, task, score, procedural) in outcomes {
        sqlx::query(
            r#"
            INSERT INTO term_reporting.outcomes
            (id, student, course, program, school, academic_year, task, grading_mode,
             rubric_strategy, grading_status, official_score, official_grade_numeric,
             grade_scale, procedural_status, due_date, lock_date, source_key)
            VALUES ($1, $2, $3, 'Grade 9', 'North Campus', '2025-2026', $4, 'numeric',
                    'sum_total', 'released', $5, NULL, 'Percent', $6, $7, NULL, $8)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student)
        .bind(course)
        .bind(task)
        .bind(score)
        .bind(procedural)
        .bind(due)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(cycle_id)
}

/// Imports outcomes from CSV; rows whose `source_key` already exists are skipped.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        source_key: Option<String>,
        student: String,
        course: Option<String>,
        program: Option<String>,
        school: String,
        academic_year: String,
        task: String,
        grading_mode: String,
        rubric_strategy: Option<String>,
        grading_status: String,
        official_score: Option<String>,
        official_grade_numeric: Option<String>,
        grade_scale: Option<String>,
        procedural_status: Option<String>,
        due_date: Option<NaiveDate>,
        lock_date: Option<NaiveDate>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV record {}", line + 1))?;

        let grading_mode: GradingMode = row.grading_mode.parse()?;
        let rubric_strategy: RubricStrategy = row
            .rubric_strategy
            .as_deref()
            .map_or(Ok(RubricStrategy::SumTotal), str::parse::<RubricStrategy>)?;
        let grading_status: GradingStatus = row.grading_status.parse()?;
        let procedural_status: ProceduralStatus = row
            .procedural_status
            .as_deref()
            .map_or(Ok(ProceduralStatus::None), str::parse::<ProceduralStatus>)?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO term_reporting.outcomes
            (id, student, course, program, school, academic_year, task, grading_mode,
             rubric_strategy, grading_status, official_score, official_grade_numeric,
             grade_scale, procedural_status, due_date, lock_date, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.student)
        .bind(&row.course)
        .bind(&row.program)
        .bind(&row.school)
        .bind(&row.academic_year)
        .bind(&row.task)
        .bind(grading_mode.as_str())
        .bind(rubric_strategy.as_str())
        .bind(grading_status.as_str())
        .bind(&row.official_score)
        .bind(&row.official_grade_numeric)
        .bind(&row.grade_scale)
        .bind(procedural_status.as_str())
        .bind(row.due_date)
        .bind(row.lock_date)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
