use std::collections::{BTreeMap, HashMap};

use tracing::warn;
use uuid::Uuid;

use crate::models::{
    CourseTermResult, ProgramEnrollment, ReportCourseRow, ReportStatus, Stamp, StudentTermReport,
};

/// Builds one report per (student, program enrollment) from the cycle's course results.
///
/// Existing reports keep their id, status and finalization stamp; their course
/// rows are replaced wholesale.
pub fn build_reports(
    reporting_cycle: Uuid,
    results: &[CourseTermResult],
    enrollments: &HashMap<Uuid, ProgramEnrollment>,
    existing: &[StudentTermReport],
    stamp: &Stamp,
) -> Vec<StudentTermReport> {
    let mut groups: BTreeMap<(&str, Uuid), Vec<&CourseTermResult>> = BTreeMap::new();
    for result in results {
        groups
            .entry((result.student.as_str(), result.program_enrollment))
            .or_default()
            .push(result);
    }

    let existing: HashMap<(&str, Uuid), &StudentTermReport> = existing
        .iter()
        .map(|report| ((report.student.as_str(), report.program_enrollment), report))
        .collect();

    let mut reports = Vec::with_capacity(groups.len());
    for ((student, program_enrollment), mut rows) in groups {
        let Some(enrollment) = enrollments
            .get(&program_enrollment)
            .filter(|enrollment| enrollment.student == student)
        else {
            warn!(%program_enrollment, student, "no matching program enrollment; report skipped");
            continue;
        };
        rows.sort_by(|a, b| a.course.cmp(&b.course));

        let mut report = match existing.get(&(student, program_enrollment)) {
            Some(report) => (*report).clone(),
            None => StudentTermReport {
                id: Uuid::new_v4(),
                reporting_cycle,
                student: student.to_string(),
                program_enrollment,
                program: String::new(),
                academic_year: String::new(),
                school: String::new(),
                status: ReportStatus::Draft,
                finalized_on: None,
                finalized_by: None,
                generated_on: None,
                courses: Vec::new(),
            },
        };

        report.program = enrollment.program.clone();
        report.academic_year = enrollment.academic_year.clone();
        report.school = enrollment.school.clone();
        report.courses = rows.into_iter().map(course_row).collect();
        report.generated_on = Some(stamp.at);
        if report.status.is_final() && report.finalized_on.is_none() {
            report.finalized_on = Some(stamp.at);
            report.finalized_by = Some(stamp.by.clone());
        }

        reports.push(report);
    }

    reports
}

fn course_row(result: &CourseTermResult) -> ReportCourseRow {
    let grade_value = result
        .override_grade_value
        .clone()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| result.grade_value.clone());

    ReportCourseRow {
        course_term_result: result.id,
        course: result.course.clone(),
        grade_value,
        numeric_score: result.numeric_score,
        is_override: result.is_override,
        teacher_comment: result.teacher_comment.clone(),
    }
}

/// Moves draft reports to finalized, stamping each; returns how many changed.
pub fn finalize(reports: &mut [StudentTermReport], stamp: &Stamp) -> usize {
    let mut finalized = 0;
    for report in reports.iter_mut() {
        if report.status != ReportStatus::Draft {
            continue;
        }
        report.status = ReportStatus::Finalized;
        if report.finalized_on.is_none() {
            report.finalized_on = Some(stamp.at);
            report.finalized_by = Some(stamp.by.clone());
        }
        finalized += 1;
    }
    finalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn stamp() -> Stamp {
        Stamp {
            at: Utc::now(),
            by: "registrar".to_string(),
        }
    }

    fn enrollment(id: Uuid, student: &str) -> ProgramEnrollment {
        ProgramEnrollment {
            id,
            student: student.to_string(),
            program: "Grade 9".to_string(),
            academic_year: "2025-2026".to_string(),
            school: "North Campus".to_string(),
        }
    }

    fn result(cycle: Uuid, enrollment: Uuid, student: &str, course: &str) -> CourseTermResult {
        CourseTermResult {
            id: Uuid::new_v4(),
            reporting_cycle: cycle,
            program_enrollment: enrollment,
            student: student.to_string(),
            course: course.to_string(),
            numeric_score: Some(82.0),
            grade_value: Some("B".to_string()),
            grade_scale: Some("Letter".to_string()),
            task_counted: 4,
            total_weight: 4.0,
            internal_note: None,
            calculated_on: None,
            calculated_by: None,
            teacher_comment: None,
            override_grade_value: None,
            is_override: false,
        }
    }

    #[test]
    fn groups_results_per_student_enrollment() {
        let cycle = Uuid::new_v4();
        let (e1, e2) = (Uuid::new_v4(), Uuid::new_v4());
        let enrollments = HashMap::from([
            (e1, enrollment(e1, "STU-1")),
            (e2, enrollment(e2, "STU-2")),
        ]);
        let results = vec![
            result(cycle, e1, "STU-1", "SCI9"),
            result(cycle, e1, "STU-1", "ENG9"),
            result(cycle, e2, "STU-2", "ENG9"),
        ];

        let reports = build_reports(cycle, &results, &enrollments, &[], &stamp());
        assert_eq!(reports.len(), 2);
        let first = reports
            .iter()
            .find(|report| report.student == "STU-1")
            .expect("report for STU-1");
        let courses: Vec<_> = first.courses.iter().map(|row| row.course.as_str()).collect();
        assert_eq!(courses, vec!["ENG9", "SCI9"]);
        assert_eq!(first.school, "North Campus");
        assert_eq!(first.status, ReportStatus::Draft);
    }

    #[test]
    fn override_grade_takes_precedence() {
        let cycle = Uuid::new_v4();
        let e1 = Uuid::new_v4();
        let enrollments = HashMap::from([(e1, enrollment(e1, "STU-1"))]);
        let mut overridden = result(cycle, e1, "STU-1", "MATH9");
        overridden.override_grade_value = Some("A-".to_string());
        overridden.is_override = true;
        overridden.teacher_comment = Some("Excellent final project".to_string());
        let mut blank_override = result(cycle, e1, "STU-1", "ART9");
        blank_override.override_grade_value = Some("  ".to_string());

        let reports = build_reports(
            cycle,
            &[overridden, blank_override],
            &enrollments,
            &[],
            &stamp(),
        );
        let rows = &reports[0].courses;
        assert_eq!(rows[0].course, "ART9");
        assert_eq!(rows[0].grade_value.as_deref(), Some("B"));
        assert_eq!(rows[1].grade_value.as_deref(), Some("A-"));
        assert!(rows[1].is_override);
        assert_eq!(rows[1].teacher_comment.as_deref(), Some("Excellent final project"));
    }

    #[test]
    fn regeneration_replaces_rows_and_keeps_finalization() {
        let cycle = Uuid::new_v4();
        let e1 = Uuid::new_v4();
        let enrollments = HashMap::from([(e1, enrollment(e1, "STU-1"))]);
        let first_run = build_reports(
            cycle,
            &[result(cycle, e1, "STU-1", "MATH9"), result(cycle, e1, "STU-1", "ENG9")],
            &enrollments,
            &[],
            &stamp(),
        );
        let mut stored = first_run;
        let finalized_at = Utc::now() - Duration::days(2);
        stored[0].status = ReportStatus::Finalized;
        stored[0].finalized_on = Some(finalized_at);
        stored[0].finalized_by = Some("principal".to_string());

        let second_run = build_reports(
            cycle,
            &[result(cycle, e1, "STU-1", "MATH9")],
            &enrollments,
            &stored,
            &stamp(),
        );
        let report = &second_run[0];
        assert_eq!(report.id, stored[0].id);
        assert_eq!(report.courses.len(), 1);
        assert_eq!(report.status, ReportStatus::Finalized);
        assert_eq!(report.finalized_on, Some(finalized_at));
        assert_eq!(report.finalized_by.as_deref(), Some("principal"));
    }

    #[test]
    fn final_report_without_stamp_is_stamped_once() {
        let cycle = Uuid::new_v4();
        let e1 = Uuid::new_v4();
        let enrollments = HashMap::from([(e1, enrollment(e1, "STU-1"))]);
        let results = [result(cycle, e1, "STU-1", "MATH9")];
        let mut stored = build_reports(cycle, &results, &enrollments, &[], &stamp());
        stored[0].status = ReportStatus::Published;

        let stamped = build_reports(cycle, &results, &enrollments, &stored, &stamp());
        let first_stamp = stamped[0].finalized_on.expect("stamped");

        let later = Stamp {
            at: Utc::now() + Duration::hours(1),
            by: "someone-else".to_string(),
        };
        let again = build_reports(cycle, &results, &enrollments, &stamped, &later);
        assert_eq!(again[0].finalized_on, Some(first_stamp));
        assert_eq!(again[0].finalized_by.as_deref(), Some("registrar"));
    }

    #[test]
    fn missing_enrollment_skips_group() {
        let cycle = Uuid::new_v4();
        let reports = build_reports(
            cycle,
            &[result(cycle, Uuid::new_v4(), "STU-9", "MATH9")],
            &HashMap::new(),
            &[],
            &stamp(),
        );
        assert!(reports.is_empty());
    }

    #[test]
    fn finalize_only_touches_drafts() {
        let cycle = Uuid::new_v4();
        let (e1, e2) = (Uuid::new_v4(), Uuid::new_v4());
        let enrollments = HashMap::from([
            (e1, enrollment(e1, "STU-1")),
            (e2, enrollment(e2, "STU-2")),
        ]);
        let mut reports = build_reports(
            cycle,
            &[result(cycle, e1, "STU-1", "MATH9"), result(cycle, e2, "STU-2", "MATH9")],
            &enrollments,
            &[],
            &stamp(),
        );
        reports[1].status = ReportStatus::Published;

        let changed = finalize(&mut reports, &stamp());
        assert_eq!(changed, 1);
        assert_eq!(reports[0].status, ReportStatus::Finalized);
        assert!(reports[0].finalized_on.is_some());
        assert_eq!(reports[1].status, ReportStatus::Published);
    }
}
