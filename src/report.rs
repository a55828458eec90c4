use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{CourseTermResult, ReportingCycle};
use crate::reconcile::{NOTE_NO_ELIGIBLE, NOTE_SCALE_MISMATCH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteFrequency {
    pub note: String,
    pub count: usize,
}

/// Counts each note flag across results, most frequent first.
pub fn summarize_notes(results: &[CourseTermResult]) -> Vec<NoteFrequency> {
    let mut map: HashMap<&str, usize> = HashMap::new();

    for result in results {
        let Some(note) = result.internal_note.as_deref() else {
            continue;
        };
        for flag in note.split("; ").filter(|flag| !flag.is_empty()) {
            *map.entry(flag).or_insert(0) += 1;
        }
    }

    let mut frequencies: Vec<NoteFrequency> = map
        .into_iter()
        .map(|(note, count)| NoteFrequency {
            note: note.to_string(),
            count,
        })
        .collect();

    frequencies.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.note.cmp(&b.note)));
    frequencies
}

fn has_flag(result: &CourseTermResult, flag: &str) -> bool {
    result
        .internal_note
        .as_deref()
        .is_some_and(|note| note.split("; ").any(|part| part == flag))
}

/// Markdown operator summary of one cycle's course term results.
pub fn build_diagnostics(cycle: &ReportingCycle, results: &[CourseTermResult]) -> String {
    let frequencies = summarize_notes(results);
    let graded = results
        .iter()
        .filter(|result| result.numeric_score.is_some())
        .count();
    let overridden = results.iter().filter(|result| result.is_override).count();

    let mut output = String::new();

    let _ = writeln!(output, "# Term Reporting Diagnostics");
    let _ = writeln!(
        output,
        "Generated for {} ({}, {}, {})",
        cycle.name,
        cycle.school.as_deref().unwrap_or("no school"),
        cycle.academic_year.as_deref().unwrap_or("no academic year"),
        cycle.term.as_deref().unwrap_or("no term"),
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Course term results: {}", results.len());
    let _ = writeln!(output, "- With numeric score: {}", graded);
    let _ = writeln!(output, "- Without numeric score: {}", results.len() - graded);
    let _ = writeln!(output, "- Manually overridden: {}", overridden);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Note Flags");

    if frequencies.is_empty() {
        let _ = writeln!(output, "No diagnostic notes recorded.");
    } else {
        for frequency in frequencies.iter() {
            let _ = writeln!(output, "- {}: {}", frequency.note, frequency.count);
        }
    }

    let conflicts: Vec<&CourseTermResult> = results
        .iter()
        .filter(|result| has_flag(result, NOTE_SCALE_MISMATCH))
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Scale Conflicts");

    if conflicts.is_empty() {
        let _ = writeln!(output, "No grade scale conflicts.");
    } else {
        for result in conflicts {
            let _ = writeln!(
                output,
                "- {} in {}: score {} across {} tasks",
                result.student,
                result.course,
                result
                    .numeric_score
                    .map_or_else(|| "n/a".to_string(), |score| format!("{score:.2}")),
                result.task_counted
            );
        }
    }

    let cleared: Vec<&CourseTermResult> = results
        .iter()
        .filter(|result| has_flag(result, NOTE_NO_ELIGIBLE))
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Cleared Results");

    if cleared.is_empty() {
        let _ = writeln!(output, "No cleared results.");
    } else {
        for result in cleared {
            let _ = writeln!(output, "- {} in {}", result.student, result.course);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::fixtures;
    use uuid::Uuid;

    fn result(
        student: &str,
        course: &str,
        score: Option<f64>,
        note: Option<&str>,
    ) -> CourseTermResult {
        CourseTermResult {
            id: Uuid::new_v4(),
            reporting_cycle: Uuid::new_v4(),
            program_enrollment: Uuid::new_v4(),
            student: student.to_string(),
            course: course.to_string(),
            numeric_score: score,
            grade_value: None,
            grade_scale: None,
            task_counted: 2,
            total_weight: 2.0,
            internal_note: note.map(str::to_string),
            calculated_on: None,
            calculated_by: None,
            teacher_comment: None,
            override_grade_value: None,
            is_override: false,
        }
    }

    #[test]
    fn counts_each_flag_once_per_result() {
        let results = vec![
            result("STU-1", "MATH9", Some(80.0), Some("Absent (missing); Grade scale mismatch")),
            result("STU-2", "MATH9", Some(70.0), Some("Absent (missing)")),
            result("STU-3", "MATH9", Some(60.0), None),
        ];

        let frequencies = summarize_notes(&results);
        assert_eq!(
            frequencies,
            vec![
                NoteFrequency {
                    note: "Absent (missing)".to_string(),
                    count: 2,
                },
                NoteFrequency {
                    note: "Grade scale mismatch".to_string(),
                    count: 1,
                },
            ]
        );
    }

    #[test]
    fn lists_conflicts_and_cleared_rows() {
        let cycle = fixtures::cycle();
        let results = vec![
            result("STU-1", "MATH9", Some(82.5), Some("Grade scale mismatch")),
            result("STU-2", "ENG9", None, Some("No eligible outcomes")),
        ];

        let markdown = build_diagnostics(&cycle, &results);
        assert!(markdown.starts_with("# Term Reporting Diagnostics"));
        assert!(markdown.contains("- STU-1 in MATH9: score 82.50 across 2 tasks"));
        assert!(markdown.contains("## Cleared Results\n- STU-2 in ENG9"));
        assert!(markdown.contains("- Without numeric score: 1"));
    }

    #[test]
    fn empty_cycle_reads_cleanly() {
        let markdown = build_diagnostics(&fixtures::cycle(), &[]);
        assert!(markdown.contains("No diagnostic notes recorded."));
        assert!(markdown.contains("No grade scale conflicts."));
        assert!(markdown.contains("No cleared results."));
    }
}
