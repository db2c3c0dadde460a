use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::Habit;
use crate::monitor::ScanSummary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HabitSummary {
    pub habit: Habit,
    pub evaluated: usize,
    pub flagged: usize,
}

pub fn summarize_by_habit(summary: &ScanSummary) -> Vec<HabitSummary> {
    let mut map: BTreeMap<Habit, (usize, usize)> = BTreeMap::new();

    for outcome in &summary.outcomes {
        let entry = map.entry(outcome.habit).or_insert((0, 0));
        entry.0 += 1;
        if outcome.verdict.should_notify {
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<HabitSummary> = map
        .into_iter()
        .map(|(habit, (evaluated, flagged))| HabitSummary {
            habit,
            evaluated,
            flagged,
        })
        .collect();

    summaries.sort_by(|a, b| b.flagged.cmp(&a.flagged).then(a.habit.cmp(&b.habit)));
    summaries
}

fn format_scores(scores: &[i32]) -> String {
    scores
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn build_report(class_name: Option<&str>, generated_on: NaiveDate, summary: &ScanSummary) -> String {
    let summaries = summarize_by_habit(summary);

    let mut output = String::new();
    let scope = class_name
        .map(|c| format!("kelas {c}"))
        .unwrap_or_else(|| "semua kelas".to_string());

    let _ = writeln!(output, "# Laporan Pemantauan Kebiasaan");
    let _ = writeln!(output, "Dibuat untuk {} pada {}", scope, generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Ringkasan per Kebiasaan");

    if summaries.is_empty() {
        let _ = writeln!(output, "Belum ada kebiasaan dengan minimal tiga nilai.");
    } else {
        for item in &summaries {
            let _ = writeln!(
                output,
                "- {}: {} siswa dievaluasi, {} perlu perhatian",
                item.habit, item.evaluated, item.flagged
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Perlu Perhatian");

    let mut flagged = summary.flagged().peekable();
    if flagged.peek().is_none() {
        let _ = writeln!(output, "Tidak ada penurunan signifikan yang terdeteksi.");
    } else {
        for outcome in flagged {
            let _ = writeln!(
                output,
                "- {} ({}, kelas {}), {} [{}]: {}",
                outcome.student.full_name,
                outcome.student.id,
                outcome.student.class_name,
                outcome.habit,
                format_scores(&outcome.scores),
                outcome.verdict.notification_message
            );
        }
    }

    if summary.skipped > 0 || !summary.failures.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Catatan");
        if summary.skipped > 0 {
            let _ = writeln!(
                output,
                "- {} pasangan siswa/kebiasaan dilewati karena nilai belum mencapai tiga hari.",
                summary.skipped
            );
        }
        for failure in &summary.failures {
            let _ = writeln!(
                output,
                "- Gagal memproses {} / {}: {}",
                failure.student_id, failure.habit, failure.error
            );
        }
    }

    output
}
