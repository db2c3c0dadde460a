use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decline;
use crate::error::MonitorError;

pub const MIN_SCORE: i32 = 1;
pub const MAX_SCORE: i32 = 4;

/// The seven tracked character habits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Habit {
    BangunPagi,
    Beribadah,
    Berolahraga,
    MakanSehat,
    GemarBelajar,
    Bermasyarakat,
    TidurCepat,
}

impl Habit {
    pub const ALL: [Habit; 7] = [
        Habit::BangunPagi,
        Habit::Beribadah,
        Habit::Berolahraga,
        Habit::MakanSehat,
        Habit::GemarBelajar,
        Habit::Bermasyarakat,
        Habit::TidurCepat,
    ];

    /// Storage and CSV key.
    pub fn key(self) -> &'static str {
        match self {
            Habit::BangunPagi => "bangun_pagi",
            Habit::Beribadah => "beribadah",
            Habit::Berolahraga => "berolahraga",
            Habit::MakanSehat => "makan_sehat",
            Habit::GemarBelajar => "gemar_belajar",
            Habit::Bermasyarakat => "bermasyarakat",
            Habit::TidurCepat => "tidur_cepat",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Habit::BangunPagi => "Bangun Pagi",
            Habit::Beribadah => "Beribadah",
            Habit::Berolahraga => "Berolahraga",
            Habit::MakanSehat => "Makan Sehat dan Bergizi",
            Habit::GemarBelajar => "Gemar Belajar",
            Habit::Bermasyarakat => "Bermasyarakat",
            Habit::TidurCepat => "Tidur Cepat",
        }
    }
}

impl fmt::Display for Habit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Habit {
    type Err = MonitorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim();
        Habit::ALL
            .into_iter()
            .find(|habit| {
                habit.key().eq_ignore_ascii_case(needle) || habit.label().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| MonitorError::InvalidInput(format!("unknown habit '{needle}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: String,
    pub full_name: String,
    pub class_name: String,
}

/// Who a message is about. Name and class are optional because the
/// in-process contract only carries the id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentContext {
    pub student_id: String,
    pub full_name: Option<String>,
    pub class_name: Option<String>,
}

impl StudentContext {
    pub fn from_id(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.student_id)
    }
}

impl From<&Student> for StudentContext {
    fn from(student: &Student) -> Self {
        Self {
            student_id: student.id.clone(),
            full_name: Some(student.full_name.clone()),
            class_name: Some(student.class_name.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HabitEntry {
    pub id: Uuid,
    pub student_id: String,
    pub habit: Habit,
    pub score: i32,
    pub recorded_on: NaiveDate,
    pub recorded_at: DateTime<Utc>,
}

/// Scores for one (student, habit) pair, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreSequence(Vec<i32>);

impl ScoreSequence {
    pub fn new(scores: Vec<i32>) -> Self {
        Self(scores)
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    /// The three most recent scores, or `None` when fewer were recorded.
    pub fn recent(&self) -> Option<&[i32]> {
        decline::recent_window(&self.0).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclineRequest {
    pub student_id: String,
    pub habit_name: String,
    pub habit_scores: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclineVerdict {
    pub should_notify: bool,
    pub notification_message: String,
}

/// Callers clamp raw input into the score domain; the evaluator never does.
/// `origin` names the input path in the warning emitted when a score is changed.
pub fn clamp_score(raw: i32, origin: &str) -> i32 {
    let score = raw.clamp(MIN_SCORE, MAX_SCORE);
    if score != raw {
        tracing::warn!(origin, raw, clamped = score, "score outside 1-4 clamped");
    }
    score
}
