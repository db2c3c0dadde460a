use async_trait::async_trait;

use crate::error::MonitorResult;
use crate::models::{Habit, HabitEntry, ScoreSequence, Student};

/// Persisted habit scores, as consumed by the monitor.
#[async_trait]
pub trait HabitStore: Send + Sync {
    async fn students(&self, class_name: Option<&str>) -> MonitorResult<Vec<Student>>;

    async fn student(&self, student_id: &str) -> MonitorResult<Option<Student>>;

    /// The most recent `limit` scores by recording time, returned oldest first.
    async fn recent_scores(
        &self,
        student_id: &str,
        habit: Habit,
        limit: usize,
    ) -> MonitorResult<ScoreSequence>;

    async fn record(&self, entry: &HabitEntry) -> MonitorResult<()>;
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use tokio::sync::RwLock;
    use uuid::Uuid;

    use super::HabitStore;
    use crate::error::MonitorResult;
    use crate::models::{Habit, HabitEntry, ScoreSequence, Student};

    #[derive(Default)]
    pub struct MemoryHabitStore {
        students: RwLock<Vec<Student>>,
        entries: RwLock<HashMap<(String, Habit), Vec<HabitEntry>>>,
    }

    impl MemoryHabitStore {
        pub async fn add_student(&self, id: &str, name: &str, class_name: &str) {
            self.students.write().await.push(Student {
                id: id.to_string(),
                full_name: name.to_string(),
                class_name: class_name.to_string(),
            });
        }

        /// Records scores on consecutive days starting 2026-01-05.
        pub async fn add_scores(&self, student_id: &str, habit: Habit, scores: &[i32]) {
            let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
            for (offset, score) in scores.iter().enumerate() {
                let day = start + Duration::days(offset as i64);
                let recorded_at = Utc.from_utc_datetime(&day.and_hms_opt(7, 0, 0).unwrap());
                self.record(&HabitEntry {
                    id: Uuid::new_v4(),
                    student_id: student_id.to_string(),
                    habit,
                    score: *score,
                    recorded_on: day,
                    recorded_at,
                })
                .await
                .unwrap();
            }
        }
    }

    #[async_trait]
    impl HabitStore for MemoryHabitStore {
        async fn students(&self, class_name: Option<&str>) -> MonitorResult<Vec<Student>> {
            Ok(self
                .students
                .read()
                .await
                .iter()
                .filter(|s| class_name.map_or(true, |c| s.class_name == c))
                .cloned()
                .collect())
        }

        async fn student(&self, student_id: &str) -> MonitorResult<Option<Student>> {
            Ok(self
                .students
                .read()
                .await
                .iter()
                .find(|s| s.id == student_id)
                .cloned())
        }

        async fn recent_scores(
            &self,
            student_id: &str,
            habit: Habit,
            limit: usize,
        ) -> MonitorResult<ScoreSequence> {
            let entries = self.entries.read().await;
            let mut rows: Vec<&HabitEntry> = entries
                .get(&(student_id.to_string(), habit))
                .map(|v| v.iter().collect())
                .unwrap_or_default();
            rows.sort_by_key(|e| e.recorded_at);
            let start = rows.len().saturating_sub(limit);
            Ok(ScoreSequence::new(
                rows[start..].iter().map(|e| e.score).collect(),
            ))
        }

        async fn record(&self, entry: &HabitEntry) -> MonitorResult<()> {
            self.entries
                .write()
                .await
                .entry((entry.student_id.clone(), entry.habit))
                .or_default()
                .push(entry.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn recent_scores_are_chronological_tail() {
        let store = MemoryHabitStore::default();
        store
            .add_scores("s-1", Habit::BangunPagi, &[4, 4, 3, 2, 1])
            .await;
        let recent = store
            .recent_scores("s-1", Habit::BangunPagi, 3)
            .await
            .unwrap();
        assert_eq!(recent.as_slice(), &[3, 2, 1]);

        let empty = store
            .recent_scores("s-1", Habit::TidurCepat, 3)
            .await
            .unwrap();
        assert!(empty.as_slice().is_empty());
    }
}
