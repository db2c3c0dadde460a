use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::MonitorResult;
use crate::models::{clamp_score, Habit, HabitEntry, ScoreSequence, Student};
use crate::store::HabitStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgHabitStore {
    pool: PgPool,
}

impl PgHabitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert_student(&self, student: &Student) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO habit_monitor.students (id, full_name, class_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET full_name = EXCLUDED.full_name, class_name = EXCLUDED.class_name
            "#,
        )
        .bind(&student.id)
        .bind(&student.full_name)
        .bind(&student.class_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts unless `source_key` was already imported. Returns whether a row was written.
    async fn insert_entry(
        &self,
        entry: &HabitEntry,
        source_key: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO habit_monitor.habit_entries
            (id, student_id, habit, score, recorded_on, recorded_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(&entry.student_id)
        .bind(entry.habit.key())
        .bind(entry.score)
        .bind(entry.recorded_on)
        .bind(entry.recorded_at)
        .bind(source_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn student_from_row(row: &sqlx::postgres::PgRow) -> Student {
    Student {
        id: row.get("id"),
        full_name: row.get("full_name"),
        class_name: row.get("class_name"),
    }
}

fn morning_of(day: NaiveDate) -> DateTime<Utc> {
    let naive = day.and_hms_opt(7, 0, 0).unwrap_or_default();
    Utc.from_utc_datetime(&naive)
}

#[async_trait]
impl HabitStore for PgHabitStore {
    async fn students(&self, class_name: Option<&str>) -> MonitorResult<Vec<Student>> {
        let mut query = String::from(
            "SELECT id, full_name, class_name FROM habit_monitor.students",
        );
        if class_name.is_some() {
            query.push_str(" WHERE class_name = $1");
        }
        query.push_str(" ORDER BY class_name, full_name");

        let mut rows = sqlx::query(&query);
        if let Some(value) = class_name {
            rows = rows.bind(value);
        }

        let records = rows.fetch_all(&self.pool).await?;
        Ok(records.iter().map(student_from_row).collect())
    }

    async fn student(&self, student_id: &str) -> MonitorResult<Option<Student>> {
        let row = sqlx::query(
            "SELECT id, full_name, class_name FROM habit_monitor.students WHERE id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(student_from_row))
    }

    async fn recent_scores(
        &self,
        student_id: &str,
        habit: Habit,
        limit: usize,
    ) -> MonitorResult<ScoreSequence> {
        let rows = sqlx::query(
            r#"
            SELECT score FROM habit_monitor.habit_entries
            WHERE student_id = $1 AND habit = $2
            ORDER BY recorded_at DESC
            LIMIT $3
            "#,
        )
        .bind(student_id)
        .bind(habit.key())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut scores: Vec<i32> = rows.iter().map(|row| row.get("score")).collect();
        scores.reverse();
        Ok(ScoreSequence::new(scores))
    }

    async fn record(&self, entry: &HabitEntry) -> MonitorResult<()> {
        let source_key = format!("entry-{}", entry.id);
        self.insert_entry(entry, &source_key).await?;
        Ok(())
    }
}

pub async fn seed(store: &PgHabitStore) -> anyhow::Result<()> {
    let students = [
        ("2026-5A-001", "Sari Wulandari", "5A"),
        ("2026-5A-002", "Budi Santoso", "5A"),
        ("2026-6B-001", "Dewi Lestari", "6B"),
    ];

    for (id, name, class_name) in students {
        store
            .upsert_student(&Student {
                id: id.to_string(),
                full_name: name.to_string(),
                class_name: class_name.to_string(),
            })
            .await?;
    }

    // Sari slips on waking early, Budi improves on exercise, Dewi holds steady.
    let histories: [(&str, Habit, [i32; 5]); 4] = [
        ("2026-5A-001", Habit::BangunPagi, [4, 4, 4, 3, 2]),
        ("2026-5A-001", Habit::GemarBelajar, [3, 3, 4, 3, 3]),
        ("2026-5A-002", Habit::Berolahraga, [2, 2, 3, 3, 4]),
        ("2026-6B-001", Habit::TidurCepat, [3, 3, 3, 3, 3]),
    ];
    let start = NaiveDate::from_ymd_opt(2026, 2, 2).context("invalid date")?;

    for (student_id, habit, scores) in histories {
        for (offset, score) in scores.into_iter().enumerate() {
            let recorded_on = start + Duration::days(offset as i64);
            let entry = HabitEntry {
                id: Uuid::new_v4(),
                student_id: student_id.to_string(),
                habit,
                score,
                recorded_on,
                recorded_at: morning_of(recorded_on),
            };
            let source_key = format!("seed-{student_id}-{}-{offset}", habit.key());
            store.insert_entry(&entry, &source_key).await?;
        }
    }

    Ok(())
}

pub async fn import_csv(store: &PgHabitStore, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        full_name: String,
        class_name: String,
        habit: String,
        score: i32,
        recorded_on: NaiveDate,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let habit: Habit = row
            .habit
            .parse()
            .with_context(|| format!("row {}: unrecognised habit", line + 1))?;

        store
            .upsert_student(&Student {
                id: row.student_id.clone(),
                full_name: row.full_name,
                class_name: row.class_name,
            })
            .await?;

        let score = clamp_score(row.score, &format!("csv row {}", line + 1));

        let entry = HabitEntry {
            id: Uuid::new_v4(),
            student_id: row.student_id,
            habit,
            score,
            recorded_on: row.recorded_on,
            recorded_at: morning_of(row.recorded_on),
        };
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", entry.id));

        if store.insert_entry(&entry, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}
