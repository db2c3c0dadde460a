use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::compose::MessageComposer;
use crate::decline;
use crate::error::{MonitorError, MonitorResult};
use crate::models::{DeclineRequest, DeclineVerdict, Habit, Student, StudentContext};
use crate::store::HabitStore;

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub student: Student,
    pub habit: Habit,
    pub scores: Vec<i32>,
    pub verdict: DeclineVerdict,
}

#[derive(Debug, Clone)]
pub struct ScanFailure {
    pub student_id: String,
    pub habit: Habit,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ScanSummary {
    pub outcomes: Vec<ScanOutcome>,
    /// Pairs with fewer than three recorded scores.
    pub skipped: usize,
    pub failures: Vec<ScanFailure>,
}

impl ScanSummary {
    pub fn flagged(&self) -> impl Iterator<Item = &ScanOutcome> {
        self.outcomes.iter().filter(|o| o.verdict.should_notify)
    }
}

/// Evaluates an explicit request. Input is validated before anything is composed.
pub async fn assess(
    composer: &dyn MessageComposer,
    request: &DeclineRequest,
) -> MonitorResult<DeclineVerdict> {
    let habit: Habit = request.habit_name.parse()?;
    let student = StudentContext::from_id(request.student_id.clone());
    assess_scores(composer, &student, habit, &request.habit_scores).await
}

async fn assess_scores(
    composer: &dyn MessageComposer,
    student: &StudentContext,
    habit: Habit,
    scores: &[i32],
) -> MonitorResult<DeclineVerdict> {
    let should_notify = decline::evaluate(scores)?;
    debug!(
        student_id = %student.student_id,
        habit = habit.key(),
        ?scores,
        should_notify,
        "decline evaluated"
    );

    let notification_message = composer
        .compose(student, habit.label(), scores, should_notify)
        .await?;

    Ok(DeclineVerdict {
        should_notify,
        notification_message,
    })
}

/// Jittered exponential backoff allowing `max_retries` extra attempts.
pub fn retry_policy(max_retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(30))
        .with_max_times(max_retries)
        .with_jitter()
}

/// Score retrieval, evaluation, and message composition for (student, habit) pairs.
pub struct DeclineMonitor<S> {
    store: S,
    composer: Box<dyn MessageComposer>,
    retry: ExponentialBuilder,
}

impl<S: HabitStore> DeclineMonitor<S> {
    pub fn new(store: S, composer: Box<dyn MessageComposer>) -> Self {
        Self {
            store,
            composer,
            retry: retry_policy(3),
        }
    }

    pub fn with_retry(mut self, retry: ExponentialBuilder) -> Self {
        self.retry = retry;
        self
    }

    /// Evaluates the three most recent stored scores for one student and habit.
    pub async fn check(&self, student_id: &str, habit: Habit) -> MonitorResult<DeclineVerdict> {
        let student = self
            .store
            .student(student_id)
            .await?
            .ok_or_else(|| MonitorError::InvalidInput(format!("unknown student '{student_id}'")))?;

        let scores = self
            .store
            .recent_scores(student_id, habit, decline::WINDOW)
            .await?;
        assess_scores(
            self.composer.as_ref(),
            &StudentContext::from(&student),
            habit,
            scores.as_slice(),
        )
        .await
    }

    async fn check_pair(&self, student: &Student, habit: Habit) -> MonitorResult<Option<ScanOutcome>> {
        let sequence = self
            .store
            .recent_scores(&student.id, habit, decline::WINDOW)
            .await?;
        let Some(recent) = sequence.recent() else {
            return Ok(None);
        };

        let context = StudentContext::from(student);
        let verdict = (|| assess_scores(self.composer.as_ref(), &context, habit, recent))
            .retry(&self.retry)
            .when(MonitorError::is_retryable)
            .notify(|err, dur| {
                warn!(
                    student_id = %student.id,
                    habit = habit.key(),
                    "generation failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    err
                )
            })
            .await?;

        Ok(Some(ScanOutcome {
            student: student.clone(),
            habit,
            scores: recent.to_vec(),
            verdict,
        }))
    }

    /// Checks every student × habit pair with at most `concurrency` in flight.
    /// Per-pair failures are collected instead of aborting the scan.
    pub async fn scan(&self, class_name: Option<&str>, concurrency: usize) -> MonitorResult<ScanSummary> {
        let students = self.store.students(class_name).await?;
        let pairs: Vec<(&Student, Habit)> = students
            .iter()
            .flat_map(|student| Habit::ALL.into_iter().map(move |habit| (student, habit)))
            .collect();

        let results: Vec<_> = stream::iter(pairs)
            .map(|(student, habit)| async move { (student, habit, self.check_pair(student, habit).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut summary = ScanSummary::default();
        for (student, habit, result) in results {
            match result {
                Ok(Some(outcome)) => summary.outcomes.push(outcome),
                Ok(None) => summary.skipped += 1,
                Err(err) => {
                    warn!(student_id = %student.id, habit = habit.key(), error = %err, "pair check failed");
                    summary.failures.push(ScanFailure {
                        student_id: student.id.clone(),
                        habit,
                        error: err.to_string(),
                    });
                }
            }
        }

        summary
            .outcomes
            .sort_by(|a, b| (&a.student.id, a.habit).cmp(&(&b.student.id, b.habit)));

        info!(
            students = students.len(),
            evaluated = summary.outcomes.len(),
            flagged = summary.flagged().count(),
            skipped = summary.skipped,
            failed = summary.failures.len(),
            "scan complete"
        );
        Ok(summary)
    }
}
