use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use uuid::Uuid;

mod compose;
mod config;
mod db;
mod decline;
mod error;
mod llm;
mod models;
mod monitor;
mod report;
mod store;
mod telemetry;

use compose::{ComposerKind, LlmComposer, MessageComposer, TemplateComposer};
use config::AppConfig;
use db::PgHabitStore;
use models::{clamp_score, DeclineRequest, Habit, HabitEntry};
use monitor::DeclineMonitor;
use store::HabitStore;

#[derive(Parser)]
#[command(name = "habit-decline-monitor")]
#[command(about = "Flags significant declines in students' daily habit scores", long_about = None)]
struct Cli {
    /// Message composer: template or llm (overrides HABIT_COMPOSER)
    #[arg(long, global = true)]
    composer: Option<ComposerKind>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo students and score histories
    Seed,
    /// Import habit scores from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record one day's score for a student and habit
    Record {
        #[arg(long)]
        student: String,
        #[arg(long)]
        habit: Habit,
        #[arg(long)]
        score: i32,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Evaluate a JSON request {studentId, habitName, habitScores} without the database
    Assess {
        #[arg(long)]
        input: PathBuf,
    },
    /// Evaluate the latest stored scores for one student and habit
    Check {
        #[arg(long)]
        student: String,
        #[arg(long)]
        habit: Habit,
    },
    /// Evaluate every student and habit, printing flagged declines
    Scan {
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

impl Commands {
    fn composes_messages(&self) -> bool {
        matches!(
            self,
            Commands::Assess { .. }
                | Commands::Check { .. }
                | Commands::Scan { .. }
                | Commands::Report { .. }
        )
    }
}

/// Database-only commands get `None`, so they never touch the LLM settings.
fn composer_for(
    command: &Commands,
    kind: ComposerKind,
    config: &AppConfig,
) -> anyhow::Result<Option<Box<dyn MessageComposer>>> {
    if !command.composes_messages() {
        return Ok(None);
    }
    build_composer(kind, config).map(Some)
}

fn recorded_entry(student: String, habit: Habit, score: i32, date: Option<NaiveDate>) -> HabitEntry {
    let recorded_on = date.unwrap_or_else(|| Utc::now().date_naive());
    let recorded_at = if date.is_some() {
        Utc.from_utc_datetime(&recorded_on.and_hms_opt(7, 0, 0).unwrap_or_default())
    } else {
        Utc::now()
    };
    HabitEntry {
        id: Uuid::new_v4(),
        student_id: student,
        habit,
        score: clamp_score(score, "record"),
        recorded_on,
        recorded_at,
    }
}

fn build_composer(kind: ComposerKind, config: &AppConfig) -> anyhow::Result<Box<dyn MessageComposer>> {
    match kind {
        ComposerKind::Template => Ok(Box::new(TemplateComposer)),
        ComposerKind::Llm => {
            let client = llm::LlmClient::from_env(config.llm.model.clone(), config.llm.timeout)
                .context("failed to configure the language model client")?;
            info!(model = client.model(), "using language model composer");
            Ok(Box::new(LlmComposer::new(client)))
        }
    }
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgHabitStore> {
    let database_url = config.require_database_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(PgHabitStore::new(pool))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.log_level)?;
    let composer = composer_for(&cli.command, cli.composer.unwrap_or(config.composer), &config)?
        .context("command needs a message composer");

    match cli.command {
        Commands::InitDb => {
            let store = connect(&config).await?;
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let store = connect(&config).await?;
            db::seed(&store).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let store = connect(&config).await?;
            let inserted = db::import_csv(&store, &csv).await?;
            println!("Inserted {inserted} scores from {}.", csv.display());
        }
        Commands::Record {
            student,
            habit,
            score,
            date,
        } => {
            let store = connect(&config).await?;
            let entry = recorded_entry(student, habit, score, date);
            store.record(&entry).await?;
            println!(
                "Recorded {} = {} for {} on {}.",
                entry.habit, entry.score, entry.student_id, entry.recorded_on
            );
        }
        Commands::Assess { input } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let request: DeclineRequest =
                serde_json::from_str(&raw).context("input is not a valid decline request")?;
            let verdict = monitor::assess(composer?.as_ref(), &request).await?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Commands::Check { student, habit } => {
            let monitor = DeclineMonitor::new(connect(&config).await?, composer?);
            let verdict = monitor.check(&student, habit).await?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Commands::Scan { class, concurrency } => {
            let monitor = DeclineMonitor::new(connect(&config).await?, composer?)
                .with_retry(monitor::retry_policy(config.scan_retries));
            let summary = monitor
                .scan(
                    class.as_deref(),
                    concurrency.unwrap_or(config.scan_concurrency),
                )
                .await?;

            let flagged: Vec<_> = summary.flagged().collect();
            if flagged.is_empty() {
                println!(
                    "No significant declines across {} evaluated pairs.",
                    summary.outcomes.len()
                );
            } else {
                println!("Significant declines:");
                for outcome in flagged {
                    println!(
                        "- {} ({}) {} {:?}: {}",
                        outcome.student.full_name,
                        outcome.student.class_name,
                        outcome.habit,
                        outcome.scores,
                        outcome.verdict.notification_message
                    );
                }
            }
            if !summary.failures.is_empty() {
                println!("{} pairs failed; see logs.", summary.failures.len());
            }
        }
        Commands::Report {
            class,
            concurrency,
            out,
        } => {
            let monitor = DeclineMonitor::new(connect(&config).await?, composer?)
                .with_retry(monitor::retry_policy(config.scan_retries));
            let summary = monitor
                .scan(
                    class.as_deref(),
                    concurrency.unwrap_or(config.scan_concurrency),
                )
                .await?;
            let report = report::build_report(class.as_deref(), Utc::now().date_naive(), &summary);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_config() -> AppConfig {
        AppConfig::from_lookup(|key| match key {
            "HABIT_COMPOSER" => Some("llm".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn database_commands_skip_composer_setup() {
        let config = llm_config();
        let commands = [
            Commands::InitDb,
            Commands::Seed,
            Commands::Import {
                csv: PathBuf::from("scores.csv"),
            },
            Commands::Record {
                student: "s-1".to_string(),
                habit: Habit::BangunPagi,
                score: 3,
                date: None,
            },
        ];
        for command in &commands {
            assert!(composer_for(command, ComposerKind::Llm, &config)
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn evaluating_commands_build_a_composer() {
        let config = llm_config();
        let command = Commands::Assess {
            input: PathBuf::from("request.json"),
        };
        assert!(command.composes_messages());
        assert!(composer_for(&command, ComposerKind::Template, &config)
            .unwrap()
            .is_some());
    }

    #[test]
    fn cli_parses_composer_before_database_command() {
        let cli = Cli::try_parse_from(["habit-decline-monitor", "--composer", "llm", "init-db"]).unwrap();
        assert_eq!(cli.composer, Some(ComposerKind::Llm));
        assert!(!cli.command.composes_messages());
    }

    #[test]
    fn recorded_entry_clamps_and_pins_date() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 4).unwrap();
        let entry = recorded_entry("s-1".to_string(), Habit::TidurCepat, 9, Some(date));
        assert_eq!(entry.score, 4);
        assert_eq!(entry.recorded_on, date);
        assert_eq!(
            entry.recorded_at,
            Utc.from_utc_datetime(&date.and_hms_opt(7, 0, 0).unwrap())
        );

        let entry = recorded_entry("s-1".to_string(), Habit::TidurCepat, 0, None);
        assert_eq!(entry.score, 1);
    }
}
