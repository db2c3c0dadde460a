use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::decline::{self, Trend};
use crate::error::{MonitorError, MonitorResult};
use crate::llm::{self, LlmClient};
use crate::models::StudentContext;

/// Produces the human-readable explanation for a verdict. The verdict is
/// authoritative: implementations must fail rather than contradict it.
#[async_trait]
pub trait MessageComposer: Send + Sync {
    async fn compose(
        &self,
        student: &StudentContext,
        habit_name: &str,
        scores: &[i32],
        should_notify: bool,
    ) -> MonitorResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerKind {
    Template,
    Llm,
}

impl FromStr for ComposerKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "template" => Ok(Self::Template),
            "llm" => Ok(Self::Llm),
            other => Err(format!("unknown composer '{other}', expected template or llm")),
        }
    }
}

fn format_scores(scores: &[i32]) -> String {
    scores
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Deterministic Indonesian templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateComposer;

#[async_trait]
impl MessageComposer for TemplateComposer {
    async fn compose(
        &self,
        student: &StudentContext,
        habit_name: &str,
        scores: &[i32],
        should_notify: bool,
    ) -> MonitorResult<String> {
        let window = decline::recent_window(scores)?;
        let trail = format_scores(window);
        let name = student.display_name();

        if should_notify {
            return Ok(format!(
                "Perhatian: nilai kebiasaan \"{habit_name}\" {name} menurun secara signifikan \
                 selama tiga hari berturut-turut ({trail}). Mohon orang tua atau guru \
                 pendamping menanyakan kabar dan mendampingi {name} agar kebiasaan ini kembali membaik."
            ));
        }

        // A declining shape without the flag is described neutrally.
        let shape = match decline::trend(window)? {
            Trend::Declining => "perlu terus dipantau",
            other => other.label(),
        };
        Ok(format!(
            "Tidak ada penurunan signifikan pada kebiasaan \"{habit_name}\" {name}. \
             Tren tiga hari terakhir {shape} ({trail})."
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedVerdict {
    should_notify: bool,
    notification_message: String,
}

const SYSTEM_PROMPT: &str = "Kamu adalah asisten pemantau kebiasaan siswa sekolah. \
Jawab hanya dengan objek JSON tanpa teks lain.";

/// Delegates wording to an external language model and validates the reply.
#[derive(Debug, Clone)]
pub struct LlmComposer {
    client: LlmClient,
}

impl LlmComposer {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }

    fn prompt(student: &StudentContext, habit_name: &str, scores: &[i32], should_notify: bool) -> String {
        let verdict = if should_notify {
            "TERJADI penurunan signifikan"
        } else {
            "TIDAK terjadi penurunan signifikan"
        };
        format!(
            "Analisis nilai kebiasaan \"{habit_name}\" milik siswa {name} (ID {id}{class}).\n\
             Nilai tiga hari terakhir (skala 1-4, dari yang paling lama): {trail}.\n\
             Penurunan signifikan berarti nilai turun minimal 1 poin setiap hari selama 3 hari berturut-turut.\n\
             Hasil evaluasi sistem: {verdict}. Jangan membantah hasil ini.\n\
             Tulis pesan notifikasi singkat dalam Bahasa Indonesia yang menyebut nama kebiasaan dan nilainya. \
             Jika terjadi penurunan, sarankan orang tua atau guru untuk menanyakan kabar siswa. \
             Jika tidak, jelaskan bahwa tidak ada penurunan signifikan dan gambarkan trennya.\n\
             Format jawaban: {{\"shouldNotify\": {should_notify}, \"notificationMessage\": \"...\"}}",
            name = student.display_name(),
            id = student.student_id,
            class = student
                .class_name
                .as_deref()
                .map(|c| format!(", kelas {c}"))
                .unwrap_or_default(),
            trail = format_scores(scores),
        )
    }
}

/// Rejects replies that are malformed, empty, or disagree with the verdict.
pub fn validate_generated(raw: &str, should_notify: bool) -> MonitorResult<String> {
    let json = llm::extract_json(raw);
    let generated: GeneratedVerdict = serde_json::from_str(json)
        .map_err(|e| MonitorError::generation(format!("unparseable model reply: {e}")))?;

    if generated.should_notify != should_notify {
        return Err(MonitorError::generation(format!(
            "model reply contradicts verdict (expected shouldNotify={should_notify})"
        )));
    }

    let message = generated.notification_message.trim();
    if message.is_empty() {
        return Err(MonitorError::generation("model returned an empty message"));
    }

    Ok(message.to_string())
}

#[async_trait]
impl MessageComposer for LlmComposer {
    async fn compose(
        &self,
        student: &StudentContext,
        habit_name: &str,
        scores: &[i32],
        should_notify: bool,
    ) -> MonitorResult<String> {
        let window = decline::recent_window(scores)?;
        let prompt = Self::prompt(student, habit_name, window, should_notify);
        let raw = self.client.ask(&prompt, Some(SYSTEM_PROMPT)).await?;

        validate_generated(&raw, should_notify).inspect_err(|err| {
            warn!(
                student_id = %student.student_id,
                habit = habit_name,
                error = %err,
                "discarding generated message"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> StudentContext {
        StudentContext {
            student_id: "s-001".to_string(),
            full_name: Some("Sari Wulandari".to_string()),
            class_name: Some("5A".to_string()),
        }
    }

    #[tokio::test]
    async fn template_alert_names_habit_and_scores() {
        let message = TemplateComposer
            .compose(&student(), "Bangun Pagi", &[4, 3, 2], true)
            .await
            .unwrap();
        assert!(message.contains("Bangun Pagi"));
        assert!(message.contains("4 → 3 → 2"));
        assert!(message.contains("menurun secara signifikan"));
        assert!(message.contains("orang tua"));
    }

    #[tokio::test]
    async fn template_reassurance_never_claims_decline() {
        for scores in [[4, 4, 4], [2, 3, 4], [4, 2, 3], [4, 3, 2]] {
            let message = TemplateComposer
                .compose(&student(), "Tidur Cepat", &scores, false)
                .await
                .unwrap();
            assert!(!message.is_empty());
            assert!(message.contains("Tidur Cepat"));
            assert!(message.starts_with("Tidak ada penurunan signifikan"));
            assert!(!message.contains("menurun"));
        }
    }

    #[tokio::test]
    async fn template_uses_only_recent_window() {
        let message = TemplateComposer
            .compose(&student(), "Beribadah", &[1, 1, 3, 3, 4], false)
            .await
            .unwrap();
        assert!(message.contains("meningkat"));
        assert!(message.contains("3 → 3 → 4"));
    }

    #[tokio::test]
    async fn template_flat_then_dip_reads_as_fluctuating() {
        let message = TemplateComposer
            .compose(&student(), "Bermasyarakat", &[4, 4, 3], false)
            .await
            .unwrap();
        assert!(message.contains("berfluktuasi"));
        assert!(!message.contains("naik"));
    }

    #[tokio::test]
    async fn template_falls_back_to_student_id() {
        let message = TemplateComposer
            .compose(&StudentContext::from_id("s-009"), "Berolahraga", &[3, 2, 1], true)
            .await
            .unwrap();
        assert!(message.contains("s-009"));
    }

    #[test]
    fn accepts_consistent_reply() {
        let raw = "```json\n{\"shouldNotify\": true, \"notificationMessage\": \"Nilai Bangun Pagi menurun.\"}\n```";
        assert_eq!(
            validate_generated(raw, true).unwrap(),
            "Nilai Bangun Pagi menurun."
        );
    }

    #[test]
    fn rejects_contradicting_reply() {
        let raw = r#"{"shouldNotify": true, "notificationMessage": "Menurun."}"#;
        assert!(matches!(
            validate_generated(raw, false),
            Err(MonitorError::GenerationFailure { retryable: false, .. })
        ));
    }

    #[test]
    fn rejects_empty_or_malformed_reply() {
        let empty = r#"{"shouldNotify": false, "notificationMessage": "   "}"#;
        assert!(validate_generated(empty, false).is_err());
        assert!(validate_generated("maaf, saya tidak bisa", false).is_err());
    }

    #[test]
    fn prompt_states_verdict_and_scores() {
        let prompt = LlmComposer::prompt(&student(), "Gemar Belajar", &[4, 3, 2], true);
        assert!(prompt.contains("TERJADI penurunan signifikan"));
        assert!(prompt.contains("4 → 3 → 2"));
        assert!(prompt.contains("\"shouldNotify\": true"));
    }

    #[test]
    fn composer_kind_parses() {
        assert_eq!("LLM".parse::<ComposerKind>().unwrap(), ComposerKind::Llm);
        assert_eq!(
            "template".parse::<ComposerKind>().unwrap(),
            ComposerKind::Template
        );
        assert!("gpt".parse::<ComposerKind>().is_err());
    }
}
