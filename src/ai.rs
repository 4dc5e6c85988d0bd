//! Mood analysis and writing assistance from a language model.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, trace};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{merge_tags, AiConfig, JournalError, MoodEntry, Note, NotePatch, Result};

/// Shorter (trimmed) text is not sent for analysis.
pub const MIN_ANALYSIS_CHARS: usize = 10;

/// Structured result of analyzing an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodAnalysis {
    pub mood: String,
    /// 0 to 10
    pub mood_score: f32,
    /// Hex color matching the mood
    pub mood_color: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub reflection_question: String,
}

/// Port to the inference service
#[async_trait]
pub trait InsightService: Send + Sync {
    /// Classifies the mood of `text` and suggests tags, a summary and a
    /// reflection question.
    async fn analyze(&self, text: &str) -> Result<MoodAnalysis>;

    /// Two or three sentences continuing `text` in its own voice.
    async fn continue_text(&self, text: &str) -> Result<String>;
}

/// Fails with [`JournalError::Analysis`] when `text` is too short to analyze.
pub fn ensure_analyzable(text: &str) -> Result<()> {
    if text.trim().chars().count() < MIN_ANALYSIS_CHARS {
        return Err(JournalError::Analysis {
            message: format!("need at least {} characters of text", MIN_ANALYSIS_CHARS),
        });
    }
    Ok(())
}

/// Patch recording `analysis` on `note` at time `at`.
///
/// The mood is appended to the history, suggested tags are merged into the
/// existing ones and the summary and reflection question are replaced.
pub fn analysis_patch(note: &Note, analysis: &MoodAnalysis, at: DateTime<Utc>) -> NotePatch {
    let score = analysis.mood_score.round().clamp(0.0, 10.0) as u8;
    NotePatch {
        tags: Some(merge_tags(&note.tags, &analysis.tags)),
        mood_entry: Some(MoodEntry::new(
            analysis.mood.clone(),
            score,
            analysis.mood_color.clone(),
            at,
        )),
        ai_summary: Some(analysis.summary.clone()),
        ai_reflection: Some(analysis.reflection_question.clone()),
        ..Default::default()
    }
}

/// Appends a continuation, separated by a space unless `content` already ends
/// in whitespace.
pub fn append_continuation(content: &str, continuation: &str) -> String {
    let continuation = continuation.trim();
    if continuation.is_empty() {
        return content.to_string();
    }
    if content.is_empty() || content.ends_with(char::is_whitespace) {
        format!("{}{}", content, continuation)
    } else {
        format!("{} {}", content, continuation)
    }
}

/// Reads a [`MoodAnalysis`] out of a model reply, tolerating code fences and
/// prose around the JSON object.
pub fn parse_analysis(reply: &str) -> Result<MoodAnalysis> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            return Err(JournalError::Analysis {
                message: "reply contains no JSON object".to_string(),
            })
        }
    };
    serde_json::from_str(json).map_err(|e| JournalError::Analysis {
        message: format!("malformed analysis: {}", e),
    })
}

const ANALYSIS_PROMPT: &str = "Analyze the mood of the journal entry below. Reply with only a JSON object with the keys \
\"mood\" (one lowercase word), \"moodScore\" (0 to 10, 10 brightest), \"moodColor\" (hex color such as #f5c542), \
\"tags\" (3 to 5 short lowercase strings), \"summary\" (one sentence) and \"reflectionQuestion\" (one question for the writer).";

const CONTINUE_PROMPT: &str = "Continue the text below with two or three sentences in the same voice, tense and style. \
Reply with the continuation only, without repeating the text.";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Client for an OpenAI-compatible chat completions endpoint
pub struct OpenAiInsightClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiInsightClient {
    pub fn new(config: &AiConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| JournalError::ConfigError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Builds a client with the key found in the configured environment
    /// variable.
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let api_key = config.api_key().ok_or_else(|| JournalError::ConfigError {
            message: format!("environment variable {} is not set", config.api_key_env),
        })?;
        Self::new(config, api_key)
    }

    async fn chat(&self, instruction: &str, text: &str, temperature: f32) -> std::result::Result<String, String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: instruction.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        trace!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!("API error ({}): {}", status, error_text));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("unreadable response: {}", e))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| "response has no choices".to_string())
    }
}

#[async_trait]
impl InsightService for OpenAiInsightClient {
    async fn analyze(&self, text: &str) -> Result<MoodAnalysis> {
        ensure_analyzable(text)?;
        let reply = self
            .chat(ANALYSIS_PROMPT, text, 0.2)
            .await
            .map_err(|message| JournalError::Analysis { message })?;
        debug!("Analysis reply of {} bytes", reply.len());
        parse_analysis(&reply)
    }

    async fn continue_text(&self, text: &str) -> Result<String> {
        let reply = self
            .chat(CONTINUE_PROMPT, text, 0.8)
            .await
            .map_err(|message| JournalError::Continuation { message })?;
        Ok(reply.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn analysis() -> MoodAnalysis {
        MoodAnalysis {
            mood: "hopeful".into(),
            mood_score: 7.6,
            mood_color: "#f5c542".into(),
            tags: vec!["spring".into(), "garden".into(), "Garden".into()],
            summary: "A first warm day in the garden.".into(),
            reflection_question: "What are you planting next?".into(),
        }
    }

    #[test]
    fn parses_fenced_reply() {
        let reply = "```json\n{\"mood\":\"calm\",\"moodScore\":6,\"moodColor\":\"#00aaff\",\"tags\":[\"sea\"],\"summary\":\"s\",\"reflectionQuestion\":\"q\"}\n```";
        let parsed = parse_analysis(reply).unwrap();
        assert_eq!(parsed.mood, "calm");
        assert_eq!(parsed.tags, vec!["sea"]);
        assert!(matches!(
            parse_analysis("I cannot help with that."),
            Err(JournalError::Analysis { .. })
        ));
    }

    #[test]
    fn patch_appends_mood_and_merges_tags() {
        let note = Note::new("garden", "Planted tulips today.", vec!["garden".into()]);
        let at = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let updated = note.updated(&analysis_patch(&note, &analysis(), at));

        assert_eq!(updated.tags, vec!["garden", "spring", "Garden"]);
        assert_eq!(updated.mood_history.len(), 1);
        let mood = updated.current_mood().unwrap();
        assert_eq!((mood.mood.as_str(), mood.score, mood.timestamp), ("hopeful", 8, at));
        assert_eq!(updated.mood, Some(mood.clone()));
        assert_eq!(updated.ai_reflection.as_deref(), Some("What are you planting next?"));
    }

    #[test]
    fn out_of_range_score_is_clamped() {
        let note = Note::new("t", "c", vec![]);
        let wild = MoodAnalysis {
            mood_score: 42.0,
            ..analysis()
        };
        let patch = analysis_patch(&note, &wild, Utc::now());
        assert_eq!(patch.mood_entry.map(|m| m.score), Some(10));
    }

    #[test]
    fn continuation_is_separated_by_one_space() {
        assert_eq!(append_continuation("It rained.", "Then it stopped."), "It rained. Then it stopped.");
        assert_eq!(append_continuation("It rained.\n", "Then it stopped."), "It rained.\nThen it stopped.");
        assert_eq!(append_continuation("It rained.", "   "), "It rained.");
    }

    #[tokio::test]
    async fn short_text_is_rejected_before_any_request() {
        let config = AiConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..AiConfig::default()
        };
        let client = OpenAiInsightClient::new(&config, "unused".into()).unwrap();
        assert!(matches!(
            client.analyze("  too short ").await,
            Err(JournalError::Analysis { .. })
        ));
        assert!(ensure_analyzable("ten chars!").is_ok());
    }
}
