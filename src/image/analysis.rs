//! Image analysis with Gemini.
//!
//! Describes a source image and recommends which video provider should animate
//! it. The model answers with a JSON object; fields it leaves out default to
//! empty.

use crate::error::{parse_retry_after, sanitize_error_message, ProviderError, Result};
use crate::store::ImageAnalysisRecord;
use crate::video::{ImageRef, ProviderId};
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Multimodal model used for analysis.
pub const ANALYSIS_MODEL: &str = "gemini-2.0-flash";

const DEFAULT_SYSTEM_PROMPT: &str = "You analyze still images that will be animated into short \
videos and recommend the model to use: veo3 for complex scenes and natural motion, sora2 for \
quick animations at a lower cost, wav2lip when the subject should lip-sync to an audio track. \
Answer with one JSON object: {\"description\": string, \"subject_type\": \
\"person|animal|object|puppet\", \"recommended_model\": \"veo3|sora2|wav2lip\", \"reason\": \
string, \"tips\": [string]}";

const USER_INSTRUCTION: &str = "Analyze this image and recommend the best model to animate it.";

/// Builder for [`ImageAnalyzer`].
#[derive(Debug, Clone, Default)]
pub struct ImageAnalyzerBuilder {
    api_key: Option<String>,
    system_prompt: Option<String>,
}

impl ImageAnalyzerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Gemini API key (`ANALYSIS_LLM_KEY`, falling back to `GEMINI_KEY`).
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Replaces the built-in instructions. The text is sent as-is.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Builds the analyzer.
    pub fn build(self) -> Result<ImageAnalyzer> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::Auth("neither ANALYSIS_LLM_KEY nor GEMINI_KEY is set".into())
            })?;

        Ok(ImageAnalyzer {
            client: reqwest::Client::new(),
            api_key,
            system_prompt: self
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }
}

/// Gemini-backed image analyzer.
pub struct ImageAnalyzer {
    client: reqwest::Client,
    api_key: String,
    system_prompt: String,
}

impl std::fmt::Debug for ImageAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAnalyzer")
            .field("model", &ANALYSIS_MODEL)
            .finish_non_exhaustive()
    }
}

impl ImageAnalyzer {
    /// Creates a new `ImageAnalyzerBuilder`.
    pub fn builder() -> ImageAnalyzerBuilder {
        ImageAnalyzerBuilder::new()
    }

    /// Builds an analyzer from configuration.
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(key) = &config.analysis_key {
            builder = builder.api_key(key);
        }
        if let Some(prompt) = &config.analysis_system_prompt {
            builder = builder.system_prompt(prompt);
        }
        builder.build()
    }

    /// Analyzes one image.
    pub async fn analyze(&self, image: &ImageRef) -> Result<ImageAnalysis> {
        let start = Instant::now();
        let (data, mime_type) = image.load(&self.client).await?;

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{ANALYSIS_MODEL}:generateContent"
        );
        let body = AnalysisRequest::new(&self.system_prompt, &data, &mime_type);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let reply: AnalysisResponse = response.json().await?;
        let text = reply.into_text()?;
        let analysis = parse_analysis(&text)?;

        tracing::info!(
            image = %image,
            recommended = %analysis.recommended_model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "image analyzed"
        );
        Ok(analysis)
    }
}

/// What the analyzer made of an image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageAnalysis {
    /// Scene description.
    pub description: String,
    /// Subject category, e.g. `person` or `animal`.
    pub subject_type: String,
    /// Model the analyzer recommends, as it named it.
    pub recommended_model: String,
    /// Why that model.
    pub reason: String,
    /// Prompting tips.
    #[serde(deserialize_with = "one_or_many")]
    pub tips: Vec<String>,
}

impl ImageAnalysis {
    /// The recommended model as a provider id, when it names a known one.
    pub fn recommended_provider(&self) -> Option<ProviderId> {
        let name = self.recommended_model.trim().to_lowercase();
        if let Ok(id) = name.parse::<ProviderId>() {
            return Some(id);
        }
        if name.contains("wav2lip") {
            Some(ProviderId::FalWav2lip)
        } else if name.contains("sora") {
            Some(ProviderId::FalSora2)
        } else if name.contains("veo") {
            Some(ProviderId::FalVeo3)
        } else {
            None
        }
    }

    /// A new store record for this analysis.
    pub fn to_record(&self, image_ref: impl Into<String>) -> ImageAnalysisRecord {
        ImageAnalysisRecord {
            id: Uuid::new_v4(),
            image_ref: image_ref.into(),
            description: self.description.clone(),
            subject_type: self.subject_type.clone(),
            recommended_model: self.recommended_model.clone(),
            reason: self.reason.clone(),
            tips: self.tips.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Models sometimes answer `tips` with a single string.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tips {
        One(String),
        Many(Vec<String>),
        Missing(Option<()>),
    }

    Ok(match Tips::deserialize(deserializer)? {
        Tips::One(tip) if tip.trim().is_empty() => Vec::new(),
        Tips::One(tip) => vec![tip],
        Tips::Many(tips) => tips,
        Tips::Missing(_) => Vec::new(),
    })
}

/// Removes a surrounding Markdown code fence (```` ```json ... ``` ````).
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_analysis(text: &str) -> Result<ImageAnalysis> {
    let body = strip_code_fences(text);
    serde_json::from_str(body).or_else(|first_err| {
        // Prose around the object: fall back to the outermost braces.
        match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                serde_json::from_str(&body[start..=end]).map_err(ProviderError::from)
            }
            _ => Err(ProviderError::UnexpectedResponse(format!(
                "analysis reply is not JSON ({first_err}): {}",
                sanitize_error_message(body)
            ))),
        }
    })
}

fn parse_error(status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> ProviderError {
    let text = sanitize_error_message(text);
    if status == 429 {
        let retry_after = parse_retry_after(headers).map(std::time::Duration::from_secs);
        return ProviderError::RateLimited { retry_after };
    }
    if status == 401 || status == 403 {
        return ProviderError::Auth(text);
    }
    let lower = text.to_lowercase();
    if lower.contains("api key not valid") {
        return ProviderError::Auth(text);
    }
    if lower.contains("safety") || lower.contains("prohibited") || lower.contains("blocked") {
        return ProviderError::ContentBlocked(text);
    }
    if status == 400 {
        return ProviderError::InvalidRequest(text);
    }
    ProviderError::Api {
        status,
        message: text,
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

impl AnalysisRequest {
    fn new(system_prompt: &str, image: &[u8], mime_type: &str) -> Self {
        Self {
            system_instruction: Content {
                role: None,
                parts: vec![RequestPart::Text {
                    text: system_prompt.to_string(),
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: mime_type.to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                    RequestPart::Text {
                        text: USER_INSTRUCTION.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl AnalysisResponse {
    /// First text part, after checking for safety blocks.
    fn into_text(self) -> Result<String> {
        if let Some(feedback) = self.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                return Err(ProviderError::ContentBlocked(
                    feedback
                        .block_reason_message
                        .unwrap_or_else(|| format!("image blocked: {reason}")),
                ));
            }
        }

        let candidate = self.candidates.into_iter().next().ok_or_else(|| {
            ProviderError::EmptyResult("no candidates in analysis response".into())
        })?;

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if matches!(reason, "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "RECITATION") {
                return Err(ProviderError::ContentBlocked(format!(
                    "analysis blocked by Gemini safety filter: {reason}"
                )));
            }
        }

        candidate
            .content
            .into_iter()
            .flat_map(|c| c.parts)
            .find_map(|p| p.text.filter(|t| !t.trim().is_empty()))
            .ok_or_else(|| ProviderError::EmptyResult("analysis response has no text".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_key() {
        assert!(matches!(
            ImageAnalyzer::builder().build(),
            Err(ProviderError::Auth(_))
        ));
        assert!(ImageAnalyzer::builder().api_key("k").build().is_ok());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{}\n```\n"), "{}");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_analysis_with_defaults() {
        let text = "```json\n{\"description\": \"A puppet on a shelf\", \"recommended_model\": \"sora2\", \"tips\": \"Keep the camera still\"}\n```";
        let analysis = parse_analysis(text).unwrap();
        assert_eq!(analysis.description, "A puppet on a shelf");
        assert_eq!(analysis.subject_type, "");
        assert_eq!(analysis.tips, vec!["Keep the camera still"]);
        assert_eq!(analysis.recommended_provider(), Some(ProviderId::FalSora2));
    }

    #[test]
    fn test_parse_analysis_with_surrounding_prose() {
        let text = "Here you go: {\"recommended_model\": \"veo3\", \"tips\": [\"a\", \"b\"]} Enjoy!";
        let analysis = parse_analysis(text).unwrap();
        assert_eq!(analysis.tips, vec!["a", "b"]);
        assert_eq!(analysis.recommended_provider(), Some(ProviderId::FalVeo3));
    }

    #[test]
    fn test_parse_analysis_rejects_prose() {
        let err = parse_analysis("I cannot help with that.").unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedResponse(_)));
    }

    #[test]
    fn test_recommended_provider_mapping() {
        let mut analysis = ImageAnalysis::default();
        for (name, expected) in [
            ("Wav2Lip", Some(ProviderId::FalWav2lip)),
            ("veo3", Some(ProviderId::FalVeo3)),
            ("Sora 2", Some(ProviderId::FalSora2)),
            ("open_sora", Some(ProviderId::OpenSora)),
            ("google_veo3", Some(ProviderId::GoogleVeo3)),
            ("runway", None),
        ] {
            analysis.recommended_model = name.to_string();
            assert_eq!(analysis.recommended_provider(), expected, "{name}");
        }
    }

    #[test]
    fn test_to_record() {
        let analysis = ImageAnalysis {
            description: "d".into(),
            subject_type: "animal".into(),
            recommended_model: "veo3".into(),
            reason: "r".into(),
            tips: vec!["t".into()],
        };
        let record = analysis.to_record("https://x/y.jpg");
        assert_eq!(record.image_ref, "https://x/y.jpg");
        assert_eq!(record.subject_type, "animal");
        assert_eq!(record.tips, vec!["t"]);
    }

    #[test]
    fn test_request_serialization() {
        let req = AnalysisRequest::new("sys", &[1, 2, 3], "image/png");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(
            json["contents"][0]["parts"][0]["inline_data"]["mimeType"],
            "image/png"
        );
        assert_eq!(json["contents"][0]["parts"][0]["inline_data"]["data"], "AQID");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_response_text_and_blocks() {
        let ok: AnalysisResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "{}"}]}, "finishReason": "STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(ok.into_text().unwrap(), "{}");

        let blocked: AnalysisResponse = serde_json::from_str(
            r#"{"candidates": [], "promptFeedback": {"blockReason": "SAFETY"}}"#,
        )
        .unwrap();
        assert!(matches!(
            blocked.into_text(),
            Err(ProviderError::ContentBlocked(_))
        ));

        let unsafe_finish: AnalysisResponse =
            serde_json::from_str(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#).unwrap();
        assert!(matches!(
            unsafe_finish.into_text(),
            Err(ProviderError::ContentBlocked(_))
        ));

        let empty: AnalysisResponse = serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert!(matches!(empty.into_text(), Err(ProviderError::EmptyResult(_))));
    }

    #[test]
    fn test_parse_error_mapping() {
        let headers = reqwest::header::HeaderMap::new();
        assert!(matches!(
            parse_error(400, "API key not valid. Please pass a valid API key.", &headers),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            parse_error(429, "quota", &headers),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            parse_error(400, "bad image", &headers),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            parse_error(500, "boom", &headers),
            ProviderError::Api { status: 500, .. }
        ));
    }
}
