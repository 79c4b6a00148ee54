//! Text-to-speech with ElevenLabs.
//!
//! Produces the narration tracks that lip-sync providers animate. Audio comes
//! back inline as a `data:audio/mpeg;base64,` URL.

use crate::error::{parse_retry_after, sanitize_error_message, ProviderError, Result};
use crate::store::{AudioGenerationRecord, TokenUsage};
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

const API_BASE: &str = "https://api.elevenlabs.io/v1";

/// Multilingual model used for every synthesis.
pub const SPEECH_MODEL: &str = "eleven_multilingual_v2";

/// Voice used when the caller does not pick one.
pub const DEFAULT_VOICE_ID: &str = "cgSgspJ2msm6clMCkdW9";

/// Estimated seconds of speech per character.
const SECONDS_PER_CHAR: f64 = 0.05;

/// USD per 1000 characters.
const COST_PER_1000_CHARS: f64 = 0.30;

/// Billing service name for usage entries.
pub const SPEECH_SERVICE: &str = "elevenlabs";

/// Builder for [`SpeechClient`].
#[derive(Debug, Clone, Default)]
pub struct SpeechClientBuilder {
    api_key: Option<String>,
}

impl SpeechClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key (`ELEVENLABS_KEY`).
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Builds the client.
    pub fn build(self) -> Result<SpeechClient> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::Auth("ELEVENLABS_KEY not set".into()))?;

        Ok(SpeechClient {
            client: reqwest::Client::new(),
            api_key,
        })
    }
}

/// ElevenLabs client.
pub struct SpeechClient {
    client: reqwest::Client,
    api_key: String,
}

impl std::fmt::Debug for SpeechClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechClient").finish_non_exhaustive()
    }
}

impl SpeechClient {
    /// Creates a new `SpeechClientBuilder`.
    pub fn builder() -> SpeechClientBuilder {
        SpeechClientBuilder::new()
    }

    /// Builds a client from configuration.
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(key) = &config.elevenlabs_key {
            builder = builder.api_key(key);
        }
        builder.build()
    }

    /// Lists the voices available to the account.
    pub async fn voices(&self) -> Result<Vec<Voice>> {
        let response = self
            .client
            .get(format!("{API_BASE}/voices"))
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let list: VoiceList = response.json().await?;
        Ok(list.voices)
    }

    /// Synthesizes `text` with `voice_id`.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        settings: &VoiceSettings,
    ) -> Result<SpeechResult> {
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("text to speak is empty".into()));
        }

        let body = SynthesisRequest {
            text,
            model_id: SPEECH_MODEL,
            voice_settings: settings,
        };
        let response = self
            .client
            .post(format!("{API_BASE}/text-to-speech/{voice_id}"))
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(ProviderError::EmptyResult(
                "ElevenLabs returned no audio".into(),
            ));
        }

        let result = SpeechResult::new(text, voice_id, &audio);
        tracing::info!(
            voice_id,
            characters = result.characters,
            bytes = audio.len(),
            cost = result.cost,
            "speech synthesized"
        );
        Ok(result)
    }
}

/// Voice tuning. Defaults match ElevenLabs' recommended values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// 0.0 (expressive) to 1.0 (monotone).
    pub stability: f64,
    /// How closely to match the original voice.
    pub similarity_boost: f64,
    /// Style exaggeration.
    pub style: f64,
    /// Speaking rate.
    pub speed: f64,
    /// Boosts similarity at some latency cost.
    pub use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
            speed: 1.0,
            use_speaker_boost: true,
        }
    }
}

/// One voice from the account's library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    /// Voice id passed to [`SpeechClient::synthesize`].
    pub voice_id: String,
    /// Display name.
    pub name: String,
    /// Library category (`premade`, `cloned`, ...).
    #[serde(default = "default_category")]
    pub category: String,
    /// Free-form labels such as accent or age.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_category() -> String {
    "general".to_string()
}

/// Synthesized audio with its estimated duration and cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechResult {
    /// `data:audio/mpeg;base64,...`
    pub audio_url: String,
    /// Voice used.
    pub voice_id: String,
    /// Spoken text.
    pub text: String,
    /// Number of characters billed.
    pub characters: usize,
    /// Estimated duration in seconds.
    pub duration_secs: f64,
    /// Cost in USD.
    pub cost: f64,
}

impl SpeechResult {
    fn new(text: &str, voice_id: &str, audio: &[u8]) -> Self {
        let characters = text.chars().count();
        Self {
            audio_url: format!(
                "data:audio/mpeg;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(audio)
            ),
            voice_id: voice_id.to_string(),
            text: text.to_string(),
            characters,
            duration_secs: estimate_duration(characters),
            cost: estimate_cost(characters),
        }
    }

    /// A new store record for this audio.
    pub fn to_record(&self) -> AudioGenerationRecord {
        AudioGenerationRecord {
            id: Uuid::new_v4(),
            text: self.text.clone(),
            voice_id: self.voice_id.clone(),
            audio_url: self.audio_url.clone(),
            duration_secs: self.duration_secs,
            cost: self.cost,
            created_at: Utc::now(),
        }
    }

    /// Usage entry billing this synthesis.
    pub fn to_usage(&self) -> TokenUsage {
        TokenUsage::new(
            SPEECH_SERVICE,
            "text_to_speech",
            self.cost,
            Some(format!("characters={}", self.characters)),
        )
    }
}

/// Estimated duration of `characters` characters of speech.
pub fn estimate_duration(characters: usize) -> f64 {
    characters as f64 * SECONDS_PER_CHAR
}

/// Cost of synthesizing `characters` characters.
pub fn estimate_cost(characters: usize) -> f64 {
    characters as f64 / 1000.0 * COST_PER_1000_CHARS
}

fn parse_error(status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> ProviderError {
    let text = sanitize_error_message(text);
    match status {
        401 | 403 => ProviderError::Auth(text),
        429 => ProviderError::RateLimited {
            retry_after: parse_retry_after(headers).map(std::time::Duration::from_secs),
        },
        400 | 404 | 422 => {
            if text.contains("quota_exceeded") {
                ProviderError::Billing(text)
            } else {
                ProviderError::InvalidRequest(text)
            }
        }
        _ => ProviderError::Api {
            status,
            message: text,
        },
    }
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'static str,
    voice_settings: &'a VoiceSettings,
}

#[derive(Debug, Deserialize)]
struct VoiceList {
    #[serde(default)]
    voices: Vec<Voice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_key() {
        assert!(matches!(
            SpeechClient::builder().api_key("  ").build(),
            Err(ProviderError::Auth(_))
        ));
        assert!(SpeechClient::builder().api_key("xi").build().is_ok());
    }

    #[test]
    fn test_estimates() {
        assert_eq!(estimate_duration(0), 0.0);
        assert!((estimate_duration(200) - 10.0).abs() < 1e-9);
        assert!((estimate_cost(1000) - 0.30).abs() < 1e-9);
        assert!((estimate_cost(250) - 0.075).abs() < 1e-9);
    }

    #[test]
    fn test_result_counts_characters_not_bytes() {
        let result = SpeechResult::new("olá", DEFAULT_VOICE_ID, &[1, 2, 3]);
        assert_eq!(result.characters, 3);
        assert_eq!(result.audio_url, "data:audio/mpeg;base64,AQID");

        let record = result.to_record();
        assert_eq!(record.voice_id, DEFAULT_VOICE_ID);
        assert_eq!(record.text, "olá");

        let usage = result.to_usage();
        assert_eq!(usage.service, "elevenlabs");
        assert_eq!(usage.operation, "text_to_speech");
        assert_eq!(usage.details.as_deref(), Some("characters=3"));
    }

    #[test]
    fn test_request_serialization() {
        let settings = VoiceSettings::default();
        let body = SynthesisRequest {
            text: "hi",
            model_id: SPEECH_MODEL,
            voice_settings: &settings,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model_id"], "eleven_multilingual_v2");
        assert_eq!(json["voice_settings"]["similarity_boost"], 0.75);
        assert_eq!(json["voice_settings"]["use_speaker_boost"], true);
    }

    #[test]
    fn test_voice_list_defaults() {
        let list: VoiceList = serde_json::from_str(
            r#"{"voices": [{"voice_id": "v1", "name": "Ana"}, {"voice_id": "v2", "name": "Rui", "category": "premade", "labels": {"accent": "portuguese"}}]}"#,
        )
        .unwrap();
        assert_eq!(list.voices[0].category, "general");
        assert!(list.voices[0].labels.is_empty());
        assert_eq!(list.voices[1].labels["accent"], "portuguese");
    }

    #[test]
    fn test_parse_error_mapping() {
        let headers = reqwest::header::HeaderMap::new();
        assert!(matches!(parse_error(401, "bad key", &headers), ProviderError::Auth(_)));
        assert!(matches!(
            parse_error(400, "{\"detail\":{\"status\":\"quota_exceeded\"}}", &headers),
            ProviderError::Billing(_)
        ));
        assert!(matches!(
            parse_error(404, "voice_not_found", &headers),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            parse_error(503, "down", &headers),
            ProviderError::Api { status: 503, .. }
        ));
    }
}
