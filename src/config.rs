//! Process configuration.
//!
//! Built once at startup and passed explicitly to the dispatcher, the analyzer
//! and the speech client. Nothing in the crate reads the environment after
//! [`Config::from_env`] returns.

use std::path::PathBuf;
use std::time::Duration;

/// Default Hugging Face Space serving Open-Sora.
pub const DEFAULT_OPEN_SORA_SPACE: &str = "https://hpcai-tech-open-sora.hf.space";

/// Default Vertex AI region.
pub const DEFAULT_GCP_LOCATION: &str = "us-central1";

/// Credentials and paths for every external service.
///
/// Empty or whitespace-only values are treated as absent, so `FAL_KEY=` in a
/// `.env` file leaves fal.ai unavailable rather than failing at call time.
#[derive(Clone)]
pub struct Config {
    /// `FAL_KEY`: fal.ai queue API key.
    pub fal_key: Option<String>,
    /// `GEMINI_KEY`: Gemini Developer API key.
    pub gemini_key: Option<String>,
    /// `GOOGLE_VERTEX_API_KEY`: Vertex AI express-mode API key.
    pub vertex_api_key: Option<String>,
    /// `GOOGLE_CLOUD_PROJECT_ID`.
    pub gcp_project_id: Option<String>,
    /// `GOOGLE_CLOUD_LOCATION` (default `us-central1`).
    pub gcp_location: String,
    /// `GOOGLE_APPLICATION_CREDENTIALS`: service-account JSON key file.
    pub google_credentials: Option<PathBuf>,
    /// `HF_TOKEN`: Hugging Face access token.
    pub hf_token: Option<String>,
    /// `OPEN_SORA_SPACE_URL`: base URL of the Open-Sora Space.
    pub open_sora_space_url: String,
    /// `ELEVENLABS_KEY`: text-to-speech API key.
    pub elevenlabs_key: Option<String>,
    /// `ANALYSIS_LLM_KEY`, falling back to `GEMINI_KEY`.
    pub analysis_key: Option<String>,
    /// `ANALYSIS_SYSTEM_PROMPT`: instructions sent with every image analysis.
    pub analysis_system_prompt: Option<String>,
    /// `DB_PATH` (default `./database/video_gen.db`).
    pub db_path: PathBuf,
    /// `VIDEO_OUTPUT_DIR`: where inline video payloads are written.
    pub video_output_dir: PathBuf,
    /// `VIDGEN_TIMEOUT_SECS`: overrides every provider's call timeout.
    pub timeout_override: Option<Duration>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(v: &Option<String>) -> &'static str {
            if v.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }
        f.debug_struct("Config")
            .field("fal_key", &mask(&self.fal_key))
            .field("gemini_key", &mask(&self.gemini_key))
            .field("vertex_api_key", &mask(&self.vertex_api_key))
            .field("gcp_project_id", &self.gcp_project_id)
            .field("gcp_location", &self.gcp_location)
            .field("google_credentials", &self.google_credentials)
            .field("hf_token", &mask(&self.hf_token))
            .field("open_sora_space_url", &self.open_sora_space_url)
            .field("elevenlabs_key", &mask(&self.elevenlabs_key))
            .field("analysis_key", &mask(&self.analysis_key))
            .field("db_path", &self.db_path)
            .field("video_output_dir", &self.video_output_dir)
            .field("timeout_override", &self.timeout_override)
            .finish()
    }
}

impl Default for Config {
    /// No credentials, every path and URL at its default.
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Reads the process environment.
    ///
    /// | Env Var                           | Default                          |
    /// |-----------------------------------|----------------------------------|
    /// | `GOOGLE_CLOUD_LOCATION`           | `us-central1`                    |
    /// | `OPEN_SORA_SPACE_URL`             | public Open-Sora Space           |
    /// | `DB_PATH`                         | `./database/video_gen.db`        |
    /// | `VIDEO_OUTPUT_DIR`                | `<tmp>/vidgen`                   |
    /// | `VIDGEN_TIMEOUT_SECS`             | per-provider                     |
    ///
    /// Credentials have no default; a missing one only marks its providers
    /// unavailable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let gemini_key = get("GEMINI_KEY");
        let analysis_key = get("ANALYSIS_LLM_KEY").or_else(|| gemini_key.clone());

        let timeout_override = get("VIDGEN_TIMEOUT_SECS").and_then(|raw| match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => {
                tracing::warn!(value = %raw, "ignoring invalid VIDGEN_TIMEOUT_SECS");
                None
            }
        });

        Self {
            fal_key: get("FAL_KEY"),
            gemini_key,
            vertex_api_key: get("GOOGLE_VERTEX_API_KEY"),
            gcp_project_id: get("GOOGLE_CLOUD_PROJECT_ID"),
            gcp_location: get("GOOGLE_CLOUD_LOCATION")
                .unwrap_or_else(|| DEFAULT_GCP_LOCATION.to_string()),
            google_credentials: get("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            hf_token: get("HF_TOKEN"),
            open_sora_space_url: get("OPEN_SORA_SPACE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_OPEN_SORA_SPACE.to_string()),
            elevenlabs_key: get("ELEVENLABS_KEY"),
            analysis_key,
            analysis_system_prompt: get("ANALYSIS_SYSTEM_PROMPT"),
            db_path: get("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./database/video_gen.db")),
            video_output_dir: get("VIDEO_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("vidgen")),
            timeout_override,
        }
    }

    /// SQLite connection URL for [`Config::db_path`].
    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[]));
        assert!(config.fal_key.is_none());
        assert!(config.gemini_key.is_none());
        assert_eq!(config.gcp_location, "us-central1");
        assert_eq!(config.open_sora_space_url, DEFAULT_OPEN_SORA_SPACE);
        assert_eq!(config.db_path, PathBuf::from("./database/video_gen.db"));
        assert!(config.video_output_dir.ends_with("vidgen"));
        assert!(config.timeout_override.is_none());
    }

    #[test]
    fn test_blank_values_are_absent() {
        let config = Config::from_lookup(lookup(&[("FAL_KEY", "   "), ("HF_TOKEN", "")]));
        assert!(config.fal_key.is_none());
        assert!(config.hf_token.is_none());
    }

    #[test]
    fn test_values_are_trimmed() {
        let config = Config::from_lookup(lookup(&[
            ("FAL_KEY", " fal-123\n"),
            ("OPEN_SORA_SPACE_URL", "https://example.hf.space/"),
        ]));
        assert_eq!(config.fal_key.as_deref(), Some("fal-123"));
        assert_eq!(config.open_sora_space_url, "https://example.hf.space");
    }

    #[test]
    fn test_analysis_key_falls_back_to_gemini() {
        let config = Config::from_lookup(lookup(&[("GEMINI_KEY", "g-1")]));
        assert_eq!(config.analysis_key.as_deref(), Some("g-1"));

        let config = Config::from_lookup(lookup(&[
            ("GEMINI_KEY", "g-1"),
            ("ANALYSIS_LLM_KEY", "a-2"),
        ]));
        assert_eq!(config.analysis_key.as_deref(), Some("a-2"));
    }

    #[test]
    fn test_timeout_override() {
        let config = Config::from_lookup(lookup(&[("VIDGEN_TIMEOUT_SECS", "90")]));
        assert_eq!(config.timeout_override, Some(Duration::from_secs(90)));

        let config = Config::from_lookup(lookup(&[("VIDGEN_TIMEOUT_SECS", "soon")]));
        assert!(config.timeout_override.is_none());

        let config = Config::from_lookup(lookup(&[("VIDGEN_TIMEOUT_SECS", "0")]));
        assert!(config.timeout_override.is_none());
    }

    #[test]
    fn test_debug_masks_secrets() {
        let config = Config::from_lookup(lookup(&[("FAL_KEY", "fal-secret")]));
        let debug = format!("{config:?}");
        assert!(!debug.contains("fal-secret"));
        assert!(debug.contains("<set>"));
    }

    #[test]
    fn test_database_url() {
        let config = Config::from_lookup(lookup(&[("DB_PATH", "/var/lib/vidgen/app.db")]));
        assert_eq!(config.database_url(), "sqlite:///var/lib/vidgen/app.db?mode=rwc");
    }
}
