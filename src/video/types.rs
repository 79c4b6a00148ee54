//! Core types for video generation.

use crate::error::{ProviderError, Result};
use crate::image::ImageFormat;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of an external video generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Veo 3.1 through the fal.ai queue.
    FalVeo3,
    /// Sora 2 through the fal.ai queue.
    FalSora2,
    /// Wav2Lip lip-sync through the fal.ai queue.
    FalWav2lip,
    /// Veo 3.1 preview through the Gemini Developer API.
    GoogleVeo31Gemini,
    /// Veo 3.1 through Vertex AI.
    GoogleVeo3,
    /// Open-Sora on a Hugging Face Space.
    OpenSora,
}

impl ProviderId {
    /// Every known provider, in display order.
    pub const ALL: [ProviderId; 6] = [
        Self::FalVeo3,
        Self::FalSora2,
        Self::FalWav2lip,
        Self::GoogleVeo31Gemini,
        Self::GoogleVeo3,
        Self::OpenSora,
    ];

    /// Stable wire token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FalVeo3 => "fal_veo3",
            Self::FalSora2 => "fal_sora2",
            Self::FalWav2lip => "fal_wav2lip",
            Self::GoogleVeo31Gemini => "google_veo31_gemini",
            Self::GoogleVeo3 => "google_veo3",
            Self::OpenSora => "open_sora",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == token)
            .ok_or_else(|| ProviderError::InvalidRequest(format!("unknown provider: {s}")))
    }
}

/// Output aspect ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 16:9.
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    /// 9:16.
    #[serde(rename = "9:16")]
    Portrait,
    /// 1:1.
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    /// The ratio as providers spell it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Square => "1:1",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "16:9" => Ok(Self::Landscape),
            "9:16" => Ok(Self::Portrait),
            "1:1" => Ok(Self::Square),
            other => Err(ProviderError::InvalidRequest(format!(
                "unsupported aspect ratio: {other} (expected 16:9, 9:16 or 1:1)"
            ))),
        }
    }
}

/// Source image for image-to-video generation.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Publicly reachable http(s) URL.
    Url(String),
    /// Raw image bytes.
    Inline {
        /// Encoded image.
        data: Vec<u8>,
        /// MIME type, e.g. `image/png`.
        mime_type: String,
    },
    /// Local file.
    Path(PathBuf),
}

impl ImageRef {
    /// Parses a user-supplied reference.
    ///
    /// `http(s)://` becomes [`ImageRef::Url`], `data:<mime>;base64,...` is
    /// decoded into [`ImageRef::Inline`], anything else is a local path.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ProviderError::InvalidRequest("image reference is empty".into()));
        }

        let lower = reference.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Self::Url(reference.to_string()));
        }

        if let Some(rest) = reference.strip_prefix("data:") {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                ProviderError::InvalidRequest("malformed data URI: missing payload".into())
            })?;
            let mime_type = header
                .strip_suffix(";base64")
                .ok_or_else(|| {
                    ProviderError::InvalidRequest("data URI images must be base64-encoded".into())
                })?
                .to_string();
            let data = base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .map_err(|e| ProviderError::Decode(format!("invalid base64 image data: {e}")))?;
            let mime_type = if mime_type.is_empty() {
                sniff_mime(&data)
            } else {
                mime_type
            };
            return Ok(Self::Inline { data, mime_type });
        }

        Ok(Self::Path(PathBuf::from(reference)))
    }

    /// Wraps raw bytes, detecting the MIME type from magic bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mime_type = sniff_mime(&data);
        Self::Inline { data, mime_type }
    }

    /// A string a remote service can fetch: the URL itself, or a `data:` URI.
    pub async fn to_remote_url(&self) -> Result<String> {
        match self {
            Self::Url(url) => Ok(url.clone()),
            Self::Inline { data, mime_type } => Ok(data_uri(mime_type, data)),
            Self::Path(path) => {
                let data = tokio::fs::read(path).await?;
                Ok(data_uri(&sniff_mime(&data), &data))
            }
        }
    }

    /// Loads the image bytes and their MIME type.
    pub async fn load(&self, client: &reqwest::Client) -> Result<(Vec<u8>, String)> {
        match self {
            Self::Inline { data, mime_type } => Ok((data.clone(), mime_type.clone())),
            Self::Path(path) => {
                let data = tokio::fs::read(path).await?;
                let mime = sniff_mime(&data);
                Ok((data, mime))
            }
            Self::Url(url) => {
                let response = client.get(url).send().await?;
                if !response.status().is_success() {
                    return Err(ProviderError::InvalidRequest(format!(
                        "could not download source image ({}): {}",
                        response.status().as_u16(),
                        url
                    )));
                }
                let data = response.bytes().await?.to_vec();
                let mime = sniff_mime(&data);
                Ok((data, mime))
            }
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Inline { data, mime_type } => {
                write!(f, "<inline {mime_type}, {} bytes>", data.len())
            }
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

impl std::fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Inline { data, mime_type } => f
                .debug_struct("Inline")
                .field("mime_type", mime_type)
                .field("len", &data.len())
                .finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

fn sniff_mime(data: &[u8]) -> String {
    ImageFormat::from_magic_bytes(data)
        .unwrap_or(ImageFormat::Jpeg)
        .mime_type()
        .to_string()
}

fn data_uri(mime_type: &str, data: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(data)
    )
}

/// A request to animate an image.
#[derive(Debug, Clone)]
pub struct VideoGenerationRequest {
    /// Service to run the generation on.
    pub provider: ProviderId,
    /// Source image.
    pub image: ImageRef,
    /// Text prompt describing the motion.
    pub prompt: String,
    /// Requested duration in seconds. Adapters translate it to what their
    /// service accepts.
    pub duration_secs: u32,
    /// Whether to generate an audio track.
    pub with_audio: bool,
    /// Output aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// Driving audio for lip-sync providers (URL or `data:` URI).
    pub audio_url: Option<String>,
}

impl VideoGenerationRequest {
    /// Creates a silent 8 second 16:9 request.
    pub fn new(provider: ProviderId, image: ImageRef, prompt: impl Into<String>) -> Self {
        Self {
            provider,
            image,
            prompt: prompt.into(),
            duration_secs: 8,
            with_audio: false,
            aspect_ratio: AspectRatio::default(),
            audio_url: None,
        }
    }

    /// Sets the requested duration in seconds.
    pub fn with_duration(mut self, secs: u32) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Enables or disables audio generation.
    pub fn with_audio(mut self, with_audio: bool) -> Self {
        self.with_audio = with_audio;
        self
    }

    /// Sets the aspect ratio.
    pub fn with_aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.aspect_ratio = ratio;
        self
    }

    /// Sets the driving audio for lip-sync.
    pub fn with_audio_url(mut self, url: impl Into<String>) -> Self {
        self.audio_url = Some(url.into());
        self
    }
}

/// Outcome tag carried by a [`VideoGenerationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    /// The provider returned a video.
    Success,
    /// The provider failed.
    Failed,
}

/// Pricing tier of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Paid hosted models.
    Premium,
    /// Free-tier models.
    Economy,
}

impl GenerationMode {
    /// Lowercase label as stored in records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Economy => "economy",
        }
    }
}

impl std::str::FromStr for GenerationMode {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "premium" => Ok(Self::Premium),
            "economy" => Ok(Self::Economy),
            other => Err(ProviderError::InvalidRequest(format!(
                "unknown generation mode: {other}"
            ))),
        }
    }
}

/// Metadata about the generation process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Upstream model identifier.
    pub model: Option<String>,
    /// Upstream job or operation identifier.
    pub job_id: Option<String>,
    /// Wall-clock time spent on the provider call, in milliseconds.
    pub elapsed_ms: Option<u64>,
}

/// A successfully generated video.
///
/// Only constructible through [`VideoGenerationResult::success`], which
/// rejects an empty locator and a negative cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoGenerationResult {
    video_url: String,
    provider: ProviderId,
    duration_secs: u32,
    cost: f64,
    with_audio: bool,
    status: GenerationStatus,
    metadata: VideoMetadata,
}

impl VideoGenerationResult {
    /// Builds a success result.
    ///
    /// `duration_secs` is the duration actually submitted and `cost` is billed
    /// for it.
    pub fn success(
        video_url: impl Into<String>,
        provider: ProviderId,
        duration_secs: u32,
        cost: f64,
        with_audio: bool,
        metadata: VideoMetadata,
    ) -> Result<Self> {
        let video_url = video_url.into();
        if video_url.trim().is_empty() {
            return Err(ProviderError::EmptyResult(format!(
                "{provider} reported success without a video locator"
            )));
        }
        if !cost.is_finite() || cost < 0.0 {
            return Err(ProviderError::UnexpectedResponse(format!(
                "{provider} produced an invalid cost: {cost}"
            )));
        }
        Ok(Self {
            video_url,
            provider,
            duration_secs,
            cost,
            with_audio,
            status: GenerationStatus::Success,
            metadata,
        })
    }

    /// URL or local path of the video.
    pub fn video_url(&self) -> &str {
        &self.video_url
    }

    /// Provider that produced the video.
    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    /// Effective duration in seconds.
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// Cost in USD, full precision.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Whether the video has an audio track.
    pub fn with_audio(&self) -> bool {
        self.with_audio
    }

    /// Always [`GenerationStatus::Success`]; failures are returned as errors.
    pub fn status(&self) -> GenerationStatus {
        self.status
    }

    /// Generation metadata.
    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }
}
