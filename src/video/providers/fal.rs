//! fal.ai queue adapter (Veo 3.1, Sora 2, Wav2Lip).

use crate::error::{
    parse_retry_after, redact_secrets, sanitize_error_message, ProviderError, Result,
};
use crate::video::catalog::ProviderFamily;
use crate::video::provider::{billed_result, VideoProvider};
use crate::video::types::{
    AspectRatio, ProviderId, VideoGenerationRequest, VideoGenerationResult, VideoMetadata,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const QUEUE_BASE_URL: &str = "https://queue.fal.run";

/// Builder for [`FalProvider`].
#[derive(Debug, Clone)]
pub struct FalProviderBuilder {
    api_key: Option<String>,
    provider: ProviderId,
    poll_interval: Duration,
    timeout: Duration,
}

impl FalProviderBuilder {
    /// Creates a builder for one of the fal.ai providers.
    pub fn new(provider: ProviderId) -> Self {
        Self {
            api_key: None,
            provider,
            poll_interval: Duration::from_secs(3),
            timeout: provider.spec().default_timeout,
        }
    }

    /// Sets the API key (`FAL_KEY`).
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the polling interval for queued jobs.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum time to wait for a job.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the adapter.
    pub fn build(self) -> Result<FalProvider> {
        if self.provider.spec().family != ProviderFamily::FalAi {
            return Err(ProviderError::InvalidRequest(format!(
                "{} is not served by fal.ai",
                self.provider
            )));
        }
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::Auth("FAL_KEY not set".into()))?;

        Ok(FalProvider {
            client: reqwest::Client::new(),
            api_key,
            provider: self.provider,
            poll_interval: self.poll_interval,
            timeout: self.timeout,
        })
    }
}

/// fal.ai image-to-video adapter.
///
/// Jobs go through fal.ai's queue: submit, poll the returned status URL, then
/// fetch the result. One instance serves one provider id.
#[derive(Debug)]
pub struct FalProvider {
    client: reqwest::Client,
    api_key: String,
    provider: ProviderId,
    poll_interval: Duration,
    timeout: Duration,
}

impl FalProvider {
    /// Creates a new [`FalProviderBuilder`].
    pub fn builder(provider: ProviderId) -> FalProviderBuilder {
        FalProviderBuilder::new(provider)
    }

    fn model_id(&self) -> &'static str {
        self.provider.spec().model
    }

    fn auth_header(&self) -> String {
        format!("Key {}", self.api_key)
    }

    fn parse_error(&self, status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> ProviderError {
        let text = redact_secrets(text);

        let detail = serde_json::from_str::<FalErrorResponse>(&text)
            .ok()
            .map(|e| e.detail.render())
            .unwrap_or_else(|| text.clone());
        let lower = detail.to_lowercase();

        if lower.contains("content_policy_violation") || lower.contains("content policy") {
            return ProviderError::ContentBlocked(detail);
        }
        if status == 401
            || status == 403
            || lower.contains("no user found")
            || lower.contains("unauthorized")
            || lower.contains("invalid key")
        {
            return ProviderError::Auth(detail);
        }
        if status == 429 || (lower.contains("rate") && lower.contains("limit")) {
            let retry_after = parse_retry_after(headers).map(Duration::from_secs);
            return ProviderError::RateLimited { retry_after };
        }
        if lower.contains("exhausted balance") || lower.contains("insufficient") {
            return ProviderError::Billing(detail);
        }
        if status == 400 || status == 422 {
            return ProviderError::InvalidRequest(detail);
        }

        ProviderError::Api {
            status,
            message: detail,
        }
    }

    async fn error_from(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        self.parse_error(status, &text, &headers)
    }

    /// Submits the job and returns the queue handles.
    async fn submit(&self, body: &FalVideoRequest) -> Result<FalSubmitResponse> {
        let url = format!("{}/{}", QUEUE_BASE_URL, self.model_id());

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }

        Ok(response.json().await?)
    }

    /// Polls the queue until the job leaves `IN_QUEUE`/`IN_PROGRESS`.
    async fn poll_until_ready(&self, request_id: &str, status_url: &str) -> Result<()> {
        let start = Instant::now();

        loop {
            if start.elapsed() > self.timeout {
                return Err(ProviderError::Timeout(self.timeout));
            }

            let response = self
                .client
                .get(status_url)
                .header("Authorization", self.auth_header())
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(self.error_from(response).await);
            }

            let status_response: FalStatusResponse = response.json().await?;

            match status_response.status.as_str() {
                "COMPLETED" => {
                    if let Some(error) = status_response.error {
                        return Err(self.parse_error(200, &error, &Default::default()));
                    }
                    return Ok(());
                }
                "IN_QUEUE" | "IN_PROGRESS" => {
                    tracing::debug!(
                        provider = %self.provider,
                        request_id = %request_id,
                        status = %status_response.status,
                        queue_position = ?status_response.queue_position,
                        elapsed_secs = start.elapsed().as_secs(),
                        "polling fal.ai job"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                }
                "FAILED" | "ERROR" => {
                    let message = status_response
                        .error
                        .unwrap_or_else(|| "fal.ai job failed".into());
                    return Err(ProviderError::VideoGeneration(message));
                }
                other => {
                    return Err(ProviderError::UnexpectedResponse(format!(
                        "fal.ai returned unexpected status: {other}"
                    )));
                }
            }
        }
    }

    /// Fetches the finished job's video URL.
    ///
    /// Tries the `response_url` fal.ai returned first; nested model paths
    /// sometimes 404 there, so it falls back to the model-id based URL.
    async fn fetch_result(&self, response_url: &str, request_id: &str) -> Result<String> {
        let mut response = self
            .client
            .get(response_url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if matches!(response.status().as_u16(), 404 | 405) {
            let fallback_url = format!(
                "{}/{}/requests/{}",
                QUEUE_BASE_URL,
                self.model_id(),
                request_id
            );
            tracing::debug!(
                response_url = %response_url,
                fallback_url = %fallback_url,
                "fal.ai response_url not found, using model-based URL"
            );
            response = self
                .client
                .get(&fallback_url)
                .header("Authorization", self.auth_header())
                .send()
                .await?;
        }

        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }

        let body = response.text().await?;
        extract_video_url(&body)
    }
}

/// Pulls `video.url` out of a fal.ai result body.
fn extract_video_url(body: &str) -> Result<String> {
    let result: FalVideoResult = serde_json::from_str(body)?;
    result
        .video
        .and_then(|v| v.url)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ProviderError::EmptyResult(sanitize_error_message(body)))
}

#[async_trait]
impl VideoProvider for FalProvider {
    async fn generate(&self, request: &VideoGenerationRequest) -> Result<VideoGenerationResult> {
        let start = Instant::now();
        let submitted_secs = self.provider.spec().duration.apply(request.duration_secs);
        let image_url = request.image.to_remote_url().await?;
        let body = FalVideoRequest::build(self.provider, request, image_url, submitted_secs)?;

        let submit = self.submit(&body).await?;
        tracing::debug!(
            provider = %self.provider,
            request_id = %submit.request_id,
            model = %self.model_id(),
            duration_secs = submitted_secs,
            "submitted fal.ai job"
        );

        self.poll_until_ready(&submit.request_id, &submit.status_url)
            .await?;

        let video_url = self
            .fetch_result(&submit.response_url, &submit.request_id)
            .await?;
        tracing::debug!(provider = %self.provider, url = %video_url, "fetched fal.ai result");

        billed_result(
            self.provider,
            video_url,
            submitted_secs,
            request.with_audio,
            VideoMetadata {
                model: Some(self.model_id().to_string()),
                job_id: Some(submit.request_id),
                elapsed_ms: Some(start.elapsed().as_millis() as u64),
            },
        )
    }

    fn id(&self) -> ProviderId {
        self.provider
    }

    async fn health_check(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(ProviderError::Auth("FAL_KEY is empty".into()));
        }
        Ok(())
    }
}

// Request types

/// fal.ai takes Veo durations as `"8s"` tokens and Sora durations as integers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum FalDuration {
    Token(String),
    Seconds(u32),
}

#[derive(Debug, Serialize)]
struct FalVideoRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    /// Source frame for the image-to-video models.
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    /// Portrait to lip-sync; Wav2Lip names its image input this way.
    #[serde(skip_serializing_if = "Option::is_none")]
    face_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<FalDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generate_audio: Option<bool>,
    /// Driving audio for lip-sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_url: Option<String>,
}

impl FalVideoRequest {
    fn build(
        provider: ProviderId,
        request: &VideoGenerationRequest,
        image_url: String,
        submitted_secs: u32,
    ) -> Result<Self> {
        match provider {
            ProviderId::FalVeo3 => Ok(Self {
                prompt: Some(request.prompt.clone()),
                image_url: Some(image_url),
                face_url: None,
                duration: Some(FalDuration::Token(format!("{submitted_secs}s"))),
                aspect_ratio: Some(match request.aspect_ratio {
                    AspectRatio::Square => "auto".to_string(),
                    other => other.as_str().to_string(),
                }),
                generate_audio: Some(request.with_audio),
                audio_url: None,
            }),
            ProviderId::FalSora2 => Ok(Self {
                prompt: Some(request.prompt.clone()),
                image_url: Some(image_url),
                face_url: None,
                duration: Some(FalDuration::Seconds(submitted_secs)),
                aspect_ratio: Some(match request.aspect_ratio {
                    AspectRatio::Square => "auto".to_string(),
                    other => other.as_str().to_string(),
                }),
                generate_audio: None,
                audio_url: None,
            }),
            ProviderId::FalWav2lip => {
                let audio_url = request
                    .audio_url
                    .clone()
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| {
                        ProviderError::InvalidRequest(
                            "fal_wav2lip requires an audio reference (audio_url)".into(),
                        )
                    })?;
                Ok(Self {
                    prompt: None,
                    image_url: None,
                    face_url: Some(image_url),
                    duration: None,
                    aspect_ratio: None,
                    generate_audio: None,
                    audio_url: Some(audio_url),
                })
            }
            other => Err(ProviderError::InvalidRequest(format!(
                "{other} is not served by fal.ai"
            ))),
        }
    }
}

// Response types

#[derive(Debug, Deserialize)]
struct FalSubmitResponse {
    request_id: String,
    /// URL to poll for status (provided by fal.ai).
    status_url: String,
    /// URL to fetch completed result (provided by fal.ai).
    response_url: String,
}

#[derive(Debug, Deserialize)]
struct FalStatusResponse {
    status: String,
    #[serde(default)]
    queue_position: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FalVideoResult {
    #[serde(default)]
    video: Option<FalVideoData>,
}

#[derive(Debug, Deserialize)]
struct FalVideoData {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FalErrorResponse {
    detail: FalErrorDetail,
}

/// fal.ai sends `detail` as a string, or as a list of validation entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FalErrorDetail {
    Message(String),
    Entries(Vec<FalErrorEntry>),
}

#[derive(Debug, Deserialize)]
struct FalErrorEntry {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl FalErrorDetail {
    fn render(self) -> String {
        match self {
            Self::Message(message) => message,
            Self::Entries(entries) => entries
                .into_iter()
                .map(|e| match (e.kind, e.msg) {
                    (Some(kind), Some(msg)) => format!("{kind}: {msg}"),
                    (Some(only), None) | (None, Some(only)) => only,
                    (None, None) => "unknown error".to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}
