//! Veo 3.1 (Google) adapter: Gemini Developer API and Vertex AI.

use crate::error::{parse_retry_after, redact_secrets, ProviderError, Result};
use crate::video::providers::google_auth::ServiceAccountTokenSource;
use crate::video::provider::{billed_result, VideoProvider};
use crate::video::types::{
    AspectRatio, ProviderId, VideoGenerationRequest, VideoGenerationResult, VideoMetadata,
};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// How Vertex AI requests are authenticated.
#[derive(Clone)]
pub enum VertexAuth {
    /// Express-mode API key, sent as `?key=`.
    ApiKey(String),
    /// Service-account bearer tokens.
    ServiceAccount(Arc<ServiceAccountTokenSource>),
}

impl std::fmt::Debug for VertexAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::ServiceAccount(_) => f.write_str("ServiceAccount"),
        }
    }
}

/// Which Google API backend serves the request.
#[derive(Debug, Clone)]
pub enum VeoBackend {
    /// Gemini Developer API (generativelanguage.googleapis.com), API key auth.
    Gemini {
        /// `GEMINI_KEY`.
        api_key: String,
    },
    /// Vertex AI (aiplatform.googleapis.com).
    Vertex {
        /// GCP project. Required for service-account auth; optional in express mode.
        project: Option<String>,
        /// GCP region, e.g. `us-central1`.
        location: String,
        /// Credentials.
        auth: VertexAuth,
    },
}

impl VeoBackend {
    fn provider_id(&self) -> ProviderId {
        match self {
            Self::Gemini { .. } => ProviderId::GoogleVeo31Gemini,
            Self::Vertex { .. } => ProviderId::GoogleVeo3,
        }
    }
}

/// Builder for [`VeoProvider`].
#[derive(Debug, Clone)]
pub struct VeoProviderBuilder {
    provider: ProviderId,
    api_key: Option<String>,
    project: Option<String>,
    location: String,
    token_source: Option<Arc<ServiceAccountTokenSource>>,
    output_dir: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
}

impl VeoProviderBuilder {
    /// Creates a builder for [`ProviderId::GoogleVeo31Gemini`] or [`ProviderId::GoogleVeo3`].
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            api_key: None,
            project: None,
            location: crate::config::DEFAULT_GCP_LOCATION.to_string(),
            token_source: None,
            output_dir: std::env::temp_dir().join("vidgen"),
            poll_interval: Duration::from_secs(10),
            timeout: provider.spec().default_timeout,
        }
    }

    /// Sets the API key (Gemini key, or Vertex express-mode key).
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the GCP project ID (Vertex only).
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Sets the GCP location (Vertex only).
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Authenticates Vertex calls with a service account.
    pub fn service_account(mut self, source: Arc<ServiceAccountTokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    /// Directory finished videos are written to.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Sets the polling interval for the long-running operation.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum time to wait for generation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the provider, resolving the backend and its credentials.
    ///
    /// Vertex prefers an API key when one is given; otherwise it needs a
    /// project and a service account.
    pub fn build(self) -> Result<VeoProvider> {
        let api_key = self.api_key.filter(|k| !k.trim().is_empty());

        let backend = match self.provider {
            ProviderId::GoogleVeo31Gemini => VeoBackend::Gemini {
                api_key: api_key
                    .ok_or_else(|| ProviderError::Auth("GEMINI_KEY not set".into()))?,
            },
            ProviderId::GoogleVeo3 => {
                let auth = match (api_key, self.token_source) {
                    (Some(key), _) => VertexAuth::ApiKey(key),
                    (None, Some(source)) => {
                        if self.project.is_none() {
                            return Err(ProviderError::Auth(
                                "GOOGLE_CLOUD_PROJECT_ID is required for service account auth"
                                    .into(),
                            ));
                        }
                        VertexAuth::ServiceAccount(source)
                    }
                    (None, None) => {
                        return Err(ProviderError::Auth(
                            "Vertex AI needs GOOGLE_VERTEX_API_KEY or a service account".into(),
                        ))
                    }
                };
                VeoBackend::Vertex {
                    project: self.project,
                    location: self.location,
                    auth,
                }
            }
            other => {
                return Err(ProviderError::InvalidRequest(format!(
                    "{other} is not a Veo provider"
                )))
            }
        };

        Ok(VeoProvider {
            client: reqwest::Client::new(),
            backend,
            output_dir: self.output_dir,
            poll_interval: self.poll_interval,
            timeout: self.timeout,
        })
    }
}

/// Veo image-to-video adapter.
///
/// Submits a long-running prediction, polls the operation and stores the
/// finished video under the output directory. The returned locator is the
/// local file path.
#[derive(Debug)]
pub struct VeoProvider {
    client: reqwest::Client,
    backend: VeoBackend,
    output_dir: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
}

impl VeoProvider {
    /// Creates a new [`VeoProviderBuilder`].
    pub fn builder(provider: ProviderId) -> VeoProviderBuilder {
        VeoProviderBuilder::new(provider)
    }

    /// Returns a reference to the active backend.
    pub fn backend(&self) -> &VeoBackend {
        &self.backend
    }

    fn model_id(&self) -> &'static str {
        self.backend.provider_id().spec().model
    }

    /// Base URL of the Vertex model resource.
    fn vertex_model_url(&self, project: Option<&str>, location: &str) -> String {
        let model_id = self.model_id();
        match project {
            Some(project) => format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model_id}"
            ),
            None => format!("https://aiplatform.googleapis.com/v1/publishers/google/models/{model_id}"),
        }
    }

    /// Attaches Vertex credentials to a request.
    async fn vertex_authorize(
        &self,
        builder: reqwest::RequestBuilder,
        auth: &VertexAuth,
    ) -> Result<reqwest::RequestBuilder> {
        Ok(match auth {
            VertexAuth::ApiKey(key) => builder.query(&[("key", key.as_str())]),
            VertexAuth::ServiceAccount(source) => {
                let token = source.access_token().await?;
                builder.bearer_auth(token)
            }
        })
    }

    async fn error_from(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        self.parse_error(status, &text, &headers)
    }

    /// Submits the prediction and returns the operation name.
    async fn submit(&self, data: &VeoRequestData) -> Result<String> {
        let request = match &self.backend {
            VeoBackend::Gemini { api_key } => self
                .client
                .post(format!(
                    "{GEMINI_BASE_URL}/models/{}:predictLongRunning",
                    self.model_id()
                ))
                .header("x-goog-api-key", api_key)
                .json(&VeoRequest::from_data(data)),
            VeoBackend::Vertex {
                project,
                location,
                auth,
            } => {
                let url = format!(
                    "{}:predictLongRunning",
                    self.vertex_model_url(project.as_deref(), location)
                );
                let builder = self.client.post(url).json(&VertexRequest::from_data(data));
                self.vertex_authorize(builder, auth).await?
            }
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }

        let operation: VeoOperationResponse = response.json().await?;
        Ok(operation.name)
    }

    /// Fetches the current state of the operation once.
    async fn fetch_operation(&self, operation_name: &str) -> Result<VeoOperationResponse> {
        let request = match &self.backend {
            VeoBackend::Gemini { api_key } => self
                .client
                .get(format!("{GEMINI_BASE_URL}/{operation_name}"))
                .header("x-goog-api-key", api_key),
            VeoBackend::Vertex {
                project,
                location,
                auth,
            } => {
                let url = format!(
                    "{}:fetchPredictOperation",
                    self.vertex_model_url(project.as_deref(), location)
                );
                let builder = self.client.post(url).json(&VertexFetchOperationRequest {
                    operation_name: operation_name.to_string(),
                });
                self.vertex_authorize(builder, auth).await?
            }
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }
        Ok(response.json().await?)
    }

    /// Polls until the operation is done and returns where the video is.
    async fn poll_until_done(&self, operation_name: &str) -> Result<VideoPayload> {
        let start = Instant::now();

        loop {
            if start.elapsed() > self.timeout {
                return Err(ProviderError::Timeout(self.timeout));
            }

            let operation = self.fetch_operation(operation_name).await?;
            if operation.done.unwrap_or(false) {
                return extract_payload(operation);
            }
            if let Some(err) = operation.error {
                return Err(operation_error(err));
            }

            tracing::debug!(
                provider = %self.backend.provider_id(),
                operation = %operation_name,
                elapsed_secs = start.elapsed().as_secs(),
                "polling Veo operation"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Turns the payload into video bytes.
    async fn download(&self, payload: VideoPayload) -> Result<Vec<u8>> {
        let url = match payload {
            VideoPayload::Inline(b64) => {
                return base64::engine::general_purpose::STANDARD
                    .decode(b64.trim())
                    .map_err(|e| ProviderError::Decode(format!("inline video data: {e}")));
            }
            VideoPayload::Remote(url) => url,
        };

        let request = match &self.backend {
            VeoBackend::Gemini { api_key } => {
                if url.starts_with("gs://") {
                    return Err(ProviderError::UnexpectedResponse(format!(
                        "Veo returned a Google Cloud Storage URI ({url}) the Gemini API cannot download"
                    )));
                }
                self.client
                    .get(&url)
                    .query(&[("key", api_key.as_str())])
                    .header("x-goog-api-key", api_key)
            }
            VeoBackend::Vertex { auth, .. } => {
                let https_url = match url.strip_prefix("gs://") {
                    Some(path) => format!("https://storage.googleapis.com/{path}"),
                    None => url.clone(),
                };
                self.vertex_authorize(self.client.get(https_url), auth).await?
            }
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Api {
                status: response.status().as_u16(),
                message: "failed to download generated video".into(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    fn parse_error(&self, status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> ProviderError {
        if status == 402 {
            return ProviderError::Billing(
                "Veo billing issue: enable billing on the Google Cloud project".into(),
            );
        }
        let text = redact_secrets(text);
        if status == 429 {
            let retry_after = parse_retry_after(headers).map(Duration::from_secs);
            return ProviderError::RateLimited { retry_after };
        }
        if status == 401 || status == 403 {
            return ProviderError::Auth(text);
        }
        let lower = text.to_lowercase();
        if lower.contains("safety")
            || lower.contains("blocked")
            || lower.contains("content_policy")
            || lower.contains("prohibited")
        {
            return ProviderError::ContentBlocked(text);
        }
        if lower.contains("api key not valid") || lower.contains("api_key_invalid") {
            return ProviderError::Auth(text);
        }
        if status == 404 {
            return ProviderError::InvalidRequest(format!(
                "Veo model not available for this key; Veo requires a paid tier with billing enabled ({text})"
            ));
        }
        if status == 400 {
            return ProviderError::InvalidRequest(text);
        }
        ProviderError::Api {
            status,
            message: text,
        }
    }
}

/// Writes the video to `dir` and returns its path.
async fn save_video(dir: &Path, provider: ProviderId, data: &[u8]) -> Result<PathBuf> {
    if data.is_empty() {
        return Err(ProviderError::EmptyResult("video payload is empty".into()));
    }
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}_{}.mp4", provider, uuid::Uuid::new_v4()));
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

#[async_trait]
impl VideoProvider for VeoProvider {
    async fn generate(&self, request: &VideoGenerationRequest) -> Result<VideoGenerationResult> {
        let start = Instant::now();
        let provider = self.backend.provider_id();
        let submitted_secs = provider.spec().duration.apply(request.duration_secs);

        let (image, mime_type) = request.image.load(&self.client).await?;
        let data = VeoRequestData::new(&self.backend, request, &image, mime_type, submitted_secs);

        let operation_name = self.submit(&data).await?;
        tracing::debug!(
            provider = %provider,
            operation = %operation_name,
            duration_secs = submitted_secs,
            "submitted Veo operation"
        );

        let payload = self.poll_until_done(&operation_name).await?;
        let bytes = self.download(payload).await?;
        let path = save_video(&self.output_dir, provider, &bytes).await?;
        tracing::debug!(provider = %provider, path = %path.display(), bytes = bytes.len(), "saved Veo video");

        billed_result(
            provider,
            path.to_string_lossy(),
            submitted_secs,
            request.with_audio,
            VideoMetadata {
                model: Some(self.model_id().to_string()),
                job_id: Some(operation_name),
                elapsed_ms: Some(start.elapsed().as_millis() as u64),
            },
        )
    }

    fn id(&self) -> ProviderId {
        self.backend.provider_id()
    }

    async fn health_check(&self) -> Result<()> {
        let request = match &self.backend {
            VeoBackend::Gemini { api_key } => self
                .client
                .get(format!("{GEMINI_BASE_URL}/models/{}", self.model_id()))
                .header("x-goog-api-key", api_key),
            VeoBackend::Vertex {
                project,
                location,
                auth,
            } => {
                let url = self.vertex_model_url(project.as_deref(), location);
                self.vertex_authorize(self.client.get(url), auth).await?
            }
        };

        let response = request.send().await?;
        match response.status().as_u16() {
            401 | 403 => Err(ProviderError::Auth("Veo credentials rejected".into())),
            _ => Ok(()),
        }
    }
}

/// Where a finished operation put the video.
#[derive(Debug, PartialEq, Eq)]
enum VideoPayload {
    Inline(String),
    Remote(String),
}

fn operation_error(err: VeoError) -> ProviderError {
    let message = err.message.unwrap_or_else(|| "Unknown error".into());
    match err.code {
        // INVALID_ARGUMENT / FAILED_PRECONDITION
        Some(3) | Some(9) => ProviderError::InvalidRequest(message),
        _ => ProviderError::VideoGeneration(message),
    }
}

/// Reads the video out of a finished operation, whichever backend shape it has.
fn extract_payload(operation: VeoOperationResponse) -> Result<VideoPayload> {
    if let Some(err) = operation.error {
        return Err(operation_error(err));
    }

    let Some(response) = operation.response else {
        return Err(ProviderError::EmptyResult(
            "operation finished without a response".into(),
        ));
    };

    let (samples, filtered, reasons) = match response.generate_video_response {
        Some(generated) => (
            generated.generated_samples.unwrap_or_default(),
            generated.rai_media_filtered_count.unwrap_or(0),
            generated.rai_media_filtered_reasons.unwrap_or_default(),
        ),
        None => (
            Vec::new(),
            response.rai_media_filtered_count.unwrap_or(0),
            response.rai_media_filtered_reasons.unwrap_or_default(),
        ),
    };
    let videos = response.videos.unwrap_or_default();

    if let Some(uri) = samples.into_iter().find_map(|s| s.video.and_then(|v| v.uri)) {
        return Ok(VideoPayload::Remote(uri));
    }
    for video in videos {
        if let Some(b64) = video.bytes_base64_encoded {
            return Ok(VideoPayload::Inline(b64));
        }
        if let Some(uri) = video.gcs_uri.or(video.uri) {
            return Ok(VideoPayload::Remote(uri));
        }
    }

    if filtered > 0 {
        let detail = if reasons.is_empty() {
            "video was filtered by Veo safety filters".to_string()
        } else {
            reasons.join("; ")
        };
        return Err(ProviderError::ContentBlocked(detail));
    }

    Err(ProviderError::EmptyResult(
        "Veo finished without returning a video".into(),
    ))
}

// Shared request representation

struct VeoRequestData {
    prompt: String,
    image_b64: String,
    mime_type: String,
    aspect_ratio: Option<&'static str>,
    duration_seconds: u32,
    resolution: Option<&'static str>,
    generate_audio: Option<bool>,
}

impl VeoRequestData {
    fn new(
        backend: &VeoBackend,
        request: &VideoGenerationRequest,
        image: &[u8],
        mime_type: String,
        duration_seconds: u32,
    ) -> Self {
        // Veo only renders landscape and portrait; square falls back to the model default.
        let aspect_ratio = match request.aspect_ratio {
            AspectRatio::Square => None,
            other => Some(other.as_str()),
        };
        let (resolution, generate_audio) = match backend {
            VeoBackend::Gemini { .. } => (Some("720p"), None),
            VeoBackend::Vertex { .. } => (None, Some(request.with_audio)),
        };

        Self {
            prompt: request.prompt.clone(),
            image_b64: base64::engine::general_purpose::STANDARD.encode(image),
            mime_type,
            aspect_ratio,
            duration_seconds,
            resolution,
            generate_audio,
        }
    }
}

// Gemini Developer API wire format

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoRequest {
    instances: Vec<VeoInstance>,
    parameters: VeoParameters,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoMediaData {
    inline_data: VeoInlineData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoInstance {
    prompt: String,
    image: VeoMediaData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<&'static str>,
    duration_seconds: u32,
}

impl VeoRequest {
    fn from_data(data: &VeoRequestData) -> Self {
        Self {
            instances: vec![VeoInstance {
                prompt: data.prompt.clone(),
                image: VeoMediaData {
                    inline_data: VeoInlineData {
                        mime_type: data.mime_type.clone(),
                        data: data.image_b64.clone(),
                    },
                },
            }],
            parameters: VeoParameters {
                aspect_ratio: data.aspect_ratio,
                resolution: data.resolution,
                duration_seconds: data.duration_seconds,
            },
        }
    }
}

// Vertex AI wire format

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexMediaData {
    bytes_base64_encoded: String,
    mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexInstance {
    prompt: String,
    image: VertexMediaData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'static str>,
    duration_seconds: u32,
    sample_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    generate_audio: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexRequest {
    instances: Vec<VertexInstance>,
    parameters: VertexParameters,
}

impl VertexRequest {
    fn from_data(data: &VeoRequestData) -> Self {
        Self {
            instances: vec![VertexInstance {
                prompt: data.prompt.clone(),
                image: VertexMediaData {
                    bytes_base64_encoded: data.image_b64.clone(),
                    mime_type: data.mime_type.clone(),
                },
            }],
            parameters: VertexParameters {
                aspect_ratio: data.aspect_ratio,
                duration_seconds: data.duration_seconds,
                sample_count: 1,
                generate_audio: data.generate_audio,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexFetchOperationRequest {
    operation_name: String,
}

// Response types (shared + Vertex-specific fields)

#[derive(Debug, Deserialize)]
struct VeoOperationResponse {
    name: String,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    response: Option<VeoVideoResponse>,
    #[serde(default)]
    error: Option<VeoError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VeoVideoResponse {
    /// Gemini shape.
    #[serde(default)]
    generate_video_response: Option<VeoGenerateVideoResponse>,
    /// Vertex shape.
    #[serde(default)]
    videos: Option<Vec<VertexVideo>>,
    #[serde(default)]
    rai_media_filtered_count: Option<u32>,
    #[serde(default)]
    rai_media_filtered_reasons: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VeoGenerateVideoResponse {
    #[serde(default)]
    generated_samples: Option<Vec<VeoGeneratedSample>>,
    #[serde(default)]
    rai_media_filtered_count: Option<u32>,
    #[serde(default)]
    rai_media_filtered_reasons: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct VeoGeneratedSample {
    #[serde(default)]
    video: Option<VeoVideo>,
}

#[derive(Debug, Deserialize)]
struct VeoVideo {
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VeoError {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VertexVideo {
    #[serde(default)]
    gcs_uri: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::types::ImageRef;

    const PNG_HEADER: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn gemini() -> VeoProvider {
        VeoProviderBuilder::new(ProviderId::GoogleVeo31Gemini)
            .api_key("test-key")
            .build()
            .unwrap()
    }

    fn vertex() -> VeoProvider {
        VeoProviderBuilder::new(ProviderId::GoogleVeo3)
            .api_key("AIza-test")
            .project("demo")
            .location("europe-west4")
            .build()
            .unwrap()
    }

    fn request(provider: ProviderId) -> VideoGenerationRequest {
        VideoGenerationRequest::new(
            provider,
            ImageRef::from_bytes(PNG_HEADER.to_vec()),
            "A lighthouse at dusk",
        )
    }

    fn operation(json: &str) -> VeoOperationResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_gemini_requires_key() {
        let result = VeoProviderBuilder::new(ProviderId::GoogleVeo31Gemini).build();
        assert!(matches!(result, Err(ProviderError::Auth(_))));
    }

    #[test]
    fn test_vertex_requires_credentials() {
        let result = VeoProviderBuilder::new(ProviderId::GoogleVeo3)
            .project("demo")
            .build();
        assert!(matches!(result, Err(ProviderError::Auth(_))));
    }

    #[test]
    fn test_vertex_service_account_requires_project() {
        let key = crate::video::providers::google_auth::ServiceAccountKey::from_json(
            r#"{"client_email": "a@b.iam.gserviceaccount.com", "private_key": "x"}"#,
        )
        .unwrap();
        let source = Arc::new(ServiceAccountTokenSource::new(key));

        let result = VeoProviderBuilder::new(ProviderId::GoogleVeo3)
            .service_account(source.clone())
            .build();
        assert!(matches!(result, Err(ProviderError::Auth(_))));

        let provider = VeoProviderBuilder::new(ProviderId::GoogleVeo3)
            .service_account(source)
            .project("demo")
            .build()
            .unwrap();
        assert!(matches!(
            provider.backend(),
            VeoBackend::Vertex {
                auth: VertexAuth::ServiceAccount(_),
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_non_veo_provider() {
        let result = VeoProviderBuilder::new(ProviderId::FalVeo3)
            .api_key("k")
            .build();
        assert!(matches!(result, Err(ProviderError::InvalidRequest(_))));
    }

    #[test]
    fn test_ids_and_models() {
        assert_eq!(gemini().id(), ProviderId::GoogleVeo31Gemini);
        assert_eq!(gemini().model_id(), "veo-3.1-generate-preview");
        assert_eq!(vertex().id(), ProviderId::GoogleVeo3);
        assert_eq!(vertex().model_id(), "veo-3.1-generate-001");
    }

    #[test]
    fn test_vertex_model_url() {
        let provider = vertex();
        assert_eq!(
            provider.vertex_model_url(Some("demo"), "europe-west4"),
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/demo/locations/europe-west4/publishers/google/models/veo-3.1-generate-001"
        );
        assert_eq!(
            provider.vertex_model_url(None, "us-central1"),
            "https://aiplatform.googleapis.com/v1/publishers/google/models/veo-3.1-generate-001"
        );
    }

    #[test]
    fn test_gemini_wire_format() {
        let provider = gemini();
        let req = request(ProviderId::GoogleVeo31Gemini).with_duration(5);
        let secs = ProviderId::GoogleVeo31Gemini.spec().duration.apply(req.duration_secs);
        let data = VeoRequestData::new(&provider.backend, &req, &PNG_HEADER, "image/png".into(), secs);
        let json = serde_json::to_value(VeoRequest::from_data(&data)).unwrap();

        let instance = &json["instances"][0];
        assert_eq!(instance["prompt"], "A lighthouse at dusk");
        assert_eq!(instance["image"]["inlineData"]["mimeType"], "image/png");
        assert!(instance["image"]["bytesBase64Encoded"].is_null());

        let params = &json["parameters"];
        assert_eq!(params["durationSeconds"], 6);
        assert_eq!(params["aspectRatio"], "16:9");
        assert_eq!(params["resolution"], "720p");
        assert!(params.get("generateAudio").is_none());
    }

    #[test]
    fn test_vertex_wire_format() {
        let provider = vertex();
        let req = request(ProviderId::GoogleVeo3)
            .with_duration(30)
            .with_audio(true)
            .with_aspect_ratio(AspectRatio::Square);
        let secs = ProviderId::GoogleVeo3.spec().duration.apply(req.duration_secs);
        let data = VeoRequestData::new(&provider.backend, &req, &PNG_HEADER, "image/png".into(), secs);
        let json = serde_json::to_value(VertexRequest::from_data(&data)).unwrap();

        let instance = &json["instances"][0];
        assert_eq!(instance["image"]["mimeType"], "image/png");
        assert!(instance["image"]["bytesBase64Encoded"].is_string());
        assert!(instance["image"]["inlineData"].is_null());

        let params = &json["parameters"];
        assert_eq!(params["durationSeconds"], 8);
        assert_eq!(params["sampleCount"], 1);
        assert_eq!(params["generateAudio"], true);
        assert!(params.get("aspectRatio").is_none());
        assert!(params.get("numberOfVideos").is_none());
    }

    #[test]
    fn test_fetch_operation_request_serialization() {
        let json = serde_json::to_value(VertexFetchOperationRequest {
            operation_name: "projects/123/operations/456".to_string(),
        })
        .unwrap();
        assert_eq!(json["operationName"], "projects/123/operations/456");
    }

    #[test]
    fn test_extract_gemini_uri() {
        let op = operation(
            r#"{
                "name": "models/veo/operations/1",
                "done": true,
                "response": {"generateVideoResponse": {"generatedSamples": [
                    {"video": {"uri": "https://generativelanguage.googleapis.com/v1beta/files/abc:download"}}
                ]}}
            }"#,
        );
        assert_eq!(
            extract_payload(op).unwrap(),
            VideoPayload::Remote(
                "https://generativelanguage.googleapis.com/v1beta/files/abc:download".into()
            )
        );
    }

    #[test]
    fn test_extract_vertex_inline_and_gcs() {
        let op = operation(
            r#"{"name": "op", "done": true, "response": {"raiMediaFilteredCount": 0, "videos": [{"bytesBase64Encoded": "AQID"}]}}"#,
        );
        assert_eq!(extract_payload(op).unwrap(), VideoPayload::Inline("AQID".into()));

        let op = operation(
            r#"{"name": "op", "done": true, "response": {"videos": [{"gcsUri": "gs://bucket/video.mp4"}]}}"#,
        );
        assert_eq!(
            extract_payload(op).unwrap(),
            VideoPayload::Remote("gs://bucket/video.mp4".into())
        );
    }

    #[test]
    fn test_extract_filtered_is_content_blocked() {
        let op = operation(
            r#"{"name": "op", "done": true, "response": {"generateVideoResponse": {
                "raiMediaFilteredCount": 1,
                "raiMediaFilteredReasons": ["The prompt could not be submitted (celebrity likeness)"]
            }}}"#,
        );
        match extract_payload(op).unwrap_err() {
            ProviderError::ContentBlocked(detail) => assert!(detail.contains("celebrity")),
            other => panic!("expected ContentBlocked, got {other:?}"),
        }

        let op = operation(
            r#"{"name": "op", "done": true, "response": {"raiMediaFilteredCount": 1, "videos": []}}"#,
        );
        assert!(matches!(
            extract_payload(op).unwrap_err(),
            ProviderError::ContentBlocked(_)
        ));
    }

    #[test]
    fn test_extract_empty_and_error() {
        let op = operation(r#"{"name": "op", "done": true, "response": {"videos": []}}"#);
        assert!(matches!(
            extract_payload(op).unwrap_err(),
            ProviderError::EmptyResult(_)
        ));

        let op = operation(r#"{"name": "op", "done": true}"#);
        assert!(matches!(
            extract_payload(op).unwrap_err(),
            ProviderError::EmptyResult(_)
        ));

        let op = operation(
            r#"{"name": "op", "done": true, "error": {"code": 3, "message": "durationSeconds must be 4, 6 or 8"}}"#,
        );
        assert!(matches!(
            extract_payload(op).unwrap_err(),
            ProviderError::InvalidRequest(_)
        ));

        let op = operation(
            r#"{"name": "op", "done": true, "error": {"code": 13, "message": "internal"}}"#,
        );
        assert!(matches!(
            extract_payload(op).unwrap_err(),
            ProviderError::VideoGeneration(_)
        ));
    }

    #[test]
    fn test_parse_error() {
        let provider = gemini();
        let mut headers = reqwest::header::HeaderMap::new();

        assert!(matches!(
            provider.parse_error(402, "", &headers),
            ProviderError::Billing(_)
        ));
        assert!(matches!(
            provider.parse_error(403, "PERMISSION_DENIED", &headers),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            provider.parse_error(400, r#"{"error": {"message": "API key not valid. Please pass a valid API key."}}"#, &headers),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            provider.parse_error(400, "Image blocked by safety filters", &headers),
            ProviderError::ContentBlocked(_)
        ));
        assert!(matches!(
            provider.parse_error(400, "aspectRatio 4:3 is not supported", &headers),
            ProviderError::InvalidRequest(_)
        ));
        match provider.parse_error(404, "Not Found", &headers) {
            ProviderError::InvalidRequest(msg) => assert!(msg.contains("billing")),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }

        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(
            provider.parse_error(429, "RESOURCE_EXHAUSTED", &headers).retry_after(),
            Some(Duration::from_secs(12))
        );
        assert!(matches!(
            provider.parse_error(503, "The service is currently unavailable", &headers),
            ProviderError::Api { status: 503, .. }
        ));
    }

    #[tokio::test]
    async fn test_download_decodes_inline() {
        let bytes = vertex()
            .download(VideoPayload::Inline("AQID".into()))
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_gemini_rejects_gcs_uri() {
        let err = gemini()
            .download(VideoPayload::Remote("gs://bucket/video.mp4".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Google Cloud Storage"));
    }

    #[tokio::test]
    async fn test_save_video() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let path = save_video(&out, ProviderId::GoogleVeo3, &[1, 2, 3]).await.unwrap();
        assert!(path.starts_with(&out));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);

        let err = save_video(&out, ProviderId::GoogleVeo3, &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResult(_)));
    }
}
